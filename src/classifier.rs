/// Multinomial logistic regression ("maximum entropy") over embeddings,
/// trained with L-BFGS, or OWL-QN when an L1 penalty is set.

use log::{info, warn};
use ndarray::{s, Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::feature_extractor::Embedding;
use crate::label_key::LabelKey;
use crate::lbfgs::{Lbfgs, Objective};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaximumEntropyOptions
{
    /// Weight of the L1 norm of the weights. Drives weights of uninformative features to exactly zero.
    pub l1_regularization: f64,
    /// Weight of the squared L2 norm of the weights; biases are not penalised.
    pub l2_regularization: f64,
    pub optimization_tolerance: f64,
    /// Number of past steps L-BFGS keeps to estimate curvature.
    pub history_size: usize,
    pub max_iterations: usize,
    /// Divide every feature by its largest magnitude in the training set.
    pub normalize_features: bool,
}

impl Default for MaximumEntropyOptions
{
    fn default() -> Self
    {
        MaximumEntropyOptions {
            l1_regularization: 1.,
            l2_regularization: 1.,
            optimization_tolerance: 1e-7,
            history_size: 20,
            max_iterations: 1000,
            normalize_features: true,
        }
    }
}

impl MaximumEntropyOptions
{
    pub fn validate(&self) -> Result<()>
    {
        if !(self.l1_regularization >= 0.) {
            return Err(Error::Config(format!("l1_regularization must be >= 0, got {}", self.l1_regularization)));
        }
        if !(self.l2_regularization >= 0.) {
            return Err(Error::Config(format!("l2_regularization must be >= 0, got {}", self.l2_regularization)));
        }
        if !(self.optimization_tolerance >= 0.) {
            return Err(Error::Config(format!("optimization_tolerance must be >= 0, got {}", self.optimization_tolerance)));
        }
        if self.history_size == 0 {
            return Err(Error::Config("history_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Per-feature scaling fitted on the training embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureScaler
{
    scales: Array1<f64>,
}

impl FeatureScaler
{
    pub fn identity(width: usize) -> Self
    {
        FeatureScaler { scales: Array1::ones(width) }
    }

    /// Maps each feature into [-1, 1]; zero stays zero.
    pub fn max_abs(embeddings: &[Embedding], width: usize) -> Self
    {
        let mut max = Array1::<f64>::zeros(width);
        for embedding in embeddings
        {
            max.zip_mut_with(embedding, |m, &v| *m = m.max((v as f64).abs()));
        }
        let scales = max.mapv(|m| if m > 0. && m.is_finite() { 1. / m } else { 1. });
        FeatureScaler { scales }
    }

    pub fn width(&self) -> usize
    {
        self.scales.len()
    }

    pub fn apply(&self, embedding: ArrayView1<f32>) -> Array1<f64>
    {
        embedding.mapv(f64::from) * &self.scales
    }
}

#[derive(Debug, Clone)]
struct TrainedModel
{
    label_key: LabelKey,
    scaler: FeatureScaler,
    /// One row per class: the feature weights followed by the bias.
    parameters: Array2<f64>,
}

/// Untrained until `fit` succeeds, trained afterwards. A trained classifier is
/// never refitted.
#[derive(Debug, Clone, Default)]
pub struct MaximumEntropy
{
    options: MaximumEntropyOptions,
    model: Option<TrainedModel>,
}

impl MaximumEntropy
{
    pub fn new(options: MaximumEntropyOptions) -> Self
    {
        MaximumEntropy { options, model: None }
    }

    pub fn is_trained(&self) -> bool
    {
        self.model.is_some()
    }

    pub fn options(&self) -> &MaximumEntropyOptions
    {
        &self.options
    }

    /// The label encoding established by `fit`.
    pub fn label_key(&self) -> Option<&LabelKey>
    {
        self.model.as_ref().map(|model| &model.label_key)
    }

    pub fn fit(self, embeddings: &[Embedding], labels: &[String]) -> Result<Self>
    {
        if self.model.is_some() {
            return Err(Error::AlreadyTrained);
        }
        self.options.validate()?;
        if embeddings.len() != labels.len() {
            return Err(Error::Training(format!(
                "{} embeddings but {} labels", embeddings.len(), labels.len())));
        }
        if embeddings.is_empty() {
            return Err(Error::Training("the training set is empty".to_string()));
        }

        let width = embeddings[0].len();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != width) {
            return Err(Error::Shape { expected: vec![width], actual: vec![bad.len()] });
        }

        let label_key = LabelKey::fit(labels.iter().map(String::as_str));
        let keys: Vec<usize> = labels.iter().map(|label| label_key.encode(label)).collect::<Result<_>>()?;

        let scaler = if self.options.normalize_features {
            FeatureScaler::max_abs(embeddings, width)
        } else {
            FeatureScaler::identity(width)
        };

        // Trailing column of ones carries the bias.
        let mut features = Array2::<f64>::ones((embeddings.len(), width + 1));
        for (mut row, embedding) in features.outer_iter_mut().zip(embeddings)
        {
            row.slice_mut(s![..width]).assign(&scaler.apply(embedding.view()));
        }

        let objective = SoftmaxObjective {
            features: &features,
            keys: &keys,
            classes: label_key.len(),
            l2: self.options.l2_regularization,
        };
        let lbfgs = Lbfgs {
            history_size: self.options.history_size,
            tolerance: self.options.optimization_tolerance,
            max_iterations: self.options.max_iterations,
        };

        let now = std::time::Instant::now();
        let x0 = Array1::zeros(label_key.len() * (width + 1));
        let minimum = if self.options.l1_regularization > 0. {
            let mut l1 = Array2::from_elem((label_key.len(), width + 1), self.options.l1_regularization);
            l1.column_mut(width).fill(0.);
            lbfgs.minimize_l1(&objective, x0, &l1.iter().copied().collect())
        } else {
            lbfgs.minimize(&objective, x0)
        };
        if !minimum.value.is_finite() {
            return Err(Error::Training(format!("the loss diverged to {}", minimum.value)));
        }
        if !minimum.converged {
            warn!("L-BFGS stopped after {} iterations without converging", minimum.iterations);
        }
        info!("Fitted {} classes on {} samples of {} features in {} iterations ({:?}), loss {:.6}",
            label_key.len(), embeddings.len(), width, minimum.iterations, now.elapsed(), minimum.value);

        let parameters = Array2::from_shape_vec((label_key.len(), width + 1), minimum.x.to_vec())
            .map_err(|e| Error::Training(e.to_string()))?;

        Ok(MaximumEntropy {
            options: self.options,
            model: Some(TrainedModel { label_key, scaler, parameters }),
        })
    }

    /// Returns the most likely label and the probability of every label, in key order.
    pub fn predict(&self, embedding: &Embedding) -> Result<(String, Vec<f32>)>
    {
        let model = self.model.as_ref().ok_or(Error::NotTrained)?;
        let width = model.scaler.width();
        if embedding.len() != width {
            return Err(Error::Shape { expected: vec![width], actual: vec![embedding.len()] });
        }

        let x = model.scaler.apply(embedding.view());
        let logits: Vec<f64> = model.parameters.outer_iter()
            .map(|row| row.slice(s![..width]).dot(&x) + row[width])
            .collect();
        let scores: Vec<f32> = softmax(&logits).into_iter().map(|p| p as f32).collect();

        let best = argmax(&scores);
        let label = model.label_key.label(best).ok_or(Error::NotTrained)?.to_string();
        Ok((label, scores))
    }
}

struct SoftmaxObjective<'a>
{
    features: &'a Array2<f64>,
    keys: &'a [usize],
    classes: usize,
    l2: f64,
}

impl Objective for SoftmaxObjective<'_>
{
    fn evaluate(&self, theta: &Array1<f64>, gradient: &mut Array1<f64>) -> f64
    {
        let dims = self.features.ncols();
        let block = |c: usize| s![c * dims..(c + 1) * dims];

        gradient.fill(0.);
        let mut loss = 0.;
        let mut logits = vec![0.; self.classes];
        for (row, &key) in self.features.outer_iter().zip(self.keys)
        {
            for (c, logit) in logits.iter_mut().enumerate()
            {
                *logit = row.dot(&theta.slice(block(c)));
            }
            let probabilities = softmax(&logits);
            loss += log_sum_exp(&logits) - logits[key];

            for (c, p) in probabilities.iter().enumerate()
            {
                let residual = if c == key { p - 1. } else { *p };
                gradient.slice_mut(block(c)).scaled_add(residual, &row);
            }
        }

        for c in 0..self.classes
        {
            // The last parameter of each block is the bias.
            let weights = theta.slice(s![c * dims..(c + 1) * dims - 1]);
            loss += 0.5 * self.l2 * weights.dot(&weights);
            gradient.slice_mut(s![c * dims..(c + 1) * dims - 1]).scaled_add(self.l2, &weights);
        }

        loss
    }
}

fn log_sum_exp(values: &[f64]) -> f64
{
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

fn softmax(values: &[f64]) -> Vec<f64>
{
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the first largest score.
fn argmax(scores: &[f32]) -> usize
{
    let mut best = 0;
    for (i, score) in scores.iter().enumerate()
    {
        if *score > scores[best] {
            best = i;
        }
    }
    best
}
