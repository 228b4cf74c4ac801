/// Multiclass evaluation of predictions against the labels they were made for.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::label_key::LabelKey;
use crate::pipeline::Prediction;

/// Probabilities are clamped to this before taking the logarithm.
const EPSILON: f64 = 1e-15;

/// What to do with a held-out sample whose label was never seen during training
/// (or that has no label at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnseenLabelPolicy
{
    /// Fail the evaluation.
    #[default]
    Error,
    /// Leave the sample out of every metric.
    Exclude,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MulticlassMetrics
{
    /// Mean of `-ln p(true label)` over the evaluated samples.
    pub log_loss: f64,
    /// Log-loss per class, in label key order. Classes absent from the held-out set report 0.
    pub per_class_log_loss: Vec<f64>,
    /// Relative improvement of `log_loss` over always predicting the class frequencies.
    pub log_loss_reduction: f64,
    /// Fraction of samples predicted correctly.
    pub micro_accuracy: f64,
    /// Mean over the present classes of the fraction of that class predicted correctly.
    pub macro_accuracy: f64,
    pub evaluated: usize,
    pub excluded: usize,
}

impl MulticlassMetrics
{
    pub fn evaluate(label_key: &LabelKey, predictions: &[Prediction], policy: UnseenLabelPolicy) -> Result<Self>
    {
        let classes = label_key.len();
        let mut loss_per_class = vec![0.; classes];
        let mut correct_per_class = vec![0usize; classes];
        let mut count_per_class = vec![0usize; classes];
        let mut excluded = 0;

        for prediction in predictions
        {
            let key = match prediction.label.as_deref().map(|label| (label, label_key.key(label)))
            {
                Some((_, Some(key))) => key,
                unknown => {
                    let reason = match unknown
                    {
                        Some((label, _)) => format!("label {:?} of {:?} was not seen during training", label, prediction.image_path),
                        None => format!("{:?} has no label", prediction.image_path),
                    };
                    match policy
                    {
                        UnseenLabelPolicy::Error => return Err(Error::Metric(reason)),
                        UnseenLabelPolicy::Exclude => {
                            warn!("Excluding from evaluation: {}", reason);
                            excluded += 1;
                            continue;
                        }
                    }
                }
            };

            if prediction.scores.len() != classes {
                return Err(Error::Shape { expected: vec![classes], actual: vec![prediction.scores.len()] });
            }

            let probability = (prediction.scores[key] as f64).clamp(EPSILON, 1.);
            loss_per_class[key] += -probability.ln();
            count_per_class[key] += 1;
            if label_key.key(&prediction.predicted_label) == Some(key) {
                correct_per_class[key] += 1;
            }
        }

        let evaluated: usize = count_per_class.iter().sum();
        if evaluated == 0 {
            return Err(Error::Metric("there are no labeled predictions to evaluate".to_string()));
        }
        let total = evaluated as f64;

        let log_loss = loss_per_class.iter().sum::<f64>() / total;
        let per_class_log_loss = loss_per_class.iter().zip(&count_per_class)
            .map(|(loss, &count)| if count > 0 { loss / count as f64 } else { 0. })
            .collect();

        let prior_log_loss: f64 = count_per_class.iter()
            .filter(|&&count| count > 0)
            .map(|&count| {
                let frequency = count as f64 / total;
                -frequency * frequency.ln()
            })
            .sum();
        let log_loss_reduction = if prior_log_loss > 0. { (prior_log_loss - log_loss) / prior_log_loss } else { 0. };

        let micro_accuracy = correct_per_class.iter().sum::<usize>() as f64 / total;
        let present: Vec<f64> = correct_per_class.iter().zip(&count_per_class)
            .filter(|(_, &count)| count > 0)
            .map(|(&correct, &count)| correct as f64 / count as f64)
            .collect();
        let macro_accuracy = present.iter().sum::<f64>() / present.len() as f64;

        Ok(MulticlassMetrics {
            log_loss,
            per_class_log_loss,
            log_loss_reduction,
            micro_accuracy,
            macro_accuracy,
            evaluated,
            excluded,
        })
    }
}
