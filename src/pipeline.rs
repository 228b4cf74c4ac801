/// Composition of the transfer-learning pipeline:
///
/// load images -> resize -> extract pixels -> score the frozen network
///   -> map labels to keys -> maximum entropy -> map keys back to labels
///
/// Every stage is a `Transform` whose input type is the previous stage's output
/// type, so the builder only compiles stage orders that keep the shapes flowing.
/// The only stage that learns anything is the classifier, appended last.

use std::path::PathBuf;

use image::DynamicImage;
use log::{info, warn};

use crate::classifier::{MaximumEntropy, MaximumEntropyOptions};
use crate::error::{Error, Result};
use crate::feature_extractor::{Embedding, FeatureExtractor, ScoreModel};
use crate::label_key::LabelKey;
use crate::manifest::Sample;
use crate::preprocessing::{self, ExtractPixels, LoadImages, PixelTensor, ResizeImages};
use crate::settings::{ChannelOrder, Settings};

/// Images are decoded in parallel chunks of this many samples.
pub const BATCH_SIZE: usize = 32;

/// A stateless step of the pipeline.
pub trait Transform
{
    type Input;
    type Output;

    fn transform(&self, input: &Self::Input) -> Result<Self::Output>;
}

/// `first` followed by `second`.
#[derive(Debug, Clone)]
pub struct Chain<A, B>
{
    first: A,
    second: B,
}

impl<A, B> Chain<A, B>
where
    A: Transform,
    B: Transform<Input = A::Output>,
{
    pub fn new(first: A, second: B) -> Self
    {
        Chain { first, second }
    }
}

impl<A, B> Transform for Chain<A, B>
where
    A: Transform,
    B: Transform<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;

    fn transform(&self, input: &A::Input) -> Result<B::Output>
    {
        let intermediate = self.first.transform(input)?;
        self.second.transform(&intermediate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction
{
    pub image_path: PathBuf,
    /// Label from the manifest, if it had one.
    pub label: Option<String>,
    pub predicted_label: String,
    /// Probability of every training label, in label key order.
    pub scores: Vec<f32>,
}

impl Prediction
{
    pub fn max_score(&self) -> f32
    {
        self.scores.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }
}

/// Image stages, from a manifest sample to the network input.
pub struct PipelineBuilder<T>
{
    stages: T,
}

impl PipelineBuilder<LoadImages>
{
    pub fn load_images(image_folder: impl Into<PathBuf>) -> Self
    {
        PipelineBuilder { stages: LoadImages::new(image_folder) }
    }
}

impl<T: Transform<Input = Sample>> PipelineBuilder<T>
{
    pub fn append<U: Transform<Input = T::Output>>(self, next: U) -> PipelineBuilder<Chain<T, U>>
    {
        PipelineBuilder { stages: Chain::new(self.stages, next) }
    }
}

impl<T: Transform<Input = Sample, Output = DynamicImage>> PipelineBuilder<T>
{
    pub fn resize_images(self, width: u32, height: u32) -> PipelineBuilder<Chain<T, ResizeImages>>
    {
        self.append(ResizeImages::new(width, height))
    }

    pub fn extract_pixels(self, order: ChannelOrder, offset: f32, scale: f32) -> PipelineBuilder<Chain<T, ExtractPixels>>
    {
        self.append(ExtractPixels::new(order, offset).with_scale(scale))
    }
}

impl<T: Transform<Input = Sample, Output = PixelTensor>> PipelineBuilder<T>
{
    pub fn score_model<E: FeatureExtractor>(self, extractor: E) -> Featurizer<T, E>
    {
        Featurizer { images: self.stages, network: ScoreModel::new(extractor) }
    }
}

/// Every stateless stage, from a sample to its embedding.
pub struct Featurizer<T, E>
{
    images: T,
    network: ScoreModel<E>,
}

impl<T, E> Featurizer<T, E>
where
    T: Transform<Input = Sample, Output = PixelTensor> + Sync,
    E: FeatureExtractor,
{
    /// Appends the classifier, which maps labels to keys while fitting and
    /// keys back to labels while predicting.
    pub fn append_trainer(self, options: MaximumEntropyOptions) -> Estimator<T, E>
    {
        Estimator { featurizer: self, classifier: MaximumEntropy::new(options) }
    }

    pub fn featurize_one(&self, sample: &Sample) -> Result<Embedding>
    {
        let pixels = self.images.transform(sample)?;
        self.network.transform(&pixels)
    }

    /// Embeddings of all samples, in order. Images are decoded in parallel;
    /// the network scores them one at a time.
    pub fn featurize(&self, samples: &[Sample]) -> Result<Vec<Embedding>>
    {
        let mut embeddings = Vec::with_capacity(samples.len());
        for chunk in samples.chunks(BATCH_SIZE)
        {
            for pixels in preprocessing::transform_batch(&self.images, chunk)
            {
                embeddings.push(self.network.transform(&pixels?)?);
            }
        }
        Ok(embeddings)
    }
}

/// The pipeline before fitting.
pub struct Estimator<T, E>
{
    featurizer: Featurizer<T, E>,
    classifier: MaximumEntropy,
}

impl<T, E> Estimator<T, E>
where
    T: Transform<Input = Sample, Output = PixelTensor> + Sync,
    E: FeatureExtractor,
{
    /// Featurizes every labeled sample, then fits the classifier on all the
    /// embeddings at once. Samples without a label are skipped.
    pub fn fit(self, samples: &[Sample]) -> Result<TrainedModel<T, E>>
    {
        let labeled: Vec<Sample> = samples.iter().filter(|s| s.label.is_some()).cloned().collect();
        if labeled.len() < samples.len() {
            warn!("Skipping {} training samples without a label", samples.len() - labeled.len());
        }
        if labeled.is_empty() {
            return Err(Error::Training("no labeled training samples".to_string()));
        }

        let now = std::time::Instant::now();
        let embeddings = self.featurizer.featurize(&labeled)?;
        info!("Featurized {} training images in {:?}", embeddings.len(), now.elapsed());

        let labels: Vec<String> = labeled.into_iter().filter_map(|s| s.label).collect();
        let classifier = self.classifier.fit(&embeddings, &labels)?;

        Ok(TrainedModel { featurizer: self.featurizer, classifier })
    }
}

/// Every stage after fitting. Immutable; used for batch and single predictions.
pub struct TrainedModel<T, E>
{
    featurizer: Featurizer<T, E>,
    classifier: MaximumEntropy,
}

impl<T, E> TrainedModel<T, E>
where
    T: Transform<Input = Sample, Output = PixelTensor> + Sync,
    E: FeatureExtractor,
{
    pub fn label_key(&self) -> Result<&LabelKey>
    {
        self.classifier.label_key().ok_or(Error::NotTrained)
    }

    pub fn predict(&self, sample: &Sample) -> Result<Prediction>
    {
        let embedding = self.featurizer.featurize_one(sample)?;
        self.prediction(sample, &embedding)
    }

    pub fn transform(&self, samples: &[Sample]) -> Result<Vec<Prediction>>
    {
        let embeddings = self.featurizer.featurize(samples)?;
        samples.iter().zip(&embeddings).map(|(sample, embedding)| self.prediction(sample, embedding)).collect()
    }

    fn prediction(&self, sample: &Sample, embedding: &Embedding) -> Result<Prediction>
    {
        let (predicted_label, scores) = self.classifier.predict(embedding)?;
        Ok(Prediction {
            image_path: sample.image_path.clone(),
            label: sample.label.clone(),
            predicted_label,
            scores,
        })
    }
}

pub type ImageStages = Chain<Chain<LoadImages, ResizeImages>, ExtractPixels>;

/// The reference pipeline, configured from `settings`, scoring with `extractor`.
pub fn estimator<E: FeatureExtractor>(settings: &Settings, extractor: E) -> Estimator<ImageStages, E>
{
    PipelineBuilder::load_images(settings.image_folder())
        .resize_images(settings.image_width, settings.image_height)
        .extract_pixels(settings.channel_order, settings.mean, settings.scale)
        .score_model(extractor)
        .append_trainer(settings.trainer.clone())
}
