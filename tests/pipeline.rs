use std::path::Path;

use approx::assert_abs_diff_eq;
use deer_classifier::error::{Error, Result};
use deer_classifier::feature_extractor::{Embedding, FeatureExtractor};
use deer_classifier::manifest::{load_manifest, Sample};
use deer_classifier::metrics::{MulticlassMetrics, UnseenLabelPolicy};
use deer_classifier::pipeline::{self, PipelineBuilder};
use deer_classifier::preprocessing::PixelTensor;
use deer_classifier::report;
use deer_classifier::settings::{ChannelOrder, Settings};
use image::{Rgb, RgbImage};
use ndarray::{Array1, Axis};

/// Mean of every color channel. Stands in for the frozen network.
struct ChannelMeans
{
    input_shape: Vec<usize>,
}

impl ChannelMeans
{
    fn for_settings(settings: &Settings) -> Self
    {
        ChannelMeans { input_shape: vec![settings.image_height as usize, settings.image_width as usize, 3] }
    }
}

impl FeatureExtractor for ChannelMeans
{
    fn input_shape(&self) -> &[usize]
    {
        &self.input_shape
    }

    fn embedding_len(&self) -> usize
    {
        3
    }

    fn extract(&self, pixels: &PixelTensor) -> Result<Embedding>
    {
        let means: Vec<f32> = pixels.data().axis_iter(Axis(2)).map(|plane| plane.mean().unwrap_or(0.)).collect();
        Ok(Array1::from(means))
    }
}

/// Two classes of ten images each: reddish "doe" and bluish "buck" pictures of varying sizes.
fn write_dataset(assets: &Path) -> Settings
{
    let images = assets.join("Training");
    std::fs::create_dir_all(&images).unwrap();

    let mut training = String::new();
    for i in 0..10u32
    {
        let shade = 150 + (i as u8) * 10;
        let (width, height) = (32 + i * 7, 48 - i * 2);

        RgbImage::from_pixel(width, height, Rgb([shade, 30, 40])).save(images.join(format!("doe{}.png", i))).unwrap();
        RgbImage::from_pixel(height, width, Rgb([40, 30, shade])).save(images.join(format!("buck{}.png", i))).unwrap();
        training.push_str(&format!("doe{}.png\tdoe\nbuck{}.png\tbuck\n", i, i));
    }
    std::fs::write(assets.join("model.tsv"), training).unwrap();

    RgbImage::from_pixel(40, 40, Rgb([210, 20, 35])).save(images.join("doe_held_out.png")).unwrap();
    RgbImage::from_pixel(50, 20, Rgb([25, 45, 220])).save(images.join("buck_held_out.png")).unwrap();
    std::fs::write(assets.join("test.tsv"), "doe_held_out.png\tdoe\nbuck_held_out.png\tbuck\n").unwrap();

    RgbImage::from_pixel(64, 64, Rgb([230, 40, 30])).save(images.join("test.png")).unwrap();

    Settings {
        assets_folder: assets.to_path_buf(),
        image_width: 16,
        image_height: 16,
        sample_image: "test.png".into(),
        ..Settings::default()
    }
}

#[test]
fn trains_evaluates_and_classifies()
{
    let dir = tempfile::tempdir().unwrap();
    let settings = write_dataset(dir.path());

    let training = load_manifest(&settings.training_file()).unwrap();
    assert_eq!(training.len(), 20);

    let model = pipeline::estimator(&settings, ChannelMeans::for_settings(&settings))
        .fit(&training)
        .unwrap();

    let label_key = model.label_key().unwrap();
    assert_eq!(label_key.labels(), &["doe".to_string(), "buck".to_string()]);

    let testing = load_manifest(&settings.testing_file()).unwrap();
    let predictions = model.transform(&testing).unwrap();
    assert_eq!(predictions.len(), 2);
    assert_eq!(predictions[0].predicted_label, "doe");
    assert_eq!(predictions[1].predicted_label, "buck");
    for prediction in &predictions
    {
        assert_eq!(prediction.scores.len(), 2);
        assert_abs_diff_eq!(prediction.scores.iter().sum::<f32>(), 1., epsilon = 1e-5);
    }

    let metrics = MulticlassMetrics::evaluate(label_key, &predictions, UnseenLabelPolicy::Error).unwrap();
    assert_eq!(metrics.micro_accuracy, 1.);
    assert!(metrics.log_loss < 2f64.ln());
    assert_eq!(metrics.per_class_log_loss.len(), 2);

    let single = model.predict(&Sample::unlabeled(settings.sample_image.clone())).unwrap();
    assert_eq!(single.predicted_label, "doe");
    assert!(report::prediction_line(&single).starts_with("Image: test.png predicted as: doe with score: "));

    // Same model, same image, same answer.
    assert_eq!(model.predict(&Sample::unlabeled("test.png")).unwrap(), single);
}

#[test]
fn builder_accepts_custom_stage_settings()
{
    let dir = tempfile::tempdir().unwrap();
    let settings = write_dataset(dir.path());
    let extractor = ChannelMeans { input_shape: vec![3, 8, 8] };

    let model = PipelineBuilder::load_images(settings.image_folder())
        .resize_images(8, 8)
        .extract_pixels(ChannelOrder::ChannelsFirst, 0., 1. / 255.)
        .score_model(ChannelsFirstMeans(extractor))
        .append_trainer(settings.trainer.clone())
        .fit(&load_manifest(&settings.training_file()).unwrap())
        .unwrap();

    let prediction = model.predict(&Sample::unlabeled("buck_held_out.png")).unwrap();
    assert_eq!(prediction.predicted_label, "buck");
}

/// Channel means for channels-first tensors.
struct ChannelsFirstMeans(ChannelMeans);

impl FeatureExtractor for ChannelsFirstMeans
{
    fn input_shape(&self) -> &[usize]
    {
        self.0.input_shape()
    }

    fn embedding_len(&self) -> usize
    {
        3
    }

    fn extract(&self, pixels: &PixelTensor) -> Result<Embedding>
    {
        let means: Vec<f32> = pixels.data().axis_iter(Axis(0)).map(|plane| plane.mean().unwrap_or(0.)).collect();
        Ok(Array1::from(means))
    }
}

#[test]
fn missing_training_image_fails_the_fit()
{
    let dir = tempfile::tempdir().unwrap();
    let settings = write_dataset(dir.path());

    let mut training = load_manifest(&settings.training_file()).unwrap();
    training.push(Sample::new("not_there.png", Some("doe")));

    let result = pipeline::estimator(&settings, ChannelMeans::for_settings(&settings)).fit(&training);
    match result
    {
        Err(Error::Image { path, .. }) => assert!(path.ends_with("not_there.png")),
        Err(e) => panic!("expected an image error, got {:?}", e),
        Ok(_) => panic!("expected an image error, got a model"),
    }
}

#[test]
fn image_size_mismatch_with_the_network_is_a_shape_error()
{
    let dir = tempfile::tempdir().unwrap();
    let settings = write_dataset(dir.path());
    let extractor = ChannelMeans { input_shape: vec![224, 224, 3] };

    let result = pipeline::estimator(&settings, extractor).fit(&load_manifest(&settings.training_file()).unwrap());
    assert!(matches!(result, Err(Error::Shape { .. })));
}

#[test]
fn unseen_test_labels_follow_the_policy()
{
    let dir = tempfile::tempdir().unwrap();
    let settings = write_dataset(dir.path());
    let model = pipeline::estimator(&settings, ChannelMeans::for_settings(&settings))
        .fit(&load_manifest(&settings.training_file()).unwrap())
        .unwrap();

    let testing = vec![
        Sample::new("doe_held_out.png", Some("doe")),
        Sample::new("buck_held_out.png", Some("moose")),
    ];
    let predictions = model.transform(&testing).unwrap();
    let label_key = model.label_key().unwrap();

    assert!(matches!(
        MulticlassMetrics::evaluate(label_key, &predictions, UnseenLabelPolicy::Error),
        Err(Error::Metric(_))));

    let metrics = MulticlassMetrics::evaluate(label_key, &predictions, UnseenLabelPolicy::Exclude).unwrap();
    assert_eq!((metrics.evaluated, metrics.excluded), (1, 1));
}

#[test]
fn malformed_training_manifest_stops_loading()
{
    let dir = tempfile::tempdir().unwrap();
    let settings = write_dataset(dir.path());
    std::fs::write(settings.training_file(), "doe0.png\tdoe\nbuck0.png\n").unwrap();

    assert!(matches!(load_manifest(&settings.training_file()), Err(Error::Parse { line: 2, .. })));
}
