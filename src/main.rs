use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use deer_classifier::feature_extractor::TensorflowModel;
use deer_classifier::manifest::{self, Sample};
use deer_classifier::metrics::{MulticlassMetrics, UnseenLabelPolicy};
use deer_classifier::pipeline::{self, ImageStages, TrainedModel};
use deer_classifier::report;
use deer_classifier::settings::Settings;
use log::{error, info, LevelFilter};

#[cfg(debug_assertions)]
const LOG_LEVEL: LevelFilter = LevelFilter::Debug;
#[cfg(not(debug_assertions))]
const LOG_LEVEL: LevelFilter = LevelFilter::Info;

type Model = TrainedModel<ImageStages, TensorflowModel>;

/// Fine-tunes a classifier on top of a frozen TensorFlow network, evaluates it
/// on a held-out manifest and classifies one sample image.
#[derive(Parser, Debug)]
#[command(name = "deer-classifier", version)]
struct Cli
{
    /// JSON settings file; fields it omits keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Folder holding the model, the manifests and the image folder.
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Frozen TensorFlow graph, relative to the assets folder.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Training manifest, relative to the assets folder.
    #[arg(long)]
    train: Option<PathBuf>,

    /// Testing manifest, relative to the assets folder.
    #[arg(long)]
    test: Option<PathBuf>,

    /// Image to classify once the model is trained, relative to the image folder.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Leave test samples with labels unseen during training out of the metrics
    /// instead of failing.
    #[arg(long)]
    exclude_unseen_labels: bool,
}

impl Cli
{
    fn settings(&self) -> anyhow::Result<Settings>
    {
        let mut settings = match &self.config
        {
            Some(path) => Settings::from_json_file(path).with_context(|| format!("Unable to read settings from {:?}", path))?,
            None => Settings::default(),
        };

        if let Some(assets) = &self.assets {
            settings.assets_folder = assets.clone();
        }
        if let Some(model) = &self.model {
            settings.model_file = model.clone();
        }
        if let Some(train) = &self.train {
            settings.training_file = train.clone();
        }
        if let Some(test) = &self.test {
            settings.testing_file = test.clone();
        }
        if let Some(image) = &self.image {
            settings.sample_image = image.clone();
        }
        if self.exclude_unseen_labels {
            settings.unseen_labels = UnseenLabelPolicy::Exclude;
        }

        settings.validate()?;
        Ok(settings)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::new()
        .filter_level(LOG_LEVEL)
        .parse_default_env()
        .init();

    // Every failure is reported here, once.
    match run(&Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()>
{
    let settings = cli.settings()?;

    info!("Application Started");
    // Without a model there is nothing to classify with; stop here.
    let model = generate_model(&settings).context("Error generating model")?;

    classify_image(&settings, &model)
}

/// Fits the pipeline on the training manifest, then predicts and evaluates the testing manifest.
fn generate_model(settings: &Settings) -> anyhow::Result<Model>
{
    let model_file = settings.model_file();
    let network = TensorflowModel::load(&model_file, settings)?;
    let estimator = pipeline::estimator(settings, network);

    let training_file = settings.training_file();
    let training = manifest::load_manifest(&training_file)
        .with_context(|| format!("Unable to load the training manifest {:?}", training_file))?;
    info!("Loaded {} samples from training file {:?}", training.len(), training_file);

    let now = std::time::Instant::now();
    let model = estimator.fit(&training)?;
    info!("Training took {:?}", now.elapsed());

    let testing_file = settings.testing_file();
    let testing = manifest::load_manifest(&testing_file)
        .with_context(|| format!("Unable to load the testing manifest {:?}", testing_file))?;
    let predictions = model.transform(&testing)?;
    report::print_predictions(&predictions);

    let metrics = MulticlassMetrics::evaluate(model.label_key()?, &predictions, settings.unseen_labels)?;
    if metrics.excluded > 0 {
        info!("{} test samples were left out of the metrics", metrics.excluded);
    }
    report::print_metrics(&metrics);

    Ok(model)
}

fn classify_image(settings: &Settings, model: &Model) -> anyhow::Result<()>
{
    let sample = Sample::unlabeled(settings.sample_image.clone());
    let prediction = model.predict(&sample)
        .with_context(|| format!("Unable to classify {:?}", sample.image_path))?;
    println!("{}", report::prediction_line(&prediction));
    Ok(())
}
