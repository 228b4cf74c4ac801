/// Pipeline configuration. One value of this type is built at startup and
/// handed to every stage constructor; nothing reads configuration globally.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classifier::MaximumEntropyOptions;
use crate::error::{Error, Result};
use crate::metrics::UnseenLabelPolicy;

pub const IMAGE_WIDTH: u32 = 224;
pub const IMAGE_HEIGHT: u32 = 224;
pub const MEAN: f32 = 117.;
pub const CHANNELS_LAST: bool = true;

pub const INPUT_NODE: &str = "input";
pub const OUTPUT_NODE: &str = "softmax2_pre_activation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    /// Height x width x channels, pixel colors interleaved.
    ChannelsLast,
    /// Channels x height x width, one plane per color.
    ChannelsFirst,
}

impl ChannelOrder {
    pub fn from_channels_last(channels_last: bool) -> Self {
        if channels_last { ChannelOrder::ChannelsLast } else { ChannelOrder::ChannelsFirst }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub image_width: u32,
    pub image_height: u32,
    pub mean: f32,
    pub scale: f32,
    pub channel_order: ChannelOrder,
    pub input_node: String,
    pub output_node: String,

    /// Root folder; the relative file names below are resolved against it.
    pub assets_folder: PathBuf,
    pub image_folder: PathBuf,
    pub model_file: PathBuf,
    pub training_file: PathBuf,
    pub testing_file: PathBuf,
    /// Classified after evaluation. Relative to the image folder, like manifest paths.
    pub sample_image: PathBuf,

    pub trainer: MaximumEntropyOptions,
    pub unseen_labels: UnseenLabelPolicy,
}

impl Default for Settings
{
    fn default() -> Self
    {
        Settings {
            image_width: IMAGE_WIDTH,
            image_height: IMAGE_HEIGHT,
            mean: MEAN,
            scale: 1.,
            channel_order: ChannelOrder::from_channels_last(CHANNELS_LAST),
            input_node: INPUT_NODE.to_string(),
            output_node: OUTPUT_NODE.to_string(),
            assets_folder: PathBuf::from("Assets"),
            image_folder: PathBuf::from("Training"),
            model_file: PathBuf::from("model.pb"),
            training_file: PathBuf::from("model.tsv"),
            testing_file: PathBuf::from("test.tsv"),
            sample_image: PathBuf::from("test.jpeg"),
            trainer: MaximumEntropyOptions::default(),
            unseen_labels: UnseenLabelPolicy::default(),
        }
    }
}

impl Settings
{
    /// Reads settings from a JSON file. Missing fields take their default value.
    pub fn from_json_file(path: &Path) -> Result<Self>
    {
        let file = std::fs::File::open(path)?;
        let settings: Settings = serde_json::from_reader(std::io::BufReader::new(file))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()>
    {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(Error::Config(format!(
                "image dimensions must be non-zero, got {}x{}", self.image_width, self.image_height)));
        }
        if !self.scale.is_finite() || self.scale == 0. {
            return Err(Error::Config(format!("pixel scale must be finite and non-zero, got {}", self.scale)));
        }
        if self.input_node.is_empty() || self.output_node.is_empty() {
            return Err(Error::Config("network node names must not be empty".to_string()));
        }
        self.trainer.validate()
    }

    pub fn image_folder(&self) -> PathBuf
    {
        self.assets_folder.join(&self.image_folder)
    }

    pub fn model_file(&self) -> PathBuf
    {
        self.assets_folder.join(&self.model_file)
    }

    pub fn training_file(&self) -> PathBuf
    {
        self.assets_folder.join(&self.training_file)
    }

    pub fn testing_file(&self) -> PathBuf
    {
        self.assets_folder.join(&self.testing_file)
    }
}
