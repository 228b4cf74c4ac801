/// Image stages of the pipeline: decoding, resizing and pixel extraction.
/// All of them are stateless; nothing is fitted here.

use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage};
use ndarray::Array3;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::error::{Error, Result};
use crate::manifest::Sample;
use crate::pipeline::Transform;
use crate::settings::ChannelOrder;

pub const CHANNELS: usize = 3;

/// Decoded pixels of one image, ready for the network.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelTensor
{
    data: Array3<f32>,
    order: ChannelOrder,
}

impl PixelTensor
{
    pub fn new(data: Array3<f32>, order: ChannelOrder) -> Self
    {
        PixelTensor { data, order }
    }

    pub fn shape(&self) -> &[usize]
    {
        self.data.shape()
    }

    pub fn channel_order(&self) -> ChannelOrder
    {
        self.order
    }

    pub fn height(&self) -> usize
    {
        match self.order
        {
            ChannelOrder::ChannelsLast => self.data.shape()[0],
            ChannelOrder::ChannelsFirst => self.data.shape()[1],
        }
    }

    pub fn width(&self) -> usize
    {
        match self.order
        {
            ChannelOrder::ChannelsLast => self.data.shape()[1],
            ChannelOrder::ChannelsFirst => self.data.shape()[2],
        }
    }

    pub fn data(&self) -> &Array3<f32>
    {
        &self.data
    }

    /// Values in logical (row-major) order of the tensor's shape.
    pub fn to_vec(&self) -> Vec<f32>
    {
        self.data.iter().copied().collect()
    }
}

/// Resolves the sample's path against the image folder and decodes it.
#[derive(Debug, Clone)]
pub struct LoadImages
{
    image_folder: PathBuf,
}

impl LoadImages
{
    pub fn new(image_folder: impl Into<PathBuf>) -> Self
    {
        LoadImages { image_folder: image_folder.into() }
    }

    /// Absolute paths are kept; relative ones are taken from the image folder.
    pub fn resolve(&self, image_path: &Path) -> PathBuf
    {
        if image_path.is_absolute() {
            image_path.to_path_buf()
        } else {
            self.image_folder.join(image_path)
        }
    }
}

impl Transform for LoadImages
{
    type Input = Sample;
    type Output = DynamicImage;

    fn transform(&self, sample: &Sample) -> Result<DynamicImage>
    {
        let path = self.resolve(&sample.image_path);
        image::open(&path).map_err(|source| Error::Image { path, source })
    }
}

#[derive(Debug, Clone)]
pub struct ResizeImages
{
    width: u32,
    height: u32,
    filter: FilterType,
}

impl ResizeImages
{
    pub fn new(width: u32, height: u32) -> Self
    {
        ResizeImages { width, height, filter: FilterType::CatmullRom }
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self
    {
        self.filter = filter;
        self
    }
}

impl Transform for ResizeImages
{
    type Input = DynamicImage;
    type Output = DynamicImage;

    fn transform(&self, image: &DynamicImage) -> Result<DynamicImage>
    {
        // The aspect ratio is not kept; the network needs exactly width x height.
        Ok(image.resize_exact(self.width, self.height, self.filter))
    }
}

/// Converts an RGB image into a float tensor, computing `(value - offset) * scale`.
#[derive(Debug, Clone)]
pub struct ExtractPixels
{
    order: ChannelOrder,
    offset: f32,
    scale: f32,
}

impl ExtractPixels
{
    pub fn new(order: ChannelOrder, offset: f32) -> Self
    {
        ExtractPixels { order, offset, scale: 1. }
    }

    pub fn with_scale(mut self, scale: f32) -> Self
    {
        self.scale = scale;
        self
    }
}

impl Transform for ExtractPixels
{
    type Input = DynamicImage;
    type Output = PixelTensor;

    fn transform(&self, image: &DynamicImage) -> Result<PixelTensor>
    {
        let rgb = image.to_rgb8();
        let (width, height) = (rgb.width() as usize, rgb.height() as usize);
        let value = |x: usize, y: usize, c: usize| (rgb.get_pixel(x as u32, y as u32)[c] as f32 - self.offset) * self.scale;

        let data = match self.order
        {
            ChannelOrder::ChannelsLast => Array3::from_shape_fn((height, width, CHANNELS), |(y, x, c)| value(x, y, c)),
            ChannelOrder::ChannelsFirst => Array3::from_shape_fn((CHANNELS, height, width), |(c, y, x)| value(x, y, c)),
        };

        Ok(PixelTensor::new(data, self.order))
    }
}

/// Runs `stage` over every sample in parallel. The results keep the order of `samples`.
pub fn transform_batch<T>(stage: &T, samples: &[Sample]) -> Vec<Result<T::Output>>
where
    T: Transform<Input = Sample> + Sync,
    T::Output: Send,
{
    samples.par_iter().map(|sample| stage.transform(sample)).collect()
}
