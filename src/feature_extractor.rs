use std::path::Path;

use log::info;
use ndarray::Array1;
use tract_tensorflow::prelude::*;

use crate::error::{Error, Result};
use crate::pipeline::Transform;
use crate::preprocessing::{PixelTensor, CHANNELS};
use crate::settings::{ChannelOrder, Settings};

/// Output of the frozen network for one image.
pub type Embedding = Array1<f32>;

/// A frozen network mapping one pixel tensor to one embedding.
/// Implementations never update their weights.
pub trait FeatureExtractor
{
    /// Shape of one image as the network expects it, without the batch dimension.
    fn input_shape(&self) -> &[usize];

    /// Width of the layer the embeddings are read from.
    fn embedding_len(&self) -> usize;

    fn extract(&self, pixels: &PixelTensor) -> Result<Embedding>;
}

/// Frozen TensorFlow graph, scored up to a named intermediate layer.
///
/// The graph is read once, its input is pinned to a single image of the configured
/// size (a batch of one) and it is optimized into a plan that lives as long as the model.
pub struct TensorflowModel
{
    plan: TypedRunnableModel<TypedModel>,
    input_shape: Vec<usize>,
    embedding_len: usize,
}

impl TensorflowModel
{
    pub fn load(path: &Path, settings: &Settings) -> Result<Self>
    {
        if !path.is_file() {
            return Err(Error::ModelLoad { path: path.to_path_buf(), reason: "file not found".to_string() });
        }

        let (height, width) = (settings.image_height as usize, settings.image_width as usize);
        let input_shape = match settings.channel_order
        {
            ChannelOrder::ChannelsLast => vec![height, width, CHANNELS],
            ChannelOrder::ChannelsFirst => vec![CHANNELS, height, width],
        };

        let now = std::time::Instant::now();
        let model_load_error = |e: TractError| Error::ModelLoad { path: path.to_path_buf(), reason: format!("{:#}", e) };

        let model = Self::optimized_model(path, &settings.input_node, &settings.output_node, &batched(&input_shape))
            .map_err(model_load_error)?;

        let output_fact = model.output_fact(0).map_err(model_load_error)?;
        let embedding_len = match output_fact.shape.as_concrete()
        {
            Some(dims) => dims.iter().product(),
            None => return Err(Error::ModelLoad {
                path: path.to_path_buf(),
                reason: format!("output {:?} has no concrete shape", settings.output_node),
            }),
        };

        let plan = model.into_runnable().map_err(model_load_error)?;

        info!("Loaded {:?} in {:?}; {:?} -> {:?} ({} features)",
            path, now.elapsed(), settings.input_node, settings.output_node, embedding_len);

        Ok(TensorflowModel { plan, input_shape, embedding_len })
    }

    fn optimized_model(path: &Path, input_node: &str, output_node: &str, input_shape: &[usize]) -> TractResult<TypedModel>
    {
        tract_tensorflow::tensorflow()
            .model_for_path(path)?
            .with_input_names([input_node])?
            .with_output_names([output_node])?
            .with_input_fact(0, f32::fact(input_shape.to_vec()).into())?
            .into_optimized()
    }
}

impl FeatureExtractor for TensorflowModel
{
    fn input_shape(&self) -> &[usize]
    {
        &self.input_shape
    }

    fn embedding_len(&self) -> usize
    {
        self.embedding_len
    }

    fn extract(&self, pixels: &PixelTensor) -> Result<Embedding>
    {
        let inference_error = |e: TractError| Error::Inference(format!("{:#}", e));

        let input = Tensor::from_shape(&batched(pixels.shape()), &pixels.to_vec()).map_err(inference_error)?;
        let outputs = self.plan.run(tvec!(input.into())).map_err(inference_error)?;

        // One image in, so the single output row is the embedding.
        let values = outputs[0].as_slice::<f32>().map_err(inference_error)?;
        Ok(Array1::from(values.to_vec()))
    }
}

/// Scoring stage of the pipeline. Guards the shape contract on both sides of the network.
pub struct ScoreModel<E>
{
    extractor: E,
}

impl<E: FeatureExtractor> ScoreModel<E>
{
    pub fn new(extractor: E) -> Self
    {
        ScoreModel { extractor }
    }

    pub fn extractor(&self) -> &E
    {
        &self.extractor
    }
}

impl<E: FeatureExtractor> Transform for ScoreModel<E>
{
    type Input = PixelTensor;
    type Output = Embedding;

    fn transform(&self, pixels: &PixelTensor) -> Result<Embedding>
    {
        if pixels.shape() != self.extractor.input_shape() {
            return Err(Error::Shape {
                expected: self.extractor.input_shape().to_vec(),
                actual: pixels.shape().to_vec(),
            });
        }

        let embedding = self.extractor.extract(pixels)?;
        if embedding.len() != self.extractor.embedding_len() {
            return Err(Error::Shape {
                expected: vec![self.extractor.embedding_len()],
                actual: vec![embedding.len()],
            });
        }

        Ok(embedding)
    }
}

/// Prepends the batch dimension of a single image.
fn batched(shape: &[usize]) -> Vec<usize>
{
    std::iter::once(1).chain(shape.iter().copied()).collect()
}

#[cfg(test)]
mod tests
{
    use ndarray::Array3;
    use tract_tensorflow::tfpb;
    use tract_tensorflow::tfpb::tensorflow::{DataType, TensorProto};

    use super::*;

    /// Sums each channel; stands in for a network in tests.
    struct ChannelSums
    {
        input_shape: Vec<usize>,
        reported_len: usize,
    }

    impl FeatureExtractor for ChannelSums
    {
        fn input_shape(&self) -> &[usize]
        {
            &self.input_shape
        }

        fn embedding_len(&self) -> usize
        {
            self.reported_len
        }

        fn extract(&self, pixels: &PixelTensor) -> Result<Embedding>
        {
            let data = pixels.data();
            Ok(Array1::from_shape_fn(CHANNELS, |c| data.index_axis(ndarray::Axis(2), c).sum()))
        }
    }

    fn tensor(height: usize, width: usize) -> PixelTensor
    {
        PixelTensor::new(Array3::from_elem((height, width, CHANNELS), 1.), ChannelOrder::ChannelsLast)
    }

    #[test]
    fn batch_dimension_is_prepended()
    {
        assert_eq!(batched(&[224, 224, 3]), vec![1, 224, 224, 3]);
    }

    #[test]
    fn scores_matching_tensors()
    {
        let stage = ScoreModel::new(ChannelSums { input_shape: vec![2, 2, 3], reported_len: 3 });
        let embedding = stage.transform(&tensor(2, 2)).unwrap();
        assert_eq!(embedding.to_vec(), vec![4., 4., 4.]);
    }

    #[test]
    fn rejects_tensors_of_the_wrong_size()
    {
        let stage = ScoreModel::new(ChannelSums { input_shape: vec![224, 224, 3], reported_len: 3 });
        match stage.transform(&tensor(10, 10))
        {
            Err(Error::Shape { expected, actual }) => {
                assert_eq!(expected, vec![224, 224, 3]);
                assert_eq!(actual, vec![10, 10, 3]);
            },
            other => panic!("expected a shape error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_embeddings_of_the_wrong_width()
    {
        let stage = ScoreModel::new(ChannelSums { input_shape: vec![2, 2, 3], reported_len: 1024 });
        assert!(matches!(stage.transform(&tensor(2, 2)), Err(Error::Shape { .. })));
    }

    /// Mean of every channel of a batch of one image, read from the reference node names.
    fn write_channel_means_graph(path: &Path)
    {
        let input = tfpb::node().op("Placeholder").name("input").attr("dtype", DataType::DtFloat);
        let axes = tfpb::node()
            .op("Const")
            .name("axes")
            .attr("dtype", DataType::DtInt32)
            .attr("value", TensorProto::try_from(&tensor1(&[1i32, 2])).unwrap());
        let mean = tfpb::node()
            .op("Mean")
            .name("softmax2_pre_activation")
            .attr("T", DataType::DtFloat)
            .attr("Tidx", DataType::DtInt32)
            .attr("keep_dims", false)
            .input("input")
            .input("axes");
        tfpb::graph().node(input).node(axes).node(mean).save_to(path).unwrap();
    }

    fn small_image_settings() -> Settings
    {
        Settings { image_width: 4, image_height: 2, ..Settings::default() }
    }

    #[test]
    fn frozen_graph_is_scored_up_to_the_output_node()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.pb");
        write_channel_means_graph(&path);

        let model = TensorflowModel::load(&path, &small_image_settings()).unwrap();
        assert_eq!(model.input_shape(), &[2, 4, 3]);
        assert_eq!(model.embedding_len(), 3);

        let pixels = PixelTensor::new(
            Array3::from_shape_fn((2, 4, CHANNELS), |(_, _, c)| c as f32 * 10.),
            ChannelOrder::ChannelsLast);
        let stage = ScoreModel::new(model);
        assert_eq!(stage.transform(&pixels).unwrap().to_vec(), vec![0., 10., 20.]);

        // The plan is built once and reused.
        assert_eq!(stage.transform(&pixels).unwrap().to_vec(), vec![0., 10., 20.]);
    }

    #[test]
    fn unknown_output_node_is_a_model_load_error()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.pb");
        write_channel_means_graph(&path);

        let settings = Settings { output_node: "avgpool0".to_string(), ..small_image_settings() };
        match TensorflowModel::load(&path, &settings)
        {
            Err(Error::ModelLoad { path: reported, .. }) => assert_eq!(reported, path),
            Err(e) => panic!("expected a model load error, got {:?}", e),
            Ok(_) => panic!("expected a model load error, got a model"),
        }
    }

    #[test]
    fn missing_artifact_is_a_model_load_error()
    {
        let dir = tempfile::tempdir().unwrap();
        let result = TensorflowModel::load(&dir.path().join("model.pb"), &Settings::default());
        assert!(matches!(result, Err(Error::ModelLoad { .. })));
    }

    #[test]
    fn malformed_artifact_is_a_model_load_error()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.pb");
        std::fs::write(&path, b"\x00\x01 definitely not a graph").unwrap();
        let result = TensorflowModel::load(&path, &Settings::default());
        assert!(matches!(result, Err(Error::ModelLoad { .. })));
    }
}
