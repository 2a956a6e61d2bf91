// src/inference.rs

use crate::config::ModelConfig;
use crate::types::Frame;
use anyhow::Result;

/// Scores one frame with the probability that it shows violence.
pub trait Classifier {
    fn score(&mut self, frame: &Frame) -> Result<f32>;
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn score(&mut self, frame: &Frame) -> Result<f32> {
        (**self).score(frame)
    }
}

/// Build the classifier described by the model section. Any failure here
/// aborts startup.
pub fn load_classifier(config: &ModelConfig) -> Result<Box<dyn Classifier + Send>> {
    #[cfg(feature = "onnx")]
    {
        Ok(Box::new(onnx::OnnxClassifier::new(config)?))
    }

    #[cfg(not(feature = "onnx"))]
    {
        anyhow::bail!(
            "cannot load {}: built without the `onnx` feature",
            config.path
        )
    }
}

#[cfg(feature = "onnx")]
pub mod onnx {
    use super::Classifier;
    use crate::config::ModelConfig;
    use crate::preprocessing::preprocess;
    use crate::types::Frame;
    use anyhow::{Context, Result};
    use ndarray::Array4;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use tracing::{debug, info};

    /// MobileNetV2 binary head exported to ONNX, single sigmoid output.
    pub struct OnnxClassifier {
        session: Session,
        input_size: usize,
    }

    impl OnnxClassifier {
        pub fn new(config: &ModelConfig) -> Result<Self> {
            info!("Initializing inference engine");
            info!("Model path: {}", config.path);

            if !std::path::Path::new(&config.path).is_file() {
                anyhow::bail!("model file {} not found", config.path);
            }

            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(config.num_threads.max(1))?
                .with_inter_threads(1)?
                .commit_from_file(&config.path)
                .context("Failed to load model")?;

            info!("✓ Inference engine initialized successfully");

            Ok(Self {
                session,
                input_size: config.input_size,
            })
        }
    }

    impl Classifier for OnnxClassifier {
        fn score(&mut self, frame: &Frame) -> Result<f32> {
            let input = preprocess(frame, self.input_size)?;
            let tensor = Array4::from_shape_vec((1, self.input_size, self.input_size, 3), input)
                .context("input tensor shape mismatch")?;

            let input_value = ort::value::Value::from_array(tensor)?;
            let outputs = self.session.run(ort::inputs![input_value])?;

            let (_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
            let probability = *data.first().context("model produced an empty output")?;

            debug!("Frame {} scored {:.4}", frame.index, probability);
            Ok(probability)
        }
    }
}
