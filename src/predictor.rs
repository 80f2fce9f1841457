//! One-shot image classification.
//!
//! [`PlantDiseasePredictor`] owns the loaded model and the preprocessing
//! transform. It is built once per process from the weight snapshot and then
//! serves exactly one (or more, if the caller insists) `predict` call;
//! everything about it is read-only after construction.

use std::path::Path;

use candle_core::{D, Device, IndexOp, Module};
use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ClassifierError;
use crate::labels;
use crate::model::{ModelConfig, PlantDiseaseModel, load_snapshot};
use crate::preprocess::ImageTransform;

/// Relative path the weight snapshot is expected at.
pub const DEFAULT_WEIGHTS_PATH: &str = "models/best_model4.pth";

/// Top prediction for one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Ordinal class index in the label table.
    pub class_number: usize,
    /// Human-readable label at that ordinal.
    pub class_name: &'static str,
    /// Softmax probability of the predicted class.
    pub confidence: f32,
}

/// Index and value of the first maximum in `probabilities`.
///
/// Ties resolve to the lowest index, which keeps repeated runs on identical
/// input deterministic.
fn top_class(probabilities: &[f32]) -> (usize, f32) {
    let mut best_index = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (index, &value) in probabilities.iter().enumerate() {
        if value > best_value {
            best_index = index;
            best_value = value;
        }
    }
    (best_index, best_value)
}

/// Loaded model plus the deterministic input transform.
#[derive(Debug)]
pub struct PlantDiseasePredictor {
    model: PlantDiseaseModel,
    transform: ImageTransform,
    device: Device,
}

impl PlantDiseasePredictor {
    /// Builds the architecture and binds the weight snapshot at `path`.
    ///
    /// This is the heavyweight startup step; callers should validate their
    /// input before paying for it. Any failure here (missing file, unreadable
    /// pickle, missing or misshaped parameter) is fatal for the invocation.
    pub fn from_snapshot(path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let device = Device::Cpu;

        info!(snapshot = %path.display(), "loading model and weights");
        let vb = load_snapshot(path, &device)?;
        let model = PlantDiseaseModel::load(&ModelConfig::default(), vb)?;
        info!("model loaded successfully");

        Ok(Self {
            model,
            transform: ImageTransform::default(),
            device,
        })
    }

    /// Classifies the image file at `path`.
    ///
    /// The image is decoded and flattened to 8-bit RGB whatever the source
    /// format; decode failures surface as [`ClassifierError::ImageLoad`].
    pub fn predict_path(&self, path: impl AsRef<Path>) -> Result<Prediction, ClassifierError> {
        let image = image::open(path.as_ref())
            .map_err(ClassifierError::ImageLoad)?
            .to_rgb8();
        self.predict_image(&image)
    }

    /// Classifies an already-decoded RGB image.
    ///
    /// Runs the fixed transform, a forward pass in inference mode (no
    /// gradient graph is built for plain tensor ops), softmax over the
    /// logits, and first-maximum selection.
    pub fn predict_image(&self, image: &RgbImage) -> Result<Prediction, ClassifierError> {
        let input = self.transform.apply(image, &self.device)?;

        let logits = self
            .model
            .forward(&input)
            .map_err(|e| ClassifierError::inference("forward pass", e))?;
        let probabilities = candle_nn::ops::softmax(&logits, D::Minus1)
            .and_then(|p| p.i(0))
            .and_then(|p| p.to_vec1::<f32>())
            .map_err(|e| ClassifierError::inference("softmax", e))?;

        let (class_number, confidence) = top_class(&probabilities);
        let class_name = labels::class_name(class_number).ok_or_else(|| {
            ClassifierError::invalid_input(format!(
                "class index {class_number} outside the {}-entry label table",
                labels::NUM_CLASSES
            ))
        })?;
        debug!(class_number, class_name, confidence, "classified image");

        Ok(Prediction {
            class_number,
            class_name,
            confidence,
        })
    }
}
