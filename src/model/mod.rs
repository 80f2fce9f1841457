//! Model assembly.
//!
//! [`PlantDiseaseModel`] composes the pretrained feature extractor with the
//! projector and classifier heads under the parameter-name scopes the weight
//! snapshot uses (`base.features`, `feature_projector`, `classifier`).
//! Construction order is fixed so the name layout stays reproducible.

mod backbone;
mod head;
mod weights;

pub use backbone::{EfficientNetFeatures, OUT_CHANNELS, TOP_LEVEL_BLOCKS};
pub use head::{ClassifierHead, FeatureProjector};
pub use weights::load_snapshot;

use std::ops::Range;

use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;
use tracing::debug;

use crate::error::ClassifierError;
use crate::labels;

const PROJECTED_FEATURES: usize = 512;
const CLASSIFIER_HIDDEN: usize = 256;

/// Architecture parameters.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Number of output classes.
    pub num_classes: usize,
    /// How many trailing top-level extractor blocks stay trainable.
    pub unfreeze_blocks: usize,
    /// Dropout probability of the classifier stage; the projector stage uses
    /// half of it.
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_classes: labels::NUM_CLASSES,
            unfreeze_blocks: 4,
            dropout: 0.3,
        }
    }
}

/// Which top-level extractor blocks are trainable.
///
/// The baseline freezes the whole extractor; the last `unfreeze_blocks`
/// blocks are then re-enabled, addressed by explicit index over the
/// [`TOP_LEVEL_BLOCKS`] enumeration. Values larger than the block count
/// clamp to "all blocks". The heads are always fully trainable; this policy
/// concerns the extractor only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FineTunePolicy {
    trainable: Range<usize>,
}

impl FineTunePolicy {
    fn new(total_blocks: usize, unfreeze_blocks: usize) -> Self {
        let start = total_blocks.saturating_sub(unfreeze_blocks);
        Self {
            trainable: start..total_blocks,
        }
    }

    /// Whether the top-level block at `index` is trainable.
    pub fn is_trainable(&self, index: usize) -> bool {
        self.trainable.contains(&index)
    }

    /// Index range of the trainable trailing blocks.
    pub fn trainable_blocks(&self) -> Range<usize> {
        self.trainable.clone()
    }

    /// Index range of the frozen leading blocks.
    pub fn frozen_blocks(&self) -> Range<usize> {
        0..self.trainable.start
    }
}

/// The assembled classification network.
///
/// Forward pass: `logits = classifier(projector(features(input)))`. Raw
/// logits are returned; softmax happens at the call site.
#[derive(Debug, Clone)]
pub struct PlantDiseaseModel {
    features: EfficientNetFeatures,
    projector: FeatureProjector,
    classifier: ClassifierHead,
    policy: FineTunePolicy,
    num_classes: usize,
}

impl PlantDiseaseModel {
    /// Assembles the network, binding parameters by name from `vb`.
    ///
    /// Over a snapshot-backed builder this loads the persisted weights; over
    /// a fresh `VarMap` it produces the original initialization scheme
    /// (pretrained-shape extractor, Kaiming heads with zero biases).
    pub fn load(config: &ModelConfig, vb: VarBuilder) -> std::result::Result<Self, ClassifierError> {
        let features = EfficientNetFeatures::load(vb.pp("base").pp("features"))
            .map_err(|e| ClassifierError::model_build("feature extractor", e))?;

        let policy = FineTunePolicy::new(TOP_LEVEL_BLOCKS, config.unfreeze_blocks);
        debug!(
            frozen = ?policy.frozen_blocks(),
            trainable = ?policy.trainable_blocks(),
            "fine-tune policy over extractor blocks"
        );

        let projector = FeatureProjector::load(
            OUT_CHANNELS,
            PROJECTED_FEATURES,
            config.dropout / 2.0,
            vb.pp("feature_projector"),
        )
        .map_err(|e| ClassifierError::model_build("feature projector", e))?;

        let classifier = ClassifierHead::load(
            PROJECTED_FEATURES,
            CLASSIFIER_HIDDEN,
            config.num_classes,
            config.dropout,
            vb.pp("classifier"),
        )
        .map_err(|e| ClassifierError::model_build("classifier head", e))?;

        Ok(Self {
            features,
            projector,
            classifier,
            policy,
            num_classes: config.num_classes,
        })
    }

    /// The fine-tune policy computed at assembly time.
    pub fn fine_tune_policy(&self) -> &FineTunePolicy {
        &self.policy
    }

    /// Number of classes the final layer predicts over.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl Module for PlantDiseaseModel {
    /// Maps `(B, 3, H, W)` pixels to `(B, num_classes)` logits.
    fn forward(&self, images: &Tensor) -> Result<Tensor> {
        let features = self.features.forward(images)?;
        let embedding = self.projector.forward(&features)?;
        self.classifier.forward(&embedding)
    }
}
