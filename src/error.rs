//! Error types for the classification pipeline.
//!
//! All failures funnel into [`ClassifierError`]. The CLI collapses them into
//! two user-facing kinds (model initialization vs. inference), but the
//! library keeps enough structure to tell a snapshot problem from a bad
//! image or a tensor failure.

use thiserror::Error;

/// Errors that can occur while loading the model or classifying an image.
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// Error occurred while decoding an input image.
    #[error("image load")]
    ImageLoad(#[source] image::ImageError),

    /// Error occurred while reading or binding the weight snapshot.
    #[error("weight snapshot: {context}")]
    SnapshotLoad {
        /// Additional context about the failure.
        context: String,
        /// The underlying error.
        #[source]
        source: candle_core::Error,
    },

    /// Error occurred while assembling the network architecture.
    #[error("model assembly: {context}")]
    ModelBuild {
        /// Additional context about the failure.
        context: String,
        /// The underlying error.
        #[source]
        source: candle_core::Error,
    },

    /// Error occurred during the forward pass or post-processing.
    #[error("inference: {context}")]
    Inference {
        /// Additional context about the failure.
        context: String,
        /// The underlying error.
        #[source]
        source: candle_core::Error,
    },

    /// Error indicating invalid input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },

    /// Error from tensor operations without more specific context.
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),
}

impl ClassifierError {
    /// Creates a snapshot-loading error with context.
    pub fn snapshot_load(context: impl Into<String>, source: candle_core::Error) -> Self {
        ClassifierError::SnapshotLoad {
            context: context.into(),
            source,
        }
    }

    /// Creates a model-assembly error with context.
    pub fn model_build(context: impl Into<String>, source: candle_core::Error) -> Self {
        ClassifierError::ModelBuild {
            context: context.into(),
            source,
        }
    }

    /// Creates an inference error with context.
    pub fn inference(context: impl Into<String>, source: candle_core::Error) -> Self {
        ClassifierError::Inference {
            context: context.into(),
            source,
        }
    }

    /// Creates an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        ClassifierError::InvalidInput {
            message: message.into(),
        }
    }
}
