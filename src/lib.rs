//! # leafscan
//!
//! Single-image plant-disease classification: load a trained snapshot of an
//! EfficientNet-B0 backbone with a custom projector/classifier head, run one
//! image through the fixed preprocessing transform, and report the top class
//! with its softmax confidence.
//!
//! The crate backs a one-shot CLI (`leafscan <image_path>`) whose stdout
//! carries exactly one JSON result record; all diagnostics and error records
//! go to stderr.
//!
//! ## Modules
//!
//! * [`labels`] - the fixed, ordered 38-entry class table
//! * [`preprocess`] - resize + ImageNet normalization into input tensors
//! * [`model`] - architecture assembly and weight-snapshot binding
//! * [`predictor`] - one-shot image to [`Prediction`] driver
//! * [`error`] - [`ClassifierError`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use leafscan::{DEFAULT_WEIGHTS_PATH, PlantDiseasePredictor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let predictor = PlantDiseasePredictor::from_snapshot(DEFAULT_WEIGHTS_PATH)?;
//! let prediction = predictor.predict_path("leaf.jpg")?;
//! println!("{} ({:.1}%)", prediction.class_name, prediction.confidence * 100.0);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod labels;
pub mod model;
pub mod predictor;
pub mod preprocess;

pub use error::ClassifierError;
pub use model::{FineTunePolicy, ModelConfig, PlantDiseaseModel};
pub use predictor::{DEFAULT_WEIGHTS_PATH, PlantDiseasePredictor, Prediction};
pub use preprocess::ImageTransform;

/// Initializes the tracing subscriber for diagnostics.
///
/// Events write to stderr so stdout stays reserved for the result record.
/// The default level is `info`; `RUST_LOG` overrides it.
pub fn init_tracing() {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
