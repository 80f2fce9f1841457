//! Command-line entry point.
//!
//! `leafscan <image_path>` prints exactly one JSON object per invocation:
//! the prediction on stdout (exit 0) or `{"error": ...}` on stderr (exit 1).
//! Stream separation is a contract for callers that capture stdout only.

use std::env;
use std::io::Write;
use std::process::ExitCode;

use tracing::error;

use leafscan::{DEFAULT_WEIGHTS_PATH, PlantDiseasePredictor, Prediction, init_tracing};

fn main() -> ExitCode {
    init_tracing();

    // Validate the invocation before paying the model-load cost; arguments
    // beyond the image path are ignored.
    let Some(image_path) = env::args_os().nth(1) else {
        report_failure("No image path provided.");
        return ExitCode::FAILURE;
    };

    let predictor = match PlantDiseasePredictor::from_snapshot(DEFAULT_WEIGHTS_PATH) {
        Ok(predictor) => predictor,
        Err(err) => {
            report_failure(&format!(
                "Model initialization failed: {}",
                error_chain(&err)
            ));
            return ExitCode::FAILURE;
        }
    };

    let prediction = match predictor.predict_path(&image_path) {
        Ok(prediction) => prediction,
        Err(err) => {
            report_failure(&format!("Inference failed: {}", error_chain(&err)));
            return ExitCode::FAILURE;
        }
    };

    match emit_prediction(&prediction) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_failure(&format!("Inference failed: {}", error_chain(err.as_ref())));
            ExitCode::FAILURE
        }
    }
}

/// Writes the result record to stdout without a trailing newline, then
/// flushes.
fn emit_prediction(prediction: &Prediction) -> Result<(), Box<dyn std::error::Error>> {
    let payload = serde_json::to_string(prediction)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(payload.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// Emits the failure record on stderr.
fn report_failure(message: &str) {
    error!("{message}");
    eprintln!("{}", serde_json::json!({ "error": message }));
}

/// Formats an error with its full source chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
