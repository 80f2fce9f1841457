//! Weight snapshot loading.
//!
//! The snapshot is a PyTorch `state_dict` pickle. Keys produced by
//! distributed training carry a uniform `module.` prefix that must be
//! stripped before the names line up with the assembled architecture.
//! Binding is lazy by name: extra entries in the snapshot (an unused
//! pretraining classifier, batch-norm step counters) are never requested and
//! therefore harmless, while a missing or misshaped entry fails the load.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use tracing::debug;

use crate::error::ClassifierError;

const DISTRIBUTED_PREFIX: &str = "module.";

/// Strips the distributed-training prefix from a parameter name, if present.
fn strip_distributed_prefix(name: &str) -> &str {
    name.strip_prefix(DISTRIBUTED_PREFIX).unwrap_or(name)
}

/// Normalizes snapshot keys into the name space the assembler binds against.
fn normalize_keys(tensors: Vec<(String, Tensor)>) -> HashMap<String, Tensor> {
    tensors
        .into_iter()
        .map(|(name, tensor)| (strip_distributed_prefix(&name).to_string(), tensor))
        .collect()
}

/// Reads the snapshot at `path` and returns a [`VarBuilder`] over its
/// tensors, ready for name-scoped binding on `device`.
pub fn load_snapshot(
    path: &Path,
    device: &Device,
) -> Result<VarBuilder<'static>, ClassifierError> {
    let tensors = candle_core::pickle::read_all(path).map_err(|e| {
        ClassifierError::snapshot_load(format!("reading {}", path.display()), e)
    })?;
    debug!(entries = tensors.len(), "read weight snapshot");

    let tensors = normalize_keys(tensors);
    Ok(VarBuilder::from_tensors(tensors, DType::F32, device))
}
