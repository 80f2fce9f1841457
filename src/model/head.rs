//! Projector and classifier head stages.
//!
//! Both stages bind by `nn.Sequential` index: parameter-free layers (pool,
//! flatten, activation, dropout) occupy indices of their own, so the dense
//! and norm layers sit at 2/3 in the projector and 0/1/4 in the classifier.
//! Dense weights initialize Kaiming-normal with zero biases when no snapshot
//! value overrides them.

use candle_core::{D, Module, Result, Tensor};
use candle_nn::init::DEFAULT_KAIMING_NORMAL;
use candle_nn::{BatchNorm, Dropout, Init, Linear, ModuleT, VarBuilder};

const BN_EPS: f64 = 1e-5;

/// Linear layer with Kaiming-normal weight and zero bias initialization.
fn linear_kaiming(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get_with_hints((out_features, in_features), "weight", DEFAULT_KAIMING_NORMAL)?;
    let bias = vb.get_with_hints(out_features, "bias", Init::Const(0.))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Pools the extractor's feature map and projects it to a compact embedding:
/// global average pool -> flatten -> linear -> batch norm -> SiLU -> dropout.
#[derive(Debug, Clone)]
pub struct FeatureProjector {
    fc: Linear,
    bn: BatchNorm,
    dropout: Dropout,
}

impl FeatureProjector {
    /// Loads the projector; `vb` must be scoped at `feature_projector`.
    pub fn load(
        in_features: usize,
        out_features: usize,
        dropout: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let fc = linear_kaiming(in_features, out_features, vb.pp("2"))?;
        let bn = candle_nn::batch_norm(out_features, BN_EPS, vb.pp("3"))?;
        let dropout = Dropout::new(dropout as f32);
        Ok(Self { fc, bn, dropout })
    }
}

impl Module for FeatureProjector {
    /// Maps a `(B, C, H, W)` feature map to a `(B, out_features)` embedding.
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        // Global average pool over the spatial dims, then the channel axis is
        // already the last one: (B, C, H, W) -> (B, C)
        let x = x.mean(D::Minus1)?.mean(D::Minus1)?;
        let x = self.fc.forward(&x)?;
        let x = self.bn.forward_t(&x, false)?;
        let x = candle_nn::ops::silu(&x)?;
        self.dropout.forward(&x, false)
    }
}

/// Maps the embedding to raw class logits:
/// linear -> batch norm -> SiLU -> dropout -> linear.
#[derive(Debug, Clone)]
pub struct ClassifierHead {
    fc1: Linear,
    bn: BatchNorm,
    dropout: Dropout,
    fc2: Linear,
}

impl ClassifierHead {
    /// Loads the classifier; `vb` must be scoped at `classifier`.
    pub fn load(
        in_features: usize,
        hidden: usize,
        num_classes: usize,
        dropout: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let fc1 = linear_kaiming(in_features, hidden, vb.pp("0"))?;
        let bn = candle_nn::batch_norm(hidden, BN_EPS, vb.pp("1"))?;
        let dropout = Dropout::new(dropout as f32);
        let fc2 = linear_kaiming(hidden, num_classes, vb.pp("4"))?;
        Ok(Self {
            fc1,
            bn,
            dropout,
            fc2,
        })
    }
}

impl Module for ClassifierHead {
    /// Maps a `(B, in_features)` embedding to `(B, num_classes)` logits.
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.fc1.forward(x)?;
        let x = self.bn.forward_t(&x, false)?;
        let x = candle_nn::ops::silu(&x)?;
        let x = self.dropout.forward(&x, false)?;
        self.fc2.forward(&x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn test_projector_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let projector = FeatureProjector::load(1280, 512, 0.15, vb).unwrap();

        let input = Tensor::ones((2, 1280, 7, 7), DType::F32, &Device::Cpu).unwrap();
        let out = projector.forward(&input).unwrap();
        assert_eq!(out.dims(), &[2, 512]);
    }

    #[test]
    fn test_classifier_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let classifier = ClassifierHead::load(512, 256, 38, 0.3, vb).unwrap();

        let input = Tensor::ones((2, 512), DType::F32, &Device::Cpu).unwrap();
        let out = classifier.forward(&input).unwrap();
        assert_eq!(out.dims(), &[2, 38]);
    }

    #[test]
    fn test_parameter_names_use_sequential_indices() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        FeatureProjector::load(1280, 512, 0.15, vb.pp("feature_projector")).unwrap();
        ClassifierHead::load(512, 256, 38, 0.3, vb.pp("classifier")).unwrap();

        let data = varmap.data().lock().unwrap();
        for name in [
            "feature_projector.2.weight",
            "feature_projector.2.bias",
            "feature_projector.3.running_mean",
            "classifier.0.weight",
            "classifier.1.running_var",
            "classifier.4.weight",
            "classifier.4.bias",
        ] {
            assert!(data.contains_key(name), "missing parameter {name}");
        }
    }

    #[test]
    fn test_fresh_bias_is_zero() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        ClassifierHead::load(512, 256, 38, 0.3, vb).unwrap();

        let data = varmap.data().lock().unwrap();
        let bias = data.get("4.bias").unwrap().as_tensor();
        let values = bias.to_vec1::<f32>().unwrap();
        assert_eq!(values.len(), 38);
        assert!(values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_inference_forward_is_deterministic() {
        // Dropout must be inert: repeated forwards agree exactly.
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let classifier = ClassifierHead::load(16, 8, 4, 0.9, vb).unwrap();

        let values: Vec<f32> = (0..16).map(|i| i as f32 * 0.25 - 2.0).collect();
        let input = Tensor::from_vec(values, (1, 16), &Device::Cpu).unwrap();

        let a = classifier.forward(&input).unwrap().to_vec2::<f32>().unwrap();
        let b = classifier.forward(&input).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
    }
}
