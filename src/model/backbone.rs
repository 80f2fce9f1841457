//! EfficientNet-B0 feature extractor.
//!
//! Parameter names follow the torchvision layout (`features.{block}.{...}`
//! with `nn.Sequential` indices) so a persisted state dict binds by name
//! without any remapping. The extractor stops at the final 1x1 conv; pooling
//! and classification live in the head modules.

use candle_core::{Module, Result, Tensor};
use candle_nn::{BatchNorm, Conv2d, Conv2dConfig, ModuleT, VarBuilder};

/// Number of top-level blocks in the extractor: stem, seven MBConv stages,
/// and the final 1x1 conv. The fine-tune policy counts in these units.
pub const TOP_LEVEL_BLOCKS: usize = 9;

/// Channel width of the extractor output feature map.
pub const OUT_CHANNELS: usize = 1280;

const STEM_CHANNELS: usize = 32;
const HEAD_IN_CHANNELS: usize = 320;
const BN_EPS: f64 = 1e-5;

/// Per-stage MBConv parameters. Repeats after the first block of a stage run
/// with stride 1 and in = out.
#[derive(Debug, Clone, Copy)]
struct StageConfig {
    expand_ratio: usize,
    kernel: usize,
    stride: usize,
    in_channels: usize,
    out_channels: usize,
    repeats: usize,
}

#[rustfmt::skip]
const STAGE_CONFIGS: [StageConfig; 7] = [
    StageConfig { expand_ratio: 1, kernel: 3, stride: 1, in_channels: 32, out_channels: 16, repeats: 1 },
    StageConfig { expand_ratio: 6, kernel: 3, stride: 2, in_channels: 16, out_channels: 24, repeats: 2 },
    StageConfig { expand_ratio: 6, kernel: 5, stride: 2, in_channels: 24, out_channels: 40, repeats: 2 },
    StageConfig { expand_ratio: 6, kernel: 3, stride: 2, in_channels: 40, out_channels: 80, repeats: 3 },
    StageConfig { expand_ratio: 6, kernel: 5, stride: 1, in_channels: 80, out_channels: 112, repeats: 3 },
    StageConfig { expand_ratio: 6, kernel: 5, stride: 2, in_channels: 112, out_channels: 192, repeats: 4 },
    StageConfig { expand_ratio: 6, kernel: 3, stride: 1, in_channels: 192, out_channels: 320, repeats: 1 },
];

impl StageConfig {
    fn block(&self, index: usize) -> MbConvConfig {
        MbConvConfig {
            expand_ratio: self.expand_ratio,
            kernel: self.kernel,
            stride: if index == 0 { self.stride } else { 1 },
            in_channels: if index == 0 { self.in_channels } else { self.out_channels },
            out_channels: self.out_channels,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MbConvConfig {
    expand_ratio: usize,
    kernel: usize,
    stride: usize,
    in_channels: usize,
    out_channels: usize,
}

/// Convolution + batch norm, optionally followed by SiLU.
///
/// Mirrors torchvision's `Conv2dNormActivation`: the conv binds at Sequential
/// index `0`, the norm at index `1`, and the conv carries no bias.
#[derive(Debug, Clone)]
struct ConvBnAct {
    conv: Conv2d,
    bn: BatchNorm,
    silu: bool,
}

impl ConvBnAct {
    fn load(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        groups: usize,
        silu: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let cfg = Conv2dConfig {
            stride,
            padding: (kernel - 1) / 2,
            groups,
            ..Default::default()
        };
        let conv = candle_nn::conv2d_no_bias(in_channels, out_channels, kernel, cfg, vb.pp("0"))?;
        let bn = candle_nn::batch_norm(out_channels, BN_EPS, vb.pp("1"))?;
        Ok(Self { conv, bn, silu })
    }
}

impl Module for ConvBnAct {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.conv.forward(x)?;
        // Running statistics only; no batch statistics are computed or
        // updated on this path.
        let x = self.bn.forward_t(&x, false)?;
        if self.silu {
            candle_nn::ops::silu(&x)
        } else {
            Ok(x)
        }
    }
}

/// Squeeze-and-excitation channel gate (`fc1`/`fc2` are 1x1 convs with bias).
#[derive(Debug, Clone)]
struct SqueezeExcite {
    fc1: Conv2d,
    fc2: Conv2d,
}

impl SqueezeExcite {
    fn load(channels: usize, squeeze: usize, vb: VarBuilder) -> Result<Self> {
        let fc1 = candle_nn::conv2d(channels, squeeze, 1, Default::default(), vb.pp("fc1"))?;
        let fc2 = candle_nn::conv2d(squeeze, channels, 1, Default::default(), vb.pp("fc2"))?;
        Ok(Self { fc1, fc2 })
    }
}

impl Module for SqueezeExcite {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        // Global average pool to (B, C, 1, 1)
        let scale = x.mean_keepdim(2)?.mean_keepdim(3)?;
        let scale = candle_nn::ops::silu(&self.fc1.forward(&scale)?)?;
        let scale = candle_nn::ops::sigmoid(&self.fc2.forward(&scale)?)?;
        x.broadcast_mul(&scale)
    }
}

/// Mobile inverted bottleneck block.
#[derive(Debug, Clone)]
struct MbConv {
    expand: Option<ConvBnAct>,
    depthwise: ConvBnAct,
    se: SqueezeExcite,
    project: ConvBnAct,
    residual: bool,
}

impl MbConv {
    fn load(cfg: &MbConvConfig, vb: VarBuilder) -> Result<Self> {
        let expanded = cfg.in_channels * cfg.expand_ratio;
        let squeeze = usize::max(1, cfg.in_channels / 4);
        let vb = vb.pp("block");

        // Sequential indices shift down by one when there is no expansion
        // conv (expand_ratio == 1).
        let mut index = 0usize;
        let expand = if cfg.expand_ratio != 1 {
            let layer = ConvBnAct::load(
                cfg.in_channels,
                expanded,
                1,
                1,
                1,
                true,
                vb.pp(index.to_string()),
            )?;
            index += 1;
            Some(layer)
        } else {
            None
        };

        let depthwise = ConvBnAct::load(
            expanded,
            expanded,
            cfg.kernel,
            cfg.stride,
            expanded,
            true,
            vb.pp(index.to_string()),
        )?;
        let se = SqueezeExcite::load(expanded, squeeze, vb.pp((index + 1).to_string()))?;
        let project = ConvBnAct::load(
            expanded,
            cfg.out_channels,
            1,
            1,
            1,
            false,
            vb.pp((index + 2).to_string()),
        )?;

        Ok(Self {
            expand,
            depthwise,
            se,
            project,
            residual: cfg.stride == 1 && cfg.in_channels == cfg.out_channels,
        })
    }
}

impl Module for MbConv {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let y = match &self.expand {
            Some(expand) => expand.forward(x)?,
            None => x.clone(),
        };
        let y = self.depthwise.forward(&y)?;
        let y = self.se.forward(&y)?;
        let y = self.project.forward(&y)?;
        if self.residual { &y + x } else { Ok(y) }
    }
}

/// The full feature extractor: stem conv, MBConv stages, final 1x1 conv.
#[derive(Debug, Clone)]
pub struct EfficientNetFeatures {
    stem: ConvBnAct,
    blocks: Vec<MbConv>,
    head: ConvBnAct,
}

impl EfficientNetFeatures {
    /// Loads the extractor from `vb`, which must be scoped at the `features`
    /// level of the state dict.
    pub fn load(vb: VarBuilder) -> Result<Self> {
        let stem = ConvBnAct::load(3, STEM_CHANNELS, 3, 2, 1, true, vb.pp("0"))?;

        let mut blocks = Vec::new();
        for (stage, stage_cfg) in STAGE_CONFIGS.iter().enumerate() {
            let stage_vb = vb.pp((stage + 1).to_string());
            for repeat in 0..stage_cfg.repeats {
                let cfg = stage_cfg.block(repeat);
                blocks.push(MbConv::load(&cfg, stage_vb.pp(repeat.to_string()))?);
            }
        }

        let head = ConvBnAct::load(HEAD_IN_CHANNELS, OUT_CHANNELS, 1, 1, 1, true, vb.pp("8"))?;

        Ok(Self { stem, blocks, head })
    }
}

impl Module for EfficientNetFeatures {
    /// Maps `(B, 3, H, W)` pixels to a `(B, 1280, H/32, W/32)` feature map.
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut x = self.stem.forward(x)?;
        for block in &self.blocks {
            x = block.forward(&x)?;
        }
        self.head.forward(&x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn test_stage_table_is_consistent() {
        let mut channels = STEM_CHANNELS;
        let mut blocks = 0;
        for cfg in &STAGE_CONFIGS {
            assert_eq!(cfg.in_channels, channels, "stage input must chain");
            assert!(cfg.repeats >= 1);
            channels = cfg.out_channels;
            blocks += cfg.repeats;
        }
        assert_eq!(channels, HEAD_IN_CHANNELS);
        assert_eq!(blocks, 16);
        assert_eq!(STAGE_CONFIGS.len() + 2, TOP_LEVEL_BLOCKS);
    }

    #[test]
    fn test_repeat_blocks_keep_width_and_stride() {
        let stage = STAGE_CONFIGS[3];
        let first = stage.block(0);
        let later = stage.block(2);
        assert_eq!(first.stride, 2);
        assert_eq!(first.in_channels, 40);
        assert_eq!(later.stride, 1);
        assert_eq!(later.in_channels, later.out_channels);
    }

    #[test]
    fn test_parameter_names_follow_torchvision_layout() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        EfficientNetFeatures::load(vb).unwrap();

        let data = varmap.data().lock().unwrap();
        for name in [
            "0.0.weight",
            "0.1.running_mean",
            // first stage has no expansion conv: depthwise sits at block.0
            "1.0.block.0.0.weight",
            "1.0.block.1.fc1.bias",
            "1.0.block.2.0.weight",
            // later stages expand first, shifting every index up by one
            "2.0.block.0.0.weight",
            "2.0.block.1.0.weight",
            "2.0.block.2.fc2.weight",
            "2.0.block.3.1.running_var",
            "6.3.block.0.0.weight",
            "8.0.weight",
            "8.1.bias",
        ] {
            assert!(data.contains_key(name), "missing parameter {name}");
        }
    }

    #[test]
    fn test_forward_shape_and_determinism() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let features = EfficientNetFeatures::load(vb).unwrap();

        let pixels: Vec<f32> = (0..3 * 64 * 64).map(|i| (i % 17) as f32 * 0.05).collect();
        let input = Tensor::from_vec(pixels, (1, 3, 64, 64), &Device::Cpu).unwrap();

        let a = features.forward(&input).unwrap();
        assert_eq!(a.dims(), &[1, OUT_CHANNELS, 2, 2]);

        let b = features.forward(&input).unwrap();
        let a = a.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = b.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(a, b);
    }
}
