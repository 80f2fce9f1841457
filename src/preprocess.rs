//! Deterministic image-to-tensor preprocessing.
//!
//! The transform matches the one used when the weight snapshot was trained:
//! resize to exactly 224x224 (aspect ratio is deliberately not preserved),
//! scale channel values to [0, 1], then normalize each channel with the
//! ImageNet statistics. The output is an f32 tensor of shape
//! `(1, 3, 224, 224)` in CHW layout.

use candle_core::{Device, Tensor};
use image::RgbImage;
use image::imageops::FilterType;

use crate::error::ClassifierError;

/// Per-channel mean the backbone was pretrained with.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation the backbone was pretrained with.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Side length of the square network input.
pub const INPUT_SIZE: u32 = 224;

/// Resize-and-normalize transform producing network input tensors.
///
/// Normalization is precomputed into per-channel `alpha`/`beta` so a pixel
/// maps in one step: `value * alpha[c] + beta[c]`, with
/// `alpha = scale / std` and `beta = -mean / std`.
#[derive(Debug, Clone)]
pub struct ImageTransform {
    width: u32,
    height: u32,
    filter: FilterType,
    alpha: [f32; 3],
    beta: [f32; 3],
}

impl Default for ImageTransform {
    fn default() -> Self {
        // Training resized with torchvision's default bilinear interpolation;
        // `FilterType::Triangle` is the equivalent.
        Self::new(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
    }
}

impl ImageTransform {
    /// Creates a transform targeting `width` x `height` with the given
    /// resize filter and the fixed ImageNet normalization.
    pub fn new(width: u32, height: u32, filter: FilterType) -> Self {
        let scale = 1.0 / 255.0;
        let mut alpha = [0f32; 3];
        let mut beta = [0f32; 3];
        for c in 0..3 {
            alpha[c] = scale / IMAGENET_STD[c];
            beta[c] = -IMAGENET_MEAN[c] / IMAGENET_STD[c];
        }
        Self {
            width,
            height,
            filter,
            alpha,
            beta,
        }
    }

    /// Target dimensions as `(width, height)`.
    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Resizes and normalizes `image` into a `(1, 3, height, width)` f32
    /// tensor on `device`.
    ///
    /// The resize stretches to the exact target dimensions; no letterboxing
    /// or aspect preservation.
    pub fn apply(&self, image: &RgbImage, device: &Device) -> Result<Tensor, ClassifierError> {
        let resized = image::imageops::resize(image, self.width, self.height, self.filter);

        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = Vec::with_capacity(3 * h * w);

        // CHW layout
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let pixel = resized.get_pixel(x as u32, y as u32);
                    data.push(pixel[c] as f32 * self.alpha[c] + self.beta[c]);
                }
            }
        }

        let tensor = Tensor::from_vec(data, (1, 3, h, w), device)?;
        Ok(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::IndexOp;

    fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, image::Rgb(rgb))
    }

    #[test]
    fn test_output_shape() {
        let transform = ImageTransform::default();
        let image = solid_image(100, 200, [10, 20, 30]);
        let tensor = transform.apply(&image, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_non_square_inputs_stretch_to_target() {
        // A wide and a tall image both land on the same square shape;
        // the resize stretches instead of letterboxing.
        let transform = ImageTransform::default();
        let wide = transform
            .apply(&solid_image(200, 100, [0, 0, 0]), &Device::Cpu)
            .unwrap();
        let tall = transform
            .apply(&solid_image(100, 200, [0, 0, 0]), &Device::Cpu)
            .unwrap();
        assert_eq!(wide.dims(), tall.dims());
        assert_eq!(wide.dims(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_stretch_fills_the_frame_without_padding() {
        // Tall two-tone image: left half red, right half blue. Stretching
        // must keep the halves at the left/right edges of every row; any
        // letterboxing would leave padding bands instead.
        let mut image = RgbImage::new(100, 200);
        for (x, _, pixel) in image.enumerate_pixels_mut() {
            *pixel = if x < 50 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            };
        }

        let transform = ImageTransform::default();
        let tensor = transform.apply(&image, &Device::Cpu).unwrap();
        let channels = tensor.i(0).unwrap().to_vec3::<f32>().unwrap();

        let red_hi = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let blue_hi = (1.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2];
        for row in [0, 111, 223] {
            assert!((channels[0][row][5] - red_hi).abs() < 1e-3, "row {row}");
            assert!((channels[2][row][218] - blue_hi).abs() < 1e-3, "row {row}");
            // The opposite channel stays at its zero-point on each side.
            assert!(channels[2][row][5] < -1.5, "row {row}");
            assert!(channels[0][row][218] < -2.0, "row {row}");
        }
    }

    #[test]
    fn test_normalization_constants() {
        // A solid-color image is filter-independent, so channel values can be
        // checked against the closed-form normalization.
        let transform = ImageTransform::default();
        let image = solid_image(64, 64, [255, 0, 128]);
        let tensor = transform.apply(&image, &Device::Cpu).unwrap();
        let channels = tensor.i(0).unwrap().to_vec3::<f32>().unwrap();

        let expected = |value: u8, c: usize| -> f32 {
            (value as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
        };
        assert!((channels[0][0][0] - expected(255, 0)).abs() < 1e-5);
        assert!((channels[1][100][100] - expected(0, 1)).abs() < 1e-5);
        assert!((channels[2][223][223] - expected(128, 2)).abs() < 1e-5);
    }

    #[test]
    fn test_channel_order_is_rgb() {
        let transform = ImageTransform::default();
        let image = solid_image(32, 32, [255, 0, 0]);
        let tensor = transform.apply(&image, &Device::Cpu).unwrap();
        let channels = tensor.i(0).unwrap().to_vec3::<f32>().unwrap();

        // Red channel saturated, green and blue at their zero-point.
        assert!(channels[0][0][0] > 2.0);
        assert!(channels[1][0][0] < -1.5);
        assert!(channels[2][0][0] < -1.5);
    }

    #[test]
    fn test_determinism() {
        let transform = ImageTransform::default();
        let image = solid_image(50, 77, [13, 200, 91]);
        let a = transform
            .apply(&image, &Device::Cpu)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        let b = transform
            .apply(&image, &Device::Cpu)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(a, b);
    }
}
