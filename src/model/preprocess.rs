//! Image preprocessing: decode, resize, normalize, augment

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Channels per pixel (RGB).
pub const CHANNELS: usize = 3;

/// Default square input size.
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Normalized RGB image, HWC layout, values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl ImageTensor {
    /// Wrap raw HWC data.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `data` does not hold exactly
    /// `width * height * 3` values.
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(Error::Validation(format!(
                "tensor of {width}x{height} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Uniform-colour tensor, mostly useful for fixtures.
    #[must_use]
    pub fn filled(width: u32, height: u32, rgb: [f32; CHANNELS]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * CHANNELS)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Raw HWC values.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// RGB values at `(x, y)`.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [f32; CHANNELS] {
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// Decodes image files into square normalized tensors.
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    target: u32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            target: DEFAULT_IMAGE_SIZE,
        }
    }
}

impl Preprocessor {
    /// Preprocessor producing `target x target` tensors.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `target` is zero.
    pub fn new(target: u32) -> Result<Self> {
        if target == 0 {
            return Err(Error::Validation("image size must be positive".to_string()));
        }
        Ok(Self { target })
    }

    /// Side length of produced tensors.
    #[must_use]
    pub const fn target(&self) -> u32 {
        self.target
    }

    /// Decode raw bytes (PNG, JPEG or BMP) into a normalized tensor.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidImage` if the bytes are not a supported image.
    pub fn load_and_normalize_bytes(&self, bytes: &[u8]) -> Result<ImageTensor> {
        let format = image::guess_format(bytes)
            .map_err(|e| Error::InvalidImage(format!("unrecognized image data: {e}")))?;
        if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Bmp) {
            return Err(Error::InvalidImage(format!(
                "unsupported image format {format:?}"
            )));
        }
        let img = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| Error::InvalidImage(format!("failed to decode image: {e}")))?;
        Ok(self.normalize(&img))
    }

    /// Read and decode an image file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read and
    /// `Error::InvalidImage` if its content cannot be decoded.
    pub fn load_and_normalize_path(&self, path: &Path) -> Result<ImageTensor> {
        let bytes = std::fs::read(path)?;
        self.load_and_normalize_bytes(&bytes)
    }

    fn normalize(&self, img: &DynamicImage) -> ImageTensor {
        let rgb = img
            .resize_exact(self.target, self.target, FilterType::Triangle)
            .to_rgb8();
        let (width, height) = rgb.dimensions();
        let data = rgb
            .pixels()
            .flat_map(|p| p.0)
            .map(|v| f32::from(v) / 255.0)
            .collect();
        ImageTensor {
            width,
            height,
            data,
        }
    }
}

/// Random rotation and translation, applied to training tensors.
///
/// Pixels mapped from outside the source become black, and sampling is
/// nearest-neighbour, so outputs keep the input's shape and value range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Augmenter {
    max_rotation_deg: f32,
    max_shift_fraction: f32,
}

impl Default for Augmenter {
    fn default() -> Self {
        Self {
            max_rotation_deg: 30.0,
            max_shift_fraction: 0.1,
        }
    }
}

impl Augmenter {
    /// Augmenter rotating by up to `±max_rotation_deg` and shifting by up to
    /// `±max_shift_fraction` of each side.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for negative or non-finite bounds, or a
    /// shift fraction above 1.
    pub fn new(max_rotation_deg: f32, max_shift_fraction: f32) -> Result<Self> {
        let augmenter = Self {
            max_rotation_deg,
            max_shift_fraction,
        };
        augmenter.validate()?;
        Ok(augmenter)
    }

    /// Check the bounds.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if a bound is out of range.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_rotation_deg.is_finite() && self.max_rotation_deg >= 0.0) {
            return Err(Error::Validation(
                "max_rotation_deg must be a non-negative number".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_shift_fraction) {
            return Err(Error::Validation(
                "max_shift_fraction must lie in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Maximum absolute rotation in degrees.
    #[must_use]
    pub const fn max_rotation_deg(&self) -> f32 {
        self.max_rotation_deg
    }

    /// Maximum absolute shift as a fraction of the side length.
    #[must_use]
    pub const fn max_shift_fraction(&self) -> f32 {
        self.max_shift_fraction
    }

    /// Produce a randomly rotated and shifted copy of `tensor`.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn augment<R: Rng + ?Sized>(&self, tensor: &ImageTensor, rng: &mut R) -> ImageTensor {
        let (w, h) = (tensor.width as f32, tensor.height as f32);
        let angle = uniform(rng, self.max_rotation_deg).to_radians();
        let tx = uniform(rng, self.max_shift_fraction * w);
        let ty = uniform(rng, self.max_shift_fraction * h);
        let (sin, cos) = angle.sin_cos();
        let (cx, cy) = ((w - 1.0) / 2.0, (h - 1.0) / 2.0);

        let mut data = vec![0.0; tensor.data.len()];
        for y in 0..tensor.height {
            for x in 0..tensor.width {
                // Inverse map: undo the shift, then the rotation about the centre.
                let dx = x as f32 - cx - tx;
                let dy = y as f32 - cy - ty;
                let sx = (cos * dx + sin * dy + cx).round();
                let sy = (-sin * dx + cos * dy + cy).round();
                if sx < 0.0 || sy < 0.0 || sx >= w || sy >= h {
                    continue;
                }
                let src = (sy as usize * tensor.width as usize + sx as usize) * CHANNELS;
                let dst = (y as usize * tensor.width as usize + x as usize) * CHANNELS;
                data[dst..dst + CHANNELS].copy_from_slice(&tensor.data[src..src + CHANNELS]);
            }
        }

        ImageTensor {
            width: tensor.width,
            height: tensor.height,
            data,
        }
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, bound: f32) -> f32 {
    if bound > 0.0 {
        rng.gen_range(-bound..=bound)
    } else {
        0.0
    }
}
