use chrono::{DateTime, Utc};
use image::{imageops, GrayImage, Luma, Rgb, RgbImage};

use crate::{geometry::Dimensions, DriftwatchError, Result};

/// A captured RGB8 still of the configured region. Immutable once built.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    /// Build from a packed RGB8 buffer; fails if the buffer length does not
    /// match `width * height * 3`.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let len = data.len();
        RgbImage::from_raw(width, height, data)
            .map(Self::new)
            .ok_or_else(|| {
                DriftwatchError::Capture(format!(
                    "raw buffer of {len} bytes does not fit {width}x{height} RGB"
                ))
            })
    }

    pub fn solid(dimensions: Dimensions, color: [u8; 3]) -> Self {
        Self::new(RgbImage::from_pixel(
            dimensions.width,
            dimensions.height,
            Rgb(color),
        ))
    }

    pub fn dimensions(&self) -> Dimensions {
        let (width, height) = self.image.dimensions();
        Dimensions::new(width, height)
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Resize to `target` when the capture came back at a different size.
    /// Frames already at `target` are returned untouched.
    pub fn fit_to(self, target: Dimensions) -> Self {
        if self.dimensions() == target {
            return self;
        }
        let captured_at = self.captured_at;
        let image = imageops::resize(
            &self.image,
            target.width,
            target.height,
            imageops::FilterType::Triangle,
        );
        Self { image, captured_at }
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.image == other.image
    }
}

/// Binary change mask: every cell is either 0 or 255.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffMask {
    image: GrayImage,
}

impl DiffMask {
    pub const CHANGED: u8 = 255;

    pub fn zeros(dimensions: Dimensions) -> Self {
        Self {
            image: GrayImage::new(dimensions.width, dimensions.height),
        }
    }

    /// Wrap a single-channel image, forcing every non-zero cell to 255.
    pub fn from_image(mut image: GrayImage) -> Self {
        for pixel in image.pixels_mut() {
            if pixel.0[0] != 0 {
                *pixel = Luma([Self::CHANGED]);
            }
        }
        Self { image }
    }

    pub fn dimensions(&self) -> Dimensions {
        let (width, height) = self.image.dimensions();
        Dimensions::new(width, height)
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn is_changed(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y).0[0] == Self::CHANGED
    }

    pub fn changed_pixels(&self) -> u64 {
        self.image
            .as_raw()
            .iter()
            .filter(|value| **value == Self::CHANGED)
            .count() as u64
    }

    pub fn is_all_zero(&self) -> bool {
        self.image.as_raw().iter().all(|value| *value == 0)
    }
}

/// Rendered side-by-side output frame handed to a stream sink.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardFrame {
    image: RgbImage,
}

impl DashboardFrame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn dimensions(&self) -> Dimensions {
        let (width, height) = self.image.dimensions();
        Dimensions::new(width, height)
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed `rgb24` bytes, row-major.
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }
}
