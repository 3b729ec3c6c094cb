use driftwatch_types::{
    frame::DiffMask,
    geometry::Dimensions,
    DriftwatchError, Result,
};
use image::{GrayImage, RgbImage};

use crate::ring::RingBuffer;

/// Folds the masks currently held in a diff ring into one composite.
///
/// The composite is rebuilt from the ring on every call, so a mask stops
/// contributing the moment it is evicted.
#[derive(Debug, Clone, Copy)]
pub struct HeatmapAccumulator {
    dimensions: Dimensions,
}

impl HeatmapAccumulator {
    pub fn new(dimensions: Dimensions) -> Self {
        Self { dimensions }
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Cell-wise OR of every mask in `masks`; all zero when the ring is empty.
    pub fn compose(&self, masks: &RingBuffer<DiffMask>) -> Result<DiffMask> {
        let mut composite = GrayImage::new(self.dimensions.width, self.dimensions.height);
        for mask in masks.iter() {
            if mask.dimensions() != self.dimensions {
                return Err(DriftwatchError::mismatch(self.dimensions, mask.dimensions()));
            }
            for (dst, src) in composite.iter_mut().zip(mask.image().iter()) {
                *dst |= *src;
            }
        }
        Ok(DiffMask::from_image(composite))
    }
}

/// Pixel-wise maximum of two difference images; `None` if the sizes differ.
pub fn lighter(a: &RgbImage, b: &RgbImage) -> Option<RgbImage> {
    if a.dimensions() != b.dimensions() {
        return None;
    }
    let mut out = a.clone();
    for (dst, src) in out.iter_mut().zip(b.iter()) {
        *dst = (*dst).max(*src);
    }
    Some(out)
}
