use driftwatch_types::{
    frame::{DiffMask, Frame},
    geometry::Region,
    DriftwatchError, Result,
};
use image::{GrayImage, Luma, Rgb, RgbImage};

/// Luminance threshold at which a differing pixel counts as changed.
pub const DEFAULT_THRESHOLD: u8 = 30;

/// Result of comparing two equally sized frames.
#[derive(Debug, Clone)]
pub struct FrameDiff {
    /// Per-channel absolute difference, unbinarized.
    pub difference: RgbImage,
    pub mask: DiffMask,
    /// Tightest rectangle holding any non-zero difference.
    pub bounds: Option<Region>,
    /// Area of `bounds`, 0 when the frames are identical.
    pub changed_area: u64,
}

/// Stateless frame comparator.
#[derive(Debug, Clone, Copy)]
pub struct DiffEngine {
    threshold: u8,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl DiffEngine {
    /// A zero threshold is raised to 1: identical frames never differ.
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn diff(&self, a: &Frame, b: &Frame) -> Result<FrameDiff> {
        let difference = absolute_difference(a.image(), b.image()).ok_or_else(|| {
            DriftwatchError::mismatch(a.dimensions(), b.dimensions())
        })?;
        let mask = self.binarize(&difference);
        let bounds = nonzero_bounds(&difference);
        let changed_area = bounds
            .map(|region| region.dimensions().area())
            .unwrap_or(0);
        Ok(FrameDiff {
            difference,
            mask,
            bounds,
            changed_area,
        })
    }

    fn binarize(&self, difference: &RgbImage) -> DiffMask {
        let (width, height) = difference.dimensions();
        let gray = GrayImage::from_fn(width, height, |x, y| {
            let value = luminance(difference.get_pixel(x, y));
            Luma([if value >= self.threshold { DiffMask::CHANGED } else { 0 }])
        });
        DiffMask::from_image(gray)
    }
}

/// `|a - b|` per channel; `None` if the sizes differ.
pub fn absolute_difference(a: &RgbImage, b: &RgbImage) -> Option<RgbImage> {
    if a.dimensions() != b.dimensions() {
        return None;
    }
    let (width, height) = a.dimensions();
    let mut out = RgbImage::new(width, height);
    for ((dst, pa), pb) in out.pixels_mut().zip(a.pixels()).zip(b.pixels()) {
        *dst = Rgb([
            pa.0[0].abs_diff(pb.0[0]),
            pa.0[1].abs_diff(pb.0[1]),
            pa.0[2].abs_diff(pb.0[2]),
        ]);
    }
    Some(out)
}

/// Rec.601 luma in 14-bit fixed point, rounded.
fn luminance(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    let weighted = r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868;
    ((weighted + (1 << 13)) >> 14) as u8
}

fn nonzero_bounds(image: &RgbImage) -> Option<Region> {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0 != [0, 0, 0] {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    if min_x == u32::MAX {
        return None;
    }
    Some(Region::new(
        min_x as i32,
        min_y as i32,
        max_x - min_x + 1,
        max_y - min_y + 1,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftwatch_types::geometry::Dimensions;

    fn with_block(base: [u8; 3], block: [u8; 3], x0: u32, y0: u32, size: u32) -> Frame {
        let mut image = RgbImage::from_pixel(100, 100, Rgb(base));
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                image.put_pixel(x, y, Rgb(block));
            }
        }
        Frame::new(image)
    }

    #[test]
    fn identical_frames_have_no_change() {
        let frame = Frame::solid(Dimensions::new(100, 100), [40, 120, 200]);
        let diff = DiffEngine::default()
            .diff(&frame, &frame.clone())
            .expect("diff");
        assert!(diff.mask.is_all_zero());
        assert_eq!(diff.changed_area, 0);
        assert!(diff.bounds.is_none());
    }

    #[test]
    fn corner_block_change_is_bounded() {
        let a = Frame::solid(Dimensions::new(100, 100), [0, 0, 0]);
        let b = with_block([0, 0, 0], [255, 255, 255], 0, 0, 10);
        let diff = DiffEngine::default().diff(&a, &b).expect("diff");
        assert_eq!(diff.changed_area, 100);
        assert_eq!(diff.bounds, Some(Region::new(0, 0, 10, 10)));
        for (x, y, pixel) in diff.mask.image().enumerate_pixels() {
            let inside = x < 10 && y < 10;
            assert_eq!(pixel.0[0] == DiffMask::CHANGED, inside, "cell ({x},{y})");
        }
    }

    #[test]
    fn changed_area_is_symmetric() {
        let a = with_block([10, 10, 10], [90, 30, 200], 20, 40, 15);
        let b = with_block([10, 10, 10], [10, 10, 60], 60, 5, 7);
        let engine = DiffEngine::default();
        let ab = engine.diff(&a, &b).expect("diff ab");
        let ba = engine.diff(&b, &a).expect("diff ba");
        assert_eq!(ab.changed_area, ba.changed_area);
        assert_eq!(ab.mask, ba.mask);
    }

    #[test]
    fn faint_change_counts_in_area_but_not_mask() {
        let a = Frame::solid(Dimensions::new(100, 100), [100, 100, 100]);
        let b = with_block([100, 100, 100], [105, 105, 105], 50, 50, 4);
        let diff = DiffEngine::default().diff(&a, &b).expect("diff");
        assert_eq!(diff.changed_area, 16);
        assert!(diff.mask.is_all_zero());
    }

    #[test]
    fn threshold_is_inclusive() {
        let a = Frame::solid(Dimensions::new(4, 4), [0, 0, 0]);
        let b = Frame::solid(Dimensions::new(4, 4), [30, 30, 30]);
        let diff = DiffEngine::new(30).diff(&a, &b).expect("diff");
        assert_eq!(diff.mask.changed_pixels(), 16);
        let below = Frame::solid(Dimensions::new(4, 4), [29, 29, 29]);
        assert!(DiffEngine::new(30).diff(&a, &below).expect("diff").mask.is_all_zero());
    }

    #[test]
    fn zero_threshold_still_leaves_identical_frames_unchanged() {
        let engine = DiffEngine::new(0);
        assert_eq!(engine.threshold(), 1);
        let frame = Frame::solid(Dimensions::new(4, 4), [90, 120, 30]);
        let diff = engine.diff(&frame, &frame).expect("diff");
        assert!(diff.mask.is_all_zero());
        assert_eq!(diff.changed_area, 0);
    }

    #[test]
    fn mismatched_frames_are_rejected() {
        let a = Frame::solid(Dimensions::new(100, 100), [0, 0, 0]);
        let b = Frame::solid(Dimensions::new(100, 99), [0, 0, 0]);
        let err = DiffEngine::default().diff(&a, &b).expect_err("mismatch");
        assert!(matches!(err, DriftwatchError::DimensionMismatch { .. }));
    }
}
