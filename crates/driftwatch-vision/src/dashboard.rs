use driftwatch_types::{
    frame::{DashboardFrame, DiffMask, Frame},
    geometry::Dimensions,
    DriftwatchError, Result,
};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{imageops, Rgb, RgbImage};

pub const LIVE_LABEL: &str = "Live View";
/// Label anchor: `x` offset within each half, `y` is the text baseline.
pub const LABEL_ORIGIN: (u32, u32) = (10, 30);
const GLYPH_SIZE: u32 = 8;
const GLYPH_SCALE: u32 = 3;
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Lays the live frame and the composite mask out side by side.
#[derive(Debug, Clone)]
pub struct DashboardComposer {
    dimensions: Dimensions,
    history_label: String,
}

impl DashboardComposer {
    /// `history_size` is the frame window N; the right half covers N-1 transitions.
    pub fn new(dimensions: Dimensions, history_size: usize) -> Self {
        Self {
            dimensions,
            history_label: format!(
                "Change History (last {} frames)",
                history_size.saturating_sub(1)
            ),
        }
    }

    pub fn history_label(&self) -> &str {
        &self.history_label
    }

    pub fn output_dimensions(&self) -> Dimensions {
        Dimensions::new(self.dimensions.width * 2, self.dimensions.height)
    }

    pub fn compose(&self, live: &Frame, composite: &DiffMask) -> Result<DashboardFrame> {
        if live.dimensions() != self.dimensions {
            return Err(DriftwatchError::mismatch(self.dimensions, live.dimensions()));
        }
        if composite.dimensions() != self.dimensions {
            return Err(DriftwatchError::mismatch(
                self.dimensions,
                composite.dimensions(),
            ));
        }

        let out = self.output_dimensions();
        let mut canvas = RgbImage::new(out.width, out.height);
        imageops::replace(&mut canvas, live.image(), 0, 0);
        let heat = RgbImage::from_fn(self.dimensions.width, self.dimensions.height, |x, y| {
            let value = composite.image().get_pixel(x, y).0[0];
            Rgb([value, value, value])
        });
        imageops::replace(&mut canvas, &heat, self.dimensions.width as i64, 0);

        let (x, baseline) = LABEL_ORIGIN;
        draw_label(&mut canvas, LIVE_LABEL, x, baseline);
        draw_label(
            &mut canvas,
            &self.history_label,
            self.dimensions.width + x,
            baseline,
        );
        Ok(DashboardFrame::new(canvas))
    }
}

/// Stamp `text` with its baseline at `baseline`, clipped to the canvas.
fn draw_label(canvas: &mut RgbImage, text: &str, x: u32, baseline: u32) {
    let glyph_px = GLYPH_SIZE * GLYPH_SCALE;
    let top = baseline.saturating_sub(glyph_px) as i64;
    let (width, height) = canvas.dimensions();
    for (index, ch) in text.chars().enumerate() {
        let Some(rows) = BASIC_FONTS.get(ch) else {
            continue;
        };
        let left = x as i64 + (index as u32 * glyph_px) as i64;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                if bits & (1u8 << col) == 0 {
                    continue;
                }
                for dy in 0..GLYPH_SCALE {
                    for dx in 0..GLYPH_SCALE {
                        let px = left + (col * GLYPH_SCALE + dx) as i64;
                        let py = top + (row as u32 * GLYPH_SCALE + dy) as i64;
                        if px < width as i64 && py < height as i64 {
                            canvas.put_pixel(px as u32, py as u32, LABEL_COLOR);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn output_is_twice_as_wide() {
        for dims in [Dimensions::new(100, 100), Dimensions::new(37, 5), Dimensions::new(1, 1)] {
            let composer = DashboardComposer::new(dims, 10);
            let live = Frame::solid(dims, [12, 34, 56]);
            let frame = composer
                .compose(&live, &DiffMask::zeros(dims))
                .expect("compose");
            assert_eq!(frame.dimensions(), Dimensions::new(dims.width * 2, dims.height));
        }
    }

    #[test]
    fn halves_carry_live_and_heatmap() {
        let dims = Dimensions::new(200, 120);
        let composer = DashboardComposer::new(dims, 10);
        let live = Frame::solid(dims, [0, 0, 200]);
        let mut gray = GrayImage::new(dims.width, dims.height);
        gray.put_pixel(150, 100, Luma([DiffMask::CHANGED]));
        let frame = composer
            .compose(&live, &DiffMask::from_image(gray))
            .expect("compose");

        // Below the label band.
        assert_eq!(frame.image().get_pixel(150, 100).0, [0, 0, 200]);
        assert_eq!(frame.image().get_pixel(350, 100).0, [255, 255, 255]);
        assert_eq!(frame.image().get_pixel(351, 100).0, [0, 0, 0]);
    }

    #[test]
    fn labels_are_drawn_above_baseline() {
        let dims = Dimensions::new(400, 80);
        let composer = DashboardComposer::new(dims, 10);
        assert_eq!(composer.history_label(), "Change History (last 9 frames)");
        let frame = composer
            .compose(&Frame::solid(dims, [0, 0, 0]), &DiffMask::zeros(dims))
            .expect("compose");

        let lit_in = |x0: u32, x1: u32| {
            (x0..x1).any(|x| (6..30).any(|y| frame.image().get_pixel(x, y).0 == [255, 255, 255]))
        };
        assert!(lit_in(10, 40), "left label missing");
        assert!(lit_in(dims.width + 10, dims.width + 40), "right label missing");
        assert!((0..frame.dimensions().width)
            .all(|x| (30..80).all(|y| frame.image().get_pixel(x, y).0 == [0, 0, 0])));
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let composer = DashboardComposer::new(Dimensions::new(10, 10), 4);
        let live = Frame::solid(Dimensions::new(10, 9), [0, 0, 0]);
        assert!(composer
            .compose(&live, &DiffMask::zeros(Dimensions::new(10, 10)))
            .is_err());
    }
}
