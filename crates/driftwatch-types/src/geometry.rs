use std::fmt;

use serde::{Deserialize, Serialize};

/// Width and height of a frame, mask or output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Screen rectangle in pixel units. `left`/`top` may be negative on
/// multi-monitor layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn at_origin(dimensions: Dimensions) -> Self {
        Self::new(0, 0, dimensions.width, dimensions.height)
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Clip to a `width`x`height` canvas whose origin is `(origin_left, origin_top)`.
    /// Returns `None` when the rectangles do not overlap.
    pub fn clip_to(&self, origin_left: i32, origin_top: i32, canvas: Dimensions) -> Option<Region> {
        let left = self.left.max(origin_left) as i64;
        let top = self.top.max(origin_top) as i64;
        let right = (self.left as i64 + self.width as i64)
            .min(origin_left as i64 + canvas.width as i64);
        let bottom = (self.top as i64 + self.height as i64)
            .min(origin_top as i64 + canvas.height as i64);
        if right <= left || bottom <= top {
            return None;
        }
        Some(Region::new(
            left as i32,
            top as i32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}{:+}{:+}",
            self.width, self.height, self.left, self.top
        )
    }
}
