use opencv::core;
use serde_derive::{Deserialize, Serialize};

/// Integer rectangle in frame pixel coordinates, `x1 <= x2` and `y1 <= y2`.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    #[inline]
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    #[inline(always)]
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    #[inline(always)]
    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Clips the rectangle to a `frame_w x frame_h` frame. The result may be empty.
    pub fn clamp_to(&self, frame_w: i32, frame_h: i32) -> Rect {
        let x1 = self.x1.clamp(0, frame_w);
        let y1 = self.y1.clamp(0, frame_h);

        Rect {
            x1,
            y1,
            x2: self.x2.clamp(x1, frame_w),
            y2: self.y2.clamp(y1, frame_h),
        }
    }

    #[inline]
    pub fn as_cv(&self) -> core::Rect {
        core::Rect::new(self.x1, self.y1, self.width(), self.height())
    }
}

/// Translates the half-open interval `[left, right)` the minimum distance needed
/// to lie within `[min_lim, max_lim)`, keeping its length.
///
/// The interval must fit: `right - left <= max_lim - min_lim`.
#[inline]
pub fn fit_interval(left: i32, right: i32, min_lim: i32, max_lim: i32) -> (i32, i32) {
    let shift = if left < min_lim {
        min_lim - left
    } else if right > max_lim {
        max_lim - right
    } else {
        0
    };

    (left + shift, right + shift)
}

/// Grows `rect` symmetrically to `target_w x target_h` (odd remainder to the
/// right/bottom) and fits each axis into the frame.
pub fn pad_to_size(rect: &Rect, target_w: i32, target_h: i32, frame_w: i32, frame_h: i32) -> Rect {
    let extra_x = target_w - rect.width();
    let extra_y = target_h - rect.height();

    let (x1, x2) = fit_interval(
        rect.x1 - extra_x / 2,
        rect.x2 + extra_x / 2 + extra_x % 2,
        0,
        frame_w,
    );
    let (y1, y2) = fit_interval(
        rect.y1 - extra_y / 2,
        rect.y2 + extra_y / 2 + extra_y % 2,
        0,
        frame_h,
    );

    Rect { x1, y1, x2, y2 }
}
