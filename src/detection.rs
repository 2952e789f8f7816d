use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb, Xywh};

/// Contains (x,y) of the center and (width,height) of bbox
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "c")]
    pub class: i32,
}

impl Detection {
    /// Builds a detection from corner coordinates.
    pub fn from_ltrb(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class: i32) -> Self {
        let bbox = BBox::ltrb(x1, y1, x2, y2).as_xywh();

        Self {
            x: bbox.cx(),
            y: bbox.cy(),
            w: bbox.width(),
            h: bbox.height(),
            confidence,
            class,
        }
    }

    #[inline]
    pub fn iou(&self, other: &Detection) -> f32 {
        self.ltrb().iou(&other.ltrb())
    }

    #[inline(always)]
    pub fn bbox(&self) -> BBox<Xywh> {
        BBox::xywh(self.x, self.y, self.w, self.h)
    }

    #[inline(always)]
    pub fn ltrb(&self) -> BBox<Ltrb> {
        self.bbox().as_ltrb()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ltrb() {
        let det = Detection::from_ltrb(10.0, 20.0, 30.0, 60.0, 0.9, 0);

        assert_eq!((det.x, det.y, det.w, det.h), (20.0, 40.0, 20.0, 40.0));
        assert_eq!(det.ltrb().as_slice(), &[10.0, 20.0, 30.0, 60.0]);
    }

    #[test]
    fn test_serde_short_names() {
        let det = Detection::from_ltrb(0.0, 0.0, 2.0, 2.0, 0.5, 3);
        let json = serde_json::to_string(&det).unwrap();

        assert!(json.contains("\"p\":0.5"));
        assert!(json.contains("\"c\":3"));
        assert_eq!(serde_json::from_str::<Detection>(&json).unwrap(), det);
    }
}
