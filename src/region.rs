//! Pixel-space rectangles and per-frame candidates.
//!
//! Every box that leaves this module satisfies the downstream filter's
//! constraints: `x, y >= 1`, `w, h > 0`, and the box lies inside the frame.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-video pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge (at least 1).
    pub x: u32,
    /// Top edge (at least 1).
    pub y: u32,
    /// Width in pixels.
    pub w: u32,
    /// Height in pixels.
    pub h: u32,
}

impl BoundingBox {
    /// Create a box from its origin and size. No clamping is applied.
    #[must_use]
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Build a box from signed edges, clamped into a `frame_w x frame_h` frame.
    ///
    /// `left`/`top` are floored to 1 and `right`/`bottom` (exclusive) are capped
    /// at `frame - guard`. Returns `None` when nothing is left after clamping.
    #[must_use]
    pub fn from_edges_clamped(
        left: i64,
        top: i64,
        right: i64,
        bottom: i64,
        frame_w: u32,
        frame_h: u32,
        guard: u32,
    ) -> Option<Self> {
        let x0 = left.max(1);
        let y0 = top.max(1);
        let x1 = right.min(i64::from(frame_w) - i64::from(guard));
        let y1 = bottom.min(i64::from(frame_h) - i64::from(guard));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        let narrow = |v: i64| u32::try_from(v).ok();
        Some(Self {
            x: narrow(x0)?,
            y: narrow(y0)?,
            w: narrow(x1 - x0)?,
            h: narrow(y1 - y0)?,
        })
    }

    /// Exclusive right edge.
    #[must_use]
    pub const fn right(&self) -> u32 {
        self.x + self.w
    }

    /// Exclusive bottom edge.
    #[must_use]
    pub const fn bottom(&self) -> u32 {
        self.y + self.h
    }

    /// Area in pixels.
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.w) * u64::from(self.h)
    }

    /// Center point.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            f64::from(self.x) + f64::from(self.w) / 2.0,
            f64::from(self.y) + f64::from(self.h) / 2.0,
        )
    }

    /// Area shared with `other`, zero when disjoint.
    #[must_use]
    pub fn intersection_area(&self, other: &Self) -> u64 {
        let ix = self.right().min(other.right()).saturating_sub(self.x.max(other.x));
        let iy = self.bottom().min(other.bottom()).saturating_sub(self.y.max(other.y));
        u64::from(ix) * u64::from(iy)
    }

    /// Smallest box covering both boxes.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Self {
            x,
            y,
            w: self.right().max(other.right()) - x,
            h: self.bottom().max(other.bottom()) - y,
        }
    }

    /// Grow by `margin` on every side, staying inside the frame.
    ///
    /// Returns `self` unchanged if the grown box would be empty (cannot happen
    /// for a box that already fits).
    #[must_use]
    pub fn expanded(&self, margin: u32, frame_w: u32, frame_h: u32) -> Self {
        let m = i64::from(margin);
        Self::from_edges_clamped(
            i64::from(self.x) - m,
            i64::from(self.y) - m,
            i64::from(self.right()) + m,
            i64::from(self.bottom()) + m,
            frame_w,
            frame_h,
            0,
        )
        .unwrap_or(*self)
    }

    /// Whether the box satisfies the output constraints for the given frame.
    #[must_use]
    pub fn fits(&self, frame_w: u32, frame_h: u32) -> bool {
        self.x >= 1
            && self.y >= 1
            && self.w > 0
            && self.h > 0
            && self.right() <= frame_w
            && self.bottom() <= frame_h
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.w, self.h, self.x, self.y)
    }
}

/// Frame corner searched by the corner scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    /// Upper-left corner.
    TopLeft,
    /// Upper-right corner.
    TopRight,
    /// Lower-left corner.
    BottomLeft,
    /// Lower-right corner.
    BottomRight,
}

impl Corner {
    /// All corners in scan order. Ties between corners resolve to the earlier entry.
    pub const ALL: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomLeft,
        Corner::BottomRight,
    ];

    /// Stable name used in provenance tags.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Corner::TopLeft => "top_left",
            Corner::TopRight => "top_right",
            Corner::BottomLeft => "bottom_left",
            Corner::BottomRight => "bottom_right",
        }
    }
}

/// A per-frame watermark hypothesis emitted by a detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Padded and clamped box.
    pub bbox: BoundingBox,
    /// Score in `[0, 1]`, monotonic in contour area.
    pub confidence: f32,
    /// Contour area in pixels before padding.
    pub area: u32,
    /// Name of the strategy that produced the candidate.
    pub method: &'static str,
    /// Corner the candidate was found in, when the corner scan was used.
    pub corner: Option<Corner>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_floors_origin_to_one() {
        let b = BoundingBox::from_edges_clamped(-20, 0, 50, 40, 100, 100, 0).unwrap();
        assert_eq!(b, BoundingBox::new(1, 1, 49, 39));
        assert!(b.fits(100, 100));
    }

    #[test]
    fn clamping_respects_edge_guard() {
        let b = BoundingBox::from_edges_clamped(80, 80, 140, 140, 100, 100, 2).unwrap();
        assert_eq!(b.right(), 98);
        assert_eq!(b.bottom(), 98);
    }

    #[test]
    fn clamping_outside_frame_is_none() {
        assert!(BoundingBox::from_edges_clamped(120, 10, 150, 20, 100, 100, 0).is_none());
        assert!(BoundingBox::from_edges_clamped(10, 10, 10, 20, 100, 100, 0).is_none());
    }

    #[test]
    fn intersection_and_union() {
        let a = BoundingBox::new(10, 10, 20, 10);
        let b = BoundingBox::new(20, 15, 20, 10);
        assert_eq!(a.intersection_area(&b), 10 * 5);
        assert_eq!(a.union(&b), BoundingBox::new(10, 10, 30, 15));

        let far = BoundingBox::new(200, 200, 5, 5);
        assert_eq!(a.intersection_area(&far), 0);
    }

    #[test]
    fn expanded_stays_in_frame() {
        let b = BoundingBox::new(3, 3, 90, 10).expanded(10, 100, 50);
        assert_eq!(b.x, 1);
        assert_eq!(b.y, 1);
        assert_eq!(b.right(), 100);
        assert!(b.fits(100, 50));
    }

    #[test]
    fn display_uses_geometry_notation() {
        assert_eq!(BoundingBox::new(5, 6, 70, 20).to_string(), "70x20+5+6");
    }
}
