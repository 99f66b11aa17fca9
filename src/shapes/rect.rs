use super::point::PointF32;

/// Face box in image pixels. `x`/`y` locate the middle of the box.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Candidate box as produced by the detector, middle at `x`/`y`. Units
/// depend on the stage: normalized model space until mapped back.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct RectF32 {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl From<RectF32> for Rect {
    fn from(r: RectF32) -> Rect {
        let px = |v: f32| v.max(0.).round() as u32;
        Rect {
            x: px(r.x),
            y: px(r.y),
            w: px(r.w),
            h: px(r.h),
        }
    }
}

impl From<Rect> for imageproc::rect::Rect {
    fn from(r: Rect) -> imageproc::rect::Rect {
        imageproc::rect::Rect::at(r.left() as i32, r.top() as i32).of_size(r.w.max(1), r.h.max(1))
    }
}

impl RectF32 {
    pub fn from_center(x: f32, y: f32, w: f32, h: f32) -> RectF32 {
        RectF32 { x, y, w, h }
    }

    pub fn center(&self) -> PointF32 {
        PointF32::new(self.x, self.y)
    }

    /// Left, top, right, bottom.
    pub fn edges(&self) -> (f32, f32, f32, f32) {
        let (hw, hh) = (self.w / 2., self.h / 2.);
        (self.x - hw, self.y - hh, self.x + hw, self.y + hh)
    }

    /// Intersection over union, 0 when the boxes do not touch.
    pub fn iou(&self, other: &RectF32) -> f32 {
        let (l0, t0, r0, b0) = self.edges();
        let (l1, t1, r1, b1) = other.edges();

        let overlap_w = r0.min(r1) - l0.max(l1);
        let overlap_h = b0.min(b1) - t0.max(t1);
        if overlap_w <= 0. || overlap_h <= 0. {
            return 0.;
        }

        let overlap = overlap_w * overlap_h;
        let union = self.w * self.h + other.w * other.h - overlap;
        if union > 0. { overlap / union } else { 0. }
    }
}

impl Rect {
    pub fn from_tl(left: u32, top: u32, w: u32, h: u32) -> Rect {
        Rect {
            x: left + w / 2,
            y: top + h / 2,
            w,
            h,
        }
    }

    pub fn left(&self) -> u32 {
        self.x.saturating_sub(self.w / 2)
    }

    pub fn top(&self) -> u32 {
        self.y.saturating_sub(self.h / 2)
    }

    /// Grows to a square of `side * factor`, clamped to the image.
    pub fn square_within(&self, factor: f32, max_w: u32, max_h: u32) -> Rect {
        let side = ((self.w.max(self.h) as f32) * factor).round() as u32;
        let side = side.min(max_w).min(max_h).max(1);

        let left = self.x.saturating_sub(side / 2).min(max_w - side);
        let top = self.y.saturating_sub(side / 2).min(max_h - side);

        Rect::from_tl(left, top, side, side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = RectF32::from_center(0.5, 0.5, 0.2, 0.2);
        assert!((a.iou(&a) - 1.).abs() < 1e-6);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = RectF32::from_center(0.5, 0.5, 0.2, 0.2);
        let b = RectF32::from_center(0.6, 0.5, 0.2, 0.2);
        // overlap 0.02, union 0.06
        assert!((a.iou(&b) - 1. / 3.).abs() < 1e-5);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = RectF32::from_center(0.2, 0.2, 0.1, 0.1);
        let b = RectF32::from_center(0.8, 0.8, 0.1, 0.1);
        assert_eq!(a.iou(&b), 0.);
    }

    #[test]
    fn square_within_stays_inside_image() {
        let r = Rect {
            x: 95,
            y: 10,
            w: 40,
            h: 20,
        };
        let sq = r.square_within(1.5, 100, 80);

        assert_eq!(sq.w, sq.h);
        assert_eq!(sq.w, 60);
        assert!(sq.left() + sq.w <= 100);
        assert_eq!(sq.top(), 0);
    }
}
