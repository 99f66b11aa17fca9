#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointF32 {
    pub x: f32,
    pub y: f32,
}

impl PointF32 {
    pub fn new(x: f32, y: f32) -> PointF32 {
        PointF32 { x, y }
    }

    pub fn distance(&self, other: &PointF32) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn midpoint(&self, other: &PointF32) -> PointF32 {
        PointF32 {
            x: (self.x + other.x) / 2.,
            y: (self.y + other.y) / 2.,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eye_span() {
        let right = PointF32::new(10., 20.);
        let left = PointF32::new(40., 60.);
        assert_eq!(right.distance(&left), 50.);
        assert_eq!(right.midpoint(&left), PointF32::new(25., 40.));
    }
}
