//! Smile and eye-open probabilities from a levelled face mesh.
//!
//! Both are geometric: eye openness from the eye aspect ratio, smiling
//! from how wide the mouth is and how far its corners sit above the lip
//! line, each measured against the outer eye-corner distance and squashed
//! through a logistic curve.

use super::blazeface::sigmoid_stable;
use crate::shapes::point::PointF32;

struct EyeContour {
    outer: usize,
    inner: usize,
    upper: [usize; 2],
    lower: [usize; 2],
}

// Mesh indices. Left/right are the subject's.
const RIGHT_EYE: EyeContour = EyeContour {
    outer: 33,
    inner: 133,
    upper: [160, 158],
    lower: [144, 153],
};
const LEFT_EYE: EyeContour = EyeContour {
    outer: 263,
    inner: 362,
    upper: [385, 387],
    lower: [380, 373],
};
const MOUTH_RIGHT: usize = 61;
const MOUTH_LEFT: usize = 291;
const UPPER_LIP: usize = 13;
const LOWER_LIP: usize = 14;

const EYE_OPEN_MIDPOINT: f32 = 0.2;
const EYE_OPEN_STEEPNESS: f32 = 30.;
const SMILE_WIDTH_MIDPOINT: f32 = 0.62;
const SMILE_WIDTH_WEIGHT: f32 = 25.;
const SMILE_LIFT_WEIGHT: f32 = 40.;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attributes {
    pub smiling: f32,
    pub left_eye_open: f32,
    pub right_eye_open: f32,
}

/// `None` if the mesh is short or degenerate.
pub fn classify(mesh: &[PointF32]) -> Option<Attributes> {
    Some(Attributes {
        smiling: smile_probability(mesh)?,
        left_eye_open: eye_open_probability(eye_aspect_ratio(mesh, &LEFT_EYE)?),
        right_eye_open: eye_open_probability(eye_aspect_ratio(mesh, &RIGHT_EYE)?),
    })
}

fn eye_aspect_ratio(mesh: &[PointF32], eye: &EyeContour) -> Option<f32> {
    let p = |i: usize| mesh.get(i);

    let width = p(eye.outer)?.distance(p(eye.inner)?);
    if width <= f32::EPSILON {
        return None;
    }

    let opening = p(eye.upper[0])?.distance(p(eye.lower[0])?)
        + p(eye.upper[1])?.distance(p(eye.lower[1])?);

    Some(opening / (2. * width))
}

fn eye_open_probability(ear: f32) -> f32 {
    sigmoid_stable((ear - EYE_OPEN_MIDPOINT) * EYE_OPEN_STEEPNESS)
}

fn smile_probability(mesh: &[PointF32]) -> Option<f32> {
    let p = |i: usize| mesh.get(i);

    let eye_span = p(RIGHT_EYE.outer)?.distance(p(LEFT_EYE.outer)?);
    if eye_span <= f32::EPSILON {
        return None;
    }

    let right = p(MOUTH_RIGHT)?;
    let left = p(MOUTH_LEFT)?;
    let width_ratio = right.distance(left) / eye_span;

    // y grows downward, so corners above the lip line give a positive lift
    let lip_line = p(UPPER_LIP)?.midpoint(p(LOWER_LIP)?).y;
    let corners = right.midpoint(left).y;
    let lift = (lip_line - corners) / eye_span;

    let z = (width_ratio - SMILE_WIDTH_MIDPOINT) * SMILE_WIDTH_WEIGHT + lift * SMILE_LIFT_WEIGHT;
    Some(sigmoid_stable(z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::landmarks::MESH_POINTS;

    fn set(mesh: &mut [PointF32], idx: usize, x: f32, y: f32) {
        mesh[idx] = PointF32::new(x, y);
    }

    fn eye(mesh: &mut [PointF32], contour: &EyeContour, x0: f32, half_open: f32) {
        set(mesh, contour.outer, x0, 50.);
        set(mesh, contour.inner, x0 + 20., 50.);
        set(mesh, contour.upper[0], x0 + 7., 50. - half_open);
        set(mesh, contour.upper[1], x0 + 13., 50. - half_open);
        set(mesh, contour.lower[0], x0 + 7., 50. + half_open);
        set(mesh, contour.lower[1], x0 + 13., 50. + half_open);
    }

    fn mouth(mesh: &mut [PointF32], half_width: f32, corner_y: f32) {
        set(mesh, MOUTH_RIGHT, 60. - half_width, corner_y);
        set(mesh, MOUTH_LEFT, 60. + half_width, corner_y);
        set(mesh, UPPER_LIP, 60., 89.);
        set(mesh, LOWER_LIP, 60., 91.);
    }

    /// Right eye outer corner at x=30, left eye outer corner at x=90.
    fn face(right_half_open: f32, left_half_open: f32) -> Vec<PointF32> {
        let mut mesh = vec![PointF32::default(); MESH_POINTS];
        eye(&mut mesh, &RIGHT_EYE, 30., right_half_open);
        eye(&mut mesh, &LEFT_EYE, 70., left_half_open);
        // left eye runs inner -> outer going right
        set(&mut mesh, LEFT_EYE.outer, 90., 50.);
        set(&mut mesh, LEFT_EYE.inner, 70., 50.);
        mesh
    }

    #[test]
    fn open_and_closed_eyes() {
        let mut mesh = face(6., 1.);
        mouth(&mut mesh, 16., 90.);

        let attrs = classify(&mesh).unwrap();
        assert!(attrs.right_eye_open > 0.9);
        assert!(attrs.left_eye_open < 0.1);
    }

    #[test]
    fn wide_lifted_mouth_is_a_smile() {
        let mut neutral = face(6., 6.);
        mouth(&mut neutral, 16., 90.);
        let mut smiling = face(6., 6.);
        mouth(&mut smiling, 22., 85.);

        assert!(classify(&neutral).unwrap().smiling < 0.2);
        assert!(classify(&smiling).unwrap().smiling > 0.9);
    }

    #[test]
    fn probabilities_stay_in_unit_range() {
        let mut mesh = face(40., 0.);
        mouth(&mut mesh, 60., 20.);
        let attrs = classify(&mesh).unwrap();

        for p in [attrs.smiling, attrs.left_eye_open, attrs.right_eye_open] {
            assert!((0. ..=1.).contains(&p));
        }
    }

    #[test]
    fn degenerate_or_short_mesh_is_unclassified() {
        assert!(classify(&vec![PointF32::default(); MESH_POINTS]).is_none());
        assert!(classify(&[PointF32::default(); 10]).is_none());
    }
}
