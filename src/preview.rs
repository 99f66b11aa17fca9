use anyhow::Result;
use image::{Rgb, RgbImage};
use imageproc::drawing;
use std::path::Path;
use tracing::{debug, span, Level};

use crate::detection::{DetectedFace, LandmarkKind};

const BOX_COLOR: Rgb<u8> = Rgb([255u8, 0u8, 0u8]);
const EYE_COLOR: Rgb<u8> = Rgb([0u8, 255u8, 0u8]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([255u8, 255u8, 0u8]);

/// Copy of `img` with each face's box and landmarks drawn on it.
pub fn annotate(img: &RgbImage, faces: &[DetectedFace]) -> RgbImage {
    let mut out = img.clone();
    let radius = (img.width().min(img.height()) / 100).max(2) as i32;

    for face in faces {
        drawing::draw_hollow_rect_mut(&mut out, face.bounds.into(), BOX_COLOR);

        for landmark in &face.landmarks {
            let color = match landmark.kind {
                LandmarkKind::LeftEye | LandmarkKind::RightEye => EYE_COLOR,
                _ => LANDMARK_COLOR,
            };
            drawing::draw_filled_circle_mut(
                &mut out,
                (
                    landmark.position.x.round() as i32,
                    landmark.position.y.round() as i32,
                ),
                radius,
                color,
            );
        }
    }

    out
}

pub fn save_preview(img: &RgbImage, faces: &[DetectedFace], dest: &Path) -> Result<()> {
    let span = span!(Level::DEBUG, "save_preview");
    let _guard = span.enter();

    annotate(img, faces).save(dest)?;
    debug!("Preview at {dest:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Landmark;
    use crate::shapes::point::PointF32;
    use crate::shapes::rect::Rect;

    #[test]
    fn draws_box_and_landmarks() {
        let img = RgbImage::new(100, 100);
        let face = DetectedFace {
            bounds: Rect::from_tl(10, 20, 40, 30),
            landmarks: vec![
                Landmark {
                    kind: LandmarkKind::LeftEye,
                    position: PointF32::new(40., 30.),
                },
                Landmark {
                    kind: LandmarkKind::MouthCenter,
                    position: PointF32::new(30., 42.),
                },
            ],
            ..Default::default()
        };

        let out = annotate(&img, &[face]);

        assert_eq!(out.get_pixel(10, 20), &BOX_COLOR);
        assert_eq!(out.get_pixel(49, 35), &BOX_COLOR);
        assert_eq!(out.get_pixel(40, 30), &EYE_COLOR);
        assert_eq!(out.get_pixel(30, 42), &LANDMARK_COLOR);
        assert_eq!(out.get_pixel(90, 90), &Rgb([0, 0, 0]));
        // source untouched
        assert_eq!(img.get_pixel(10, 20), &Rgb([0, 0, 0]));
    }

    #[test]
    fn saves_png() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("preview.png");

        save_preview(&RgbImage::new(8, 8), &[], &dest).unwrap();
        assert_eq!(image::open(&dest).unwrap().into_rgb8().dimensions(), (8, 8));
    }
}
