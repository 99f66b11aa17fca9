use super::anchors::gen_anchors;
use super::model::{initialize_model, Session, SessionOutputs};
use super::PerformanceMode;
use crate::shapes::point::PointF32;
use crate::shapes::rect::RectF32;
use anyhow::{Error, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array;
use ort::value::Tensor;
use std::path::Path;
use tracing::{span, trace, Level};

pub const MODEL_FILE: &str = "mediapipe_face_detection_short_range.onnx";

const WIDTH: u32 = 128;
const HEIGHT: u32 = 128;
const NUM_COORDS: usize = 16;
const NUM_KEYPOINTS: usize = 6;
const SCORE_CLIP: f32 = 100.;
const SUPPRESSION_IOU: f32 = 0.3;

// Keypoint order in the regressor rows. Left/right are the subject's.
pub const KP_RIGHT_EYE: usize = 0;
pub const KP_LEFT_EYE: usize = 1;
pub const KP_NOSE: usize = 2;
pub const KP_MOUTH: usize = 3;
pub const KP_RIGHT_EAR: usize = 4;
pub const KP_LEFT_EAR: usize = 5;

/// A detected face before landmark and attribute processing.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub bounds: RectF32,
    pub keypoints: [PointF32; NUM_KEYPOINTS],
    pub confidence: f32,
}

impl Candidate {
    /// Roll of the eye line, 0 when the eyes are level.
    pub fn rot_theta(&self) -> f32 {
        let r_eye = self.keypoints[KP_RIGHT_EYE];
        let l_eye = self.keypoints[KP_LEFT_EYE];
        (l_eye.y - r_eye.y).atan2(l_eye.x - r_eye.x)
    }

    /// Moves every point through `f`; box size is left to the caller.
    fn map_points(&self, f: impl Fn(PointF32) -> PointF32) -> Candidate {
        let center = f(self.bounds.center());
        Candidate {
            bounds: RectF32::from_center(center.x, center.y, self.bounds.w, self.bounds.h),
            keypoints: self.keypoints.map(f),
            confidence: self.confidence,
        }
    }
}

/// BlazeFace short-range wrapper.
///
/// Model input: 128x128 RGB, f32 in [-1, 1], NHWC.
/// Model outputs:
/// - `classificators`: 896 raw scores, one per anchor
/// - `regressors`: 896 rows of 16 values. The first 4 are the box
///   center offset, width and height in input pixels relative to the
///   row's anchor; the remaining 12 are six (x, y) keypoints.
pub struct FaceDetector {
    model: Session,
    anchors: Vec<PointF32>,
    mode: PerformanceMode,
    min_confidence: f32,
}

impl FaceDetector {
    pub fn new(
        models_dir: &Path,
        threads: usize,
        mode: PerformanceMode,
        min_confidence: f32,
    ) -> Result<FaceDetector> {
        Ok(FaceDetector {
            model: initialize_model(models_dir, MODEL_FILE, threads)?,
            anchors: gen_anchors(),
            mode,
            min_confidence,
        })
    }

    /// Returns candidates in source image pixels, best first.
    pub fn run(&self, img: &RgbImage) -> Result<Vec<Candidate>> {
        let span = span!(Level::DEBUG, "face_detector");
        let _guard = span.enter();

        let (input_img, letterbox) = Letterbox::fit(img);
        let input_arr =
            Array::from_shape_fn((1, HEIGHT as usize, WIDTH as usize, 3), |(_, y, x, c)| {
                input_img.get_pixel(x as u32, y as u32)[c] as f32 / 127.5 - 1. // -1. - 1. range
            });
        let input = Tensor::from_array(input_arr)?;

        let outputs = self.model.run(ort::inputs!["input" => input]?)?;
        let candidates = self.extract_results(outputs)?;

        let faces: Vec<Candidate> = suppress(candidates, self.mode)
            .iter()
            .map(|c| letterbox.to_source(c))
            .collect();

        trace!("Detected {} faces", faces.len());
        Ok(faces)
    }

    fn extract_results(&self, outputs: SessionOutputs) -> Result<Vec<Candidate>> {
        let regressors: Vec<f32> = outputs["regressors"]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect();
        let scores: Vec<f32> = outputs["classificators"]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect();

        decode_candidates(&regressors, &scores, &self.anchors, self.min_confidence)
    }
}

/// Decodes raw model rows into candidates in normalized input space.
fn decode_candidates(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[PointF32],
    min_confidence: f32,
) -> Result<Vec<Candidate>> {
    if scores.len() != anchors.len() || regressors.len() != anchors.len() * NUM_COORDS {
        return Err(Error::msg(format!(
            "Unexpected detector output: {} scores, {} regressor values for {} anchors",
            scores.len(),
            regressors.len(),
            anchors.len()
        )));
    }

    let w = WIDTH as f32;
    let h = HEIGHT as f32;
    let mut candidates = Vec::new();

    for (row_idx, (anchor, raw_score)) in anchors.iter().zip(scores.iter().copied()).enumerate() {
        let score = sigmoid_stable(raw_score.clamp(-SCORE_CLIP, SCORE_CLIP));
        // NaN scores fail this too
        if !(score >= min_confidence) {
            continue;
        }

        let res = &regressors[row_idx * NUM_COORDS..(row_idx + 1) * NUM_COORDS];
        if res.iter().any(|v| !v.is_finite()) {
            trace!("Dropping row {row_idx} with non-finite regressors");
            continue;
        }
        let bounds = RectF32::from_center(
            anchor.x + res[0] / w,
            anchor.y + res[1] / h,
            res[2] / w,
            res[3] / h,
        );
        let keypoints = std::array::from_fn(|k| PointF32 {
            x: anchor.x + res[4 + k * 2] / w,
            y: anchor.y + res[5 + k * 2] / h,
        });

        candidates.push(Candidate {
            bounds,
            keypoints,
            confidence: score,
        });
    }

    Ok(candidates)
}

/// Non-maximum suppression. `Accurate` blends each cluster of overlapping
/// candidates weighted by score; `Fast` keeps only the best of each cluster.
fn suppress(mut candidates: Vec<Candidate>, mode: PerformanceMode) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = Vec::new();
    while !candidates.is_empty() {
        let best = candidates.remove(0);
        let (overlapping, rest): (Vec<Candidate>, Vec<Candidate>) = candidates
            .into_iter()
            .partition(|c| c.bounds.iou(&best.bounds) > SUPPRESSION_IOU);

        kept.push(match mode {
            PerformanceMode::Fast => best,
            PerformanceMode::Accurate => {
                let mut cluster = Vec::with_capacity(overlapping.len() + 1);
                cluster.push(best);
                cluster.extend(overlapping);
                blend(&cluster)
            }
        });
        candidates = rest;
    }

    kept
}

fn blend(cluster: &[Candidate]) -> Candidate {
    let total: f32 = cluster.iter().map(|c| c.confidence).sum();
    let weighted = |f: &dyn Fn(&Candidate) -> f32| -> f32 {
        cluster.iter().map(|c| f(c) * c.confidence).sum::<f32>() / total
    };

    let bounds = RectF32::from_center(
        weighted(&|c: &Candidate| c.bounds.x),
        weighted(&|c: &Candidate| c.bounds.y),
        weighted(&|c: &Candidate| c.bounds.w),
        weighted(&|c: &Candidate| c.bounds.h),
    );
    let keypoints = std::array::from_fn(|k| PointF32 {
        x: weighted(&|c: &Candidate| c.keypoints[k].x),
        y: weighted(&|c: &Candidate| c.keypoints[k].y),
    });

    Candidate {
        bounds,
        keypoints,
        confidence: cluster[0].confidence,
    }
}

/// Aspect-preserving fit of the source into the model input, padded with
/// black on the short side.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(img: &RgbImage) -> (RgbImage, Letterbox) {
        let scale = (WIDTH as f32 / img.width() as f32).min(HEIGHT as f32 / img.height() as f32);
        let w = ((img.width() as f32 * scale).round() as u32).clamp(1, WIDTH);
        let h = ((img.height() as f32 * scale).round() as u32).clamp(1, HEIGHT);
        let pad_x = (WIDTH - w) / 2;
        let pad_y = (HEIGHT - h) / 2;

        let resized = imageops::resize(img, w, h, FilterType::Triangle);
        let mut canvas = RgbImage::new(WIDTH, HEIGHT);
        imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        (
            canvas,
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        )
    }

    /// Maps a normalized-input candidate back to source pixels.
    fn to_source(&self, c: &Candidate) -> Candidate {
        let to_px = |p: PointF32| PointF32 {
            x: (p.x * WIDTH as f32 - self.pad_x) / self.scale,
            y: (p.y * HEIGHT as f32 - self.pad_y) / self.scale,
        };
        let mut mapped = c.map_points(to_px);
        mapped.bounds.w *= WIDTH as f32 / self.scale;
        mapped.bounds.h *= HEIGHT as f32 / self.scale;
        mapped
    }
}

pub(super) fn sigmoid_stable(x: f32) -> f32 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        x.exp() / (1. + x.exp())
    }
}
