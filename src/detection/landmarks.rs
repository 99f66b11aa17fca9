use super::blazeface::{sigmoid_stable, Candidate};
use super::model::{initialize_model, Session, SessionOutputs};
use crate::shapes::point::PointF32;
use crate::shapes::rect::Rect;
use anyhow::{Error, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use ndarray::Array;
use ort::value::Tensor;
use std::path::Path;
use tracing::{debug, span, Level};

pub const MODEL_FILE: &str = "mediapipe_face_landmark.onnx";
pub const MESH_POINTS: usize = 468;

const HEIGHT: u32 = 192;
const WIDTH: u32 = 192;
const PRESENCE_THRESHOLD: f32 = 0.5;

/// 468-point face mesh in the landmarker's own 192x192 input space.
///
/// The input crop is square and levelled by the eye line before it is
/// resized, so distances between mesh points keep their ratios and
/// "up" is the face's up.
#[derive(Debug, Clone)]
pub struct FaceMesh {
    pub points: Vec<PointF32>,
    pub presence: f32,
}

pub struct FaceLandmarker {
    model: Session,
}

impl FaceLandmarker {
    pub fn new(models_dir: &Path, threads: usize) -> Result<FaceLandmarker> {
        Ok(FaceLandmarker {
            model: initialize_model(models_dir, MODEL_FILE, threads)?,
        })
    }

    /// `None` when the mesh model does not think the crop holds a face.
    pub fn run(&self, img: &RgbImage, face: &Candidate) -> Result<Option<FaceMesh>> {
        let span = span!(Level::DEBUG, "face_landmarker");
        let _guard = span.enter();

        let bounds: Rect = face.bounds.into();
        // pad 25% on each side
        let bounds = bounds.square_within(1.5, img.width(), img.height());
        let face_img =
            imageops::crop_imm(img, bounds.left(), bounds.top(), bounds.w, bounds.h).to_image();

        let theta = face.rot_theta();
        debug!("Tilt: {}", theta.to_degrees());
        let face_img = if theta.abs() > f32::EPSILON {
            rotate_about_center(&face_img, -theta, Interpolation::Bilinear, Rgb([0u8, 0u8, 0u8]))
        } else {
            face_img
        };

        let input_img = imageops::resize(&face_img, WIDTH, HEIGHT, FilterType::Triangle);
        let input_arr =
            Array::from_shape_fn((1, HEIGHT as usize, WIDTH as usize, 3), |(_, y, x, c)| {
                input_img.get_pixel(x as u32, y as u32)[c] as f32 / 255. // 0. - 1. range
            });
        let input = Tensor::from_array(input_arr)?;

        let outputs = self.model.run(ort::inputs!["input_1" => input]?)?;
        extract_results(outputs)
    }
}

fn extract_results(outputs: SessionOutputs) -> Result<Option<FaceMesh>> {
    let mesh: Vec<f32> = outputs["conv2d_21"]
        .try_extract_tensor::<f32>()?
        .iter()
        .copied()
        .collect();
    let flag = outputs["conv2d_31"]
        .try_extract_tensor::<f32>()?
        .iter()
        .next()
        .copied()
        .ok_or_else(|| Error::msg("Landmarker returned no face flag"))?;

    mesh_from_raw(&mesh, flag)
}

fn mesh_from_raw(mesh: &[f32], raw_flag: f32) -> Result<Option<FaceMesh>> {
    if mesh.len() != MESH_POINTS * 3 {
        return Err(Error::msg(format!(
            "Expected {} mesh values, got {}",
            MESH_POINTS * 3,
            mesh.len()
        )));
    }

    let presence = sigmoid_stable(raw_flag);
    if presence < PRESENCE_THRESHOLD {
        debug!("Landmarker presence {presence} below threshold");
        return Ok(None);
    }

    let points = mesh
        .chunks_exact(3)
        .map(|p| PointF32::new(p[0], p[1]))
        .collect();

    Ok(Some(FaceMesh { points, presence }))
}
