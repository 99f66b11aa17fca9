use super::blazeface::{
    Candidate, FaceDetector, KP_LEFT_EAR, KP_LEFT_EYE, KP_MOUTH, KP_NOSE, KP_RIGHT_EAR,
    KP_RIGHT_EYE,
};
use super::classify::classify;
use super::landmarks::FaceLandmarker;
use super::{
    ClassificationMode, DetectedFace, DetectionError, DetectorOptions, FaceDetectionService,
    FaceList, InputImage, Landmark, LandmarkKind, LandmarkMode,
};
use anyhow::Result;
use image::RgbImage;
use std::path::Path;
use tracing::{debug, info, span, trace, Level};

const LANDMARK_KEYPOINTS: [(LandmarkKind, usize); 6] = [
    (LandmarkKind::LeftEye, KP_LEFT_EYE),
    (LandmarkKind::RightEye, KP_RIGHT_EYE),
    (LandmarkKind::NoseBase, KP_NOSE),
    (LandmarkKind::MouthCenter, KP_MOUTH),
    (LandmarkKind::LeftEar, KP_LEFT_EAR),
    (LandmarkKind::RightEar, KP_RIGHT_EAR),
];

/// On-device face engine: BlazeFace for boxes and keypoints, plus the
/// face mesh for smile and eye-open classification.
pub struct OnnxFaceService {
    face_detector: FaceDetector,
    face_landmarker: Option<FaceLandmarker>,
    options: DetectorOptions,
}

impl OnnxFaceService {
    /// Loads the models from `models_dir`. The mesh model is only needed
    /// when classification is on.
    pub fn new(models_dir: &Path, options: DetectorOptions, threads: usize) -> Result<Self> {
        let face_detector = FaceDetector::new(
            models_dir,
            threads,
            options.performance_mode,
            options.min_confidence,
        )?;
        let face_landmarker = match options.classification_mode {
            ClassificationMode::All => Some(FaceLandmarker::new(models_dir, threads)?),
            ClassificationMode::None => None,
        };
        info!("Face engine ready with {options:?}");

        Ok(OnnxFaceService {
            face_detector,
            face_landmarker,
            options,
        })
    }

    fn describe(&self, img: &RgbImage, candidate: &Candidate) -> Result<DetectedFace> {
        let mut face = DetectedFace {
            bounds: candidate.bounds.into(),
            ..Default::default()
        };

        if self.options.landmark_mode == LandmarkMode::All {
            face.landmarks = LANDMARK_KEYPOINTS
                .iter()
                .map(|&(kind, idx)| Landmark {
                    kind,
                    position: candidate.keypoints[idx],
                })
                .collect();
        }

        if let Some(landmarker) = &self.face_landmarker {
            let attributes = landmarker.run(img, candidate)?.and_then(|mesh| {
                trace!("Mesh presence {}", mesh.presence);
                classify(&mesh.points)
            });
            trace!("Face attributes: {attributes:?}");

            if let Some(attributes) = attributes {
                face.smiling_probability = Some(attributes.smiling);
                face.left_eye_open_probability = Some(attributes.left_eye_open);
                face.right_eye_open_probability = Some(attributes.right_eye_open);
            }
        }

        Ok(face)
    }
}

impl FaceDetectionService for OnnxFaceService {
    fn process(&mut self, image: &InputImage) -> Result<FaceList, DetectionError> {
        let span = span!(Level::DEBUG, "pipeline");
        let _guard = span.enter();

        let img = image.upright();
        debug!(
            "Detecting on {}x{} image, rotated {} degrees",
            img.width(),
            img.height(),
            image.rotation_degrees()
        );
        let candidates = self
            .face_detector
            .run(&img)
            .map_err(DetectionError::service)?;

        let mut faces = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            trace!("Face bound: {:?}", candidate.bounds);
            faces.push(
                self.describe(&img, candidate)
                    .map_err(DetectionError::service)?,
            );
        }

        debug!("Found {} faces", faces.len());
        Ok(faces)
    }
}
