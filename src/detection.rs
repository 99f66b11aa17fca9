use image::{imageops, RgbImage};
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, span, trace, warn, Level};

use crate::shapes::point::PointF32;
use crate::shapes::rect::Rect;

mod anchors;
mod blazeface;
mod classify;
mod landmarks;
mod model;
mod onnx;

pub use onnx::OnnxFaceService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PerformanceMode {
    Fast,
    #[default]
    Accurate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LandmarkMode {
    None,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassificationMode {
    None,
    #[default]
    All,
}

/// How thoroughly the engine looks at each face. The default favours
/// accuracy and turns on landmarks and classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    pub performance_mode: PerformanceMode,
    pub landmark_mode: LandmarkMode,
    pub classification_mode: ClassificationMode,
    /// Detector score a candidate needs to count as a face.
    pub min_confidence: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        DetectorOptions {
            performance_mode: PerformanceMode::Accurate,
            landmark_mode: LandmarkMode::All,
            classification_mode: ClassificationMode::All,
            min_confidence: 0.5,
        }
    }
}

impl DetectorOptions {
    pub fn with_performance_mode(mut self, mode: PerformanceMode) -> Self {
        self.performance_mode = mode;
        self
    }

    pub fn with_landmark_mode(mut self, mode: LandmarkMode) -> Self {
        self.landmark_mode = mode;
        self
    }

    pub fn with_classification_mode(mut self, mode: ClassificationMode) -> Self {
        self.classification_mode = mode;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkKind {
    LeftEye,
    RightEye,
    NoseBase,
    MouthCenter,
    LeftEar,
    RightEar,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub kind: LandmarkKind,
    pub position: PointF32,
}

/// One face as reported by the engine. Left and right are the subject's.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectedFace {
    pub bounds: Rect,
    pub landmarks: Vec<Landmark>,
    pub smiling_probability: Option<f32>,
    pub left_eye_open_probability: Option<f32>,
    pub right_eye_open_probability: Option<f32>,
}

pub type FaceList = Vec<DetectedFace>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectionError {
    /// Failure reported by the engine, message kept verbatim.
    #[error("{0}")]
    Service(String),

    #[error("Face detection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Face detection is no longer running")]
    Disconnected,

    #[error("Rotation must be 0, 90, 180 or 270 degrees, got {0}")]
    InvalidRotation(u32),
}

impl DetectionError {
    pub fn service(e: impl Into<anyhow::Error>) -> DetectionError {
        DetectionError::Service(format!("{:#}", e.into()))
    }
}

/// A decoded photo plus the clockwise rotation that makes it upright.
#[derive(Debug, Clone)]
pub struct InputImage {
    pixels: Arc<RgbImage>,
    rotation_degrees: u32,
}

impl InputImage {
    pub fn from_buffer(
        pixels: Arc<RgbImage>,
        rotation_degrees: u32,
    ) -> Result<InputImage, DetectionError> {
        match rotation_degrees {
            0 | 90 | 180 | 270 => Ok(InputImage {
                pixels,
                rotation_degrees,
            }),
            other => Err(DetectionError::InvalidRotation(other)),
        }
    }

    pub fn rotation_degrees(&self) -> u32 {
        self.rotation_degrees
    }

    pub fn upright(&self) -> Cow<'_, RgbImage> {
        match self.rotation_degrees {
            90 => Cow::Owned(imageops::rotate90(self.pixels.as_ref())),
            180 => Cow::Owned(imageops::rotate180(self.pixels.as_ref())),
            270 => Cow::Owned(imageops::rotate270(self.pixels.as_ref())),
            _ => Cow::Borrowed(self.pixels.as_ref()),
        }
    }
}

/// The face engine. Runs synchronously; `DetectionClient` supplies the
/// asynchronous request/response contract around it.
pub trait FaceDetectionService {
    fn process(&mut self, image: &InputImage) -> Result<FaceList, DetectionError>;
}

/// Capture counter used to tell current detection results from stale ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn next(self) -> Generation {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct DetectionRequest {
    generation: Generation,
    image: InputImage,
}

/// Completion of one submitted request.
#[derive(Debug)]
pub struct DetectionEvent {
    pub generation: Generation,
    pub result: Result<FaceList, DetectionError>,
}

/// Runs a `FaceDetectionService` on a dedicated thread. `submit` returns at
/// once and the answer arrives as a `DetectionEvent` on the channel given to
/// `spawn`.
///
/// Only the newest waiting request is processed: requests still queued when
/// a later one is submitted are dropped without an event. The newest
/// submission therefore always gets exactly one answer.
pub struct DetectionClient {
    requests: Option<flume::Sender<DetectionRequest>>,
    worker: Option<JoinHandle<()>>,
    // request the worker is on, and since when
    current: Arc<Mutex<Option<(Generation, Instant)>>>,
}

impl DetectionClient {
    pub fn spawn<S>(service: S, events: flume::Sender<DetectionEvent>) -> DetectionClient
    where
        S: FaceDetectionService + Send + 'static,
    {
        let (requests, inbox) = flume::unbounded::<DetectionRequest>();
        let current = Arc::new(Mutex::new(None));
        let worker_current = Arc::clone(&current);

        let worker = thread::spawn(move || {
            let mut service = service;
            for mut request in inbox.iter() {
                let span = span!(Level::DEBUG, "detection_worker");
                let _guard = span.enter();

                for newer in inbox.drain() {
                    debug!("Skipping superseded detection {}", request.generation);
                    request = newer;
                }

                trace!("Processing detection {}", request.generation);
                if let Ok(mut slot) = worker_current.lock() {
                    *slot = Some((request.generation, Instant::now()));
                }
                let result = service.process(&request.image);
                let event = DetectionEvent {
                    generation: request.generation,
                    result,
                };
                if events.send(event).is_err() {
                    debug!("Nobody listening for detection results, stopping worker");
                    break;
                }
            }
        });

        DetectionClient {
            requests: Some(requests),
            worker: Some(worker),
            current,
        }
    }

    /// When the worker picked up `generation`, if it has.
    pub fn started_at(&self, generation: Generation) -> Option<Instant> {
        let slot = self.current.lock().ok()?;
        (*slot)
            .filter(|(current, _)| *current == generation)
            .map(|(_, at)| at)
    }

    pub fn submit(&self, generation: Generation, image: InputImage) -> Result<(), DetectionError> {
        let requests = self.requests.as_ref().ok_or(DetectionError::Disconnected)?;
        requests
            .send(DetectionRequest { generation, image })
            .map_err(|_| DetectionError::Disconnected)
    }
}

impl Drop for DetectionClient {
    fn drop(&mut self) {
        drop(self.requests.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Detection worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Reports the upright size as a single face once let through.
    struct GatedService {
        started: flume::Sender<()>,
        gate: flume::Receiver<()>,
    }

    fn gated_client() -> (
        DetectionClient,
        flume::Receiver<DetectionEvent>,
        flume::Receiver<()>,
        flume::Sender<()>,
    ) {
        let (started_tx, started) = flume::unbounded();
        let (go, gate) = flume::unbounded();
        let (tx, rx) = flume::unbounded();
        let service = GatedService {
            started: started_tx,
            gate,
        };
        (DetectionClient::spawn(service, tx), rx, started, go)
    }

    impl FaceDetectionService for GatedService {
        fn process(&mut self, image: &InputImage) -> Result<FaceList, DetectionError> {
            let _ = self.started.send(());
            let _ = self.gate.recv();
            let upright = image.upright();
            let face = DetectedFace {
                bounds: Rect::from_tl(0, 0, upright.width(), upright.height()),
                ..Default::default()
            };
            Ok(vec![face])
        }
    }

    fn buffer(w: u32, h: u32) -> Arc<RgbImage> {
        Arc::new(RgbImage::from_pixel(w, h, Rgb([0, 0, 0])))
    }

    #[test]
    fn rejects_odd_rotations() {
        let err = InputImage::from_buffer(buffer(2, 2), 45).unwrap_err();
        assert_eq!(err, DetectionError::InvalidRotation(45));
    }

    #[test]
    fn quarter_rotation_swaps_dimensions() {
        let image = InputImage::from_buffer(buffer(4, 2), 90).unwrap();
        assert_eq!(image.upright().dimensions(), (2, 4));

        let image = InputImage::from_buffer(buffer(4, 2), 180).unwrap();
        assert_eq!(image.upright().dimensions(), (4, 2));
    }

    #[test]
    fn client_answers_with_the_request_generation() {
        let (client, rx, _started, go) = gated_client();
        go.send(()).unwrap();

        let generation = Generation::default().next();
        client
            .submit(generation, InputImage::from_buffer(buffer(8, 6), 90).unwrap())
            .unwrap();

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.generation, generation);
        assert_eq!(event.result.unwrap()[0].bounds.w, 6);
    }

    #[test]
    fn queued_requests_give_way_to_the_newest() {
        let (client, rx, started, go) = gated_client();
        let image = || InputImage::from_buffer(buffer(3, 3), 0).unwrap();

        let first = Generation::default().next();
        client.submit(first, image()).unwrap();
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(client.started_at(first).is_some());

        let mut latest = first;
        for _ in 0..3 {
            latest = latest.next();
            client.submit(latest, image()).unwrap();
        }
        go.send(()).unwrap();
        go.send(()).unwrap();

        let a = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let b = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(a.generation, first);
        assert_eq!(b.generation, latest);
        assert!(client.started_at(latest).is_some());
        assert!(client.started_at(first).is_none());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(started.drain().count(), 1);
    }

    #[test]
    fn options_default_to_accurate_with_everything_on() {
        let options = DetectorOptions::default();
        assert_eq!(options.performance_mode, PerformanceMode::Accurate);
        assert_eq!(options.landmark_mode, LandmarkMode::All);
        assert_eq!(options.classification_mode, ClassificationMode::All);

        let fast = options.with_performance_mode(PerformanceMode::Fast);
        assert_eq!(fast.performance_mode, PerformanceMode::Fast);
    }
}
