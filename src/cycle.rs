use image::RgbImage;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};

use crate::acquisition::{CaptureDevice, CaptureOutcome, CaptureStore, ImageReference};
use crate::decode::decode;
use crate::detection::{
    DetectionClient, DetectionError, DetectionEvent, FaceDetectionService, FaceList, Generation,
    InputImage,
};
use crate::error::{CycleError, Result};
use crate::permission::{PermissionGate, PermissionOutcome};
use crate::preview::save_preview;
use crate::report::{build_report, Notifier, ReportMessage};

pub const PERMISSION_GRANTED_MESSAGE: &str = "Permission Granted";
pub const CAPTURE_CANCELLED_MESSAGE: &str = "Capture cancelled";

/// Where one capture is in the pipeline. Holding at most one target, pixel
/// buffer and face list at a time is what keeps a new capture from mixing
/// with an old one.
#[derive(Debug, Default)]
pub enum CycleState {
    #[default]
    Idle,
    CaptureRequested {
        generation: Generation,
        target: ImageReference,
    },
    CaptureComplete {
        generation: Generation,
        target: ImageReference,
    },
    Decoding {
        generation: Generation,
        target: ImageReference,
    },
    Detecting {
        generation: Generation,
        target: ImageReference,
        pixels: Arc<RgbImage>,
        submitted: Instant,
    },
    Reported {
        generation: Generation,
        target: ImageReference,
        faces: FaceList,
    },
}

impl CycleState {
    pub fn name(&self) -> &'static str {
        match self {
            CycleState::Idle => "Idle",
            CycleState::CaptureRequested { .. } => "CaptureRequested",
            CycleState::CaptureComplete { .. } => "CaptureComplete",
            CycleState::Decoding { .. } => "Decoding",
            CycleState::Detecting { .. } => "Detecting",
            CycleState::Reported { .. } => "Reported",
        }
    }

    pub fn target(&self) -> Option<&ImageReference> {
        match self {
            CycleState::Idle => None,
            CycleState::CaptureRequested { target, .. }
            | CycleState::CaptureComplete { target, .. }
            | CycleState::Decoding { target, .. }
            | CycleState::Detecting { target, .. }
            | CycleState::Reported { target, .. } => Some(target),
        }
    }

    pub fn faces(&self) -> Option<&FaceList> {
        match self {
            CycleState::Reported { faces, .. } => Some(faces),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// `None` waits on the engine indefinitely.
    pub detection_timeout: Option<Duration>,
    pub rotation_degrees: u32,
    /// Annotated copy of each photo is written here after its report.
    pub preview_path: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            detection_timeout: Some(Duration::from_secs(10)),
            rotation_degrees: 0,
            preview_path: None,
        }
    }
}

/// Owns one capture cycle at a time and drives it from permission through
/// to the report.
///
/// Detection completes on the engine's worker thread; its results come
/// back through `events()` and must be handed to `handle_event` (or
/// awaited with `wait_for_report`) on the thread that owns the session.
pub struct CaptureSession<P, C, N> {
    store: CaptureStore,
    permission: P,
    camera: C,
    notifier: N,
    settings: SessionSettings,
    client: DetectionClient,
    events: flume::Receiver<DetectionEvent>,
    generation: Generation,
    state: CycleState,
}

impl<P, C, N> CaptureSession<P, C, N>
where
    P: PermissionGate,
    C: CaptureDevice,
    N: Notifier,
{
    pub fn new<S>(
        store: CaptureStore,
        permission: P,
        camera: C,
        service: S,
        notifier: N,
        settings: SessionSettings,
    ) -> Self
    where
        S: FaceDetectionService + Send + 'static,
    {
        let (tx, events) = flume::unbounded();
        CaptureSession {
            store,
            permission,
            camera,
            notifier,
            settings,
            client: DetectionClient::spawn(service, tx),
            events,
            generation: Generation::default(),
            state: CycleState::Idle,
        }
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn events(&self) -> &flume::Receiver<DetectionEvent> {
        &self.events
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    /// Shows a message outside of any capture cycle.
    pub fn notify(&mut self, message: &ReportMessage) {
        self.notifier.notify(message);
    }

    /// Starts a new cycle, abandoning whatever the previous one was doing.
    ///
    /// Returns once detection has been submitted; the report arrives
    /// later as a `DetectionEvent`.
    pub fn request_capture(&mut self) -> Result<CaptureOutcome> {
        let span = span!(Level::INFO, "capture_cycle");
        let _guard = span.enter();

        self.generation = self.generation.next();
        self.state = CycleState::Idle;
        info!("Starting capture {}", self.generation);

        let outcome = self.acquire();
        match outcome {
            Ok(CaptureOutcome::Success) => {
                self.advance()?;
                Ok(CaptureOutcome::Success)
            }
            Ok(CaptureOutcome::Cancelled) => {
                self.notifier
                    .notify(&ReportMessage::short(CAPTURE_CANCELLED_MESSAGE));
                self.state = CycleState::Idle;
                Ok(CaptureOutcome::Cancelled)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn acquire(&mut self) -> Result<CaptureOutcome> {
        let target = self.store.create_capture_target()?;
        let handle = self.store.share(&target)?;

        if !self.permission.check() {
            match self.permission.request() {
                PermissionOutcome::Granted => {
                    self.notifier
                        .notify(&ReportMessage::short(PERMISSION_GRANTED_MESSAGE));
                }
                PermissionOutcome::Denied => return Err(CycleError::PermissionDenied),
            }
        }

        self.state = CycleState::CaptureRequested {
            generation: self.generation,
            target: target.clone(),
        };
        debug!("Capturing into {}", handle.uri());

        let outcome = self
            .camera
            .capture(&handle)
            .map_err(CycleError::Capture)?;
        if outcome == CaptureOutcome::Success {
            self.state = CycleState::CaptureComplete {
                generation: self.generation,
                target,
            };
        }

        Ok(outcome)
    }

    /// Moves a completed capture on to detection. Only the
    /// `CaptureComplete` state is consumed, so calling this again (on
    /// every redraw, say) never starts a second detection.
    pub fn advance(&mut self) -> Result<()> {
        let (generation, target) = match mem::take(&mut self.state) {
            CycleState::CaptureComplete { generation, target } => (generation, target),
            other => {
                self.state = other;
                return Ok(());
            }
        };

        self.state = CycleState::Decoding {
            generation,
            target: target.clone(),
        };
        let Some(pixels) = decode(&target) else {
            return Err(self.fail(CycleError::Decode));
        };
        let pixels = Arc::new(pixels);

        let submitted = InputImage::from_buffer(Arc::clone(&pixels), self.settings.rotation_degrees)
            .and_then(|image| self.client.submit(generation, image));
        if let Err(e) = submitted {
            return Err(self.fail(e.into()));
        }

        self.state = CycleState::Detecting {
            generation,
            target,
            pixels,
            submitted: Instant::now(),
        };
        Ok(())
    }

    /// Applies a detection result. Results from superseded captures, or
    /// arriving when nothing is being detected, are dropped and yield `None`.
    pub fn handle_event(&mut self, event: DetectionEvent) -> Option<ReportMessage> {
        let current = match &self.state {
            CycleState::Detecting { generation, .. } => *generation,
            _ => {
                debug!(
                    "Discarding detection {} while {}",
                    event.generation,
                    self.state.name()
                );
                return None;
            }
        };
        if event.generation != current {
            debug!(
                "Discarding stale detection {} (current {current})",
                event.generation
            );
            return None;
        }

        let CycleState::Detecting {
            generation,
            target,
            pixels,
            submitted,
        } = mem::take(&mut self.state)
        else {
            return None;
        };
        debug!("Detection {generation} answered after {:?}", submitted.elapsed());

        match event.result {
            Ok(faces) => {
                let report = build_report(&faces);
                if let Some(dest) = &self.settings.preview_path {
                    if let Err(e) = save_preview(&pixels, &faces, dest) {
                        warn!("Failed to write preview: {e:?}");
                    }
                }
                self.notifier.notify(&report);
                self.state = CycleState::Reported {
                    generation,
                    target,
                    faces,
                };
                Some(report)
            }
            Err(e) => {
                let report = ReportMessage::long(e.to_string());
                self.notifier.notify(&report);
                Some(report)
            }
        }
    }

    /// Time left before the in-flight detection times out, if one is
    /// running and a timeout is set.
    ///
    /// The clock restarts when the worker picks the request up, so time
    /// spent queued behind a superseded capture is not charged twice. That
    /// queueing gets one timeout of its own.
    pub fn time_remaining(&self) -> Option<Duration> {
        match (&self.state, self.settings.detection_timeout) {
            (
                CycleState::Detecting {
                    generation,
                    submitted,
                    ..
                },
                Some(timeout),
            ) => {
                let since = self.client.started_at(*generation).unwrap_or(*submitted);
                Some(timeout.saturating_sub(since.elapsed()))
            }
            _ => None,
        }
    }

    /// Gives up on the in-flight detection if it has run out of time. Its
    /// result, should it still arrive, is discarded.
    pub fn expire_if_overdue(&mut self) -> Option<CycleError> {
        let timeout = self.settings.detection_timeout?;
        if self.time_remaining()? > Duration::ZERO {
            return None;
        }

        let err = self.fail(DetectionError::Timeout(timeout).into());
        self.generation = self.generation.next();
        Some(err)
    }

    /// Blocks until the current detection reports, fails or times out.
    pub fn wait_for_report(&mut self) -> Result<ReportMessage> {
        loop {
            if !matches!(self.state, CycleState::Detecting { .. }) {
                return Err(DetectionError::Disconnected.into());
            }

            let event = match self.time_remaining() {
                Some(remaining) => self.events.recv_timeout(remaining).map_err(|e| match e {
                    flume::RecvTimeoutError::Timeout => None,
                    flume::RecvTimeoutError::Disconnected => Some(DetectionError::Disconnected),
                }),
                None => self
                    .events
                    .recv()
                    .map_err(|_| Some(DetectionError::Disconnected)),
            };

            match event {
                Ok(event) => {
                    let failed = event.result.as_ref().err().cloned();
                    if let Some(report) = self.handle_event(event) {
                        return match failed {
                            Some(e) => Err(e.into()),
                            None => Ok(report),
                        };
                    }
                }
                Err(None) => {
                    if let Some(e) = self.expire_if_overdue() {
                        return Err(e);
                    }
                }
                Err(Some(e)) => return Err(self.fail(e.into())),
            }
        }
    }

    /// Surfaces `err` and ends the cycle.
    fn fail(&mut self, err: CycleError) -> CycleError {
        warn!("Capture {} failed: {err}", self.generation);
        let duration_short = matches!(err, CycleError::PermissionDenied);
        let message = if duration_short {
            ReportMessage::short(err.to_string())
        } else {
            ReportMessage::long(err.to_string())
        };
        self.notifier.notify(&message);
        self.state = CycleState::Idle;
        err
    }
}
