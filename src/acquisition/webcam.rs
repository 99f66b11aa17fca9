use anyhow::{Error, Result};
use image::{ImageFormat, RgbImage};
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType},
    Camera,
};
use tracing::{debug, span, warn, Level};

use super::{CaptureDevice, CaptureOutcome, ShareHandle};

/// Frames dropped after opening the stream while exposure settles.
const DEFAULT_WARMUP_FRAMES: usize = 5;

/// Takes a single still from a webcam.
pub struct WebcamCapture {
    index: Option<u32>,
    warmup_frames: usize,
}

impl WebcamCapture {
    /// `index` picks a camera; `None` uses the last one enumerated.
    pub fn new(index: Option<u32>) -> WebcamCapture {
        WebcamCapture {
            index,
            warmup_frames: DEFAULT_WARMUP_FRAMES,
        }
    }

    pub fn with_warmup_frames(mut self, frames: usize) -> WebcamCapture {
        self.warmup_frames = frames;
        self
    }

    fn open(&self) -> Result<Camera> {
        let index = match self.index {
            Some(i) => CameraIndex::Index(i),
            None => {
                let cameras = query(ApiBackend::Auto)?;
                cameras
                    .iter()
                    .for_each(|cam| debug!("Found camera: {:?}", cam));
                cameras
                    .last()
                    .map(|cam| cam.index().clone())
                    .ok_or_else(|| Error::msg("No camera found"))?
            }
        };

        let mut camera = Camera::new(
            index,
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution),
        )?;
        camera.open_stream()?;
        Ok(camera)
    }

    fn grab(&self, camera: &mut Camera) -> Result<RgbImage> {
        for _ in 0..self.warmup_frames {
            if let Err(e) = camera.frame() {
                warn!("Dropped warm-up frame: {e:?}");
            }
        }

        let frame = camera.frame()?;
        Ok(frame.decode_image::<RgbFormat>()?)
    }
}

impl CaptureDevice for WebcamCapture {
    fn capture(&mut self, handle: &ShareHandle) -> Result<CaptureOutcome> {
        let span = span!(Level::DEBUG, "webcam_capture");
        let _guard = span.enter();

        let Some(dest) = handle.path() else {
            return Ok(CaptureOutcome::Cancelled);
        };

        let mut camera = self.open()?;
        let still = self.grab(&mut camera);
        if let Err(e) = camera.stop_stream() {
            warn!("Failed to stop camera stream: {e:?}");
        }
        let still = still?;

        debug!(
            "Captured {}x{} still into {}",
            still.width(),
            still.height(),
            handle.uri()
        );
        still.save_with_format(dest, ImageFormat::Jpeg)?;

        Ok(CaptureOutcome::Success)
    }
}
