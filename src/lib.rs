//! Take a photo, find the faces in it and report how much each one is
//! smiling and whether its eyes are open.
//!
//! One capture runs through [`cycle::CaptureSession`]: the camera
//! permission is checked, the camera fills a fresh capture file, the file
//! is decoded, the pixels go to the face engine on a worker thread and the
//! answer comes back as a [`report::ReportMessage`].

pub mod acquisition;
pub mod cycle;
pub mod decode;
pub mod detection;
pub mod error;
pub mod permission;
pub mod preview;
pub mod report;
pub mod shapes;

pub use error::CycleError;
