#![warn(unused_extern_crates)]
use anyhow::{Error, Result};
use clap::Parser;
use faceprobe::acquisition::webcam::WebcamCapture;
use faceprobe::acquisition::{CaptureDevice, CaptureOutcome, CaptureStore, FileCapture};
use faceprobe::cycle::{CaptureSession, SessionSettings};
use faceprobe::detection::{
    ClassificationMode, DetectionEvent, DetectorOptions, LandmarkMode, OnnxFaceService,
    PerformanceMode,
};
use faceprobe::permission::{CameraPermission, PermissionGate, Preapproved};
use faceprobe::report::{ConsoleNotifier, Notifier, ReportMessage};
use num_cpus::get as get_cpu_count;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const PACKAGE: &str = "faceprobe";
const INTERACTIVE_PROMPT: &str = "Press Enter to capture a photo, q to quit";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CmdArgs {
    /// Read the photo from this file instead of the camera
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Camera index to capture from. Uses the last camera found if unset
    #[arg(long)]
    camera: Option<u32>,

    /// Directory capture files are created in
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Directory holding the ONNX face models
    #[arg(short, long, value_name = "DIR", default_value = "./models")]
    models: PathBuf,

    /// Trade accuracy for speed when merging overlapping detections
    #[arg(long, value_enum, default_value_t = PerformanceMode::Accurate)]
    performance: PerformanceMode,

    /// Skip eye, nose, mouth and ear positions
    #[arg(long)]
    no_landmarks: bool,

    /// Skip smile and eye-open probabilities
    #[arg(long)]
    no_classification: bool,

    /// Give up on face detection after this many ms (0 waits forever)
    #[arg(long, default_value = "10000")]
    detection_timeout_ms: u64,

    /// Clockwise rotation (0, 90, 180, 270) that makes the photo upright
    #[arg(long, default_value = "0")]
    rotation: u32,

    /// Write the photo with detected faces drawn on it to this path
    #[arg(short, long)]
    preview: Option<PathBuf>,

    /// Keep running: capture on every Enter, quit on "q"
    #[arg(long)]
    interactive: bool,

    /// Webcam frames to drop before taking the still
    #[arg(long, default_value = "5")]
    warmup_frames: usize,

    /// Max threads for model inference
    #[arg(short = 't', long)]
    max_threads: Option<usize>,
}

fn main() -> Result<ExitCode> {
    let filter = EnvFilter::from_default_env();
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let args = CmdArgs::parse();

    let total_threads = get_cpu_count();
    let threads = args.max_threads.unwrap_or(total_threads).min(total_threads);

    let cache_dir = match &args.cache_dir {
        Some(dir) => dir.clone(),
        None => {
            let dir = std::env::temp_dir().join(PACKAGE);
            std::fs::create_dir_all(&dir)?;
            dir
        }
    };
    let store = CaptureStore::new(cache_dir, PACKAGE);
    debug!("Capture files go to {:?}", store.dir());

    let options = DetectorOptions::default()
        .with_performance_mode(args.performance)
        .with_landmark_mode(if args.no_landmarks {
            LandmarkMode::None
        } else {
            LandmarkMode::All
        })
        .with_classification_mode(if args.no_classification {
            ClassificationMode::None
        } else {
            ClassificationMode::All
        });
    let service = OnnxFaceService::new(&args.models, options, threads)?;

    let settings = SessionSettings {
        detection_timeout: (args.detection_timeout_ms > 0)
            .then(|| Duration::from_millis(args.detection_timeout_ms)),
        rotation_degrees: args.rotation,
        preview_path: args.preview.clone(),
    };
    let notifier = ConsoleNotifier::stdout();

    match &args.input {
        Some(input) => {
            let session = CaptureSession::new(
                store,
                Preapproved,
                FileCapture::new(input),
                service,
                notifier,
                settings,
            );
            run(session, args.interactive)
        }
        None => {
            debug!("No input specified, capturing from webcam");
            let session = CaptureSession::new(
                store,
                CameraPermission::default(),
                WebcamCapture::new(args.camera).with_warmup_frames(args.warmup_frames),
                service,
                notifier,
                settings,
            );
            run(session, args.interactive)
        }
    }
}

fn run<P, C, N>(mut session: CaptureSession<P, C, N>, interactive: bool) -> Result<ExitCode>
where
    P: PermissionGate,
    C: CaptureDevice,
    N: Notifier,
{
    if interactive {
        interactive_loop(&mut session)?;
        return Ok(ExitCode::SUCCESS);
    }

    // Failures have already been shown as notifications
    let outcome = session.request_capture().and_then(|outcome| match outcome {
        CaptureOutcome::Success => session.wait_for_report().map(|_| ()),
        CaptureOutcome::Cancelled => Ok(()),
    });
    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            debug!("Capture ended with {e:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

enum Action {
    Command(Option<String>),
    Detection(Option<DetectionEvent>),
    Tick,
}

fn interactive_loop<P, C, N>(session: &mut CaptureSession<P, C, N>) -> Result<()>
where
    P: PermissionGate,
    C: CaptureDevice,
    N: Notifier,
{
    let commands = spawn_stdin_reader();
    let events = session.events().clone();
    session.notify(&ReportMessage::short(INTERACTIVE_PROMPT));

    loop {
        let selector = flume::Selector::new()
            .recv(&commands, |line| Action::Command(line.ok()))
            .recv(&events, |event| Action::Detection(event.ok()));
        let action = match session.time_remaining() {
            Some(remaining) => selector.wait_timeout(remaining).unwrap_or(Action::Tick),
            None => selector.wait(),
        };

        match action {
            Action::Command(None) => break,
            Action::Command(Some(line)) => match line.trim() {
                "q" | "quit" => break,
                _ => {
                    if let Err(e) = session.request_capture() {
                        debug!("Capture ended with {e:?}");
                    }
                }
            },
            Action::Detection(Some(event)) => {
                session.handle_event(event);
            }
            Action::Detection(None) => return Err(Error::msg("Face detection worker stopped")),
            Action::Tick => {
                session.expire_if_overdue();
            }
        }
    }

    Ok(())
}

fn spawn_stdin_reader() -> flume::Receiver<String> {
    let (tx, rx) = flume::unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read stdin: {e:?}");
                    break;
                }
            }
        }
    });
    rx
}
