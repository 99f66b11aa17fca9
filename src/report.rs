use crossterm::queue;
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use std::io::Write;
use tracing::{info, warn};

use crate::detection::DetectedFace;

pub const NO_FACE_MESSAGE: &str = "No Face detected";
/// Printed in place of a probability the engine did not provide.
pub const ABSENT_MARKER: &str = "absent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationDuration {
    Short,
    Long,
}

/// Text for a transient notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMessage {
    pub text: String,
    pub duration: NotificationDuration,
}

impl ReportMessage {
    pub fn short(text: impl Into<String>) -> ReportMessage {
        ReportMessage {
            text: text.into(),
            duration: NotificationDuration::Short,
        }
    }

    pub fn long(text: impl Into<String>) -> ReportMessage {
        ReportMessage {
            text: text.into(),
            duration: NotificationDuration::Long,
        }
    }
}

/// Formats one block per face, numbered from 1:
///
/// ```text
/// Face Number 1
/// Smile : 92.0
///  Left Eye Open 80.0
///  Right Eye Open 70.0
/// ```
pub fn build_report(faces: &[DetectedFace]) -> ReportMessage {
    if faces.is_empty() {
        return ReportMessage::long(NO_FACE_MESSAGE);
    }

    let blocks: Vec<String> = faces
        .iter()
        .enumerate()
        .map(|(i, face)| {
            format!(
                "Face Number {}\nSmile : {}\n Left Eye Open {}\n Right Eye Open {}",
                i + 1,
                percent(face.smiling_probability),
                percent(face.left_eye_open_probability),
                percent(face.right_eye_open_probability),
            )
        })
        .collect();

    ReportMessage::long(blocks.join("\n"))
}

fn percent(probability: Option<f32>) -> String {
    match probability {
        None => ABSENT_MARKER.to_string(),
        Some(p) => {
            let value = p * 100.;
            if value.fract() == 0. {
                format!("{value:.1}")
            } else {
                format!("{value}")
            }
        }
    }
}

/// Surface for transient messages.
pub trait Notifier {
    fn notify(&mut self, message: &ReportMessage);
}

/// Writes each notification to a terminal, short ones dimmed and long ones
/// in bold.
pub struct ConsoleNotifier<W: Write> {
    out: W,
}

impl ConsoleNotifier<std::io::Stdout> {
    pub fn stdout() -> Self {
        ConsoleNotifier {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write> ConsoleNotifier<W> {
    pub fn new(out: W) -> Self {
        ConsoleNotifier { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, message: &ReportMessage) -> std::io::Result<()> {
        let (color, attribute) = match message.duration {
            NotificationDuration::Short => (Color::DarkGrey, Attribute::Dim),
            NotificationDuration::Long => (Color::Cyan, Attribute::Bold),
        };

        queue!(
            self.out,
            SetForegroundColor(color),
            SetAttribute(attribute)
        )?;
        for line in message.text.lines() {
            queue!(self.out, Print(line), Print("\n"))?;
        }
        queue!(self.out, SetAttribute(Attribute::Reset), ResetColor)?;
        self.out.flush()
    }
}

impl<W: Write> Notifier for ConsoleNotifier<W> {
    fn notify(&mut self, message: &ReportMessage) {
        info!("Notification: {:?}", message.text);
        if let Err(e) = self.write(message) {
            warn!("Failed to show notification: {e:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(smile: Option<f32>, left: Option<f32>, right: Option<f32>) -> DetectedFace {
        DetectedFace {
            smiling_probability: smile,
            left_eye_open_probability: left,
            right_eye_open_probability: right,
            ..Default::default()
        }
    }

    #[test]
    fn no_faces() {
        let report = build_report(&[]);
        assert_eq!(report.text, "No Face detected");
        assert_eq!(report.duration, NotificationDuration::Long);
    }

    #[test]
    fn single_face_block() {
        let report = build_report(&[face(Some(0.92), Some(0.8), Some(0.7))]);
        assert_eq!(
            report.text,
            "Face Number 1\nSmile : 92.0\n Left Eye Open 80.0\n Right Eye Open 70.0"
        );
    }

    #[test]
    fn every_face_gets_a_block() {
        let report = build_report(&[
            face(Some(0.5), Some(0.25), Some(1.)),
            face(Some(0.125), None, Some(0.)),
        ]);

        assert_eq!(
            report.text,
            "Face Number 1\nSmile : 50.0\n Left Eye Open 25.0\n Right Eye Open 100.0\n\
             Face Number 2\nSmile : 12.5\n Left Eye Open absent\n Right Eye Open 0.0"
        );
    }

    #[test]
    fn absent_is_not_zero() {
        let report = build_report(&[face(None, None, None)]);
        assert!(report.text.contains("Smile : absent"));
        assert!(!report.text.contains("Smile : 0"));
    }

    #[test]
    fn console_notifier_prints_every_line() {
        let mut notifier = ConsoleNotifier::new(Vec::new());
        notifier.notify(&ReportMessage::long("Face Number 1\nSmile : 92.0"));
        notifier.notify(&ReportMessage::short("Permission Granted"));

        let out = String::from_utf8(notifier.into_inner()).unwrap();
        assert!(out.contains("Face Number 1\n"));
        assert!(out.contains("Smile : 92.0\n"));
        assert!(out.contains("Permission Granted\n"));
    }
}
