use image::{ImageReader, RgbImage};
use tracing::{debug, span, warn, Level};

use crate::acquisition::ImageReference;

pub type PixelBuffer = RgbImage;

/// Loads the image behind `reference`.
///
/// An empty reference, a missing file or undecodable bytes all yield `None`;
/// the cause is logged rather than raised.
pub fn decode(reference: &ImageReference) -> Option<PixelBuffer> {
    let span = span!(Level::DEBUG, "decode");
    let _guard = span.enter();

    let Some(path) = reference.path() else {
        warn!("No image reference to decode");
        return None;
    };

    // Format is sniffed from the bytes; capture files always end in .jpg
    let reader = match ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
        Ok(reader) => reader,
        Err(e) => {
            warn!("Error opening captured image {path:?}: {e}");
            return None;
        }
    };

    match reader.decode() {
        Ok(img) => {
            let img = img.into_rgb8();
            debug!("Decoded {}x{} image from {path:?}", img.width(), img.height());
            Some(img)
        }
        Err(e) => {
            warn!("Error converting {path:?} to a pixel buffer: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn empty_reference_yields_nothing() {
        assert!(decode(&ImageReference::Empty).is_none());
    }

    #[test]
    fn missing_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let reference = ImageReference::File(dir.path().join("missing.jpg"));
        assert!(decode(&reference).is_none());
    }

    #[test]
    fn garbage_and_empty_files_yield_nothing() {
        let dir = tempfile::tempdir().unwrap();

        let garbage = dir.path().join("garbage.jpg");
        std::fs::write(&garbage, b"definitely not an image").unwrap();
        assert!(decode(&ImageReference::File(garbage)).is_none());

        let empty = dir.path().join("empty.jpg");
        std::fs::write(&empty, b"").unwrap();
        assert!(decode(&ImageReference::File(empty)).is_none());
    }

    #[test]
    fn png_behind_jpg_extension_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        RgbImage::from_pixel(7, 5, Rgb([10, 200, 30]))
            .save_with_format(&path, image::ImageFormat::Png)
            .unwrap();

        let img = decode(&ImageReference::File(path)).unwrap();
        assert_eq!(img.dimensions(), (7, 5));
        assert_eq!(img.get_pixel(3, 2), &Rgb([10, 200, 30]));
    }
}
