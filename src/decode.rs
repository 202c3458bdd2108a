//! Turns user-supplied file bytes into an upright RGBA8 image.
//!
//! Decoding runs on the blocking pool so the caller's task only suspends at
//! the `.await`. EXIF orientation is applied when present.
use std::io::Cursor;
use std::sync::Arc;

use image::{ImageReader, RgbaImage, imageops};
use tracing::debug;

use crate::error::DecodeError;

/// Decoded pixels of known, non-zero size. Consumed by the compositor and
/// dropped right after, so the decode buffer never outlives one apply.
#[derive(Debug, Clone)]
pub struct ImageSource {
    image: RgbaImage,
}

impl ImageSource {
    /// Wrap already-decoded pixels.
    ///
    /// # Errors
    /// Returns [`DecodeError::ZeroDimension`] if either dimension is zero.
    pub fn from_rgba(image: RgbaImage) -> Result<Self, DecodeError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::ZeroDimension { width, height });
        }
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.image
    }
}

/// Decode `bytes` synchronously.
pub fn decode_image(bytes: &[u8]) -> Result<ImageSource, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| DecodeError::Malformed(image::ImageError::IoError(err)))?
        .decode()
        .map_err(DecodeError::Malformed)?;
    let img = img.to_rgba8();

    let img = match read_orientation(bytes) {
        Some(orientation) => apply_orientation(img, orientation),
        None => img,
    };
    debug!(width = img.width(), height = img.height(), "decoded image");
    ImageSource::from_rgba(img)
}

/// Decode on the blocking pool.
pub async fn decode_image_async(bytes: Arc<[u8]>) -> Result<ImageSource, DecodeError> {
    tokio::task::spawn_blocking(move || decode_image(&bytes))
        .await
        .map_err(DecodeError::Interrupted)?
}

fn read_orientation(bytes: &[u8]) -> Option<u32> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)?;
    debug!(orientation, "exif orientation");
    Some(orientation)
}

fn apply_orientation(img: RgbaImage, orientation: u32) -> RgbaImage {
    match orientation {
        2 => imageops::flip_horizontal(&img),
        3 => imageops::rotate180(&img),
        4 => imageops::flip_vertical(&img),
        // transpose
        5 => imageops::flip_horizontal(&imageops::rotate90(&img)),
        6 => imageops::rotate90(&img),
        // transverse
        7 => imageops::flip_horizontal(&imageops::rotate270(&img)),
        8 => imageops::rotate270(&img),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use image::{ImageFormat, Rgba};

    // JPEG 2x1 with EXIF orientation 6 (rotate 90 CW), base64 encoded
    const ORIENT6_JPEG: &str = concat!(
        "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
        "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
    );

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([40, 80, 120, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn applies_orientation_six() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ORIENT6_JPEG)
            .unwrap();
        let img = decode_image(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (1, 2));
    }

    #[test]
    fn decodes_png_without_exif() {
        let img = decode_image(&png_bytes(3, 5)).unwrap();
        assert_eq!((img.width(), img.height()), (3, 5));
        assert_eq!(img.as_rgba().get_pixel(1, 1).0, [40, 80, 120, 255]);
    }

    #[test]
    fn rejects_empty_and_corrupt_input() {
        assert!(matches!(decode_image(&[]), Err(DecodeError::Empty)));
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(DecodeError::Malformed(_))
        ));
        let mut truncated = png_bytes(4, 4);
        truncated.truncate(24);
        assert!(matches!(
            decode_image(&truncated),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn zero_sized_buffers_are_refused() {
        let err = ImageSource::from_rgba(RgbaImage::new(0, 7)).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::ZeroDimension {
                width: 0,
                height: 7
            }
        ));
    }

    #[tokio::test]
    async fn async_decode_matches_sync() {
        let bytes: Arc<[u8]> = png_bytes(6, 2).into();
        let img = decode_image_async(bytes).await.unwrap();
        assert_eq!((img.width(), img.height()), (6, 2));
    }
}
