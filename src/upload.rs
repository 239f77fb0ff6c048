//! Accepting an uploaded image and staging it for OCR.

use std::{error, fmt, io::BufWriter};

use image::{DynamicImage, ImageFormat};
use tempfile::NamedTempFile;

use crate::{async_utils::io::read_path_or_stdin, prelude::*};

/// File extensions we accept, compared case-insensitively.
const ACCEPTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Why an upload was rejected.
#[derive(Debug)]
pub enum UploadError {
    /// The file could not be read.
    Read(anyhow::Error),

    /// The file name does not have an accepted extension.
    UnsupportedExtension(String),

    /// The contents are not PNG or JPEG.
    UnsupportedContent(Option<String>),

    /// The contents claim to be an image but could not be decoded.
    Decode(image::ImageError),

    /// The temporary copy for OCR could not be written.
    Stage(anyhow::Error),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Read(_) => write!(f, "the file could not be read"),
            UploadError::UnsupportedExtension(ext) => {
                write!(f, "files of type {ext:?} are not accepted (use PNG or JPEG)")
            }
            UploadError::UnsupportedContent(Some(mime_type)) => {
                write!(f, "the file contains {mime_type}, not a PNG or JPEG image")
            }
            UploadError::UnsupportedContent(None) => {
                write!(f, "the file is not a PNG or JPEG image")
            }
            UploadError::Decode(_) => write!(f, "the image data is corrupt"),
            UploadError::Stage(_) => {
                write!(f, "the image could not be prepared for text recognition")
            }
        }
    }
}

impl error::Error for UploadError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            UploadError::Read(err) | UploadError::Stage(err) => {
                let err: &(dyn error::Error + 'static) = err.as_ref();
                Some(err)
            }
            UploadError::Decode(err) => Some(err),
            UploadError::UnsupportedExtension(_) | UploadError::UnsupportedContent(_) => {
                None
            }
        }
    }
}

/// An uploaded image, decoded and ready to display.
pub struct UploadedImage {
    /// A name to show the user.
    pub name: String,

    /// The detected MIME type.
    pub mime_type: &'static str,

    /// The decoded bitmap.
    pub image: DynamicImage,
}

impl fmt::Debug for UploadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedImage")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

impl UploadedImage {
    /// Read and decode an upload from a path, or from standard input if the
    /// path is `-`.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn from_path(path: &Path) -> Result<Self, UploadError> {
        let name = if path == Path::new("-") {
            None
        } else {
            Some(path.display().to_string())
        };
        if let Some(name) = &name {
            check_extension(Path::new(name))?;
        }
        let data = read_path_or_stdin(path).await.map_err(UploadError::Read)?;
        Self::from_bytes(name.unwrap_or_else(|| "stdin".to_owned()), &data)
    }

    /// Decode an upload from raw bytes. The content must be PNG or JPEG,
    /// whatever the name says.
    pub fn from_bytes(name: String, data: &[u8]) -> Result<Self, UploadError> {
        let (mime_type, format) = match infer::get(data).map(|kind| kind.mime_type()) {
            Some("image/png") => ("image/png", ImageFormat::Png),
            Some("image/jpeg") => ("image/jpeg", ImageFormat::Jpeg),
            other => {
                return Err(UploadError::UnsupportedContent(
                    other.map(|mime_type| mime_type.to_owned()),
                ));
            }
        };
        let image = image::load_from_memory_with_format(data, format)
            .map_err(UploadError::Decode)?;
        debug!(
            name = %name,
            mime_type,
            width = image.width(),
            height = image.height(),
            "Decoded upload"
        );
        Ok(Self {
            name,
            mime_type,
            image,
        })
    }

    /// Write the bitmap to a new temporary JPEG file for OCR.
    ///
    /// The file is deleted when the returned [`TemporaryImage`] is dropped.
    #[instrument(level = "debug", skip_all, fields(name = %self.name))]
    pub fn to_temporary_jpeg(&self) -> Result<TemporaryImage, UploadError> {
        let file = tempfile::Builder::new()
            .prefix("ocr-upload-")
            .suffix(".jpg")
            .tempfile()
            .context("cannot create temporary image file")
            .map_err(UploadError::Stage)?;
        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgb8(self.image.to_rgb8());
        let mut writer = BufWriter::new(file);
        rgb.write_to(&mut writer, ImageFormat::Jpeg)
            .context("cannot encode temporary image file")
            .map_err(UploadError::Stage)?;
        let file = writer
            .into_inner()
            .map_err(|err| anyhow!("cannot flush temporary image file: {}", err.error()))
            .map_err(UploadError::Stage)?;
        debug!(path = %file.path().display(), "Wrote temporary image");
        Ok(TemporaryImage { file })
    }
}

/// Reject file names without an accepted image extension.
fn check_extension(path: &Path) -> Result<(), UploadError> {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    if ACCEPTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err(UploadError::UnsupportedExtension(ext))
    }
}

/// A temporary copy of an upload. The file exists exactly as long as this
/// value does.
#[derive(Debug)]
pub struct TemporaryImage {
    file: NamedTempFile,
}

impl TemporaryImage {
    /// Path of the temporary file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use image::{Rgba, RgbaImage};

    use super::*;

    /// Encode a small solid image as PNG.
    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 128]));
        let mut data = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
            .unwrap();
        data
    }

    #[test]
    fn decodes_png() {
        let upload = UploadedImage::from_bytes("white.png".to_owned(), &png_bytes(4, 3))
            .unwrap();
        assert_eq!(upload.mime_type, "image/png");
        assert_eq!((upload.image.width(), upload.image.height()), (4, 3));
    }

    #[test]
    fn rejects_non_image_content() {
        let err = UploadedImage::from_bytes("notes.png".to_owned(), b"just some text")
            .unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedContent(None)));
    }

    #[test]
    fn rejects_other_image_formats() {
        let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
        let err = UploadedImage::from_bytes("anim.png".to_owned(), gif).unwrap_err();
        match err {
            UploadError::UnsupportedContent(Some(mime_type)) => {
                assert_eq!(mime_type, "image/gif")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_png() {
        let data = png_bytes(16, 16);
        let err =
            UploadedImage::from_bytes("broken.png".to_owned(), &data[..data.len() / 2])
                .unwrap_err();
        assert!(matches!(err, UploadError::Decode(_)));
        assert_eq!(err.to_string(), "the image data is corrupt");
    }

    #[test]
    fn extension_filter_matches_accepted_types() {
        assert!(check_extension(Path::new("scan.png")).is_ok());
        assert!(check_extension(Path::new("scan.JPG")).is_ok());
        assert!(check_extension(Path::new("scan.jpeg")).is_ok());
        assert!(matches!(
            check_extension(Path::new("scan.gif")),
            Err(UploadError::UnsupportedExtension(ext)) if ext == "gif"
        ));
        assert!(check_extension(Path::new("scan")).is_err());
    }

    #[test]
    fn other_jpeg_extensions_are_rejected() {
        for name in ["scan.jpe", "scan.jfif", "scan.pjpeg", "scan.apng"] {
            assert!(
                matches!(
                    check_extension(Path::new(name)),
                    Err(UploadError::UnsupportedExtension(_))
                ),
                "{name} should be rejected"
            );
        }
        assert!(check_extension(Path::new("SCAN.PNG")).is_ok());
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected_before_reading() {
        // The file does not exist, so reading it would give a different error.
        let err = UploadedImage::from_path(Path::new("/nonexistent/scan.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedExtension(_)));
    }

    #[test]
    fn temporary_jpeg_is_unique_and_removed_on_drop() {
        let upload =
            UploadedImage::from_bytes("white.png".to_owned(), &png_bytes(8, 8)).unwrap();
        let first = upload.to_temporary_jpeg().unwrap();
        let second = upload.to_temporary_jpeg().unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(first.path().extension().unwrap(), "jpg");

        let data = std::fs::read(first.path()).unwrap();
        assert_eq!(infer::get(&data).unwrap().mime_type(), "image/jpeg");

        let path = first.path().to_owned();
        drop(first);
        assert!(!path.exists());
        assert!(second.path().exists());
    }
}
