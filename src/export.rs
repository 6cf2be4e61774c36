//! Loading and saving image files.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::error::{Error, Result};

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        ),
        None => false,
    }
}

/// Decode an image file into an RGBA buffer.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded.
pub fn load_rgba(path: &Path) -> Result<RgbaImage> {
    Ok(image::open(path)?.to_rgba8())
}

/// Encode an image as lossless PNG bytes at full resolution.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// Save an image, choosing the encoder from the file extension.
///
/// JPEG output drops the alpha channel and is written at quality 100.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbaImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
            let file = std::fs::File::create(path)?;
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, 100);
            encoder.encode_image(&rgb)?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp => {
            img.save_with_format(path, format)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

/// Generate a default output path from an input path.
///
/// Example: `"photo.jpg"` becomes `"photo_cleaned.png"`. Output is always PNG
/// so edits are stored losslessly.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_cleaned.png"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn default_output_path_appends_cleaned_suffix() {
        let p = default_output_path(Path::new("/tmp/photo.jpg"));
        assert_eq!(p, PathBuf::from("/tmp/photo_cleaned.png"));

        let p = default_output_path(Path::new("image.png"));
        assert_eq!(p.file_name().unwrap().to_str().unwrap(), "image_cleaned.png");
    }

    #[test]
    fn is_supported_image_accepts_common_formats() {
        assert!(is_supported_image(Path::new("photo.jpg")));
        assert!(is_supported_image(Path::new("photo.JPEG")));
        assert!(is_supported_image(Path::new("photo.png")));
        assert!(is_supported_image(Path::new("photo.webp")));
        assert!(is_supported_image(Path::new("photo.bmp")));
    }

    #[test]
    fn is_supported_image_rejects_unsupported_formats() {
        assert!(!is_supported_image(Path::new("photo.gif")));
        assert!(!is_supported_image(Path::new("photo.txt")));
        assert!(!is_supported_image(Path::new("photo")));
    }

    #[test]
    fn png_export_is_lossless() {
        let img = RgbaImage::from_fn(7, 5, |x, y| {
            Rgba([
                u8::try_from(x * 30).unwrap_or(0),
                u8::try_from(y * 40).unwrap_or(0),
                9,
                200,
            ])
        });
        let bytes = encode_png(&img).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded, img);
    }

    #[test]
    fn saving_an_unknown_extension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_image(&RgbaImage::new(2, 2), &dir.path().join("x.unknown")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }
}
