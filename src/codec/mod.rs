//! Image decode/encode with metadata carry-over
//!
//! The output format follows the source file's extension, except that HEIC
//! sources are written as JPEG. Content is only sniffed when decoding with
//! the extension hint fails.

pub mod envelope;
#[cfg(feature = "heic")]
mod heic;

use crate::error::{Error, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageFormat};
use img_parts::Bytes;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

pub use envelope::MetadataEnvelope;

/// Target formats, chosen by source extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Heic,
}

impl OutputFormat {
    /// Map a file extension to a format; unknown extensions become JPEG
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "png" => OutputFormat::Png,
            "heic" | "heif" => OutputFormat::Heic,
            _ => OutputFormat::Jpeg,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(OutputFormat::Jpeg)
    }

    /// Canonical file extension
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Heic => "heic",
        }
    }

    /// Format an output is written in for a source of this format.
    ///
    /// There is no HEIC encoder, so HEIC sources become JPEG.
    pub fn written_as(&self) -> Self {
        match self {
            OutputFormat::Heic => OutputFormat::Jpeg,
            other => *other,
        }
    }

    fn image_format(&self) -> Option<ImageFormat> {
        match self {
            OutputFormat::Jpeg => Some(ImageFormat::Jpeg),
            OutputFormat::Png => Some(ImageFormat::Png),
            OutputFormat::Heic => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Jpeg => "JPEG",
            OutputFormat::Png => "PNG",
            OutputFormat::Heic => "HEIC",
        };
        f.write_str(name)
    }
}

/// A decoded source: pixels plus everything needed to write it back
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub raster: DynamicImage,
    pub envelope: MetadataEnvelope,
    pub format: OutputFormat,
}

/// Read and decode the file at `path`, hinting the decoder by extension
pub fn decode_file(path: &Path) -> Result<DecodedImage> {
    let bytes = fs::read(path).map_err(|e| Error::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    decode(Bytes::from(bytes), OutputFormat::from_path(path), path)
}

/// Decode image bytes. `origin` only labels errors.
///
/// The returned [`DecodedImage::format`] is the format the output will be
/// written in, see [`OutputFormat::written_as`].
pub fn decode(bytes: Bytes, hint: OutputFormat, origin: &Path) -> Result<DecodedImage> {
    let decode_err = |message: String| Error::Decode {
        path: origin.to_path_buf(),
        message,
    };

    let hinted = match hint.image_format() {
        Some(format) => image::load_from_memory_with_format(&bytes, format)
            .map(|raster| (raster, MetadataEnvelope::capture(&bytes)))
            .map_err(|e| e.to_string()),
        None => decode_heif(&bytes, origin),
    };

    let (raster, envelope) = match hinted {
        Ok(decoded) => decoded,
        Err(hint_error) => {
            // Misnamed files still decode if the content is a known format
            let Ok(sniffed) = image::guess_format(&bytes) else {
                return Err(decode_err(hint_error));
            };
            debug!(?origin, ?sniffed, %hint_error, "Extension hint failed, using sniffed format");
            let raster = image::load_from_memory_with_format(&bytes, sniffed)
                .map_err(|e| decode_err(e.to_string()))?;
            (raster, MetadataEnvelope::capture(&bytes))
        }
    };

    Ok(DecodedImage {
        raster,
        envelope,
        format: hint.written_as(),
    })
}

#[cfg(feature = "heic")]
fn decode_heif(bytes: &[u8], _origin: &Path) -> std::result::Result<(DynamicImage, MetadataEnvelope), String> {
    heic::decode(bytes)
}

#[cfg(not(feature = "heic"))]
fn decode_heif(_bytes: &[u8], origin: &Path) -> std::result::Result<(DynamicImage, MetadataEnvelope), String> {
    debug!(?origin, "HEIC decoding needs the `heic` feature");
    Err("unsupported format: HEIC (built without the `heic` feature)".to_string())
}

/// Encode a raster in `format` and re-attach the source metadata envelope.
///
/// `quality` (1-100) applies to JPEG only. Pixels are never rotated, so the
/// carried orientation tag stays valid.
pub fn encode(
    raster: &DynamicImage,
    envelope: &MetadataEnvelope,
    format: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>> {
    let encode_err = |e: image::ImageError| Error::Encode {
        format: format.to_string(),
        message: e.to_string(),
    };

    let mut buf = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            match raster {
                DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => {
                    raster.write_with_encoder(encoder).map_err(encode_err)?
                }
                // JPEG has no alpha and no 16-bit samples
                other => DynamicImage::ImageRgb8(other.to_rgb8())
                    .write_with_encoder(encoder)
                    .map_err(encode_err)?,
            }
        }
        OutputFormat::Png => {
            let encoder = PngEncoder::new(&mut buf);
            match raster {
                DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
                    DynamicImage::ImageRgba16(raster.to_rgba16())
                        .write_with_encoder(encoder)
                        .map_err(encode_err)?
                }
                _ => raster.write_with_encoder(encoder).map_err(encode_err)?,
            }
        }
        OutputFormat::Heic => {
            return Err(Error::Encode {
                format: format.to_string(),
                message: "no encoder available for this format".to_string(),
            });
        }
    }

    Ok(envelope.attach(buf))
}
