//! HEIC/HEIF decoding through libheif

use super::MetadataEnvelope;
use super::envelope::heif_exif_payload;
use image::{DynamicImage, RgbImage};
use img_parts::Bytes;
use libheif_rs::{ColorSpace, DecodingOptions, HeifContext, LibHeif, RgbChroma};
use tracing::trace;

/// Decode the primary image and lift its EXIF item and ICC profile.
///
/// `irot`/`imir` transforms are not applied, matching how JPEG and PNG
/// sources are handled: pixels stay in stored orientation and the EXIF
/// orientation tag is carried as is.
pub(super) fn decode(bytes: &[u8]) -> Result<(DynamicImage, MetadataEnvelope), String> {
    let lib = LibHeif::new();
    let context = HeifContext::read_from_bytes(bytes).map_err(|e| e.to_string())?;
    let handle = context.primary_image_handle().map_err(|e| e.to_string())?;

    let mut options = DecodingOptions::new();
    if let Some(options) = options.as_mut() {
        options.set_ignore_transformations(true);
    }
    let image = lib
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), options)
        .map_err(|e| e.to_string())?;

    let planes = image.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| "decoded HEIC has no interleaved RGB plane".to_string())?;
    let (width, height) = (plane.width, plane.height);
    let row = width as usize * 3;

    let mut data = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * plane.stride;
        let line = plane
            .data
            .get(start..start + row)
            .ok_or_else(|| format!("HEIC plane row {} is truncated", y))?;
        data.extend_from_slice(line);
    }
    let raster = RgbImage::from_raw(width, height, data)
        .ok_or_else(|| "HEIC plane size mismatch".to_string())?;

    let exif = handle
        .metadata_block_ids(b"Exif")
        .into_iter()
        .filter_map(|id| handle.metadata(id).ok())
        .find_map(|item| heif_exif_payload(&item));
    let icc = handle.color_profile_raw().map(|profile| Bytes::from(profile.data));
    trace!(width, height, exif = exif.is_some(), icc = icc.is_some(), "Decoded HEIC");

    Ok((DynamicImage::ImageRgb8(raster), MetadataEnvelope { exif, icc }))
}
