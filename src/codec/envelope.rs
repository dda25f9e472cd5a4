//! Non-pixel metadata carried from source to output

use exif::{In, Reader, Tag};
use img_parts::{Bytes, DynImage, ImageEXIF, ImageICC};
use tracing::{debug, trace};

/// EXIF and ICC payloads lifted from a source container.
///
/// The EXIF payload is the raw TIFF structure (no `Exif\0\0` prefix), so it
/// can be written back into either a JPEG APP1 segment or a PNG `eXIf` chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataEnvelope {
    pub exif: Option<Bytes>,
    pub icc: Option<Bytes>,
}

impl MetadataEnvelope {
    /// Lift metadata out of an encoded image.
    ///
    /// Containers img-parts doesn't understand (or can't parse) yield an
    /// empty envelope; the output is then written without metadata.
    pub fn capture(bytes: &Bytes) -> Self {
        match DynImage::from_bytes(bytes.clone()) {
            Ok(Some(image)) => {
                let envelope = Self {
                    exif: image.exif(),
                    icc: image.icc_profile(),
                };
                trace!(
                    exif = envelope.exif.as_ref().map(Bytes::len),
                    icc = envelope.icc.as_ref().map(Bytes::len),
                    "Captured metadata envelope"
                );
                envelope
            }
            Ok(None) => {
                debug!("Container not recognized, no metadata envelope");
                Self::default()
            }
            Err(e) => {
                debug!(error = %e, "Failed to parse container for metadata");
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exif.is_none() && self.icc.is_none()
    }

    /// EXIF orientation (1-8), if the payload carries one
    pub fn orientation(&self) -> Option<u32> {
        let exif = self.exif.as_ref()?;
        let parsed = Reader::new().read_raw(exif.to_vec()).ok()?;
        parsed
            .get_field(Tag::Orientation, In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
    }

    /// Write this envelope into freshly encoded image bytes.
    ///
    /// Returns the input unchanged when there is nothing to attach or the
    /// encoded container can't carry it.
    pub fn attach(&self, encoded: Vec<u8>) -> Vec<u8> {
        if self.is_empty() {
            return encoded;
        }

        match DynImage::from_bytes(Bytes::from(encoded.clone())) {
            Ok(Some(mut image)) => {
                if self.exif.is_some() {
                    image.set_exif(self.exif.clone());
                }
                if self.icc.is_some() {
                    image.set_icc_profile(self.icc.clone());
                }
                image.encoder().bytes().to_vec()
            }
            Ok(None) | Err(_) => {
                debug!("Encoded container cannot carry metadata, writing without it");
                encoded
            }
        }
    }
}

/// Raw TIFF payload of a HEIF `Exif` item.
///
/// The item opens with a big-endian offset to the TIFF header, which some
/// writers still precede with `Exif\0\0`.
pub fn heif_exif_payload(item: &[u8]) -> Option<Bytes> {
    let (offset, rest) = item.split_first_chunk::<4>()?;
    let tiff = rest.get(u32::from_be_bytes(*offset) as usize..)?;
    let tiff = tiff.strip_prefix(b"Exif\0\0").unwrap_or(tiff);
    if tiff.starts_with(b"II*\0") || tiff.starts_with(b"MM\0*") {
        Some(Bytes::copy_from_slice(tiff))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{exif_payload, jpeg_with_exif, png_with_exif};

    #[test]
    fn test_capture_jpeg_orientation() {
        let jpeg = jpeg_with_exif(8, 8, Some(exif_payload(Some(6), &[])));
        let envelope = MetadataEnvelope::capture(&Bytes::from(jpeg));

        assert!(envelope.exif.is_some());
        assert_eq!(envelope.orientation(), Some(6));
    }

    #[test]
    fn test_capture_png_orientation() {
        let png = png_with_exif(8, 8, Some(exif_payload(Some(3), &[])));
        let envelope = MetadataEnvelope::capture(&Bytes::from(png));
        assert_eq!(envelope.orientation(), Some(3));
    }

    #[test]
    fn test_no_metadata_is_empty() {
        let envelope = MetadataEnvelope::capture(&Bytes::from(jpeg_with_exif(8, 8, None)));
        assert!(envelope.exif.is_none());
        assert_eq!(envelope.orientation(), None);

        let junk = MetadataEnvelope::capture(&Bytes::from_static(b"not an image at all"));
        assert!(junk.is_empty());
    }

    #[test]
    fn test_attach_moves_payload_between_files() {
        let payload = exif_payload(Some(8), &[]);
        let source = MetadataEnvelope::capture(&Bytes::from(jpeg_with_exif(
            8,
            8,
            Some(payload.clone()),
        )));

        let target = source.attach(jpeg_with_exif(4, 4, None));
        let round = MetadataEnvelope::capture(&Bytes::from(target));
        assert_eq!(round.exif.as_deref(), Some(payload.as_slice()));
        assert_eq!(round.orientation(), Some(8));
    }

    #[test]
    fn test_attach_empty_is_identity() {
        let bytes = jpeg_with_exif(4, 4, None);
        assert_eq!(MetadataEnvelope::default().attach(bytes.clone()), bytes);
    }

    #[test]
    fn test_heif_exif_item() {
        let tiff = exif_payload(Some(6), &[]);

        let mut plain = vec![0, 0, 0, 0];
        plain.extend_from_slice(&tiff);
        let payload = heif_exif_payload(&plain).unwrap();
        assert_eq!(payload.as_ref(), tiff.as_slice());

        // Offset pointing past an Exif\0\0 marker, and the marker left in place
        let mut marked = vec![0, 0, 0, 6];
        marked.extend_from_slice(b"Exif\0\0");
        marked.extend_from_slice(&tiff);
        assert_eq!(heif_exif_payload(&marked).unwrap().as_ref(), tiff.as_slice());
        marked[3] = 0;
        assert_eq!(heif_exif_payload(&marked).unwrap().as_ref(), tiff.as_slice());

        let envelope = MetadataEnvelope {
            exif: heif_exif_payload(&plain),
            icc: None,
        };
        assert_eq!(envelope.orientation(), Some(6));

        assert!(heif_exif_payload(&[0, 0]).is_none());
        assert!(heif_exif_payload(&[0, 0, 0, 99, b'I']).is_none());
        assert!(heif_exif_payload(b"\0\0\0\0garbage").is_none());
    }
}
