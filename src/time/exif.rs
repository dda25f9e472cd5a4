//! EXIF capture-time extraction

use chrono::{NaiveDate, NaiveDateTime};
use exif::{Exif, In, Reader, Tag, Value};
use std::io::{BufRead, Seek};
use tracing::trace;

/// EXIF tags to try for date extraction, in priority order
pub const DATE_TAGS: &[Tag] = &[
    Tag::DateTimeOriginal,  // When the original image was taken
    Tag::DateTimeDigitized, // When the image was digitized
    Tag::DateTime,          // File modification date/time
];

/// Date/time layouts tried against each tag value, in priority order
const DATETIME_FORMATS: &[&str] = &["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Date-only layout, tried after the full date/time layouts
const DATE_ONLY_FORMAT: &str = "%Y:%m:%d";

/// Read EXIF from an image container and extract the capture time.
///
/// Missing or malformed EXIF yields `None`; only the caller's I/O matters.
pub fn read_exif_time<R: BufRead + Seek>(reader: &mut R) -> Option<(NaiveDateTime, Tag)> {
    match Reader::new().read_from_container(reader) {
        Ok(exif) => extract_exif_time(&exif),
        Err(e) => {
            trace!(error = %e, "No usable EXIF block");
            None
        }
    }
}

/// Extract the capture time from parsed EXIF, trying each tag in priority order
pub fn extract_exif_time(exif: &Exif) -> Option<(NaiveDateTime, Tag)> {
    for tag in DATE_TAGS {
        let Some(field) = exif.get_field(*tag, In::PRIMARY) else {
            continue;
        };
        let Some(raw) = ascii_value(&field.value) else {
            continue;
        };
        if let Some(datetime) = parse_exif_datetime(raw) {
            trace!(?tag, raw, "Found EXIF date");
            return Some((datetime, *tag));
        }
    }

    None
}

/// First ASCII component of an EXIF value, without NUL padding
fn ascii_value(value: &Value) -> Option<&str> {
    match value {
        Value::Ascii(parts) => parts
            .first()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .map(|s| s.trim_matches(char::from(0)).trim()),
        _ => None,
    }
}

/// Parse an EXIF datetime string, e.g. "2024:01:15 14:30:00"
pub fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_matches('"');

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(s, DATE_ONLY_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{exif_payload, jpeg_with_exif};
    use chrono::{Datelike, Timelike};
    use std::io::Cursor;

    #[test]
    fn test_parse_exif_datetime() {
        // Standard EXIF format
        let dt = parse_exif_datetime("2024:01:15 14:30:00").unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 15);
        assert_eq!(dt.hour(), 14);
        assert_eq!(dt.minute(), 30);
        assert_eq!(dt.second(), 0);

        // With quotes
        let dt = parse_exif_datetime("\"2024:01:15 14:30:00\"").unwrap();
        assert_eq!(dt.year(), 2024);

        // Dashed variant
        let dt = parse_exif_datetime("2024-01-15 14:30:00").unwrap();
        assert_eq!(dt.day(), 15);

        // Date only lands on midnight
        let dt = parse_exif_datetime("2024:01:15").unwrap();
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (0, 0, 0));

        // Not in the candidate list
        assert!(parse_exif_datetime("2024/01/15 14:30:00").is_none());
        assert!(parse_exif_datetime("    :  :     :  :  ").is_none());
        assert!(parse_exif_datetime("invalid").is_none());
    }

    #[test]
    fn test_original_wins_over_digitized() {
        let payload = exif_payload(
            Some(1),
            &[
                (Tag::DateTimeOriginal, "2023:06:15 10:30:00"),
                (Tag::DateTimeDigitized, "2020:01:01 00:00:00"),
                (Tag::DateTime, "2021:01:01 00:00:00"),
            ],
        );
        let jpeg = jpeg_with_exif(8, 8, Some(payload));

        let (dt, tag) = read_exif_time(&mut Cursor::new(jpeg)).unwrap();
        assert_eq!(tag, Tag::DateTimeOriginal);
        assert_eq!(dt.to_string(), "2023-06-15 10:30:00");
    }

    #[test]
    fn test_malformed_original_falls_through_to_next_tag() {
        let payload = exif_payload(
            None,
            &[
                (Tag::DateTimeOriginal, "not a date"),
                (Tag::DateTimeDigitized, "2022-03-04 05:06:07"),
            ],
        );
        let jpeg = jpeg_with_exif(8, 8, Some(payload));

        let (dt, tag) = read_exif_time(&mut Cursor::new(jpeg)).unwrap();
        assert_eq!(tag, Tag::DateTimeDigitized);
        assert_eq!(dt.to_string(), "2022-03-04 05:06:07");
    }

    #[test]
    fn test_modification_tag_is_last_resort() {
        let payload = exif_payload(None, &[(Tag::DateTime, "2019:12:31")]);
        let jpeg = jpeg_with_exif(8, 8, Some(payload));

        let (dt, tag) = read_exif_time(&mut Cursor::new(jpeg)).unwrap();
        assert_eq!(tag, Tag::DateTime);
        assert_eq!(dt.to_string(), "2019-12-31 00:00:00");
    }

    #[test]
    fn test_no_exif_is_none() {
        let jpeg = jpeg_with_exif(8, 8, None);
        assert!(read_exif_time(&mut Cursor::new(jpeg)).is_none());

        let garbage = b"definitely not an image".to_vec();
        assert!(read_exif_time(&mut Cursor::new(garbage)).is_none());
    }
}
