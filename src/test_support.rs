//! Fixture builders shared by unit tests

use exif::experimental::Writer;
use exif::{Field, In, Tag, Value};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use img_parts::jpeg::Jpeg;
use img_parts::png::Png;
use img_parts::{Bytes, ImageEXIF};
use std::io::Cursor;

/// Build a TIFF/EXIF payload with an optional orientation and date tags
pub fn exif_payload(orientation: Option<u16>, dates: &[(Tag, &str)]) -> Vec<u8> {
    let mut fields = vec![Field {
        tag: Tag::Make,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![b"photomark".to_vec()]),
    }];
    if let Some(orientation) = orientation {
        fields.push(Field {
            tag: Tag::Orientation,
            ifd_num: In::PRIMARY,
            value: Value::Short(vec![orientation]),
        });
    }
    for (tag, value) in dates {
        fields.push(Field {
            tag: *tag,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![value.as_bytes().to_vec()]),
        });
    }

    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut buf = Cursor::new(Vec::new());
    writer.write(&mut buf, false).unwrap();
    buf.into_inner()
}

/// A small gradient so JPEG output isn't a flat block
pub fn gradient_rgb(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128])
    })
}

/// Encode a JPEG, attaching an EXIF payload when given
pub fn jpeg_with_exif(width: u32, height: u32, exif: Option<Vec<u8>>) -> Vec<u8> {
    let mut raw = Vec::new();
    JpegEncoder::new_with_quality(&mut raw, 92)
        .encode_image(&gradient_rgb(width, height))
        .unwrap();

    match exif {
        Some(payload) => {
            let mut jpeg = Jpeg::from_bytes(Bytes::from(raw)).unwrap();
            jpeg.set_exif(Some(Bytes::from(payload)));
            jpeg.encoder().bytes().to_vec()
        }
        None => raw,
    }
}

/// Encode an RGBA PNG, attaching an EXIF payload when given
pub fn png_with_exif(width: u32, height: u32, exif: Option<Vec<u8>>) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([20, 40, 60, 255]));
    let mut raw = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_with_encoder(PngEncoder::new(&mut raw))
        .unwrap();

    match exif {
        Some(payload) => {
            let mut png = Png::from_bytes(Bytes::from(raw)).unwrap();
            png.set_exif(Some(Bytes::from(payload)));
            png.encoder().bytes().to_vec()
        }
        None => raw,
    }
}
