//! Signature-appearance image handling: JPEG dimensions are read from the
//! SOF markers and the compressed data passes through untouched; PNG is
//! decoded to raw RGB (expanding palettes), with the alpha channel split
//! off into a soft mask when any pixel is not fully opaque.

use crate::error::{ParseError, PdfResult};

const JPEG_MAGIC: &[u8] = b"\xFF\xD8\xFF";
const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1A\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImageKind {
    Jpeg,
    Png,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SniffedImage {
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
}

pub(crate) fn sniff(bytes: &[u8]) -> PdfResult<SniffedImage> {
    if bytes.starts_with(JPEG_MAGIC) {
        let (width, height) = jpeg_dimensions(bytes)?;
        return Ok(SniffedImage {
            kind: ImageKind::Jpeg,
            width,
            height,
        });
    }

    if bytes.starts_with(PNG_MAGIC) {
        // magic (8) + IHDR length/type (8) + width/height (8) + rest (9)
        if bytes.len() < 33 {
            anyhow::bail!(ParseError::AppearanceDecodeFailure("PNG shorter than IHDR"));
        }
        let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        return Ok(SniffedImage {
            kind: ImageKind::Png,
            width,
            height,
        });
    }

    anyhow::bail!(ParseError::AppearanceDecodeFailure("unrecognized image magic"))
}

/// Walk the marker segments for SOF0, SOF1, or SOF2
fn jpeg_dimensions(bytes: &[u8]) -> PdfResult<(u32, u32)> {
    let mut i = 2;

    while i + 4 <= bytes.len() {
        if bytes[i] != 0xFF {
            i += 1;
            continue;
        }

        let marker = bytes[i + 1];
        match marker {
            0xC0 | 0xC1 | 0xC2 => {
                // segment: length(2) precision(1) height(2) width(2)
                if i + 9 > bytes.len() {
                    break;
                }
                let height = u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]) as u32;
                let width = u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]) as u32;
                return Ok((width, height));
            }
            // standalone markers carry no length field
            0xD8 | 0x01 | 0xD0..=0xD7 => i += 2,
            0xFF => i += 1,
            _ => {
                let len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
                i += 2 + len;
            }
        }
    }

    anyhow::bail!(ParseError::AppearanceDecodeFailure("JPEG without SOF marker"))
}

#[derive(Debug)]
pub(crate) struct DecodedPng {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
    /// 8-bit gray soft mask, present only when some pixel is translucent
    pub alpha: Option<Vec<u8>>,
}

pub(crate) fn decode_png(bytes: &[u8]) -> PdfResult<DecodedPng> {
    let mut decoder = png::Decoder::new(bytes);
    decoder.set_transformations(png::Transformations::normalize_to_color8());

    let mut reader = decoder.read_info()?;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf)?;
    buf.truncate(info.buffer_size());

    let pixel_count = (info.width * info.height) as usize;
    let mut rgb = Vec::with_capacity(pixel_count * 3);
    let mut alpha = Vec::with_capacity(pixel_count);

    match info.color_type {
        png::ColorType::Rgb => {
            rgb = buf;
            alpha.clear();
        }
        png::ColorType::Rgba => {
            for pixel in buf.chunks_exact(4) {
                rgb.extend_from_slice(&pixel[..3]);
                alpha.push(pixel[3]);
            }
        }
        png::ColorType::Grayscale => {
            for &gray in &buf {
                rgb.extend_from_slice(&[gray, gray, gray]);
            }
        }
        png::ColorType::GrayscaleAlpha => {
            for pixel in buf.chunks_exact(2) {
                rgb.extend_from_slice(&[pixel[0], pixel[0], pixel[0]]);
                alpha.push(pixel[1]);
            }
        }
        // normalize_to_color8 expands palettes before we ever see them
        png::ColorType::Indexed => {
            anyhow::bail!(ParseError::AppearanceDecodeFailure("unexpanded palette PNG"))
        }
    }

    let alpha = if alpha.iter().any(|&a| a < 255) {
        Some(alpha)
    } else {
        None
    };

    Ok(DecodedPng {
        width: info.width,
        height: info.height,
        rgb,
        alpha,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn tiny_png(color: png::ColorType, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, 2, 2);
            encoder.set_color(color);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(data).unwrap();
        }
        out
    }

    #[test]
    fn sniffs_png_dimensions() {
        let data = tiny_png(png::ColorType::Rgb, &[0u8; 12]);
        let sniffed = sniff(&data).unwrap();
        assert_eq!(sniffed.kind, ImageKind::Png);
        assert_eq!(sniffed.width, 2);
        assert_eq!(sniffed.height, 2);
    }

    #[test]
    fn sniffs_jpeg_sof_dimensions() {
        // SOI + SOF0 segment declaring 8x16
        let data: Vec<u8> = vec![
            0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x10, 0x00, 0x08, 0x01, 0x01, 0x11,
            0x00,
        ];
        let sniffed = sniff(&data).unwrap();
        assert_eq!(sniffed.kind, ImageKind::Jpeg);
        assert_eq!(sniffed.width, 8);
        assert_eq!(sniffed.height, 16);
    }

    #[test]
    fn rejects_garbage_and_short_png() {
        assert!(sniff(b"notanimage").is_err());

        let mut short = PNG_MAGIC.to_vec();
        short.extend_from_slice(&[0; 8]);
        assert!(sniff(&short).is_err());
    }

    #[test]
    fn decodes_rgb_png_without_mask() {
        let data = tiny_png(png::ColorType::Rgb, &[10u8; 12]);
        let decoded = decode_png(&data).unwrap();
        assert_eq!(decoded.rgb.len(), 12);
        assert!(decoded.alpha.is_none());
    }

    #[test]
    fn translucent_pixels_produce_a_mask() {
        let mut data = Vec::new();
        for i in 0..4u8 {
            data.extend_from_slice(&[100, 150, 200, if i == 2 { 128 } else { 255 }]);
        }
        let encoded = tiny_png(png::ColorType::Rgba, &data);

        let decoded = decode_png(&encoded).unwrap();
        assert_eq!(decoded.rgb.len(), 12);
        assert_eq!(decoded.alpha.as_deref(), Some(&[255, 255, 128, 255][..]));
    }
}
