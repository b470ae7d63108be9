use std::{cmp::min, io::Read, io::Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use crate::{error::PdfResult, scan};

/// <https://www.adobe.com/content/dam/acom/en/devnet/postscript/pdfs/TN5603.Filters.pdf>
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlateDecoderParams {
    /// The default value is 1: no predictor was applied and no tag byte
    /// precedes each row. Values of 10 and above select PNG row filtering,
    /// where every row carries a one-byte filter tag.
    pub predictor: u32,

    /// Specifies the number of samples in a sampled row.
    ///
    /// Only has an effect when `predictor` is greater than 1.
    pub columns: u32,

    /// Specifies the number of interleaved color components in a sample
    pub colors: u32,

    /// The number of bits used to represent each component.
    ///
    /// The possible values are 1, 2, 4, 8, and 16
    pub bits_per_component: u32,
}

impl Default for FlateDecoderParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl FlateDecoderParams {
    /// Read `/DecodeParms` out of the raw stream dictionary; every key is
    /// optional
    pub fn from_dict(dict: &[u8]) -> Self {
        let mut params = Self::default();

        let parms = match scan::value_token_after("DecodeParms", dict)
            .or_else(|| scan::value_token_after("DP", dict))
        {
            // the value is an inline dictionary; re-scan the full region
            Some(b"<<") => dict,
            Some(_) | None => return params,
        };

        if let Some(predictor) = scan::int_after("Predictor", parms) {
            params.predictor = predictor as u32;
        }
        if let Some(columns) = scan::int_after("Columns", parms) {
            params.columns = columns as u32;
        }
        if let Some(colors) = scan::int_after("Colors", parms) {
            params.colors = colors as u32;
        }
        if let Some(bits) = scan::int_after("BitsPerComponent", parms) {
            params.bits_per_component = bits as u32;
        }

        params
    }

    const fn bits_per_pixel(&self) -> u32 {
        self.colors * self.bits_per_component
    }

    pub(crate) const fn bytes_per_pixel(&self) -> u32 {
        let bpp = self.bits_per_pixel() / 8;
        if bpp == 0 {
            1
        } else {
            bpp
        }
    }

    pub(crate) const fn bytes_per_row(&self) -> u32 {
        (self.columns * self.bits_per_pixel() + 7) / 8
    }
}

#[derive(Debug)]
pub(crate) struct FlateDecoder<'a> {
    data: &'a [u8],
    params: FlateDecoderParams,
}

impl<'a> FlateDecoder<'a> {
    pub fn new(data: &'a [u8], params: FlateDecoderParams) -> Self {
        Self { data, params }
    }

    pub fn decode(self) -> PdfResult<Vec<u8>> {
        let inflated = inflate(self.data)?;

        if self.params.predictor < 10 {
            return Ok(inflated);
        }

        Ok(self.undo_png_filters(inflated))
    }

    /// PNG column filtering: each encoded row is a one-byte filter tag
    /// followed by `bytes_per_row` filtered bytes
    fn undo_png_filters(&self, inflated: Vec<u8>) -> Vec<u8> {
        let row_len = self.params.bytes_per_row() as usize;
        let bpp = self.params.bytes_per_pixel() as usize;
        let stride = row_len + 1;

        let mut out = Vec::with_capacity(inflated.len());
        let mut prev_row = vec![0u8; row_len];

        for encoded in inflated.chunks(stride) {
            if encoded.len() < 2 {
                break;
            }

            let tag = encoded[0];
            let mut row = encoded[1..].to_vec();
            row.resize(row_len, 0);

            match tag {
                0 => {}
                1 => Self::unfilter_sub(&mut row, bpp),
                2 => Self::unfilter_up(&mut row, &prev_row),
                3 => Self::unfilter_average(&mut row, &prev_row, bpp),
                4 => Self::unfilter_paeth(&mut row, &prev_row, bpp),
                // an unknown tag means the stream is damaged; emit the raw
                // row rather than bailing out of the whole xref
                _ => {}
            }

            out.extend_from_slice(&row);
            prev_row = row;
        }

        out
    }

    fn unfilter_sub(row: &mut [u8], bpp: usize) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }

    fn unfilter_up(row: &mut [u8], prev_row: &[u8]) {
        for i in 0..row.len() {
            row[i] = row[i].wrapping_add(prev_row[i]);
        }
    }

    fn unfilter_average(row: &mut [u8], prev_row: &[u8], bpp: usize) {
        for i in 0..row.len() {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let above = prev_row[i];
            row[i] = row[i].wrapping_add(((u16::from(left) + u16::from(above)) / 2) as u8);
        }
    }

    fn unfilter_paeth(row: &mut [u8], prev_row: &[u8], bpp: usize) {
        for i in 0..row.len() {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let above = prev_row[i];
            let above_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
            let predicted =
                Self::paeth_predictor(i16::from(left), i16::from(above), i16::from(above_left));
            row[i] = row[i].wrapping_add(predicted);
        }
    }

    fn paeth_predictor(a: i16, b: i16, c: i16) -> u8 {
        let p = a + b - c;
        let pa = (p - a).abs();
        let pb = (p - b).abs();
        let pc = (p - c).abs();

        match min(min(pa, pb), pc) {
            // order here for ties is important
            diff if diff == pa => a as u8,
            diff if diff == pb => b as u8,
            diff if diff == pc => c as u8,
            _ => unreachable!(),
        }
    }
}

pub(crate) fn inflate(data: &[u8]) -> PdfResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;

    Ok(out)
}

pub(crate) fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(6));
    encoder
        .write_all(data)
        .expect("writing to an in-memory encoder");
    encoder.finish().expect("finishing an in-memory encoder")
}
