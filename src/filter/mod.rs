use crate::{
    error::{ParseError, PdfResult},
    scan,
};

use flate::{FlateDecoder, FlateDecoderParams};

pub mod flate;

/// Decode a stream payload according to the `/Filter` entry of its raw
/// dictionary fragment.
///
/// Only `/FlateDecode` is actually decoded; `/DCTDecode` passes through
/// untouched (JPEG data is re-embedded, never interpreted). Anything else
/// raises [`ParseError::UnsupportedFilter`].
pub(crate) fn decode_stream(dict: &[u8], data: &[u8]) -> PdfResult<Vec<u8>> {
    let filter = match scan::value_token_after("Filter", dict) {
        Some(token) => token,
        None => return Ok(data.to_vec()),
    };

    let mut out = data.to_vec();

    for name in filter_names(filter) {
        match name.as_str() {
            "FlateDecode" | "Fl" => {
                let params = FlateDecoderParams::from_dict(dict);
                out = FlateDecoder::new(&out, params).decode()?;
            }
            "DCTDecode" | "DCT" => {}
            other => anyhow::bail!(ParseError::UnsupportedFilter {
                name: other.to_owned(),
            }),
        }
    }

    Ok(out)
}

/// `/Filter` may be a single name or an array of names applied in order
fn filter_names(token: &[u8]) -> Vec<String> {
    if token.first() == Some(&b'[') {
        let mut names = Vec::new();
        let mut rest = &token[1..];
        while let Some(slash) = rest.iter().position(|&b| b == b'/') {
            let mut end = slash + 1;
            while end < rest.len() && crate::lex::is_regular(rest[end]) {
                end += 1;
            }
            names.push(String::from_utf8_lossy(&rest[slash + 1..end]).into_owned());
            rest = &rest[end..];
        }
        return names;
    }

    if token.first() == Some(&b'/') {
        return vec![String::from_utf8_lossy(&token[1..]).into_owned()];
    }

    Vec::new()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filter::flate::deflate;

    #[test]
    fn no_filter_is_identity() {
        assert_eq!(
            decode_stream(b"<< /Length 3 >>", b"abc").unwrap(),
            b"abc"
        );
    }

    #[test]
    fn flate_round_trip() {
        let compressed = deflate(b"hello stream");
        assert_eq!(
            decode_stream(b"<< /Filter /FlateDecode >>", &compressed).unwrap(),
            b"hello stream"
        );
        assert_eq!(
            decode_stream(b"<< /Filter [/FlateDecode] >>", &compressed).unwrap(),
            b"hello stream"
        );
    }

    #[test]
    fn unsupported_filter_raises() {
        assert!(decode_stream(b"<< /Filter /JBIG2Decode >>", b"x").is_err());
    }
}
