//! The `/Type /ObjStm` container: a compressed stream holding several
//! objects back to back, indexed by a header of `N` (object number,
//! offset) integer pairs. `/First` is the byte offset of the first body.

use crate::{
    error::{ParseError, PdfResult},
    filter::flate::deflate,
    lex::{Cursor, LexBase},
    objects::Reference,
};

/// Split a decompressed container body into its individual object bodies
pub(crate) fn parse(decoded: &[u8], n: usize, first: usize) -> PdfResult<Vec<(Reference, Vec<u8>)>> {
    if first > decoded.len() {
        anyhow::bail!(ParseError::MalformedDocument(
            "object stream /First exceeds stream length"
        ));
    }

    let mut cursor = Cursor::new(&decoded[..first]);
    let mut index = Vec::with_capacity(n);

    for _ in 0..n {
        cursor.skip_whitespace();
        let object_number = cursor.expect_unsigned()?;
        cursor.skip_whitespace();
        let offset = cursor.expect_unsigned()?;

        index.push((object_number, offset));
    }

    let mut slots = Vec::with_capacity(n);
    for (i, &(object_number, offset)) in index.iter().enumerate() {
        let start = first + offset;
        let end = match index.get(i + 1) {
            Some(&(_, next_offset)) => first + next_offset,
            None => decoded.len(),
        };

        if start > end || end > decoded.len() {
            anyhow::bail!(ParseError::MalformedDocument(
                "object stream offsets out of order"
            ));
        }

        slots.push((
            Reference::first_generation(object_number),
            decoded[start..end].to_vec(),
        ));
    }

    Ok(slots)
}

/// Assemble a full `N G obj` body for a container holding `objects`,
/// compressed with Flate. Objects are sorted by number; compressed
/// objects always have generation 0.
pub(crate) fn build(objects: &[(usize, Vec<u8>)]) -> Vec<u8> {
    let mut sorted: Vec<&(usize, Vec<u8>)> = objects.iter().collect();
    sorted.sort_by_key(|(number, _)| *number);

    let mut header = String::new();
    let mut bodies = Vec::new();

    for (number, body) in &sorted {
        header.push_str(&format!("{} {} ", number, bodies.len()));
        bodies.extend_from_slice(body);
        bodies.push(b'\n');
    }
    header.push('\n');

    let mut payload = header.clone().into_bytes();
    let first = payload.len();
    payload.extend_from_slice(&bodies);

    let compressed = deflate(&payload);

    let mut out = format!(
        "<< /Type /ObjStm /N {} /First {} /Filter /FlateDecode /Length {} >>\nstream\n",
        sorted.len(),
        first,
        compressed.len()
    )
    .into_bytes();
    out.extend_from_slice(&compressed);
    out.extend_from_slice(b"\nendstream");
    out
}
