//! The full rewriter: a fresh single-revision document emitted from
//! scratch. Output is treated as binary throughout; no byte is ever
//! reinterpreted as text.

use crate::objects::Reference;

/// The high-bit comment after the version line makes transfer tools
/// classify the file as binary
const HEADER: &[u8] = b"%PDF-1.6\n%\xE2\xE3\xCF\xD3\n";

/// Emit a complete document from `objects`, which must be sorted by
/// object number with no duplicates.
///
/// The xref table covers every number from 0 to the maximum: object 0 is
/// the free-list head, and numbering gaps become free entries so viewers
/// that validate the table strictly do not reject the file.
pub(crate) fn write_document(
    objects: &[(Reference, Vec<u8>)],
    root: Reference,
    info: Option<Reference>,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        HEADER.len() + objects.iter().map(|(_, body)| body.len() + 32).sum::<usize>(),
    );
    out.extend_from_slice(HEADER);

    let mut offsets: Vec<(Reference, usize)> = Vec::with_capacity(objects.len());

    for (re, body) in objects {
        // object 0 is the free-list head; a recovered xref may list it,
        // but it never has a body
        if re.object_number == 0 {
            continue;
        }

        offsets.push((*re, out.len()));

        out.extend_from_slice(format!("{} {} obj\n", re.object_number, re.generation).as_bytes());
        out.extend_from_slice(body);
        if !body.ends_with(b"\n") {
            out.push(b'\n');
        }
        out.extend_from_slice(b"endobj\n");
    }

    let max_number = offsets
        .iter()
        .map(|(re, _)| re.object_number)
        .max()
        .unwrap_or(0);

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", max_number + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");

    let mut next = 0;
    for number in 1..=max_number {
        match offsets[next..].first() {
            Some((re, offset)) if re.object_number == number => {
                out.extend_from_slice(
                    format!("{:010} {:05} n \n", offset, re.generation).as_bytes(),
                );
                next += 1;
            }
            _ => out.extend_from_slice(b"0000000000 65535 f \n"),
        }
    }

    let mut trailer = format!(
        "trailer\n<< /Size {} /Root {}",
        max_number + 1,
        root.token()
    );
    if let Some(info) = info {
        trailer.push_str(&format!(" /Info {}", info.token()));
    }
    trailer.push_str(" >>\n");
    out.extend_from_slice(trailer.as_bytes());

    out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());

    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn emits_header_objects_and_xref() {
        let objects = vec![
            (
                Reference::first_generation(1),
                b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
            ),
            (
                Reference::first_generation(2),
                b"<< /Type /Pages /Kids [] /Count 0 >>".to_vec(),
            ),
        ];

        let out = write_document(&objects, Reference::first_generation(1), None);

        assert!(out.starts_with(b"%PDF-1.6\n%\xE2\xE3\xCF\xD3\n"));
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n"));
        assert!(text.contains("xref\n0 3\n"));
        assert!(text.contains("0000000000 65535 f \n"));
        assert!(text.contains("/Root 1 0 R"));
        assert!(text.ends_with("%%EOF\n"));
    }

    #[test]
    fn numbering_gaps_become_free_entries() {
        let objects = vec![
            (Reference::first_generation(1), b"<< >>".to_vec()),
            (Reference::first_generation(4), b"<< >>".to_vec()),
        ];

        let out = write_document(&objects, Reference::first_generation(1), None);
        let text = String::from_utf8_lossy(&out);

        assert!(text.contains("xref\n0 5\n"));
        // objects 2 and 3 are free, plus the free-list head
        assert_eq!(text.matches("0000000000 65535 f \n").count(), 3);
        assert!(text.contains("/Size 5"));
    }
}
