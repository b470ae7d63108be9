use std::collections::HashMap;

use crate::{
    error::{ParseError, PdfResult},
    filter,
    lex::{Cursor, LexBase},
    objects::Reference,
    scan,
};

const START_XREF_SIGNATURE: &[u8; 9] = b"startxref";
const KILOBYTE: usize = 1024;

/// The cross-reference table contains information that permits random
/// access to indirect objects within the file so that the entire file need
/// not be read to locate any particular object
#[derive(Debug, Default)]
pub(crate) struct Xref {
    pub entries: HashMap<usize, XrefEntry>,
}

impl Xref {
    /// Later revisions override earlier ones on a per-object basis, so an
    /// earlier section only contributes numbers we have not seen yet
    pub fn merge_with_previous(&mut self, earlier: Xref) {
        for (object_number, entry) in earlier.entries {
            self.entries.entry(object_number).or_insert(entry);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum XrefEntry {
    /// The object body begins at `offset` in the file
    InFile { offset: usize, generation: usize },
    /// The object lives inside the decompressed stream of `container`, at
    /// the given slot
    InObjStm { container: Reference, index: usize },
    Free,
}

/// The subset of the trailer dictionary the editor needs, plus its raw
/// bytes for textual `/Root` extraction during incremental writes
#[derive(Debug, Default, Clone)]
pub(crate) struct TrailerPart {
    pub size: Option<usize>,
    pub prev: Option<usize>,
    pub root: Option<Reference>,
    pub info: Option<Reference>,
    pub dict: Vec<u8>,
}

impl TrailerPart {
    pub fn from_dict_bytes(dict: &[u8]) -> Self {
        Self {
            size: scan::int_after("Size", dict).map(|size| size as usize),
            prev: scan::int_after("Prev", dict).map(|prev| prev as usize),
            root: scan::ref_after("Root", dict),
            info: scan::ref_after("Info", dict),
            dict: dict.to_vec(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct XrefSection {
    pub xref: Xref,
    pub trailer: TrailerPart,
}

pub(crate) struct XrefParser<'a> {
    file: &'a [u8],
    pos: usize,
}

impl LexBase for XrefParser<'_> {
    fn buffer(&self) -> &[u8] {
        self.file
    }

    fn cursor(&self) -> usize {
        self.pos
    }

    fn cursor_mut(&mut self) -> &mut usize {
        &mut self.pos
    }
}

impl<'a> XrefParser<'a> {
    pub fn new(file: &'a [u8]) -> Self {
        Self { file, pos: 0 }
    }

    /// We read backwards in 1024 byte chunks, looking for `"startxref"`,
    /// and return the offset its digits point at
    pub fn find_startxref(&mut self) -> PdfResult<usize> {
        let mut pos = self.file.len();

        let idx = loop {
            if pos == 0 {
                anyhow::bail!(ParseError::MalformedDocument("missing startxref"));
            }

            let next_pos = pos.saturating_sub(KILOBYTE - START_XREF_SIGNATURE.len());
            if let Some(start) = self.file[next_pos..pos]
                .windows(START_XREF_SIGNATURE.len())
                .rposition(|window| window == START_XREF_SIGNATURE)
            {
                break start + next_pos;
            }

            pos = next_pos;
        };

        self.pos = idx;
        self.expect_bytes(START_XREF_SIGNATURE)?;
        self.skip_whitespace();

        self.expect_unsigned()
    }

    /// Parse the xref section at `offset`, classic table or xref stream.
    /// A corrupt stream falls back to a classic `xref` keyword found in
    /// nearby bytes.
    pub fn parse_section_at(&mut self, offset: usize) -> PdfResult<XrefSection> {
        if offset >= self.file.len() {
            anyhow::bail!(ParseError::MalformedDocument("startxref out of bounds"));
        }

        self.pos = offset;
        self.skip_whitespace();

        if self.next_matches(b"xref") {
            return self.parse_classic();
        }

        let stream_pos = self.pos;
        match self.parse_stream() {
            Ok(section) => Ok(section),
            Err(err) => {
                let window_start = offset.saturating_sub(64);
                let window_end = (offset + KILOBYTE).min(self.file.len());

                match scan::find(&self.file[window_start..window_end], b"xref", 0) {
                    Some(found) => {
                        log::warn!(
                            "xref stream at {} undecodable, using classic table nearby",
                            stream_pos
                        );
                        self.pos = window_start + found;
                        self.parse_classic()
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// A classic table: subsections of `<first> <count>` headers, each
    /// entry 20 bytes, followed by `trailer << … >>`
    fn parse_classic(&mut self) -> PdfResult<XrefSection> {
        self.expect_bytes(b"xref")?;
        self.skip_whitespace();

        let mut xref = Xref::default();

        loop {
            let first = self.expect_unsigned()?;
            self.skip_whitespace();
            let count = self.expect_unsigned()?;
            self.skip_whitespace();

            xref.entries.reserve(count);

            for i in 0..count {
                let offset = self.expect_unsigned()?;
                self.skip_whitespace();
                let generation = self.expect_unsigned()?;
                self.skip_whitespace();

                let entry = match self.next_byte_err()? {
                    b'n' => XrefEntry::InFile { offset, generation },
                    b'f' => XrefEntry::Free,
                    found => anyhow::bail!(ParseError::MismatchedByte {
                        expected: b'n',
                        found: Some(found),
                    }),
                };
                self.skip_whitespace();

                xref.entries.insert(first + i, entry);
            }

            match self.peek_byte() {
                Some(b't') => break,
                Some(b'0'..=b'9') => continue,
                found => anyhow::bail!(ParseError::MismatchedByte {
                    expected: b't',
                    found,
                }),
            }
        }

        self.expect_bytes(b"trailer")?;
        self.skip_whitespace();

        let dict_end = scan::dict_close(self.file, self.pos)
            .ok_or(ParseError::MalformedDocument("unterminated trailer"))?;
        let trailer = TrailerPart::from_dict_bytes(&self.file[self.pos..dict_end]);

        Ok(XrefSection { xref, trailer })
    }

    /// An xref stream: `N G obj << /Type /XRef /W [...] … >> stream`
    fn parse_stream(&mut self) -> PdfResult<XrefSection> {
        self.expect_unsigned()?;
        self.skip_whitespace();
        self.expect_unsigned()?;
        self.skip_whitespace();
        self.expect_bytes(b"obj")?;
        self.skip_whitespace();

        if !self.next_matches(b"<<") {
            anyhow::bail!(ParseError::MalformedDocument("xref stream lacks dictionary"));
        }

        let dict_start = self.pos;
        let dict_end = scan::dict_close(self.file, dict_start)
            .ok_or(ParseError::MalformedDocument("unterminated xref stream dict"))?;
        let dict = &self.file[dict_start..dict_end];

        if scan::value_token_after("Type", dict) != Some(b"/XRef") {
            anyhow::bail!(ParseError::MalformedDocument("xref stream lacks /Type /XRef"));
        }

        let payload = self.stream_payload(dict, dict_end)?;
        let decoded = filter::decode_stream(dict, payload)?;

        let widths = scan::value_token_after("W", dict)
            .map(array_ints)
            .unwrap_or_default();
        if widths.len() < 3 {
            anyhow::bail!(ParseError::MalformedDocument("xref stream /W too short"));
        }

        let size = scan::int_after("Size", dict).unwrap_or(0) as usize;
        let subsections = match scan::value_token_after("Index", dict) {
            Some(token) => array_ints(token)
                .chunks(2)
                .filter(|pair| pair.len() == 2)
                .map(|pair| (pair[0], pair[1]))
                .collect(),
            None => vec![(0, size)],
        };

        let xref = decode_entries(&decoded, &widths, &subsections);
        let trailer = TrailerPart::from_dict_bytes(dict);

        Ok(XrefSection { xref, trailer })
    }

    /// The raw stream bytes. `/Length` is trusted when it lands on the
    /// `endstream` keyword; otherwise the keyword boundaries win.
    fn stream_payload(&self, dict: &[u8], dict_end: usize) -> PdfResult<&'a [u8]> {
        let keyword = scan::find(self.file, b"stream", dict_end)
            .ok_or(ParseError::MalformedDocument("xref stream has no stream"))?;

        let mut start = keyword + b"stream".len();
        match self.file.get(start) {
            Some(b'\r') => {
                start += 1;
                if self.file.get(start) == Some(&b'\n') {
                    start += 1;
                }
            }
            Some(b'\n') => start += 1,
            _ => {}
        }

        if let Some(len) = scan::int_after("Length", dict) {
            let end = start + len as usize;
            if end <= self.file.len() {
                let mut cursor = Cursor::at(self.file, end);
                cursor.skip_whitespace();
                if cursor.next_matches(b"endstream") {
                    return Ok(&self.file[start..end]);
                }
            }
        }

        let end = scan::find(self.file, b"endstream", start)
            .ok_or(ParseError::MalformedDocument("missing endstream"))?;
        Ok(&self.file[start..end])
    }
}

fn array_ints(token: &[u8]) -> Vec<usize> {
    let inner = token
        .strip_prefix(b"[")
        .and_then(|t| t.strip_suffix(b"]"))
        .unwrap_or(token);

    inner
        .split(|&b| crate::lex::is_whitespace(b))
        .filter(|word| !word.is_empty())
        .filter_map(|word| std::str::from_utf8(word).ok()?.parse().ok())
        .collect()
}

/// Entry types: 0 free, 1 in-file (field2 offset, field3 generation),
/// 2 in-objstm (field2 container number, field3 slot index). A zero-width
/// type field defaults to type 1.
fn decode_entries(decoded: &[u8], widths: &[usize], subsections: &[(usize, usize)]) -> Xref {
    let entry_len: usize = widths.iter().take(3).sum();
    let mut xref = Xref::default();
    let mut cursor = 0;

    for &(first, count) in subsections {
        for i in 0..count {
            if cursor + entry_len > decoded.len() {
                return xref;
            }

            let mut fields = [1usize, 0, 0];
            let mut at = cursor;
            for (f, &width) in fields.iter_mut().zip(widths.iter().take(3)) {
                if width == 0 {
                    continue;
                }
                let mut value = 0usize;
                for &b in &decoded[at..at + width] {
                    value = (value << 8) | b as usize;
                }
                *f = value;
                at += width;
            }
            cursor += entry_len;

            let entry = match fields[0] {
                0 => XrefEntry::Free,
                1 => XrefEntry::InFile {
                    offset: fields[1],
                    generation: fields[2],
                },
                2 => XrefEntry::InObjStm {
                    container: Reference::first_generation(fields[1]),
                    index: fields[2],
                },
                _ => continue,
            };

            xref.entries.insert(first + i, entry);
        }
    }

    xref
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filter::flate::deflate;

    #[test]
    fn parses_a_classic_table() {
        let file = b"%PDF-1.4\nxref\n0 3\n0000000000 65535 f \n0000000009 00000 n \n0000000074 00000 n \ntrailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n9\n%%EOF\n";

        let mut parser = XrefParser::new(file);
        let start = parser.find_startxref().unwrap();
        assert_eq!(start, 9);

        let section = parser.parse_section_at(start).unwrap();
        assert_eq!(
            section.xref.entries[&1],
            XrefEntry::InFile {
                offset: 9,
                generation: 0
            }
        );
        assert_eq!(section.xref.entries[&0], XrefEntry::Free);
        assert_eq!(section.trailer.root, Some(Reference::first_generation(1)));
        assert_eq!(section.trailer.size, Some(3));
        assert_eq!(section.trailer.prev, None);
    }

    #[test]
    fn parses_an_xref_stream() {
        // three entries, W [1 2 1]: free head, in-file at 17, in-objstm
        // slot 0 of container 5
        let entries: Vec<u8> = vec![
            0, 0, 0, 0, //
            1, 0, 17, 0, //
            2, 0, 5, 0,
        ];
        let compressed = deflate(&entries);

        let mut file = format!(
            "7 0 obj\n<< /Type /XRef /Size 3 /W [1 2 1] /Filter /FlateDecode /Length {} /Root 1 0 R >>\nstream\n",
            compressed.len()
        )
        .into_bytes();
        file.extend_from_slice(&compressed);
        file.extend_from_slice(b"\nendstream\nendobj\n");

        let mut parser = XrefParser::new(&file);
        let section = parser.parse_section_at(0).unwrap();

        assert_eq!(section.xref.entries[&0], XrefEntry::Free);
        assert_eq!(
            section.xref.entries[&1],
            XrefEntry::InFile {
                offset: 17,
                generation: 0
            }
        );
        assert_eq!(
            section.xref.entries[&2],
            XrefEntry::InObjStm {
                container: Reference::first_generation(5),
                index: 0
            }
        );
    }

    #[test]
    fn xref_stream_with_png_predictor() {
        // W [1 2 1], columns = 4, predictor 12 (Up): rows are deltas
        // against the previous row
        let rows: Vec<Vec<u8>> = vec![
            vec![1, 0, 20, 0],
            vec![1, 0, 60, 0],
            vec![1, 0, 90, 0],
        ];

        let mut filtered = Vec::new();
        let mut prev = vec![0u8; 4];
        for row in &rows {
            filtered.push(2);
            for i in 0..4 {
                filtered.push(row[i].wrapping_sub(prev[i]));
            }
            prev = row.clone();
        }
        let compressed = deflate(&filtered);

        let mut file = format!(
            "9 0 obj\n<< /Type /XRef /Size 3 /W [1 2 1] /Index [4 3] /Filter /FlateDecode /DecodeParms << /Predictor 12 /Columns 4 >> /Length {} >>\nstream\n",
            compressed.len()
        )
        .into_bytes();
        file.extend_from_slice(&compressed);
        file.extend_from_slice(b"\nendstream\nendobj\n");

        let mut parser = XrefParser::new(&file);
        let section = parser.parse_section_at(0).unwrap();

        assert_eq!(
            section.xref.entries[&4],
            XrefEntry::InFile {
                offset: 20,
                generation: 0
            }
        );
        assert_eq!(
            section.xref.entries[&5],
            XrefEntry::InFile {
                offset: 60,
                generation: 0
            }
        );
        assert_eq!(
            section.xref.entries[&6],
            XrefEntry::InFile {
                offset: 90,
                generation: 0
            }
        );
    }

    #[test]
    fn malformed_stream_falls_back_to_nearby_classic() {
        let file = b"junk junk\nxref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 1 >>\n";
        let mut parser = XrefParser::new(file);
        let section = parser.parse_section_at(0).unwrap();
        assert_eq!(section.xref.entries[&0], XrefEntry::Free);
    }
}
