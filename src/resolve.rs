//! Locating the raw body bytes of every object in the document, whether
//! the object sits in the linear file, is indexed by a cross-reference
//! stream, or is compressed inside an object stream.

use std::{cell::RefCell, collections::HashMap, ops::Deref, ops::Range, rc::Rc};

use crate::{
    error::{ParseError, PdfResult},
    filter,
    lex::{Cursor, LexBase},
    object_stream,
    objects::Reference,
    scan,
    xref::{TrailerPart, XrefEntry, XrefParser},
};

/// Body bytes handed out by the resolver. In-file bodies borrow the
/// document buffer; object-stream slots share their decompressed bytes.
/// Either way, cloning is cheap.
#[derive(Debug, Clone)]
pub(crate) struct BodyBytes {
    buf: Rc<[u8]>,
    range: Range<usize>,
}

impl BodyBytes {
    fn whole(buf: Rc<[u8]>) -> Self {
        let range = 0..buf.len();
        Self { buf, range }
    }
}

impl Deref for BodyBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[self.range.clone()]
    }
}

type ObjStmSlots = Vec<(Reference, Rc<[u8]>)>;

pub(crate) struct Resolver {
    raw: Rc<[u8]>,
    entries: HashMap<usize, XrefEntry>,
    startxref: usize,
    trailer: TrailerPart,
    /// The largest `/Size` observed anywhere in the revision chain
    carried_size: usize,
    /// Decompressed object-stream containers, filled lazily on first
    /// access and cleared before the underlying buffer is replaced
    objstm_cache: RefCell<HashMap<usize, Rc<ObjStmSlots>>>,
    /// Offsets recovered by a linear header scan, used when the xref lies
    rescanned: RefCell<Option<HashMap<usize, (usize, usize)>>>,
}

impl Resolver {
    pub fn new(raw: Rc<[u8]>) -> PdfResult<Self> {
        let mut parser = XrefParser::new(&raw);
        let startxref = parser.find_startxref()?;

        let (entries, trailer, carried_size) = match Self::walk_chain(&mut parser, startxref) {
            Ok(parts) => parts,
            Err(err) => {
                log::warn!("xref chain unreadable ({}), rebuilding from object headers", err);
                Self::reconstruct(&raw)?
            }
        };

        Ok(Self {
            raw,
            entries,
            startxref,
            trailer,
            carried_size,
            objstm_cache: RefCell::new(HashMap::new()),
            rescanned: RefCell::new(None),
        })
    }

    fn walk_chain(
        parser: &mut XrefParser<'_>,
        startxref: usize,
    ) -> PdfResult<(HashMap<usize, XrefEntry>, TrailerPart, usize)> {
        let mut section = parser.parse_section_at(startxref)?;
        let mut xref = std::mem::take(&mut section.xref);
        let trailer = section.trailer.clone();
        let mut carried_size = trailer.size.unwrap_or(0);
        let mut root = trailer.root;
        let mut info = trailer.info;

        let mut prev = section.trailer.prev;
        let mut visited = vec![startxref];

        while let Some(prev_offset) = prev {
            if visited.contains(&prev_offset) {
                break;
            }
            visited.push(prev_offset);

            let earlier = match parser.parse_section_at(prev_offset) {
                Ok(earlier) => earlier,
                Err(err) => {
                    log::warn!("previous xref section at {} unreadable: {}", prev_offset, err);
                    break;
                }
            };

            xref.merge_with_previous(earlier.xref);
            carried_size = carried_size.max(earlier.trailer.size.unwrap_or(0));
            root = root.or(earlier.trailer.root);
            info = info.or(earlier.trailer.info);
            prev = earlier.trailer.prev;
        }

        let mut trailer = trailer;
        trailer.root = root;
        trailer.info = info;

        Ok((xref.entries, trailer, carried_size))
    }

    /// Approximate xref recovery: every `N G obj` header in the file, last
    /// occurrence of a number winning, plus the last `trailer` dictionary
    fn reconstruct(
        raw: &[u8],
    ) -> PdfResult<(HashMap<usize, XrefEntry>, TrailerPart, usize)> {
        let mut entries = HashMap::new();

        for (re, offset) in scan::scan_object_headers(raw) {
            entries.insert(
                re.object_number,
                XrefEntry::InFile {
                    offset,
                    generation: re.generation,
                },
            );
        }

        if entries.is_empty() {
            anyhow::bail!(ParseError::MalformedDocument("no objects found"));
        }

        let mut trailer = TrailerPart::default();
        if let Some(keyword) = scan::rfind(raw, b"trailer") {
            if let Some(open) = scan::find(raw, b"<<", keyword) {
                if let Some(close) = scan::dict_close(raw, open) {
                    trailer = TrailerPart::from_dict_bytes(&raw[open..close]);
                }
            }
        }

        if trailer.root.is_none() {
            // no usable trailer: the catalog itself is findable by type
            for (re, offset) in scan::scan_object_headers(raw) {
                if let Some(end) = scan::find(raw, b"endobj", offset) {
                    if scan::value_token_after("Type", &raw[offset..end]) == Some(b"/Catalog") {
                        trailer.root = Some(re);
                        break;
                    }
                }
            }
        }

        let size = trailer.size.unwrap_or(0);

        Ok((entries, trailer, size))
    }

    pub fn root_ref(&self) -> PdfResult<Reference> {
        match self.trailer.root {
            Some(root) => Ok(root),
            None => anyhow::bail!(ParseError::MalformedDocument("trailer lacks /Root")),
        }
    }

    pub fn info_ref(&self) -> Option<Reference> {
        self.trailer.info
    }

    /// The raw bytes of the latest trailer dictionary
    pub fn trailer_dict(&self) -> &[u8] {
        &self.trailer.dict
    }

    pub fn startxref_offset(&self) -> usize {
        self.startxref
    }

    pub fn carried_size(&self) -> usize {
        self.carried_size
    }

    pub fn max_object_number(&self) -> usize {
        self.entries.keys().copied().max().unwrap_or(0)
    }

    pub fn has_object(&self, object_number: usize) -> bool {
        matches!(
            self.entries.get(&object_number),
            Some(XrefEntry::InFile { .. } | XrefEntry::InObjStm { .. })
        )
    }

    /// Must be called before the underlying buffer is replaced, so large
    /// decompressed regions are released
    pub fn clear_object_stream_cache(&self) {
        self.objstm_cache.borrow_mut().clear();
    }

    pub fn object_body(&self, re: Reference) -> Option<BodyBytes> {
        match self.entries.get(&re.object_number)? {
            XrefEntry::Free => None,
            &XrefEntry::InFile { offset, .. } => self
                .body_span_at(offset, re.object_number)
                .or_else(|| self.rescanned_span(re.object_number))
                .map(|range| BodyBytes {
                    buf: Rc::clone(&self.raw),
                    range,
                }),
            &XrefEntry::InObjStm { container, index } => {
                let slots = self.load_container(container)?;
                let slot = slots
                    .get(index)
                    .filter(|(slot_ref, _)| slot_ref.object_number == re.object_number)
                    .or_else(|| {
                        slots
                            .iter()
                            .find(|(slot_ref, _)| slot_ref.object_number == re.object_number)
                    })?;
                Some(BodyBytes::whole(Rc::clone(&slot.1)))
            }
        }
    }

    /// Invoke `callback` for every object in the latest revision, in
    /// object-number order
    pub fn each_object(&self, callback: &mut dyn FnMut(Reference, &[u8])) {
        let mut numbers: Vec<usize> = self.entries.keys().copied().collect();
        numbers.sort_unstable();

        for number in numbers {
            let generation = match self.entries.get(&number) {
                Some(&XrefEntry::InFile { generation, .. }) => generation,
                Some(&XrefEntry::InObjStm { .. }) => 0,
                _ => continue,
            };

            let re = Reference {
                object_number: number,
                generation,
            };

            if let Some(body) = self.object_body(re) {
                callback(re, &body);
            }
        }
    }

    /// Locate the `N G obj` header at (or near) the recorded offset and
    /// return the span between `obj` and `endobj`
    fn body_span_at(&self, offset: usize, expected_number: usize) -> Option<Range<usize>> {
        if offset >= self.raw.len() {
            return None;
        }

        let mut cursor = Cursor::at(&self.raw, offset);
        cursor.skip_whitespace();

        let number: usize = cursor.lex_whole_number().parse().ok()?;
        cursor.skip_whitespace();
        let _generation = cursor.lex_whole_number();
        cursor.skip_whitespace();

        if !cursor.next_matches(b"obj") || number != expected_number {
            return None;
        }
        *cursor.cursor_mut() += 3;
        cursor.skip_whitespace();

        let body_start = cursor.pos();
        let body_end = self.body_end(body_start)?;

        Some(body_start..body_end)
    }

    fn body_end(&self, body_start: usize) -> Option<usize> {
        let raw: &[u8] = &self.raw;

        if raw[body_start..].starts_with(b"<<") {
            let dict_end = scan::dict_close(raw, body_start)?;
            let dict = &raw[body_start..dict_end];

            let mut cursor = Cursor::at(raw, dict_end);
            cursor.skip_whitespace();

            if cursor.next_matches(b"stream") {
                return self.stream_end(dict, cursor.pos());
            }

            let endobj = scan::find(raw, b"endobj", dict_end)?;
            return Some(trim_end(raw, endobj));
        }

        let endobj = scan::find(raw, b"endobj", body_start)?;
        Some(trim_end(raw, endobj))
    }

    /// Offset one past `endstream`. A `/Length` that does not land on the
    /// keyword is distrusted; the keyword boundaries win.
    fn stream_end(&self, dict: &[u8], keyword: usize) -> Option<usize> {
        let raw: &[u8] = &self.raw;

        let mut data_start = keyword + b"stream".len();
        match raw.get(data_start) {
            Some(b'\r') => {
                data_start += 1;
                if raw.get(data_start) == Some(&b'\n') {
                    data_start += 1;
                }
            }
            Some(b'\n') => data_start += 1,
            _ => {}
        }

        if let Some(len) = self.stream_length(dict) {
            let candidate = data_start + len;
            if candidate <= raw.len() {
                let mut cursor = Cursor::at(raw, candidate);
                cursor.skip_whitespace();
                if cursor.next_matches(b"endstream") {
                    return Some(cursor.pos() + b"endstream".len());
                }
            }
        }

        scan::find(raw, b"endstream", data_start).map(|at| at + b"endstream".len())
    }

    /// `/Length` may be an indirect reference; resolve one level
    fn stream_length(&self, dict: &[u8]) -> Option<usize> {
        let token = scan::value_token_after("Length", dict)?;

        if let Some(len) = scan::parse_int(token) {
            return usize::try_from(len).ok();
        }

        let re = scan::parse_ref_token(token)?;
        let body = self.object_body(re)?;
        scan::parse_int(&body).and_then(|len| usize::try_from(len).ok())
    }

    fn rescanned_span(&self, object_number: usize) -> Option<Range<usize>> {
        {
            let mut cache = self.rescanned.borrow_mut();
            if cache.is_none() {
                log::warn!("xref offset wrong for object {}, rescanning headers", object_number);
                let mut map = HashMap::new();
                for (re, offset) in scan::scan_object_headers(&self.raw) {
                    map.insert(re.object_number, (offset, re.generation));
                }
                *cache = Some(map);
            }
        }

        let offset = {
            let cache = self.rescanned.borrow();
            cache.as_ref()?.get(&object_number).copied()?
        };

        self.body_span_at(offset.0, object_number)
    }

    /// Decompress and index an object-stream container on first use
    fn load_container(&self, container: Reference) -> Option<Rc<ObjStmSlots>> {
        if let Some(slots) = self.objstm_cache.borrow().get(&container.object_number) {
            return Some(Rc::clone(slots));
        }

        let body = self.object_body(container)?;
        let (dict, payload) = stream_parts(&body)?;

        let decoded = match filter::decode_stream(dict, payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                log::warn!("object stream {} undecodable: {}", container.object_number, err);
                return None;
            }
        };

        let n = scan::int_after("N", dict)? as usize;
        let first = scan::int_after("First", dict)? as usize;

        let slots = match object_stream::parse(&decoded, n, first) {
            Ok(slots) => slots,
            Err(err) => {
                log::warn!("object stream {} malformed: {}", container.object_number, err);
                return None;
            }
        };

        let slots: ObjStmSlots = slots
            .into_iter()
            .map(|(re, body)| (re, Rc::from(body.into_boxed_slice())))
            .collect();

        let slots = Rc::new(slots);
        self.objstm_cache
            .borrow_mut()
            .insert(container.object_number, Rc::clone(&slots));

        Some(slots)
    }
}

/// Split a stream object body into its dictionary fragment and raw payload
pub(crate) fn stream_parts(body: &[u8]) -> Option<(&[u8], &[u8])> {
    let open = scan::find(body, b"<<", 0)?;
    let dict_end = scan::dict_close(body, open)?;
    let dict = &body[open..dict_end];

    let keyword = scan::find(body, b"stream", dict_end)?;
    let mut data_start = keyword + b"stream".len();
    match body.get(data_start) {
        Some(b'\r') => {
            data_start += 1;
            if body.get(data_start) == Some(&b'\n') {
                data_start += 1;
            }
        }
        Some(b'\n') => data_start += 1,
        _ => {}
    }

    let mut data_end = scan::rfind(body, b"endstream")?;
    // the EOL before `endstream` is a separator, not payload
    if data_end > data_start && body[data_end - 1] == b'\n' {
        data_end -= 1;
        if data_end > data_start && body[data_end - 1] == b'\r' {
            data_end -= 1;
        }
    }

    if data_end < data_start {
        return None;
    }

    Some((dict, &body[data_start..data_end]))
}

fn trim_end(raw: &[u8], mut end: usize) -> usize {
    while end > 0 && crate::lex::is_whitespace(raw[end - 1]) {
        end -= 1;
    }
    end
}
