//! The document orchestrator: owns the frozen byte buffer, the resolver,
//! and the pending-patch queue, and exposes the field-level operations.

use std::{collections::HashMap, collections::HashSet, path::Path, rc::Rc};

use crate::{
    actions::{self, clear::FieldSelector},
    diag::{DiagnosticSink, LogSink},
    error::{ParseError, PdfResult},
    field::{Field, FieldOptions, FieldType},
    incremental::{self, Patch},
    objects::{Reference, Value},
    page::{Page, PageBoxes},
    resolve::Resolver,
    rewrite, scan, strings,
};

pub struct Document {
    pub(crate) raw: Rc<[u8]>,
    pub(crate) resolver: Resolver,
    pub(crate) patches: Vec<Patch>,
    diag: Box<dyn DiagnosticSink>,
}

impl Document {
    /// Parse a document from bytes. A multipart/form-data wrapper (a raw
    /// HTTP upload body) is stripped before parsing. Raises when the
    /// bytes contain no `%PDF-` header, no usable xref, or no catalog.
    pub fn open(bytes: impl Into<Vec<u8>>) -> PdfResult<Self> {
        let mut bytes = bytes.into();
        let mut stripped = false;

        if !bytes.starts_with(b"%PDF-") {
            match scan::find(&bytes, b"%PDF-", 0) {
                Some(start) => {
                    let end = scan::rfind(&bytes, b"%%EOF")
                        .map(|at| at + b"%%EOF".len())
                        .unwrap_or(bytes.len());
                    bytes = bytes[start..end.max(start)].to_vec();
                    stripped = true;
                }
                None => anyhow::bail!(ParseError::MalformedDocument("missing %PDF- header")),
            }
        }

        let raw: Rc<[u8]> = Rc::from(bytes.into_boxed_slice());
        let resolver = Resolver::new(Rc::clone(&raw))?;
        resolver.root_ref()?;

        let doc = Self {
            raw,
            resolver,
            patches: Vec::new(),
            diag: Box::new(LogSink),
        };

        if stripped {
            doc.warn("multipart wrapper stripped from input");
        }

        Ok(doc)
    }

    pub fn open_path(path: impl AsRef<Path>) -> PdfResult<Self> {
        Self::open(std::fs::read(path)?)
    }

    /// Replace the default `log`-backed sink, e.g. with a recording sink
    /// in tests
    pub fn with_diagnostics(mut self, sink: Box<dyn DiagnosticSink>) -> Self {
        self.diag = sink;
        self
    }

    /// The current serialized bytes. Pending patches are not reflected
    /// until [`Self::write`].
    pub fn bytes(&self) -> &[u8] {
        &self.raw
    }

    pub(crate) fn warn(&self, message: &str) {
        self.diag.warn(message);
    }

    pub(crate) fn root_ref(&self) -> PdfResult<Reference> {
        self.resolver.root_ref()
    }

    pub(crate) fn max_object_number(&self) -> usize {
        let patched = self
            .patches
            .iter()
            .map(|patch| patch.re.object_number)
            .max()
            .unwrap_or(0);
        self.resolver.max_object_number().max(patched)
    }

    pub(crate) fn push_patch(&mut self, re: Reference, body: Vec<u8>) {
        self.patches.push(Patch { re, body });
    }

    /// The object's current body: the latest patch if one is pending,
    /// otherwise the resolver's view
    pub(crate) fn body_of(&self, re: Reference) -> Option<Vec<u8>> {
        if let Some(patch) = self
            .patches
            .iter()
            .rev()
            .find(|patch| patch.re.object_number == re.object_number)
        {
            return Some(patch.body.clone());
        }

        self.resolver.object_body(re).map(|body| body.to_vec())
    }

    /// Walk every object, patched bodies taking precedence and
    /// not-yet-written objects included
    pub(crate) fn merged_each_object(&self, callback: &mut dyn FnMut(Reference, &[u8])) {
        let mut pending: HashMap<usize, &Patch> = HashMap::new();
        for patch in &self.patches {
            pending.insert(patch.re.object_number, patch);
        }

        let mut seen: HashSet<usize> = HashSet::new();
        self.resolver.each_object(&mut |re, body| {
            seen.insert(re.object_number);
            match pending.get(&re.object_number) {
                Some(patch) => callback(patch.re, &patch.body),
                None => callback(re, body),
            }
        });

        let mut rest: Vec<&Patch> = self
            .patches
            .iter()
            .filter(|patch| !seen.contains(&patch.re.object_number))
            .collect();
        rest.sort_by_key(|patch| patch.re.object_number);
        rest.dedup_by_key(|patch| patch.re.object_number);

        for patch in rest {
            let latest = pending[&patch.re.object_number];
            callback(latest.re, &latest.body);
        }
    }

    /// The field object named `name`, patches included, lowest object
    /// number winning among same-name duplicates
    pub(crate) fn find_field_object(&self, name: &str) -> Option<(Reference, Vec<u8>)> {
        let mut best: Option<(Reference, Vec<u8>)> = None;

        self.merged_each_object(&mut |re, body| {
            let body = scan::strip_stream_bodies(body);
            if !is_field_candidate(&body) {
                return;
            }
            if field_name_of(&body).as_deref() != Some(name) {
                return;
            }
            let better = match &best {
                Some((existing, _)) => re.object_number < existing.object_number,
                None => true,
            };
            if better {
                best = Some((re, body.into_owned()));
            }
        });

        best
    }

    /// Pages in document order, depth-first through the `/Kids` tree
    pub(crate) fn page_refs(&self) -> Vec<Reference> {
        let mut pages = Vec::new();

        let root = match self.resolver.root_ref() {
            Ok(root) => root,
            Err(_) => return pages,
        };
        let catalog = match self.body_of(root) {
            Some(catalog) => catalog,
            None => return pages,
        };
        let tree = match scan::ref_after("Pages", &catalog) {
            Some(tree) => tree,
            None => return pages,
        };

        let mut stack = vec![tree];
        let mut visited: HashSet<usize> = HashSet::new();

        while let Some(re) = stack.pop() {
            if !visited.insert(re.object_number) {
                continue;
            }

            let body = match self.body_of(re) {
                Some(body) => body,
                None => continue,
            };

            if scan::is_page(&body) {
                pages.push(re);
                continue;
            }

            let kids = match scan::value_token_after("Kids", &body) {
                Some(token) if token.first() == Some(&b'[') => {
                    let range = scan::full_value_range("Kids", &body);
                    range.map(|range| scan::array_refs(&body[range])).unwrap_or_default()
                }
                Some(token) => scan::parse_ref_token(token)
                    .and_then(|array_ref| self.body_of(array_ref))
                    .map(|array| scan::array_refs(&array))
                    .unwrap_or_default(),
                None => Vec::new(),
            };

            for kid in kids.into_iter().rev() {
                stack.push(kid);
            }
        }

        pages
    }

    pub fn list_pages(&self) -> Vec<Page> {
        self.page_refs()
            .into_iter()
            .enumerate()
            .map(|(index, re)| {
                let body = self.body_of(re).unwrap_or_default();
                let boxes = PageBoxes {
                    media: self.inherited_box(re, "MediaBox"),
                    crop: self.inherited_box(re, "CropBox"),
                    art: scan::parse_box(&body, "ArtBox"),
                    bleed: scan::parse_box(&body, "BleedBox"),
                    trim: scan::parse_box(&body, "TrimBox"),
                };

                Page {
                    number: index + 1,
                    re,
                    boxes,
                }
            })
            .collect()
    }

    /// `/MediaBox` and `/CropBox` are inheritable through the page tree
    fn inherited_box(&self, re: Reference, key: &str) -> Option<[f64; 4]> {
        let mut current = re;

        for _ in 0..32 {
            let body = self.body_of(current)?;
            if let Some(found) = scan::parse_box(&body, key) {
                return Some(found);
            }
            current = scan::ref_after("Parent", &body)?;
        }

        None
    }

    /// Enumerate the form fields of the written document.
    ///
    /// Fields are deduplicated by name, the lowest object number winning;
    /// positions come from the matching widget, found by `/Parent` first,
    /// by shared `/T` second, or from the field itself when it is flat.
    pub fn list_fields(&self) -> Vec<Field> {
        struct WidgetInfo {
            re: Reference,
            rect: Option<[f64; 4]>,
            page: Option<Reference>,
            parent: Option<Reference>,
            name: Option<String>,
        }

        let page_refs = self.page_refs();
        let page_numbers: HashMap<usize, usize> = page_refs
            .iter()
            .enumerate()
            .map(|(index, re)| (re.object_number, index + 1))
            .collect();

        let mut widgets: Vec<WidgetInfo> = Vec::new();
        let mut candidates: Vec<(Reference, Vec<u8>)> = Vec::new();

        self.resolver.each_object(&mut |re, body| {
            let body = scan::strip_stream_bodies(body);

            if scan::is_widget(&body) {
                widgets.push(WidgetInfo {
                    re,
                    rect: scan::parse_box(&body, "Rect"),
                    page: scan::ref_after("P", &body),
                    parent: scan::ref_after("Parent", &body),
                    name: field_name_of(&body),
                });
            }

            if is_field_candidate(&body) {
                candidates.push((re, body.into_owned()));
            }
        });

        let mut widget_by_parent: HashMap<usize, usize> = HashMap::new();
        let mut widget_by_name: HashMap<&str, usize> = HashMap::new();
        for (index, widget) in widgets.iter().enumerate() {
            if let Some(parent) = widget.parent {
                widget_by_parent.entry(parent.object_number).or_insert(index);
            }
            if let Some(name) = widget.name.as_deref() {
                widget_by_name.entry(name).or_insert(index);
            }
        }

        // widgets without /P are located by scanning every page's /Annots
        let mut annots_membership: HashMap<usize, usize> = HashMap::new();
        for (page_index, page_ref) in page_refs.iter().enumerate() {
            for annot in self.page_annot_refs(*page_ref) {
                annots_membership
                    .entry(annot.object_number)
                    .or_insert(page_index + 1);
            }
        }

        let mut fields: Vec<Field> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for (re, body) in &candidates {
            let name = match field_name_of(body) {
                Some(name) => name,
                None => continue,
            };
            if !seen.insert(name.clone()) {
                continue;
            }

            let value = scan::value_token_after("V", body).and_then(decode_value_token);

            let ft = scan::value_token_after("FT", body)
                .and_then(|token| std::str::from_utf8(token).ok())
                .map(|token| token.trim_start_matches('/'))
                .filter(|token| !token.is_empty())
                .unwrap_or("Tx");
            let flags = scan::field_flags(body).unwrap_or(0);
            let field_type = FieldType::from_ft(ft, flags);

            let widget = widget_by_parent
                .get(&re.object_number)
                .or_else(|| widget_by_name.get(name.as_str()))
                .map(|&index| &widgets[index]);

            let (rect, page_hint, widget_num) = match widget {
                Some(widget) => (widget.rect, widget.page, widget.re.object_number),
                None if scan::is_widget(body) => (
                    scan::parse_box(body, "Rect"),
                    scan::ref_after("P", body),
                    re.object_number,
                ),
                None => (None, None, re.object_number),
            };

            let page = page_hint
                .and_then(|p| page_numbers.get(&p.object_number).copied())
                .or_else(|| annots_membership.get(&widget_num).copied());

            let position = match (rect, page) {
                (Some([x0, y0, x1, y1]), Some(page)) => Some(crate::field::FieldPosition {
                    x: x0.min(x1),
                    y: y0.min(y1),
                    width: (x1 - x0).abs(),
                    height: (y1 - y0).abs(),
                    page,
                }),
                _ => None,
            };

            fields.push(Field {
                name,
                value,
                field_type,
                re: *re,
                position,
            });
        }

        fields
    }

    fn page_annot_refs(&self, page_ref: Reference) -> Vec<Reference> {
        let body = match self.body_of(page_ref) {
            Some(body) => body,
            None => return Vec::new(),
        };

        match scan::value_token_after("Annots", &body) {
            Some(token) if token.first() == Some(&b'[') => scan::full_value_range("Annots", &body)
                .map(|range| scan::array_refs(&body[range]))
                .unwrap_or_default(),
            Some(token) => scan::parse_ref_token(token)
                .and_then(|array_ref| self.body_of(array_ref))
                .map(|array| scan::array_refs(&array))
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<Field> {
        self.list_fields().into_iter().find(|f| f.name() == name)
    }

    /// Create a field with a widget on the requested page. Returns `None`
    /// for an empty name; raises on an out-of-range page.
    pub fn add_field(&mut self, name: &str, opts: &FieldOptions) -> PdfResult<Option<Field>> {
        actions::add::run(self, name, opts)
    }

    /// Set a field's value and optionally rename it. Returns `false` when
    /// no field has this name.
    pub fn update_field(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        new_name: Option<&str>,
    ) -> bool {
        match actions::update::run(self, name, value.into(), new_name) {
            Ok(updated) => updated,
            Err(err) => {
                self.warn(&format!("update of {:?} failed: {}", name, err));
                false
            }
        }
    }

    /// Remove a field and its widgets. Returns `false` when no field has
    /// this name.
    pub fn remove_field(&mut self, name: &str) -> bool {
        match actions::remove::run(self, name) {
            Ok(removed) => removed,
            Err(err) => {
                self.warn(&format!("removal of {:?} failed: {}", name, err));
                false
            }
        }
    }

    /// Apply the pending patches as an appended revision. With an empty
    /// queue this is the identity.
    pub fn write(&mut self) -> PdfResult<()> {
        self.apply_pending()
    }

    pub fn write_to(&mut self, path: impl AsRef<Path>, flatten: bool) -> PdfResult<()> {
        self.apply_pending()?;
        if flatten {
            self.flatten_in_place()?;
        }

        std::fs::write(path, self.bytes())?;
        Ok(())
    }

    pub(crate) fn apply_pending(&mut self) -> PdfResult<()> {
        if self.patches.is_empty() {
            return Ok(());
        }

        let patches = incremental::dedup_patches(std::mem::take(&mut self.patches));
        let bytes = incremental::append_update(
            &self.raw,
            &patches,
            self.resolver.startxref_offset(),
            self.resolver.trailer_dict(),
            self.resolver.max_object_number(),
            self.resolver.carried_size(),
        );

        self.replace_raw(bytes)
    }

    /// Emit a single-revision document equivalent to the current state,
    /// dropping the incremental chain. Stale cross-reference streams and
    /// object-stream containers are not carried over; their contents are
    /// re-emitted standalone.
    pub fn flatten(&mut self) -> PdfResult<Vec<u8>> {
        self.apply_pending()?;

        let root = self.resolver.root_ref()?;

        let mut objects: Vec<(Reference, Vec<u8>)> = Vec::new();
        self.resolver.each_object(&mut |re, body| {
            let probe = scan::strip_stream_bodies(body);
            let type_token = scan::value_token_after("Type", &probe);
            if type_token == Some(&b"/ObjStm"[..]) || type_token == Some(&b"/XRef"[..]) {
                return;
            }

            objects.push((re, body.to_vec()));
        });

        let info = self
            .resolver
            .info_ref()
            .filter(|info| self.resolver.has_object(info.object_number));

        Ok(rewrite::write_document(&objects, root, info))
    }

    pub fn flatten_in_place(&mut self) -> PdfResult<()> {
        let bytes = self.flatten()?;
        self.replace_raw(bytes)
    }

    /// Rewrite the document keeping only the fields the selector chooses
    pub fn clear(&mut self, selector: &FieldSelector) -> PdfResult<Vec<u8>> {
        actions::clear::run(self, selector)
    }

    pub fn clear_in_place(&mut self, selector: &FieldSelector) -> PdfResult<()> {
        let bytes = self.clear(selector)?;
        self.replace_raw(bytes)
    }

    fn replace_raw(&mut self, bytes: Vec<u8>) -> PdfResult<()> {
        // the cache holds decompressed regions tied to the old buffer
        self.resolver.clear_object_stream_cache();

        let raw: Rc<[u8]> = Rc::from(bytes.into_boxed_slice());
        self.resolver = Resolver::new(Rc::clone(&raw))?;
        self.raw = raw;
        self.patches.clear();

        Ok(())
    }
}

/// The decoded `/T` of a field or widget dictionary; empty and
/// placeholder names read as `None`
pub(crate) fn field_name_of(body: &[u8]) -> Option<String> {
    let token = scan::value_token_after("T", body)?;
    if token == b"<<" {
        return None;
    }

    let name = strings::decode_pdf_string(token)?;
    if name.is_empty() {
        return None;
    }

    Some(name)
}

/// An object looks like a form field when it is named and carries at
/// least one of `/FT`, `/Subtype /Widget`, `/Kids`, or `/Parent`
pub(crate) fn is_field_candidate(body: &[u8]) -> bool {
    if field_name_of(body).is_none() {
        return false;
    }

    scan::value_token_after("FT", body).is_some()
        || scan::is_widget(body)
        || scan::value_token_after("Kids", body).is_some()
        || scan::value_token_after("Parent", body).is_some()
}

fn decode_value_token(token: &[u8]) -> Option<String> {
    match token.first()? {
        b'<' if token.starts_with(b"<<") => None,
        b'(' | b'<' => strings::decode_pdf_string(token),
        b'/' => Some(strings::decode_pdf_name(&token[1..])),
        _ => std::str::from_utf8(token).ok().map(str::to_owned),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{field::FieldKind, object_stream};
    use regex::Regex;

    /// Assemble a classic-xref document from numbered object bodies,
    /// with object 1 as the catalog
    fn build_pdf(objects: &[(usize, String)]) -> Vec<u8> {
        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets: Vec<(usize, usize)> = Vec::new();

        for (number, body) in objects {
            offsets.push((*number, out.len()));
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", number, body).as_bytes());
        }

        let max = objects.iter().map(|(n, _)| *n).max().unwrap_or(0);
        let xref_offset = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", max + 1).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for number in 1..=max {
            match offsets.iter().find(|(n, _)| *n == number) {
                Some((_, offset)) => {
                    out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes())
                }
                None => out.extend_from_slice(b"0000000000 65535 f \n"),
            }
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                max + 1,
                xref_offset
            )
            .as_bytes(),
        );

        out
    }

    /// Catalog, page tree with one empty page, and an empty AcroForm
    fn minimal_form() -> Vec<u8> {
        build_pdf(&[
            (
                1,
                "<< /Type /Catalog /Pages 2 0 R /AcroForm 3 0 R >>".into(),
            ),
            (2, "<< /Type /Pages /Kids [4 0 R] /Count 1 >>".into()),
            (3, "<< /Fields [] >>".into()),
            (
                4,
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [] >>".into(),
            ),
        ])
    }

    fn checkbox_form() -> Vec<u8> {
        build_pdf(&[
            (
                1,
                "<< /Type /Catalog /Pages 2 0 R /AcroForm 3 0 R >>".into(),
            ),
            (2, "<< /Type /Pages /Kids [4 0 R] /Count 1 >>".into()),
            (3, "<< /Fields [5 0 R] >>".into()),
            (
                4,
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [6 0 R] >>".into(),
            ),
            (5, "<< /FT /Btn /T (Agree) /V /Off >>".into()),
            (
                6,
                "<< /Type /Annot /Subtype /Widget /Parent 5 0 R /P 4 0 R /Rect [10 10 30 30] /AP << /N << /Yes 7 0 R /Off 8 0 R >> >> /AS /Off >>"
                    .into(),
            ),
            (7, "<< /Length 0 >>\nstream\n\nendstream".into()),
            (8, "<< /Length 0 >>\nstream\n\nendstream".into()),
        ])
    }

    /// The AcroForm dictionary and the field both live inside an object
    /// stream; the xref is a stream with `W [1 2 1]`
    fn objstm_form() -> Vec<u8> {
        let container = object_stream::build(&[
            (3, b"<< /Fields [5 0 R] >>".to_vec()),
            (5, b"<< /FT /Tx /T (Boxed) /V (inside) >>".to_vec()),
        ]);

        let bodies: Vec<(usize, Vec<u8>)> = vec![
            (
                1,
                b"<< /Type /Catalog /Pages 2 0 R /AcroForm 3 0 R >>".to_vec(),
            ),
            (2, b"<< /Type /Pages /Kids [4 0 R] /Count 1 >>".to_vec()),
            (
                4,
                b"<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [8 0 R] >>"
                    .to_vec(),
            ),
            (
                8,
                b"<< /Type /Annot /Subtype /Widget /Parent 5 0 R /P 4 0 R /Rect [10 10 110 30] >>"
                    .to_vec(),
            ),
            (6, container),
        ];

        let mut out = b"%PDF-1.5\n".to_vec();
        let mut offsets: HashMap<usize, usize> = HashMap::new();
        for (number, body) in &bodies {
            offsets.insert(*number, out.len());
            out.extend_from_slice(format!("{} 0 obj\n", number).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        }

        let xref_stream_offset = out.len();
        offsets.insert(7, xref_stream_offset);

        let mut entries: Vec<u8> = Vec::new();
        let mut push_entry = |kind: u8, field2: usize, field3: u8| {
            entries.push(kind);
            entries.push((field2 >> 8) as u8);
            entries.push((field2 & 0xFF) as u8);
            entries.push(field3);
        };
        push_entry(0, 0, 0);
        push_entry(1, offsets[&1], 0);
        push_entry(1, offsets[&2], 0);
        push_entry(2, 6, 0);
        push_entry(1, offsets[&4], 0);
        push_entry(2, 6, 1);
        push_entry(1, offsets[&6], 0);
        push_entry(1, offsets[&7], 0);
        push_entry(1, offsets[&8], 0);

        let compressed = crate::filter::flate::deflate(&entries);
        out.extend_from_slice(
            format!(
                "7 0 obj\n<< /Type /XRef /Size 9 /W [1 2 1] /Root 1 0 R /Filter /FlateDecode /Length {} >>\nstream\n",
                compressed.len()
            )
            .as_bytes(),
        );
        out.extend_from_slice(&compressed);
        out.extend_from_slice(b"\nendstream\nendobj\n");

        out.extend_from_slice(
            format!("startxref\n{}\n%%EOF\n", xref_stream_offset).as_bytes(),
        );

        out
    }

    #[test]
    fn write_without_patches_is_the_identity() {
        let original = minimal_form();
        let mut doc = Document::open(original.clone()).unwrap();
        doc.write().unwrap();
        assert_eq!(doc.bytes(), &original[..]);
    }

    #[test]
    fn add_text_field_then_list() {
        let mut doc = Document::open(minimal_form()).unwrap();

        let created = doc
            .add_field(
                "Name",
                &FieldOptions::text()
                    .value("John Doe")
                    .rect(100.0, 500.0, 200.0, 20.0)
                    .page(1),
            )
            .unwrap()
            .unwrap();
        assert_eq!(created.name(), "Name");

        doc.write().unwrap();
        let doc = Document::open(doc.bytes().to_vec()).unwrap();

        let fields = doc.list_fields();
        assert_eq!(fields.len(), 1);

        let field = &fields[0];
        assert_eq!(field.name(), "Name");
        assert_eq!(field.field_type(), FieldType::Text);
        assert_eq!(field.value(), Some("John Doe"));
        assert_eq!(field.page(), Some(1));
        assert_eq!(field.x(), Some(100.0));
        assert_eq!(field.y(), Some(500.0));
        assert_eq!(field.width(), Some(200.0));
        assert_eq!(field.height(), Some(20.0));

        // exactly one ref in /Fields and one widget on the page
        let form = doc.body_of(Reference::first_generation(3)).unwrap();
        let fields_range = scan::full_value_range("Fields", &form).unwrap();
        assert_eq!(scan::array_refs(&form[fields_range]).len(), 1);
        assert_eq!(
            doc.page_annot_refs(Reference::first_generation(4)).len(),
            1
        );
        assert_eq!(
            scan::value_token_after("NeedAppearances", &form),
            Some(&b"true"[..])
        );

        assert!(doc.bytes().starts_with(b"%PDF-"));
        assert!(doc.bytes().ends_with(b"%%EOF\n"));
    }

    #[test]
    fn empty_field_name_is_rejected() {
        let mut doc = Document::open(minimal_form()).unwrap();
        assert!(doc.add_field("", &FieldOptions::text()).unwrap().is_none());
        assert!(doc
            .add_field("  ", &FieldOptions::text())
            .unwrap()
            .is_none());
    }

    #[test]
    fn out_of_range_page_raises() {
        let mut doc = Document::open(minimal_form()).unwrap();
        assert!(doc
            .add_field("F", &FieldOptions::text().page(9))
            .is_err());
    }

    #[test]
    fn incremental_chain_points_at_the_previous_xref() {
        let original = minimal_form();
        let prev_startxref = {
            let text = String::from_utf8_lossy(&original);
            let tail = text.rsplit("startxref\n").next().unwrap();
            tail.split_whitespace().next().unwrap().parse::<usize>().unwrap()
        };

        let mut doc = Document::open(original.clone()).unwrap();
        doc.add_field("F", &FieldOptions::text()).unwrap().unwrap();
        doc.write().unwrap();

        assert!(doc.bytes().starts_with(&original[..]));
        let appended = String::from_utf8_lossy(&doc.bytes()[original.len()..]);
        assert!(appended.contains(&format!("/Prev {}", prev_startxref)));
        assert!(appended.contains("/Root 1 0 R"));
    }

    #[test]
    fn transliterated_value_round_trips_as_ascii_literal() {
        let mut doc = Document::open(minimal_form()).unwrap();
        doc.add_field("Name", &FieldOptions::text()).unwrap().unwrap();
        doc.write().unwrap();

        assert!(doc.update_field("Name", "María Valentina", None));
        doc.write().unwrap();

        assert!(scan::find(doc.bytes(), b"(Maria Valentina)", 0).is_some());

        let doc = Document::open(doc.bytes().to_vec()).unwrap();
        assert_eq!(
            doc.field("Name").unwrap().value(),
            Some("Maria Valentina")
        );
    }

    #[test]
    fn checkbox_toggle_follows_the_appearance_states() {
        let mut doc = Document::open(checkbox_form()).unwrap();

        assert!(doc.update_field("Agree", true, None));
        doc.write().unwrap();

        let reopened = Document::open(doc.bytes().to_vec()).unwrap();
        assert_eq!(reopened.field("Agree").unwrap().value(), Some("Yes"));
        let widget = reopened.body_of(Reference::first_generation(6)).unwrap();
        assert_eq!(scan::value_token_after("AS", &widget), Some(&b"/Yes"[..]));

        assert!(doc.update_field("Agree", false, None));
        doc.write().unwrap();

        let reopened = Document::open(doc.bytes().to_vec()).unwrap();
        assert_eq!(reopened.field("Agree").unwrap().value(), Some("Off"));
        let widget = reopened.body_of(Reference::first_generation(6)).unwrap();
        assert_eq!(scan::value_token_after("AS", &widget), Some(&b"/Off"[..]));
    }

    #[test]
    fn multi_page_placement() {
        let mut doc = Document::open(build_pdf(&[
            (
                1,
                "<< /Type /Catalog /Pages 2 0 R /AcroForm 3 0 R >>".into(),
            ),
            (
                2,
                "<< /Type /Pages /Kids [4 0 R 5 0 R 6 0 R] /Count 3 >>".into(),
            ),
            (3, "<< /Fields [] >>".into()),
            (4, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".into()),
            (5, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".into()),
            (6, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".into()),
        ]))
        .unwrap();

        doc.add_field(
            "F2",
            &FieldOptions::text().rect(10.0, 20.0, 30.0, 40.0).page(2),
        )
        .unwrap()
        .unwrap();
        doc.write().unwrap();

        let doc = Document::open(doc.bytes().to_vec()).unwrap();
        assert_eq!(doc.field("F2").unwrap().page(), Some(2));

        let annots: Vec<usize> = doc
            .page_refs()
            .iter()
            .map(|&page| doc.page_annot_refs(page).len())
            .collect();
        assert_eq!(annots, vec![0, 1, 0]);
    }

    #[test]
    fn rename_is_transitive() {
        let mut doc = Document::open(minimal_form()).unwrap();
        doc.add_field("Old", &FieldOptions::text()).unwrap().unwrap();
        doc.write().unwrap();

        assert!(doc.update_field("Old", "v", Some("New")));
        doc.write().unwrap();

        let doc = Document::open(doc.bytes().to_vec()).unwrap();
        let names: Vec<String> = doc.list_fields().iter().map(|f| f.name().to_owned()).collect();
        assert_eq!(names, vec!["New"]);
        assert_eq!(doc.field("New").unwrap().value(), Some("v"));
    }

    #[test]
    fn unknown_field_updates_and_removals_return_false() {
        let mut doc = Document::open(minimal_form()).unwrap();
        assert!(!doc.update_field("Nope", "x", None));
        assert!(!doc.remove_field("Nope"));
    }

    #[test]
    fn add_then_remove_is_neutral_after_flatten() {
        let mut doc = Document::open(minimal_form()).unwrap();
        doc.add_field("Gone", &FieldOptions::text().value("x"))
            .unwrap()
            .unwrap();
        doc.write().unwrap();

        assert!(doc.remove_field("Gone"));
        doc.write().unwrap();
        doc.flatten_in_place().unwrap();

        assert!(doc.list_fields().is_empty());

        let form = doc.body_of(Reference::first_generation(3)).unwrap();
        let fields_range = scan::full_value_range("Fields", &form).unwrap();
        assert!(scan::array_refs(&form[fields_range]).is_empty());
        assert!(doc
            .page_annot_refs(Reference::first_generation(4))
            .is_empty());
    }

    #[test]
    fn flatten_is_idempotent() {
        let mut doc = Document::open(minimal_form()).unwrap();
        doc.add_field("Name", &FieldOptions::text().value("John"))
            .unwrap()
            .unwrap();

        let once = doc.flatten().unwrap();

        let mut reopened = Document::open(once.clone()).unwrap();
        let twice = reopened.flatten().unwrap();

        assert_eq!(once, twice);
        assert!(once.starts_with(b"%PDF-1.6\n%\xE2\xE3\xCF\xD3\n"));
    }

    #[test]
    fn field_enumeration_is_stable() {
        let mut doc = Document::open(minimal_form()).unwrap();
        doc.add_field("A", &FieldOptions::text().value("1"))
            .unwrap()
            .unwrap();
        doc.add_field("B", &FieldOptions::text().value("2"))
            .unwrap()
            .unwrap();
        doc.write().unwrap();

        let doc = Document::open(doc.bytes().to_vec()).unwrap();
        let first: Vec<(String, Option<String>)> = doc
            .list_fields()
            .iter()
            .map(|f| (f.name().to_owned(), f.value().map(str::to_owned)))
            .collect();
        let second: Vec<(String, Option<String>)> = doc
            .list_fields()
            .iter()
            .map(|f| (f.name().to_owned(), f.value().map(str::to_owned)))
            .collect();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn clear_by_pattern_keeps_only_the_survivors() {
        let mut doc = Document::open(minimal_form()).unwrap();
        doc.add_field("Keep", &FieldOptions::text().value("stays"))
            .unwrap()
            .unwrap();
        doc.add_field("text-abc", &FieldOptions::text().value("a"))
            .unwrap()
            .unwrap();
        doc.add_field("text-def", &FieldOptions::text().value("b"))
            .unwrap()
            .unwrap();
        doc.write().unwrap();

        let selector = FieldSelector::pattern(Regex::new("^text-").unwrap());
        doc.clear_in_place(&selector).unwrap();

        let names: Vec<String> = doc.list_fields().iter().map(|f| f.name().to_owned()).collect();
        assert_eq!(names, vec!["Keep"]);

        assert!(scan::find(doc.bytes(), b"text-abc", 0).is_none());
        assert!(scan::find(doc.bytes(), b"text-def", 0).is_none());
    }

    #[test]
    fn clear_with_keep_list_and_predicate() {
        let mut doc = Document::open(minimal_form()).unwrap();
        doc.add_field("A", &FieldOptions::text()).unwrap().unwrap();
        doc.add_field("B", &FieldOptions::text()).unwrap().unwrap();
        doc.write().unwrap();

        let kept = doc.clear(&FieldSelector::keep(["A"])).unwrap();
        let kept = Document::open(kept).unwrap();
        assert_eq!(kept.list_fields().len(), 1);
        assert_eq!(kept.list_fields()[0].name(), "A");

        let dropped = doc
            .clear(&FieldSelector::predicate(|name| name != "A"))
            .unwrap();
        let dropped = Document::open(dropped).unwrap();
        assert_eq!(dropped.list_fields().len(), 1);
        assert_eq!(dropped.list_fields()[0].name(), "B");
    }

    #[test]
    fn fields_inside_object_streams_resolve_and_update() {
        let doc = Document::open(objstm_form()).unwrap();

        let fields = doc.list_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name(), "Boxed");
        assert_eq!(fields[0].value(), Some("inside"));
        assert_eq!(fields[0].page(), Some(1));

        let mut doc = doc;
        assert!(doc.update_field("Boxed", "changed", None));
        doc.write().unwrap();

        let reopened = Document::open(doc.bytes().to_vec()).unwrap();
        assert_eq!(reopened.field("Boxed").unwrap().value(), Some("changed"));

        // the revision-winning body is the appended standalone object
        let body = reopened.body_of(Reference::first_generation(5)).unwrap();
        assert!(scan::find(&body, b"(changed)", 0).is_some());
    }

    #[test]
    fn multipart_wrapped_input_is_stripped() {
        let mut wrapped = Vec::new();
        wrapped.extend_from_slice(
            b"------WebKitFormBoundaryAbC\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\n",
        );
        wrapped.extend_from_slice(&minimal_form());
        wrapped.extend_from_slice(b"\r\n------WebKitFormBoundaryAbC--\r\n");

        let doc = Document::open(wrapped).unwrap();

        assert!(doc.bytes().starts_with(b"%PDF-"));
        assert!(doc.bytes().ends_with(b"%%EOF"));
        assert_eq!(doc.list_pages().len(), 1);
    }

    #[test]
    fn trailer_without_root_raises() {
        let mut bytes = b"%PDF-1.4\n1 0 obj\n<< /Len 1 >>\nendobj\n".to_vec();
        let xref_offset = bytes.len();
        bytes.extend_from_slice(b"xref\n0 2\n0000000000 65535 f \n0000000009 00000 n \n");
        bytes.extend_from_slice(
            format!(
                "trailer\n<< /Size 2 >>\nstartxref\n{}\n%%EOF\n",
                xref_offset
            )
            .as_bytes(),
        );

        assert!(Document::open(bytes).is_err());
    }

    #[test]
    fn widget_without_p_is_placed_by_scanning_annots() {
        let doc = Document::open(build_pdf(&[
            (
                1,
                "<< /Type /Catalog /Pages 2 0 R /AcroForm 3 0 R >>".into(),
            ),
            (2, "<< /Type /Pages /Kids [4 0 R] /Count 1 >>".into()),
            (3, "<< /Fields [5 0 R] >>".into()),
            (
                4,
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [6 0 R] >>".into(),
            ),
            (5, "<< /FT /Tx /T (NoP) >>".into()),
            (
                6,
                "<< /Type /Annot /Subtype /Widget /Parent 5 0 R /Rect [5 5 25 25] >>".into(),
            ),
        ]))
        .unwrap();

        let field = doc.field("NoP").unwrap();
        assert_eq!(field.page(), Some(1));
        assert_eq!(field.x(), Some(5.0));
    }

    #[test]
    fn radio_group_collects_options_under_one_field() {
        let mut doc = Document::open(minimal_form()).unwrap();

        doc.add_field(
            "OptionA",
            &FieldOptions::kind(FieldKind::Radio).group(
                "Choices",
            ),
        )
        .unwrap()
        .unwrap();
        doc.add_field(
            "OptionB",
            &FieldOptions::kind(FieldKind::Radio)
                .group("Choices")
                .selected(true),
        )
        .unwrap()
        .unwrap();
        doc.write().unwrap();

        let doc = Document::open(doc.bytes().to_vec()).unwrap();
        let fields = doc.list_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name(), "Choices");
        assert_eq!(fields[0].value(), Some("OptionB"));
        assert_eq!(fields[0].field_type(), FieldType::Button { radio: true });

        // both option widgets landed on the page
        assert_eq!(
            doc.page_annot_refs(Reference::first_generation(4)).len(),
            2
        );
    }

    #[test]
    fn checkbox_creation_synthesizes_appearances() {
        let mut doc = Document::open(minimal_form()).unwrap();
        doc.add_field(
            "Agree",
            &FieldOptions::kind(FieldKind::Checkbox).value(true),
        )
        .unwrap()
        .unwrap();
        doc.write().unwrap();

        let doc = Document::open(doc.bytes().to_vec()).unwrap();
        assert_eq!(doc.field("Agree").unwrap().value(), Some("Yes"));

        let bytes = doc.bytes();
        assert!(scan::find(bytes, b"/AP << /N << /Yes", 0).is_some());
        assert!(scan::find(bytes, b"/AS /Yes", 0).is_some());
        // the on appearance draws the check, the off appearance is empty
        assert!(scan::find(bytes, b" m\n", 0).is_some());
    }

    #[test]
    fn signature_image_value_becomes_an_appearance() {
        let mut doc = Document::open(minimal_form()).unwrap();
        doc.add_field(
            "Sig",
            &FieldOptions::kind(FieldKind::Signature).rect(10.0, 10.0, 200.0, 100.0),
        )
        .unwrap()
        .unwrap();
        doc.write().unwrap();

        let png = {
            let mut out = Vec::new();
            let mut encoder = png::Encoder::new(&mut out, 4, 2);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&[200u8; 24]).unwrap();
            drop(writer);
            out
        };
        let payload = {
            use base64::{engine::general_purpose::STANDARD, Engine as _};
            format!("data:image/png;base64,{}", STANDARD.encode(&png))
        };

        assert!(doc.update_field("Sig", payload, None));
        doc.write().unwrap();

        let bytes = doc.bytes();
        assert!(scan::find(bytes, b"/Subtype /Image", 0).is_some());
        assert!(scan::find(bytes, b"/Im1 Do", 0).is_some());
        assert!(scan::find(bytes, b"/AP << /N", 0).is_some());

        // a plain text value still works as a fallback
        assert!(doc.update_field("Sig", "signed by hand", None));
        doc.write().unwrap();
        let doc = Document::open(doc.bytes().to_vec()).unwrap();
        assert_eq!(doc.field("Sig").unwrap().value(), Some("signed by hand"));
    }

    #[test]
    fn multiline_update_strips_stale_appearances() {
        let mut doc = Document::open(build_pdf(&[
            (
                1,
                "<< /Type /Catalog /Pages 2 0 R /AcroForm 3 0 R >>".into(),
            ),
            (2, "<< /Type /Pages /Kids [4 0 R] /Count 1 >>".into()),
            (3, "<< /Fields [5 0 R] >>".into()),
            (
                4,
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [6 0 R] >>".into(),
            ),
            (5, "<< /FT /Tx /T (Notes) /Ff 4096 >>".into()),
            (
                6,
                "<< /Type /Annot /Subtype /Widget /Parent 5 0 R /P 4 0 R /Rect [5 5 205 105] /AP << /N 7 0 R >> >>".into(),
            ),
            (7, "<< /Length 0 >>\nstream\n\nendstream".into()),
        ]))
        .unwrap();

        assert!(doc.update_field("Notes", "line one\nline two", None));
        doc.write().unwrap();

        let doc = Document::open(doc.bytes().to_vec()).unwrap();
        let widget = doc.body_of(Reference::first_generation(6)).unwrap();
        assert!(scan::value_token_after("AP", &widget).is_none());
        assert_eq!(
            doc.field("Notes").unwrap().value(),
            Some("line one\nline two")
        );
    }

    #[test]
    fn list_pages_reports_inherited_boxes() {
        let doc = Document::open(build_pdf(&[
            (1, "<< /Type /Catalog /Pages 2 0 R >>".into()),
            (
                2,
                "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 612 792] >>".into(),
            ),
            (3, "<< /Type /Page /Parent 2 0 R /CropBox [10 10 600 780] >>".into()),
        ]))
        .unwrap();

        let pages = doc.list_pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number(), 1);
        assert_eq!(pages[0].width(), 612.0);
        assert_eq!(pages[0].height(), 792.0);
        assert_eq!(pages[0].boxes().crop, Some([10.0, 10.0, 600.0, 780.0]));
    }

    #[test]
    fn hex_encoded_field_names_decode() {
        let doc = Document::open(build_pdf(&[
            (
                1,
                "<< /Type /Catalog /Pages 2 0 R /AcroForm 3 0 R >>".into(),
            ),
            (2, "<< /Type /Pages /Kids [4 0 R] /Count 1 >>".into()),
            (3, "<< /Fields [5 0 R] >>".into()),
            (4, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".into()),
            // /T as a UTF-16BE hex string spelling "Name"
            (5, "<< /FT /Tx /T <FEFF004E0061006D0065> /V (v) >>".into()),
        ]))
        .unwrap();

        let fields = doc.list_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name(), "Name");
    }

    #[test]
    fn indirect_fields_and_annots_arrays_are_patched() {
        let mut doc = Document::open(build_pdf(&[
            (
                1,
                "<< /Type /Catalog /Pages 2 0 R /AcroForm 3 0 R >>".into(),
            ),
            (2, "<< /Type /Pages /Kids [4 0 R] /Count 1 >>".into()),
            (3, "<< /Fields 7 0 R >>".into()),
            (
                4,
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots 8 0 R >>".into(),
            ),
            (7, "[]".into()),
            (8, "[]".into()),
        ]))
        .unwrap();

        doc.add_field("F", &FieldOptions::text().value("x"))
            .unwrap()
            .unwrap();
        doc.write().unwrap();

        let doc = Document::open(doc.bytes().to_vec()).unwrap();
        assert_eq!(doc.field("F").unwrap().value(), Some("x"));

        let fields_array = doc.body_of(Reference::first_generation(7)).unwrap();
        assert_eq!(scan::array_refs(&fields_array).len(), 1);
        let annots_array = doc.body_of(Reference::first_generation(8)).unwrap();
        assert_eq!(scan::array_refs(&annots_array).len(), 1);

        // and removal prunes them again
        let mut doc = doc;
        assert!(doc.remove_field("F"));
        doc.write().unwrap();

        let fields_array = doc.body_of(Reference::first_generation(7)).unwrap();
        assert!(scan::array_refs(&fields_array).is_empty());
        let annots_array = doc.body_of(Reference::first_generation(8)).unwrap();
        assert!(scan::array_refs(&annots_array).is_empty());
    }

    #[test]
    fn field_snapshot_mutators_delegate_to_the_document() {
        let mut doc = Document::open(minimal_form()).unwrap();
        doc.add_field("Name", &FieldOptions::text().value("a"))
            .unwrap()
            .unwrap();
        doc.write().unwrap();

        let field = doc.field("Name").unwrap();
        assert!(field.update(&mut doc, "b"));
        doc.write().unwrap();
        assert_eq!(doc.field("Name").unwrap().value(), Some("b"));

        let field = doc.field("Name").unwrap();
        assert!(field.remove(&mut doc));
        doc.write().unwrap();
        assert!(doc.list_fields().is_empty());
    }
}
