//! The `clear` rewrite: a fresh document containing only the caller's
//! chosen fields, with the excluded fields' widgets pruned from every
//! page `/Annots` and from `/AcroForm/Fields`, and dangling widget
//! references dropped along the way.

use std::collections::HashSet;

use regex::Regex;

use crate::{
    document::{self, Document},
    error::PdfResult,
    objects::Reference,
    rewrite, scan,
};

/// Which fields survive a [`Document::clear`]
pub enum FieldSelector {
    /// Keep exactly these names
    Keep(Vec<String>),
    /// Drop exactly these names
    Remove(Vec<String>),
    /// Drop every field whose name matches
    Pattern(Regex),
    /// Keep every field for which the callback returns `true`
    Predicate(Box<dyn Fn(&str) -> bool>),
}

impl FieldSelector {
    pub fn keep<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self::Keep(names.into_iter().map(Into::into).collect())
    }

    pub fn remove<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self::Remove(names.into_iter().map(Into::into).collect())
    }

    pub fn pattern(pattern: Regex) -> Self {
        Self::Pattern(pattern)
    }

    pub fn predicate(keeps: impl Fn(&str) -> bool + 'static) -> Self {
        Self::Predicate(Box::new(keeps))
    }

    pub(crate) fn keeps(&self, name: &str) -> bool {
        match self {
            Self::Keep(names) => names.iter().any(|n| n == name),
            Self::Remove(names) => !names.iter().any(|n| n == name),
            Self::Pattern(pattern) => !pattern.is_match(name),
            Self::Predicate(keeps) => keeps(name),
        }
    }
}

pub(crate) fn run(doc: &mut Document, selector: &FieldSelector) -> PdfResult<Vec<u8>> {
    doc.apply_pending()?;

    let mut dropped_names: HashSet<String> = HashSet::new();
    let mut dropped_fields: HashSet<usize> = HashSet::new();
    for field in doc.list_fields() {
        if !selector.keeps(field.name()) {
            dropped_names.insert(field.name().to_owned());
            dropped_fields.insert(field.object_number());
        }
    }

    // the exclusion set: the fields themselves plus every widget bound to
    // them by /Parent or /T, plus widgets whose parent does not resolve
    let mut dropped: HashSet<usize> = dropped_fields.clone();
    doc.resolver.each_object(&mut |re, body| {
        let body = scan::strip_stream_bodies(body);
        if !scan::is_widget(&body) {
            return;
        }

        match scan::ref_after("Parent", &body) {
            Some(parent) => {
                if dropped_fields.contains(&parent.object_number)
                    || !doc.resolver.has_object(parent.object_number)
                {
                    dropped.insert(re.object_number);
                }
            }
            None => {
                if let Some(name) = document::field_name_of(&body) {
                    if dropped_names.contains(&name) {
                        dropped.insert(re.object_number);
                    }
                }
            }
        }
    });

    let catalog_ref = doc.resolver.root_ref()?;
    let (form_owner, fields_array) = locate_fields_array(doc, catalog_ref);

    let mut annots_arrays: HashSet<usize> = HashSet::new();
    for page_ref in doc.page_refs() {
        if let Some(body) = doc.body_of(page_ref) {
            if let Some(token) = scan::value_token_after("Annots", &body) {
                if token.first() != Some(&b'[') {
                    if let Some(array_ref) = scan::parse_ref_token(token) {
                        annots_arrays.insert(array_ref.object_number);
                    }
                }
            }
        }
    }

    let gone = |re: Reference| {
        dropped.contains(&re.object_number) || !doc.resolver.has_object(re.object_number)
    };

    let mut objects: Vec<(Reference, Vec<u8>)> = Vec::new();
    doc.resolver.each_object(&mut |re, body| {
        if dropped.contains(&re.object_number) {
            return;
        }

        let probe = scan::strip_stream_bodies(body);
        let type_token = scan::value_token_after("Type", &probe);
        if type_token == Some(&b"/ObjStm"[..]) || type_token == Some(&b"/XRef"[..]) {
            return;
        }

        let mut body = body.to_vec();

        if scan::is_page(&probe) {
            if let Some(range) = scan::full_value_range("Annots", &body) {
                if body[range.start] == b'[' {
                    for annot in scan::array_refs(&body[range]) {
                        if gone(annot) {
                            if let Some(pruned) =
                                scan::remove_ref_from_inline_array(&body, "Annots", annot)
                            {
                                body = pruned;
                            }
                        }
                    }
                }
            }
        }

        if Some(re.object_number) == form_owner {
            for &number in &dropped_fields {
                let field_ref = Reference::first_generation(number);
                if let Some(pruned) = scan::remove_ref_from_inline_array(&body, "Fields", field_ref)
                {
                    body = pruned;
                }
            }
        }

        if Some(re.object_number) == fields_array {
            for &number in &dropped_fields {
                if let Some(pruned) =
                    scan::remove_ref_from_array(&body, Reference::first_generation(number))
                {
                    body = pruned;
                }
            }
        }

        if annots_arrays.contains(&re.object_number) {
            for annot in scan::array_refs(&body.clone()) {
                if gone(annot) {
                    if let Some(pruned) = scan::remove_ref_from_array(&body, annot) {
                        body = pruned;
                    }
                }
            }
        }

        objects.push((re, body));
    });

    let info = doc
        .resolver
        .info_ref()
        .filter(|info| doc.resolver.has_object(info.object_number));

    Ok(rewrite::write_document(&objects, catalog_ref, info))
}

/// Where `/AcroForm/Fields` lives: the object owning the inline array
/// (the form dictionary, or the catalog when the form is inline), and the
/// array's own object number when it is indirect
fn locate_fields_array(doc: &Document, catalog_ref: Reference) -> (Option<usize>, Option<usize>) {
    let catalog = match doc.body_of(catalog_ref) {
        Some(catalog) => catalog,
        None => return (None, None),
    };

    let (owner_num, form_body) = match scan::value_token_after("AcroForm", &catalog) {
        Some(b"<<") => (catalog_ref.object_number, catalog),
        Some(token) => match scan::parse_ref_token(token) {
            Some(form_ref) => match doc.body_of(form_ref) {
                Some(body) => (form_ref.object_number, body),
                None => return (None, None),
            },
            None => return (None, None),
        },
        None => return (None, None),
    };

    match scan::value_token_after("Fields", &form_body) {
        Some(token) if token.first() == Some(&b'[') => (Some(owner_num), None),
        Some(token) => (
            Some(owner_num),
            scan::parse_ref_token(token).map(|re| re.object_number),
        ),
        None => (Some(owner_num), None),
    }
}
