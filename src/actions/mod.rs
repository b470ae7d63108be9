//! The cross-object mutations behind `add_field`, `update_field`,
//! `remove_field`, and `clear`. Each action edits raw dictionary bodies
//! through the fragment scanner and enqueues the results as patches; the
//! shared [`ActionContext`] holds the helpers that keep the AcroForm
//! tree, page `/Annots`, and default resources consistent.

use crate::{
    document::Document,
    error::{ParseError, PdfResult},
    objects::Reference,
    scan,
};

pub(crate) mod add;
pub(crate) mod appearance;
pub(crate) mod clear;
pub(crate) mod remove;
pub(crate) mod update;

pub(crate) struct ActionContext<'a> {
    pub doc: &'a mut Document,
    next_number: usize,
}

impl<'a> ActionContext<'a> {
    pub fn new(doc: &'a mut Document) -> Self {
        let next_number = doc.max_object_number() + 1;
        Self { doc, next_number }
    }

    /// Allocate a fresh object number
    pub fn alloc(&mut self) -> Reference {
        let re = Reference::first_generation(self.next_number);
        self.next_number += 1;
        re
    }

    pub fn body_of(&self, re: Reference) -> Option<Vec<u8>> {
        self.doc.body_of(re)
    }

    pub fn push(&mut self, re: Reference, body: Vec<u8>) {
        self.doc.push_patch(re, body);
    }

    pub fn warn(&self, message: &str) {
        self.doc.warn(message);
    }

    /// The AcroForm dictionary as an indirect object, created or promoted
    /// from an inline catalog entry if needed
    pub fn acroform(&mut self) -> PdfResult<Reference> {
        let catalog_ref = self.doc.root_ref()?;
        let catalog = self
            .body_of(catalog_ref)
            .ok_or(ParseError::MalformedDocument("catalog unresolvable"))?;

        match scan::value_token_after("AcroForm", &catalog) {
            Some(b"<<") => {
                // inline form dictionary: promote it to its own object so
                // subsequent edits patch one body, not the catalog
                let range = scan::full_value_range("AcroForm", &catalog)
                    .ok_or(ParseError::MalformedDocument("unterminated /AcroForm"))?;
                let form_body = catalog[range.clone()].to_vec();

                let form_ref = self.alloc();
                self.push(form_ref, form_body);
                let patched = scan::splice(&catalog, range, form_ref.token().as_bytes());
                self.push(catalog_ref, patched);

                Ok(form_ref)
            }
            Some(token) => match scan::parse_ref_token(token) {
                Some(form_ref) => Ok(form_ref),
                None => anyhow::bail!(ParseError::MalformedDocument("bad /AcroForm value")),
            },
            None => {
                let form_ref = self.alloc();
                self.push(form_ref, b"<< /Fields [] >>".to_vec());
                let patched =
                    scan::upsert_key_value(&catalog, "AcroForm", form_ref.token().as_bytes());
                self.push(catalog_ref, patched);

                Ok(form_ref)
            }
        }
    }

    /// Add `field_ref` to `/AcroForm/Fields`, whichever form the array
    /// takes
    pub fn add_field_to_acroform(&mut self, field_ref: Reference) -> PdfResult<()> {
        let form_ref = self.acroform()?;
        let body = self
            .body_of(form_ref)
            .ok_or(ParseError::MalformedDocument("AcroForm unresolvable"))?;

        match scan::value_token_after("Fields", &body) {
            Some(token) if token.first() == Some(&b'[') => {
                match scan::add_ref_to_inline_array(&body, "Fields", field_ref) {
                    Some(patched) => self.push(form_ref, patched),
                    None => self.warn("could not extend inline /Fields array"),
                }
            }
            Some(token) => match scan::parse_ref_token(token) {
                Some(array_ref) => {
                    let array = self.body_of(array_ref).unwrap_or_else(|| b"[]".to_vec());
                    match scan::add_ref_to_array(&array, field_ref) {
                        Some(patched) => self.push(array_ref, patched),
                        None => self.warn("could not extend indirect /Fields array"),
                    }
                }
                None => self.warn("unrecognized /Fields value"),
            },
            None => {
                let patched = scan::upsert_key_value(
                    &body,
                    "Fields",
                    format!("[{}]", field_ref.token()).as_bytes(),
                );
                self.push(form_ref, patched);
            }
        }

        Ok(())
    }

    pub fn remove_field_from_acroform(&mut self, field_ref: Reference) {
        let form_ref = match self.acroform() {
            Ok(form_ref) => form_ref,
            Err(_) => return,
        };
        let body = match self.body_of(form_ref) {
            Some(body) => body,
            None => return,
        };

        match scan::value_token_after("Fields", &body) {
            Some(token) if token.first() == Some(&b'[') => {
                if let Some(patched) = scan::remove_ref_from_inline_array(&body, "Fields", field_ref)
                {
                    self.push(form_ref, patched);
                }
            }
            Some(token) => {
                if let Some(array_ref) = scan::parse_ref_token(token) {
                    if let Some(array) = self.body_of(array_ref) {
                        if let Some(patched) = scan::remove_ref_from_array(&array, field_ref) {
                            self.push(array_ref, patched);
                        }
                    }
                }
            }
            None => {}
        }
    }

    pub fn ensure_need_appearances(&mut self) -> PdfResult<()> {
        let form_ref = self.acroform()?;
        let body = self
            .body_of(form_ref)
            .ok_or(ParseError::MalformedDocument("AcroForm unresolvable"))?;

        if scan::value_token_after("NeedAppearances", &body) != Some(b"true") {
            let patched = scan::upsert_key_value(&body, "NeedAppearances", b"true");
            self.push(form_ref, patched);
        }

        Ok(())
    }

    /// We author AcroForm, not XFA; a stale XFA packet would shadow every
    /// edit in XFA-aware viewers
    pub fn strip_xfa(&mut self) -> PdfResult<()> {
        let form_ref = self.acroform()?;
        let body = self
            .body_of(form_ref)
            .ok_or(ParseError::MalformedDocument("AcroForm unresolvable"))?;

        if scan::value_token_after("XFA", &body).is_some() {
            match scan::remove_key(&body, "XFA") {
                Some(patched) => self.push(form_ref, patched),
                None => self.warn("could not remove /XFA"),
            }
        }

        Ok(())
    }

    /// `/AcroForm/DR/Font/Helv` must resolve whenever the default
    /// appearance `(/Helv 0 Tf 0 g)` is in play
    pub fn ensure_default_resources(&mut self) -> PdfResult<()> {
        let form_ref = self.acroform()?;
        let body = self
            .body_of(form_ref)
            .ok_or(ParseError::MalformedDocument("AcroForm unresolvable"))?;

        match scan::value_token_after("DR", &body) {
            None => {
                let font_ref = self.new_helv_font();
                let patched = scan::upsert_key_value(
                    &body,
                    "DR",
                    format!("<< /Font << /Helv {} >> >>", font_ref.token()).as_bytes(),
                );
                self.push(form_ref, patched);
            }
            Some(b"<<") => {
                let dr_range = scan::full_value_range("DR", &body)
                    .ok_or(ParseError::MalformedDocument("unterminated /DR"))?;
                let dr = body[dr_range.clone()].to_vec();

                if let Some(updated) = self.ensure_helv_in_resources(&dr)? {
                    let patched = scan::splice(&body, dr_range, &updated);
                    self.push(form_ref, patched);
                }
            }
            Some(token) => {
                let dr_ref = match scan::parse_ref_token(token) {
                    Some(dr_ref) => dr_ref,
                    None => {
                        self.warn("unrecognized /DR value");
                        return Ok(());
                    }
                };
                let dr = self
                    .body_of(dr_ref)
                    .ok_or(ParseError::MalformedDocument("/DR unresolvable"))?;

                if let Some(updated) = self.ensure_helv_in_resources(&dr)? {
                    self.push(dr_ref, updated);
                }
            }
        }

        Ok(())
    }

    /// Returns the updated resources fragment, or `None` when `/Helv` is
    /// already reachable
    fn ensure_helv_in_resources(&mut self, dr: &[u8]) -> PdfResult<Option<Vec<u8>>> {
        match scan::value_token_after("Font", dr) {
            None => {
                let font_ref = self.new_helv_font();
                Ok(Some(scan::upsert_key_value(
                    dr,
                    "Font",
                    format!("<< /Helv {} >>", font_ref.token()).as_bytes(),
                )))
            }
            Some(b"<<") => {
                let font_range = scan::full_value_range("Font", dr)
                    .ok_or(ParseError::MalformedDocument("unterminated /Font"))?;
                let font = &dr[font_range.clone()];

                if scan::value_token_after("Helv", font).is_some() {
                    return Ok(None);
                }

                let font_ref = self.new_helv_font();
                let updated = scan::upsert_key_value(font, "Helv", font_ref.token().as_bytes());
                Ok(Some(scan::splice(dr, font_range, &updated)))
            }
            Some(token) => {
                if let Some(fonts_ref) = scan::parse_ref_token(token) {
                    if let Some(fonts) = self.body_of(fonts_ref) {
                        if scan::value_token_after("Helv", &fonts).is_none() {
                            let font_ref = self.new_helv_font();
                            let updated =
                                scan::upsert_key_value(&fonts, "Helv", font_ref.token().as_bytes());
                            self.push(fonts_ref, updated);
                        }
                    }
                }
                Ok(None)
            }
        }
    }

    fn new_helv_font(&mut self) -> Reference {
        let font_ref = self.alloc();
        self.push(
            font_ref,
            b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec(),
        );
        font_ref
    }

    pub fn page_ref(&self, page: usize) -> PdfResult<Reference> {
        let pages = self.doc.page_refs();

        match pages.get(page.wrapping_sub(1)) {
            Some(&re) if page >= 1 => Ok(re),
            _ => anyhow::bail!(ParseError::InvalidPageNumber {
                found: page,
                page_count: pages.len(),
            }),
        }
    }

    /// Add `widget_ref` to the page's `/Annots`, creating the array if it
    /// is missing, editing it inline, or patching the referenced array
    /// object
    pub fn add_annot_to_page(&mut self, page_ref: Reference, widget_ref: Reference) -> PdfResult<()> {
        let body = self
            .body_of(page_ref)
            .ok_or(ParseError::MalformedDocument("page unresolvable"))?;

        match scan::value_token_after("Annots", &body) {
            None => {
                let patched = scan::upsert_key_value(
                    &body,
                    "Annots",
                    format!("[{}]", widget_ref.token()).as_bytes(),
                );
                self.push(page_ref, patched);
            }
            Some(token) if token.first() == Some(&b'[') => {
                match scan::add_ref_to_inline_array(&body, "Annots", widget_ref) {
                    Some(patched) => self.push(page_ref, patched),
                    None => self.warn("could not extend inline /Annots"),
                }
            }
            Some(token) => match scan::parse_ref_token(token) {
                Some(array_ref) => {
                    let array = self.body_of(array_ref).unwrap_or_else(|| b"[]".to_vec());
                    match scan::add_ref_to_array(&array, widget_ref) {
                        Some(patched) => self.push(array_ref, patched),
                        None => self.warn("could not extend indirect /Annots"),
                    }
                }
                None => self.warn("unrecognized /Annots value"),
            },
        }

        Ok(())
    }

    /// Remove `widget_ref` from its page's `/Annots`. The `/P` hint is
    /// tried first; a widget without one is located by scanning every
    /// page.
    pub fn remove_annot_from_page(&mut self, widget_ref: Reference, hint: Option<Reference>) {
        let candidates: Vec<Reference> = match hint {
            Some(page_ref) => {
                let mut pages = vec![page_ref];
                pages.extend(self.doc.page_refs().into_iter().filter(|&p| p != page_ref));
                pages
            }
            None => self.doc.page_refs(),
        };

        for page_ref in candidates {
            let body = match self.body_of(page_ref) {
                Some(body) => body,
                None => continue,
            };

            match scan::value_token_after("Annots", &body) {
                Some(token) if token.first() == Some(&b'[') => {
                    if let Some(patched) =
                        scan::remove_ref_from_inline_array(&body, "Annots", widget_ref)
                    {
                        self.push(page_ref, patched);
                        return;
                    }
                }
                Some(token) => {
                    if let Some(array_ref) = scan::parse_ref_token(token) {
                        if let Some(array) = self.body_of(array_ref) {
                            if let Some(patched) = scan::remove_ref_from_array(&array, widget_ref)
                            {
                                self.push(array_ref, patched);
                                return;
                            }
                        }
                    }
                }
                None => {}
            }
        }
    }

    /// Every widget that descends from the field via `/Parent`, or,
    /// lacking `/Parent`, shares its name via `/T`. The field object
    /// itself is not included.
    pub fn widgets_for(&self, field_ref: Reference, name: &str) -> Vec<(Reference, Vec<u8>)> {
        let mut widgets = Vec::new();

        self.doc.merged_each_object(&mut |re, body| {
            if re == field_ref || !scan::is_widget(body) {
                return;
            }

            match scan::ref_after("Parent", body) {
                Some(parent) => {
                    if parent == field_ref {
                        widgets.push((re, body.to_vec()));
                    }
                }
                None => {
                    if crate::document::field_name_of(body).as_deref() == Some(name) {
                        widgets.push((re, body.to_vec()));
                    }
                }
            }
        });

        widgets
    }
}
