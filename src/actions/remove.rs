//! Removing a field: its widgets leave their pages' `/Annots`, the field
//! leaves `/AcroForm/Fields`, and the objects themselves are marked
//! deleted by blanking `/T` so enumeration skips them.

use crate::{
    actions::ActionContext,
    document::{self, Document},
    error::PdfResult,
    objects::Reference,
    scan,
};

pub(crate) fn run(doc: &mut Document, name: &str) -> PdfResult<bool> {
    let (field_ref, field_body) = match doc.find_field_object(name) {
        Some(found) => found,
        None => return Ok(false),
    };

    let mut ctx = ActionContext::new(doc);

    // the widget set: the field itself when it is flat, plus every widget
    // pointing back at it by /Parent or sharing its /T
    let mut widgets: Vec<(Reference, Vec<u8>)> = Vec::new();
    if scan::is_widget(&field_body) {
        widgets.push((field_ref, field_body.clone()));
    }
    widgets.extend(ctx.widgets_for(field_ref, name));

    for (widget_ref, widget_body) in &widgets {
        let hint = scan::ref_after("P", widget_body);
        ctx.remove_annot_from_page(*widget_ref, hint);
    }

    ctx.remove_field_from_acroform(field_ref);

    ctx.push(field_ref, blank_name(&field_body));
    for (widget_ref, widget_body) in widgets {
        if widget_ref == field_ref {
            continue;
        }
        if document::field_name_of(&widget_body).is_some() {
            ctx.push(widget_ref, blank_name(&widget_body));
        }
    }

    Ok(true)
}

/// `/T ()` marks the object deleted without disturbing its other entries
fn blank_name(body: &[u8]) -> Vec<u8> {
    scan::replace_key_value(body, "T", b"()").unwrap_or_else(|| body.to_vec())
}
