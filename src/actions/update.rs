//! Updating a field's value (and optionally its name): the `/V` rewrite
//! propagates to every widget descending from the field, `/AS` follows for
//! button widgets with appearances, and multiline text fields lose their
//! stale `/AP` so viewers regenerate the layout.

use crate::{
    actions::{appearance, ActionContext},
    document::{self, Document},
    error::PdfResult,
    field::FieldType,
    objects::Value,
    scan, strings,
};

pub(crate) fn run(
    doc: &mut Document,
    name: &str,
    value: Value,
    new_name: Option<&str>,
) -> PdfResult<bool> {
    let (field_ref, field_body) = match doc.find_field_object(name) {
        Some(found) => found,
        None => return Ok(false),
    };

    let mut ctx = ActionContext::new(doc);

    let ft = scan::value_token_after("FT", &field_body)
        .and_then(|token| std::str::from_utf8(token).ok())
        .map(|token| token.trim_start_matches('/').to_owned())
        .unwrap_or_else(|| "Tx".to_owned());
    let flags = scan::field_flags(&field_body).unwrap_or(0);
    let field_type = FieldType::from_ft(&ft, flags);

    // an image-bearing signature value becomes an appearance stream, not
    // a textual /V; decode failure falls through to the textual path
    if field_type == FieldType::Signature {
        if let Some(payload) = value.as_text().and_then(appearance::image_payload) {
            let widget_ref = if scan::is_widget(&field_body) {
                Some(field_ref)
            } else {
                ctx.widgets_for(field_ref, name).first().map(|(re, _)| *re)
            };

            if let Some(widget_ref) = widget_ref {
                match appearance::apply_signature_appearance(&mut ctx, widget_ref, &payload) {
                    Ok(()) => {
                        ctx.ensure_need_appearances()?;
                        return Ok(true);
                    }
                    Err(err) => ctx.warn(&format!("signature appearance failed: {}", err)),
                }
            }
        }
    }

    let widgets = ctx.widgets_for(field_ref, name);
    let multiline = scan::is_multiline_field(&field_body);
    let button = matches!(field_type, FieldType::Button { .. });

    let value_token = if button {
        button_value_token(&value, &field_body, &widgets)
    } else {
        strings::encode_pdf_string(&value)
    };

    let mut body = scan::upsert_key_value(&field_body, "V", value_token.as_bytes());
    if button && scan::is_widget(&body) && scan::value_token_after("AP", &body).is_some() {
        let state = scan::appearance_choice_for(&value, &body).unwrap_or_else(|| value_token.clone());
        body = scan::upsert_key_value(&body, "AS", state.as_bytes());
    }
    if multiline {
        match scan::remove_appearance_stream(&body) {
            Some(stripped) => body = stripped,
            None => {}
        }
    }
    if let Some(new_name) = new_name {
        body = scan::upsert_key_value(&body, "T", strings::encode_text(new_name).as_bytes());
    }
    ctx.push(field_ref, body);

    for (widget_ref, widget_body) in widgets {
        let mut body = scan::upsert_key_value(&widget_body, "V", value_token.as_bytes());

        if button && scan::value_token_after("AP", &body).is_some() {
            // each widget maps the value onto its own appearance states
            let state = scan::appearance_choice_for(&value, &body)
                .unwrap_or_else(|| "/Off".to_owned());
            body = scan::upsert_key_value(&body, "AS", state.as_bytes());
        }

        if multiline {
            if let Some(stripped) = scan::remove_appearance_stream(&body) {
                body = stripped;
            }
        }

        if let Some(new_name) = new_name {
            if document::field_name_of(&body).is_some() {
                body =
                    scan::upsert_key_value(&body, "T", strings::encode_text(new_name).as_bytes());
            }
        }

        ctx.push(widget_ref, body);
    }

    ctx.ensure_need_appearances()?;

    Ok(true)
}

/// `/V` for a button field: truthy values select the on state named by
/// the field's (or first widget's) appearance dictionary, everything else
/// is `/Off`
fn button_value_token(
    value: &Value,
    field_body: &[u8],
    widgets: &[(crate::objects::Reference, Vec<u8>)],
) -> String {
    let ap_source: &[u8] = if scan::value_token_after("AP", field_body).is_some() {
        field_body
    } else {
        widgets
            .iter()
            .find(|(_, body)| scan::value_token_after("AP", body).is_some())
            .map(|(_, body)| body.as_slice())
            .unwrap_or(field_body)
    };

    if let Some(choice) = scan::appearance_choice_for(value, ap_source) {
        return choice;
    }

    if !value.is_on() {
        return "/Off".to_owned();
    }

    match value.as_text() {
        Some(state) => format!("/{}", strings::encode_pdf_name(state)),
        None => format!("/{}", scan::appearance_on_state(ap_source)),
    }
}
