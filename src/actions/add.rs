//! Creating a field: a field dictionary, a widget annotation, the
//! AcroForm bookkeeping, and the page `/Annots` entry, all enqueued as
//! patches.

use crate::{
    actions::{appearance, ActionContext},
    document::Document,
    error::PdfResult,
    field::{Field, FieldKind, FieldOptions, FieldPosition, FieldType},
    objects::{Reference, Value},
    scan,
    strings::{self, format_number},
};

/// `/Ff` bits 15 (Radio) and 14 (NoToggleToOff)
const RADIO_FLAGS: i64 = 49152;

const DEFAULT_APPEARANCE: &str = "(/Helv 0 Tf 0 g)";

pub(crate) fn run(
    doc: &mut Document,
    name: &str,
    opts: &FieldOptions,
) -> PdfResult<Option<Field>> {
    if name.trim().is_empty() {
        return Ok(None);
    }

    let mut ctx = ActionContext::new(doc);
    let page_ref = ctx.page_ref(opts.page)?;

    if opts.kind.is_radio() {
        return add_radio_option(&mut ctx, name, opts, page_ref);
    }

    let field_ref = ctx.alloc();
    let widget_ref = ctx.alloc();

    let ft = opts.kind.ft_name().to_owned();
    let flags = metadata_flags(opts).unwrap_or(0);

    // button values normalize to the /Yes and /Off states; everything
    // else is stored as written
    let value_token = normalized_value_token(opts);
    let signature_payload = signature_payload(opts);

    let mut field = format!(
        "<< /FT /{} /T {} /Ff {} /DA {}",
        ft,
        strings::encode_text(name),
        flags,
        DEFAULT_APPEARANCE,
    );
    if signature_payload.is_none() {
        if let Some(token) = &value_token {
            field.push_str(&format!(" /V {}", token));
        }
    }
    push_metadata(&mut field, opts);
    field.push_str(" >>");

    let rect_token = rect_token(opts);
    let mut widget = format!(
        "<< /Type /Annot /Subtype /Widget /Parent {} /P {} /FT /{} /Rect {} /F 4 /DA {}",
        field_ref.token(),
        page_ref.token(),
        ft,
        rect_token,
        DEFAULT_APPEARANCE,
    );
    if signature_payload.is_none() {
        if let Some(token) = &value_token {
            widget.push_str(&format!(" /V {}", token));
        }
    }

    if opts.kind.is_checkbox() {
        let (yes_ref, off_ref) = appearance::checkbox_appearance(&mut ctx, opts.width, opts.height);
        let state = value_token.as_deref().unwrap_or("/Off");
        widget.push_str(&format!(
            " /AP << /N << /Yes {} /Off {} >> >> /AS {}",
            yes_ref.token(),
            off_ref.token(),
            state,
        ));
    }
    widget.push_str(" >>");

    ctx.push(field_ref, field.into_bytes());
    ctx.push(widget_ref, widget.into_bytes());

    ctx.add_field_to_acroform(field_ref)?;
    ctx.ensure_need_appearances()?;
    ctx.strip_xfa()?;
    ctx.ensure_default_resources()?;
    ctx.add_annot_to_page(page_ref, widget_ref)?;

    if let Some(payload) = signature_payload {
        appearance::apply_signature_appearance(&mut ctx, widget_ref, &payload)?;
    }

    Ok(Some(snapshot(name, opts, field_ref, &value_token)))
}

/// Radio buttons: each call adds one option widget; the group field is
/// created on first use and shared afterwards. With a `group_id`, the
/// field carries that name and this option's on-state is `name`.
fn add_radio_option(
    ctx: &mut ActionContext<'_>,
    name: &str,
    opts: &FieldOptions,
    page_ref: Reference,
) -> PdfResult<Option<Field>> {
    let group_name = opts.group_id.clone().unwrap_or_else(|| name.to_owned());
    let on_state = if group_name == name {
        "Yes".to_owned()
    } else {
        strings::encode_pdf_name(name)
    };

    let existing = ctx.doc.find_field_object(&group_name);
    let widget_ref = ctx.alloc();

    let mut widget = format!(
        "<< /Type /Annot /Subtype /Widget /FT /Btn /P {} /Rect {} /F 4 /DA {}",
        page_ref.token(),
        rect_token(opts),
        DEFAULT_APPEARANCE,
    );
    widget.push_str(&format!(
        " /AS /{}",
        if opts.selected { on_state.as_str() } else { "Off" }
    ));

    let field_ref = match existing {
        Some((field_ref, field_body)) => {
            widget.push_str(&format!(" /Parent {} >>", field_ref.token()));
            ctx.push(widget_ref, widget.into_bytes());

            let mut body = attach_kid(&field_body, widget_ref)
                .unwrap_or_else(|| {
                    ctx.warn("could not extend radio group /Kids");
                    field_body.clone()
                });
            if opts.selected {
                body = scan::upsert_key_value(&body, "V", format!("/{}", on_state).as_bytes());
            }
            ctx.push(field_ref, body);

            field_ref
        }
        None => {
            let field_ref = ctx.alloc();
            widget.push_str(&format!(" /Parent {} >>", field_ref.token()));
            ctx.push(widget_ref, widget.into_bytes());

            let flags = metadata_flags(opts).unwrap_or(RADIO_FLAGS);
            let value = if opts.selected {
                format!("/{}", on_state)
            } else {
                "/Off".to_owned()
            };

            let mut field = format!(
                "<< /FT /Btn /T {} /Ff {} /DA {} /V {} /Kids [{}]",
                strings::encode_text(&group_name),
                flags,
                DEFAULT_APPEARANCE,
                value,
                widget_ref.token(),
            );
            push_metadata(&mut field, opts);
            field.push_str(" >>");
            ctx.push(field_ref, field.into_bytes());

            ctx.add_field_to_acroform(field_ref)?;

            field_ref
        }
    };

    ctx.ensure_need_appearances()?;
    ctx.strip_xfa()?;
    ctx.ensure_default_resources()?;
    ctx.add_annot_to_page(page_ref, widget_ref)?;

    let value = if opts.selected {
        Some(on_state)
    } else {
        None
    };

    Ok(Some(Field {
        name: group_name,
        value,
        field_type: FieldType::Button { radio: true },
        re: field_ref,
        position: Some(position(opts)),
    }))
}

fn attach_kid(field_body: &[u8], widget_ref: Reference) -> Option<Vec<u8>> {
    match scan::value_token_after("Kids", field_body) {
        Some(token) if token.first() == Some(&b'[') => {
            scan::add_ref_to_inline_array(field_body, "Kids", widget_ref)
        }
        Some(_) => None,
        None => Some(scan::upsert_key_value(
            field_body,
            "Kids",
            format!("[{}]", widget_ref.token()).as_bytes(),
        )),
    }
}

fn metadata_flags(opts: &FieldOptions) -> Option<i64> {
    opts.metadata.iter().find_map(|(key, value)| match value {
        Value::Int(flags) if key == "Ff" => Some(*flags),
        _ => None,
    })
}

fn push_metadata(field: &mut String, opts: &FieldOptions) {
    for (key, value) in &opts.metadata {
        // /Ff is folded into the field flags, not emitted twice
        if key == "Ff" {
            continue;
        }
        field.push_str(&format!(
            " {} {}",
            strings::format_pdf_key(key),
            value.to_token()
        ));
    }
}

fn rect_token(opts: &FieldOptions) -> String {
    format!(
        "[{} {} {} {}]",
        format_number(opts.x),
        format_number(opts.y),
        format_number(opts.x + opts.width),
        format_number(opts.y + opts.height),
    )
}

fn position(opts: &FieldOptions) -> FieldPosition {
    FieldPosition {
        x: opts.x,
        y: opts.y,
        width: opts.width,
        height: opts.height,
        page: opts.page,
    }
}

fn normalized_value_token(opts: &FieldOptions) -> Option<String> {
    if opts.kind.is_button() {
        let on = opts.value.as_ref().map_or(false, Value::is_on);
        return Some(if on { "/Yes" } else { "/Off" }.to_owned());
    }

    Some(strings::encode_pdf_string(opts.value.as_ref()?))
}

fn signature_payload(opts: &FieldOptions) -> Option<Vec<u8>> {
    if !opts.kind.is_signature() {
        return None;
    }

    opts.value
        .as_ref()
        .and_then(|value| value.as_text())
        .and_then(appearance::image_payload)
}

fn snapshot(
    name: &str,
    opts: &FieldOptions,
    field_ref: Reference,
    value_token: &Option<String>,
) -> Field {
    let kind = match &opts.kind {
        FieldKind::Text => FieldType::Text,
        FieldKind::Button | FieldKind::Checkbox => FieldType::Button { radio: false },
        FieldKind::Radio => FieldType::Button { radio: true },
        FieldKind::Choice => FieldType::Choice,
        FieldKind::Signature => FieldType::Signature,
        FieldKind::Name(name) => FieldType::from_ft(name, 0),
    };

    let value = value_token.as_ref().map(|token| {
        token
            .strip_prefix('/')
            .map(str::to_owned)
            .or_else(|| strings::decode_pdf_string(token.as_bytes()))
            .unwrap_or_else(|| token.clone())
    });

    Field {
        name: name.to_owned(),
        value,
        field_type: kind,
        re: field_ref,
        position: Some(position(opts)),
    }
}
