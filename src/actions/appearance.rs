//! Appearance streams: the synthesized check mark for check boxes and the
//! image-backed Form XObject for signature fields.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::{
    actions::ActionContext,
    error::{ParseError, PdfResult},
    filter::flate::deflate,
    image::{self, ImageKind},
    objects::Reference,
    scan,
    strings::format_number,
};

/// Recognize a signature value carrying an image: either a
/// `data:image/…;base64,` URI or a bare base64 blob whose decoded bytes
/// sniff as JPEG or PNG
pub(crate) fn image_payload(text: &str) -> Option<Vec<u8>> {
    let trimmed = text.trim();

    let encoded = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.split_once(";base64,")?.1,
        None => trimmed,
    };

    if encoded.len() < 16 {
        return None;
    }

    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = BASE64.decode(compact.as_bytes()).ok()?;

    image::sniff(&decoded).ok()?;
    Some(decoded)
}

/// Synthesize `/Yes` and `/Off` appearance streams for a check box: Yes
/// draws a three-vertex check scaled to the widget rectangle, Off is an
/// empty stream
pub(crate) fn checkbox_appearance(
    ctx: &mut ActionContext<'_>,
    width: f64,
    height: f64,
) -> (Reference, Reference) {
    let content = format!(
        "q\n2 w\n{} {} m\n{} {} l\n{} {} l\nS\nQ\n",
        format_number(0.15 * width),
        format_number(0.55 * height),
        format_number(0.4 * width),
        format_number(0.25 * height),
        format_number(0.85 * width),
        format_number(0.8 * height),
    );

    let yes_ref = ctx.alloc();
    ctx.push(yes_ref, form_xobject(width, height, content.as_bytes(), None));

    let off_ref = ctx.alloc();
    ctx.push(off_ref, form_xobject(width, height, b"", None));

    (yes_ref, off_ref)
}

fn form_xobject(width: f64, height: f64, content: &[u8], resources: Option<String>) -> Vec<u8> {
    let mut dict = format!(
        "<< /Type /XObject /Subtype /Form /BBox [0 0 {} {}]",
        format_number(width),
        format_number(height)
    );
    if let Some(resources) = resources {
        dict.push_str(&format!(" /Resources {}", resources));
    }
    dict.push_str(&format!(" /Length {} >>", content.len()));

    let mut out = dict.into_bytes();
    out.extend_from_slice(b"\nstream\n");
    out.extend_from_slice(content);
    out.extend_from_slice(b"\nendstream");
    out
}

/// Build an image-backed normal appearance for a signature widget and
/// attach it via `/AP /N`
pub(crate) fn apply_signature_appearance(
    ctx: &mut ActionContext<'_>,
    widget_ref: Reference,
    payload: &[u8],
) -> PdfResult<()> {
    let widget = ctx
        .body_of(widget_ref)
        .ok_or(ParseError::MalformedDocument("signature widget unresolvable"))?;

    let rect = scan::parse_box(&widget, "Rect").unwrap_or([0.0, 0.0, 100.0, 50.0]);
    let field_w = (rect[2] - rect[0]).abs().max(1.0);
    let field_h = (rect[3] - rect[1]).abs().max(1.0);

    let sniffed = image::sniff(payload)?;
    if sniffed.width == 0 || sniffed.height == 0 {
        anyhow::bail!(ParseError::AppearanceDecodeFailure("image with zero extent"));
    }

    let image_ref = match sniffed.kind {
        ImageKind::Jpeg => {
            let image_ref = ctx.alloc();
            ctx.push(
                image_ref,
                image_xobject(
                    sniffed.width,
                    sniffed.height,
                    "/DeviceRGB",
                    "/DCTDecode",
                    None,
                    payload,
                ),
            );
            image_ref
        }
        ImageKind::Png => {
            let decoded = image::decode_png(payload)?;

            let smask_ref = decoded.alpha.as_ref().map(|alpha| {
                let smask_ref = ctx.alloc();
                ctx.push(
                    smask_ref,
                    image_xobject(
                        decoded.width,
                        decoded.height,
                        "/DeviceGray",
                        "/FlateDecode",
                        None,
                        &deflate(alpha),
                    ),
                );
                smask_ref
            });

            let image_ref = ctx.alloc();
            ctx.push(
                image_ref,
                image_xobject(
                    decoded.width,
                    decoded.height,
                    "/DeviceRGB",
                    "/FlateDecode",
                    smask_ref,
                    &deflate(&decoded.rgb),
                ),
            );
            image_ref
        }
    };

    let scale = (field_w / sniffed.width as f64).min(field_h / sniffed.height as f64);
    let scaled_w = sniffed.width as f64 * scale;
    let scaled_h = sniffed.height as f64 * scale;
    let tx = (field_w - scaled_w) / 2.0;
    let ty = (field_h - scaled_h) / 2.0;

    let content = format!(
        "q\n1 0 0 1 {} {} cm\n{} 0 0 {} 0 0 cm\n/Im1 Do\nQ\n",
        format_number(tx),
        format_number(ty),
        format_number(scaled_w),
        format_number(scaled_h),
    );

    let form_ref = ctx.alloc();
    ctx.push(
        form_ref,
        form_xobject(
            field_w,
            field_h,
            content.as_bytes(),
            Some(format!("<< /XObject << /Im1 {} >> >>", image_ref.token())),
        ),
    );

    let patched = scan::upsert_key_value(
        &widget,
        "AP",
        format!("<< /N {} >>", form_ref.token()).as_bytes(),
    );
    ctx.push(widget_ref, patched);

    Ok(())
}

fn image_xobject(
    width: u32,
    height: u32,
    color_space: &str,
    filter: &str,
    smask: Option<Reference>,
    data: &[u8],
) -> Vec<u8> {
    let mut dict = format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace {} /BitsPerComponent 8 /Filter {}",
        width, height, color_space, filter
    );
    if let Some(smask) = smask {
        dict.push_str(&format!(" /SMask {}", smask.token()));
    }
    dict.push_str(&format!(" /Length {} >>", data.len()));

    let mut out = dict.into_bytes();
    out.extend_from_slice(b"\nstream\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\nendstream");
    out
}
