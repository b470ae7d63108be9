//! Lexical edits on PDF dictionary and array fragments.
//!
//! Everything here operates on a byte slice holding a single fragment, a
//! `<< … >>` dictionary or a `[ … ]` array, and never parses the whole
//! document. Edits are position-preserving: the original bytes are reused
//! wherever possible so formatting and unrelated entries survive unchanged.
//!
//! Textual `N G R` matching is deliberate. It sidesteps parsing untrusted
//! nested dictionaries, at the cost of accepting that a key occurring
//! inside a string literal could be matched; the fragments we edit are
//! small field and page dictionaries where that does not happen.

use std::{borrow::Cow, ops::Range};

use regex::bytes::Regex;

use crate::{
    lex::{self, Cursor, LexBase},
    objects::{Reference, Value},
    strings,
};

/// What replaces a stream payload in [`strip_stream_bodies`]
const STREAM_BODY_SENTINEL: &[u8] = b"\n";

/// Find `needle` in `haystack` starting at `from`
pub(crate) fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }

    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

pub(crate) fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}

/// Replace every `stream … endstream` payload with a fixed sentinel so
/// that dictionary scanning cannot wander into stream bytes
pub(crate) fn strip_stream_bodies(body: &[u8]) -> Cow<'_, [u8]> {
    let mut out: Option<Vec<u8>> = None;
    let mut pos = 0;
    let mut copied_to = 0;

    while let Some(kw) = find(body, b"stream", pos) {
        // reject matches inside longer keywords such as `endstream`
        let boundary_ok = kw == 0 || !lex::is_regular(body[kw - 1]);
        let mut after = kw + b"stream".len();
        let eol_ok = match body.get(after) {
            Some(b'\n') => {
                after += 1;
                true
            }
            Some(b'\r') => {
                after += 1;
                if body.get(after) == Some(&b'\n') {
                    after += 1;
                }
                true
            }
            _ => false,
        };

        if !boundary_ok || !eol_ok {
            pos = kw + 1;
            continue;
        }

        let end = match find(body, b"endstream", after) {
            Some(end) => end,
            None => break,
        };

        let out = out.get_or_insert_with(|| Vec::with_capacity(body.len()));
        out.extend_from_slice(&body[copied_to..after]);
        out.extend_from_slice(STREAM_BODY_SENTINEL);
        copied_to = end;
        pos = end + b"endstream".len();
    }

    match out {
        Some(mut out) => {
            out.extend_from_slice(&body[copied_to..]);
            Cow::Owned(out)
        }
        None => Cow::Borrowed(body),
    }
}

/// Yields every balanced `<< … >>` region, at arbitrary nesting depth.
/// Depth is tracked by counting `<<` as +1 and `>>` as -1.
pub struct DictIter<'a> {
    bytes: &'a [u8],
    pos: usize,
}

pub fn each_dictionary(bytes: &[u8]) -> DictIter<'_> {
    DictIter { bytes, pos: 0 }
}

impl<'a> Iterator for DictIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let open = find(self.bytes, b"<<", self.pos)?;
        let close = dict_close(self.bytes, open)?;
        // advancing past the opening token only, so nested dictionaries
        // are yielded on subsequent calls
        self.pos = open + 2;
        Some(&self.bytes[open..close])
    }
}

/// Given the offset of a `<<`, return the offset one past its matching `>>`
pub(crate) fn dict_close(bytes: &[u8], open: usize) -> Option<usize> {
    if !bytes.get(open..)?.starts_with(b"<<") {
        return None;
    }

    let mut depth = 0usize;
    let mut i = open;

    while i < bytes.len() {
        if bytes[i..].starts_with(b"<<") {
            depth += 1;
            i += 2;
        } else if bytes[i..].starts_with(b">>") {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return Some(i);
            }
        } else {
            i += 1;
        }
    }

    None
}

/// Locate `/<key>` followed by a value-start byte. Returns the offset of
/// the key's leading slash and the offset where the value token begins.
fn find_key(dict: &[u8], key: &str) -> Option<(usize, usize)> {
    let needle = format!("/{}", key).into_bytes();
    let mut pos = 0;

    while let Some(at) = find(dict, &needle, pos) {
        pos = at + 1;

        // the key must be followed by whitespace or a value delimiter,
        // otherwise we matched a prefix of a longer key
        let after = at + needle.len();
        match dict.get(after) {
            Some(&b) if lex::is_whitespace(b) || matches!(b, b'(' | b'<' | b'[' | b'/') => {}
            _ => continue,
        }

        let mut cursor = Cursor::at(dict, after);
        cursor.skip_whitespace();
        let value_at = cursor.pos();

        if value_at >= dict.len() {
            continue;
        }

        return Some((at, value_at));
    }

    None
}

/// The byte span of the value token starting at `start`.
///
/// Dictionary values yield the two-byte `<<` sentinel; callers that need
/// the full nested region use [`value_span`].
pub(crate) fn token_span(bytes: &[u8], start: usize) -> Option<Range<usize>> {
    match bytes.get(start)? {
        b'(' => literal_string_span(bytes, start),
        b'<' if bytes.get(start + 1) == Some(&b'<') => Some(start..start + 2),
        b'<' => {
            let close = find(bytes, b">", start + 1)?;
            Some(start..close + 1)
        }
        b'[' => array_span(bytes, start),
        b'/' => {
            let mut end = start + 1;
            while end < bytes.len() && lex::is_regular(bytes[end]) {
                end += 1;
            }
            Some(start..end)
        }
        _ => atom_span(bytes, start),
    }
}

/// Like [`token_span`], but dictionary values yield their full balanced
/// `<< … >>` region
pub(crate) fn value_span(bytes: &[u8], start: usize) -> Option<Range<usize>> {
    if bytes[start..].starts_with(b"<<") {
        let close = dict_close(bytes, start)?;
        return Some(start..close);
    }

    token_span(bytes, start)
}

/// Balanced PDF literal string, honoring backslash escapes; nested
/// parentheses increase depth
fn literal_string_span(bytes: &[u8], start: usize) -> Option<Range<usize>> {
    let mut depth = 0usize;
    let mut i = start + 1;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'(' => depth += 1,
            b')' if depth == 0 => return Some(start..i + 1),
            b')' => depth -= 1,
            _ => {}
        }
        i += 1;
    }

    None
}

fn array_span(bytes: &[u8], start: usize) -> Option<Range<usize>> {
    let mut depth = 0usize;
    let mut i = start;

    while i < bytes.len() {
        match bytes[i] {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start..i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }

    None
}

/// A number, boolean, `null`, or reference `N G R`
fn atom_span(bytes: &[u8], start: usize) -> Option<Range<usize>> {
    let mut end = start;
    while end < bytes.len() && lex::is_regular(bytes[end]) && bytes[end] != b'%' {
        end += 1;
    }

    if end == start {
        return None;
    }

    // `N G R` lookahead: a bare integer may be the first token of a
    // reference, in which case the whole reference is the value
    if bytes[start..end].iter().all(u8::is_ascii_digit) {
        let mut cursor = Cursor::at(bytes, end);
        cursor.skip_whitespace();
        let gen_start = cursor.pos();
        let generation = cursor.lex_whole_number();
        if !generation.is_empty() && gen_start > end {
            cursor.skip_whitespace();
            if cursor.next_byte() == Some(b'R')
                && cursor.peek_byte().map_or(true, |b| !lex::is_regular(b))
            {
                return Some(start..cursor.pos());
            }
        }
    }

    Some(start..end)
}

/// The full byte span of the value following `/<key>`, nested
/// dictionaries included
pub(crate) fn full_value_range(key: &str, dict: &[u8]) -> Option<Range<usize>> {
    let (_, value_at) = find_key(dict, key)?;
    value_span(dict, value_at)
}

/// Replace `range` with `replacement`
pub(crate) fn splice(bytes: &[u8], range: Range<usize>, replacement: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() - range.len() + replacement.len());
    out.extend_from_slice(&bytes[..range.start]);
    out.extend_from_slice(replacement);
    out.extend_from_slice(&bytes[range.end..]);
    out
}

/// Extract the value token following `/<key>`
pub(crate) fn value_token_after<'a>(key: &str, dict: &'a [u8]) -> Option<&'a [u8]> {
    let (_, value_at) = find_key(dict, key)?;
    let span = token_span(dict, value_at)?;
    Some(&dict[span])
}

/// Precise position-based replacement of a key's value.
///
/// Returns `None` when the key is absent or when the spliced result no
/// longer looks like a dictionary; the caller keeps the original bytes.
pub(crate) fn replace_key_value(dict: &[u8], key: &str, token: &[u8]) -> Option<Vec<u8>> {
    let (_, value_at) = find_key(dict, key)?;
    let span = value_span(dict, value_at)?;

    let mut out = Vec::with_capacity(dict.len() - span.len() + token.len());
    out.extend_from_slice(&dict[..span.start]);
    out.extend_from_slice(token);
    out.extend_from_slice(&dict[span.end..]);

    if find(&out, b"<<", 0).is_none() || find(&out, b">>", 0).is_none() {
        return None;
    }

    Some(out)
}

/// Replace the key's value if present, otherwise insert `/<key> <token>`
/// immediately after the opening `<<`. Input without a `<<` comes back
/// unchanged.
pub(crate) fn upsert_key_value(dict: &[u8], key: &str, token: &[u8]) -> Vec<u8> {
    if find_key(dict, key).is_some() {
        if let Some(out) = replace_key_value(dict, key, token) {
            return out;
        }
        return dict.to_vec();
    }

    let open = match find(dict, b"<<", 0) {
        Some(open) => open,
        None => return dict.to_vec(),
    };

    let insert_at = open + 2;
    let entry = format!("{} {}\n", strings::format_pdf_key(key), String::from_utf8_lossy(token));

    let mut out = Vec::with_capacity(dict.len() + entry.len() + 1);
    out.extend_from_slice(&dict[..insert_at]);
    out.push(b'\n');
    out.extend_from_slice(entry.as_bytes());
    out.extend_from_slice(&dict[insert_at..]);
    out
}

/// Delete `/<key>` and its (possibly nested) value
pub(crate) fn remove_key(dict: &[u8], key: &str) -> Option<Vec<u8>> {
    let (key_at, value_at) = find_key(dict, key)?;
    let span = value_span(dict, value_at)?;

    let mut out = Vec::with_capacity(dict.len() - (span.end - key_at));
    out.extend_from_slice(&dict[..key_at]);
    out.extend_from_slice(&dict[span.end..]);

    if find(&out, b"<<", 0).is_none() || find(&out, b">>", 0).is_none() {
        return None;
    }

    Some(out)
}

/// Delete the `/AP` entry and its appearance dictionary
pub(crate) fn remove_appearance_stream(dict: &[u8]) -> Option<Vec<u8>> {
    remove_key(dict, "AP")
}

/// Append `N G R` before the closing bracket of a `[ … ]` fragment
pub(crate) fn add_ref_to_array(arr: &[u8], re: Reference) -> Option<Vec<u8>> {
    let span = array_span(arr, find(arr, b"[", 0)?)?;
    let close = span.end - 1;

    let has_items = arr[span.start + 1..close]
        .iter()
        .any(|&b| !lex::is_whitespace(b));
    let token = if has_items {
        format!(" {}", re.token())
    } else {
        re.token()
    };

    let mut out = Vec::with_capacity(arr.len() + token.len());
    out.extend_from_slice(&arr[..close]);
    out.extend_from_slice(token.as_bytes());
    out.extend_from_slice(&arr[close..]);
    Some(out)
}

/// Remove the first `\bN G R\b` occurrence from an array fragment
pub(crate) fn remove_ref_from_array(arr: &[u8], re: Reference) -> Option<Vec<u8>> {
    let pattern = Regex::new(&format!(
        r"(?-u)\b{}\s+{}\s+R\b",
        re.object_number, re.generation
    ))
    .ok()?;

    let hit = pattern.find(arr)?;

    let mut out = Vec::with_capacity(arr.len());
    out.extend_from_slice(&arr[..hit.start()]);
    out.extend_from_slice(&arr[hit.end()..]);
    Some(out)
}

/// [`add_ref_to_array`] lifted to an array stored inline under `/<key>`
pub(crate) fn add_ref_to_inline_array(dict: &[u8], key: &str, re: Reference) -> Option<Vec<u8>> {
    let (_, value_at) = find_key(dict, key)?;
    if dict.get(value_at) != Some(&b'[') {
        return None;
    }
    let span = value_span(dict, value_at)?;
    let edited = add_ref_to_array(&dict[span.clone()], re)?;

    let mut out = Vec::with_capacity(dict.len() + edited.len() - span.len());
    out.extend_from_slice(&dict[..span.start]);
    out.extend_from_slice(&edited);
    out.extend_from_slice(&dict[span.end..]);
    Some(out)
}

pub(crate) fn remove_ref_from_inline_array(
    dict: &[u8],
    key: &str,
    re: Reference,
) -> Option<Vec<u8>> {
    let (_, value_at) = find_key(dict, key)?;
    if dict.get(value_at) != Some(&b'[') {
        return None;
    }
    let span = value_span(dict, value_at)?;
    let edited = remove_ref_from_array(&dict[span.clone()], re)?;

    let mut out = Vec::with_capacity(dict.len());
    out.extend_from_slice(&dict[..span.start]);
    out.extend_from_slice(&edited);
    out.extend_from_slice(&dict[span.end..]);
    Some(out)
}

/// Top-level keys of a balanced `<< … >>` fragment, in order
pub(crate) fn dict_keys(dict: &[u8]) -> Vec<String> {
    let mut keys = Vec::new();

    let open = match find(dict, b"<<", 0) {
        Some(open) => open,
        None => return keys,
    };

    let mut cursor = Cursor::at(dict, open + 2);
    loop {
        cursor.skip_whitespace();
        let pos = cursor.pos();

        if dict[pos..].starts_with(b">>") || pos >= dict.len() {
            break;
        }

        if dict[pos] != b'/' {
            break;
        }

        let name_span = match token_span(dict, pos) {
            Some(span) => span,
            None => break,
        };
        keys.push(strings::decode_pdf_name(&dict[name_span.start + 1..name_span.end]));

        let mut value_cursor = Cursor::at(dict, name_span.end);
        value_cursor.skip_whitespace();
        match value_span(dict, value_cursor.pos()) {
            Some(span) => *cursor.cursor_mut() = span.end,
            None => break,
        }
    }

    keys
}

/// Every `N G R` reference appearing in an array fragment, in order
pub(crate) fn array_refs(arr: &[u8]) -> Vec<Reference> {
    static PATTERN: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
        Regex::new(r"(?-u)\b(\d+)\s+(\d+)\s+R\b").unwrap()
    });

    PATTERN
        .captures_iter(arr)
        .filter_map(|caps| {
            let number = std::str::from_utf8(caps.get(1)?.as_bytes()).ok()?.parse().ok()?;
            let generation = std::str::from_utf8(caps.get(2)?.as_bytes()).ok()?.parse().ok()?;
            Some(Reference {
                object_number: number,
                generation,
            })
        })
        .collect()
}

/// Every `N G obj` header in the buffer with the offset of its first
/// digit. Later occurrences of the same object number override earlier
/// ones, matching revision order in the file.
pub(crate) fn scan_object_headers(raw: &[u8]) -> Vec<(Reference, usize)> {
    static PATTERN: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
        Regex::new(r"(?-u)(\d+)\s+(\d+)\s+obj\b").unwrap()
    });

    PATTERN
        .captures_iter(raw)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            // reject matches that begin inside a longer token, e.g. `10 0 obj`
            // found at the tail of `110 0 obj`
            if whole.start() > 0 && lex::is_regular(raw[whole.start() - 1]) {
                return None;
            }
            let number = std::str::from_utf8(caps.get(1)?.as_bytes()).ok()?.parse().ok()?;
            let generation = std::str::from_utf8(caps.get(2)?.as_bytes()).ok()?.parse().ok()?;
            Some((
                Reference {
                    object_number: number,
                    generation,
                },
                whole.start(),
            ))
        })
        .collect()
}

pub(crate) fn parse_ref_token(token: &[u8]) -> Option<Reference> {
    let mut cursor = Cursor::new(token);
    cursor.skip_whitespace();
    let number = cursor.lex_whole_number();
    cursor.skip_whitespace();
    let generation = cursor.lex_whole_number();
    cursor.skip_whitespace();

    if number.is_empty() || generation.is_empty() || cursor.next_byte() != Some(b'R') {
        return None;
    }

    Some(Reference {
        object_number: number.parse().ok()?,
        generation: generation.parse().ok()?,
    })
}

pub(crate) fn parse_int(token: &[u8]) -> Option<i64> {
    std::str::from_utf8(strings::trim_ascii(token))
        .ok()?
        .parse()
        .ok()
}

/// Reference value for `/<key>`, accepting only the `N G R` form
pub(crate) fn ref_after(key: &str, dict: &[u8]) -> Option<Reference> {
    parse_ref_token(value_token_after(key, dict)?)
}

/// Integer value for `/<key>`
pub(crate) fn int_after(key: &str, dict: &[u8]) -> Option<i64> {
    parse_int(value_token_after(key, dict)?)
}

/// A widget annotation carries `/Subtype /Widget`
pub(crate) fn is_widget(body: &[u8]) -> bool {
    value_token_after("Subtype", body) == Some(b"/Widget")
}

/// A page object carries `/Type /Page`; the name-token scan stops at the
/// `s` of `/Pages`, so intermediate tree nodes do not match
pub(crate) fn is_page(body: &[u8]) -> bool {
    value_token_after("Type", body) == Some(b"/Page")
}

pub(crate) fn field_flags(body: &[u8]) -> Option<i64> {
    int_after("Ff", body)
}

/// Field flag bit 0x1000: multiline text
pub(crate) fn is_multiline_field(body: &[u8]) -> bool {
    field_flags(body).map_or(false, |ff| ff & 0x1000 != 0)
}

/// Extract a `[x0 y0 x1 y1]` box following `/<key>`
pub(crate) fn parse_box(body: &[u8], key: &str) -> Option<[f64; 4]> {
    let token = value_token_after(key, body)?;
    if token.first() != Some(&b'[') {
        return None;
    }

    let mut numbers = [0.0f64; 4];
    let mut count = 0;
    for word in token[1..token.len() - 1]
        .split(|&b| lex::is_whitespace(b))
        .filter(|w| !w.is_empty())
    {
        if count == 4 {
            break;
        }
        numbers[count] = std::str::from_utf8(word).ok()?.parse().ok()?;
        count += 1;
    }

    if count < 4 {
        return None;
    }

    Some(numbers)
}

/// The widget's "on" appearance state: the key of its `/AP /N` dictionary
/// that is not `/Off`. Falls back to `Yes`, the name this crate emits.
pub(crate) fn appearance_on_state(dict: &[u8]) -> String {
    let ap_span = find_key(dict, "AP")
        .and_then(|(_, value_at)| value_span(dict, value_at));

    if let Some(ap_span) = ap_span {
        let ap = &dict[ap_span];
        let normal = find_key(ap, "N")
            .and_then(|(_, value_at)| value_span(ap, value_at))
            .map(|span| &ap[span])
            .unwrap_or(ap);

        for key in dict_keys(normal) {
            if key != "Off" && key != "N" && key != "D" {
                return key;
            }
        }
    }

    "Yes".to_owned()
}

/// Map a host value onto a button widget's appearance states: truthy
/// values select the on state, everything else `/Off`
pub(crate) fn appearance_choice_for(value: &Value, dict: &[u8]) -> Option<String> {
    let on_state = appearance_on_state(dict);

    match value {
        Value::Bool(true) => Some(format!("/{}", on_state)),
        Value::Bool(false) => Some("/Off".to_owned()),
        Value::Text(s) | Value::Name(s) if s == "Off" => Some("/Off".to_owned()),
        Value::Text(s) | Value::Name(s) if s == &on_state || s == "Yes" => {
            Some(format!("/{}", on_state))
        }
        _ => None,
    }
}
