//! Parsing of `/<modifiers>/<resource-id>` request paths.

use crate::{ImageKitError, Result};
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use std::fmt::Write;

pub mod accept;

/// Transformation modifiers keyed by name. Keys are kept sorted so the same
/// request always serializes the same way.
pub type Modifiers = BTreeMap<String, String>;

const MODIFIER_SEP: [char; 2] = ['&', ','];
const MODIFIER_VAL_SEP: [char; 3] = [':', '=', '_'];

/// Outcome of parsing a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub id: String,
    pub modifiers: Modifiers,
    /// Set when the output format was negotiated from `Accept`; the response
    /// must then carry `Vary: Accept`.
    pub vary_accept: bool,
}

/// Escapes control characters and double quotes so the value is safe to put
/// in headers, object metadata and log lines. Control characters become their
/// JSON-style escape (`\n`, `\u0001`, ...), `"` becomes `\"`. Everything else
/// passes through unchanged.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Percent-decodes `input`, returning it untouched when the result would not
/// be valid UTF-8.
pub fn decode(input: &str) -> String {
    percent_decode_str(input)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| input.to_string())
}

fn truthy(value: Option<&String>) -> bool {
    value.map_or(false, |v| !v.is_empty() && v != "false")
}

fn requested_format(modifiers: &Modifiers) -> Option<&str> {
    modifiers
        .get("f")
        .filter(|v| !v.is_empty())
        .or_else(|| modifiers.get("format"))
        .map(String::as_str)
}

fn parse_modifiers(raw: &str) -> Modifiers {
    let mut modifiers = Modifiers::new();
    if raw == "_" {
        return modifiers;
    }
    for piece in raw.split(MODIFIER_SEP).filter(|p| !p.is_empty()) {
        let mut tokens = piece.split(MODIFIER_VAL_SEP);
        let key = sanitize(tokens.next().unwrap_or_default());
        let value = tokens
            .map(|v| sanitize(&decode(v)))
            .collect::<Vec<_>>()
            .join("_");
        modifiers.insert(key, value);
    }
    modifiers
}

/// Splits a request path (optionally with a query string) into the resource
/// id and its modifiers, negotiating `format=auto` against `accept`.
pub fn parse_request(path: &str, accept: Option<&str>) -> Result<ParsedRequest> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let mut segments = trimmed.split('/');
    let modifiers_raw = segments.next().unwrap_or_default();
    let id = sanitize(&decode(&segments.collect::<Vec<_>>().join("/")));

    if modifiers_raw.is_empty() {
        return Err(ImageKitError::MissingModifiers(id));
    }
    if id.is_empty() || id == "/" {
        return Err(ImageKitError::MissingId(path.to_string()));
    }

    let mut modifiers = parse_modifiers(modifiers_raw);
    let mut vary_accept = false;

    if requested_format(&modifiers) == Some("auto") {
        let animated = truthy(modifiers.get("a")) || truthy(modifiers.get("animated"));
        let format = accept::auto_format(accept.unwrap_or_default(), animated);
        modifiers.remove("f");
        modifiers.remove("format");
        modifiers.insert("format".into(), format.to_string());
        vary_accept = true;
        tracing::debug!("Negotiated format={} for id={} (animated={})", format, id, animated);
    }

    Ok(ParsedRequest {
        id,
        modifiers,
        vary_accept,
    })
}

/// Renders modifiers back into the first path segment.
pub fn format_modifiers(modifiers: &Modifiers) -> String {
    if modifiers.is_empty() {
        return "_".into();
    }
    modifiers
        .iter()
        .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{}_{}", k, v) })
        .collect::<Vec<_>>()
        .join(",")
}
