//! Manifest integrity verification.
//!
//! A manifest's signature is the SHA-256 digest, as lowercase hex, of the
//! canonical encoding of the manifest with the `signature` field removed. The
//! canonical encoding sorts object keys recursively, uses no incidental
//! whitespace, escapes every non-ASCII character as `\uXXXX`, and writes
//! floats in shortest round-trip form with a signed exponent of at least two
//! digits (`1e-05`, `1.5e+16`) outside `1e-4..1e16`. This matches the form
//! produced by the existing signing tools.
//!
//! Verification attests that the manifest has not changed since it was
//! signed. It says nothing about who signed it.

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::manifest::{PluginManifest, SIGNATURE_FIELD};

/// Returns the canonical byte encoding of a manifest document, excluding the
/// signature field.
#[must_use]
pub fn canonical_bytes(document: &Map<String, Value>) -> Vec<u8> {
    let mut out = String::new();
    write_object(&mut out, document, true);
    out.into_bytes()
}

/// Returns the lowercase hex SHA-256 digest of a manifest's canonical form.
///
/// # Example
///
/// ```
/// use evolver_plugins::PluginManifest;
/// use evolver_plugins::integrity::digest;
///
/// let manifest = PluginManifest::new("nine", "1.0.0");
/// let signed = manifest.clone().with_signature("ignored");
/// assert_eq!(digest(&manifest), digest(&signed));
/// assert_eq!(digest(&manifest).len(), 64);
/// ```
#[must_use]
pub fn digest(manifest: &PluginManifest) -> String {
    format!("{:x}", Sha256::digest(canonical_bytes(manifest.document())))
}

/// Returns a copy of the manifest carrying its own digest as signature.
#[must_use]
pub fn sign(manifest: &PluginManifest) -> PluginManifest {
    manifest.clone().with_signature(digest(manifest))
}

/// Returns `true` when the stored signature matches the manifest content.
///
/// The comparison ignores hex letter case. A missing or empty signature never
/// verifies.
#[must_use]
pub fn verify(manifest: &PluginManifest) -> bool {
    match manifest.signature() {
        Some(signature) if !signature.is_empty() => {
            signature.eq_ignore_ascii_case(&digest(manifest))
        }
        _ => false,
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => write_object(out, map, false),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::String(text) => write_string(out, text),
        Value::Null => out.push_str("null"),
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Number(number) => write_number(out, number),
    }
}

fn write_number(out: &mut String, number: &Number) {
    let text = number.to_string();
    if number.is_f64()
        && let Some(float) = float_text(&text)
    {
        out.push_str(&float);
    } else {
        out.push_str(&text);
    }
}

/// Re-lays the shortest round-trip digits of a float: positional notation for
/// decimal exponents in `-4..16`, otherwise `d.ddde±XX`.
///
/// Returns `None` for zero, whose text needs no adjustment.
fn float_text(text: &str) -> Option<String> {
    let (sign, unsigned) = text
        .strip_prefix('-')
        .map_or(("", text), |rest| ("-", rest));
    let mut parts = unsigned.splitn(2, ['e', 'E']);
    let mantissa = parts.next()?;
    let exponent: i32 = parts.next().map_or(Ok(0), str::parse).ok()?;
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));

    let all: String = whole.chars().chain(fraction.chars()).collect();
    let leading = all.chars().take_while(|&ch| ch == '0').count();
    let digits = all.trim_start_matches('0').trim_end_matches('0');
    if digits.is_empty() {
        return None;
    }
    let scale = i32::try_from(whole.len()).ok()? - 1 - i32::try_from(leading).ok()? + exponent;

    let mut out = String::from(sign);
    if !(-4..16).contains(&scale) {
        let mut chars = digits.chars();
        out.extend(chars.next());
        let rest: String = chars.collect();
        if !rest.is_empty() {
            out.push('.');
            out.push_str(&rest);
        }
        let exponent_sign = if scale < 0 { '-' } else { '+' };
        out.push_str(&format!("e{exponent_sign}{:02}", scale.unsigned_abs()));
    } else if scale >= 0 {
        let width = usize::try_from(scale).ok()? + 1;
        out.extend(digits.chars().chain(std::iter::repeat('0')).take(width));
        out.push('.');
        let rest: String = digits.chars().skip(width).collect();
        out.push_str(if rest.is_empty() { "0" } else { &rest });
    } else {
        out.push_str("0.");
        out.extend(std::iter::repeat_n('0', usize::try_from(-scale - 1).ok()?));
        out.push_str(digits);
    }
    Some(out)
}

fn write_object(out: &mut String, map: &Map<String, Value>, skip_signature: bool) {
    let mut keys: Vec<&String> = map
        .keys()
        .filter(|key| !(skip_signature && key.as_str() == SIGNATURE_FIELD))
        .collect();
    keys.sort();

    out.push('{');
    for (index, key) in keys.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        if let Some(value) = map.get(key) {
            write_value(out, value);
        }
    }
    out.push('}');
}

fn write_string(out: &mut String, text: &str) {
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            ' '..='~' => out.push(ch),
            _ => {
                let mut units = [0_u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
        }
    }
    out.push('"');
}
