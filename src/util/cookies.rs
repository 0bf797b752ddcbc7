//! Cookie-encoded feature payloads.
//!
//! Some pages deliver feature overrides through a cookie whose value is a
//! URL-encoded JSON object mapping feature keys to definitions. Lookup
//! returns the raw value untouched; decoding is a separate step so callers
//! can surface the two failure modes independently.

use crate::state::FeatureDefinition;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie value is not valid UTF-8 after decoding: {0}")]
    Decode(#[from] std::string::FromUtf8Error),
    #[error("cookie value is not a feature map: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Return the exact raw (undecoded) value of `name` from a `Cookie:`-style
/// string, or `None` when absent. Position in the string does not matter.
pub fn get_cookie<'a>(name: &str, cookie_str: &'a str) -> Option<&'a str> {
    for pair in cookie_str.split(';') {
        if let Some((k, v)) = pair.trim_start().split_once('=') {
            if k == name {
                return Some(v);
            }
        }
    }
    None
}

/// Decode a raw cookie value into a feature map.
///
/// Decode rule: a literal `+` is a space (form-encoding layers write them),
/// then percent-escapes are resolved, then the result is parsed as JSON.
pub fn features_json_from_encoded_cookie_value(
    raw: &str,
) -> Result<BTreeMap<String, FeatureDefinition>, CookieError> {
    let spaced = raw.replace('+', " ");
    let decoded = urlencoding::decode(&spaced)?;
    Ok(serde_json::from_str(&decoded)?)
}
