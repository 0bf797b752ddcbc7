//! Shareable debug links: the current override set, URI-encoded into a
//! `_gbdebug` query parameter appended to the page URL, so one developer's
//! forced features/variations/attributes can be handed to another.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SHARE_PARAM: &str = "_gbdebug";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiments: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
}

pub fn build_share_link(page_url: &str, payload: &SharePayload) -> String {
    let json = serde_json::to_string(payload).unwrap_or_default();
    let encoded = urlencoding::encode(&json);
    let sep = if page_url.contains('?') { '&' } else { '?' };
    format!("{page_url}{sep}{SHARE_PARAM}={encoded}")
}

/// Extract and decode the share payload from a URL, if present.
pub fn parse_share_link(url: &str) -> Option<SharePayload> {
    let query = url.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            if k == SHARE_PARAM {
                let spaced = v.replace('+', " ");
                let decoded = urlencoding::decode(&spaced).ok()?;
                return serde_json::from_str(&decoded).ok();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn link_round_trips_through_the_query_param() {
        let payload = SharePayload {
            features: Some(json!({"banner": true})),
            attributes: Some(json!({"country": "DE", "name": "a b"})),
            ..Default::default()
        };
        let link = build_share_link("https://example.com/pricing?plan=pro", &payload);
        assert!(link.starts_with("https://example.com/pricing?plan=pro&_gbdebug="));
        assert_eq!(parse_share_link(&link), Some(payload));
    }

    #[test]
    fn url_without_query_gets_a_question_mark() {
        let link = build_share_link("https://example.com/", &SharePayload::default());
        assert!(link.contains("/?_gbdebug="));
    }

    #[test]
    fn externally_built_links_may_use_plus_for_space() {
        // {"attributes":{"name":"a b"}} with the space form-encoded as +
        let link = "https://example.com/?_gbdebug=%7B%22attributes%22%3A%7B%22name%22%3A%22a+b%22%7D%7D";
        let payload = parse_share_link(link).unwrap();
        assert_eq!(payload.attributes, Some(json!({"name": "a b"})));
    }

    #[test]
    fn urls_without_payload_parse_to_none() {
        assert_eq!(parse_share_link("https://example.com/"), None);
        assert_eq!(parse_share_link("https://example.com/?plan=pro"), None);
    }
}
