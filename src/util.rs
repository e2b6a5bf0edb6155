use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::LazyLock;
use url::Url;

/// Statuses worth another attempt. 400/401/403/404/500 come back from the
/// RAPI for requests that will never succeed and fail immediately.
pub(crate) fn retriable_status(code: u16) -> bool {
    matches!(code, 502 | 503 | 504 | 429 | 408)
}

pub(crate) fn guess_filename_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/').rsplit('/').next().and_then(|s| {
        if s.is_empty() || s.contains(':') {
            None
        } else {
            Some(s.to_string())
        }
    })
}

/// Builds `{root}/{segments...}?{query}` with proper escaping of each part.
pub(crate) fn endpoint(root: &str, segments: &[&str], query: &[(&str, &str)]) -> Result<String> {
    let mut url =
        Url::parse(root).with_context(|| format!("invalid RAPI root URL: {}", root))?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| anyhow!("RAPI root URL cannot be a base: {}", root))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url.to_string())
}

/// Pulls the download URL out of a destination `stringValue`, which the RAPI
/// sends as an HTML anchor (`<a href="...">https://...zip</a></br>`).
pub(crate) fn anchor_url(string_value: &str) -> Option<String> {
    let text = match ANCHOR.captures(string_value).and_then(|c| c.get(1)) {
        Some(inner) => crate::error::strip_tags(inner.as_str()),
        None => crate::error::strip_tags(string_value),
    };
    let url = text.split(['?', '&']).next().unwrap_or(text.as_str()).trim();
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}

static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a(?:\s(?:[^>"']|"[^"]*"|'[^']*')*)?>(.*?)</a\s*>"#).expect("static regex")
});
static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).expect("static regex")
});

/// Every `href` value in an HTML page, in document order.
pub(crate) fn html_hrefs(html: &str) -> Vec<String> {
    HREF.captures_iter(html)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
        .map(|m| m.as_str().to_string())
        .collect()
}

// RAPI ids arrive as JSON strings or numbers depending on the endpoint.
pub(crate) fn de_id<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a string or numeric id, got {}",
            other
        ))),
    }
}

/// Field choice values come back as strings, numbers or booleans.
pub(crate) fn de_scalar<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(d)? {
        v @ (Value::String(_) | Value::Number(_) | Value::Bool(_)) => Ok(value_to_string(&v)),
        Value::Null => Ok(String::new()),
        other => Err(D::Error::custom(format!("expected a scalar, got {}", other))),
    }
}

/// String form of a JSON scalar, without the quotes serde_json would add.
pub(crate) fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_escapes_segments_and_query() {
        let url = endpoint(
            "https://example.com/wes/rapi/",
            &["order", "destinations", "FTP", "my dest"],
            &[("format", "json")],
        )
        .unwrap();
        assert_eq!(
            url,
            "https://example.com/wes/rapi/order/destinations/FTP/my%20dest?format=json"
        );
    }

    #[test]
    fn anchor_url_strips_markup_and_query() {
        let sv = r#"<a href="https://data.example.com/a/RCM1.zip?token=1" target="_blank">https://data.example.com/a/RCM1.zip?token=1</a></br>"#;
        assert_eq!(
            anchor_url(sv).as_deref(),
            Some("https://data.example.com/a/RCM1.zip")
        );
        assert_eq!(
            anchor_url("https://x.example/b.zip").as_deref(),
            Some("https://x.example/b.zip")
        );
        assert_eq!(anchor_url("<a href=\"\"></a>"), None);
    }

    #[test]
    fn hrefs_in_listing() {
        let html = r#"<html><a href="/up/">..</a><a href='/dir/file.tif'>file</a></html>"#;
        assert_eq!(html_hrefs(html), vec!["/up/", "/dir/file.tif"]);

        let html = r#"<a title='say "hi"' HREF="a.tif">a</a><a href=b.tif>b</a>"#;
        assert_eq!(html_hrefs(html), vec!["a.tif", "b.tif"]);
    }

    #[test]
    fn anchor_url_with_quoted_markup() {
        let sv = r#"<a title="x > y" href="https://d.example/c.zip"><b>https://d.example/c.zip</b></a></br>"#;
        assert_eq!(anchor_url(sv).as_deref(), Some("https://d.example/c.zip"));
    }

    #[test]
    fn filename_from_url() {
        assert_eq!(
            guess_filename_from_url("https://x/a/b/RS2_1.zip?x=1").as_deref(),
            Some("RS2_1.zip")
        );
        assert_eq!(
            guess_filename_from_url("https://x/a/folder/").as_deref(),
            Some("folder")
        );
    }
}
