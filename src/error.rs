use regex::Regex;
use reqwest::StatusCode;
use std::sync::LazyLock;
use thiserror::Error;

/// Failures raised by this crate.
///
/// Public operations return [`anyhow::Result`]; when the root cause comes from
/// the RAPI or from local validation it is one of these variants and can be
/// recovered with `err.downcast_ref::<RapiError>()`.
#[derive(Debug, Error)]
pub enum RapiError {
    #[error(
        "An authentication error has occurred while trying to access the EODMS RAPI. \
         Please ensure your account login is in good standing on the EODMS website.\n\
         Server message: {message}"
    )]
    Unauthorized { message: String },

    #[error("404 Client Error: Could not find {url}.")]
    NotFound { url: String },

    #[error("400 Client Error: A Bad Request occurred while trying to reach {url}: {message}")]
    BadRequest { url: String, message: String },

    #[error("500 Server Error: An internal server error has occurred while accessing {url}: {message}")]
    ServerError { url: String, message: String },

    #[error(
        "There was a problem while attempting to access the EODMS RAPI server. \
         If the problem persists, please contact the EODMS Support Team at {support_email}."
    )]
    ServiceUnavailable { support_email: &'static str },

    #[error("RAPI request failed: HTTP {status} for url ({url})\n{error}")]
    Query {
        status: u16,
        url: String,
        error: QueryError,
    },

    #[error("collection '{0}' is not available to this account")]
    UnknownCollection(String),

    #[error("record #{index} is missing the required key '{key}'")]
    MissingKey { index: usize, key: String },

    #[error(
        "stopped polling after {attempts} attempt(s): {completed} item(s) completed, \
         still waiting on order item(s) {}",
        .pending.join(", ")
    )]
    AttemptsExhausted {
        attempts: usize,
        completed: usize,
        pending: Vec<String>,
    },
}

pub(crate) const SUPPORT_EMAIL: &str = "eodms-sgdot@nrcan-rncan.gc.ca";

/// The message(s) the RAPI attached to a failed request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryError {
    msgs: Vec<String>,
}

impl QueryError {
    pub fn new(msgs: Vec<String>) -> Self {
        Self {
            msgs: msgs.into_iter().filter(|m| !m.trim().is_empty()).collect(),
        }
    }

    pub fn messages(&self) -> &[String] {
        &self.msgs
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.msgs.join(" "))
    }
}

#[derive(Debug, serde::Deserialize)]
struct JsonErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

/// Extracts human-readable messages from an error body. The RAPI answers
/// with an OGC-style XML exception report, an HTML page, or JSON.
pub(crate) fn error_messages(body: &str) -> QueryError {
    let body = body.trim();
    if body.is_empty() {
        return QueryError::default();
    }

    let exception = element_texts(&EXCEPTION_TEXT, body);
    if !exception.is_empty() {
        return QueryError::new(exception);
    }

    let paragraphs = element_texts(&PARAGRAPH, body);
    if !paragraphs.is_empty() {
        return QueryError::new(paragraphs);
    }

    if let Ok(json) = serde_json::from_str::<JsonErrorBody>(body) {
        let mut msgs: Vec<String> = [json.message, json.detail].into_iter().flatten().collect();
        match json.errors {
            Some(serde_json::Value::String(s)) => msgs.push(s),
            Some(serde_json::Value::Array(items)) => {
                msgs.extend(items.iter().map(crate::util::value_to_string))
            }
            _ => {}
        }
        if !msgs.is_empty() {
            return QueryError::new(msgs);
        }
    }

    QueryError::new(vec![body.to_string()])
}

/// Opening tag with attributes whose quoted values may contain `>`.
const OPEN_TAG: &str = r#"(?:\s(?:[^>"']|"[^"]*"|'[^']*')*)?>"#;

fn element_regex(name: &str) -> Regex {
    // Namespace prefixes are ignored: `<ows:ExceptionText>` matches `ExceptionText`.
    let pattern = format!(
        r"(?is)<(?:[\w.-]+:)?{name}{OPEN_TAG}(.*?)</(?:[\w.-]+:)?{name}\s*>"
    );
    Regex::new(&pattern).expect("static regex")
}

static EXCEPTION_TEXT: LazyLock<Regex> = LazyLock::new(|| element_regex("ExceptionText"));
static PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| element_regex("p"));
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<(?:[^>"']|"[^"]*"|'[^']*')*>"#).expect("static regex"));

fn element_texts(re: &Regex, doc: &str) -> Vec<String> {
    re.captures_iter(doc)
        .filter_map(|c| c.get(1))
        .map(|m| strip_tags(m.as_str()))
        .filter(|t| !t.is_empty())
        .collect()
}

pub(crate) fn strip_tags(s: &str) -> String {
    TAG.replace_all(s, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Maps a failed RAPI response onto a [`RapiError`].
pub(crate) fn classify(status: StatusCode, url: &str, body: &str) -> RapiError {
    let error = error_messages(body);
    let message = error.to_string();

    if status == StatusCode::UNAUTHORIZED || message.contains("Unauthorized") {
        return RapiError::Unauthorized { message };
    }

    match status {
        StatusCode::NOT_FOUND => RapiError::NotFound {
            url: url.to_string(),
        },
        StatusCode::BAD_REQUEST => RapiError::BadRequest {
            url: url.to_string(),
            message,
        },
        StatusCode::INTERNAL_SERVER_ERROR => RapiError::ServerError {
            url: url.to_string(),
            message,
        },
        _ => RapiError::Query {
            status: status.as_u16(),
            url: url.to_string(),
            error,
        },
    }
}

/// Errors no later request can recover from: bad credentials or the
/// service being down.
pub(crate) fn is_fatal(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<RapiError>(),
        Some(RapiError::Unauthorized { .. } | RapiError::ServiceUnavailable { .. })
    )
}

/// Fails on the "BRB!" maintenance page the RAPI serves while it is down,
/// whatever the status code.
pub(crate) fn check_maintenance(body: &str) -> Result<(), RapiError> {
    if body.contains("BRB!") {
        return Err(RapiError::ServiceUnavailable {
            support_email: SUPPORT_EMAIL,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_text_from_ows_report() {
        let xml = r#"<?xml version="1.0"?>
<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows/1.1">
  <ows:Exception exceptionCode="InvalidParameterValue">
    <ows:ExceptionText>Unknown collection: FOO</ows:ExceptionText>
  </ows:Exception>
</ows:ExceptionReport>"#;
        assert_eq!(
            error_messages(xml).messages(),
            &["Unknown collection: FOO".to_string()]
        );
    }

    #[test]
    fn paragraphs_from_html_page() {
        let html = "<html><body><h1>Error</h1><p>Order item not found.</p><p>Item <b>12</b></p></body></html>";
        let err = error_messages(html);
        assert_eq!(err.to_string(), "Order item not found. Item 12");
    }

    #[test]
    fn markup_inside_attributes_and_nested_elements() {
        let html = r#"<p class="note" title="a > b">Collection <span><b>RCM</b></span> is offline</p>"#;
        assert_eq!(error_messages(html).to_string(), "Collection RCM is offline");
    }

    #[test]
    fn xml_report_wins_over_paragraphs() {
        let body = "<html><p>generic</p><ExceptionText>specific</ExceptionText></html>";
        assert_eq!(error_messages(body).messages(), &["specific".to_string()]);
    }

    #[test]
    fn json_error_body() {
        let err = error_messages(r#"{"message":"bad query","detail":"near AND"}"#);
        assert_eq!(err.messages(), &["bad query".to_string(), "near AND".to_string()]);
    }

    #[test]
    fn classify_statuses() {
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, "u", "<p>401 - Unauthorized</p>"),
            RapiError::Unauthorized { .. }
        ));
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, "u", "<p>Unauthorized access</p>"),
            RapiError::Unauthorized { .. }
        ));
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, "u", ""),
            RapiError::NotFound { .. }
        ));
        match classify(StatusCode::CONFLICT, "u", "<p>busy</p>") {
            RapiError::Query { status, error, .. } => {
                assert_eq!(status, 409);
                assert_eq!(error.to_string(), "busy");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
