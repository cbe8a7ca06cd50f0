use axum::http::{HeaderMap, Uri};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

/// Where the command name of a request is read from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandSource {
    /// Last non-empty segment of the request path (`/api/v1/search` → `search`)
    #[default]
    LastPathSegment,
    /// Value of a request header
    Header { name: String },
    /// Value of a query string parameter
    Query { name: String },
}

impl CommandSource {
    /// Extract the command for a request.
    ///
    /// Path segments and query parameters are percent-decoded, so every
    /// encoding of a name counts against the same limiter. Returns an empty
    /// string when the source yields nothing; the empty command never has
    /// its own limiter, so it falls back.
    pub fn extract(&self, uri: &Uri, headers: &HeaderMap) -> String {
        let command = match self {
            CommandSource::LastPathSegment => uri
                .path()
                .rsplit('/')
                .find(|segment| !segment.is_empty())
                .map(decode_segment),
            CommandSource::Header { name } => headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string()),
            CommandSource::Query { name } => uri.query().and_then(|query| query_param(query, name)),
        };

        command.unwrap_or_default()
    }
}

/// Decoded path segment, or the raw segment when it is not valid UTF-8 once decoded
fn decode_segment(segment: &str) -> String {
    match percent_decode_str(segment).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment.to_string(),
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
