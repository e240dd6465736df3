//! HTTP exchange types described as plain data.
//!
//! # Design
//! `SimApi` builds `HttpRequest` values and judges `HttpResponse` values
//! without touching the network; a `Transport` performs the wire exchange in
//! between. Bodies are raw bytes because the contract mixes JSON endpoints
//! with binary download/upload endpoints.

use std::fmt;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request described as plain data. `path` is relative to the target
/// base URL and always starts with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Delete,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// POST of an opaque byte payload with explicit `content-type` and
    /// `content-length` headers.
    pub fn post_octets(path: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            headers: vec![
                ("content-type".to_string(), "application/octet-stream".to_string()),
                ("content-length".to_string(), payload.len().to_string()),
            ],
            body: Some(payload.to_vec()),
        }
    }

    /// Label used in log lines and violation messages, e.g. `GET /api/v1/retropie`.
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// An HTTP response described as plain data. Header names are stored as
/// received; use [`HttpResponse::header`] for lookups.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive header lookup returning the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body rendered for diagnostics, truncated so a large binary body does
    /// not flood the log.
    pub fn body_snippet(&self) -> String {
        const MAX: usize = 200;
        let text = String::from_utf8_lossy(&self.body);
        if text.chars().count() <= MAX {
            return text.into_owned();
        }
        let mut cut: String = text.chars().take(MAX).collect();
        cut.push('…');
        cut
    }
}
