//! Error rendering shared by REST and browser callers.
//!
//! REST/XHR callers get a JSON envelope, browser navigations get a minimal HTML
//! error page. Both carry the same message text.

use axum::{
    Json,
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// JSON error envelope: `{ "status": "error", "messages": [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub status: String,
    pub messages: Vec<String>,
}

impl ErrorEnvelope {
    pub fn new(messages: Vec<String>) -> Self {
        Self {
            status: "error".to_string(),
            messages: messages.into_iter().map(|m| flatten_message(&m)).collect(),
        }
    }

    pub fn single(message: impl Into<String>) -> Self {
        Self::new(vec![message.into()])
    }
}

/// How an error should be rendered for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Json,
    Html,
}

impl ResponseFormat {
    /// Pick a format from request headers.
    ///
    /// Browser navigations (Accept includes `text/html`, no XHR marker) get
    /// HTML; everything else gets JSON.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        if headers
            .get("x-requested-with")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
        {
            return Self::Json;
        }

        match headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) {
            Some(accept) if accept.contains("text/html") => Self::Html,
            _ => Self::Json,
        }
    }
}

/// Render an error with the given status in the requested format.
pub fn error_response(status: StatusCode, messages: Vec<String>, format: ResponseFormat) -> Response {
    let envelope = ErrorEnvelope::new(messages);
    match format {
        ResponseFormat::Json => (status, Json(envelope)).into_response(),
        ResponseFormat::Html => (status, Html(error_page(status, &envelope.messages))).into_response(),
    }
}

fn error_page(status: StatusCode, messages: &[String]) -> String {
    let items: String = messages
        .iter()
        .map(|m| format!("<li>{}</li>", escape_html(m)))
        .collect();
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Error {code}</title></head>\
         <body><h1>Error</h1><ul class=\"km-errors\">{items}</ul></body></html>",
        code = status.as_u16(),
    )
}

/// Messages are rendered as single-line text.
fn flatten_message(msg: &str) -> String {
    msg.replace("\r\n", " ").replace('\n', " ")
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
