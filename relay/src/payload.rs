//! Normalization of inbound webhook bodies.
//!
//! Signal providers are inconsistent about how they encode alerts: some send
//! JSON, some send form fields, some send the alert text verbatim. Every
//! body is turned into an [`InboundPayload`] by trying a fixed sequence of
//! parse attempts and taking the first one that succeeds.

use futures::stream;
use hyper::body::Bytes;
use multer::Multipart;
use serde_json::{Map, Value};
use std::convert::Infallible;
use thiserror::Error;

/// Ordered key/value mapping relayed downstream.
pub type InboundPayload = Map<String, Value>;

/// Field used when the body is relayed as plain text.
pub const MESSAGE_FIELD: &str = "message";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("malformed JSON body: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("JSON body must be an object, got {0}")]
    NotAnObject(&'static str),
}

/// The encoding a payload was recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Declared `application/json`
    Json,
    /// Urlencoded or `multipart/form-data` with at least one text field
    Form,
    /// Undeclared body that happened to be a JSON object
    RawJson,
    /// Anything else, wrapped under [`MESSAGE_FIELD`]
    Text,
}

impl Encoding {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Form => "form",
            Encoding::RawJson => "raw_json",
            Encoding::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Attempt {
    UrlEncodedForm,
    MultipartForm,
    RawJson,
}

/// Attempts for bodies that are not declared as JSON, in priority order.
/// Bodies none of them accept are wrapped as text.
const FALLBACK_CHAIN: &[Attempt] = &[
    Attempt::UrlEncodedForm,
    Attempt::MultipartForm,
    Attempt::RawJson,
];

impl Attempt {
    fn encoding(self) -> Encoding {
        match self {
            Attempt::UrlEncodedForm | Attempt::MultipartForm => Encoding::Form,
            Attempt::RawJson => Encoding::RawJson,
        }
    }

    async fn run(self, content_type: &str, body: &[u8]) -> Option<InboundPayload> {
        match self {
            Attempt::UrlEncodedForm => parse_form(content_type, body),
            Attempt::MultipartForm => parse_multipart(content_type, body).await,
            Attempt::RawJson => parse_raw_json(body),
        }
    }
}

/// Turns a request body into a payload.
///
/// Only a body declared as JSON can fail: it must be a well-formed JSON
/// object. Every other body produces some payload.
pub async fn normalize(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<(Encoding, InboundPayload), PayloadError> {
    let content_type = content_type.unwrap_or_default();

    if content_type.contains("application/json") {
        return parse_declared_json(body).map(|payload| (Encoding::Json, payload));
    }

    for attempt in FALLBACK_CHAIN {
        if let Some(payload) = attempt.run(content_type, body).await {
            return Ok((attempt.encoding(), payload));
        }
    }

    Ok((Encoding::Text, wrap_text(body)))
}

fn parse_declared_json(body: &[u8]) -> Result<InboundPayload, PayloadError> {
    match serde_json::from_slice(body)? {
        Value::Object(map) => Ok(map),
        other => Err(PayloadError::NotAnObject(kind_of(&other))),
    }
}

fn parse_form(content_type: &str, body: &[u8]) -> Option<InboundPayload> {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    if !mime.eq_ignore_ascii_case(FORM_CONTENT_TYPE) {
        return None;
    }

    let mut payload = InboundPayload::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        // Repeated keys keep their first value
        payload
            .entry(key.into_owned())
            .or_insert_with(|| Value::String(value.into_owned()));
    }

    (!payload.is_empty()).then_some(payload)
}

/// Text fields of a `multipart/form-data` body. File parts are skipped and
/// a body multer cannot read is not a form at all.
async fn parse_multipart(content_type: &str, body: &[u8]) -> Option<InboundPayload> {
    let boundary = multer::parse_boundary(content_type).ok()?;
    let chunk = Bytes::copy_from_slice(body);
    let mut multipart = Multipart::new(
        stream::once(async move { Ok::<_, Infallible>(chunk) }),
        boundary,
    );

    let mut payload = InboundPayload::new();
    while let Some(field) = multipart.next_field().await.ok()? {
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        let value = field.text().await.ok()?;
        payload.entry(name).or_insert(Value::String(value));
    }

    (!payload.is_empty()).then_some(payload)
}

fn parse_raw_json(body: &[u8]) -> Option<InboundPayload> {
    let text = String::from_utf8_lossy(body);
    match serde_json::from_str(&text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn wrap_text(body: &[u8]) -> InboundPayload {
    let mut payload = InboundPayload::new();
    payload.insert(
        MESSAGE_FIELD.into(),
        Value::String(String::from_utf8_lossy(body).into_owned()),
    );
    payload
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
