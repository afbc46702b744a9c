//! Error types.
//!
//! Two kinds of failure live here and they never mix:
//!
//! - [`HttpError`] is what a request produces when it fails. It carries an
//!   HTTP status, an optional reason phrase, an internal message and
//!   client-visible `data`, and is rendered to the client as a JSON payload.
//! - [`Error`] surfaces infrastructure failures of the transport adapter:
//!   binding to a port or accepting a connection.
//!
//! # Typed errors versus faults
//!
//! An `HttpError` built on purpose (`HttpError::new`, `from_value`, …) is
//! *trusted*: its status and reason phrase reach the client as-is. Anything
//! else that goes wrong inside a chain (a `?` on an `io::Error`, a failed
//! serialization, a panic) becomes an *unhandled* fault: status 500, with the
//! original message kept for logs and hidden from the wire.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;

use http::header::{self, HeaderMap, HeaderValue, IntoHeaderName};
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::response::{ContentType, Response, override_headers};

/// Boxed error used for body streams and fault causes.
pub type BoxError = Box<dyn StdError + Send + Sync>;

// ── Infrastructure errors ─────────────────────────────────────────────────────

/// The error type returned by the transport adapter.
///
/// Application-level failures (404, 422, …) are [`HttpError`]s and never show
/// up here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid socket address `{addr}`: {source}")]
    Addr {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ── HttpError ─────────────────────────────────────────────────────────────────

/// An error that terminates a request with an HTTP error response.
///
/// ```rust
/// use http::StatusCode;
/// use serde_json::json;
/// use weft::HttpError;
///
/// let err = HttpError::new(StatusCode::BAD_REQUEST)
///     .with_status_message("Bad Request")
///     .with_data(json!({ "field": "email" }));
/// assert_eq!(err.status(), StatusCode::BAD_REQUEST);
/// ```
///
/// Any `std::error::Error + Send + Sync + 'static` converts into an unhandled
/// `HttpError`, so `?` works inside handlers:
///
/// ```rust
/// # use weft::HttpError;
/// fn load() -> Result<String, HttpError> {
///     let text = std::fs::read_to_string("/definitely/missing")?;
///     Ok(text)
/// }
/// let err = load().unwrap_err();
/// assert!(err.is_unhandled());
/// assert_eq!(err.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
/// ```
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    status_message: Option<String>,
    message: Option<String>,
    data: Option<Value>,
    cause: Option<BoxError>,
    headers: HeaderMap,
    unhandled: bool,
}

impl HttpError {
    /// A typed error with the given status and nothing else.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            status_message: None,
            message: None,
            data: None,
            cause: None,
            headers: HeaderMap::new(),
            unhandled: false,
        }
    }

    /// A typed `500` error carrying `message` for diagnostics.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR).with_message(message)
    }

    /// Builds a typed error from loosely structured input.
    ///
    /// A JSON string behaves like [`HttpError::message`]. An object has its
    /// recognized fields copied: `statusCode` (default 500, out-of-range codes
    /// become 500), `statusMessage`, `message`, `data` and `cause`. Other
    /// fields are ignored.
    pub fn from_value(input: &Value) -> Self {
        let Some(fields) = input.as_object() else {
            return match input.as_str() {
                Some(text) => Self::message(text),
                None => Self::new(StatusCode::INTERNAL_SERVER_ERROR),
            };
        };

        let status = fields
            .get("statusCode")
            .and_then(status_from_value)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut err = Self::new(status);
        err.status_message = fields.get("statusMessage").and_then(string_field);
        err.message = fields.get("message").and_then(string_field);
        err.data = fields.get("data").cloned();
        err.cause = fields.get("cause").map(|cause| {
            let text = cause.as_str().map_or_else(|| cause.to_string(), str::to_owned);
            Box::new(Cause(text)) as BoxError
        });
        err
    }

    /// An unexpected fault: always `500`, message kept for logs only.
    pub fn fault(err: impl Into<BoxError>) -> Self {
        let cause = err.into();
        let mut this = Self::new(StatusCode::INTERNAL_SERVER_ERROR);
        this.message = Some(cause.to_string());
        this.cause = Some(cause);
        this.unhandled = true;
        this
    }

    /// Converts a caught panic payload into a fault.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let text = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_owned()
        };
        Self::fault(format!("panic: {text}"))
    }

    pub(crate) fn not_found(path: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND)
            .with_status_message(format!("Cannot find any route matching {path}."))
    }

    // ── Builders ──────────────────────────────────────────────────────────────

    /// Reason phrase sent on the status line and in the payload.
    pub fn with_status_message(mut self, status_message: impl Into<String>) -> Self {
        self.status_message = Some(status_message.into());
        self
    }

    /// Internal message. Never part of the wire payload.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Client-visible data, serialized as the payload's `data` field.
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Header sent with the error response, e.g. `allow` on a 405.
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn status(&self) -> StatusCode { self.status }
    pub fn status_message(&self) -> Option<&str> { self.status_message.as_deref() }
    pub fn message_text(&self) -> Option<&str> { self.message.as_deref() }
    pub fn data(&self) -> Option<&Value> { self.data.as_ref() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// `true` for faults that were not constructed as typed errors.
    pub fn is_unhandled(&self) -> bool { self.unhandled }

    // ── Rendering ─────────────────────────────────────────────────────────────

    /// Message plus cause chain, used as `stack` in debug mode.
    fn stack(&self) -> Vec<String> {
        let mut lines = vec![self.to_string()];
        let mut source = self.cause.as_deref().map(|c| c as &(dyn StdError + 'static));
        while let Some(err) = source {
            lines.push(err.to_string());
            source = err.source();
        }
        lines
    }

    /// Renders the wire response. `staged` holds headers set on the event
    /// before the failure; the error's own headers override them.
    pub(crate) fn into_response(self, staged: HeaderMap, debug: bool) -> Response {
        let status_message = self.status_message.as_deref().map(sanitize_status_message);
        let payload = ErrorPayload {
            status_code: self.status.as_u16(),
            status_message: status_message.as_deref(),
            stack: if debug { self.stack() } else { Vec::new() },
            data: self.data.as_ref(),
        };
        let body = serde_json::to_vec(&payload).unwrap_or_default();

        let mut headers = staged;
        override_headers(&mut headers, self.headers);
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(ContentType::Json.as_str()));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        Response::from_parts(self.status, status_message, headers, body.into())
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .message
            .as_deref()
            .or(self.status_message.as_deref())
            .or(self.status.canonical_reason())
            .unwrap_or("");
        write!(f, "{}: {text}", self.status.as_u16())
    }
}

/// Everything that is an error becomes an unhandled fault.
///
/// `HttpError` deliberately does not implement `std::error::Error` so this
/// blanket impl stays coherent.
impl<E> From<E> for HttpError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::fault(err)
    }
}

// ── Wire payload ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorPayload<'a> {
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_message: Option<&'a str>,
    stack: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Cause(String);

fn status_from_value(value: &Value) -> Option<StatusCode> {
    let code = value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))?;
    StatusCode::from_u16(u16::try_from(code).ok()?).ok()
}

fn string_field(value: &Value) -> Option<String> {
    value.as_str().map(str::to_owned)
}

/// Keeps tab and visible ASCII; everything else would corrupt the status line.
pub(crate) fn sanitize_status_message(text: &str) -> String {
    text.chars().filter(|c| *c == '\t' || (' '..='~').contains(c)).collect()
}
