//! Handler return values and their coercion into a [`Response`].
//!
//! A handler may return many kinds of value: nothing, a string, bytes, a
//! stream, a serializable value, a fully built response or an error. Each is
//! classified into a [`Reply`] through [`IntoReply`], and [`coerce`] turns the
//! reply into the wire response, taking whatever status and headers were
//! staged on the [`Event`] into account.
//!
//! | Reply      | Body                      | Defaults applied                                 |
//! |------------|---------------------------|--------------------------------------------------|
//! | `Empty`    | none                      | staged status, status text, headers              |
//! | `Response` | as returned               | staged headers fill in missing names only        |
//! | `Bytes`    | verbatim                  | `content-length`                                 |
//! | `Stream`   | streamed, never buffered  | staged status and headers                        |
//! | `Text`     | UTF-8                     | `text/plain;charset=UTF-8`, `content-length`     |
//! | `Json`     | `serde_json` output       | `application/json;charset=UTF-8`, `content-length` |
//! | `BigInt`   | decimal digits            | `application/json;charset=UTF-8`, `content-length` |
//! | `Error`    | —                         | raised, rendered by the error boundary           |
//!
//! Values with no `IntoReply` impl are rejected at compile time.

use std::fmt;

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::body::{Body, BodyStream};
use crate::error::HttpError;
use crate::event::Event;
use crate::response::{ContentType, Response, apply_default_headers};

/// The classified return value of a chain link.
pub enum Reply {
    /// No value. Observers continue the chain; handlers send an empty body.
    Empty,
    Response(Response),
    Bytes(Bytes),
    Stream(BodyStream),
    Text(String),
    Json(Value),
    /// An integer outside the JSON-safe range, as decimal digits.
    BigInt(String),
    Error(HttpError),
}

impl Reply {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Streams `stream` as the response body.
    pub fn stream(stream: BodyStream) -> Self {
        Self::Stream(stream)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Response(res) => f.debug_tuple("Response").field(res).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::BigInt(digits) => f.debug_tuple("BigInt").field(digits).finish(),
            Self::Error(err) => f.debug_tuple("Error").field(err).finish(),
        }
    }
}

// ── Json ──────────────────────────────────────────────────────────────────────

/// Serializes `T` as the response body.
///
/// The value's own [`Serialize`] impl is the serialization hook: a type that
/// wants a custom wire shape implements it by hand.
///
/// ```rust
/// use serde::Serialize;
/// use weft::{Event, Json};
///
/// #[derive(Serialize)]
/// struct User { id: u32, name: String }
///
/// async fn get_user(_event: Event) -> Json<User> {
///     Json(User { id: 1, name: "alice".into() })
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Json<T>(pub T);

// ── IntoReply ─────────────────────────────────────────────────────────────────

/// Conversion of a handler's return value into a [`Reply`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply { self }
}

impl IntoReply for () {
    fn into_reply(self) -> Reply { Reply::Empty }
}

impl IntoReply for Response {
    fn into_reply(self) -> Reply { Reply::Response(self) }
}

/// Return a status directly from a handler: `return StatusCode::NO_CONTENT`
impl IntoReply for StatusCode {
    fn into_reply(self) -> Reply { Reply::Response(Response::status(self)) }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Reply { Reply::Text(self.to_owned()) }
}

impl IntoReply for String {
    fn into_reply(self) -> Reply { Reply::Text(self) }
}

impl IntoReply for Bytes {
    fn into_reply(self) -> Reply { Reply::Bytes(self) }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> Reply { Reply::Bytes(self.into()) }
}

impl IntoReply for &'static [u8] {
    fn into_reply(self) -> Reply { Reply::Bytes(Bytes::from_static(self)) }
}

impl IntoReply for Value {
    fn into_reply(self) -> Reply { Reply::Json(self) }
}

macro_rules! json_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReply for $ty {
                fn into_reply(self) -> Reply { Reply::Json(Value::from(self)) }
            }
        )*
    };
}

json_scalar!(bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl IntoReply for i128 {
    fn into_reply(self) -> Reply { Reply::BigInt(self.to_string()) }
}

impl IntoReply for u128 {
    fn into_reply(self) -> Reply { Reply::BigInt(self.to_string()) }
}

impl<T: Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> Reply {
        match serde_json::to_value(&self.0) {
            Ok(value) => Reply::Json(value),
            Err(err) => Reply::Error(err.into()),
        }
    }
}

impl IntoReply for HttpError {
    fn into_reply(self) -> Reply { Reply::Error(self) }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Reply {
        self.map_or(Reply::Empty, IntoReply::into_reply)
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<HttpError>,
{
    fn into_reply(self) -> Reply {
        match self {
            Ok(value) => value.into_reply(),
            Err(err) => Reply::Error(err.into()),
        }
    }
}

// ── Coercion ──────────────────────────────────────────────────────────────────

/// Turns a reply into the wire response for `event`.
///
/// `Reply::Error` comes back as `Err`, exactly as if the link had raised it.
pub fn coerce(reply: Reply, event: &Event) -> Result<Response, HttpError> {
    let staged = event.staged_response();

    let (body, content_type) = match reply {
        Reply::Empty => (Body::Empty, None),
        Reply::Response(mut res) => {
            apply_default_headers(&mut res.headers, &staged.headers);
            return Ok(res);
        }
        Reply::Bytes(bytes) => (Body::Full(bytes), None),
        Reply::Stream(stream) => (Body::Stream(stream), None),
        Reply::Text(text) => (Body::from(text), Some(ContentType::Text)),
        Reply::Json(value) => {
            let bytes = serde_json::to_vec(&value)?;
            (Body::from(bytes), Some(ContentType::Json))
        }
        Reply::BigInt(digits) => (Body::from(digits), Some(ContentType::Json)),
        Reply::Error(err) => return Err(err),
    };

    let mut headers: HeaderMap = staged.headers;
    if let Some(content_type) = content_type {
        if !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(header::CONTENT_TYPE, content_type.header_value());
        }
    }
    if let Body::Full(bytes) = &body {
        if !headers.contains_key(header::CONTENT_LENGTH) {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        }
    }

    Ok(Response::from_parts(
        staged.status.unwrap_or(StatusCode::OK),
        staged.status_text,
        headers,
        body,
    ))
}
