//! Outgoing HTTP response type.
//!
//! A [`Response`] is the fully materialized wire value: status, optional
//! reason phrase, headers and a body. Handlers rarely build one by hand, since
//! returning a string or a `Json` is enough (see [`crate::reply`]). When a
//! handler needs full control it returns a `Response` and weft sends it as-is.

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue, IntoHeaderName};
use http::StatusCode;
use hyper::ext::ReasonPhrase;

use crate::body::{Body, BodyStream, HttpBody};
use crate::error::BoxError;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Html,         // text/html;charset=UTF-8
    Json,         // application/json;charset=UTF-8
    MsgPack,      // application/msgpack
    OctetStream,  // application/octet-stream  (binary / file download)
    Pdf,          // application/pdf
    Text,         // text/plain;charset=UTF-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Html        => "text/html;charset=UTF-8",
            Self::Json        => "application/json;charset=UTF-8",
            Self::MsgPack     => "application/msgpack",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Text        => "text/plain;charset=UTF-8",
            Self::Xml         => "application/xml",
        }
    }

    pub(crate) fn header_value(self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK, no custom headers needed)
///
/// ```rust
/// use http::StatusCode;
/// use weft::Response;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use http::{HeaderValue, StatusCode};
/// use weft::{ContentType, Response};
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", HeaderValue::from_static("/users/42"))
///     .json(br#"{"id":42}"#.to_vec());
///
/// Response::builder()
///     .bytes(ContentType::Xml, b"<ok/>".to_vec());
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) status_text: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
}

impl Response {
    /// `200 OK`, `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().finish(ContentType::Json, Body::Full(body.into()))
    }

    /// `200 OK`, `text/plain`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// `200 OK`, `text/html`.
    pub fn html(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::builder().bytes(ContentType::Html, body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::from_parts(code, None, HeaderMap::new(), Body::Empty)
    }

    /// Redirect with a `location` header. Use `302 Found`, `307`, `308`, …
    pub fn redirect(code: StatusCode, location: HeaderValue) -> Self {
        Self::builder()
            .status(code)
            .header(header::LOCATION, location)
            .no_body()
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder {
            headers: HeaderMap::new(),
            status: StatusCode::OK,
            status_text: None,
        }
    }

    pub(crate) fn from_parts(
        status: StatusCode,
        status_text: Option<String>,
        headers: HeaderMap,
        body: Body,
    ) -> Self {
        Self { status, status_text, headers, body }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn status_text(&self) -> Option<&str> { self.status_text.as_deref() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &Body { &self.body }
    pub fn into_body(self) -> Body { self.body }

    /// First value of a header, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Collects the body. Convenient in tests.
    pub async fn into_bytes(self) -> Result<Bytes, BoxError> {
        self.body.into_bytes().await
    }

    /// Converts into the hyper response. The status text travels as an
    /// HTTP/1 reason phrase; an invalid one is dropped.
    pub(crate) fn into_http(self) -> http::Response<HttpBody> {
        let mut res = http::Response::new(self.body.into_http_body());
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        if let Some(text) = self.status_text {
            if let Ok(reason) = ReasonPhrase::try_from(text.into_bytes()) {
                res.extensions_mut().insert(reason);
            }
        }
        res
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method: you always know what you're sending.
#[derive(Debug)]
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
    status_text: Option<String>,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Custom reason phrase for the status line.
    pub fn status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    /// Appends a header. Repeated names are kept (e.g. `set-cookie`).
    pub fn header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish(ContentType::Json, Body::Full(body.into()))
    }

    /// Terminate with a plain-text body (`text/plain;charset=UTF-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        let body: String = body.into();
        self.finish(ContentType::Text, Body::from(body))
    }

    /// Terminate with a typed body. Use this for XML, HTML, binary, SSE, etc.
    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.finish(content_type, Body::Full(body.into()))
    }

    /// Terminate with a streaming body. Nothing is buffered.
    pub fn stream(self, content_type: ContentType, body: BodyStream) -> Response {
        self.finish(content_type, Body::Stream(body))
    }

    /// Terminate with no body (e.g. `204 No Content`, redirects).
    pub fn no_body(self) -> Response {
        Response::from_parts(self.status, self.status_text, self.headers, Body::Empty)
    }

    fn finish(mut self, content_type: ContentType, body: Body) -> Response {
        if !self.headers.contains_key(header::CONTENT_TYPE) {
            self.headers.insert(header::CONTENT_TYPE, content_type.header_value());
        }
        if let Some(len) = body.len_hint() {
            self.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
        Response::from_parts(self.status, self.status_text, self.headers, body)
    }
}

// ── Header merging ────────────────────────────────────────────────────────────

/// Copies every header of `defaults` whose name is absent from `target`.
pub(crate) fn apply_default_headers(target: &mut HeaderMap, defaults: &HeaderMap) {
    for name in defaults.keys() {
        if target.contains_key(name) {
            continue;
        }
        for value in defaults.get_all(name) {
            target.append(name.clone(), value.clone());
        }
    }
}

/// Replaces every header of `target` that `source` names, keeping all of
/// `source`'s values.
pub(crate) fn override_headers(target: &mut HeaderMap, source: HeaderMap) {
    let mut current: Option<HeaderName> = None;
    for (name, value) in source {
        if let Some(name) = name {
            target.remove(&name);
            current = Some(name);
        }
        if let Some(name) = &current {
            target.append(name.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_content_headers() {
        let res = Response::builder()
            .status(StatusCode::CREATED)
            .header("location", HeaderValue::from_static("/users/42"))
            .json(&br#"{"id":42}"#[..]);

        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.header("content-type"), Some("application/json;charset=UTF-8"));
        assert_eq!(res.header("content-length"), Some("9"));
        assert_eq!(res.header("location"), Some("/users/42"));
    }

    #[test]
    fn test_builder_keeps_explicit_content_type() {
        let res = Response::builder()
            .header(header::CONTENT_TYPE, HeaderValue::from_static("application/problem+json"))
            .json(&b"{}"[..]);
        assert_eq!(res.header("content-type"), Some("application/problem+json"));
    }

    #[test]
    fn test_redirect() {
        let res = Response::redirect(StatusCode::FOUND, HeaderValue::from_static("/login"));
        assert_eq!(res.status_code(), StatusCode::FOUND);
        assert_eq!(res.header("location"), Some("/login"));
        assert!(res.body().is_empty());
    }

    #[test]
    fn test_into_http_carries_reason_phrase() {
        let res = Response::builder()
            .status(StatusCode::IM_A_TEAPOT)
            .status_text("Short and stout")
            .no_body()
            .into_http();
        assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
        let reason = res.extensions().get::<ReasonPhrase>().unwrap();
        assert_eq!(reason.as_bytes(), b"Short and stout");
    }

    #[test]
    fn test_default_headers_do_not_override() {
        let mut target = HeaderMap::new();
        target.insert("x-a", HeaderValue::from_static("mine"));
        let mut defaults = HeaderMap::new();
        defaults.insert("x-a", HeaderValue::from_static("staged"));
        defaults.append("set-cookie", HeaderValue::from_static("a=1"));
        defaults.append("set-cookie", HeaderValue::from_static("b=2"));

        apply_default_headers(&mut target, &defaults);

        assert_eq!(target.get("x-a").unwrap(), "mine");
        assert_eq!(target.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn test_override_headers_replaces_all_values() {
        let mut target = HeaderMap::new();
        target.append("vary", HeaderValue::from_static("accept"));
        target.append("vary", HeaderValue::from_static("origin"));
        let mut source = HeaderMap::new();
        source.append("vary", HeaderValue::from_static("cookie"));

        override_headers(&mut target, source);

        let values: Vec<_> = target.get_all("vary").iter().collect();
        assert_eq!(values, vec![&HeaderValue::from_static("cookie")]);
    }
}
