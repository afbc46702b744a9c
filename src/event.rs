//! The per-request event.
//!
//! An [`Event`] is created once per inbound request, before routing, and is
//! handed to every middleware and to the handler. It carries:
//!
//! - the request itself (method, URI, headers, and a body readable once);
//! - the response being staged (status, status text and headers), applied
//!   when the handler's return value is coerced;
//! - the router parameters of the matched route;
//! - a typed context store for anything links want to pass along
//!   (authentication results, parsed sessions, counters);
//! - deferred work that must finish after the response is sent.
//!
//! `Event` is a handle: cloning it is cheap and every clone refers to the same
//! request. Events are never shared between requests. The chain runs links one
//! after another, so the internal lock is never contended.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::future;
use http::header::{self, AsHeaderName, HeaderMap, HeaderValue, IntoHeaderName};
use http::{Extensions, Method, StatusCode, Uri};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::body::Body;
use crate::error::HttpError;
use crate::handler::BoxFuture;
use crate::matcher::Params;
use crate::request::Request;

/// Response status and headers staged by chain links.
#[derive(Clone, Debug, Default)]
pub struct StagedResponse {
    pub status: Option<StatusCode>,
    pub status_text: Option<String>,
    pub headers: HeaderMap,
}

/// Per-request carrier. See the [module docs](self).
#[derive(Clone)]
pub struct Event {
    inner: Arc<Inner>,
}

struct Inner {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    state: Mutex<State>,
}

struct State {
    body: BodyState,
    response: StagedResponse,
    params: Params,
    matched_route: Option<String>,
    context: Extensions,
    deferred: Vec<BoxFuture<()>>,
}

enum BodyState {
    Unread(Body),
    Buffered(Bytes),
    Taken,
    /// Collecting the body failed. Later reads report the same failure.
    Failed(String),
}

impl Event {
    pub fn new(req: Request) -> Self {
        let Request { method, uri, headers, body } = req;
        Self {
            inner: Arc::new(Inner {
                method,
                uri,
                headers,
                state: Mutex::new(State {
                    body: BodyState::Unread(body),
                    response: StagedResponse::default(),
                    params: Params::default(),
                    matched_route: None,
                    context: Extensions::new(),
                    deferred: Vec::new(),
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Request ───────────────────────────────────────────────────────────────

    pub fn method(&self) -> &Method { &self.inner.method }
    pub fn uri(&self) -> &Uri { &self.inner.uri }
    pub fn path(&self) -> &str { self.inner.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.inner.headers }

    /// Case-insensitive request header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Rejects the request with `405 Method Not Allowed` unless its method is
    /// one of `expected`. With `allow_head`, `HEAD` is always accepted.
    pub fn assert_method(&self, expected: &[Method], allow_head: bool) -> Result<(), HttpError> {
        let method = self.method();
        if expected.contains(method) || (allow_head && method == Method::HEAD) {
            return Ok(());
        }

        let allow = expected.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
        let mut err = HttpError::new(StatusCode::METHOD_NOT_ALLOWED)
            .with_status_message("Method Not Allowed");
        if let Ok(value) = HeaderValue::from_str(&allow) {
            err = err.with_header(header::ALLOW, value);
        }
        Err(err)
    }

    // ── Body ──────────────────────────────────────────────────────────────────

    /// Takes the raw body stream. Returns `None` once the body has been taken
    /// or read.
    pub fn take_body(&self) -> Option<Body> {
        let mut state = self.state();
        match std::mem::replace(&mut state.body, BodyState::Taken) {
            BodyState::Unread(body) => Some(body),
            other => {
                state.body = other;
                None
            }
        }
    }

    /// Reads the whole body. The bytes are cached, so later reads are free.
    pub async fn read_body(&self) -> Result<Bytes, HttpError> {
        let body = {
            let mut state = self.state();
            match std::mem::replace(&mut state.body, BodyState::Taken) {
                BodyState::Unread(body) => body,
                BodyState::Buffered(bytes) => {
                    state.body = BodyState::Buffered(bytes.clone());
                    return Ok(bytes);
                }
                BodyState::Taken => {
                    return Err(HttpError::message("request body was already taken as a stream"));
                }
                BodyState::Failed(reason) => {
                    let err = body_read_error().with_message(reason.clone());
                    state.body = BodyState::Failed(reason);
                    return Err(err);
                }
            }
        };

        match body.into_bytes().await {
            Ok(bytes) => {
                self.state().body = BodyState::Buffered(bytes.clone());
                Ok(bytes)
            }
            Err(err) => {
                let reason = err.to_string();
                self.state().body = BodyState::Failed(reason.clone());
                Err(body_read_error().with_message(reason).with_cause(err))
            }
        }
    }

    /// Reads the body as UTF-8 text. Invalid UTF-8 is a `400`.
    pub async fn read_text(&self) -> Result<String, HttpError> {
        let bytes = self.read_body().await?;
        String::from_utf8(bytes.to_vec()).map_err(|err| {
            HttpError::new(StatusCode::BAD_REQUEST)
                .with_status_message("Invalid UTF-8 body")
                .with_cause(err)
        })
    }

    /// Parses the body as JSON. Malformed input is a `400`.
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        let bytes = self.read_body().await?;
        serde_json::from_slice(&bytes).map_err(|err| {
            HttpError::new(StatusCode::BAD_REQUEST)
                .with_status_message("Invalid JSON body")
                .with_message(err.to_string())
                .with_cause(err)
        })
    }

    /// Parses the body as JSON and runs `validate` on it. A rejection becomes
    /// `400 Validation Error` with the validator's error as `data`.
    pub async fn read_validated_json<T, U, E, F>(&self, validate: F) -> Result<U, HttpError>
    where
        T: DeserializeOwned,
        F: FnOnce(T) -> Result<U, E>,
        E: Into<Value>,
    {
        let value = self.read_json::<T>().await?;
        validate(value).map_err(validation_error)
    }

    // ── Query ─────────────────────────────────────────────────────────────────

    /// Deserializes the query string. Malformed input is a `400`.
    pub fn query<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        let raw = self.inner.uri.query().unwrap_or_default();
        serde_urlencoded::from_str(raw).map_err(|err| {
            HttpError::new(StatusCode::BAD_REQUEST)
                .with_status_message("Invalid query string")
                .with_message(err.to_string())
                .with_cause(err)
        })
    }

    /// Like [`Event::query`], then runs `validate`.
    pub fn validated_query<T, U, E, F>(&self, validate: F) -> Result<U, HttpError>
    where
        T: DeserializeOwned,
        F: FnOnce(T) -> Result<U, E>,
        E: Into<Value>,
    {
        let value = self.query::<T>()?;
        validate(value).map_err(validation_error)
    }

    /// Decoded query pairs in order, repeated keys included. Pairs are
    /// percent-decoded with `+` read as a space, so the raw spelling is not
    /// preserved. A query that does not decode is a `400`.
    pub fn query_pairs(&self) -> Result<Vec<(String, String)>, HttpError> {
        self.query()
    }

    // ── Router parameters ─────────────────────────────────────────────────────

    pub(crate) fn set_route(&self, pattern: &str, params: Params) {
        let mut state = self.state();
        state.matched_route = Some(pattern.to_owned());
        state.params = params;
    }

    /// Raw value of a router parameter.
    pub fn router_param(&self, name: &str) -> Option<String> {
        self.state().params.get(name).map(str::to_owned)
    }

    /// Percent-decoded value of a router parameter.
    pub fn router_param_decoded(&self, name: &str) -> Option<String> {
        self.state().params.get_decoded(name)
    }

    pub fn router_params(&self) -> Params {
        self.state().params.clone()
    }

    /// Pattern of the route that matched, if any.
    pub fn matched_route(&self) -> Option<String> {
        self.state().matched_route.clone()
    }

    // ── Staged response ───────────────────────────────────────────────────────

    pub fn set_status(&self, status: StatusCode) {
        self.state().response.status = Some(status);
    }

    pub fn set_status_text(&self, text: impl Into<String>) {
        self.state().response.status_text = Some(text.into());
    }

    /// Status staged so far, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.state().response.status
    }

    /// Sets a response header, replacing previous values.
    pub fn set_response_header<K: IntoHeaderName>(&self, name: K, value: HeaderValue) {
        self.state().response.headers.insert(name, value);
    }

    /// Adds a response header value, keeping previous ones.
    pub fn append_response_header<K: IntoHeaderName>(&self, name: K, value: HeaderValue) {
        self.state().response.headers.append(name, value);
    }

    pub fn remove_response_header<K: AsHeaderName>(&self, name: K) -> Option<HeaderValue> {
        self.state().response.headers.remove(name)
    }

    pub fn response_header<K: AsHeaderName>(&self, name: K) -> Option<HeaderValue> {
        self.state().response.headers.get(name).cloned()
    }

    /// Snapshot of the staged status and headers.
    pub fn staged_response(&self) -> StagedResponse {
        self.state().response.clone()
    }

    // ── Context ───────────────────────────────────────────────────────────────

    /// Stores a value keyed by its type. Returns the previous one.
    pub fn insert_context<T>(&self, value: T) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.state().context.insert(value)
    }

    /// A copy of the stored value of type `T`.
    pub fn context<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.state().context.get::<T>().cloned()
    }

    pub fn remove_context<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.state().context.remove::<T>()
    }

    /// Runs `f` on the stored `T`, inserting `T::default()` first if absent.
    ///
    /// `f` runs under the event lock: do not call back into the event from it.
    pub fn with_context<T, R>(&self, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Default + Clone + Send + Sync + 'static,
    {
        let mut state = self.state();
        f(state.context.get_or_insert_default::<T>())
    }

    // ── Deferred work ─────────────────────────────────────────────────────────

    /// Registers background work that must not delay the response but must
    /// finish before the request's execution context goes away.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.state().deferred.push(Box::pin(work));
    }

    pub(crate) fn take_deferred(&self) -> Deferred {
        Deferred(std::mem::take(&mut self.state().deferred))
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("method", &self.inner.method)
            .field("uri", &self.inner.uri)
            .finish_non_exhaustive()
    }
}

fn body_read_error() -> HttpError {
    HttpError::new(StatusCode::BAD_REQUEST).with_status_message("Failed to read request body")
}

fn validation_error(err: impl Into<Value>) -> HttpError {
    HttpError::new(StatusCode::BAD_REQUEST)
        .with_status_message("Validation Error")
        .with_data(err.into())
}

// ── Deferred ──────────────────────────────────────────────────────────────────

/// Background work collected from one request.
#[derive(Default)]
pub struct Deferred(Vec<BoxFuture<()>>);

impl Deferred {
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn len(&self) -> usize { self.0.len() }

    /// Drives all work to completion, concurrently.
    pub async fn wait(self) {
        future::join_all(self.0).await;
    }

    /// Detaches the work onto the current tokio runtime.
    pub fn spawn(self) {
        for work in self.0 {
            tokio::spawn(work);
        }
    }
}

impl IntoIterator for Deferred {
    type Item = BoxFuture<()>;
    type IntoIter = std::vec::IntoIter<BoxFuture<()>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Deferred").field(&self.0.len()).finish()
    }
}
