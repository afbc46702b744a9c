//! Middleware layer.
//!
//! Middleware is the right place for cross-cutting concerns: structured
//! tracing, request-id injection, authentication, response decoration.
//!
//! A [`Middleware`] comes in one of two shapes:
//!
//! - an **observer** runs once before the rest of the chain. Returning nothing
//!   lets the chain continue; returning anything else short-circuits it and
//!   becomes the response.
//! - an **interceptor** receives a [`Next`] and decides if and when the rest
//!   of the chain runs. It can inspect, replace or recover from whatever
//!   downstream produced.
//!
//! ```rust
//! use http::{HeaderValue, StatusCode};
//! use weft::{Event, HttpError, Middleware, Next};
//!
//! let auth = Middleware::observe(|ev: Event| async move {
//!     if ev.header("authorization").is_none() {
//!         return Err(HttpError::new(StatusCode::UNAUTHORIZED));
//!     }
//!     Ok(())
//! })
//! .on_route("/admin/**");
//!
//! let powered_by = Middleware::intercept(|_ev: Event, next: Next| async move {
//!     let mut res = next.run().await?;
//!     res.headers_mut().insert("x-powered-by", HeaderValue::from_static("weft"));
//!     Ok::<_, HttpError>(res)
//! });
//! ```
//!
//! Built-in middleware:
//! - [`trace`]: per-request span with method, path, status and latency

mod chain;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use http::Method;
use tracing::{Instrument, info, info_span, warn};

use crate::error::HttpError;
use crate::event::Event;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::matcher::PathPattern;
use crate::reply::{IntoReply, Reply};
use crate::response::Response;

pub(crate) use chain::{Chain, Terminal};

type BoxedInterceptor = Arc<dyn Fn(Event, Next) -> BoxFuture<Reply> + Send + Sync + 'static>;

enum Kind {
    Observe(BoxedHandler),
    Intercept(BoxedInterceptor),
}

/// Which requests a middleware runs for. Empty means all of them.
#[derive(Default)]
struct Filter {
    method: Option<Method>,
    route: Option<PathPattern>,
}

impl Filter {
    fn matches(&self, method: &Method, path: &str) -> bool {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return false;
        }
        match &self.route {
            Some(pattern) => pattern.matches(path).is_some(),
            None => true,
        }
    }
}

/// A chain link that runs before the route handler. See the
/// [module docs](self).
pub struct Middleware {
    kind: Kind,
    filter: Filter,
}

impl Middleware {
    /// An observer. Any async function of the handler shape qualifies.
    pub fn observe(f: impl Handler) -> Self {
        Self { kind: Kind::Observe(f.into_boxed_handler()), filter: Filter::default() }
    }

    /// An interceptor: `f` receives the event and the rest of the chain.
    pub fn intercept<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Event, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoReply + Send + 'static,
    {
        let erased: BoxedInterceptor = Arc::new(move |ev: Event, next: Next| -> BoxFuture<Reply> {
            let fut = f(ev, next);
            Box::pin(async move { fut.await.into_reply() })
        });
        Self { kind: Kind::Intercept(erased), filter: Filter::default() }
    }

    /// Runs only for requests with this method.
    pub fn on_method(mut self, method: Method) -> Self {
        self.filter.method = Some(method);
        self
    }

    /// Runs only for request paths matching `pattern`.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is not a valid route pattern.
    pub fn on_route(mut self, pattern: &str) -> Self {
        let parsed = PathPattern::parse(pattern)
            .unwrap_or_else(|e| panic!("invalid middleware route `{pattern}`: {e}"));
        self.filter.route = Some(parsed);
        self
    }

    pub(crate) fn applies_to(&self, method: &Method, path: &str) -> bool {
        self.filter.matches(method, path)
    }

    pub fn is_interceptor(&self) -> bool {
        matches!(self.kind, Kind::Intercept(_))
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_interceptor() { "intercept" } else { "observe" };
        f.debug_struct("Middleware")
            .field("kind", &kind)
            .field("method", &self.filter.method)
            .field("route", &self.filter.route.as_ref().map(PathPattern::as_str))
            .finish()
    }
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// The rest of the chain, handed to an interceptor.
///
/// [`Next::run`] consumes it, so downstream runs at most once.
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
    event: Event,
    called: Arc<AtomicBool>,
}

impl Next {
    /// Runs every remaining link and returns their coerced response, or the
    /// error one of them raised.
    pub async fn run(self) -> Result<Response, HttpError> {
        self.called.store(true, Ordering::Release);
        chain::run(self.chain, self.index, self.event).await
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("index", &self.index).finish_non_exhaustive()
    }
}

// ── Built-ins ─────────────────────────────────────────────────────────────────

/// Wraps the rest of the chain in a `request` span and logs the outcome with
/// its latency. Register it first so it covers everything else.
pub fn trace() -> Middleware {
    Middleware::intercept(|ev: Event, next: Next| async move {
        let span = info_span!("request", method = %ev.method(), path = %ev.path());
        let start = Instant::now();
        let result = next.run().instrument(span.clone()).await;
        let latency = start.elapsed();

        match &result {
            Ok(res) => info!(parent: &span, status = res.status_code().as_u16(), ?latency, "request completed"),
            Err(err) => warn!(parent: &span, status = err.status().as_u16(), ?latency, "request failed"),
        }
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_by_method_and_route() {
        let mw = Middleware::observe(|_ev: Event| async {})
            .on_method(Method::POST)
            .on_route("/api/**");

        assert!(mw.applies_to(&Method::POST, "/api/users"));
        assert!(!mw.applies_to(&Method::GET, "/api/users"));
        assert!(!mw.applies_to(&Method::POST, "/health"));
        assert!(!mw.is_interceptor());
    }

    #[test]
    fn test_unfiltered_runs_everywhere() {
        let mw = Middleware::intercept(|_ev: Event, next: Next| next.run());
        assert!(mw.applies_to(&Method::DELETE, "/anything/at/all"));
        assert!(mw.is_interceptor());
    }

    #[test]
    #[should_panic(expected = "invalid middleware route")]
    fn test_invalid_route_filter_panics() {
        let _ = Middleware::observe(|_ev: Event| async {}).on_route("/a/**/b");
    }
}
