//! Route and middleware registration.
//!
//! A [`Router`] only exists during setup. Once it is turned into an
//! [`App`](crate::App) the route table and middleware list are frozen: nothing
//! can be added while requests are being served.

use std::sync::Arc;

use http::Method;

use crate::handler::{BoxedHandler, Handler};
use crate::matcher::{PathPattern, RouteTable};
use crate::middleware::Middleware;

/// A registered route: its own middleware plus the handler.
pub(crate) struct Route {
    pub(crate) middleware: Vec<Arc<Middleware>>,
    pub(crate) handler: BoxedHandler,
}

/// The application builder.
///
/// Each registration consumes and returns `self`, so calls chain naturally:
///
/// ```rust
/// # use weft::{Event, Middleware, Router};
/// # async fn get_user(_: Event) -> &'static str { "" }
/// # async fn create_user(_: Event) -> &'static str { "" }
/// # async fn fallback(_: Event) -> &'static str { "" }
/// let router = Router::new()
///     .middleware(weft::middleware::trace())
///     .get("/users/:id", get_user)
///     .post("/users", create_user)
///     .all("/legacy/**", fallback);
/// ```
///
/// Patterns are `/`-separated segments: literals, `:name` parameters,
/// `:name?` optional parameters, `*` for an unnamed parameter and `**` or
/// `**:name` for the rest of the path.
pub struct Router {
    routes: RouteTable<Route>,
    middleware: Vec<Arc<Middleware>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: RouteTable::new(), middleware: Vec::new() }
    }

    /// Registers `handler` for `pattern`, behind route-specific `middleware`.
    /// `method: None` accepts every method.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is not a valid route pattern.
    pub fn route(
        mut self,
        method: Option<Method>,
        pattern: &str,
        middleware: Vec<Middleware>,
        handler: impl Handler,
    ) -> Self {
        let parsed = PathPattern::parse(pattern)
            .unwrap_or_else(|e| panic!("invalid route `{pattern}`: {e}"));
        let route = Route {
            middleware: middleware.into_iter().map(Arc::new).collect(),
            handler: handler.into_boxed_handler(),
        };
        self.routes.insert(method, parsed, route);
        self
    }

    /// Registers `handler` for one method and pattern.
    pub fn on(self, method: Method, pattern: &str, handler: impl Handler) -> Self {
        self.route(Some(method), pattern, Vec::new(), handler)
    }

    pub fn get(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, pattern, handler)
    }

    pub fn put(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, pattern, handler)
    }

    pub fn patch(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::PATCH, pattern, handler)
    }

    pub fn delete(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, pattern, handler)
    }

    pub fn head(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::HEAD, pattern, handler)
    }

    pub fn options(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::OPTIONS, pattern, handler)
    }

    /// Registers `handler` for every method. Routes registered for a specific
    /// method win over this one.
    pub fn all(self, pattern: &str, handler: impl Handler) -> Self {
        self.route(None, pattern, Vec::new(), handler)
    }

    /// Appends global middleware. It runs, in registration order, for every
    /// request its filter accepts, matched or not.
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub(crate) fn into_parts(self) -> (RouteTable<Route>, Vec<Arc<Middleware>>) {
        (self.routes, self.middleware)
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    async fn noop(_ev: Event) {}

    #[test]
    fn test_registration_chains() {
        let (routes, middleware) = Router::new()
            .middleware(Middleware::observe(noop))
            .get("/a", noop)
            .all("/b/**", noop)
            .route(Some(Method::PUT), "/c/:id", vec![Middleware::observe(noop)], noop)
            .into_parts();

        assert_eq!(routes.len(), 3);
        assert_eq!(middleware.len(), 1);

        let hit = routes.lookup(&Method::PUT, "/c/7").unwrap();
        assert_eq!(hit.value.middleware.len(), 1);
        assert_eq!(hit.params.get("id"), Some("7"));
        assert!(routes.lookup(&Method::DELETE, "/b/x/y").is_some());
        assert!(routes.lookup(&Method::POST, "/a").is_none());
    }

    #[test]
    #[should_panic(expected = "invalid route `/files/**/raw`")]
    fn test_invalid_pattern_panics() {
        let _ = Router::new().get("/files/**/raw", noop);
    }
}
