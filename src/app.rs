//! The application façade.
//!
//! An [`App`] is the frozen form of a [`Router`]. It owns the route table, the
//! global middleware and the [`Config`], and turns one [`Request`] into one
//! [`Response`]:
//!
//! ```text
//! Request ─► Event ─► on_request ─► lookup ─► chain ─► error boundary ─► on_response ─► Response
//!                                                        │
//!                                                        └─► on_error (typed errors, faults, panics)
//! ```
//!
//! Exactly one error boundary exists per request, so every request ends in a
//! response, even when a link or a lifecycle hook panics.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error};

use crate::error::HttpError;
use crate::event::{Deferred, Event};
use crate::matcher::RouteTable;
use crate::middleware::{Chain, Middleware, Terminal};
use crate::request::Request;
use crate::response::Response;
use crate::router::{Route, Router};

type RequestHook = Arc<dyn Fn(&Event) + Send + Sync + 'static>;
type ResponseHook = Arc<dyn Fn(&Event, &mut Response) + Send + Sync + 'static>;
type ErrorHook = Arc<dyn Fn(&Event, &HttpError) + Send + Sync + 'static>;

// ── Config ────────────────────────────────────────────────────────────────────

/// Application settings and lifecycle hooks.
///
/// ```rust
/// use weft::Config;
///
/// let config = Config::new()
///     .debug(cfg!(debug_assertions))
///     .on_error(|ev, err| eprintln!("{} {} failed: {err}", ev.method(), ev.path()));
/// ```
#[derive(Clone, Default)]
pub struct Config {
    debug: bool,
    on_request: Option<RequestHook>,
    on_response: Option<ResponseHook>,
    on_error: Option<ErrorHook>,
}

impl Config {
    pub fn new() -> Self { Self::default() }

    /// Lists the error message and its causes in error payloads. Never enable
    /// this in production: it exposes internals to clients.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Called with every new event, before routing.
    pub fn on_request(mut self, hook: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.on_request = Some(Arc::new(hook));
        self
    }

    /// Called with every final response, error responses included, just
    /// before it is handed to the transport.
    pub fn on_response(mut self, hook: impl Fn(&Event, &mut Response) + Send + Sync + 'static) -> Self {
        self.on_response = Some(Arc::new(hook));
        self
    }

    /// Called for every error that reaches the boundary. Unhandled faults
    /// still carry their internal message here.
    pub fn on_error(mut self, hook: impl Fn(&Event, &HttpError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn is_debug(&self) -> bool { self.debug }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("debug", &self.debug)
            .field("on_request", &self.on_request.is_some())
            .field("on_response", &self.on_response.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

// ── App ───────────────────────────────────────────────────────────────────────

/// The result of handling one request.
#[derive(Debug)]
pub struct Outcome {
    pub response: Response,
    /// Work registered through [`Event::wait_until`]. It must be driven to
    /// completion after the response is sent.
    pub deferred: Deferred,
}

/// A frozen, cheaply cloneable application.
#[derive(Clone)]
pub struct App {
    inner: Arc<Inner>,
}

struct Inner {
    routes: RouteTable<Route>,
    middleware: Vec<Arc<Middleware>>,
    config: Config,
}

impl App {
    pub fn new(router: Router) -> Self {
        Self::with_config(router, Config::default())
    }

    pub fn with_config(router: Router, config: Config) -> Self {
        let (routes, middleware) = router.into_parts();
        debug!(routes = routes.len(), middleware = middleware.len(), debug = config.debug, "app ready");
        Self { inner: Arc::new(Inner { routes, middleware, config }) }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Handles one request. Never fails: errors become error responses.
    pub async fn handle(&self, req: Request) -> Outcome {
        let config = &self.inner.config;
        let event = Event::new(req);

        let started = match &config.on_request {
            Some(hook) => guard_hook(|| hook(&event)),
            None => Ok(()),
        };

        let result = match started {
            Ok(()) => AssertUnwindSafe(self.dispatch(event.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(HttpError::from_panic(payload))),
            Err(err) => Err(err),
        };

        let mut response = match result {
            Ok(response) => response,
            Err(err) => self.render_error(&event, err),
        };

        if let Some(hook) = &config.on_response {
            if let Err(fault) = guard_hook(|| hook(&event, &mut response)) {
                response = self.render_hook_fault(&event, "on_response", fault);
            }
        }

        Outcome { response, deferred: event.take_deferred() }
    }

    /// Like [`App::handle`], with deferred work spawned onto the current
    /// tokio runtime.
    pub async fn fetch(&self, req: Request) -> Response {
        let Outcome { response, deferred } = self.handle(req).await;
        if !deferred.is_empty() {
            deferred.spawn();
        }
        response
    }

    async fn dispatch(&self, event: Event) -> Result<Response, HttpError> {
        let method = event.method().clone();
        let path = event.path().to_owned();

        let mut links: Vec<Arc<Middleware>> = self
            .inner
            .middleware
            .iter()
            .filter(|mw| mw.applies_to(&method, &path))
            .cloned()
            .collect();

        let terminal = match self.inner.routes.lookup(&method, &path) {
            Some(hit) => {
                debug!(%method, %path, route = hit.pattern.as_str(), "route matched");
                event.set_route(hit.pattern.as_str(), hit.params);
                links.extend(
                    hit.value
                        .middleware
                        .iter()
                        .filter(|mw| mw.applies_to(&method, &path))
                        .cloned(),
                );
                Terminal::Handler(Arc::clone(&hit.value.handler))
            }
            None => {
                debug!(%method, %path, "no route matched");
                Terminal::NotFound
            }
        };

        Chain::new(links, terminal).execute(event).await
    }

    fn render_error(&self, event: &Event, err: HttpError) -> Response {
        let config = &self.inner.config;

        if err.is_unhandled() {
            error!(
                method = %event.method(),
                path = event.path(),
                error = err.message_text().unwrap_or_default(),
                "unhandled error",
            );
        } else {
            debug!(method = %event.method(), path = event.path(), status = err.status().as_u16(), "request failed");
        }

        if let Some(hook) = &config.on_error {
            if let Err(fault) = guard_hook(|| hook(event, &err)) {
                return self.render_hook_fault(event, "on_error", fault);
            }
        }

        err.into_response(event.staged_response().headers, config.debug)
    }

    /// Renders a panicking hook as a fault. No hook runs again for it.
    fn render_hook_fault(&self, event: &Event, hook: &'static str, fault: HttpError) -> Response {
        error!(
            method = %event.method(),
            path = event.path(),
            hook,
            error = fault.message_text().unwrap_or_default(),
            "lifecycle hook panicked",
        );
        fault.into_response(event.staged_response().headers, self.inner.config.debug)
    }
}

/// Runs a synchronous hook, turning a panic into a fault.
fn guard_hook(hook: impl FnOnce()) -> Result<(), HttpError> {
    panic::catch_unwind(AssertUnwindSafe(hook)).map_err(HttpError::from_panic)
}

impl From<Router> for App {
    fn from(router: Router) -> Self { Self::new(router) }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("routes", &self.inner.routes.len())
            .field("middleware", &self.inner.middleware.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Next;
    use http::{HeaderValue, Method, StatusCode, Uri};
    use serde_json::Value;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn get(uri: &'static str) -> Request {
        Request::new(Method::GET, Uri::from_static(uri))
    }

    async fn json_body(res: Response) -> Value {
        serde_json::from_slice(&res.into_bytes().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_route_params_reach_handler() {
        let app = App::new(Router::new().get("/greet/:name", |ev: Event| async move {
            format!("Hello {}", ev.router_param("name").unwrap_or_default())
        }));

        let res = app.fetch(get("/greet/Ada")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.header("content-type"), Some("text/plain;charset=UTF-8"));
        assert_eq!(res.into_bytes().await.unwrap(), "Hello Ada");
    }

    #[tokio::test]
    async fn test_not_found_payload() {
        let res = App::new(Router::new()).fetch(get("/nowhere")).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(res).await,
            serde_json::json!({
                "statusCode": 404,
                "statusMessage": "Cannot find any route matching /nowhere.",
                "stack": [],
            }),
        );
    }

    #[tokio::test]
    async fn test_global_middleware_runs_without_a_route() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = App::new(Router::new().middleware(Middleware::observe(move |_ev: Event| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}
        })));

        let res = app.fetch(get("/missing")).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_filtered_middleware_skipped() {
        let app = App::new(
            Router::new()
                .middleware(
                    Middleware::observe(|_ev: Event| async { StatusCode::FORBIDDEN }).on_route("/admin/**"),
                )
                .get("/public", |_ev: Event| async { "open" })
                .get("/admin/panel", |_ev: Event| async { "secret" }),
        );

        assert_eq!(app.fetch(get("/public")).await.status_code(), StatusCode::OK);
        assert_eq!(app.fetch(get("/admin/panel")).await.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_route_middleware_runs_after_global() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (global, local) = (Arc::clone(&order), Arc::clone(&order));
        let app = App::new(
            Router::new()
                .middleware(Middleware::observe(move |_ev: Event| {
                    global.lock().unwrap().push("global");
                    async {}
                }))
                .route(
                    Some(Method::GET),
                    "/x",
                    vec![Middleware::observe(move |_ev: Event| {
                        local.lock().unwrap().push("route");
                        async {}
                    })],
                    |_ev: Event| async { "x" },
                ),
        );

        app.fetch(get("/x")).await;
        assert_eq!(*order.lock().unwrap(), vec!["global", "route"]);
    }

    #[tokio::test]
    async fn test_panic_becomes_hidden_500() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let config = Config::new().on_error(move |_ev, err| {
            *sink.lock().unwrap() = err.message_text().map(str::to_owned);
        });
        let app = App::with_config(
            Router::new().get("/boom", |_ev: Event| async {
                if true {
                    panic!("secret detail");
                }
                "unreachable"
            }),
            config,
        );

        let res = app.fetch(get("/boom")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(res).await, serde_json::json!({ "statusCode": 500, "stack": [] }));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("panic: secret detail"));
    }

    #[tokio::test]
    async fn test_debug_mode_exposes_stack() {
        let app = App::with_config(
            Router::new().get("/fail", |_ev: Event| async {
                Err::<(), _>(std::io::Error::other("disk full"))
            }),
            Config::new().debug(true),
        );

        let body = json_body(app.fetch(get("/fail")).await).await;
        assert_eq!(body["stack"], serde_json::json!(["500: disk full", "disk full"]));
    }

    #[tokio::test]
    async fn test_staged_headers_survive_errors() {
        let app = App::new(
            Router::new()
                .middleware(Middleware::observe(|ev: Event| async move {
                    ev.set_response_header("x-request-id", HeaderValue::from_static("r-1"));
                }))
                .get("/teapot", |_ev: Event| async {
                    Err::<(), _>(HttpError::new(StatusCode::IM_A_TEAPOT).with_status_message("Short"))
                }),
        );

        let res = app.fetch(get("/teapot")).await;
        assert_eq!(res.status_code(), StatusCode::IM_A_TEAPOT);
        assert_eq!(res.status_text(), Some("Short"));
        assert_eq!(res.header("x-request-id"), Some("r-1"));
    }

    #[tokio::test]
    async fn test_hooks_see_every_request() {
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);
        let config = Config::new()
            .on_request(move |_ev| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .on_response(|_ev, res| {
                res.headers_mut().insert("x-served-by", HeaderValue::from_static("weft"));
            });
        let app = App::with_config(Router::new().get("/", |_ev: Event| async { "root" }), config);

        assert_eq!(app.fetch(get("/")).await.header("x-served-by"), Some("weft"));
        assert_eq!(app.fetch(get("/404")).await.header("x-served-by"), Some("weft"));
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_response_hook_becomes_500() {
        let config = Config::new().on_response(|_ev, _res| panic!("hook bug"));
        let app = App::with_config(Router::new().get("/", |_ev: Event| async { "root" }), config);

        let res = app.fetch(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(res).await, serde_json::json!({ "statusCode": 500, "stack": [] }));
    }

    #[tokio::test]
    async fn test_panicking_request_hook_skips_routing() {
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);
        let config = Config::new().on_request(|_ev| panic!("hook bug"));
        let app = App::with_config(
            Router::new().get("/", move |_ev: Event| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { "root" }
            }),
            config,
        );

        let res = app.fetch(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_error_hook_still_responds() {
        let config = Config::new().on_error(|_ev, _err| panic!("hook bug"));
        let app = App::with_config(Router::new(), config);

        let res = app.fetch(get("/missing")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(res).await, serde_json::json!({ "statusCode": 500, "stack": [] }));
    }

    #[tokio::test]
    async fn test_interceptor_recovers_from_not_found() {
        let app = App::new(Router::new().middleware(Middleware::intercept(|_ev: Event, next: Next| async move {
            match next.run().await {
                Err(err) if err.status() == StatusCode::NOT_FOUND => Ok(Response::text("fallback")),
                other => other,
            }
        })));

        let res = app.fetch(get("/anything")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.into_bytes().await.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn test_deferred_work_is_returned() {
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);
        let app = App::new(Router::new().get("/", move |ev: Event| {
            let flag = Arc::clone(&flag);
            async move {
                ev.wait_until(async move {
                    flag.fetch_add(1, Ordering::SeqCst);
                });
                "queued"
            }
        }));

        let outcome = app.handle(get("/")).await;
        assert_eq!(outcome.deferred.len(), 1);
        assert_eq!(done.load(Ordering::SeqCst), 0);
        outcome.deferred.wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
