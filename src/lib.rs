//! # weft
//!
//! A minimal HTTP framework built around one idea: every request is an
//! [`Event`] that travels through a chain of links (global middleware, route
//! middleware, then a handler) and comes out as exactly one response.
//!
//! ## The contract
//!
//! weft routes, runs chains, turns return values into responses and turns
//! failures into JSON error payloads. TLS, rate limiting, body-size limits and
//! slow-client protection are the reverse proxy's job; weft ignores them.
//!
//! - Segment-trie routing with parameters, optional parameters and wildcards
//! - Observer and interceptor middleware with per-method and per-route filters
//! - Return anything that implements [`IntoReply`]: text, bytes, streams,
//!   `serde` values, responses, errors
//! - One error boundary per request: typed errors reach the client, faults
//!   and panics become a generic 500
//! - Graceful shutdown on SIGTERM / Ctrl-C, with deferred work drained
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use serde::{Deserialize, Serialize};
//! use weft::{App, Event, HttpError, Json, Router, Server, middleware};
//!
//! #[derive(Deserialize, Serialize)]
//! struct User { id: u64, name: String }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), weft::Error> {
//!     let app = App::new(
//!         Router::new()
//!             .middleware(middleware::trace())
//!             .get("/users/:id", get_user)
//!             .post("/users", create_user),
//!     );
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//!
//! async fn get_user(ev: Event) -> Result<Json<User>, HttpError> {
//!     let id = ev
//!         .router_param("id")
//!         .and_then(|id| id.parse().ok())
//!         .ok_or_else(|| HttpError::new(StatusCode::BAD_REQUEST).with_status_message("Invalid id"))?;
//!     Ok(Json(User { id, name: "alice".into() }))
//! }
//!
//! async fn create_user(ev: Event) -> Result<Json<User>, HttpError> {
//!     let user: User = ev.read_json().await?;
//!     ev.set_status(StatusCode::CREATED);
//!     Ok(Json(user))
//! }
//! ```

mod app;
mod body;
mod error;
mod event;
mod handler;
mod matcher;
mod reply;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

pub use app::{App, Config, Outcome};
pub use body::{Body, BodyStream};
pub use error::{BoxError, Error, HttpError};
pub use event::{Deferred, Event, StagedResponse};
pub use handler::{BoxFuture, Handler};
pub use matcher::{Params, PathPattern, PatternError, WILDCARD_PARAM};
pub use middleware::{Middleware, Next};
pub use reply::{IntoReply, Json, Reply, coerce};
pub use request::Request;
pub use response::{ContentType, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
