//! Minimal weft example: JSON endpoints, middleware and a typed 404.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/greet/Ada
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -H 'authorization: Bearer x' http://localhost:3000/admin/stats
//!   curl http://localhost:3000/nowhere

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use http::{HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use weft::{App, Config, Event, HttpError, Json, Middleware, Next, Router, Server, middleware};

#[derive(Serialize)]
struct User {
    id: u64,
    name: String,
}

#[derive(Deserialize)]
struct NewUser {
    name: String,
}

#[derive(Clone)]
struct RequestId(u64);

#[tokio::main]
async fn main() -> Result<(), weft::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let ids = Arc::new(AtomicU64::new(1));

    let router = Router::new()
        .middleware(middleware::trace())
        .middleware(Middleware::intercept(move |ev: Event, next: Next| {
            let id = ids.fetch_add(1, Ordering::Relaxed);
            async move {
                ev.insert_context(RequestId(id));
                ev.set_response_header("x-request-id", HeaderValue::from(id));
                next.run().await
            }
        }))
        .middleware(Middleware::observe(require_auth).on_route("/admin/**"))
        .get("/greet/:name", greet)
        .get("/users/:id", get_user)
        .post("/users", create_user)
        .get("/admin/stats", stats);

    let app = App::with_config(router, Config::new().debug(cfg!(debug_assertions)));

    Server::bind("0.0.0.0:3000")?.serve(app).await
}

// GET /greet/:name → text/plain
async fn greet(ev: Event) -> String {
    format!("Hello {}", ev.router_param_decoded("name").unwrap_or_default())
}

// GET /users/:id → application/json, or 400 for a non-numeric id
async fn get_user(ev: Event) -> Result<Json<User>, HttpError> {
    let id = ev
        .router_param("id")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| {
            HttpError::new(StatusCode::BAD_REQUEST)
                .with_status_message("Invalid user id")
                .with_data(serde_json::json!({ "param": "id" }))
        })?;
    Ok(Json(User { id, name: "alice".into() }))
}

// POST /users → 201 with the created user
async fn create_user(ev: Event) -> Result<Json<User>, HttpError> {
    let input = ev
        .read_validated_json(|user: NewUser| {
            if user.name.trim().is_empty() { Err("name must not be empty") } else { Ok(user) }
        })
        .await?;

    ev.set_status(StatusCode::CREATED);
    ev.set_response_header("location", HeaderValue::from_static("/users/99"));
    Ok(Json(User { id: 99, name: input.name }))
}

// Observer: returning nothing lets the chain continue.
async fn require_auth(ev: Event) -> Result<(), HttpError> {
    if ev.header("authorization").is_none() {
        return Err(HttpError::new(StatusCode::UNAUTHORIZED).with_status_message("Unauthorized"));
    }
    Ok(())
}

async fn stats(ev: Event) -> serde_json::Value {
    let request_id = ev.context::<RequestId>().map(|RequestId(id)| id);
    serde_json::json!({ "uptime": "ok", "requestId": request_id })
}
