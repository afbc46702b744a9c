use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode, Uri};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use weft::{App, Config, Event, HttpError, Json, Middleware, Next, Request, Response, Router, Server};

fn request(method: Method, uri: &'static str) -> Request {
    Request::new(method, Uri::from_static(uri))
}

async fn body(res: Response) -> Bytes {
    res.into_bytes().await.unwrap()
}

async fn json_body(res: Response) -> Value {
    serde_json::from_slice(&body(res).await).unwrap()
}

#[derive(Clone, Default)]
struct Visits(usize);

#[tokio::test]
async fn greets_by_name() {
    let app = App::new(Router::new().get("/greet/:name", |ev: Event| async move {
        format!("Hello {}", ev.router_param("name").unwrap_or_default())
    }));

    let res = app.fetch(request(Method::GET, "/greet/Ada")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.header("content-type"), Some("text/plain;charset=UTF-8"));
    assert_eq!(res.header("content-length"), Some("9"));
    assert_eq!(body(res).await, "Hello Ada");
}

#[tokio::test]
async fn context_does_not_leak_between_requests() {
    let app = App::new(
        Router::new()
            .middleware(Middleware::observe(|ev: Event| async move {
                ev.with_context(|visits: &mut Visits| visits.0 += 1);
            }))
            .middleware(Middleware::observe(|ev: Event| async move {
                ev.with_context(|visits: &mut Visits| visits.0 += 1);
            }))
            .get("/count", |ev: Event| async move {
                ev.context::<Visits>().map_or(0, |visits| visits.0) as u64
            }),
    );

    for _ in 0..3 {
        let res = app.fetch(request(Method::GET, "/count")).await;
        assert_eq!(body(res).await, "2");
    }
}

#[tokio::test]
async fn observer_short_circuit_skips_handler() {
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handled);

    let app = App::new(
        Router::new()
            .middleware(Middleware::observe(|ev: Event| async move {
                if ev.header("x-maintenance").is_some() {
                    ev.set_status(StatusCode::SERVICE_UNAVAILABLE);
                    return Some("down for maintenance");
                }
                None
            }))
            .get("/", move |_ev: Event| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { "up" }
            }),
    );

    let blocked = request(Method::GET, "/").with_header("x-maintenance", HeaderValue::from_static("1"));
    let res = app.fetch(blocked).await;
    assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body(res).await, "down for maintenance");
    assert_eq!(handled.load(Ordering::SeqCst), 0);

    let res = app.fetch(request(Method::GET, "/")).await;
    assert_eq!(body(res).await, "up");
    assert_eq!(handled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interceptor_decorates_and_passes_through() {
    let app = App::new(
        Router::new()
            .middleware(Middleware::intercept(|_ev: Event, next: Next| async move {
                let mut res = next.run().await?;
                res.headers_mut().insert("x-wrapped", HeaderValue::from_static("1"));
                Ok::<_, HttpError>(res)
            }))
            .middleware(Middleware::intercept(|ev: Event, _next: Next| async move {
                ev.set_response_header("x-passive", HeaderValue::from_static("1"));
            }))
            .get("/", |_ev: Event| async { Json(json!({ "ok": true })) }),
    );

    let res = app.fetch(request(Method::GET, "/")).await;
    assert_eq!(res.header("x-wrapped"), Some("1"));
    assert_eq!(res.header("x-passive"), Some("1"));
    assert_eq!(res.header("content-type"), Some("application/json;charset=UTF-8"));
    assert_eq!(json_body(res).await, json!({ "ok": true }));
}

#[tokio::test]
async fn errors_are_normalized() {
    let app = App::new(
        Router::new()
            .get("/typed", |_ev: Event| async {
                Err::<(), _>(
                    HttpError::new(StatusCode::UNPROCESSABLE_ENTITY)
                        .with_status_message("Unprocessable")
                        .with_message("internal")
                        .with_data(json!({ "field": "email" })),
                )
            })
            .get("/fault", |_ev: Event| async {
                let text = std::fs::read_to_string("/definitely/not/here")?;
                Ok::<_, HttpError>(text)
            })
            .get("/structured", |_ev: Event| async {
                Err::<(), _>(HttpError::from_value(&json!({ "statusCode": 418, "statusMessage": "Teapot" })))
            }),
    );

    let res = app.fetch(request(Method::GET, "/typed")).await;
    assert_eq!(res.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(res.status_text(), Some("Unprocessable"));
    assert_eq!(
        json_body(res).await,
        json!({ "statusCode": 422, "statusMessage": "Unprocessable", "stack": [], "data": { "field": "email" } }),
    );

    let res = app.fetch(request(Method::GET, "/fault")).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(res).await, json!({ "statusCode": 500, "stack": [] }));

    let res = app.fetch(request(Method::GET, "/structured")).await;
    assert_eq!(res.status_code(), StatusCode::IM_A_TEAPOT);
    assert_eq!(res.status_text(), Some("Teapot"));
}

#[tokio::test]
async fn method_routing_and_fallbacks() {
    let app = App::new(
        Router::new()
            .get("/items/:id", |_ev: Event| async { "get" })
            .all("/items/:id", |_ev: Event| async { "any" })
            .get("/items/special", |_ev: Event| async { "literal" })
            .get("/files/**:rest", |ev: Event| async move { ev.router_param("rest").unwrap_or_default() })
            .get("/posts/:slug?", |ev: Event| async move {
                ev.router_param("slug").unwrap_or_else(|| "index".to_owned())
            })
            .post("/guarded", |ev: Event| async move {
                ev.assert_method(&[Method::PUT], false)?;
                Ok::<_, HttpError>("unreachable")
            }),
    );

    let text = |uri: &'static str, method: Method| {
        let app = app.clone();
        async move { body(app.fetch(request(method, uri)).await).await }
    };

    assert_eq!(text("/items/1", Method::GET).await, "get");
    assert_eq!(text("/items/1", Method::DELETE).await, "any");
    assert_eq!(text("/items/special", Method::GET).await, "literal");
    assert_eq!(text("/files/a/b/c.txt", Method::GET).await, "a/b/c.txt");
    assert_eq!(text("/posts", Method::GET).await, "index");
    assert_eq!(text("/posts/hello", Method::GET).await, "hello");

    let res = app.fetch(request(Method::POST, "/guarded")).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.header("allow"), Some("PUT"));
}

#[tokio::test]
async fn body_and_query_helpers() {
    #[derive(Deserialize)]
    struct Search {
        q: String,
        limit: Option<u32>,
    }

    #[derive(Deserialize)]
    struct Note {
        text: String,
    }

    let app = App::new(
        Router::new()
            .get("/search", |ev: Event| async move {
                let search: Search = ev.query()?;
                Ok::<_, HttpError>(format!("{}:{}", search.q, search.limit.unwrap_or(10)))
            })
            .post("/notes", |ev: Event| async move {
                let note: Note = ev.read_json().await?;
                ev.set_status(StatusCode::CREATED);
                Ok::<_, HttpError>(note.text.len() as u64)
            }),
    );

    let res = app.fetch(request(Method::GET, "/search?q=rust%20http&limit=3")).await;
    assert_eq!(body(res).await, "rust http:3");

    let res = app.fetch(request(Method::GET, "/search")).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);

    let note = request(Method::POST, "/notes").with_body(r#"{"text":"hello"}"#);
    let res = app.fetch(note).await;
    assert_eq!(res.status_code(), StatusCode::CREATED);
    assert_eq!(body(res).await, "5");

    let res = app.fetch(request(Method::POST, "/notes").with_body("not json")).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn round_trip_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

    let app = App::with_config(
        Router::new().post("/echo", |ev: Event| async move { ev.read_body().await }),
        Config::new(),
    );
    let server = tokio::spawn(Server::from_listener(listener).serve_with_shutdown(app, async {
        let _ = stopped.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"POST /echo HTTP/1.1\r\nhost: test\r\ncontent-length: 5\r\nconnection: close\r\n\r\nhello")
        .await
        .unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();

    assert!(raw.starts_with("HTTP/1.1 200 OK"), "{raw}");
    assert!(raw.to_ascii_lowercase().contains("content-length: 5"));
    assert!(raw.ends_with("hello"));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /missing HTTP/1.1\r\nhost: test\r\nconnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();
    assert!(raw.starts_with("HTTP/1.1 404 Cannot find any route matching /missing."), "{raw}");

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}
