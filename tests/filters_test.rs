//! Before and after filters around route handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use serde_json::json;

use skein::{halt, App, Application, ContentKind, Error, Interrupt, Reply, RequestContext};

mod common;
use common::{body_text, get, send};

fn set_x(ctx: &mut RequestContext) -> Result<(), Interrupt> {
    ctx.set_local("x", 1);
    Ok(())
}

fn derive_y(ctx: &mut RequestContext) -> Result<(), Interrupt> {
    if let Some(x) = ctx.local("x").and_then(|v| v.as_i64()) {
        ctx.set_local("y", x + 1);
    }
    Ok(())
}

fn locals_app(app: App) -> Application {
    app.content_type(ContentKind::Json)
        .get("/", |ctx| {
            Box::pin(async move {
                Ok(Reply::from(json!({ "x": ctx.local("x"), "y": ctx.local("y") })))
            })
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_before_filters_run_in_registration_order() {
    let forward = locals_app(App::new().before(set_x).before(derive_y));
    let response = send(&forward, get("/")).await;
    assert_eq!(body_text(response).await, r#"{"x":1,"y":2}"#);

    let reversed = locals_app(App::new().before(derive_y).before(set_x));
    let response = send(&reversed, get("/")).await;
    assert_eq!(body_text(response).await, r#"{"x":1,"y":null}"#);
}

#[tokio::test]
async fn test_scoped_filters_see_their_own_captures() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let app = App::new()
        .content_type(ContentKind::Json)
        .before_path("/:name/*", move |ctx| {
            let name = ctx.params()?.get_str("name").unwrap_or("").to_string();
            record.lock().unwrap().push(name);
            Ok(())
        })
        .before_path("/other", |ctx| {
            ctx.set_local("other", true);
            Ok(())
        })
        .get("/users/:id", |ctx| {
            Box::pin(async move {
                let params = ctx.params()?.clone();
                Ok(Reply::from(json!({
                    "params": params.to_value(),
                    "other": ctx.local("other").is_some(),
                })))
            })
        })
        .build()
        .unwrap();

    let response = send(&app, get("/users/7")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body, json!({"params": {"id": "7"}, "other": false}));
    assert_eq!(*seen.lock().unwrap(), vec!["users".to_string()]);
}

#[tokio::test]
async fn test_after_filters_see_handler_state() {
    let app = App::new()
        .before(|ctx| {
            ctx.header("x-phase", "before")?;
            Ok(())
        })
        .after(|ctx| {
            let handled = ctx.local("handled").is_some();
            ctx.header("x-phase", if handled { "after" } else { "after-skipped" })?;
            Ok(())
        })
        .get("/", |ctx| {
            Box::pin(async move {
                ctx.set_local("handled", true);
                Ok(Reply::from("done"))
            })
        })
        .build()
        .unwrap();

    let response = send(&app, get("/")).await;
    assert_eq!(response.headers()["x-phase"], "after");
    assert_eq!(body_text(response).await, "done");
}

#[tokio::test]
async fn test_before_halt_skips_handler_but_runs_after_filters() {
    let handled = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&handled);
    let app = App::new()
        .before(|ctx| {
            if ctx.request_header("authorization").is_none() {
                return Err(halt(StatusCode::UNAUTHORIZED, "login first"));
            }
            Ok(())
        })
        .after(|ctx| {
            ctx.header("x-after", "ran")?;
            Ok(())
        })
        .get("/secret", move |_ctx| {
            let flag = Arc::clone(&flag);
            Box::pin(async move {
                *flag.lock().unwrap() = true;
                Ok(Reply::from("secret"))
            })
        })
        .build()
        .unwrap();

    let response = send(&app, get("/secret")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-after"], "ran");
    assert_eq!(body_text(response).await, "login first");
    assert!(!*handled.lock().unwrap());
}

#[tokio::test]
async fn test_after_filter_halt_replaces_reply() {
    let app = App::new()
        .after(|_ctx| Err(halt(StatusCode::SERVICE_UNAVAILABLE, "maintenance")))
        .get("/", |_ctx| Box::pin(async { Ok(Reply::from("normal")) }))
        .build()
        .unwrap();

    let response = send(&app, get("/")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_text(response).await, "maintenance");
}

#[tokio::test]
async fn test_failing_filter_renders_error() {
    let app = App::new()
        .content_type(ContentKind::Json)
        .before(|_ctx| Err(skein::RequestError::new("rejected").into()))
        .after(|ctx| {
            ctx.header("x-after", "ran")?;
            Ok(())
        })
        .get("/", |_ctx| Box::pin(async { Ok(Reply::from(json!({}))) }))
        .build()
        .unwrap();

    let response = send(&app, get("/")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get("x-after").is_none());
    assert_eq!(body_text(response).await, r#"{"error":"rejected"}"#);
}

#[tokio::test]
async fn test_filter_panic_becomes_500() {
    let app = App::new()
        .before(|ctx| {
            if ctx.request().path() == "/boom" {
                panic!("filter blew up");
            }
            Ok(())
        })
        .get("/boom", |_ctx| Box::pin(async { Ok(Reply::from("unreachable")) }))
        .build()
        .unwrap();

    let response = send(&app, get("/boom")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "filter blew up");
}

#[tokio::test]
async fn test_scoped_after_filter_only_touches_matching_paths() {
    let app = App::new()
        .after_path("/api/*", |ctx| {
            ctx.header("cache-control", "no-store")?;
            Ok(())
        })
        .get("/api/items", |_ctx| Box::pin(async { Ok(Reply::from("items")) }))
        .get("/home", |_ctx| Box::pin(async { Ok(Reply::from("home")) }))
        .build()
        .unwrap();

    let response = send(&app, get("/api/items")).await;
    assert_eq!(response.headers()["cache-control"], "no-store");

    let response = send(&app, get("/home")).await;
    assert!(response.headers().get("cache-control").is_none());
}

#[tokio::test]
async fn test_event_stream_halt_skips_after_filters() {
    let afters = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&afters);
    let app = App::new()
        .after(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .get("/stream", |ctx| {
            Box::pin(async move {
                Err(ctx.eventsource(|source| async move {
                    source.message("hello")?;
                    Ok::<_, Error>(())
                }))
            })
        })
        .get("/plain", |_ctx| Box::pin(async { Ok(Reply::from("plain")) }))
        .build()
        .unwrap();

    let response = send(&app, get("/stream")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    drop(response);
    assert_eq!(afters.load(Ordering::SeqCst), 0);

    let response = send(&app, get("/plain")).await;
    assert_eq!(body_text(response).await, "plain");
    assert_eq!(afters.load(Ordering::SeqCst), 1);
}
