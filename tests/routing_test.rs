//! Route resolution and mounting through the dispatcher.

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

use skein::{App, Application, ContentKind, PathPattern, Reply};

mod common;
use common::{body_text, get, request, send};

fn echo_app() -> App {
    App::new()
        .content_type(ContentKind::Json)
        .get("/:a/things/:b", |ctx| {
            Box::pin(async move { Ok(Reply::Json(Value::Object(ctx.route_params().clone()))) })
        })
}

async fn json_body(app: &Application, uri: &str) -> Value {
    let response = send(app, get(uri)).await;
    assert_eq!(response.status(), StatusCode::OK, "GET {uri}");
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn test_captures_are_extracted_and_decoded() {
    let app = echo_app().build().unwrap();
    assert_eq!(json_body(&app, "/x/things/y").await, json!({"a": "x", "b": "y"}));
    assert_eq!(
        json_body(&app, "/x%20y/things/z?a=ignored").await,
        json!({"a": "x y", "b": "z"})
    );
}

#[tokio::test]
async fn test_first_registered_route_wins() {
    let app = App::new()
        .get("/users/:id", |_ctx| Box::pin(async { Ok(Reply::from("by id")) }))
        .get("/users/me", |_ctx| Box::pin(async { Ok(Reply::from("me")) }))
        .get("/admin", |_ctx| Box::pin(async { Ok(Reply::from("admin")) }))
        .get("/*", |_ctx| Box::pin(async { Ok(Reply::from("catch-all")) }))
        .get("/admin/unreachable", |_ctx| Box::pin(async { Ok(Reply::from("never")) }))
        .build()
        .unwrap();

    assert_eq!(body_text(send(&app, get("/users/me")).await).await, "by id");
    assert_eq!(body_text(send(&app, get("/admin")).await).await, "admin");
    assert_eq!(
        body_text(send(&app, get("/admin/unreachable")).await).await,
        "catch-all"
    );
}

#[tokio::test]
async fn test_splats_and_regex_patterns() {
    let app = App::new()
        .content_type(ContentKind::Json)
        .get("/files/*", |ctx| {
            Box::pin(async move { Ok(Reply::Json(Value::Object(ctx.route_params().clone()))) })
        })
        .get("/say/*/to/*", |ctx| {
            Box::pin(async move { Ok(Reply::Json(Value::Object(ctx.route_params().clone()))) })
        })
        .get(PathPattern::regex(r"/posts/(?P<year>\d{4})/(?P<slug>[a-z-]+)"), |ctx| {
            Box::pin(async move { Ok(Reply::Json(Value::Object(ctx.route_params().clone()))) })
        })
        .build()
        .unwrap();

    assert_eq!(json_body(&app, "/files/a/b.txt").await, json!({"splat": "a/b.txt"}));
    assert_eq!(
        json_body(&app, "/say/hello/to/world").await,
        json!({"splat": ["hello", "world"]})
    );
    assert_eq!(
        json_body(&app, "/posts/2024/hello-world").await,
        json!({"year": "2024", "slug": "hello-world"})
    );
    let response = send(&app, get("/posts/24/hello")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unmatched_paths_and_verbs_are_not_found() {
    let app = App::new()
        .post("/only-post", |_ctx| Box::pin(async { Ok(Reply::from("posted")) }))
        .build()
        .unwrap();

    let response = send(&app, get("/nope")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(response).await, "Not Found");

    let response = send(&app, get("/only-post")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, request(Method::PATCH, "/only-post")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, request(Method::POST, "/only-post")).await;
    assert_eq!(body_text(response).await, "posted");
}

#[tokio::test]
async fn test_not_found_on_json_app_is_wrapped() {
    let app = App::new().content_type(ContentKind::Json).build().unwrap();
    let response = send(&app, get("/missing")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(response).await, r#"{"error":"Not Found"}"#);
}

fn sub_app(name: &'static str) -> App {
    App::new()
        .get("/", move |_ctx| Box::pin(async move { Ok(Reply::from(format!("{name} root"))) }))
        .get("/route1", move |_ctx| {
            Box::pin(async move { Ok(Reply::from(format!("{name} route1"))) })
        })
}

#[tokio::test]
async fn test_literal_mounts_respect_segment_boundaries() {
    let app = App::new()
        .map("/sub1", sub_app("sub1"))
        .map("/sub1extra", sub_app("extra"))
        .get("/sub1route3", |_ctx| Box::pin(async { Ok(Reply::from("outer")) }))
        .build()
        .unwrap();

    assert_eq!(body_text(send(&app, get("/sub1")).await).await, "sub1 root");
    assert_eq!(body_text(send(&app, get("/sub1/route1")).await).await, "sub1 route1");
    assert_eq!(body_text(send(&app, get("/sub1extra/route1")).await).await, "extra route1");
    assert_eq!(body_text(send(&app, get("/sub1route3")).await).await, "outer");
    assert_eq!(
        send(&app, get("/sub1/missing")).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_folder_and_pattern_mounts() {
    let app = App::new()
        .map("/folder1/", sub_app("folder"))
        .map("/testing/*", sub_app("pattern"))
        .build()
        .unwrap();

    assert_eq!(body_text(send(&app, get("/folder1/")).await).await, "folder root");
    assert_eq!(send(&app, get("/folder1")).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_text(send(&app, get("/testing/route1")).await).await,
        "pattern route1"
    );
}

#[tokio::test]
async fn test_self_mount_terminates() {
    let app = App::new()
        .get("/messy", |ctx| {
            Box::pin(async move { Ok(Reply::from(ctx.request().path().to_string())) })
        })
        .map_self("/very")
        .build()
        .unwrap();

    assert_eq!(
        body_text(send(&app, get("/very/very/very/messy")).await).await,
        "/very/very/very/messy"
    );
    assert_eq!(send(&app, get("/very/very")).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mounted_router_keeps_its_own_content_type() {
    let api = App::new()
        .content_type(ContentKind::Json)
        .get("/status", |_ctx| Box::pin(async { Ok(Reply::from(json!({"ok": true}))) }));
    let app = App::new()
        .get("/", |_ctx| Box::pin(async { Ok(Reply::from("<p>home</p>")) }))
        .map("/api", api)
        .build()
        .unwrap();

    let response = send(&app, get("/api/status")).await;
    assert_eq!(response.headers()["content-type"], "application/json");
    assert_eq!(body_text(response).await, r#"{"ok":true}"#);

    let response = send(&app, get("/")).await;
    assert_eq!(response.headers()["content-type"], "text/html");
}

#[tokio::test]
async fn test_head_uses_get_routes() {
    let app = App::new()
        .get("/page", |_ctx| Box::pin(async { Ok(Reply::from("body")) }))
        .build()
        .unwrap();
    let response = send(&app, request(Method::HEAD, "/page")).await;
    assert_eq!(response.status(), StatusCode::OK);
}
