//! Application builder.
//!
//! Routes, filters, mounts and settings are registered on an [`App`] at
//! startup. [`App::build`] validates everything and freezes it into an
//! [`Application`]: an immutable route table plus the shared runtime state
//! (socket stashes, tasks, collaborators) that requests reach through
//! their context.
//!
//! ```no_run
//! use skein::{App, ContentKind, Reply};
//!
//! let app = App::new()
//!     .content_type(ContentKind::Json)
//!     .get("/hello/:name", |ctx| Box::pin(async move {
//!         let name = ctx.params()?.get_str("name").unwrap_or("you").to_string();
//!         Ok(Reply::from(serde_json::json!({ "hello": name })))
//!     }))
//!     .build()
//!     .expect("valid routes");
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::config::{ListenerConfig, ServerConfig};
use crate::error::Result;
use crate::http::{
    ContentKind, Dispatcher, EventSource, HandlerResult, Interrupt, PongCallback, RequestContext,
    StaticFiles, WebSocket,
};
use crate::routing::filter::FilterFn;
use crate::routing::router::MountTarget;
use crate::routing::{
    Endpoint, FilterScope, IntoPattern, PathPattern, Route, RouteError, RouteKind, Router,
};
use crate::stash::{SseStash, WebSocketStash};
use crate::tasks::TaskRegistry;
use crate::templates::{Renderer, ViewsRenderer};

/// Runtime state shared by every request of one application.
pub struct AppState {
    pub(crate) websockets: WebSocketStash,
    pub(crate) sses: SseStash,
    pub(crate) tasks: TaskRegistry,
    pub(crate) renderer: Option<Arc<dyn Renderer>>,
    pub(crate) statics: Option<StaticFiles>,
    pub(crate) root: PathBuf,
    pub(crate) report_errors: bool,
    pub(crate) on_pong: Option<PongCallback>,
    pub(crate) max_body_bytes: usize,
}

impl AppState {
    pub fn websockets(&self) -> &WebSocketStash {
        &self.websockets
    }

    pub fn sses(&self) -> &SseStash {
        &self.sses
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn renderer(&self) -> Option<&dyn Renderer> {
        self.renderer.as_deref()
    }

    /// Base directory for relative file paths.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn report_errors(&self) -> bool {
        self.report_errors
    }
}

/// Route and settings builder.
pub struct App {
    router: Router,
    tasks: TaskRegistry,
    renderer: Option<Arc<dyn Renderer>>,
    statics: Option<StaticFiles>,
    root: PathBuf,
    report_errors: bool,
    on_pong: Option<PongCallback>,
    max_body_bytes: usize,
    error: Option<RouteError>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// Empty application: no static files, no views.
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            tasks: TaskRegistry::new(),
            renderer: None,
            statics: None,
            root: PathBuf::from("."),
            report_errors: false,
            on_pong: None,
            max_body_bytes: ListenerConfig::default().max_body_bytes,
            error: None,
        }
    }

    /// Application wired to the configured root, public and views
    /// directories.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut app = Self::new()
            .root(&config.app.root)
            .public_dir(config.app.public_path())
            .views_dir(config.app.views_path());
        app.report_errors = config.app.report_errors;
        app.max_body_bytes = config.listener.max_body_bytes;
        app
    }

    fn fail(&mut self, err: RouteError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn route<P: IntoPattern>(mut self, kind: RouteKind, path: P, endpoint: Endpoint) -> Self {
        match path.into_pattern() {
            Ok(pattern) => self.router.add_route(Route::new(kind, pattern, endpoint)),
            Err(err) => self.fail(err),
        }
        self
    }

    fn http<P, F>(self, kind: RouteKind, path: P, handler: F) -> Self
    where
        P: IntoPattern,
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.route(kind, path, Endpoint::Http(Arc::new(handler)))
    }

    pub fn get<P, F>(self, path: P, handler: F) -> Self
    where
        P: IntoPattern,
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.http(RouteKind::Get, path, handler)
    }

    pub fn post<P, F>(self, path: P, handler: F) -> Self
    where
        P: IntoPattern,
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.http(RouteKind::Post, path, handler)
    }

    pub fn put<P, F>(self, path: P, handler: F) -> Self
    where
        P: IntoPattern,
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.http(RouteKind::Put, path, handler)
    }

    pub fn delete<P, F>(self, path: P, handler: F) -> Self
    where
        P: IntoPattern,
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.http(RouteKind::Delete, path, handler)
    }

    pub fn options<P, F>(self, path: P, handler: F) -> Self
    where
        P: IntoPattern,
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.http(RouteKind::Options, path, handler)
    }

    /// WebSocket route. The handler owns the socket for as long as it runs;
    /// stash it to keep it reachable afterwards.
    pub fn websocket<P, F, Fut>(self, path: P, handler: F) -> Self
    where
        P: IntoPattern,
        F: Fn(RequestContext, WebSocket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.route(RouteKind::WebSocket, path, Endpoint::WebSocket(Arc::new(handler)))
    }

    /// Event-source route, sent with `headers` in addition to the defaults.
    pub fn eventsource<P, F, Fut>(mut self, path: P, headers: &[(&str, &str)], handler: F) -> Self
    where
        P: IntoPattern,
        F: Fn(RequestContext, EventSource) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let pattern = match path.into_pattern() {
            Ok(pattern) => pattern,
            Err(err) => {
                self.fail(err);
                return self;
            }
        };

        let mut extra = HeaderMap::new();
        for (name, value) in headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .ok()
                .zip(HeaderValue::from_str(value).ok());
            match header {
                Some((name, value)) => {
                    extra.insert(name, value);
                }
                None => {
                    self.fail(RouteError::InvalidHeader {
                        pattern: pattern.source().to_string(),
                        name: name.to_string(),
                    });
                    return self;
                }
            }
        }

        let endpoint = Endpoint::EventSource {
            headers: extra,
            handler: Arc::new(handler),
        };
        self.route(RouteKind::EventSource, pattern, endpoint)
    }

    fn filter<F>(mut self, scope: FilterScope, pattern: Option<PathPattern>, body: F) -> Self
    where
        F: Fn(&mut RequestContext) -> std::result::Result<(), Interrupt> + Send + Sync + 'static,
    {
        let body: FilterFn = Arc::new(body);
        self.router.filters_mut().add(scope, pattern, body);
        self
    }

    fn scoped_filter<P, F>(mut self, scope: FilterScope, path: P, body: F) -> Self
    where
        P: IntoPattern,
        F: Fn(&mut RequestContext) -> std::result::Result<(), Interrupt> + Send + Sync + 'static,
    {
        match path.into_pattern() {
            Ok(pattern) => self.filter(scope, Some(pattern), body),
            Err(err) => {
                self.fail(err);
                self
            }
        }
    }

    /// Filter run before every handler.
    pub fn before<F>(self, body: F) -> Self
    where
        F: Fn(&mut RequestContext) -> std::result::Result<(), Interrupt> + Send + Sync + 'static,
    {
        self.filter(FilterScope::Before, None, body)
    }

    /// Filter run after every handler.
    pub fn after<F>(self, body: F) -> Self
    where
        F: Fn(&mut RequestContext) -> std::result::Result<(), Interrupt> + Send + Sync + 'static,
    {
        self.filter(FilterScope::After, None, body)
    }

    /// Filter run before handlers whose path matches `path`. The pattern's
    /// captures are visible as params while the filter runs.
    pub fn before_path<P, F>(self, path: P, body: F) -> Self
    where
        P: IntoPattern,
        F: Fn(&mut RequestContext) -> std::result::Result<(), Interrupt> + Send + Sync + 'static,
    {
        self.scoped_filter(FilterScope::Before, path, body)
    }

    pub fn after_path<P, F>(self, path: P, body: F) -> Self
    where
        P: IntoPattern,
        F: Fn(&mut RequestContext) -> std::result::Result<(), Interrupt> + Send + Sync + 'static,
    {
        self.scoped_filter(FilterScope::After, path, body)
    }

    /// Default response content type for this application's routes.
    pub fn content_type(mut self, kind: ContentKind) -> Self {
        self.router.set_content_type(kind);
        self
    }

    /// Mount the routes and filters of `sub` under `prefix`.
    ///
    /// Only the routing half of `sub` is used; runtime settings and tasks
    /// come from the outer application.
    pub fn map(mut self, prefix: &str, sub: App) -> Self {
        if let Some(err) = sub.error {
            self.fail(err);
            return self;
        }
        let target = MountTarget::Router(Arc::new(sub.router));
        if let Err(err) = self.router.add_mount(prefix, target) {
            self.fail(err);
        }
        self
    }

    /// Mount this application under `prefix` of itself.
    pub fn map_self(mut self, prefix: &str) -> Self {
        if let Err(err) = self.router.add_mount(prefix, MountTarget::Current) {
            self.fail(err);
        }
        self
    }

    /// Register a named background task.
    pub fn task<F, Fut>(mut self, name: &str, task: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if let Err(err) = self.tasks.register(name, task) {
            self.fail(err);
        }
        self
    }

    /// Log every request failure with full detail.
    pub fn report_errors(mut self) -> Self {
        self.report_errors = true;
        self
    }

    /// Called with the socket whenever a WebSocket pong arrives.
    pub fn on_pong(mut self, callback: impl Fn(&WebSocket) + Send + Sync + 'static) -> Self {
        self.on_pong = Some(Arc::new(callback));
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Render views from `dir`.
    pub fn views_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.renderer(Arc::new(ViewsRenderer::new(dir)))
    }

    /// Serve unrouted `GET`/`HEAD` requests from `dir`.
    pub fn public_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.statics = Some(StaticFiles::new(dir));
        self
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Validate and freeze.
    pub fn build(self) -> std::result::Result<Application, RouteError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let router = Arc::new(self.router);
        let state = Arc::new(AppState {
            websockets: WebSocketStash::new(),
            sses: SseStash::new(),
            tasks: self.tasks,
            renderer: self.renderer,
            statics: self.statics,
            root: self.root,
            report_errors: self.report_errors,
            on_pong: self.on_pong,
            max_body_bytes: self.max_body_bytes,
        });

        tracing::debug!(
            mounts = router.mount_count(),
            report_errors = state.report_errors,
            "application built"
        );

        Ok(Application {
            dispatcher: Dispatcher::new(router, Arc::clone(&state)),
            state,
        })
    }
}

/// A built application, ready to dispatch requests or be served.
#[derive(Clone)]
pub struct Application {
    dispatcher: Dispatcher,
    state: Arc<AppState>,
}

impl Application {
    /// Handle one request in-process.
    pub async fn dispatch(&self, request: axum::http::Request<Body>, peer: SocketAddr) -> Response {
        self.dispatcher.dispatch(request, peer).await
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn router(&self) -> &Arc<Router> {
        self.dispatcher.router()
    }

    pub fn websockets(&self) -> &WebSocketStash {
        &self.state.websockets
    }

    pub fn sses(&self) -> &SseStash {
        &self.state.sses
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("router", self.router())
            .finish_non_exhaustive()
    }
}
