//! Route lookup and mounting.
//!
//! # Responsibilities
//! - Store compiled routes per route kind, in insertion order
//! - Store mounted routers and their prefixes
//! - Resolve a (kind, path) pair to a route, its captures and the router
//!   that owns it
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Mounts are consulted before own routes, in registration order
//! - Each mount hop must strictly shorten the path, so self-mounts terminate
//! - Resolution is iterative; deep self-mount chains never grow the stack

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Method};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use super::{FilterChain, PathPattern, RouteError};
use crate::error::Error;
use crate::http::{ContentKind, EventSource, HandlerResult, RequestContext, WebSocket};

/// Request handler for plain HTTP routes.
///
/// Implemented for closures of the form
/// `|ctx| Box::pin(async move { ... })`.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult> {
        (self)(ctx)
    }
}

/// Pin a closure to the [`Handler`] signature so its borrow of the
/// context is inferred correctly outside of builder calls.
pub fn handler_fn<F>(f: F) -> F
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    f
}

/// Handler for routes that own a long-lived socket.
pub trait StreamHandler<S>: Send + Sync + 'static {
    fn call(&self, ctx: RequestContext, socket: S) -> BoxFuture<'static, Result<(), Error>>;
}

impl<S, F, Fut> StreamHandler<S> for F
where
    F: Fn(RequestContext, S) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn call(&self, ctx: RequestContext, socket: S) -> BoxFuture<'static, Result<(), Error>> {
        Box::pin((self)(ctx, socket))
    }
}

/// Route kinds; each has its own ordered route list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    Get,
    Post,
    Put,
    Delete,
    Options,
    WebSocket,
    EventSource,
}

impl RouteKind {
    /// Route kind for a plain HTTP method.
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(RouteKind::Get),
            Method::POST => Some(RouteKind::Post),
            Method::PUT => Some(RouteKind::Put),
            Method::DELETE => Some(RouteKind::Delete),
            Method::OPTIONS => Some(RouteKind::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKind::Get => "GET",
            RouteKind::Post => "POST",
            RouteKind::Put => "PUT",
            RouteKind::Delete => "DELETE",
            RouteKind::Options => "OPTIONS",
            RouteKind::WebSocket => "WEBSOCKET",
            RouteKind::EventSource => "EVENTSOURCE",
        }
    }
}

/// What runs when a route matches.
#[derive(Clone)]
pub enum Endpoint {
    Http(Arc<dyn Handler>),
    WebSocket(Arc<dyn StreamHandler<WebSocket>>),
    EventSource {
        headers: HeaderMap,
        handler: Arc<dyn StreamHandler<EventSource>>,
    },
}

/// A registered route.
pub struct Route {
    kind: RouteKind,
    pattern: PathPattern,
    endpoint: Endpoint,
}

impl Route {
    pub fn new(kind: RouteKind, pattern: PathPattern, endpoint: Endpoint) -> Self {
        Self {
            kind,
            pattern,
            endpoint,
        }
    }

    pub fn kind(&self) -> RouteKind {
        self.kind
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("kind", &self.kind)
            .field("pattern", &self.pattern.source())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum MountPrefix {
    /// `folder` is set when the prefix was written with a trailing `/`.
    Literal { base: String, folder: bool },
    Pattern(PathPattern),
}

impl MountPrefix {
    fn parse(source: &str) -> Result<Self, RouteError> {
        let invalid = |reason| RouteError::InvalidMount {
            prefix: source.to_string(),
            reason,
        };

        if source.is_empty() || source == "/" {
            return Err(invalid("cannot mount at the root"));
        }
        if !source.starts_with('/') {
            return Err(invalid("prefix must start with '/'"));
        }

        if source.contains(|c: char| c == ':' || c == '*') {
            let pattern = PathPattern::parse(source)?;
            if !pattern.ends_with_splat() {
                return Err(invalid("pattern prefix must end with a splat"));
            }
            if pattern.literal_prefix().map_or(true, |lit| lit.trim_matches('/').is_empty()) {
                return Err(invalid("pattern prefix needs a literal leading segment"));
            }
            return Ok(MountPrefix::Pattern(pattern));
        }

        let base = source.trim_end_matches('/');
        if base.is_empty() {
            return Err(invalid("cannot mount at the root"));
        }
        Ok(MountPrefix::Literal {
            base: base.to_string(),
            folder: source.ends_with('/'),
        })
    }

    /// Path remainder handed to the mounted router.
    fn strip(&self, path: &str) -> Option<String> {
        match self {
            MountPrefix::Literal { base, folder } => {
                let rest = path.strip_prefix(base.as_str())?;
                if rest.is_empty() {
                    (!folder).then(|| "/".to_string())
                } else if rest.starts_with('/') {
                    Some(rest.to_string())
                } else {
                    None
                }
            }
            MountPrefix::Pattern(pattern) => {
                let splat = pattern.trailing_capture(path)?;
                Some(format!("/{}", splat.trim_start_matches('/')))
            }
        }
    }
}

#[derive(Clone)]
pub(crate) enum MountTarget {
    /// The router the mount is registered on.
    Current,
    Router(Arc<Router>),
}

#[derive(Clone)]
struct Mount {
    prefix: MountPrefix,
    target: MountTarget,
}

impl Mount {
    fn enter(&self, current: &Arc<Router>, path: &str) -> Option<(Arc<Router>, String)> {
        let rest = self.prefix.strip(path)?;
        if rest.len() >= path.len() {
            return None;
        }
        let target = match &self.target {
            MountTarget::Current => Arc::clone(current),
            MountTarget::Router(router) => Arc::clone(router),
        };
        Some((target, rest))
    }
}

/// Successful resolution.
#[derive(Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    /// Captures from the route pattern.
    pub params: Map<String, Value>,
    /// Router that owns the route; its filters and defaults apply.
    pub router: Arc<Router>,
    /// Path as seen by that router.
    pub path: String,
}

/// Routes, mounts and filters of one application or mounted sub-application.
#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<RouteKind, Vec<Arc<Route>>>,
    mounts: Vec<Mount>,
    filters: FilterChain,
    content_type: ContentKind,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_route(&mut self, route: Route) {
        self.routes
            .entry(route.kind())
            .or_default()
            .push(Arc::new(route));
    }

    pub(crate) fn add_mount(&mut self, prefix: &str, target: MountTarget) -> Result<(), RouteError> {
        let prefix = MountPrefix::parse(prefix)?;
        self.mounts.push(Mount { prefix, target });
        Ok(())
    }

    pub(crate) fn filters_mut(&mut self) -> &mut FilterChain {
        &mut self.filters
    }

    pub(crate) fn set_content_type(&mut self, kind: ContentKind) {
        self.content_type = kind;
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    /// Default response content type for routes owned by this router.
    pub fn content_type(&self) -> ContentKind {
        self.content_type
    }

    /// Headers every response from this router starts with.
    pub fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(self.content_type.mime()),
        );
        headers
    }

    pub fn routes(&self, kind: RouteKind) -> &[Arc<Route>] {
        self.routes.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn mount_count(&self) -> usize {
        self.mounts.len()
    }

    /// Resolve `path` for `kind`, following mounts first.
    pub fn resolve(self: &Arc<Self>, kind: RouteKind, path: &str) -> Option<RouteMatch> {
        let mut router = Arc::clone(self);
        let mut path = path.to_string();

        loop {
            let next = router
                .mounts
                .iter()
                .find_map(|mount| mount.enter(&router, &path));
            match next {
                Some((target, rest)) => {
                    router = target;
                    path = rest;
                }
                None => break,
            }
        }

        let (route, params) = router.routes(kind).iter().find_map(|route| {
            route
                .pattern()
                .captures(&path)
                .map(|params| (Arc::clone(route), params))
        })?;

        Some(RouteMatch {
            route,
            params,
            router,
            path,
        })
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes)
            .field("mounts", &self.mounts.len())
            .field("filters", &self.filters)
            .field("content_type", &self.content_type)
            .finish()
    }
}
