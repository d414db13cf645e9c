//! Request classification and route dispatch.
//!
//! # Data Flow
//! ```text
//! hyper request
//!     → WebSocket upgrade?   → websocket route → 101 + socket task
//!     → resolve GET/SSE/verb → buffer body → responder
//!     → no route (GET/HEAD)  → static files
//!     → otherwise            → 404
//! ```
//!
//! # Design Decisions
//! - `HEAD` resolves against `GET` routes; hyper drops the body on the wire
//! - `GET` requests accepting `text/event-stream` prefer event-source routes
//! - WebSocket handlers see route captures and the query string only;
//!   before filters do not run for them

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequestParts, WebSocketUpgrade};
use axum::http::{header::ACCEPT, request::Parts, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::FutureExt;
use tracing::Instrument;

use super::context::RequestContext;
use super::request::{is_websocket_upgrade, Request, X_REQUEST_ID};
use super::responder::{self, panic_message};
use super::websocket::WebSocket;
use crate::app::AppState;
use crate::error::{Error, RequestError};
use crate::observability::logging;
use crate::routing::{Endpoint, RouteKind, RouteMatch, Router, StreamHandler};

/// Entry point from the connection layer into the application.
#[derive(Clone)]
pub struct Dispatcher {
    router: Arc<Router>,
    state: Arc<AppState>,
}

fn accepts_event_stream(parts: &Parts) -> bool {
    parts
        .headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("text/event-stream"))
}

impl Dispatcher {
    pub(crate) fn new(router: Arc<Router>, state: Arc<AppState>) -> Self {
        Self { router, state }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Handle one request from `peer`.
    pub async fn dispatch(&self, request: axum::http::Request<Body>, peer: SocketAddr) -> Response {
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-")
            .to_string();
        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %request.method(),
            path = %request.uri().path(),
        );
        self.dispatch_inner(request, peer).instrument(span).await
    }

    async fn dispatch_inner(&self, request: axum::http::Request<Body>, peer: SocketAddr) -> Response {
        let (parts, body) = request.into_parts();

        if is_websocket_upgrade(&parts.headers) {
            return self.route_websocket(parts, peer).await;
        }

        let path = parts.uri.path().to_string();
        let readable = parts.method == Method::GET || parts.method == Method::HEAD;
        let found = if !readable {
            RouteKind::from_method(&parts.method).and_then(|kind| self.router.resolve(kind, &path))
        } else if accepts_event_stream(&parts) {
            self.router
                .resolve(RouteKind::EventSource, &path)
                .or_else(|| self.router.resolve(RouteKind::Get, &path))
        } else {
            self.router
                .resolve(RouteKind::Get, &path)
                .or_else(|| self.router.resolve(RouteKind::EventSource, &path))
        };

        let body = match axum::body::to_bytes(body, self.state.max_body_bytes).await {
            Ok(body) => body,
            Err(err) => {
                let request = Request::from_parts(&parts, Bytes::new(), peer);
                let mut ctx = self.context(request, None);
                let err = RequestError::new(format!("request body rejected: {err}"))
                    .with_status(StatusCode::PAYLOAD_TOO_LARGE);
                return responder::error_response(&mut ctx, err.into());
            }
        };
        let request = Request::from_parts(&parts, body, peer);

        let Some(found) = found else {
            return self.fallback(request).await;
        };

        let ctx = self.context(request, Some(&found));
        match found.route.endpoint().clone() {
            Endpoint::Http(handler) => responder::respond_http(&found, &handler, ctx).await,
            Endpoint::EventSource { headers, handler } => {
                responder::respond_event_source(&found, &headers, &handler, ctx)
            }
            Endpoint::WebSocket(_) => self.not_found(ctx),
        }
    }

    fn context(&self, request: Request, found: Option<&RouteMatch>) -> RequestContext {
        match found {
            Some(found) => RequestContext::new(
                request,
                found.params.clone(),
                found.router.default_headers(),
                Arc::clone(&self.state),
            ),
            None => RequestContext::new(
                request,
                Default::default(),
                self.router.default_headers(),
                Arc::clone(&self.state),
            ),
        }
    }

    fn not_found(&self, mut ctx: RequestContext) -> Response {
        responder::error_response(&mut ctx, Error::NotFound)
    }

    /// Static files for unrouted `GET`/`HEAD`, 404 for the rest.
    async fn fallback(&self, request: Request) -> Response {
        let method = request.method().clone();
        let readable = method == Method::GET || method == Method::HEAD;
        let Some(statics) = self.state.statics.as_ref().filter(|_| readable) else {
            return self.not_found(self.context(request, None));
        };
        let Some(file) = statics.resolve(request.path()).await else {
            return self.not_found(self.context(request, None));
        };

        match statics.serve(&file, &method, request.headers()).await {
            Ok((response, size)) => {
                logging::log_response(
                    request.peer_addr(),
                    request.method(),
                    request.uri(),
                    request.version(),
                    response.status(),
                    size,
                );
                response
            }
            Err(err) => {
                let mut ctx = self.context(request, None);
                responder::error_response(&mut ctx, err)
            }
        }
    }

    async fn route_websocket(&self, mut parts: Parts, peer: SocketAddr) -> Response {
        let path = parts.uri.path().to_string();
        let found = self.router.resolve(RouteKind::WebSocket, &path);
        let handler = match found.as_ref().map(|found| found.route.endpoint()) {
            Some(Endpoint::WebSocket(handler)) => Arc::clone(handler),
            _ => {
                let request = Request::from_parts(&parts, Bytes::new(), peer);
                return self.not_found(self.context(request, None));
            }
        };

        let upgrade =
            match <WebSocketUpgrade as FromRequestParts<()>>::from_request_parts(&mut parts, &()).await {
                Ok(upgrade) => upgrade,
                Err(rejection) => {
                    let response = rejection.into_response();
                    logging::log_response(
                        peer,
                        &parts.method,
                        &parts.uri,
                        parts.version,
                        response.status(),
                        None,
                    );
                    return response;
                }
            };

        let request = Request::from_parts(&parts, Bytes::new(), peer);
        let ctx = self.context(request, found.as_ref());
        let on_pong = self.state.on_pong.clone();
        let report = self.state.report_errors;

        let response = upgrade.on_upgrade(move |raw| async move {
            let socket = WebSocket::attach(raw, peer, on_pong);
            let task = StreamHandler::call(handler.as_ref(), ctx, socket.clone());
            let failure = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(panic) => Some(Error::Internal(panic_message(panic))),
            };
            if let Some(err) = failure {
                if report || !err.is_expected() {
                    tracing::warn!(socket_id = %socket.id(), error = %err, "websocket handler failed");
                } else {
                    tracing::debug!(socket_id = %socket.id(), error = %err, "websocket handler failed");
                }
                socket.close();
            }
        });

        logging::log_response(
            peer,
            &parts.method,
            &parts.uri,
            parts.version,
            response.status(),
            None,
        );
        response
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
