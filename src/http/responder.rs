//! Request lifecycle.
//!
//! # Data Flow
//! ```text
//! Init → RunningBefore → RunningHandler → RunningAfter → Responding → Done
//!             │                │               │             │
//!             └── halt ────────┼──▶ (after) ───┘             │
//!             └── failure ─────┴───────────────┴─────────────┴──▶ Error
//! ```
//!
//! # Design Decisions
//! - A halt skips the rest of the handler but still runs after filters
//! - Event-stream replies skip after filters; the response is still open
//! - Failures skip after filters and render from the error taxonomy
//! - Panics in filters or handlers are caught here and become 500s
//! - Exactly one access log event per request, whichever path it takes

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{
    header::{CONNECTION, LOCATION},
    HeaderMap, HeaderValue, StatusCode, Version,
};
use axum::response::Response;
use futures_util::FutureExt;
use serde_json::{json, Value};

use super::context::{ContentKind, Phase, RequestContext};
use super::reply::{Halt, Interrupt, Reply};
use super::sse::EventSource;
use crate::error::Error;
use crate::observability::logging;
use crate::routing::{FilterScope, Handler, RouteMatch, StreamHandler};

/// What the filter/handler pipeline settled on.
enum Answer {
    Reply(Reply),
    Halted(Halt),
}

impl Answer {
    fn is_event_stream(&self) -> bool {
        match self {
            Answer::Reply(reply) => reply.is_event_stream(),
            Answer::Halted(halt) => halt.body.is_event_stream(),
        }
    }
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn run_filters(
    route_match: &RouteMatch,
    scope: FilterScope,
    ctx: &mut RequestContext,
) -> Result<(), Interrupt> {
    let chain = route_match.router.filters();
    std::panic::catch_unwind(AssertUnwindSafe(|| chain.run(scope, &route_match.path, ctx)))
        .unwrap_or_else(|panic| Err(Error::Internal(panic_message(panic)).into()))
}

/// Run filters and handler for an HTTP route and build the response.
pub(crate) async fn respond_http(
    route_match: &RouteMatch,
    handler: &Arc<dyn Handler>,
    mut ctx: RequestContext,
) -> Response {
    ctx.set_phase(Phase::RunningBefore);
    let answer = match run_filters(route_match, FilterScope::Before, &mut ctx) {
        Ok(()) => {
            ctx.set_phase(Phase::RunningHandler);
            let outcome = AssertUnwindSafe(Handler::call(handler.as_ref(), &mut ctx))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(reply)) => Answer::Reply(reply),
                Ok(Err(Interrupt::Halt(halt))) => Answer::Halted(halt),
                Ok(Err(Interrupt::Fail(err))) => return error_response(&mut ctx, err),
                Err(panic) => {
                    return error_response(&mut ctx, Error::Internal(panic_message(panic)));
                }
            }
        }
        Err(Interrupt::Halt(halt)) => Answer::Halted(halt),
        Err(Interrupt::Fail(err)) => return error_response(&mut ctx, err),
    };

    let answer = if answer.is_event_stream() {
        answer
    } else {
        ctx.set_phase(Phase::RunningAfter);
        match run_filters(route_match, FilterScope::After, &mut ctx) {
            Ok(()) => answer,
            Err(Interrupt::Halt(halt)) => Answer::Halted(halt),
            Err(Interrupt::Fail(err)) => return error_response(&mut ctx, err),
        }
    };

    ctx.set_phase(Phase::Responding);
    match build_response(&ctx, answer) {
        Ok((response, size)) => {
            ctx.set_phase(Phase::Done);
            log_response(&ctx, response.status(), size);
            response
        }
        Err(err) => error_response(&mut ctx, err),
    }
}

/// Run before filters for an event-source route, then detach the stream
/// and hand it to the route handler on its own task.
pub(crate) fn respond_event_source(
    route_match: &RouteMatch,
    headers: &HeaderMap,
    handler: &Arc<dyn StreamHandler<EventSource>>,
    mut ctx: RequestContext,
) -> Response {
    ctx.set_phase(Phase::RunningBefore);
    match run_filters(route_match, FilterScope::Before, &mut ctx) {
        Ok(()) => {}
        Err(Interrupt::Halt(halt)) => {
            ctx.set_phase(Phase::Responding);
            return match build_response(&ctx, Answer::Halted(halt)) {
                Ok((response, size)) => {
                    ctx.set_phase(Phase::Done);
                    log_response(&ctx, response.status(), size);
                    response
                }
                Err(err) => error_response(&mut ctx, err),
            };
        }
        Err(Interrupt::Fail(err)) => return error_response(&mut ctx, err),
    }

    ctx.response_headers_mut().extend(headers.clone());
    ctx.content_type(ContentKind::EventStream);
    let (source, stream) = EventSource::open(ctx.request().peer_addr(), ctx.on_close_handle());

    ctx.set_phase(Phase::RunningHandler);
    let mut response = Response::new(stream.into_body());
    *response.headers_mut() = ctx.response_headers().clone();
    log_response(&ctx, StatusCode::OK, None);

    let report = ctx.state().report_errors();
    let task = StreamHandler::call(handler.as_ref(), ctx, source.clone());
    tokio::spawn(async move {
        let outcome = AssertUnwindSafe(task).catch_unwind().await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(panic) => Some(Error::Internal(panic_message(panic))),
        };
        if let Some(err) = failure {
            if report || !err.is_expected() {
                tracing::warn!(socket_id = %source.id(), error = %err, "event source handler failed");
            } else {
                tracing::debug!(socket_id = %source.id(), error = %err, "event source handler failed");
            }
            source.close();
        }
    });

    response
}

/// Serialize the settled answer according to the negotiated content type.
fn build_response(
    ctx: &RequestContext,
    answer: Answer,
) -> Result<(Response, Option<usize>), Error> {
    let (status, reply, halted) = match answer {
        Answer::Halted(halt) => (halt.status, halt.body, true),
        Answer::Reply(reply) => {
            let status = ctx
                .redirect_target()
                .map_or(StatusCode::OK, |(_, status)| *status);
            (status, reply, false)
        }
    };
    let json = ctx.responds_with(ContentKind::Json);

    let (body, size) = match reply {
        Reply::Empty => (Body::empty(), Some(0)),
        Reply::Text(text) => {
            if json && !halted && !text.is_empty() {
                serde_json::from_str::<Value>(&text).map_err(|err| {
                    Error::BadRequest(format!("response is not valid JSON: {err}"))
                })?;
            }
            let size = text.len();
            (Body::from(text), Some(size))
        }
        Reply::Bytes(bytes) => {
            let size = bytes.len();
            (Body::from(bytes), Some(size))
        }
        Reply::Json(value) => {
            if !json {
                return Err(Error::Internal(
                    "html response requires String".to_string(),
                ));
            }
            let value = if halted && !status.is_success() {
                json!({ "error": value })
            } else {
                value
            };
            let text = value.to_string();
            let size = text.len();
            (Body::from(text), Some(size))
        }
        Reply::Chunks(chunks) => {
            if !ctx.is_chunked() {
                return Err(Error::BadRequest(
                    "chunked body requires chunked transfer encoding".to_string(),
                ));
            }
            (chunks.into_body(json, ctx.on_close_handle()), None)
        }
        Reply::EventStream(stream) => (stream.into_body(), None),
    };

    let mut headers = ctx.response_headers().clone();
    if let Some((location, _)) = ctx.redirect_target() {
        let location = HeaderValue::from_str(location)
            .map_err(|err| Error::Internal(format!("invalid redirect location: {err}")))?;
        headers.insert(LOCATION, location);
    }

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok((response, size))
}

fn report(ctx: &RequestContext, err: &Error) {
    let request = ctx.request();
    if ctx.state().report_errors() {
        tracing::error!(
            method = %request.method(),
            path = %request.path(),
            error = ?err,
            "request failed"
        );
    } else if !err.is_expected() {
        tracing::warn!(
            method = %request.method(),
            path = %request.path(),
            error = %err,
            "request failed"
        );
    } else {
        tracing::debug!(
            method = %request.method(),
            path = %request.path(),
            error = %err,
            "request rejected"
        );
    }
}

/// Render `err` for the client.
///
/// JSON routes get `{"error": payload}`; other routes get the payload text.
pub(crate) fn error_response(ctx: &mut RequestContext, err: Error) -> Response {
    ctx.set_phase(Phase::Error);
    report(ctx, &err);

    let status = err.status();
    let payload = err.payload();
    let text = if ctx.responds_with(ContentKind::Json) {
        json!({ "error": payload.to_json() }).to_string()
    } else {
        payload.to_text()
    };
    let size = text.len();

    let mut headers = ctx.response_headers().clone();
    if ctx.request().version() < Version::HTTP_2 {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
    }

    let mut response = Response::new(Body::from(text));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    log_response(ctx, status, Some(size));
    // No body will carry the close guard, so release the callback here.
    ctx.on_close_handle().fire();
    response
}

fn log_response(ctx: &RequestContext, status: StatusCode, size: Option<usize>) {
    let request = ctx.request();
    logging::log_response(
        request.peer_addr(),
        request.method(),
        request.uri(),
        request.version(),
        status,
        size,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("owned".to_string())), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "handler panicked");
    }
}
