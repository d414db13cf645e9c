//! Per-request context handed to filters and handlers.
//!
//! # Responsibilities
//! - Expose the request, lazily parsed params and response headers
//! - Carry per-request locals shared between filters and the handler
//! - Provide response helpers: redirects, halts, files, streams, views
//! - Reach application-wide state: socket stashes and named tasks

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use axum::http::{
    header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    HeaderMap, HeaderName, HeaderValue, StatusCode,
};
use bytes::Bytes;
use serde_json::{Map, Value};

use super::reply::{halt, Halt, Interrupt, Reply};
use super::request::Request;
use super::sse::EventSource;
use super::stream::{ChunkStream, ChunkWriter, OnClose};
use crate::app::AppState;
use crate::error::{Error, Result};
use crate::params::{parser, ParamsMap};
use crate::stash::{SseStash, WebSocketStash};

/// Response content types a route can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentKind {
    #[default]
    Html,
    Json,
    Js,
    Xml,
    EventStream,
}

impl ContentKind {
    pub fn mime(self) -> &'static str {
        match self {
            ContentKind::Html => "text/html",
            ContentKind::Json => "application/json",
            ContentKind::Js => "application/javascript",
            ContentKind::Xml => "application/xml",
            ContentKind::EventStream => "text/event-stream",
        }
    }

    /// Classify a `Content-Type` value, ignoring parameters.
    pub fn from_mime(value: &str) -> Self {
        let essence = value.split(';').next().unwrap_or("").trim();
        [
            ContentKind::Json,
            ContentKind::Js,
            ContentKind::Xml,
            ContentKind::EventStream,
        ]
        .into_iter()
        .find(|kind| essence.eq_ignore_ascii_case(kind.mime()))
        .unwrap_or(ContentKind::Html)
    }
}

/// Where the request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    RunningBefore,
    RunningHandler,
    RunningAfter,
    Responding,
    Done,
    Error,
}

/// Options for [`RequestContext::send_file`].
#[derive(Debug, Clone, Default)]
pub struct FileOptions {
    /// Ask the client to download instead of display.
    pub attachment: bool,
    /// Download name; implies `attachment`.
    pub filename: Option<String>,
}

/// Everything a filter or handler can see and change about a request.
pub struct RequestContext {
    request: Request,
    route_params: Map<String, Value>,
    params: Option<ParamsMap>,
    request_body: Option<Value>,
    headers: HeaderMap,
    redirect: Option<(String, StatusCode)>,
    chunked: bool,
    locals: HashMap<String, Value>,
    on_close: OnClose,
    state: Arc<AppState>,
    phase: Phase,
}

impl RequestContext {
    pub(crate) fn new(
        request: Request,
        route_params: Map<String, Value>,
        headers: HeaderMap,
        state: Arc<AppState>,
    ) -> Self {
        Self {
            request,
            route_params,
            params: None,
            request_body: None,
            headers,
            redirect: None,
            chunked: false,
            locals: HashMap::new(),
            on_close: OnClose::new(),
            state,
            phase: Phase::Init,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Request header by name; `_` is read as `-` and case is ignored.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    fn parse_params(&mut self) -> Result<()> {
        if self.params.is_some() {
            return Ok(());
        }
        let parsed = parser::parse_request(
            self.request.method(),
            self.request.query(),
            self.request.headers(),
            self.request.body(),
        )?;
        let mut params = parsed.params;
        params.merge(self.route_params.clone());
        self.request_body = parsed.request_body;
        self.params = Some(params);
        Ok(())
    }

    /// Merged params: query, then body, then route captures.
    ///
    /// Parsed on first use; malformed bodies fail with `BadRequest`.
    pub fn params(&mut self) -> Result<&ParamsMap> {
        self.parse_params()?;
        Ok(self.params.get_or_insert_with(ParamsMap::new))
    }

    /// Mutable params, for filters that rewrite input.
    pub fn params_mut(&mut self) -> Result<&mut ParamsMap> {
        self.parse_params()?;
        Ok(self.params.get_or_insert_with(ParamsMap::new))
    }

    /// A JSON body that is not an object (e.g. a top-level array).
    pub fn request_body(&mut self) -> Result<Option<&Value>> {
        self.parse_params()?;
        Ok(self.request_body.as_ref())
    }

    /// Captures from the matched route pattern.
    pub fn route_params(&self) -> &Map<String, Value> {
        &self.route_params
    }

    /// Expose `captures` as params until [`restore_params`](Self::restore_params).
    pub(crate) fn overlay_params(&mut self, captures: Map<String, Value>) -> Result<ParamsMap> {
        let params = self.params_mut()?;
        let saved = params.clone();
        params.merge(captures);
        Ok(saved)
    }

    pub(crate) fn restore_params(&mut self, saved: ParamsMap) {
        self.params = Some(saved);
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Set a response header.
    pub fn header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| Error::Internal(format!("invalid header name `{name}`: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| Error::Internal(format!("invalid header value: {err}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Set the response content type.
    pub fn content_type(&mut self, kind: ContentKind) {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(kind.mime()));
    }

    /// Content type the response will be negotiated as.
    pub fn response_kind(&self) -> ContentKind {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map_or(ContentKind::Html, ContentKind::from_mime)
    }

    pub fn responds_with(&self, kind: ContentKind) -> bool {
        self.response_kind() == kind
    }

    /// Redirect with `302 Found`.
    pub fn redirect(&mut self, url: impl Into<String>) -> Reply {
        self.redirect = Some((url.into(), StatusCode::FOUND));
        Reply::Empty
    }

    /// Redirect with `301 Moved Permanently`.
    pub fn redirect_permanent(&mut self, url: impl Into<String>) -> Reply {
        self.redirect = Some((url.into(), StatusCode::MOVED_PERMANENTLY));
        Reply::Empty
    }

    pub(crate) fn redirect_target(&self) -> Option<&(String, StatusCode)> {
        self.redirect.as_ref()
    }

    /// Mark the response as chunked; required for [`Reply::Chunks`].
    pub fn transfer_encoding_chunked(&mut self) {
        self.chunked = true;
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Stop with `status` and `body`.
    pub fn halt(&self, status: StatusCode, body: impl Into<Reply>) -> Interrupt {
        halt(status, body)
    }

    /// Chunked response fed by `producer`, spawned immediately.
    pub fn chunked_response<F, Fut>(&mut self, producer: F) -> Reply
    where
        F: FnOnce(ChunkWriter) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.transfer_encoding_chunked();
        Reply::Chunks(ChunkStream::spawn(producer))
    }

    /// Detach the response as an event stream fed by `producer`.
    ///
    /// Returns the interrupt the handler must propagate.
    pub fn eventsource<F, Fut>(&mut self, producer: F) -> Interrupt
    where
        F: FnOnce(EventSource) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.content_type(ContentKind::EventStream);
        let (source, stream) = EventSource::open(self.request.peer_addr(), self.on_close.clone());
        let task = producer(source.clone());
        let report = self.state.report_errors();
        tokio::spawn(async move {
            if let Err(err) = task.await {
                if report {
                    tracing::error!(error = ?err, socket_id = %source.id(), "event stream producer failed");
                } else {
                    tracing::debug!(error = %err, socket_id = %source.id(), "event stream producer failed");
                }
                source.close();
            }
        });
        Interrupt::Halt(Halt {
            status: StatusCode::OK,
            body: Reply::EventStream(stream),
        })
    }

    /// Callback run once a streamed response ends.
    pub fn on_close(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.on_close.set(callback);
    }

    pub(crate) fn on_close_handle(&self) -> OnClose {
        self.on_close.clone()
    }

    fn disposition(&mut self, name: Option<&str>) -> Result<()> {
        if let Some(name) = name {
            let value = format!("attachment; filename=\"{}\"", name.replace('"', ""));
            let value = HeaderValue::from_str(&value)
                .map_err(|err| Error::Internal(format!("invalid filename: {err}")))?;
            self.headers.insert(CONTENT_DISPOSITION, value);
        }
        Ok(())
    }

    /// Halt with the contents of a file.
    ///
    /// Relative paths resolve against the application root. A missing file
    /// halts with an empty `404`.
    pub async fn send_file(&mut self, path: impl AsRef<Path>, options: FileOptions) -> Interrupt {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.state.root().join(path)
        };

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return halt(StatusCode::NOT_FOUND, Reply::Empty);
            }
            Err(err) => return Interrupt::Fail(Error::Internal(err.to_string())),
        };

        let content_type = mime_guess::from_path(&path)
            .first_raw()
            .unwrap_or(ContentKind::Html.mime());
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));

        let filename = match (&options.filename, options.attachment) {
            (Some(name), _) => Some(name.clone()),
            (None, true) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            (None, false) => None,
        };
        if let Err(err) = self.disposition(filename.as_deref()) {
            return err.into();
        }

        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(data.len()));
        halt(StatusCode::OK, Reply::Bytes(Bytes::from(data)))
    }

    /// Halt with in-memory data, optionally as a named download.
    pub fn send_data(&mut self, data: impl Into<Bytes>, filename: Option<&str>) -> Interrupt {
        let data = data.into();
        if let Some(name) = filename {
            let content_type = mime_guess::from_path(name)
                .first_raw()
                .unwrap_or(ContentKind::Html.mime());
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        if let Err(err) = self.disposition(filename) {
            return err.into();
        }
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(data.len()));
        halt(StatusCode::OK, Reply::Bytes(data))
    }

    /// Render a view with `locals`, optionally inside `layout`.
    pub fn render(&self, view: &str, locals: Value, layout: Option<&str>) -> Result<String> {
        let renderer = self
            .state
            .renderer()
            .ok_or_else(|| Error::Internal("no views directory configured".to_string()))?;
        renderer.render(view, &locals, layout)
    }

    pub fn set_local(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.locals.insert(key.into(), value.into());
    }

    pub fn local(&self, key: &str) -> Option<&Value> {
        self.locals.get(key)
    }

    pub fn locals(&self) -> &HashMap<String, Value> {
        &self.locals
    }

    /// Stash of live WebSockets.
    pub fn websockets(&self) -> &WebSocketStash {
        self.state.websockets()
    }

    /// Stash of live event streams.
    pub fn sses(&self) -> &SseStash {
        self.state.sses()
    }

    /// Start a named task without waiting for it.
    pub fn spawn_task(&self, name: &str, arg: Value) -> Result<()> {
        self.state.tasks().spawn(name, arg).map(drop)
    }

    /// Run a named task and wait for its result.
    pub async fn run_task(&self, name: &str, arg: Value) -> Result<Value> {
        self.state.tasks().run(name, arg).await
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn state(&self) -> &AppState {
        &self.state
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", self.request.method())
            .field("path", &self.request.path())
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_kind_classification() {
        assert_eq!(ContentKind::from_mime("application/json; charset=utf-8"), ContentKind::Json);
        assert_eq!(ContentKind::from_mime("text/event-stream"), ContentKind::EventStream);
        assert_eq!(ContentKind::from_mime("text/plain"), ContentKind::Html);
        assert_eq!(ContentKind::default().mime(), "text/html");
    }
}
