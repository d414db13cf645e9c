//! Skein demo server.
//!
//! ```text
//! skein [-c skein.toml] [-o 0.0.0.0] [-p 4567] [--log-level debug]
//!
//!   GET  /              plain greeting
//!   GET  /params        echo params as JSON
//!   POST /broadcast     send `message` to every /chat socket and /events stream
//!   WS   /chat          chat room; every text frame is broadcast
//!   SSE  /events        stream of broadcast messages
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde_json::json;

use skein::config::{load_config, validate_config, ServerConfig};
use skein::observability::{logging, metrics};
use skein::{
    App, Application, ContentKind, EventSource, Reply, RequestContext, Server, WebSocket,
    DEFAULT_CONTEXT,
};

#[derive(Parser)]
#[command(name = "skein")]
#[command(about = "HTTP, WebSocket and SSE application server", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short = 'o', long)]
    addr: Option<String>,

    /// Bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// Default log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

async fn chat(ctx: RequestContext, socket: WebSocket) -> skein::Result<()> {
    ctx.websockets().add(DEFAULT_CONTEXT, socket.clone());
    while let Some(frame) = socket.read().await {
        if let Some(text) = frame.as_text() {
            ctx.websockets().broadcast(DEFAULT_CONTEXT, text);
        }
    }
    Ok(())
}

async fn events(ctx: RequestContext, source: EventSource) -> skein::Result<()> {
    source.message("connected")?;
    ctx.sses().add(DEFAULT_CONTEXT, source);
    Ok(())
}

fn demo_app(config: &ServerConfig) -> Result<Application, skein::RouteError> {
    let api = App::new()
        .content_type(ContentKind::Json)
        .get("/params", |ctx| {
            Box::pin(async move { Ok(Reply::from(ctx.params()?.clone())) })
        })
        .post("/broadcast", |ctx| {
            Box::pin(async move {
                let message = ctx.params()?.get_str("message").unwrap_or("").to_string();
                let sockets = ctx.websockets().broadcast(DEFAULT_CONTEXT, &message);
                let streams = ctx.sses().broadcast(DEFAULT_CONTEXT, &message);
                Ok(Reply::from(json!({ "websockets": sockets, "streams": streams })))
            })
        });

    App::from_config(config)
        .get("/", |_ctx| Box::pin(async { Ok(Reply::from("<h1>skein</h1>")) }))
        .map("/api", api)
        .websocket("/chat", chat)
        .eventsource("/events", &[("cache-control", "no-cache")], events)
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(addr) = cli.addr {
        config.listener.addr = addr;
    }
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("invalid configuration: {error}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "skein starting");

    if let Some(address) = &config.observability.metrics_address {
        let address: SocketAddr = address.parse()?;
        metrics::install_exporter(address)?;
    }

    let app = demo_app(&config)?;
    let server = Server::bind(app, &config).await?;
    server.run_until_signal().await?;

    tracing::info!("shutdown complete");
    Ok(())
}
