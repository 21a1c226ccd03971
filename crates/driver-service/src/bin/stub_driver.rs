//! Minimal stand-in for a WebDriver binary, used by the integration tests
//!
//! Understands `--port=N`, `--exit-code=N` (exit before listening),
//! `--never-ready` (status answers 503), `--startup-delay-ms=N` and
//! `--ignore-term` (survive SIGTERM on Unix).
//! `GET /args` echoes the command line, `GET /shutdown` exits.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct StubArgs {
    port: u16,
    exit_code: Option<i32>,
    never_ready: bool,
    ignore_term: bool,
    startup_delay: Duration,
    silent: bool,
    raw: Vec<String>,
}

impl StubArgs {
    fn parse(raw: Vec<String>) -> Result<Self> {
        let mut args = StubArgs::default();
        for arg in &raw {
            if let Some(port) = arg.strip_prefix("--port=") {
                args.port = port.parse().context("invalid --port")?;
            } else if let Some(code) = arg.strip_prefix("--exit-code=") {
                args.exit_code = Some(code.parse().context("invalid --exit-code")?);
            } else if let Some(ms) = arg.strip_prefix("--startup-delay-ms=") {
                args.startup_delay = Duration::from_millis(ms.parse().context("invalid delay")?);
            } else if arg == "--never-ready" {
                args.never_ready = true;
            } else if arg == "--ignore-term" {
                args.ignore_term = true;
            } else if arg == "--silent" {
                args.silent = true;
            }
        }
        args.raw = raw;
        Ok(args)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let args = StubArgs::parse(std::env::args().skip(1).collect())?;

    if let Some(code) = args.exit_code {
        warn!(code, "Exiting before listening");
        std::process::exit(code);
    }

    // A registered handler replaces the default "terminate" action
    #[cfg(unix)]
    let _term = if args.ignore_term {
        use tokio::signal::unix::{SignalKind, signal};
        Some(signal(SignalKind::terminate())?)
    } else {
        None
    };

    tokio::time::sleep(args.startup_delay).await;

    let listener = TcpListener::bind(("127.0.0.1", args.port))
        .await
        .with_context(|| format!("cannot bind port {}", args.port))?;
    if !args.silent {
        println!("Stub driver was started successfully on port {}.", args.port);
    }
    info!(port = args.port, ignore_term = args.ignore_term, "Listening");

    loop {
        let (stream, _) = listener.accept().await?;
        if let Err(e) = handle(stream, &args).await {
            warn!(error = %e, "Request failed");
        }
    }
}

async fn handle(mut stream: TcpStream, args: &StubArgs) -> Result<()> {
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request.split_whitespace().nth(1).unwrap_or("/");

    let (status, body) = match path {
        "/status" if args.never_ready => ("503 Service Unavailable", String::new()),
        "/status" => ("200 OK", r#"{"value":{"ready":true}}"#.to_string()),
        "/args" => ("200 OK", args.raw.join("\n")),
        "/shutdown" => ("200 OK", String::new()),
        _ => ("404 Not Found", String::new()),
    };

    let response = format!(
        "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;

    if path == "/shutdown" {
        info!("Shutdown requested");
        std::process::exit(0);
    }
    Ok(())
}
