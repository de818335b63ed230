mod aggregate;
mod backup;
mod bimester;
mod calendar;
mod config;
mod db;
mod frequency;
mod ipc;
mod matrix;
mod model;
mod reconcile;
mod store;
mod subjects;
mod taught;

use std::io::{self, BufRead, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// stdout carries the protocol, so logs go to stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("ATTENDANCED_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(false),
        )
        .init();
}

fn main() {
    init_tracing();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "attendanced started");

    let mut state = ipc::AppState::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed with error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => {
                tracing::debug!(id = %req.id, method = %req.method, "request");
                ipc::handle_request(&mut state, req)
            }
            // Can't reply with the caller's id; answer with an empty one.
            Err(e) => ipc::err("", "bad_json", e.to_string(), None),
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, shutting down");
}
