use std::io::{self, BufRead, Write};

use normbookd::config::AppConfig;
use normbookd::ipc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    let config = AppConfig::from_env();
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let mut state = ipc::AppState::new();
    if let Some(path) = config.workspace.clone() {
        if let Err(e) = state.open_workspace(path.clone()) {
            warn!(workspace = %path.display(), error = ?e, "could not open configured workspace");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "normbookd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to reply to.
                let resp = ipc::err("", ipc::BAD_JSON, e.to_string(), None);
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
