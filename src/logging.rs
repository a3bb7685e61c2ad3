//! Process-wide tracing subscriber.
//!
//! - Filter: VMGATE_LOG, else RUST_LOG, else "info" ("debug" when verbose).
//! - Always writes to stderr: under inetd-style activation stdin/stdout are the client socket.
//! - ANSI colour only when stderr is a TTY and NO_COLOR is unset.
use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

fn filter_directive(verbose: bool) -> String {
    ["VMGATE_LOG", "RUST_LOG"]
        .iter()
        .filter_map(|k| env::var(k).ok())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string())
}

fn ansi_enabled() -> bool {
    // Per https://no-color.org/
    env::var("NO_COLOR").is_err() && atty::is(atty::Stream::Stderr)
}

/// Install the subscriber once. Returns false when it was already installed
/// (by an earlier call or by someone else).
pub fn logging_init(verbose: bool) -> bool {
    if INIT.get().is_some() {
        return false;
    }
    let filter = EnvFilter::try_new(filter_directive(verbose))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let res = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled())
        .with_target(false)
        .try_init();
    if res.is_err() {
        eprintln!("vmgate: logging init skipped (global subscriber already set)");
        return false;
    }
    let _ = INIT.set(());
    true
}
