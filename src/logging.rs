use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE: &str = "towme.log";

/// Routes tracing output to a daily rolling file under `log_dir`.
///
/// The terminal belongs to the TUI, so nothing is written to stdout. Keep
/// the returned guard alive for the life of the process or buffered lines
/// are lost on exit.
pub fn initialize_logging(log_dir: &str) -> WorkerGuard {
    let _ = std::fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG wins; otherwise info for this crate and warn for the HTTP stack
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::info!("Logging initialized to {}/{}", log_dir, LOG_FILE);
    guard
}
