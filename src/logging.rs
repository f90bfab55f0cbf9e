/// Structured logging setup using tracing
///
/// Writes to stderr so stdout stays reserved for command output (JSON results).
/// Auto-detects format: human-readable with ANSI colors when stderr is a terminal,
/// structured JSON when piped/redirected. When `log_file` is configured, a JSON
/// copy of every event is appended to that file as well.

use std::fs::{File, OpenOptions};
use std::io::IsTerminal;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::{
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};
use crate::config::Config;

/// JSON file layer, boxed so both stderr formats can stack it.
fn file_layer<S>(file: Option<File>) -> Option<Box<dyn Layer<S> + Send + Sync + 'static>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    file.map(|f| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(Mutex::new(f))
            .boxed()
    })
}

/// Initialize tracing subscriber with stderr output
///
/// Log level from config.log_level (default: info)
/// RUST_LOG env var can override at runtime
pub fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (log_file, open_error) = match config.log_file.as_deref() {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => (Some(f), None),
            Err(e) => (None, Some((path.to_string(), e))),
        },
        None => (None, None),
    };

    if std::io::stderr().is_terminal() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
            )
            .with(file_layer(log_file))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
            )
            .with(file_layer(log_file))
            .init();
    }

    if let Some((path, e)) = open_error {
        tracing::warn!(
            log_file = %path,
            error = %e,
            "Could not open log file, logging to stderr only"
        );
    }
}
