//! Logger configuration and structured output formatting.
//!
//! One line per event: timestamp, padded level, target, message. Colors are
//! applied to the level only and disabled entirely when `NO_COLOR` is set,
//! so the output stays machine-parseable under log aggregation.
//!
//! # Output Format
//!
//! ```text
//! 2026-03-15 10:30:00.123 | [INFO]  | revolver::gateway | configuration applied, routing table swapped
//! 2026-03-15 10:30:01.456 | [WARN]  | revolver::services::bulkhead | bulkhead payments.order circuit opened
//! 2026-03-15 10:30:02.789 | [INFO]  | revolver::trace | service=payments api=order latency_ms=12 outcome=ok status=200
//! ```
//!
//! The `revolver::trace` target carries the per-call trace entries emitted
//! by the execution engine; filter on it (`RUST_LOG=revolver::trace=info`)
//! to isolate the request log.

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Visible width of the `[LEVEL]` column.
///
/// Keeps the target column aligned across `INFO` and `ERROR` lines;
/// increase it if longer custom level names ever stop aligning.
const LEVEL_FIELD_WIDTH: usize = 7;

/// Installs the process-wide logger. Call once at startup.
///
/// # Level Colors
///
/// - ERROR: red
/// - WARN: yellow
/// - INFO: green
/// - DEBUG: blue
/// - TRACE: magenta
///
/// # Environment Configuration
///
/// - `RUST_LOG` - level filtering, standard `env_logger` syntax
///   (`debug`, `revolver=debug`, `revolver::trace=info`); the default
///   level without it is `info`
/// - `NO_COLOR` - disables ANSI colors for structured logging systems
///
/// # Thread Safety
///
/// Safe to call from any thread, but must only be called once; a second
/// call panics inside `env_logger` because the global logger is already
/// set.
pub fn configure_logger() {
    let no_color = env::var("NO_COLOR").is_ok();

    let mut builder = Builder::new();
    builder
        .format(move |buf, record| {
            let level = record.level();
            let level_plain = format!("{}", level);
            let colored_level = if no_color {
                level_plain.clone()
            } else {
                let code = match level {
                    log::Level::Error => "31",
                    log::Level::Warn => "33",
                    log::Level::Info => "32",
                    log::Level::Debug => "34",
                    log::Level::Trace => "35",
                };
                format!("\x1b[{}m{}\x1b[0m", code, level_plain)
            };
            let padding = LEVEL_FIELD_WIDTH.saturating_sub(level_plain.len());

            writeln!(
                buf,
                "{} | [{}]{} | {} | {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                colored_level,
                " ".repeat(padding),
                record.target(),
                record.args(),
            )
        })
        .filter_level(LevelFilter::Info);

    if let Ok(spec) = env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }

    builder.init();
}
