use std::path::PathBuf;
use std::sync::{Mutex, Once};

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    pub level: String,
    /// Emit logs as JSON lines.
    pub json: bool,
    /// Write logs to stderr.
    pub stderr: bool,
    /// Append logs to this file. If it cannot be opened, file logging is skipped.
    pub file: Option<PathBuf>,
}

const DEFAULT_LEVEL: &str = "info";
const LEVEL_NAMES: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            json: false,
            stderr: true,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// `level` as filter directives. Bare level names are case-insensitive and `warning` is
    /// accepted for `warn`; anything else passes through untouched.
    pub(crate) fn directives(&self) -> String {
        let level = self.level.trim();
        if level.is_empty() {
            return DEFAULT_LEVEL.to_string();
        }
        let lower = level.to_ascii_lowercase();
        if lower == "warning" {
            "warn".to_string()
        } else if LEVEL_NAMES.contains(&lower.as_str()) {
            lower
        } else {
            level.to_string()
        }
    }

    /// The effective filter: the configured level with `RUST_LOG` merged on top.
    ///
    /// Falls back to `RUST_LOG` alone, then the configured level alone, then `info` when a
    /// combination does not parse.
    pub fn env_filter(&self) -> EnvFilter {
        let configured = self.directives();
        let mut candidates = Vec::with_capacity(3);
        if let Some(from_env) = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            candidates.push(format!("{configured},{from_env}"));
            candidates.push(from_env);
        }
        candidates.push(configured);

        candidates
            .iter()
            .find_map(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::default().add_directive(LevelFilter::INFO.into()))
    }

    fn make_writer(&self) -> BoxMakeWriter {
        let file = self.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

        match (self.stderr, file) {
            (true, Some(file)) => BoxMakeWriter::new(stderr_writer().and(Mutex::new(file))),
            (true, None) => BoxMakeWriter::new(stderr_writer()),
            (false, Some(file)) => BoxMakeWriter::new(Mutex::new(file)),
            (false, None) => BoxMakeWriter::new(std::io::sink),
        }
    }
}

/// Stderr in release builds; the test-capturing writer in debug builds so `cargo test` stays
/// quiet.
fn stderr_writer() -> BoxMakeWriter {
    if cfg!(debug_assertions) {
        BoxMakeWriter::new(tracing_subscriber::fmt::writer::TestWriter::with_stderr)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` subscriber described by `config`.
///
/// Only the first call in a process installs anything; later calls return `false`.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let mut installed = false;
    TRACING_INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(config.env_filter());
        let writer = config.make_writer();
        let result = if config.json {
            tracing::subscriber::set_global_default(
                registry.with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_ansi(false),
                ),
            )
        } else {
            tracing::subscriber::set_global_default(
                registry.with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                ),
            )
        };
        installed = result.is_ok();
        if installed {
            tracing::debug!(
                target = "lumen.config",
                level = %config.level,
                json = config.json,
                file = ?config.file,
                "tracing initialized"
            );
        }
    });
    installed
}
