//! Logging setup on `tracing-subscriber`.
//!
//! Every component logs through `tracing`; this module installs the global
//! subscriber that decides what reaches the terminal or the log file.
//!
//! ```rust,ignore
//! use lattice_runtime::{config::load_config, logging};
//!
//! // From the `[logging]` section
//! logging::init_from_config(&load_config()?.logging);
//!
//! // Or by hand
//! logging::LoggingBuilder::new()
//!     .directive("lattice_framework::queue=trace")
//!     .span_events(logging::SpanEvents::LIFECYCLE)
//!     .init();
//! ```
//!
//! `RUST_LOG`, when set, replaces the configured base level. Per-module
//! directives are added on top of either.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogOutput, LogRotation, LoggingConfig, SpanEventConfig};

const DEFAULT_LOG_FILE: &str = "lattice.log";

/// Which span transitions are written as log lines.
///
/// Dispatch (`publish`), routing (`command`), plugin hooks (`plugin_enable`,
/// `plugin_disable`), the outbound worker and shutdown all run inside spans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    pub const NONE: Self = Self::with(false, false, false, false);

    /// One line when a span opens and one, with its duration, when it closes.
    pub const LIFECYCLE: Self = Self::with(true, false, false, true);

    pub const FULL: Self = Self::with(true, true, true, true);

    const fn with(new: bool, enter: bool, exit: bool, close: bool) -> Self {
        Self {
            new,
            enter,
            exit,
            close,
        }
    }

    fn fmt_span(self) -> FmtSpan {
        [
            (self.new, FmtSpan::NEW),
            (self.enter, FmtSpan::ENTER),
            (self.exit, FmtSpan::EXIT),
            (self.close, FmtSpan::CLOSE),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .fold(FmtSpan::NONE, |acc, (_, span)| acc | span)
    }
}

impl From<&SpanEventConfig> for SpanEvents {
    fn from(config: &SpanEventConfig) -> Self {
        Self::with(config.new, config.enter, config.exit, config.close)
    }
}

/// Installs the global subscriber described by `config`.
///
/// A subscriber that is already installed (by an earlier runtime, or by the
/// host application) is left in place.
pub fn init_from_config(config: &LoggingConfig) {
    LoggingBuilder::from_config(config).init();
}

/// Assembles an `EnvFilter` and one `fmt` layer, then installs them.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: tracing::Level,
    directives: Vec<String>,
    span_events: SpanEvents,
    format: LogFormat,
    output: LogOutput,
    file_path: Option<PathBuf>,
    rotation: LogRotation,
    target: bool,
    thread_ids: bool,
    location: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    /// `info` and above, compact lines on stdout.
    pub fn new() -> Self {
        Self {
            level: tracing::Level::INFO,
            directives: Vec::new(),
            span_events: SpanEvents::NONE,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            target: true,
            thread_ids: false,
            location: false,
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        // Sorted so the resulting filter does not depend on map order.
        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort_by(|a, b| a.0.cmp(b.0));

        Self {
            level: config.level.to_tracing_level(),
            directives: filters
                .into_iter()
                .map(|(module, level)| format!("{module}={level}"))
                .collect(),
            span_events: SpanEvents::from(&config.span_events),
            format: config.format,
            output: config.output,
            file_path: config.file_path.clone(),
            rotation: config.rotation,
            target: true,
            thread_ids: config.thread_ids,
            location: config.file_location,
        }
    }

    pub fn level(mut self, level: tracing::Level) -> Self {
        self.level = level;
        self
    }

    /// Adds a filter directive such as `lattice_core::bus=debug`.
    ///
    /// Directives that do not parse are ignored.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Log file for [`LogOutput::File`], rotated per [`rotation`](Self::rotation).
    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn target(mut self, enabled: bool) -> Self {
        self.target = enabled;
        self
    }

    pub fn thread_ids(mut self, enabled: bool) -> Self {
        self.thread_ids = enabled;
        self
    }

    /// Source file and line of each event.
    pub fn location(mut self, enabled: bool) -> Self {
        self.location = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        let base = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_ascii_lowercase()));
        self.directives
            .iter()
            .filter_map(|d| d.parse().ok())
            .fold(base, EnvFilter::add_directive)
    }

    /// JSON lines need the `json-log` feature; without it they degrade to
    /// the full text format.
    fn effective_format(&self) -> LogFormat {
        match self.format {
            #[cfg(not(feature = "json-log"))]
            LogFormat::Json => LogFormat::Full,
            other => other,
        }
    }

    /// The writer for the configured output. `false` means a file was
    /// requested without a path and stdout is used instead.
    fn writer(&self) -> (BoxMakeWriter, bool) {
        match (self.output, self.file_path.as_deref()) {
            (LogOutput::Stdout, _) => (BoxMakeWriter::new(std::io::stdout), true),
            (LogOutput::Stderr, _) => (BoxMakeWriter::new(std::io::stderr), true),
            (LogOutput::File, Some(path)) => {
                let dir = path
                    .parent()
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let file = path
                    .file_name()
                    .unwrap_or_else(|| OsStr::new(DEFAULT_LOG_FILE));
                let appender = match self.rotation {
                    LogRotation::Never => rolling::never(dir, file),
                    LogRotation::Hourly => rolling::hourly(dir, file),
                    LogRotation::Daily => rolling::daily(dir, file),
                };
                (BoxMakeWriter::new(appender), true)
            }
            (LogOutput::File, None) => (BoxMakeWriter::new(std::io::stdout), false),
        }
    }

    fn layer(&self, writer: BoxMakeWriter) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(self.span_events.fmt_span())
            .with_target(self.target)
            .with_thread_ids(self.thread_ids)
            .with_file(self.location)
            .with_line_number(self.location);

        match self.effective_format() {
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            _ => layer.boxed(),
        }
    }

    /// Installs the subscriber, ignoring an already installed one.
    pub fn init(self) {
        let _ = self.try_init();
    }

    pub fn try_init(self) -> Result<(), TryInitError> {
        let (writer, as_configured) = self.writer();
        tracing_subscriber::registry()
            .with(self.layer(writer))
            .with(self.filter())
            .try_init()?;

        if !as_configured {
            warn!("File output requested without logging.file_path, logging to stdout");
        }
        Ok(())
    }
}
