//! Optional `tracing` subscriber setup.
//!
//! The engine crates only emit events (`info` for open, close, flush and
//! compaction; `debug` for per-operation detail; `warn` for tolerated
//! anomalies). Embedders that already install a subscriber need nothing from
//! here; everyone else can call [`LogConfig::init`] once at startup.

use hyperstore_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// File name used when a log path has none
const DEFAULT_LOG_FILE: &str = "hyperstore.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOutput {
    /// Standard output
    Stdout,
    /// A daily rolling file
    File(PathBuf),
    /// Standard output and a daily rolling file
    Both(PathBuf),
}

/// Line layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Multi-line, indented fields
    Pretty,
    /// One line per event
    Compact,
}

/// Subscriber configuration
///
/// `level` is an [`EnvFilter`] directive such as `"info"` or
/// `"hyperstore_storage=debug,warn"`. `RUST_LOG`, when set, wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub output: LogOutput,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::with_directive("info")
    }
}

impl LogConfig {
    fn with_directive(level: &str) -> Self {
        Self {
            level: level.to_string(),
            output: LogOutput::Stdout,
            format: LogFormat::Pretty,
        }
    }

    /// `info` to stdout
    pub fn info() -> Self {
        Self::with_directive("info")
    }

    /// `debug` to stdout
    pub fn debug() -> Self {
        Self::with_directive("debug")
    }

    /// `warn` to stdout
    pub fn warn() -> Self {
        Self::with_directive("warn")
    }

    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    /// Write to a daily rolling file instead of stdout
    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::File(path.into());
        self
    }

    /// Write to stdout and a daily rolling file
    pub fn with_both<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::Both(path.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .map_err(|e| Error::Config(format!("invalid log level '{}': {}", self.level, e)))
    }

    /// Install the global subscriber
    ///
    /// With a file output the returned guard owns the background writer;
    /// lines buffered when it drops may be lost, so keep it for the life of
    /// the process. Fails with [`Error::Config`] on a bad filter or when a
    /// subscriber is already installed.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use hyperstore::logging::{LogConfig, LogFormat};
    ///
    /// let _guard = LogConfig::info()
    ///     .with_both("logs/hyperstore.log")
    ///     .with_format(LogFormat::Compact)
    ///     .init()?;
    /// # Ok::<(), hyperstore::Error>(())
    /// ```
    pub fn init(self) -> Result<Option<WorkerGuard>> {
        let filter = self.filter()?;

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;
        if matches!(self.output, LogOutput::Stdout | LogOutput::Both(_)) {
            layers.push(fmt_layer(self.format, std::io::stdout, true));
        }
        if let LogOutput::File(path) | LogOutput::Both(path) = &self.output {
            let (writer, worker) = rolling_writer(path);
            layers.push(fmt_layer(self.format, writer, false));
            guard = Some(worker);
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(filter)
            .try_init()
            .map_err(|e| Error::Config(format!("failed to install logger: {}", e)))?;
        Ok(guard)
    }
}

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

/// Non-blocking writer over a daily rolling file at `path`
fn rolling_writer(path: &Path) -> (NonBlocking, WorkerGuard) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_info_on_stdout() {
        let config = LogConfig::default();
        assert_eq!(config, LogConfig::info());
        assert_eq!(config.output, LogOutput::Stdout);
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_builders() {
        let config = LogConfig::debug()
            .with_file("/var/log/graph.log")
            .with_format(LogFormat::Compact);
        assert_eq!(config.level, "debug");
        assert_eq!(config.output, LogOutput::File("/var/log/graph.log".into()));
        assert_eq!(config.format, LogFormat::Compact);

        let config = LogConfig::warn()
            .with_level("hyperstore_storage=trace")
            .with_both("logs/hyperstore.log");
        assert_eq!(config.level, "hyperstore_storage=trace");
        assert!(matches!(config.output, LogOutput::Both(ref p) if p.ends_with("hyperstore.log")));
    }
}
