//! Logging for the hub
//!
//! Console output uses a bracketed level format, an optional daily-rolling file layer
//! is written through a non-blocking appender, and the active filter sits behind a
//! reload layer so the level can be changed while the process runs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Mutex, OnceLock};

use errors::{HubError, Result};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Process-wide log level
///
/// Numeric values are stable; `Fatal` and `BizData` have no tracing counterpart and
/// are folded onto `error` and `info` respectively.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    #[default]
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
    BizData = 6,
    None = 7,
}

impl LogLevel {
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warn,
            4 => Self::Error,
            5 => Self::Fatal,
            6 => Self::BizData,
            7 => Self::None,
            _ => return None,
        })
    }

    /// `EnvFilter` directive for this level
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info | Self::BizData => "info",
            Self::Warn => "warn",
            Self::Error | Self::Fatal => "error",
            Self::None => "off",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            "bizdata" | "bizdt" => Ok(Self::BizData),
            "none" | "off" => Ok(Self::None),
            other => Err(HubError::InvalidArgument(format!(
                "unknown log level '{other}'"
            ))),
        }
    }
}

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter that outputs `timestamp [LEVEL] target: message`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }
        write!(writer, "{}: ", event.metadata().target())?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

type EnvFilterReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
static LOG_FILTER_HANDLE: OnceLock<EnvFilterReloadHandle> = OnceLock::new();
// Keeps the non-blocking file writer flushing for the life of the process
static FILE_GUARD: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();
static CURRENT_LOG_LEVEL: AtomicI32 = AtomicI32::new(LogLevel::Info as i32);
// Set once a level was chosen explicitly through set_log_level
static LEVEL_PINNED: AtomicBool = AtomicBool::new(false);

/// Logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Prefix of the rolling log file name
    pub service_name: String,
    /// Initial level, ignored when `RUST_LOG` is set
    pub level: LogLevel,
    /// Directory for daily-rolling log files; console only when unset
    pub log_dir: Option<PathBuf>,
    /// Emit JSON lines on the console instead of the bracketed format
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "idh".to_string(),
            level: LogLevel::Info,
            log_dir: None,
            json: false,
        }
    }
}

/// Initialize the global subscriber
///
/// A level set through [`set_log_level`] before this call wins over `config.level`.
/// Fails if a global subscriber is already installed.
pub fn init_with_config(config: &LogConfig) -> Result<()> {
    let level = if LEVEL_PINNED.load(Ordering::Acquire) {
        get_log_level()
    } else {
        config.level
    };

    let env_filter = match std::env::var("RUST_LOG") {
        Ok(spec) => EnvFilter::try_new(&spec)
            .map_err(|e| HubError::config(format!("invalid RUST_LOG '{spec}': {e}")))?,
        Err(_) => EnvFilter::new(level.as_directive()),
    };
    let (reload_filter, reload_handle) = reload::Layer::new(env_filter);

    let registry = tracing_subscriber::registry().with(reload_filter);

    let console_layer = if config.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().event_format(BracketedLevelFormat).boxed()
    };

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let slot = FILE_GUARD.get_or_init(|| Mutex::new(None));
            match slot.lock() {
                Ok(mut g) => *g = Some(guard),
                Err(poisoned) => *poisoned.into_inner() = Some(guard),
            }
            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed(),
            )
        },
        None => None,
    };

    registry
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| HubError::config(format!("logging already initialized: {e}")))?;

    let _ = LOG_FILTER_HANDLE.set(reload_handle);
    CURRENT_LOG_LEVEL.store(level as i32, Ordering::Release);

    tracing::info!(
        "Logging: {} level={:?} dir={:?}",
        config.service_name,
        level,
        config.log_dir
    );
    Ok(())
}

/// Initialize console logging at the given level
pub fn init(level: LogLevel) -> Result<()> {
    init_with_config(&LogConfig {
        level,
        ..Default::default()
    })
}

/// Set the process-wide log level
///
/// Before the subscriber is installed the level is only remembered and applied at init.
pub fn set_log_level(level: LogLevel) -> Result<()> {
    CURRENT_LOG_LEVEL.store(level as i32, Ordering::Release);
    LEVEL_PINNED.store(true, Ordering::Release);

    if let Some(handle) = LOG_FILTER_HANDLE.get() {
        handle
            .reload(EnvFilter::new(level.as_directive()))
            .map_err(|e| HubError::config(format!("failed to reload log filter: {e}")))?;
        tracing::info!("Log level changed to: {:?}", level);
    }
    Ok(())
}

/// Replace the filter with an arbitrary directive string, e.g. `info,idh_hub=debug`
pub fn set_log_filter(directives: &str) -> Result<()> {
    let handle = LOG_FILTER_HANDLE
        .get()
        .ok_or_else(|| HubError::config("logging not initialized with reload support"))?;
    let new_filter = EnvFilter::try_new(directives)
        .map_err(|e| HubError::config(format!("invalid log filter '{directives}': {e}")))?;
    handle
        .reload(new_filter)
        .map_err(|e| HubError::config(format!("failed to reload log filter: {e}")))?;
    tracing::info!("Log filter changed to: {}", directives);
    Ok(())
}

/// Current process-wide log level
pub fn get_log_level() -> LogLevel {
    LogLevel::from_i32(CURRENT_LOG_LEVEL.load(Ordering::Acquire)).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_level_numeric_values() {
        for raw in 0..=7 {
            let level = LogLevel::from_i32(raw).unwrap();
            assert_eq!(level as i32, raw);
        }
        assert_eq!(LogLevel::from_i32(8), None);
        assert_eq!(LogLevel::from_i32(-1), None);
    }

    #[test]
    fn test_directive_folding() {
        assert_eq!(LogLevel::Fatal.as_directive(), "error");
        assert_eq!(LogLevel::BizData.as_directive(), "info");
        assert_eq!(LogLevel::None.as_directive(), "off");
        assert_eq!(LogLevel::Trace.as_directive(), "trace");
    }

    #[test]
    fn test_parse_level() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("off".parse::<LogLevel>().unwrap(), LogLevel::None);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    // Single test touches the global level so parallel tests never race on it
    #[test]
    fn test_set_get_before_and_after_init() {
        set_log_level(LogLevel::Debug).unwrap();
        assert_eq!(get_log_level(), LogLevel::Debug);

        set_log_level(LogLevel::Error).unwrap();
        assert_eq!(get_log_level(), LogLevel::Error);

        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            service_name: "idh-test".to_string(),
            level: LogLevel::Trace,
            log_dir: Some(dir.path().to_path_buf()),
            json: false,
        };
        // Pending level set before init takes precedence
        if init_with_config(&config).is_ok() {
            assert_eq!(get_log_level(), LogLevel::Error);
            set_log_level(LogLevel::Warn).unwrap();
            assert_eq!(get_log_level(), LogLevel::Warn);
            assert!(set_log_filter("info,idh_hub=debug").is_ok());
        }
    }
}
