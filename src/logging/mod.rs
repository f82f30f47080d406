//! Logging infrastructure - structured tracing for the marshaling layer
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Fixed targets per concern (`types`, `marshal`, `call`, `closure`)
//! - Zero-cost when disabled
//! - Console output, optionally JSON, plus an optional log file

use once_cell::sync::OnceCell;
use std::fmt::Display;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // DYNFFI_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("DYNFFI_LOG_LEVEL") {
            config.level = match level_str.to_lowercase().as_str() {
                "trace" => Level::TRACE,
                "debug" => Level::DEBUG,
                "warn" => Level::WARN,
                "error" => Level::ERROR,
                _ => Level::INFO,
            };
        }

        if let Ok(path) = std::env::var("DYNFFI_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("DYNFFI_LOG_JSON").is_ok();
        config.show_spans = std::env::var("DYNFFI_LOG_SPANS").is_ok();

        config
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Everything, including per-call traces and span events
    pub fn verbose() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("dynffi.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

/// Initialize logging with default configuration
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

        let span_events = || {
            if config.show_spans {
                FmtSpan::ENTER | FmtSpan::CLOSE
            } else {
                FmtSpan::NONE
            }
        };

        let console = (!config.json_format).then(|| {
            fmt::layer()
                .with_writer(io::stderr)
                .with_span_events(span_events())
                .with_target(true)
                .with_line_number(cfg!(debug_assertions))
        });

        let json = config.json_format.then(|| {
            fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_span_events(span_events())
        });

        let file = config
            .log_path
            .as_deref()
            .filter(|_| config.file_output)
            .map(|path| {
                let path = Path::new(path);
                let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
                let name = path.file_name().map_or_else(|| "dynffi.log".into(), |n| n.to_os_string());
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(tracing_appender::rolling::never(dir, name))
                    .with_span_events(span_events())
            });

        // Another subscriber may already be installed by the host; keep it
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(json)
            .with(file)
            .try_init();
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Event helpers
// ============================================================================

/// Log creation of a struct, array or complex descriptor
#[inline]
pub fn log_type_created(kind: &str, id: u32, size: usize, align: usize) {
    tracing::debug!(
        target: "types",
        event = "type_created",
        kind = kind,
        id = id,
        size_bytes = size,
        align = align,
        "Descriptor created"
    );
}

/// Log a fixed-arity native call
#[inline]
pub fn log_native_call(address: usize, nargs: usize) {
    tracing::trace!(
        target: "call",
        event = "native_call",
        address = ?(address as *const ()),
        args = nargs,
        "Native function called"
    );
}

/// Log a call whose plan was derived for extra arguments
#[inline]
pub fn log_variadic_call(address: usize, nfixed: usize, nargs: usize) {
    tracing::debug!(
        target: "call",
        event = "variadic_call",
        address = ?(address as *const ()),
        fixed = nfixed,
        args = nargs,
        "Variadic native call prepared"
    );
}

/// Log a value that could not be marshaled
pub fn log_marshal_error(error: &dyn Display) {
    tracing::debug!(
        target: "marshal",
        event = "marshal_error",
        error = %error,
        "Marshaling failed"
    );
}

/// Log trampoline creation
pub fn log_closure_created(code: usize, nargs: usize) {
    tracing::debug!(
        target: "closure",
        event = "closure_created",
        code = ?(code as *const ()),
        args = nargs,
        "Closure created"
    );
}

/// Log trampoline release
pub fn log_closure_destroyed(code: usize) {
    tracing::debug!(
        target: "closure",
        event = "closure_destroyed",
        code = ?(code as *const ()),
        "Closure destroyed"
    );
}

/// Log a failure inside a callback invoked from native code
pub fn log_callback_fault(fatal: bool, error: &dyn Display) {
    if fatal {
        tracing::error!(
            target: "closure",
            event = "callback_fault",
            fatal = true,
            error = %error,
            "Callback cannot continue"
        );
    } else {
        tracing::error!(
            target: "closure",
            event = "callback_fault",
            fatal = false,
            error = %error,
            "Callback raised an error"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.file_output);

        let quiet = LogConfig::quiet();
        assert_eq!(quiet.level, Level::ERROR);
        assert!(quiet.log_path.is_none());

        let verbose = LogConfig::verbose();
        assert_eq!(verbose.level, Level::TRACE);
        assert!(verbose.show_spans);
    }

    #[test]
    fn test_init_idempotent() {
        init_with_config(LogConfig::quiet());
        init_with_config(LogConfig::quiet());
        assert!(is_initialized());
    }
}
