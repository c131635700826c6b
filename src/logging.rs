use std::sync::Once;

use env_logger::Env;
use log::LevelFilter;

static LOG_ONCE: Once = Once::new();

/// Level from `HRV_LOG`, then `RUST_LOG`, defaulting to `info`.
fn env_level() -> LevelFilter {
    std::env::var("HRV_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .as_deref()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

fn parse_level(input: Option<&str>) -> Option<LevelFilter> {
    input.and_then(|s| s.parse::<LevelFilter>().ok())
}

/// Initialize stderr logging for binaries based on `HRV_LOG`/`RUST_LOG`.
pub fn init_rust_logging() {
    init_with_level(None);
}

/// Explicit level if it names one, otherwise the environment's.
fn resolve_level(level: Option<&str>) -> LevelFilter {
    parse_level(level).unwrap_or_else(env_level)
}

/// Numeric level used by Python's `logging` module.
#[cfg_attr(not(feature = "python"), allow(dead_code))]
fn python_level(level: log::Level) -> u32 {
    match level {
        log::Level::Error => 40,
        log::Level::Warn => 30,
        log::Level::Info => 20,
        log::Level::Debug => 10,
        log::Level::Trace => 5,
    }
}

/// `hrv_link::session` becomes the Python logger `hrv_link.session`.
#[cfg_attr(not(feature = "python"), allow(dead_code))]
fn python_logger_name(target: &str) -> String {
    target.replace("::", ".")
}

/// Initialize stderr logging with an explicit level, falling back to the
/// environment when `level` is missing or not a valid level name.
///
/// Safe to call multiple times; only the first call installs the logger.
pub fn init_with_level(level: Option<&str>) {
    let level = resolve_level(level);
    LOG_ONCE.call_once(|| {
        let env = Env::default().default_filter_or(level.as_str().to_ascii_lowercase());
        let _ = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(false)
            .try_init();
    });
}

#[cfg(feature = "python")]
pub(crate) use self::python_bridge::init_python_logging;

#[cfg(feature = "python")]
mod python_bridge {
    use log::{LevelFilter, Log, Metadata, Record};
    use pyo3::prelude::*;

    use super::{python_level, python_logger_name, resolve_level, LOG_ONCE};

    /// Forwards `log` records to Python's `logging`, one logger per module.
    struct PyLogBridge {
        level: LevelFilter,
        logging: Py<PyModule>,
    }

    impl PyLogBridge {
        fn forward(&self, py: Python<'_>, record: &Record) -> PyResult<()> {
            let logger = self
                .logging
                .bind(py)
                .call_method1("getLogger", (python_logger_name(record.target()),))?;
            let level = python_level(record.level());
            if logger.call_method1("isEnabledFor", (level,))?.is_truthy()? {
                logger.call_method1("log", (level, record.args().to_string()))?;
            }
            Ok(())
        }
    }

    impl Log for PyLogBridge {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level().to_level_filter() <= self.level
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            // A failing Python handler must not turn into a Rust error.
            Python::attach(|py| {
                let _ = self.forward(py, record);
            });
        }

        fn flush(&self) {}
    }

    /// Route crate logs into Python's `logging` module.
    ///
    /// Shares the one-time guard with the stderr logger: whichever is
    /// initialised first wins.
    pub(crate) fn init_python_logging(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
        let level = resolve_level(level);
        let logging = py.import("logging")?.unbind();
        LOG_ONCE.call_once(|| {
            let bridge: &'static PyLogBridge = Box::leak(Box::new(PyLogBridge { level, logging }));
            if log::set_logger(bridge).is_ok() {
                log::set_max_level(level);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level(Some("debug")), Some(LevelFilter::Debug));
        assert_eq!(parse_level(Some("WARN")), Some(LevelFilter::Warn));
        assert_eq!(parse_level(Some("loud")), None);
        assert_eq!(parse_level(None), None);
    }

    #[test]
    fn test_python_level_numbers() {
        assert_eq!(python_level(log::Level::Error), 40);
        assert_eq!(python_level(log::Level::Info), 20);
        assert_eq!(python_level(log::Level::Trace), 5);
    }

    #[test]
    fn test_python_logger_name() {
        assert_eq!(python_logger_name("hrv_link::session"), "hrv_link.session");
        assert_eq!(python_logger_name("hrv_link"), "hrv_link");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_with_level(Some("debug"));
        init_with_level(Some("trace"));
        log::debug!("logging initialised twice without panicking");
    }
}
