//! Diagnostic logging for the simulator. This is not to be confused with the CSV reports and
//! checkpoints, which are model outputs.
//!
//! The five `log` macros are re-exported here: `error!`, `warn!`, `info!`, `debug!` and
//! `trace!`. Logging is _disabled_ by default; the command line front end turns it on with
//! `--log-level <level>`, and library users can call:
//!
//!  - `enable_logging()`: turns on all log messages
//!  - `disable_logging()`: turns off all log messages
//!  - `set_log_level(level: LevelFilter)`: enables only log messages with priority at least `level`
//!
//! Per-module filters can be layered on top of the global level:
//!
//! ```rust
//! use tiered_seir::log::{set_log_level, set_module_filter, LevelFilter};
//!
//! set_log_level(LevelFilter::Info);
//! // The day loop is chatty at `debug`; silence it.
//! set_module_filter("tiered_seir::replication", LevelFilter::Warn);
//! ```
#[cfg(feature = "logging")]
mod standard_logger;

#[cfg(not(feature = "logging"))]
mod null_logger;

pub use log::{debug, error, info, trace, warn, LevelFilter};

use std::collections::HashMap;
use std::sync::LazyLock;
use std::sync::{Mutex, MutexGuard};

#[cfg(feature = "logging")]
use log4rs::Handle;

const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Off;

static LOG_CONFIGURATION: LazyLock<Mutex<LogConfiguration>> = LazyLock::new(Mutex::default);

/// Global level plus per-module overrides, keyed by module path
/// (e.g. `"tiered_seir::sample_paths"`).
#[derive(Debug)]
pub(in crate::log) struct LogConfiguration {
    pub(in crate::log) global_log_level: LevelFilter,
    pub(in crate::log) module_levels: HashMap<String, LevelFilter>,

    #[cfg(feature = "logging")]
    root_handle: Option<Handle>,
}

impl Default for LogConfiguration {
    fn default() -> Self {
        Self {
            global_log_level: DEFAULT_LOG_LEVEL,
            module_levels: HashMap::new(),
            #[cfg(feature = "logging")]
            root_handle: None,
        }
    }
}

impl LogConfiguration {
    fn set_log_level(&mut self, level: LevelFilter) {
        self.global_log_level = level;
        self.set_config();
    }

    fn set_module_filter(&mut self, module: &str, level: LevelFilter) {
        if self.module_levels.get(module) == Some(&level) {
            return;
        }
        self.module_levels.insert(module.to_string(), level);
        self.set_config();
    }

    fn remove_module_filter(&mut self, module: &str) {
        if self.module_levels.remove(module).is_some() {
            self.set_config();
        }
    }
}

/// Enables all log messages. Equivalent to `set_log_level(LevelFilter::Trace)`.
pub fn enable_logging() {
    set_log_level(LevelFilter::Trace);
}

/// Disables logging completely. Equivalent to `set_log_level(LevelFilter::Off)`.
pub fn disable_logging() {
    set_log_level(LevelFilter::Off);
}

/// Sets the global log level. `LevelFilter::Off` disables logging.
pub fn set_log_level(level: LevelFilter) {
    get_log_configuration().set_log_level(level);
}

/// Sets a level filter for the given module path.
pub fn set_module_filter(module_path: &str, level: LevelFilter) {
    get_log_configuration().set_module_filter(module_path, level);
}

/// Removes a module-specific level filter; the global level applies again.
pub fn remove_module_filter(module_path: &str) {
    get_log_configuration().remove_module_filter(module_path);
}

fn get_log_configuration() -> MutexGuard<'static, LogConfiguration> {
    LOG_CONFIGURATION.lock().expect("Mutex poisoned")
}

#[cfg(test)]
mod tests {
    use super::{get_log_configuration, remove_module_filter, set_log_level, set_module_filter};
    use log::{error, trace, LevelFilter};
    use std::sync::{LazyLock, Mutex};

    // Logging state is global; run these serially.
    static TEST_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(Mutex::default);

    #[test]
    fn test_set_log_level() {
        let _guard = TEST_MUTEX.lock().expect("Mutex poisoned");
        set_log_level(LevelFilter::Error);
        {
            let config = get_log_configuration();
            assert_eq!(config.global_log_level, LevelFilter::Error);
            error!("test_set_log_level: global set to error");
            trace!("test_set_log_level: NOT EMITTED");
        }
        set_log_level(LevelFilter::Trace);
        assert_eq!(
            get_log_configuration().global_log_level,
            LevelFilter::Trace
        );
        set_log_level(LevelFilter::Off);
    }

    #[test]
    fn test_set_remove_module_filter() {
        let _guard = TEST_MUTEX.lock().expect("Mutex poisoned");
        set_module_filter("tiered_seir::engine", LevelFilter::Debug);
        assert_eq!(
            get_log_configuration()
                .module_levels
                .get("tiered_seir::engine"),
            Some(&LevelFilter::Debug)
        );

        remove_module_filter("tiered_seir::engine");
        assert!(get_log_configuration()
            .module_levels
            .get("tiered_seir::engine")
            .is_none());
    }
}
