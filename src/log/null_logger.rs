//! Backend used when the `logging` feature is off: nothing is printed, but the `log` max level
//! still tracks the configured global level so disabled macros stay cheap.

use crate::log::LogConfiguration;

impl LogConfiguration {
    pub(in crate::log) fn set_config(&mut self) {
        log::set_max_level(self.global_log_level);
    }
}
