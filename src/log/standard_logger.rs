use log::Record;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::runtime::ConfigBuilder;
use log4rs::config::{Appender, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::encode::{Encode, Write};
use log4rs::Config;

use crate::log::LogConfiguration;

// ISO 8601 timestamp, color coded level, target module
const DEFAULT_LOG_PATTERN: &str = "{d(%Y-%m-%dT%H:%M:%SZ)} {h({l})} {t} - {m}{n}";

/// Clears the current console line before each record so log output does not
/// interleave with the accepted-paths progress bar.
#[derive(Debug)]
struct ClearLineEncoder {
    inner: PatternEncoder,
}

impl Encode for ClearLineEncoder {
    fn encode(&self, w: &mut dyn Write, record: &Record) -> anyhow::Result<()> {
        #[cfg(feature = "progress_bar")]
        w.write_all("\x1B[2K\r".as_bytes())?;
        self.inner.encode(w, record)
    }
}

impl LogConfiguration {
    /// Installs (or reconfigures) the global `log4rs` logger to match this configuration.
    pub(in crate::log) fn set_config(&mut self) {
        let encoder = ClearLineEncoder {
            inner: PatternEncoder::new(DEFAULT_LOG_PATTERN),
        };
        let stdout = ConsoleAppender::builder().encoder(Box::new(encoder)).build();
        let mut config: ConfigBuilder =
            Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));

        for (module, level) in &self.module_levels {
            config = config.logger(Logger::builder().build(module.clone(), *level));
        }

        let root = Root::builder()
            .appender("stdout")
            .build(self.global_log_level);
        let new_config = match config.build(root) {
            Err(e) => {
                panic!("failed to build config: {e}");
            }
            Ok(config) => config,
        };

        match self.root_handle {
            Some(ref mut handle) => handle.set_config(new_config),
            None => match log4rs::init_config(new_config) {
                Ok(handle) => self.root_handle = Some(handle),
                // Another logger was installed by the embedding application.
                Err(e) => {
                    eprintln!("logger already installed: {e}");
                    log::set_max_level(self.global_log_level);
                }
            },
        }
    }
}
