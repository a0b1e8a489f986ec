//! Modify the logging configuration of the profile daemon to enable debug logging.
//!
//! Logs are written either to stderr through `env_logger` or to syslog. The output is set up
//! once; only the level changes afterwards.
use log::LevelFilter;
use syslog::{BasicLogger, Error, Facility, Formatter3164};

use log_panics;

/// API to modify log levels that is exposed via RPC.
pub trait IBluetoothLogging {
    /// Check whether debug logging is enabled.
    fn is_debug_enabled(&self) -> bool;

    /// Change whether debug logging is enabled.
    fn set_debug_logging(&mut self, enabled: bool);
}

/// Logging related implementation.
pub struct BluetoothLogging {
    /// Should debug logs be emitted?
    is_debug: bool,

    /// If this flag is not set, `VERBOSE_ONLY_MODULES` will only emit up to `INFO` on stderr.
    /// Verbose debug also turns on trace logs. This can only be configured in the constructor.
    is_verbose_debug: bool,

    /// Log to stderr?
    is_stderr: bool,

    /// Is logging already initialized?
    is_initialized: bool,
}

const VERBOSE_ONLY_MODULES: &[&str] = &[
    "bt_device_profile::device_profile_manager", // Per-message dispatch
    "bt_device_profile::incoming_state_store",   // Access record file writes
];

impl BluetoothLogging {
    pub fn new(is_debug: bool, is_verbose_debug: bool, log_output: &str) -> Self {
        let is_stderr = log_output == "stderr";
        Self { is_debug, is_verbose_debug, is_stderr, is_initialized: false }
    }

    pub fn initialize(&mut self) -> Result<(), Error> {
        if self.is_stderr {
            let mut builder = env_logger::Builder::new();
            builder.filter(None, LevelFilter::Trace);
            if !self.is_verbose_debug {
                for module in VERBOSE_ONLY_MODULES {
                    builder.filter(Some(module), LevelFilter::Info);
                }
            }
            if let Err(e) = builder.try_init() {
                eprintln!("Logger already set: {}", e);
            }
        } else {
            let formatter = Formatter3164 {
                facility: Facility::LOG_USER,
                hostname: None,
                process: "btprofiled".into(),
                pid: 0,
            };

            let logger = syslog::unix(formatter)?;
            let _ = log::set_boxed_logger(Box::new(BasicLogger::new(logger)));
            log_panics::init();
        }

        log::set_max_level(self.get_level());
        self.is_initialized = true;
        Ok(())
    }

    fn get_level(&self) -> LevelFilter {
        if self.is_debug {
            if self.is_verbose_debug {
                LevelFilter::Trace
            } else {
                LevelFilter::Debug
            }
        } else {
            LevelFilter::Info
        }
    }
}

impl IBluetoothLogging for BluetoothLogging {
    fn is_debug_enabled(&self) -> bool {
        self.is_initialized && self.is_debug
    }

    fn set_debug_logging(&mut self, enabled: bool) {
        if !self.is_initialized {
            return;
        }

        self.is_debug = enabled;
        log::set_max_level(self.get_level());

        // Mark the start of debug logging with a debug print.
        if self.is_debug {
            log::debug!("Debug logging successfully enabled!");
        }

        log::info!("Setting debug logging to {}", self.is_debug);
    }
}
