//! Timing parameters of the device profile state machine.

use log::{info, warn};
use serde_json::{json, Value};
use std::fs::File;
use std::io::{Read, Result};
use std::time::Duration;

/// Default location of the optional override file.
pub const CONFIG_FILE: &str = "/var/lib/bluetooth/device_profile.json";

const CONNECT_OTHER_PROFILES_DELAY_MS: u64 = 4000;
const ACCESS_REQUEST_TIMEOUT_MS: u64 = 7000;
const UNPAIR_COMPLETE_DELAY_MS: u64 = 2000; // Unbonding in the lower stack is not instant.
const INIT_REJECT_WINDOW_MS: i64 = 1000;
const MAX_REJECT_WINDOW_MS: i64 = 4 * 3600 * 1000;
const REJECT_WINDOW_GROWTH: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileStateConfig {
    /// Delay before connecting the sibling profile after an accepted incoming connection.
    pub connect_other_profiles_delay: Duration,
    /// How long the user has to answer an access prompt.
    pub access_request_timeout: Duration,
    /// Delay between the unbond call and lifting the unpairing guard.
    pub unpair_complete_delay: Duration,
    /// Shortest reject window, also used after any accept.
    pub init_reject_window_ms: i64,
    /// Ceiling of the reject window.
    pub max_reject_window_ms: i64,
    /// Factor applied to the reject window on each silent reject.
    pub reject_window_growth: i64,
}

impl Default for ProfileStateConfig {
    fn default() -> Self {
        ProfileStateConfig {
            connect_other_profiles_delay: Duration::from_millis(CONNECT_OTHER_PROFILES_DELAY_MS),
            access_request_timeout: Duration::from_millis(ACCESS_REQUEST_TIMEOUT_MS),
            unpair_complete_delay: Duration::from_millis(UNPAIR_COMPLETE_DELAY_MS),
            init_reject_window_ms: INIT_REJECT_WINDOW_MS,
            max_reject_window_ms: MAX_REJECT_WINDOW_MS,
            reject_window_growth: REJECT_WINDOW_GROWTH,
        }
    }
}

impl ProfileStateConfig {
    /// Loads the config from `path`. Any failure leaves the defaults in place.
    pub fn load(path: &str) -> ProfileStateConfig {
        let mut config = ProfileStateConfig::default();
        if let Err(e) = config.load_file(path) {
            warn!("Failed to load device profile config {}: {}", path, e);
        }
        config
    }

    fn load_file(&mut self, path: &str) -> Result<()> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let json = serde_json::from_str::<Value>(contents.as_str())?;
        if self.load_from_json(&json).is_some() {
            info!("Load settings from {} successfully", path);
        }
        Ok(())
    }

    /// Overrides the fields present in `json`. Returns None if `json` is not an object.
    pub fn load_from_json(&mut self, json: &Value) -> Option<bool> {
        let obj = json.as_object()?;
        let millis = |key: &str| obj.get(key).and_then(Value::as_u64);

        if let Some(ms) = millis("connect_other_profiles_delay_ms") {
            self.connect_other_profiles_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = millis("access_request_timeout_ms") {
            self.access_request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = millis("unpair_complete_delay_ms") {
            self.unpair_complete_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = millis("init_reject_window_ms").filter(|ms| *ms > 0) {
            self.init_reject_window_ms = ms as i64;
        }
        if let Some(ms) = millis("max_reject_window_ms") {
            self.max_reject_window_ms = ms as i64;
        }
        if let Some(growth) = millis("reject_window_growth").filter(|g| *g > 1) {
            self.reject_window_growth = growth as i64;
        }

        if self.max_reject_window_ms < self.init_reject_window_ms {
            warn!(
                "max_reject_window_ms {} below init window {}, clamping",
                self.max_reject_window_ms, self.init_reject_window_ms
            );
            self.max_reject_window_ms = self.init_reject_window_ms;
        }
        Some(true)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "connect_other_profiles_delay_ms": self.connect_other_profiles_delay.as_millis() as u64,
            "access_request_timeout_ms": self.access_request_timeout.as_millis() as u64,
            "unpair_complete_delay_ms": self.unpair_complete_delay.as_millis() as u64,
            "init_reject_window_ms": self.init_reject_window_ms,
            "max_reject_window_ms": self.max_reject_window_ms,
            "reject_window_growth": self.reject_window_growth,
        })
    }
}
