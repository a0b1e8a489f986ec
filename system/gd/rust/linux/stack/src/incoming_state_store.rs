//! File-backed storage of per-device incoming access records.

use log::{info, warn};
use num_traits::cast::{FromPrimitive, ToPrimitive};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Result, Write};
use std::sync::{Arc, Mutex};

use crate::incoming_access::{IncomingAccessRecord, RejectWindow, Trust};

/// Default location of the access record file.
pub const INCOMING_STATE_FILE: &str = "/var/lib/bluetooth/incoming_state.json";

/// Store handle shared by the device manager and the bond controller.
pub type SharedIncomingStateStore = Arc<Mutex<IncomingStateStore>>;

/// Access records keyed by device address, persisted as a JSON object of
/// `{"<address>": {"trust": <i32>, "window": "<timestamp>-<durationMillis>"}}`.
pub struct IncomingStateStore {
    path: String,
    records: HashMap<String, IncomingAccessRecord>,
}

impl IncomingStateStore {
    /// Opens the store at `path`. A missing or unreadable file starts an empty store.
    pub fn new(path: &str) -> IncomingStateStore {
        let mut store = IncomingStateStore { path: path.to_string(), records: HashMap::new() };
        if let Err(e) = store.load_config() {
            warn!("Failed to load incoming state from {}: {}", path, e);
        }
        store
    }

    pub fn get(&self, address: &str) -> Option<IncomingAccessRecord> {
        self.records.get(address).copied()
    }

    pub fn set(&mut self, address: &str, record: &IncomingAccessRecord) {
        if self.records.get(address) == Some(record) {
            return;
        }
        self.records.insert(address.to_string(), *record);
        if let Err(e) = self.write_config() {
            warn!("Failed to write incoming state to {}: {}", self.path, e);
        }
    }

    pub fn remove(&mut self, address: &str) {
        if self.records.remove(address).is_some() {
            if let Err(e) = self.write_config() {
                warn!("Failed to write incoming state to {}: {}", self.path, e);
            }
        }
    }

    fn load_config(&mut self) -> Result<()> {
        let mut file = File::open(&self.path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let json = serde_json::from_str::<Value>(contents.as_str())?;
        if let Some(_res) = self.load_config_from_json(&json) {
            info!("Load incoming state from {} successfully", &self.path);
        }
        Ok(())
    }

    fn load_config_from_json(&mut self, json: &Value) -> Option<bool> {
        for (address, value) in json.as_object()? {
            match record_from_json(value) {
                Some(record) => {
                    self.records.insert(address.clone(), record);
                }
                None => warn!("Dropping malformed incoming state for {}", address),
            }
        }
        Some(true)
    }

    fn write_config(&self) -> Result<()> {
        let mut f = File::create(&self.path)?;
        f.write_all(self.get_config_string().as_bytes()).and_then(|_| {
            info!("Write incoming state into {} successfully", &self.path);
            Ok(())
        })
    }

    fn get_config_string(&self) -> String {
        let records: Map<String, Value> = self
            .records
            .iter()
            .map(|(address, record)| (address.clone(), record_to_json(record)))
            .collect();
        serde_json::to_string_pretty(&Value::Object(records)).unwrap_or_default()
    }
}

fn record_to_json(record: &IncomingAccessRecord) -> Value {
    json!({
        "trust": record.trust.to_i32().unwrap_or(-1),
        "window": record.window.to_string(),
    })
}

/// A window that does not parse is read back as no window at all.
fn record_from_json(value: &Value) -> Option<IncomingAccessRecord> {
    let trust = Trust::from_i64(value.get("trust")?.as_i64()?)?;
    let window = value
        .get("window")
        .and_then(Value::as_str)
        .and_then(|w| w.parse::<RejectWindow>().ok())
        .unwrap_or(RejectWindow { start_ms: 0, duration_ms: 0 });
    Some(IncomingAccessRecord { trust, window })
}
