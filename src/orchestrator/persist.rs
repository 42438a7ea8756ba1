//! Whole-file JSON persistence and the state-change bus.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::broadcast;
use tracing::warn;

/// Read a JSON file; a missing or unreadable file yields the default value.
pub fn read_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return T::default(),
    };
    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to parse {}: {e}", path.display());
            T::default()
        }
    }
}

/// Read a JSON object entry by entry, dropping values that do not parse.
///
/// The flag is true when anything was dropped, so the caller can write the
/// cleaned map back.
pub fn read_json_entries<T: DeserializeOwned>(path: &Path) -> (BTreeMap<String, T>, bool) {
    let raw: BTreeMap<String, Value> = read_json(path);
    let mut dropped = false;
    let entries = raw
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(entry) => Some((key, entry)),
            Err(e) => {
                warn!("Dropping bad entry {key} in {}: {e}", path.display());
                dropped = true;
                None
            }
        })
        .collect();
    (entries, dropped)
}

/// Read a JSON array item by item, dropping items that do not parse.
pub fn read_json_items<T: DeserializeOwned>(path: &Path) -> (Vec<T>, bool) {
    let raw: Vec<Value> = read_json(path);
    let mut dropped = false;
    let items = raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Dropping bad entry in {}: {e}", path.display());
                dropped = true;
                None
            }
        })
        .collect();
    (items, dropped)
}

/// Write a JSON file through a temp file and rename.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let json = serde_json::to_string(value).map_err(|e| format!("Failed to serialize: {e}"))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| format!("Failed to write {}: {e}", tmp.display()))?;
    std::fs::rename(&tmp, path).map_err(|e| format!("Failed to replace {}: {e}", path.display()))
}

/// Process-wide "stores changed" signal, consumed by the dashboard stream.
#[derive(Clone)]
pub struct StateBus {
    tx: broadcast::Sender<()>,
}

impl StateBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn emit(&self) {
        // No subscribers is the normal case outside the dashboard.
        let _ = self.tx.send(());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

impl Default for StateBus {
    fn default() -> Self {
        Self::new()
    }
}
