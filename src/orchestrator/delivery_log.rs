//! Delivery status per tracking number, persisted as a JSON array.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::orchestrator::message::now_ms;
use crate::orchestrator::persist::{StateBus, read_json_items, write_json};

pub const DELIVERY_FILE: &str = "deliveries.json";

/// Lifecycle of a delivery, in the order it progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeliveryStatus {
    #[serde(rename = "expected soon")]
    ExpectedSoon,
    #[serde(rename = "out for delivery")]
    OutForDelivery,
    #[serde(rename = "delivering")]
    Delivering,
    #[serde(rename = "delivered")]
    Delivered,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryStatus::ExpectedSoon => "expected soon",
            DeliveryStatus::OutForDelivery => "out for delivery",
            DeliveryStatus::Delivering => "delivering",
            DeliveryStatus::Delivered => "delivered",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub tracking: String,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Last status write, Unix milliseconds.
    #[serde(default)]
    pub updated: i64,
}

/// Why an admin removal was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveError {
    NotFound,
    AlreadyDelivered,
}

impl fmt::Display for RemoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoveError::NotFound => write!(f, "Delivery not found"),
            RemoveError::AlreadyDelivered => write!(f, "Delivered entries cannot be deleted"),
        }
    }
}

impl std::error::Error for RemoveError {}

pub struct DeliveryLog {
    path: PathBuf,
    retention_ms: i64,
    bus: StateBus,
    lock: Mutex<()>,
}

impl DeliveryLog {
    pub fn new(dir: &Path, retention: Duration, bus: StateBus) -> Self {
        Self {
            path: dir.join(DELIVERY_FILE),
            retention_ms: i64::try_from(retention.as_millis()).unwrap_or(i64::MAX),
            bus,
            lock: Mutex::new(()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cleanup(&self) {
        let _guard = self.guard();
        self.cleanup_locked();
    }

    /// Record a status for a tracking number.
    ///
    /// Creates the record on first write. Statuses only move forward; an
    /// older status for an existing record is ignored. A given chat id
    /// replaces the stored one.
    pub fn set_status(&self, tracking: &str, status: DeliveryStatus, chat_id: Option<&str>) {
        if tracking.is_empty() {
            return;
        }
        let _guard = self.guard();
        let mut list = self.cleanup_locked();
        let now = now_ms();

        match list.iter_mut().find(|d| d.tracking == tracking) {
            Some(existing) => {
                if status < existing.status {
                    debug!("Ignoring {status} for {tracking}, already {}", existing.status);
                    return;
                }
                existing.status = status;
                if let Some(chat_id) = chat_id {
                    existing.chat_id = Some(chat_id.to_string());
                }
                existing.updated = now;
            }
            None => list.push(DeliveryRecord {
                tracking: tracking.to_string(),
                status,
                chat_id: chat_id.map(str::to_string),
                updated: now,
            }),
        }

        self.save(&list);
        info!("📦 {tracking} is now {status}");
        self.bus.emit();
    }

    pub fn get(&self, tracking: &str) -> Option<DeliveryRecord> {
        let _guard = self.guard();
        self.cleanup_locked().into_iter().find(|d| d.tracking == tracking)
    }

    /// All records, most recently updated first.
    pub fn list(&self) -> Vec<DeliveryRecord> {
        let _guard = self.guard();
        let mut list = self.cleanup_locked();
        list.sort_by(|a, b| b.updated.cmp(&a.updated));
        list
    }

    /// Tracking numbers recorded for a chat that are not yet delivered.
    pub fn open_for_chat(&self, chat_id: &str) -> Vec<String> {
        let _guard = self.guard();
        self.cleanup_locked()
            .into_iter()
            .filter(|d| d.status != DeliveryStatus::Delivered && d.chat_id.as_deref() == Some(chat_id))
            .map(|d| d.tracking)
            .collect()
    }

    /// Delete a record ahead of retention. Delivered records are kept.
    pub fn remove(&self, tracking: &str) -> Result<DeliveryRecord, RemoveError> {
        let _guard = self.guard();
        let mut list = self.cleanup_locked();
        let index = list
            .iter()
            .position(|d| d.tracking == tracking)
            .ok_or(RemoveError::NotFound)?;
        if list[index].status == DeliveryStatus::Delivered {
            return Err(RemoveError::AlreadyDelivered);
        }
        let removed = list.remove(index);
        self.save(&list);
        info!("🗑️ Removed delivery {tracking}");
        self.bus.emit();
        Ok(removed)
    }

    fn cleanup_locked(&self) -> Vec<DeliveryRecord> {
        let now = now_ms();
        let (list, dropped): (Vec<DeliveryRecord>, bool) = read_json_items(&self.path);
        let before = list.len();
        let cleaned: Vec<DeliveryRecord> = list
            .into_iter()
            .filter(|d| !(d.status == DeliveryStatus::Delivered && now - d.updated > self.retention_ms))
            .collect();
        if dropped || cleaned.len() != before {
            debug!("Pruned {} delivered entries", before - cleaned.len());
            self.save(&cleaned);
            self.bus.emit();
        }
        cleaned
    }

    fn save(&self, list: &[DeliveryRecord]) {
        if let Err(e) = write_json(&self.path, &list) {
            error!("Failed to save deliveries: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::persist::read_json;
    use serde_json::json;
    use tempfile::TempDir;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn log(dir: &TempDir) -> DeliveryLog {
        DeliveryLog::new(dir.path(), Duration::from_millis(DAY_MS as u64), StateBus::new())
    }

    #[test]
    fn test_retention_prunes_only_old_delivered() {
        let dir = TempDir::new().unwrap();
        let now = now_ms();
        std::fs::write(
            dir.path().join(DELIVERY_FILE),
            json!([
                { "tracking": "OLD", "status": "delivered", "updated": now - 3 * DAY_MS },
                { "tracking": "FRESH", "status": "delivered", "updated": now - DAY_MS / 4 },
                { "tracking": "ACTIVE", "status": "out for delivery", "updated": now - 10 * DAY_MS }
            ])
            .to_string(),
        )
        .unwrap();

        let deliveries = log(&dir);
        let list = deliveries.list();
        let trackings: Vec<&str> = list.iter().map(|d| d.tracking.as_str()).collect();
        assert_eq!(trackings, vec!["FRESH", "ACTIVE"]);

        let persisted: Vec<DeliveryRecord> = read_json(&dir.path().join(DELIVERY_FILE));
        assert_eq!(persisted.len(), 2);
        assert!(persisted.iter().all(|d| d.tracking != "OLD"));
    }

    #[test]
    fn test_bad_record_is_dropped_alone() {
        let dir = TempDir::new().unwrap();
        let now = now_ms();
        std::fs::write(
            dir.path().join(DELIVERY_FILE),
            json!([
                { "tracking": "GOOD", "status": "out for delivery", "chatId": "c1", "updated": now },
                { "tracking": "BAD", "status": "lost in space", "updated": now },
                { "tracking": "WORSE", "status": "delivered", "updated": null }
            ])
            .to_string(),
        )
        .unwrap();

        let deliveries = log(&dir);
        assert_eq!(deliveries.open_for_chat("c1"), vec!["GOOD".to_string()]);

        deliveries.set_status("NEW", DeliveryStatus::ExpectedSoon, None);
        let persisted: Vec<DeliveryRecord> = read_json(&dir.path().join(DELIVERY_FILE));
        let trackings: Vec<&str> = persisted.iter().map(|d| d.tracking.as_str()).collect();
        assert_eq!(trackings, vec!["GOOD", "NEW"]);
    }

    #[test]
    fn test_status_progression() {
        let dir = TempDir::new().unwrap();
        let deliveries = log(&dir);
        deliveries.set_status("T1", DeliveryStatus::ExpectedSoon, None);
        assert_eq!(deliveries.get("T1").unwrap().chat_id, None);

        deliveries.set_status("T1", DeliveryStatus::OutForDelivery, Some("chat-1"));
        let record = deliveries.get("T1").unwrap();
        assert_eq!(record.status, DeliveryStatus::OutForDelivery);
        assert_eq!(record.chat_id.as_deref(), Some("chat-1"));

        deliveries.set_status("T1", DeliveryStatus::ExpectedSoon, None);
        assert_eq!(deliveries.get("T1").unwrap().status, DeliveryStatus::OutForDelivery);

        deliveries.set_status("T1", DeliveryStatus::Delivered, None);
        let record = deliveries.get("T1").unwrap();
        assert_eq!(record.status, DeliveryStatus::Delivered);
        assert_eq!(record.chat_id.as_deref(), Some("chat-1"));
    }

    #[test]
    fn test_status_serializes_with_spaces() {
        let record = DeliveryRecord {
            tracking: "T1".into(),
            status: DeliveryStatus::OutForDelivery,
            chat_id: Some("c".into()),
            updated: 5,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({ "tracking": "T1", "status": "out for delivery", "chatId": "c", "updated": 5 }));
    }

    #[test]
    fn test_open_for_chat_skips_delivered() {
        let dir = TempDir::new().unwrap();
        let deliveries = log(&dir);
        deliveries.set_status("A", DeliveryStatus::OutForDelivery, Some("c1"));
        deliveries.set_status("B", DeliveryStatus::Delivered, Some("c1"));
        deliveries.set_status("C", DeliveryStatus::OutForDelivery, Some("c2"));
        assert_eq!(deliveries.open_for_chat("c1"), vec!["A".to_string()]);
    }

    #[test]
    fn test_remove_rules() {
        let dir = TempDir::new().unwrap();
        let deliveries = log(&dir);
        deliveries.set_status("A", DeliveryStatus::ExpectedSoon, None);
        deliveries.set_status("B", DeliveryStatus::Delivered, None);

        assert_eq!(deliveries.remove("missing"), Err(RemoveError::NotFound));
        assert_eq!(deliveries.remove("B"), Err(RemoveError::AlreadyDelivered));
        assert_eq!(deliveries.remove("A").unwrap().tracking, "A");
        assert!(deliveries.get("A").is_none());
    }

    #[test]
    fn test_list_newest_first() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(DELIVERY_FILE),
            json!([
                { "tracking": "A", "status": "expected soon", "updated": 1 },
                { "tracking": "B", "status": "expected soon", "updated": 3 },
                { "tracking": "C", "status": "expected soon", "updated": 2 }
            ])
            .to_string(),
        )
        .unwrap();
        let list = log(&dir).list();
        let trackings: Vec<&str> = list.iter().map(|d| d.tracking.as_str()).collect();
        assert_eq!(trackings, vec!["B", "C", "A"]);
    }
}
