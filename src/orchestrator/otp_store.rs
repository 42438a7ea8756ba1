//! OTP codes per tracking number and tracking numbers per phone.
//!
//! Both maps live in JSON files under the session directory and are read
//! whole on every call. Each call first drops OTPs older than the retention
//! window, then any association pointing at a tracking number that no
//! longer has an OTP, then phones left with nothing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::orchestrator::message::now_ms;
use crate::orchestrator::persist::{StateBus, read_json_entries, write_json};

pub const OTP_FILE: &str = "otps.json";
pub const TRACKING_MAP_FILE: &str = "tracking-map.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpRecord {
    #[serde(default)]
    pub otp: String,
    /// Capture time, Unix milliseconds.
    #[serde(default)]
    pub timestamp: i64,
}

pub type OtpMap = BTreeMap<String, OtpRecord>;
pub type TrackingMap = BTreeMap<String, Vec<String>>;

/// Outcome of looking up an OTP for a phone without a tracking number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpResolution {
    NoneAvailable,
    /// Unambiguous tracking number to deliver.
    Match(String),
    /// Candidates the requester has to pick from.
    Choose(Vec<String>),
}

pub struct OtpStore {
    otp_path: PathBuf,
    map_path: PathBuf,
    retention_ms: i64,
    bus: StateBus,
    lock: Mutex<()>,
}

impl OtpStore {
    pub fn new(dir: &Path, retention: Duration, bus: StateBus) -> Self {
        Self {
            otp_path: dir.join(OTP_FILE),
            map_path: dir.join(TRACKING_MAP_FILE),
            retention_ms: i64::try_from(retention.as_millis()).unwrap_or(i64::MAX),
            bus,
            lock: Mutex::new(()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run the expiry pass on its own (used at start-up).
    pub fn cleanup_expired(&self) {
        let _guard = self.guard();
        self.cleanup_locked();
    }

    /// Create or overwrite the OTP for a tracking number.
    pub fn save_otp(&self, tracking: &str, otp: &str) {
        let _guard = self.guard();
        let (mut otps, _) = self.load_otps();
        otps.insert(tracking.to_string(), OtpRecord { otp: otp.to_string(), timestamp: now_ms() });
        self.save_otps(&otps);
        info!("🔑 Saved OTP for {tracking}");
        self.cleanup_locked();
        self.bus.emit();
    }

    /// Link a tracking number to a phone, keeping insertion order.
    pub fn associate_tracking(&self, phone: &str, tracking: &str) {
        let _guard = self.guard();
        let (mut map, _) = self.load_map();
        let trackings = map.entry(phone.to_string()).or_default();
        if !trackings.iter().any(|t| t == tracking) {
            trackings.push(tracking.to_string());
        }
        self.save_map(&map);
        info!("🔗 Associated {tracking} with {phone}");
        self.cleanup_locked();
        self.bus.emit();
    }

    pub fn get_otp(&self, tracking: &str) -> Option<String> {
        let _guard = self.guard();
        let (otps, _) = self.cleanup_locked();
        otps.get(tracking).map(|r| r.otp.clone())
    }

    /// Remove an OTP; associations pointing at it go with the cleanup pass.
    pub fn remove_otp(&self, tracking: &str) -> bool {
        let _guard = self.guard();
        let (mut otps, _) = self.load_otps();
        if otps.remove(tracking).is_none() {
            return false;
        }
        self.save_otps(&otps);
        self.cleanup_locked();
        self.bus.emit();
        true
    }

    pub fn remove_tracking_for_phone(&self, phone: &str, tracking: &str) {
        let _guard = self.guard();
        let (mut map, _) = self.load_map();
        let Some(trackings) = map.get_mut(phone) else { return };
        trackings.retain(|t| t != tracking);
        if trackings.is_empty() {
            map.remove(phone);
        }
        self.save_map(&map);
        self.bus.emit();
    }

    /// Remove a tracking number's OTP and every association to it.
    pub fn clear_tracking(&self, tracking: &str) -> bool {
        if tracking.is_empty() {
            return false;
        }
        let _guard = self.guard();

        let (mut otps, dropped) = self.load_otps();
        let otp_changed = otps.remove(tracking).is_some();
        if otp_changed || dropped {
            self.save_otps(&otps);
        }

        let (mut map, mut map_changed) = self.load_map();
        map.retain(|_, trackings| {
            let before = trackings.len();
            trackings.retain(|t| t != tracking);
            map_changed |= trackings.len() != before;
            !trackings.is_empty()
        });
        if map_changed {
            self.save_map(&map);
        }

        if otp_changed || map_changed {
            self.bus.emit();
        }
        otp_changed || map_changed
    }

    pub fn trackings_for_phone(&self, phone: &str) -> Vec<String> {
        let _guard = self.guard();
        let (_, map) = self.cleanup_locked();
        map.get(phone).cloned().unwrap_or_default()
    }

    pub fn all_otps(&self) -> OtpMap {
        let _guard = self.guard();
        self.cleanup_locked().0
    }

    pub fn tracking_map(&self) -> TrackingMap {
        let _guard = self.guard();
        self.cleanup_locked().1
    }

    #[cfg(test)]
    pub fn unpaired_trackings(&self) -> Vec<String> {
        let _guard = self.guard();
        let (otps, map) = self.cleanup_locked();
        unpaired(&otps, &map)
    }

    /// Pick the OTP a phone is asking for, see [`resolve_otp`].
    pub fn resolve(&self, phone: &str) -> OtpResolution {
        let _guard = self.guard();
        let (otps, map) = self.cleanup_locked();
        resolve_otp(&otps, &map, phone)
    }

    fn cleanup_locked(&self) -> (OtpMap, TrackingMap) {
        let now = now_ms();
        let (mut otps, dropped) = self.load_otps();
        let before = otps.len();
        otps.retain(|tracking, record| {
            let keep = now - record.timestamp <= self.retention_ms;
            if !keep {
                debug!("OTP for {tracking} expired");
            }
            keep
        });
        let otps_changed = dropped || otps.len() != before;

        let (mut map, mut map_changed) = self.load_map();
        map_changed |= prune_dangling(&mut map, &otps);

        if otps_changed {
            self.save_otps(&otps);
        }
        if map_changed {
            self.save_map(&map);
        }
        if otps_changed || map_changed {
            self.bus.emit();
        }
        (otps, map)
    }

    /// Records that fail to parse are dropped, not the whole file.
    fn load_otps(&self) -> (OtpMap, bool) {
        read_json_entries(&self.otp_path)
    }

    /// Load associations, dropping entries that are not lists of strings.
    fn load_map(&self) -> (TrackingMap, bool) {
        read_json_entries(&self.map_path)
    }

    fn save_otps(&self, otps: &OtpMap) {
        if let Err(e) = write_json(&self.otp_path, otps) {
            error!("Failed to save OTPs: {e}");
        }
    }

    fn save_map(&self, map: &TrackingMap) {
        if let Err(e) = write_json(&self.map_path, map) {
            error!("Failed to save tracking map: {e}");
        }
    }
}

fn prune_dangling(map: &mut TrackingMap, otps: &OtpMap) -> bool {
    let mut changed = false;
    map.retain(|_, trackings| {
        let before = trackings.len();
        trackings.retain(|t| otps.contains_key(t));
        changed |= trackings.len() != before;
        if trackings.is_empty() {
            changed = true;
            false
        } else {
            true
        }
    });
    changed
}

/// OTP-holding tracking numbers no phone is linked to, oldest capture first.
fn unpaired(otps: &OtpMap, map: &TrackingMap) -> Vec<String> {
    let paired: HashSet<&String> = map.values().flatten().collect();
    let mut candidates: Vec<(&String, &OtpRecord)> =
        otps.iter().filter(|(t, _)| !paired.contains(t)).collect();
    candidates.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then_with(|| a.0.cmp(b.0)));
    candidates.into_iter().map(|(t, _)| t.clone()).collect()
}

/// Deterministic OTP lookup for a phone.
///
/// 1. No OTPs at all: nothing to give.
/// 2. A single OTP overall: it is the one, whoever asks.
/// 3. The phone's own associations, first linked first.
/// 4. Unpaired OTPs are offered as a list, never guessed.
///
/// Associations only ever point at existing OTPs after cleanup, so a link
/// made before its OTP was captured is picked up by step 3 as soon as the
/// OTP lands.
pub fn resolve_otp(otps: &OtpMap, map: &TrackingMap, phone: &str) -> OtpResolution {
    if otps.is_empty() {
        return OtpResolution::NoneAvailable;
    }
    if otps.len() == 1 {
        if let Some(only) = otps.keys().next() {
            return OtpResolution::Match(only.clone());
        }
    }

    let associated = map
        .get(phone)
        .and_then(|trackings| trackings.iter().find(|t| otps.contains_key(*t)));
    if let Some(tracking) = associated {
        return OtpResolution::Match(tracking.clone());
    }

    let candidates = unpaired(otps, map);
    if candidates.is_empty() {
        OtpResolution::NoneAvailable
    } else {
        OtpResolution::Choose(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::persist::read_json;
    use serde_json::json;
    use tempfile::TempDir;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn store(dir: &TempDir) -> OtpStore {
        OtpStore::new(dir.path(), Duration::from_millis(DAY_MS as u64), StateBus::new())
    }

    fn record(otp: &str, timestamp: i64) -> OtpRecord {
        OtpRecord { otp: otp.to_string(), timestamp }
    }

    #[test]
    fn test_save_and_get() {
        let dir = TempDir::new().unwrap();
        let otps = store(&dir);
        otps.save_otp("ABC123", "9999");
        assert_eq!(otps.get_otp("ABC123").as_deref(), Some("9999"));

        otps.save_otp("ABC123", "1111");
        assert_eq!(otps.get_otp("ABC123").as_deref(), Some("1111"));

        assert!(otps.remove_otp("ABC123"));
        assert_eq!(otps.get_otp("ABC123"), None);
        assert!(!otps.remove_otp("ABC123"));
    }

    #[test]
    fn test_cleanup_removes_expired_codes_and_references() {
        let dir = TempDir::new().unwrap();
        let now = now_ms();
        std::fs::write(
            dir.path().join(OTP_FILE),
            json!({
                "OLD": { "otp": "1111", "timestamp": now - 2 * DAY_MS },
                "FRESH": { "otp": "2222", "timestamp": now }
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join(TRACKING_MAP_FILE),
            json!({ "1@c.us": ["OLD", "FRESH"], "2@c.us": ["OLD"], "3@c.us": "garbage" }).to_string(),
        )
        .unwrap();

        let otps = store(&dir);
        otps.cleanup_expired();

        let persisted: OtpMap = read_json(&dir.path().join(OTP_FILE));
        assert!(!persisted.contains_key("OLD"));
        assert_eq!(persisted["FRESH"].otp, "2222");

        let map = otps.tracking_map();
        assert_eq!(map.get("1@c.us"), Some(&vec!["FRESH".to_string()]));
        assert!(!map.contains_key("2@c.us"));
        assert!(!map.contains_key("3@c.us"));
    }

    #[test]
    fn test_bad_record_does_not_wipe_the_store() {
        let dir = TempDir::new().unwrap();
        let now = now_ms();
        std::fs::write(
            dir.path().join(OTP_FILE),
            json!({
                "GOOD": { "otp": "4321", "timestamp": now },
                "BAD": { "otp": "0000", "timestamp": null },
                "WORSE": { "otp": "0000", "timestamp": "yesterday" }
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join(TRACKING_MAP_FILE), json!({ "p": ["GOOD"] }).to_string()).unwrap();

        let otps = store(&dir);
        assert_eq!(otps.get_otp("GOOD").as_deref(), Some("4321"));
        assert_eq!(otps.trackings_for_phone("p"), vec!["GOOD".to_string()]);

        otps.save_otp("NEW", "1111");
        let persisted: OtpMap = read_json(&dir.path().join(OTP_FILE));
        assert_eq!(persisted.keys().collect::<Vec<_>>(), vec!["GOOD", "NEW"]);
    }

    #[test]
    fn test_association_without_otp_is_pruned() {
        let dir = TempDir::new().unwrap();
        let otps = store(&dir);
        otps.associate_tracking("1@c.us", "NOPE");
        assert!(otps.trackings_for_phone("1@c.us").is_empty());

        otps.save_otp("T1", "1234");
        otps.associate_tracking("1@c.us", "T1");
        otps.associate_tracking("1@c.us", "T1");
        assert_eq!(otps.trackings_for_phone("1@c.us"), vec!["T1".to_string()]);
    }

    #[test]
    fn test_clear_tracking_removes_otp_and_links() {
        let dir = TempDir::new().unwrap();
        let otps = store(&dir);
        otps.save_otp("T1", "1");
        otps.save_otp("T2", "2");
        otps.associate_tracking("a", "T1");
        otps.associate_tracking("a", "T2");
        otps.associate_tracking("b", "T1");

        assert!(otps.clear_tracking("T1"));
        assert_eq!(otps.get_otp("T1"), None);
        assert_eq!(otps.trackings_for_phone("a"), vec!["T2".to_string()]);
        assert!(otps.trackings_for_phone("b").is_empty());
        assert!(!otps.clear_tracking("T1"));
    }

    #[test]
    fn test_unpaired_in_capture_order() {
        let dir = TempDir::new().unwrap();
        let now = now_ms();
        std::fs::write(
            dir.path().join(OTP_FILE),
            json!({
                "ZZZ": { "otp": "1", "timestamp": now - 3000 },
                "AAA": { "otp": "2", "timestamp": now - 1000 },
                "MMM": { "otp": "3", "timestamp": now - 2000 }
            })
            .to_string(),
        )
        .unwrap();
        let otps = store(&dir);
        otps.associate_tracking("p", "MMM");
        assert_eq!(otps.unpaired_trackings(), vec!["ZZZ".to_string(), "AAA".to_string()]);
    }

    #[test]
    fn test_resolve_none_available() {
        assert_eq!(resolve_otp(&OtpMap::new(), &TrackingMap::new(), "p"), OtpResolution::NoneAvailable);
    }

    #[test]
    fn test_resolve_single_otp_regardless_of_phone() {
        let mut otps = OtpMap::new();
        otps.insert("ONLY".into(), record("1", 1));
        let mut map = TrackingMap::new();
        map.insert("someone-else".into(), vec!["ONLY".into()]);
        assert_eq!(resolve_otp(&otps, &map, "p"), OtpResolution::Match("ONLY".into()));
    }

    #[test]
    fn test_resolve_prefers_first_associated() {
        let mut otps = OtpMap::new();
        otps.insert("A".into(), record("1", 1));
        otps.insert("B".into(), record("2", 2));
        otps.insert("C".into(), record("3", 3));
        let mut map = TrackingMap::new();
        map.insert("p".into(), vec!["C".into(), "A".into()]);
        assert_eq!(resolve_otp(&otps, &map, "p"), OtpResolution::Match("C".into()));
    }

    #[test]
    fn test_resolve_lists_unpaired_instead_of_guessing() {
        let mut otps = OtpMap::new();
        otps.insert("A".into(), record("1", 1));
        otps.insert("B".into(), record("2", 2));
        otps.insert("C".into(), record("3", 3));
        let mut map = TrackingMap::new();
        map.insert("other".into(), vec!["B".into()]);
        assert_eq!(
            resolve_otp(&otps, &map, "p"),
            OtpResolution::Choose(vec!["A".into(), "C".into()])
        );
    }

    #[test]
    fn test_resolve_nothing_when_all_paired_elsewhere() {
        let mut otps = OtpMap::new();
        otps.insert("A".into(), record("1", 1));
        otps.insert("B".into(), record("2", 2));
        let mut map = TrackingMap::new();
        map.insert("other".into(), vec!["A".into(), "B".into()]);
        assert_eq!(resolve_otp(&otps, &map, "p"), OtpResolution::NoneAvailable);
    }
}
