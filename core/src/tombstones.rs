use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::models::{ImportReport, ProductRef, TombstoneEntry, TombstoneKeyKind};
use crate::storage::{self, LEGACY_TOMBSTONES_KEY, Storage, TOMBSTONES_KEY};

pub const TOMBSTONE_VERSION: u32 = 2;
pub const DEFAULT_TTL_DAYS: i64 = 90;

/// Lowercase, trim and collapse whitespace. Primary entries live under this key.
#[must_use]
pub fn normalize_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TombstoneData {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, TombstoneEntry>,
}

/// Payload exchanged with other devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TombstoneExport {
    pub version: u32,
    pub entries: BTreeMap<String, TombstoneEntry>,
    #[serde(default)]
    pub exported_at: i64,
}

#[derive(Debug, Deserialize)]
struct LegacyTombstone {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "deletedAt")]
    deleted_at: Option<i64>,
}

/// Persisted registry of products the user deleted on purpose. Entries are
/// keyed by normalized name and mirrored under id and fingerprint.
pub struct TombstoneLedger {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: BTreeMap<String, TombstoneEntry>,
}

impl TombstoneLedger {
    /// Load, migrate and sweep. A corrupt payload yields an empty ledger.
    pub fn load(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, ttl_days: i64) -> Result<Self> {
        let mut ledger = Self {
            storage,
            clock,
            ttl: Duration::days(ttl_days),
            entries: BTreeMap::new(),
        };
        ledger.sweep()?;
        Ok(ledger)
    }

    /// Re-read the persisted ledger, picking up writes made by other handles.
    /// Every mutation starts here so the stored ledger is the one modified.
    pub fn reload(&mut self) -> Result<()> {
        self.entries = match self.storage.get_raw(TOMBSTONES_KEY)? {
            None => BTreeMap::new(),
            Some(raw) => self.parse_payload(&raw)?,
        };
        self.absorb_legacy()?;
        Ok(())
    }

    fn parse_payload(&self, raw: &str) -> Result<BTreeMap<String, TombstoneEntry>> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "corrupt tombstone ledger, starting empty");
                return Ok(BTreeMap::new());
            }
        };

        if let Value::Array(names) = &value {
            let now = self.clock.now_millis();
            let entries: BTreeMap<String, TombstoneEntry> = names
                .iter()
                .filter_map(Value::as_str)
                .filter(|n| !n.trim().is_empty())
                .map(|n| {
                    (
                        normalize_key(n),
                        TombstoneEntry {
                            name: n.to_string(),
                            id: None,
                            fingerprint: None,
                            deleted_at: now,
                            key_kind: TombstoneKeyKind::Name,
                        },
                    )
                })
                .collect();
            info!(count = entries.len(), "migrated tombstone ledger from v1");
            self.persist_entries(&entries)?;
            return Ok(entries);
        }

        match serde_json::from_value::<TombstoneData>(value) {
            Ok(data) if data.version == TOMBSTONE_VERSION => Ok(data.entries),
            Ok(data) => {
                warn!(version = data.version, "unknown tombstone ledger version, starting empty");
                Ok(BTreeMap::new())
            }
            Err(e) => {
                warn!(error = %e, "corrupt tombstone ledger, starting empty");
                Ok(BTreeMap::new())
            }
        }
    }

    /// Fold the id-based list older clients wrote into this ledger, then empty it.
    fn absorb_legacy(&mut self) -> Result<()> {
        let legacy: Vec<LegacyTombstone> =
            match storage::read_json(self.storage.as_ref(), LEGACY_TOMBSTONES_KEY) {
                Ok(Some(list)) => list,
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, "dropping unreadable legacy tombstones");
                    self.storage.remove(LEGACY_TOMBSTONES_KEY)?;
                    return Ok(());
                }
            };
        if legacy.is_empty() {
            return Ok(());
        }

        let now = self.clock.now_millis();
        let mut absorbed = 0;
        for t in legacy {
            let Some(name) = t.name.clone().or_else(|| t.id.clone()) else {
                continue;
            };
            let deleted_at = t.deleted_at.unwrap_or(now);
            let key = normalize_key(&name);
            if self.entries.get(&key).is_some_and(|e| e.deleted_at >= deleted_at) {
                continue;
            }
            self.insert_mirrored(&name, t.id.as_deref(), None, deleted_at);
            absorbed += 1;
        }
        info!(absorbed, "absorbed legacy tombstones");
        self.persist()?;
        self.storage.remove(LEGACY_TOMBSTONES_KEY)?;
        Ok(())
    }

    fn insert_mirrored(
        &mut self,
        name: &str,
        id: Option<&str>,
        fingerprint: Option<&str>,
        deleted_at: i64,
    ) {
        let id = id.filter(|s| !s.is_empty()).map(str::to_string);
        let fingerprint = fingerprint.filter(|s| !s.is_empty()).map(str::to_string);
        let entry = |key_kind| TombstoneEntry {
            name: name.to_string(),
            id: id.clone(),
            fingerprint: fingerprint.clone(),
            deleted_at,
            key_kind,
        };
        let primary = normalize_key(name);
        if let Some(id) = id.as_ref().filter(|id| **id != primary) {
            self.entries.insert(id.clone(), entry(TombstoneKeyKind::Id));
        }
        if let Some(fp) = fingerprint.as_ref().filter(|fp| **fp != primary) {
            self.entries
                .insert(fp.clone(), entry(TombstoneKeyKind::Fingerprint));
        }
        self.entries.insert(primary, entry(TombstoneKeyKind::Name));
    }

    fn persist_entries(&self, entries: &BTreeMap<String, TombstoneEntry>) -> Result<()> {
        storage::write_json(
            self.storage.as_ref(),
            TOMBSTONES_KEY,
            &TombstoneData {
                version: TOMBSTONE_VERSION,
                entries: entries.clone(),
            },
        )
    }

    fn persist(&self) -> Result<()> {
        self.persist_entries(&self.entries)
    }

    fn is_live(&self, entry: &TombstoneEntry) -> bool {
        self.clock.now_millis() - entry.deleted_at <= self.ttl.num_milliseconds()
    }

    /// Record a deletion under the name and, when known, the id and fingerprint.
    pub fn add(&mut self, name: &str, id: Option<&str>, fingerprint: Option<&str>) -> Result<()> {
        if name.trim().is_empty() {
            return Ok(());
        }
        self.reload()?;
        let now = self.clock.now_millis();
        self.insert_mirrored(name, id, fingerprint, now);
        self.persist()?;
        debug!(name, ?id, "tombstone added");
        Ok(())
    }

    /// True when a live entry exists under `key` as a name, id or fingerprint.
    #[must_use]
    pub fn is_deleted(&self, key: &str) -> bool {
        if key.trim().is_empty() {
            return false;
        }
        [normalize_key(key), key.to_string()]
            .iter()
            .filter_map(|k| self.entries.get(k))
            .any(|e| self.is_live(e))
    }

    #[must_use]
    pub fn is_product_deleted(&self, product_ref: &ProductRef) -> bool {
        self.is_deleted(&product_ref.name)
            || product_ref.id.as_deref().is_some_and(|id| self.is_deleted(id))
            || product_ref
                .fingerprint
                .as_deref()
                .is_some_and(|fp| self.is_deleted(fp))
    }

    /// Lift a tombstone. Leftovers in the legacy id-based list are absorbed by
    /// the reload first, so they go too.
    pub fn remove(&mut self, name: &str, id: Option<&str>, fingerprint: Option<&str>) -> Result<()> {
        self.reload()?;
        let key = normalize_key(name);
        let primary = self.entries.remove(&key);
        // mirrors recorded with the primary entry go too
        let id = id.map(str::to_string).or_else(|| primary.as_ref().and_then(|e| e.id.clone()));
        let fingerprint = fingerprint
            .map(str::to_string)
            .or_else(|| primary.as_ref().and_then(|e| e.fingerprint.clone()));
        if let Some(id) = &id {
            self.entries.remove(id);
        }
        if let Some(fp) = &fingerprint {
            self.entries.remove(fp);
        }
        self.persist()?;
        info!(name, "tombstone removed");
        Ok(())
    }

    /// Drop entries older than the TTL. Returns how many keys were removed.
    pub fn sweep(&mut self) -> Result<usize> {
        self.reload()?;
        let now = self.clock.now_millis();
        let ttl = self.ttl.num_milliseconds();
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.deleted_at <= ttl);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.persist()?;
            info!(removed, "swept expired tombstones");
        }
        Ok(removed)
    }

    /// Merge a remote ledger. A remote entry wins only if it is strictly newer.
    pub fn import_from_sync(&mut self, remote: &TombstoneExport) -> Result<ImportReport> {
        self.reload()?;
        let mut report = ImportReport::default();
        for (key, entry) in &remote.entries {
            match self.entries.get(key) {
                Some(local) if local.deleted_at >= entry.deleted_at => {
                    if local.deleted_at != entry.deleted_at {
                        report.conflicts.push(key.clone());
                    }
                }
                local => {
                    if local.is_some() {
                        report.conflicts.push(key.clone());
                    }
                    self.entries.insert(key.clone(), entry.clone());
                    report.imported += 1;
                }
            }
        }
        if report.imported > 0 {
            self.persist()?;
        }
        info!(
            imported = report.imported,
            conflicts = report.conflicts.len(),
            "imported tombstones"
        );
        Ok(report)
    }

    #[must_use]
    pub fn export_for_sync(&self) -> TombstoneExport {
        TombstoneExport {
            version: TOMBSTONE_VERSION,
            entries: self.entries.clone(),
            exported_at: self.clock.now_millis(),
        }
    }

    /// Primary entries only, one per product name.
    #[must_use]
    pub fn all(&self) -> Vec<TombstoneEntry> {
        let unique: BTreeMap<String, &TombstoneEntry> = self
            .entries
            .values()
            .filter(|e| e.key_kind == TombstoneKeyKind::Name)
            .map(|e| (normalize_key(&e.name), e))
            .collect();
        unique.into_values().cloned().collect()
    }

    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&TombstoneEntry> {
        self.entries
            .get(&normalize_key(key))
            .or_else(|| self.entries.get(key))
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.all().len()
    }

    pub fn clear(&mut self) -> Result<usize> {
        self.reload()?;
        let count = self.count();
        self.entries.clear();
        self.persist()?;
        self.storage.remove(LEGACY_TOMBSTONES_KEY)?;
        info!(count, "tombstone ledger cleared");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<MemoryStorage>, Arc<ManualClock>) {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        (storage, clock)
    }

    fn ledger(storage: &Arc<MemoryStorage>, clock: &Arc<ManualClock>) -> TombstoneLedger {
        TombstoneLedger::load(storage.clone(), clock.clone(), DEFAULT_TTL_DAYS).unwrap()
    }

    #[test]
    fn test_add_mirrors_all_keys() {
        let (storage, clock) = setup();
        let mut l = ledger(&storage, &clock);
        l.add("Greek  Yogurt", Some("p-42"), Some("fp-abc")).unwrap();

        assert!(l.is_deleted("greek yogurt"));
        assert!(l.is_deleted(" GREEK YOGURT "));
        assert!(l.is_deleted("p-42"));
        assert!(l.is_deleted("fp-abc"));
        assert!(!l.is_deleted("yogurt"));
        assert_eq!(l.count(), 1);

        // persisted and visible to a fresh handle
        let again = ledger(&storage, &clock);
        assert!(again.is_deleted("p-42"));
    }

    #[test]
    fn test_two_handles_keep_each_others_deletions() {
        let (storage, clock) = setup();
        let mut phone_tab = ledger(&storage, &clock);
        let mut laptop_tab = ledger(&storage, &clock);

        phone_tab.add("Mayonnaise", Some("p-mayo"), None).unwrap();
        laptop_tab.add("Ketchup", None, None).unwrap();
        assert!(laptop_tab.is_deleted("mayonnaise"));

        let fresh = ledger(&storage, &clock);
        assert!(fresh.is_deleted("mayonnaise"));
        assert!(fresh.is_deleted("p-mayo"));
        assert!(fresh.is_deleted("ketchup"));

        // a stale handle lifting one tombstone leaves the other alone
        phone_tab.remove("Ketchup", None, None).unwrap();
        clock.advance(Duration::days(1));
        laptop_tab.sweep().unwrap();
        let fresh = ledger(&storage, &clock);
        assert!(fresh.is_deleted("mayonnaise"));
        assert!(!fresh.is_deleted("ketchup"));
    }

    #[test]
    fn test_is_product_deleted_checks_every_shape() {
        let (storage, clock) = setup();
        let mut l = ledger(&storage, &clock);
        l.add("Kefir", Some("p1"), None).unwrap();
        let renamed = ProductRef {
            id: Some("p1".to_string()),
            fingerprint: None,
            name: "Kefir 2.5%".to_string(),
        };
        assert!(l.is_product_deleted(&renamed));
    }

    #[test]
    fn test_remove_clears_mirrors() {
        let (storage, clock) = setup();
        let mut l = ledger(&storage, &clock);
        l.add("Oats", Some("p1"), Some("fp1")).unwrap();
        l.remove("oats", None, None).unwrap();
        assert!(!l.is_deleted("oats"));
        assert!(!l.is_deleted("p1"));
        assert!(!l.is_deleted("fp1"));
    }

    #[test]
    fn test_ttl_expiry_and_sweep() {
        let (storage, clock) = setup();
        let mut l = ledger(&storage, &clock);
        l.add("Old", None, None).unwrap();
        clock.advance(Duration::days(45));
        l.add("Recent", None, None).unwrap();

        clock.advance(Duration::days(45));
        // exactly 90 days is still live
        assert!(l.is_deleted("old"));

        clock.advance(Duration::milliseconds(1));
        assert!(!l.is_deleted("old"));
        assert!(l.is_deleted("recent"));

        assert_eq!(l.sweep().unwrap(), 1);
        assert!(l.entry("old").is_none());
        assert!(l.entry("recent").is_some());
        assert_eq!(l.sweep().unwrap(), 0);
    }

    #[test]
    fn test_load_sweeps_expired() {
        let (storage, clock) = setup();
        ledger(&storage, &clock).add("Stale", None, None).unwrap();
        clock.advance(Duration::days(91));
        let l = ledger(&storage, &clock);
        assert_eq!(l.count(), 0);
    }

    #[test]
    fn test_corrupt_payload_is_empty_not_error() {
        let (storage, clock) = setup();
        storage.set_raw(TOMBSTONES_KEY, "{{{").unwrap();
        let l = ledger(&storage, &clock);
        assert_eq!(l.count(), 0);
    }

    #[test]
    fn test_migrates_v1_array() {
        let (storage, clock) = setup();
        storage
            .set_raw(TOMBSTONES_KEY, r#"["Apple", "Sour Cream", ""]"#)
            .unwrap();
        let l = ledger(&storage, &clock);
        assert_eq!(l.count(), 2);
        assert!(l.is_deleted("sour cream"));

        let raw = storage.get_raw(TOMBSTONES_KEY).unwrap().unwrap();
        let v: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["version"], 2);
    }

    #[test]
    fn test_absorbs_legacy_store() {
        let (storage, clock) = setup();
        storage
            .set_raw(
                LEGACY_TOMBSTONES_KEY,
                r#"[{"id":"p9","name":"Cheese"},{"id":"p10"}]"#,
            )
            .unwrap();
        let l = ledger(&storage, &clock);
        assert!(l.is_deleted("cheese"));
        assert!(l.is_deleted("p9"));
        assert!(l.is_deleted("p10"));
        assert_eq!(storage.get_raw(LEGACY_TOMBSTONES_KEY).unwrap(), None);
    }

    #[test]
    fn test_remove_takes_legacy_leftovers_along() {
        let (storage, clock) = setup();
        let mut l = ledger(&storage, &clock);
        l.add("Cheese", Some("p9"), None).unwrap();
        // an older client writes the legacy list after load
        storage
            .set_raw(
                LEGACY_TOMBSTONES_KEY,
                r#"[{"id":"p9","name":"Cheese"},{"id":"p3","name":"Bread"}]"#,
            )
            .unwrap();
        l.remove("Cheese", Some("p9"), None).unwrap();
        assert_eq!(storage.get_raw(LEGACY_TOMBSTONES_KEY).unwrap(), None);
        assert!(!l.is_deleted("p9"));
        assert!(l.is_deleted("p3"));

        // the restored product does not come back on the next load
        let fresh = ledger(&storage, &clock);
        assert!(!fresh.is_deleted("cheese"));
        assert!(fresh.is_deleted("bread"));
    }

    #[test]
    fn test_import_newest_wins() {
        let (storage, clock) = setup();
        let mut l = ledger(&storage, &clock);
        l.add("Apple", None, None).unwrap();
        let local_ts = l.entry("apple").unwrap().deleted_at;

        let mut remote = BTreeMap::new();
        remote.insert(
            "apple".to_string(),
            TombstoneEntry {
                name: "Apple".to_string(),
                id: None,
                fingerprint: None,
                deleted_at: local_ts - 1000,
                key_kind: TombstoneKeyKind::Name,
            },
        );
        remote.insert(
            "bread".to_string(),
            TombstoneEntry {
                name: "Bread".to_string(),
                id: None,
                fingerprint: None,
                deleted_at: local_ts,
                key_kind: TombstoneKeyKind::Name,
            },
        );
        let export = TombstoneExport {
            version: TOMBSTONE_VERSION,
            entries: remote,
            exported_at: local_ts,
        };
        let report = l.import_from_sync(&export).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.conflicts, vec!["apple".to_string()]);
        // the older remote deletion did not overwrite the local one
        assert_eq!(l.entry("apple").unwrap().deleted_at, local_ts);
        assert!(l.is_deleted("bread"));

        // idempotent
        let again = l.import_from_sync(&export).unwrap();
        assert_eq!(again.imported, 0);
    }

    #[test]
    fn test_import_newer_remote_replaces() {
        let (storage, clock) = setup();
        let mut l = ledger(&storage, &clock);
        l.add("Apple", None, None).unwrap();
        let mut export = l.export_for_sync();
        let entry = export.entries.get_mut("apple").unwrap();
        entry.deleted_at += 5000;
        let newer = entry.deleted_at;

        let report = l.import_from_sync(&export).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(l.entry("apple").unwrap().deleted_at, newer);
    }

    #[test]
    fn test_all_skips_mirrors_and_clear() {
        let (storage, clock) = setup();
        let mut l = ledger(&storage, &clock);
        l.add("Oats", Some("p1"), Some("fp1")).unwrap();
        l.add("Rice", None, None).unwrap();
        let names: Vec<String> = l.all().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Oats", "Rice"]);
        assert_eq!(l.clear().unwrap(), 2);
        assert!(!l.is_deleted("p1"));
    }
}
