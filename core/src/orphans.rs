use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::warn;

use crate::clock::Clock;
use crate::error::{LarderError, Result};
use crate::models::{Day, Item, OrphanRecord, OrphanSummary, Product};
use crate::product_index::{ProductIndex, normalize_name};
use crate::storage::{self, Storage};
use crate::tombstones::TombstoneLedger;

/// Observes ledger items whose product no longer resolves. Never touches the catalog.
pub struct OrphanTracker {
    clock: Arc<dyn Clock>,
    records: BTreeMap<String, OrphanRecord>,
}

impl OrphanTracker {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: BTreeMap::new(),
        }
    }

    /// Record `item` as an orphan if it neither resolves nor is tombstoned.
    /// Returns true when the item is an orphan.
    pub fn track(
        &mut self,
        item: &Item,
        date: NaiveDate,
        index: &ProductIndex,
        ledger: &TombstoneLedger,
    ) -> bool {
        let pref = &item.product_ref;
        if index.resolve(pref).is_some() || ledger.is_product_deleted(pref) {
            return false;
        }
        let key = normalize_name(&pref.name);
        if key.is_empty() {
            return false;
        }

        let now = self.clock.now_millis();
        let record = self.records.entry(key).or_insert_with(|| {
            warn!(name = %pref.name, %date, "product not found in catalog, tracking as orphan");
            OrphanRecord {
                name: pref.name.clone(),
                product_id: None,
                fingerprint: None,
                used_in_days: BTreeSet::new(),
                first_seen: now,
                first_seen_date: date,
                snapshot: None,
            }
        });
        record.used_in_days.insert(date);
        if record.product_id.is_none() {
            record.product_id.clone_from(&pref.id);
        }
        if record.fingerprint.is_none() {
            record.fingerprint.clone_from(&pref.fingerprint);
        }
        if !record.has_inline_data() {
            if let Some(snapshot) = item.nutrient_snapshot.as_ref().filter(|s| s.has_data()) {
                record.snapshot = Some(snapshot.clone());
            }
        }
        if date < record.first_seen_date {
            record.first_seen_date = date;
        }
        true
    }

    /// Track every item of a stored day. Returns how many items were orphans.
    pub fn scan_day(&mut self, day: &Day, index: &ProductIndex, ledger: &TombstoneLedger) -> usize {
        day.meals
            .iter()
            .flat_map(|m| m.items.iter())
            .filter(|item| self.track(item, day.date, index, ledger))
            .count()
    }

    pub fn scan_days(&mut self, days: &[Day], index: &ProductIndex, ledger: &TombstoneLedger) -> usize {
        days.iter()
            .map(|d| self.scan_day(d, index, ledger))
            .sum()
    }

    /// Track every stored day record. Malformed records are skipped with a warning.
    /// Call [`OrphanTracker::clear`] first to forget items that were since removed.
    pub fn scan_storage(
        &mut self,
        storage: &dyn Storage,
        index: &ProductIndex,
        ledger: &TombstoneLedger,
    ) -> Result<usize> {
        let mut days = Vec::new();
        for date in storage::day_dates(storage)? {
            match storage::load_day(storage, date) {
                Ok(day) => days.push(day),
                Err(e @ LarderError::MalformedStorageRecord { .. }) => {
                    warn!(%date, error = %e, "skipping malformed day record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(self.scan_days(&days, index, ledger))
    }

    /// Drop records whose product has been tombstoned since they were tracked.
    pub fn prune_deleted(&mut self, ledger: &TombstoneLedger) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, r| !ledger.is_product_deleted(&r.product_ref()));
        before - self.records.len()
    }

    /// Drop records whose name or stored id now resolves. Returns how many were dropped.
    pub fn prune(&mut self, index: &ProductIndex) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| {
            let by_id = r
                .product_id
                .as_deref()
                .is_some_and(|id| index.get_by_id(id).is_some());
            !(by_id || index.resolve(&r.product_ref()).is_some())
        });
        before - self.records.len()
    }

    /// Re-check every record against a mutated catalog.
    pub fn recalculate(&mut self, catalog: &[Product]) -> usize {
        self.prune(&ProductIndex::build(catalog))
    }

    pub fn records(&self) -> impl Iterator<Item = &OrphanRecord> {
        self.records.values()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OrphanRecord> {
        self.records.get(&normalize_name(name))
    }

    #[must_use]
    pub fn summary(&self) -> Vec<OrphanSummary> {
        self.records
            .values()
            .map(|r| OrphanSummary {
                name: r.name.clone(),
                product_id: r.product_id.clone(),
                used_in_days: r.used_in_days.iter().copied().collect(),
                days_count: r.used_in_days.len(),
                has_inline_data: r.has_inline_data(),
                first_seen: r.first_seen,
            })
            .collect()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn has_any(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Meal, Nutrients, ProductRef};
    use crate::storage::MemoryStorage;
    use crate::tombstones::DEFAULT_TTL_DAYS;
    use chrono::{TimeZone, Utc};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn product(id: &str, name: &str) -> Product {
        Product {
            id: id.to_string(),
            name: name.to_string(),
            fingerprint: None,
            nutrients: Nutrients {
                kcal: Some(100.0),
                ..Nutrients::default()
            },
            shared_origin_id: None,
            recovered_from: None,
            recovered_at: None,
        }
    }

    fn item(id: Option<&str>, name: &str, snapshot: bool) -> Item {
        Item {
            id: format!("i-{name}"),
            product_ref: ProductRef {
                id: id.map(str::to_string),
                fingerprint: None,
                name: name.to_string(),
            },
            grams: 100.0,
            nutrient_snapshot: snapshot.then(|| Nutrients {
                kcal: Some(120.0),
                protein: Some(5.0),
                ..Nutrients::default()
            }),
        }
    }

    fn day(d: &str, items: Vec<Item>) -> Day {
        Day {
            date: date(d),
            meals: vec![Meal {
                id: "m".to_string(),
                time: Some("12:00".to_string()),
                items,
                meal_type_override: None,
            }],
        }
    }

    fn fixtures() -> (Arc<ManualClock>, TombstoneLedger) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let ledger = TombstoneLedger::load(
            Arc::new(MemoryStorage::new()),
            clock.clone(),
            DEFAULT_TTL_DAYS,
        )
        .unwrap();
        (clock, ledger)
    }

    #[test]
    fn test_tracks_unresolved_items_across_days() {
        let (clock, ledger) = fixtures();
        let mut tracker = OrphanTracker::new(clock);
        let index = ProductIndex::build(&[product("p1", "Oats")]);

        let days = vec![
            day("2025-06-02", vec![item(Some("p1"), "Oats", false), item(None, "Kefir", false)]),
            day("2025-06-01", vec![item(Some("p7"), "kefir ", true)]),
        ];
        assert_eq!(tracker.scan_days(&days, &index, &ledger), 2);
        assert_eq!(tracker.count(), 1);

        let summary = tracker.summary();
        assert_eq!(summary[0].name, "Kefir");
        assert_eq!(summary[0].days_count, 2);
        assert_eq!(
            summary[0].used_in_days,
            vec![date("2025-06-01"), date("2025-06-02")]
        );
        assert!(summary[0].has_inline_data);
        assert_eq!(summary[0].product_id.as_deref(), Some("p7"));
        assert_eq!(tracker.get("KEFIR").unwrap().first_seen_date, date("2025-06-01"));
    }

    #[test]
    fn test_tombstoned_items_are_not_orphans() {
        let (clock, mut ledger) = fixtures();
        ledger.add("Kefir", None, None).unwrap();
        let mut tracker = OrphanTracker::new(clock);
        let index = ProductIndex::build(&[]);
        assert!(!tracker.track(&item(None, "Kefir", true), date("2025-06-01"), &index, &ledger));
        assert!(!tracker.has_any());
    }

    #[test]
    fn test_recalculate_drops_resolved() {
        let (clock, ledger) = fixtures();
        let mut tracker = OrphanTracker::new(clock);
        let empty = ProductIndex::build(&[]);
        tracker.track(&item(Some("p2"), "Rice", false), date("2025-06-01"), &empty, &ledger);
        tracker.track(&item(None, "Bread", false), date("2025-06-01"), &empty, &ledger);
        assert_eq!(tracker.count(), 2);

        // restored under a new name but the old id
        let catalog = vec![product("p2", "Basmati rice")];
        assert_eq!(tracker.recalculate(&catalog), 1);
        assert!(tracker.get("rice").is_none());
        assert!(tracker.get("bread").is_some());
    }

    #[test]
    fn test_scan_storage_skips_malformed_and_prunes_deleted() {
        let (clock, mut ledger) = fixtures();
        let storage = MemoryStorage::new();
        storage::save_day(&storage, &day("2025-06-01", vec![item(None, "Rice", false)])).unwrap();
        storage::save_day(&storage, &day("2025-06-02", vec![item(None, "Bread", false)])).unwrap();
        storage.set_raw("day:2025-06-03", "{oops").unwrap();

        let mut tracker = OrphanTracker::new(clock);
        let index = ProductIndex::build(&[]);
        assert_eq!(tracker.scan_storage(&storage, &index, &ledger).unwrap(), 2);

        ledger.add("Bread", None, None).unwrap();
        assert_eq!(tracker.prune_deleted(&ledger), 1);
        assert!(tracker.get("rice").is_some());
    }

    #[test]
    fn test_clear_then_rescan_forgets_removed_items() {
        let (clock, ledger) = fixtures();
        let storage = MemoryStorage::new();
        storage::save_day(&storage, &day("2025-06-01", vec![item(None, "Rice", false)])).unwrap();
        storage::save_day(&storage, &day("2025-06-02", vec![item(None, "Bread", false)])).unwrap();
        let mut tracker = OrphanTracker::new(clock);
        let index = ProductIndex::build(&[]);
        tracker.scan_storage(&storage, &index, &ledger).unwrap();
        assert_eq!(tracker.count(), 2);

        storage::save_day(&storage, &day("2025-06-02", vec![])).unwrap();
        tracker.clear();
        assert!(!tracker.has_any());
        assert_eq!(tracker.scan_storage(&storage, &index, &ledger).unwrap(), 1);
        assert!(tracker.get("bread").is_none());
        assert!(tracker.get("rice").is_some());
    }
}
