use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{LarderError, Result};
use crate::events::{BlockReason, Event, Notifier};
use crate::models::{OrphanRecord, Product, ProductRef, RecoveryReport, RecoverySource};
use crate::orphans::OrphanTracker;
use crate::product_index::{ProductIndex, compute_fingerprint, normalize_name};
use crate::storage::{self, Storage};
use crate::tombstones::TombstoneLedger;

pub const DEFAULT_MIN_RETAINED_RATIO: f64 = 0.5;
const DEFAULT_GI: f64 = 50.0;
const DEFAULT_HARM: f64 = 0.0;

/// Shared product catalog on the other side of the network.
pub trait RemoteCatalog: Send + Sync {
    fn fetch(&self) -> anyhow::Result<Vec<Product>>;
}

/// Read and replace the local catalog. Every write goes through `commit`.
pub trait CatalogStore {
    fn load(&self) -> Result<Vec<Product>>;
    fn commit(&self, products: &[Product]) -> Result<()>;
}

pub struct StorageCatalog {
    storage: Arc<dyn Storage>,
}

impl StorageCatalog {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

impl CatalogStore for StorageCatalog {
    fn load(&self) -> Result<Vec<Product>> {
        storage::load_catalog(self.storage.as_ref())
    }

    fn commit(&self, products: &[Product]) -> Result<()> {
        storage::save_catalog(self.storage.as_ref(), products)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecoveryOptions {
    pub try_remote: bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self { try_remote: true }
    }
}

pub struct RecoveryEngine {
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    min_retained_ratio: f64,
}

impl RecoveryEngine {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>, min_retained_ratio: f64) -> Self {
        Self {
            clock,
            notifier,
            min_retained_ratio,
        }
    }

    /// Rebuild missing products from item snapshots or the remote catalog and
    /// merge them into the local catalog.
    ///
    /// State is re-read after the remote call and the merge is refused when
    /// the catalog is empty or would shrink below the retained ratio.
    pub fn run(
        &self,
        storage: &dyn Storage,
        catalog: &dyn CatalogStore,
        tracker: &mut OrphanTracker,
        ledger: &mut TombstoneLedger,
        remote: Option<&dyn RemoteCatalog>,
        options: RecoveryOptions,
    ) -> Result<RecoveryReport> {
        let prior = catalog.load()?;
        let index = ProductIndex::build(&prior);
        tracker.clear();
        tracker.scan_storage(storage, &index, ledger)?;

        let mut report = RecoveryReport::default();
        if !tracker.has_any() {
            return Ok(report);
        }

        let orphans: Vec<OrphanRecord> = tracker.records().cloned().collect();
        let now = self.clock.now_millis();
        let mut recovered = Vec::new();
        let mut pending = Vec::new();

        for record in orphans {
            if ledger.is_product_deleted(&record.product_ref()) {
                report.skipped_deleted += 1;
                continue;
            }
            match product_from_snapshot(&record, now) {
                Some(product) => recovered.push(product),
                None => pending.push(record),
            }
        }

        match remote.filter(|_| options.try_remote && !pending.is_empty()) {
            Some(remote) => match remote.fetch() {
                Ok(shared) => {
                    let lookup = SharedLookup::new(&shared);
                    for record in pending {
                        match lookup.find(&record) {
                            Some(found) => recovered.push(clone_shared(found, now)),
                            None => report.still_missing.push(record.name),
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "remote catalog unavailable, skipping remote recovery");
                    report
                        .still_missing
                        .extend(pending.into_iter().map(|r| r.name));
                }
            },
            None => report
                .still_missing
                .extend(pending.into_iter().map(|r| r.name)),
        }

        if recovered.is_empty() {
            info!(still_missing = report.still_missing.len(), "nothing to recover");
            return Ok(report);
        }

        // Local state may have moved while the remote call was pending.
        ledger.reload()?;
        let current = catalog.load()?;
        if prior.is_empty() || current.is_empty() {
            return Err(self.block(
                BlockReason::EmptyBase,
                recovered.len(),
                LarderError::RecoveryBlockedEmptyBase {
                    pending: recovered.len(),
                },
            ));
        }

        let current_index = ProductIndex::build(&current);
        let mut used_ids: HashSet<String> = current.iter().map(|p| id_key(&p.id)).collect();
        let mut seen: HashSet<String> = HashSet::new();
        let mut accepted = Vec::with_capacity(recovered.len());
        for mut product in recovered {
            let pref = ProductRef::for_product(&product);
            if ledger.is_product_deleted(&pref) {
                report.skipped_deleted += 1;
                continue;
            }
            if current_index.resolve(&pref).is_some() {
                continue;
            }
            // two orphan names can lead to the same product
            let keys = identity_keys(&product);
            if keys.iter().any(|k| seen.contains(k)) {
                debug!(name = %product.name, "already recovered in this pass");
                continue;
            }
            seen.extend(keys);
            if !used_ids.insert(id_key(&product.id)) {
                product.id = Uuid::new_v4().to_string();
                used_ids.insert(id_key(&product.id));
            }
            accepted.push(product);
        }

        if accepted.is_empty() {
            return Ok(report);
        }

        let mut merged = current;
        merged.extend(accepted.iter().cloned());
        #[allow(clippy::cast_precision_loss)]
        let shrinks = (merged.len() as f64) < prior.len() as f64 * self.min_retained_ratio;
        if shrinks {
            let err = LarderError::RecoveryBlockedDataLoss {
                before: prior.len(),
                after: merged.len(),
            };
            return Err(self.block(BlockReason::DataLoss, accepted.len(), err));
        }

        catalog.commit(&merged)?;
        tracker.prune(&ProductIndex::build(&merged));

        report.recovered = accepted.len();
        report.from_snapshot = accepted
            .iter()
            .filter(|p| p.recovered_from == Some(RecoverySource::Snapshot))
            .count();
        report.from_remote = report.recovered - report.from_snapshot;

        info!(
            recovered = report.recovered,
            from_snapshot = report.from_snapshot,
            from_remote = report.from_remote,
            still_missing = report.still_missing.len(),
            "orphan recovery finished"
        );
        self.notifier.emit(&Event::ProductsChanged {
            count: merged.len(),
            source: "orphan-recovery".to_string(),
        });
        self.notifier.emit(&Event::OrphansRecovered {
            recovered: report.recovered,
            from_snapshot: report.from_snapshot,
            from_remote: report.from_remote,
            still_missing: report.still_missing.clone(),
        });
        Ok(report)
    }

    fn block(&self, reason: BlockReason, pending: usize, err: LarderError) -> LarderError {
        error!(?reason, pending, "{err}");
        self.notifier
            .emit(&Event::RecoveryBlocked { reason, pending });
        err
    }
}

fn product_from_snapshot(record: &OrphanRecord, now: i64) -> Option<Product> {
    let snapshot = record.snapshot.as_ref().filter(|s| s.has_data())?;
    let mut nutrients = snapshot.clone();
    nutrients.gi = nutrients.gi.or(Some(DEFAULT_GI));
    nutrients.harm = nutrients.harm.or(Some(DEFAULT_HARM));
    Some(Product {
        id: record
            .product_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: record.name.clone(),
        fingerprint: record.fingerprint.clone(),
        nutrients,
        shared_origin_id: None,
        recovered_from: Some(RecoverySource::Snapshot),
        recovered_at: Some(now),
    })
}

fn clone_shared(shared: &Product, now: i64) -> Product {
    let mut product = shared.clone();
    product.id = Uuid::new_v4().to_string();
    product.shared_origin_id = Some(shared.id.clone());
    if product.fingerprint.is_none() {
        product.fingerprint = Some(compute_fingerprint(shared));
    }
    product.recovered_from = Some(RecoverySource::Remote);
    product.recovered_at = Some(now);
    product
}

fn id_key(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Keys under which two recovered products are the same product.
fn identity_keys(product: &Product) -> Vec<String> {
    let mut keys = vec![format!("name:{}", normalize_name(&product.name))];
    if let Some(fp) = product.fingerprint.as_deref().filter(|fp| !fp.is_empty()) {
        keys.push(format!("fp:{fp}"));
    }
    match product.shared_origin_id.as_deref() {
        Some(origin) => keys.push(format!("origin:{}", id_key(origin))),
        None => keys.push(format!("id:{}", id_key(&product.id))),
    }
    keys
}

/// Remote catalog lookup: fingerprint, then id, then normalized name.
struct SharedLookup<'a> {
    by_fingerprint: HashMap<&'a str, &'a Product>,
    by_id: HashMap<&'a str, &'a Product>,
    by_name: HashMap<String, &'a Product>,
}

impl<'a> SharedLookup<'a> {
    fn new(products: &'a [Product]) -> Self {
        let mut lookup = Self {
            by_fingerprint: HashMap::new(),
            by_id: HashMap::new(),
            by_name: HashMap::new(),
        };
        for p in products {
            if let Some(fp) = p.fingerprint.as_deref() {
                lookup.by_fingerprint.insert(fp, p);
            }
            if !p.id.is_empty() {
                lookup.by_id.insert(p.id.as_str(), p);
            }
            lookup.by_name.insert(normalize_name(&p.name), p);
        }
        lookup
    }

    fn find(&self, record: &OrphanRecord) -> Option<&'a Product> {
        record
            .fingerprint
            .as_deref()
            .and_then(|fp| self.by_fingerprint.get(fp))
            .or_else(|| {
                record
                    .product_id
                    .as_deref()
                    .and_then(|id| self.by_id.get(id))
            })
            .or_else(|| self.by_name.get(&normalize_name(&record.name)))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::RecordingNotifier;
    use crate::models::{Day, Item, Meal, Nutrients};
    use crate::storage::{MemoryStorage, save_catalog, save_day};
    use crate::tombstones::DEFAULT_TTL_DAYS;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::sync::Mutex;

    struct Fixture {
        storage: Arc<MemoryStorage>,
        clock: Arc<ManualClock>,
        notifier: Arc<RecordingNotifier>,
        tracker: OrphanTracker,
        ledger: TombstoneLedger,
        engine: RecoveryEngine,
        catalog: StorageCatalog,
    }

    impl Fixture {
        fn new() -> Self {
            let storage = Arc::new(MemoryStorage::new());
            let clock = Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            ));
            let notifier = Arc::new(RecordingNotifier::new());
            let ledger =
                TombstoneLedger::load(storage.clone(), clock.clone(), DEFAULT_TTL_DAYS).unwrap();
            Self {
                tracker: OrphanTracker::new(clock.clone()),
                engine: RecoveryEngine::new(
                    clock.clone(),
                    notifier.clone(),
                    DEFAULT_MIN_RETAINED_RATIO,
                ),
                catalog: StorageCatalog::new(storage.clone()),
                ledger,
                storage,
                clock,
                notifier,
            }
        }

        fn run(&mut self, remote: Option<&dyn RemoteCatalog>) -> Result<RecoveryReport> {
            self.engine.run(
                self.storage.as_ref(),
                &self.catalog,
                &mut self.tracker,
                &mut self.ledger,
                remote,
                RecoveryOptions::default(),
            )
        }

        fn catalog_names(&self) -> Vec<String> {
            self.catalog.load().unwrap().into_iter().map(|p| p.name).collect()
        }
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
                kcal: Some(250.0),
                protein: Some(12.0),
                ..Nutrients::default()
            }),
        }
    }

    fn store_day(storage: &MemoryStorage, date: &str, items: Vec<Item>) {
        save_day(
            storage,
            &Day {
                date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
                meals: vec![Meal {
                    id: format!("m-{date}"),
                    time: Some("12:00".to_string()),
                    items,
                    meal_type_override: None,
                }],
            },
        )
        .unwrap();
    }

    struct StaticRemote(Vec<Product>);

    impl RemoteCatalog for StaticRemote {
        fn fetch(&self) -> anyhow::Result<Vec<Product>> {
            Ok(self.0.clone())
        }
    }

    struct FailingRemote;

    impl RemoteCatalog for FailingRemote {
        fn fetch(&self) -> anyhow::Result<Vec<Product>> {
            anyhow::bail!("connection refused")
        }
    }

    /// Runs a side effect against local storage while the "network call" is pending.
    struct InterleavingRemote {
        during_fetch: Mutex<Option<Box<dyn FnOnce() + Send>>>,
        products: Vec<Product>,
    }

    impl RemoteCatalog for InterleavingRemote {
        fn fetch(&self) -> anyhow::Result<Vec<Product>> {
            if let Some(f) = self.during_fetch.lock().unwrap().take() {
                f();
            }
            Ok(self.products.clone())
        }
    }

    #[test]
    fn test_recovers_from_snapshot() {
        let mut fx = Fixture::new();
        save_catalog(fx.storage.as_ref(), &[product("p1", "Oats")]).unwrap();
        store_day(&fx.storage, "2025-06-01", vec![item(Some("p9"), "Granola", true)]);

        let report = fx.run(None).unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(report.from_snapshot, 1);
        assert!(report.still_missing.is_empty());

        let catalog = fx.catalog.load().unwrap();
        let granola = catalog.iter().find(|p| p.name == "Granola").unwrap();
        assert_eq!(granola.id, "p9");
        assert_eq!(granola.recovered_from, Some(RecoverySource::Snapshot));
        assert_eq!(granola.nutrients.gi, Some(50.0));
        assert_eq!(granola.nutrients.harm, Some(0.0));
        assert_eq!(granola.recovered_at, Some(fx.clock.now_millis()));
        assert!(!fx.tracker.has_any());

        let names: Vec<&str> = fx.notifier.events().iter().map(Event::name).collect();
        assert_eq!(names, vec!["products_changed", "orphans_recovered"]);
    }

    #[test]
    fn test_second_run_changes_nothing() {
        let mut fx = Fixture::new();
        save_catalog(fx.storage.as_ref(), &[product("p1", "Oats")]).unwrap();
        store_day(&fx.storage, "2025-06-01", vec![item(None, "Granola", true)]);

        fx.run(None).unwrap();
        let after_first = fx.storage.get_raw("products").unwrap();
        fx.notifier.take();

        let report = fx.run(None).unwrap();
        assert_eq!(report, RecoveryReport::default());
        assert_eq!(fx.storage.get_raw("products").unwrap(), after_first);
        assert!(fx.notifier.events().is_empty());
    }

    #[test]
    fn test_tombstone_suppresses_recovery() {
        let mut fx = Fixture::new();
        save_catalog(fx.storage.as_ref(), &[product("p1", "Oats")]).unwrap();
        store_day(&fx.storage, "2025-06-01", vec![item(None, "X", true)]);
        fx.ledger.add("X", None, None).unwrap();

        let report = fx.run(None).unwrap();
        assert_eq!(report.recovered, 0);
        assert_eq!(fx.catalog_names(), vec!["Oats"]);
        // not tracked as an orphan in the first place
        assert!(!fx.tracker.has_any());
    }

    #[test]
    fn test_tombstone_added_during_remote_call() {
        let mut fx = Fixture::new();
        save_catalog(fx.storage.as_ref(), &[product("p1", "Oats")]).unwrap();
        store_day(&fx.storage, "2025-06-01", vec![item(None, "Granola", true)]);

        let storage = fx.storage.clone();
        let clock = fx.clock.clone();
        let remote = InterleavingRemote {
            during_fetch: Mutex::new(Some(Box::new(move || {
                // another handle deletes the product while we wait
                let mut other =
                    TombstoneLedger::load(storage, clock, DEFAULT_TTL_DAYS).unwrap();
                other.add("Granola", None, None).unwrap();
            }))),
            products: vec![],
        };
        // a second orphan with no snapshot forces the remote call
        store_day(&fx.storage, "2025-06-02", vec![item(None, "Rye bread", false)]);

        let report = fx.run(Some(&remote)).unwrap();
        assert_eq!(report.recovered, 0);
        assert_eq!(report.skipped_deleted, 1);
        assert_eq!(report.still_missing, vec!["Rye bread".to_string()]);
        assert_eq!(fx.catalog_names(), vec!["Oats"]);
    }

    #[test]
    fn test_remote_recovery_by_fingerprint_then_name() {
        let mut fx = Fixture::new();
        save_catalog(fx.storage.as_ref(), &[product("p1", "Oats")]).unwrap();
        let mut by_fp = item(None, "Kefir (old name)", false);
        by_fp.product_ref.fingerprint = Some("fp-kefir".to_string());
        store_day(
            &fx.storage,
            "2025-06-01",
            vec![by_fp, item(None, "Buckwheat", false), item(None, "Unicorn", false)],
        );

        let mut kefir = product("s1", "Kefir 2.5%");
        kefir.fingerprint = Some("fp-kefir".to_string());
        let remote = StaticRemote(vec![kefir, product("s2", "buckwheat")]);

        let report = fx.run(Some(&remote)).unwrap();
        assert_eq!(report.from_remote, 2);
        assert_eq!(report.from_snapshot, 0);
        assert_eq!(report.still_missing, vec!["Unicorn".to_string()]);

        let catalog = fx.catalog.load().unwrap();
        let cloned = catalog.iter().find(|p| p.name == "Kefir 2.5%").unwrap();
        assert_eq!(cloned.shared_origin_id.as_deref(), Some("s1"));
        assert_ne!(cloned.id, "s1");
        assert_eq!(cloned.recovered_from, Some(RecoverySource::Remote));
        // the unresolved one stays tracked for the next pass
        assert_eq!(fx.tracker.count(), 1);
    }

    #[test]
    fn test_remote_failure_is_not_fatal() {
        let mut fx = Fixture::new();
        save_catalog(fx.storage.as_ref(), &[product("p1", "Oats")]).unwrap();
        store_day(
            &fx.storage,
            "2025-06-01",
            vec![item(None, "Granola", true), item(None, "Buckwheat", false)],
        );
        let report = fx.run(Some(&FailingRemote)).unwrap();
        assert_eq!(report.from_snapshot, 1);
        assert_eq!(report.from_remote, 0);
        assert_eq!(report.still_missing, vec!["Buckwheat".to_string()]);
        // the snapshot part is still committed
        assert_eq!(fx.catalog_names(), vec!["Oats", "Granola"]);
        let names: Vec<&str> = fx.notifier.events().iter().map(Event::name).collect();
        assert_eq!(names, vec!["products_changed", "orphans_recovered"]);
        assert_eq!(fx.tracker.count(), 1);
    }

    #[test]
    fn test_two_orphans_sharing_a_fingerprint_clone_once() {
        let mut fx = Fixture::new();
        save_catalog(fx.storage.as_ref(), &[product("p1", "Oats")]).unwrap();
        let mut current = item(None, "Kefir", false);
        current.product_ref.fingerprint = Some("fp-k".to_string());
        let mut renamed = item(None, "Kefir (old name)", false);
        renamed.product_ref.fingerprint = Some("fp-k".to_string());
        store_day(&fx.storage, "2025-06-01", vec![current, renamed]);

        let mut kefir = product("s1", "Kefir 2.5%");
        kefir.fingerprint = Some("fp-k".to_string());
        let report = fx.run(Some(&StaticRemote(vec![kefir]))).unwrap();

        assert_eq!(report.recovered, 1);
        assert_eq!(report.from_remote, 1);
        assert!(report.still_missing.is_empty());
        assert_eq!(fx.catalog_names(), vec!["Oats", "Kefir 2.5%"]);
        assert!(!fx.tracker.has_any());
    }

    #[test]
    fn test_empty_base_with_nothing_recoverable_writes_nothing() {
        let mut fx = Fixture::new();
        store_day(&fx.storage, "2025-06-01", vec![item(None, "Buckwheat", false)]);

        let report = fx.run(Some(&StaticRemote(vec![]))).unwrap();
        assert_eq!(report.recovered, 0);
        assert_eq!(report.still_missing, vec!["Buckwheat".to_string()]);
        assert_eq!(fx.storage.get_raw("products").unwrap(), None);
        assert!(fx.notifier.events().is_empty());
    }

    #[test]
    fn test_empty_base_blocks_and_leaves_catalog_untouched() {
        let mut fx = Fixture::new();
        store_day(&fx.storage, "2025-06-01", vec![item(None, "Granola", true)]);

        let err = fx.run(None).unwrap_err();
        assert!(matches!(err, LarderError::RecoveryBlockedEmptyBase { pending: 1 }));
        assert_eq!(fx.storage.get_raw("products").unwrap(), None);
        assert_eq!(
            fx.notifier.events(),
            vec![Event::RecoveryBlocked {
                reason: BlockReason::EmptyBase,
                pending: 1
            }]
        );
        // still an orphan
        assert!(fx.tracker.has_any());
    }

    #[test]
    fn test_catalog_shrinking_during_remote_call_blocks() {
        let mut fx = Fixture::new();
        let big: Vec<Product> = (0..10)
            .map(|i| product(&format!("p{i}"), &format!("Food {i}")))
            .collect();
        save_catalog(fx.storage.as_ref(), &big).unwrap();
        store_day(
            &fx.storage,
            "2025-06-01",
            vec![item(None, "Granola", true), item(None, "Buckwheat", false)],
        );

        let storage = fx.storage.clone();
        let remote = InterleavingRemote {
            during_fetch: Mutex::new(Some(Box::new(move || {
                save_catalog(storage.as_ref(), &[product("p0", "Food 0")]).unwrap();
            }))),
            products: vec![product("s2", "Buckwheat")],
        };

        let err = fx.run(Some(&remote)).unwrap_err();
        assert!(matches!(
            err,
            LarderError::RecoveryBlockedDataLoss { before: 10, after: 3 }
        ));
        assert_eq!(fx.catalog_names(), vec!["Food 0"]);
    }

    #[test]
    fn test_product_added_manually_meanwhile_is_not_duplicated() {
        let mut fx = Fixture::new();
        save_catalog(fx.storage.as_ref(), &[product("p1", "Oats")]).unwrap();
        store_day(
            &fx.storage,
            "2025-06-01",
            vec![item(None, "Granola", true), item(None, "Buckwheat", false)],
        );

        let storage = fx.storage.clone();
        let remote = InterleavingRemote {
            during_fetch: Mutex::new(Some(Box::new(move || {
                save_catalog(
                    storage.as_ref(),
                    &[product("p1", "Oats"), product("p5", "granola")],
                )
                .unwrap();
            }))),
            products: vec![],
        };

        let report = fx.run(Some(&remote)).unwrap();
        assert_eq!(report.recovered, 0);
        assert_eq!(fx.catalog_names(), vec!["Oats", "granola"]);
    }

    #[test]
    fn test_no_remote_when_disabled() {
        let mut fx = Fixture::new();
        save_catalog(fx.storage.as_ref(), &[product("p1", "Oats")]).unwrap();
        store_day(&fx.storage, "2025-06-01", vec![item(None, "Buckwheat", false)]);
        let remote = StaticRemote(vec![product("s2", "Buckwheat")]);
        let report = fx
            .engine
            .run(
                fx.storage.as_ref(),
                &fx.catalog,
                &mut fx.tracker,
                &mut fx.ledger,
                Some(&remote),
                RecoveryOptions { try_remote: false },
            )
            .unwrap();
        assert_eq!(report.recovered, 0);
        assert_eq!(report.still_missing, vec!["Buckwheat".to_string()]);
    }

    #[test]
    fn test_malformed_day_is_skipped() {
        let mut fx = Fixture::new();
        save_catalog(fx.storage.as_ref(), &[product("p1", "Oats")]).unwrap();
        fx.storage.set_raw("day:2025-05-31", "[broken").unwrap();
        store_day(&fx.storage, "2025-06-01", vec![item(None, "Granola", true)]);
        assert_eq!(fx.run(None).unwrap().recovered, 1);
    }
}
