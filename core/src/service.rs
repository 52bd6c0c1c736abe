use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Local, NaiveDate};
use tracing::{debug, info};
use uuid::Uuid;

use crate::classifier::{MealClassifier, meal_stats};
use crate::clock::{Clock, SystemClock};
use crate::error::{LarderError, Result};
use crate::events::{Event, LogNotifier, Notifier};
use crate::models::{
    Day, DayPart, DayView, ImportReport, Item, Meal, MealLabel, MealView, NewProduct, OrphanSummary,
    Product, ProductRef, RecoveryReport, TombstoneEntry, validate_grams, validate_product,
    validate_time,
};
use crate::orphans::OrphanTracker;
use crate::popular::{DEFAULT_LIMIT, DEFAULT_TTL_MINUTES, DEFAULT_WINDOW_DAYS, PopularityCache};
use crate::product_index::{ProductIndex, compute_fingerprint, normalize_name};
use crate::recovery::{
    CatalogStore, DEFAULT_MIN_RETAINED_RATIO, RecoveryEngine, RecoveryOptions, RemoteCatalog,
    StorageCatalog,
};
use crate::storage::{self, FAVORITES_KEY, SqliteStorage, Storage};
use crate::time_model::{NIGHT_HOUR_THRESHOLD, TimeModel, next_day};
use crate::tombstones::{DEFAULT_TTL_DAYS, TombstoneExport, TombstoneLedger};

/// Engine tunables. `Default` gives the values the engines are designed around.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub night_threshold: u32,
    pub tombstone_ttl_days: i64,
    pub popular_ttl: Duration,
    pub popular_window_days: u32,
    pub popular_limit: usize,
    pub min_retained_ratio: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            night_threshold: NIGHT_HOUR_THRESHOLD,
            tombstone_ttl_days: DEFAULT_TTL_DAYS,
            popular_ttl: Duration::minutes(DEFAULT_TTL_MINUTES),
            popular_window_days: DEFAULT_WINDOW_DAYS,
            popular_limit: DEFAULT_LIMIT,
            min_retained_ratio: DEFAULT_MIN_RETAINED_RATIO,
        }
    }
}

/// Facade over one store. Owns a single instance of every engine, so callers
/// never have to keep the tombstone ledger, the orphan set and the caches in step.
pub struct LarderService {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    time_model: TimeModel,
    classifier: MealClassifier,
    catalog: StorageCatalog,
    index: ProductIndex,
    ledger: TombstoneLedger,
    tracker: OrphanTracker,
    recovery: RecoveryEngine,
    popular: PopularityCache,
}

impl LarderService {
    /// Wire the engines over `storage`. The tombstone ledger is swept once here.
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Result<Self> {
        let time_model = TimeModel::new(settings.night_threshold);
        let ledger = TombstoneLedger::load(
            storage.clone(),
            clock.clone(),
            settings.tombstone_ttl_days,
        )?;
        let catalog = StorageCatalog::new(storage.clone());
        let index = ProductIndex::build(&catalog.load()?);

        Ok(Self {
            classifier: MealClassifier::new(time_model),
            tracker: OrphanTracker::new(clock.clone()),
            recovery: RecoveryEngine::new(
                clock.clone(),
                notifier.clone(),
                settings.min_retained_ratio,
            ),
            popular: PopularityCache::new(
                clock.clone(),
                settings.popular_ttl,
                settings.popular_window_days,
                settings.popular_limit,
            ),
            storage,
            clock,
            notifier,
            time_model,
            catalog,
            index,
            ledger,
        })
    }

    pub fn open(path: &Path, settings: EngineSettings) -> Result<Self> {
        let storage = SqliteStorage::open(path)?;
        Self::new(
            Arc::new(storage),
            Arc::new(SystemClock),
            Arc::new(LogNotifier),
            settings,
        )
    }

    pub fn new_in_memory() -> Result<Self> {
        let storage = SqliteStorage::open_in_memory()?;
        Self::new(
            Arc::new(storage),
            Arc::new(SystemClock),
            Arc::new(LogNotifier),
            EngineSettings::default(),
        )
    }

    #[must_use]
    pub fn time_model(&self) -> &TimeModel {
        &self.time_model
    }

    /// Logical today in local time: before the night threshold it is still yesterday.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        let now = self.clock.now().with_timezone(&Local).naive_local();
        self.time_model.effective_today(now)
    }

    /// Reload the catalog and rebuild the index when its signature moved.
    fn refresh_catalog(&mut self) -> Result<Vec<Product>> {
        let products = self.catalog.load()?;
        if self.index.is_stale(&products) {
            debug!(count = products.len(), "rebuilding product index");
            self.index = ProductIndex::build(&products);
        }
        Ok(products)
    }

    fn products_changed(&self, count: usize, source: &str) {
        self.notifier.emit(&Event::ProductsChanged {
            count,
            source: source.to_string(),
        });
    }

    // --- Products ---

    pub fn list_products(&mut self, search: Option<&str>) -> Result<Vec<Product>> {
        let products = self.refresh_catalog()?;
        let Some(query) = search.map(normalize_name).filter(|q| !q.is_empty()) else {
            return Ok(products);
        };
        Ok(products
            .into_iter()
            .filter(|p| normalize_name(&p.name).contains(&query))
            .collect())
    }

    pub fn get_product(&mut self, key: &str) -> Result<Product> {
        self.refresh_catalog()?;
        self.index
            .find(key)
            .cloned()
            .ok_or_else(|| LarderError::NotFound(format!("Product '{key}' not found")))
    }

    /// Add a product to the catalog. Re-adding a deleted product lifts its tombstone.
    pub fn add_product(&mut self, new: &NewProduct) -> Result<Product> {
        validate_product(&new.name, &new.nutrients)?;
        let mut products = self.refresh_catalog()?;
        let name = new.name.trim().to_string();
        if self.index.get_by_name(&name).is_some() {
            return Err(LarderError::InvalidInput(format!(
                "Product '{name}' already exists"
            )));
        }

        let mut product = Product {
            id: Uuid::new_v4().to_string(),
            name,
            fingerprint: None,
            nutrients: new.nutrients.clone(),
            shared_origin_id: None,
            recovered_from: None,
            recovered_at: None,
        };
        let fingerprint = new
            .fingerprint
            .clone()
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| compute_fingerprint(&product));
        product.fingerprint = Some(fingerprint);

        self.lift_tombstones(&ProductRef::for_product(&product))?;
        products.push(product.clone());
        self.catalog.commit(&products)?;
        self.tracker.recalculate(&products);
        info!(name = %product.name, id = %product.id, "product added");
        self.products_changed(products.len(), "product-add");
        Ok(product)
    }

    /// Remove a product from the catalog and tombstone it so recovery leaves it alone.
    pub fn delete_product(&mut self, key: &str) -> Result<Product> {
        let mut products = self.refresh_catalog()?;
        let target = self
            .index
            .find(key)
            .map(|p| p.id.clone())
            .ok_or_else(|| LarderError::NotFound(format!("Product '{key}' not found")))?;
        let Some(pos) = products.iter().position(|p| p.id == target) else {
            return Err(LarderError::NotFound(format!("Product '{key}' not found")));
        };
        let product = products.remove(pos);

        // tombstone before the catalog write so a concurrent recovery pass skips it
        self.ledger.add(
            &product.name,
            Some(&product.id),
            product.fingerprint.as_deref(),
        )?;
        self.catalog.commit(&products)?;
        info!(name = %product.name, "product deleted");
        self.products_changed(products.len(), "product-delete");
        Ok(product)
    }

    /// Lift the tombstone for `name`. Returns false when there was none.
    /// The product itself comes back through the next recovery pass.
    pub fn restore_product(&mut self, name: &str) -> Result<bool> {
        if self.ledger.entry(name).is_none() {
            return Ok(false);
        }
        self.lift_tombstones(&ProductRef {
            id: None,
            fingerprint: None,
            name: name.to_string(),
        })?;
        Ok(true)
    }

    fn lift_tombstones(&mut self, pref: &ProductRef) -> Result<()> {
        let keys = [Some(pref.name.as_str()), pref.id.as_deref(), pref.fingerprint.as_deref()];
        for key in keys.into_iter().flatten() {
            if let Some(entry) = self.ledger.entry(key).cloned() {
                self.ledger
                    .remove(&entry.name, entry.id.as_deref(), entry.fingerprint.as_deref())?;
            }
        }
        Ok(())
    }

    // --- Ledger editing ---

    /// Create an empty meal on logical day `date`. Night times land in the next day's record.
    pub fn add_meal(&mut self, date: NaiveDate, time: Option<&str>) -> Result<Meal> {
        if let Some(time) = time {
            validate_time(time)?;
        }
        let stored_under = self.time_model.storage_date_for(date, time);
        let mut day = storage::load_day(self.storage.as_ref(), stored_under)?;
        let meal = Meal {
            id: Uuid::new_v4().to_string(),
            time: time.map(str::to_string),
            items: Vec::new(),
            meal_type_override: None,
        };
        day.meals.push(meal.clone());
        storage::save_day(self.storage.as_ref(), &day)?;
        debug!(%date, %stored_under, meal = %meal.id, "meal added");
        Ok(meal)
    }

    /// Add `grams` of a product to a meal, capturing the product's nutrients as a snapshot.
    pub fn add_item(
        &mut self,
        date: NaiveDate,
        meal_id: &str,
        product_key: &str,
        grams: f64,
    ) -> Result<Item> {
        validate_grams(grams)?;
        let product = self.get_product(product_key)?;
        let item = Item {
            id: Uuid::new_v4().to_string(),
            product_ref: ProductRef::for_product(&product),
            grams,
            nutrient_snapshot: Some(product.nutrients),
        };

        let (mut day, pos) = self.locate_meal(date, meal_id)?;
        day.meals[pos].items.push(item.clone());
        storage::save_day(self.storage.as_ref(), &day)?;
        self.popular.clear();
        Ok(item)
    }

    pub fn remove_meal(&mut self, date: NaiveDate, meal_id: &str) -> Result<Meal> {
        let (mut day, pos) = self.locate_meal(date, meal_id)?;
        let meal = day.meals.remove(pos);
        storage::save_day(self.storage.as_ref(), &day)?;
        self.popular.clear();
        Ok(meal)
    }

    /// Remove every meal of logical day `date`. Records stay in place, only emptied.
    pub fn clear_day(&mut self, date: NaiveDate) -> Result<usize> {
        let tm = self.time_model;
        let mut removed = 0;
        for (record_date, keep_night) in [(date, true), (next_day(date), false)] {
            let mut day = storage::load_day(self.storage.as_ref(), record_date)?;
            let before = day.meals.len();
            day.meals
                .retain(|m| tm.is_night_time(m.time.as_deref()) == keep_night);
            if day.meals.len() < before {
                removed += before - day.meals.len();
                storage::save_day(self.storage.as_ref(), &day)?;
            }
        }
        if removed > 0 {
            self.popular.clear();
        }
        info!(%date, removed, "day cleared");
        Ok(removed)
    }

    /// Find a meal of logical day `date` in its own record or, for night meals, the next one.
    fn locate_meal(&self, date: NaiveDate, meal_id: &str) -> Result<(Day, usize)> {
        for record_date in [date, next_day(date)] {
            let day = storage::load_day(self.storage.as_ref(), record_date)?;
            if let Some(pos) = day.meals.iter().position(|m| m.id == meal_id) {
                return Ok((day, pos));
            }
        }
        Err(LarderError::NotFound(format!(
            "Meal '{meal_id}' not found on {date}"
        )))
    }

    pub fn load_meals_for_date(&self, date: NaiveDate) -> Result<Vec<Meal>> {
        self.time_model
            .load_meals_for_date(self.storage.as_ref(), date)
    }

    pub fn classify_meal(&mut self, index: usize, meal: &Meal, all: &[Meal]) -> Result<MealLabel> {
        self.refresh_catalog()?;
        Ok(self.classifier.classify(index, meal, all, Some(&self.index)))
    }

    pub fn preview_meal_type(&self, date: NaiveDate, time: &str) -> Result<DayPart> {
        let existing = self.load_meals_for_date(date)?;
        Ok(self.classifier.preview_meal_type(time, &existing))
    }

    /// Meals of logical day `date` with their labels and energy.
    pub fn day_view(&mut self, date: NaiveDate) -> Result<DayView> {
        self.refresh_catalog()?;
        let meals = self.load_meals_for_date(date)?;
        let labels = self.classifier.classify_day(&meals, Some(&self.index));

        let views: Vec<MealView> = meals
            .into_iter()
            .zip(labels)
            .map(|(meal, label)| MealView {
                kcal: meal_stats(&meal, Some(&self.index)).total_kcal,
                stored_under: self
                    .time_model
                    .storage_date_for(date, meal.time.as_deref()),
                meal,
                label,
            })
            .collect();
        let total_kcal = views.iter().map(|v| v.kcal).sum();
        Ok(DayView {
            date,
            meals: views,
            total_kcal,
        })
    }

    // --- Orphans & recovery ---

    /// Resolve an item's product. A miss that is not a deletion is a `ResolutionMiss`.
    pub fn resolve_product(&mut self, item: &Item) -> Result<Product> {
        self.refresh_catalog()?;
        if let Some(product) = self.index.resolve_item(item) {
            return Ok(product.clone());
        }
        let name = item.product_ref.name.clone();
        if self.ledger.is_product_deleted(&item.product_ref) {
            return Err(LarderError::NotFound(format!("Product '{name}' was deleted")));
        }
        Err(LarderError::ResolutionMiss { name })
    }

    /// Scan stored days and report every product that no longer resolves.
    pub fn orphan_summary(&mut self) -> Result<Vec<OrphanSummary>> {
        self.refresh_catalog()?;
        self.ledger.reload()?;
        self.tracker.clear();
        self.tracker
            .scan_storage(self.storage.as_ref(), &self.index, &self.ledger)?;
        Ok(self.tracker.summary())
    }

    pub fn run_recovery(
        &mut self,
        remote: Option<&dyn RemoteCatalog>,
        options: RecoveryOptions,
    ) -> Result<RecoveryReport> {
        let report = self.recovery.run(
            self.storage.as_ref(),
            &self.catalog,
            &mut self.tracker,
            &mut self.ledger,
            remote,
            options,
        )?;
        self.refresh_catalog()?;
        Ok(report)
    }

    pub fn popular_products(&mut self, reference: NaiveDate) -> Result<Vec<Product>> {
        let catalog = self.refresh_catalog()?;
        let favorites = self.favorites()?;
        self.popular.get(
            self.storage.as_ref(),
            &self.time_model,
            &catalog,
            &favorites,
            reference,
        )
    }

    // --- Favorites ---

    pub fn favorites(&self) -> Result<BTreeSet<String>> {
        Ok(storage::read_json(self.storage.as_ref(), FAVORITES_KEY)?.unwrap_or_default())
    }

    /// Toggle a product in the favorites. Returns true when it is now a favorite.
    pub fn toggle_favorite(&mut self, key: &str) -> Result<bool> {
        let product = self.get_product(key)?;
        let mut favorites = self.favorites()?;
        let now_favorite = if favorites.remove(&product.id) {
            false
        } else {
            favorites.insert(product.id.clone());
            true
        };
        storage::write_json(self.storage.as_ref(), FAVORITES_KEY, &favorites)?;
        Ok(now_favorite)
    }

    // --- Tombstones ---

    pub fn add_tombstone(&mut self, name: &str, id: Option<&str>, fingerprint: Option<&str>) -> Result<()> {
        self.ledger.add(name, id, fingerprint)?;
        self.tracker.prune_deleted(&self.ledger);
        Ok(())
    }

    pub fn remove_tombstone(
        &mut self,
        name: &str,
        id: Option<&str>,
        fingerprint: Option<&str>,
    ) -> Result<()> {
        self.ledger.remove(name, id, fingerprint)
    }

    #[must_use]
    pub fn is_deleted(&self, key: &str) -> bool {
        self.ledger.is_deleted(key)
    }

    #[must_use]
    pub fn tombstones(&self) -> Vec<TombstoneEntry> {
        self.ledger.all()
    }

    pub fn sweep_tombstones(&mut self) -> Result<usize> {
        self.ledger.sweep()
    }

    /// Forget every deletion. Returns how many products were tombstoned.
    pub fn clear_tombstones(&mut self) -> Result<usize> {
        self.ledger.clear()
    }

    #[must_use]
    pub fn export_tombstones(&self) -> TombstoneExport {
        self.ledger.export_for_sync()
    }

    pub fn import_tombstones(&mut self, export: &TombstoneExport) -> Result<ImportReport> {
        let report = self.ledger.import_from_sync(export)?;
        self.tracker.prune_deleted(&self.ledger);
        Ok(report)
    }
}
