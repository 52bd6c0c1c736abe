use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Days, Duration, NaiveDate};
use tracing::debug;

use crate::clock::Clock;
use crate::error::Result;
use crate::models::Product;
use crate::product_index::{ProductIndex, catalog_signature, favorites_signature};
use crate::storage::Storage;
use crate::time_model::TimeModel;

pub const DEFAULT_TTL_MINUTES: i64 = 10;
pub const DEFAULT_WINDOW_DAYS: u32 = 30;
pub const DEFAULT_LIMIT: usize = 20;

struct CacheEntry {
    timestamp: i64,
    ranked: Vec<Product>,
}

/// Ranked "frequently used" products per month, invalidated by TTL and by the
/// catalog and favorites signatures being part of the key.
pub struct PopularityCache {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    window_days: u32,
    limit: usize,
    entries: HashMap<String, CacheEntry>,
    scans: usize,
}

impl PopularityCache {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, window_days: u32, limit: usize) -> Self {
        Self {
            clock,
            ttl,
            window_days,
            limit,
            entries: HashMap::new(),
            scans: 0,
        }
    }

    #[must_use]
    pub fn cache_key(catalog: &[Product], favorites: &BTreeSet<String>, reference: NaiveDate) -> String {
        format!(
            "{}::{}::{}",
            reference.format("%Y-%m"),
            catalog_signature(catalog),
            favorites_signature(favorites)
        )
    }

    /// Number of ledger scans performed so far, i.e. cache misses.
    #[must_use]
    pub fn scans(&self) -> usize {
        self.scans
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(
        &mut self,
        storage: &dyn Storage,
        time_model: &TimeModel,
        catalog: &[Product],
        favorites: &BTreeSet<String>,
        reference: NaiveDate,
    ) -> Result<Vec<Product>> {
        let now = self.clock.now_millis();
        let ttl = self.ttl.num_milliseconds();
        self.entries.retain(|_, e| now - e.timestamp < ttl);

        let key = Self::cache_key(catalog, favorites, reference);
        if let Some(hit) = self.entries.get(&key) {
            debug!("popular products cache hit");
            return Ok(hit.ranked.clone());
        }

        let ranked = self.rank(storage, time_model, catalog, favorites, reference)?;
        self.scans += 1;
        self.entries.insert(
            key,
            CacheEntry {
                timestamp: now,
                ranked: ranked.clone(),
            },
        );
        Ok(ranked)
    }

    fn rank(
        &self,
        storage: &dyn Storage,
        time_model: &TimeModel,
        catalog: &[Product],
        favorites: &BTreeSet<String>,
        reference: NaiveDate,
    ) -> Result<Vec<Product>> {
        let index = ProductIndex::build(catalog);
        // (product, uses) in first-seen order so equal counts keep a stable order
        let mut tally: Vec<(&Product, usize)> = Vec::new();
        let mut position: HashMap<String, usize> = HashMap::new();

        for offset in 0..self.window_days {
            let Some(date) = reference.checked_sub_days(Days::new(u64::from(offset))) else {
                break;
            };
            for meal in time_model.load_meals_for_date(storage, date)? {
                for item in &meal.items {
                    let Some(product) = index.resolve_item(item) else {
                        continue;
                    };
                    let key = popularity_key(product);
                    match position.get(&key) {
                        Some(&i) => tally[i].1 += 1,
                        None => {
                            position.insert(key, tally.len());
                            tally.push((product, 1));
                        }
                    }
                }
            }
        }

        tally.sort_by(|(a, ac), (b, bc)| {
            let a_fav = favorites.contains(&popularity_key(a));
            let b_fav = favorites.contains(&popularity_key(b));
            b_fav.cmp(&a_fav).then(bc.cmp(ac))
        });
        Ok(tally
            .into_iter()
            .take(self.limit)
            .map(|(p, _)| p.clone())
            .collect())
    }
}

fn popularity_key(product: &Product) -> String {
    if product.id.is_empty() {
        product.name.clone()
    } else {
        product.id.clone()
    }
}
