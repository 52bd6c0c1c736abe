use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{LarderError, Result};

/// Per-100g nutrient values. Every field is optional because snapshots taken
/// from older clients only carry a subset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nutrients {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kcal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple_carbs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complex_carbs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bad_fat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub good_fat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trans_fat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiber: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sodium: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harm: Option<f64>,
}

impl Nutrients {
    /// Carbs per 100g, falling back to simple + complex.
    #[must_use]
    pub fn carbs_100(&self) -> f64 {
        self.carbs
            .filter(|c| *c > 0.0)
            .unwrap_or_else(|| {
                self.simple_carbs.unwrap_or(0.0) + self.complex_carbs.unwrap_or(0.0)
            })
    }

    /// Fat per 100g, falling back to bad + good + trans.
    #[must_use]
    pub fn fat_100(&self) -> f64 {
        self.fat.filter(|f| *f > 0.0).unwrap_or_else(|| {
            self.bad_fat.unwrap_or(0.0) + self.good_fat.unwrap_or(0.0) + self.trans_fat.unwrap_or(0.0)
        })
    }

    /// Energy per 100g. Derived from macros when no explicit value is stored.
    #[must_use]
    pub fn kcal_100(&self) -> f64 {
        self.kcal.filter(|k| *k > 0.0).unwrap_or_else(|| {
            4.0 * (self.protein.unwrap_or(0.0) + self.carbs_100()) + 8.0 * self.fat_100()
        })
    }

    /// Whether this snapshot carries enough to rebuild a product from it.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.kcal.is_some() || self.protein.is_some() || self.carbs.is_some() || self.fat.is_some()
    }

    fn values(&self) -> [Option<f64>; 13] {
        [
            self.kcal,
            self.protein,
            self.carbs,
            self.fat,
            self.simple_carbs,
            self.complex_carbs,
            self.bad_fat,
            self.good_fat,
            self.trans_fat,
            self.fiber,
            self.sodium,
            self.gi,
            self.harm,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoverySource {
    Snapshot,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(flatten)]
    pub nutrients: Nutrients,
    /// Id of the shared-catalog product this one was cloned from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_origin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_from: Option<RecoverySource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub nutrients: Nutrients,
    pub fingerprint: Option<String>,
}

/// How a ledger entry points at its product. Any of the three may have gone
/// stale independently of the others.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub name: String,
}

impl ProductRef {
    #[must_use]
    pub fn for_product(product: &Product) -> Self {
        Self {
            id: Some(product.id.clone()),
            fingerprint: product.fingerprint.clone(),
            name: product.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(rename = "product")]
    pub product_ref: ProductRef,
    pub grams: f64,
    /// Copy of the product's nutrients taken when the item was added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrient_snapshot: Option<Nutrients>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub id: String,
    /// "HH:MM"; night meals may also be stored as 24:xx-26:xx.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_type_override: Option<DayPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Day {
    pub date: NaiveDate,
    #[serde(default)]
    pub meals: Vec<Meal>,
}

impl Day {
    #[must_use]
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            meals: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayPart {
    Breakfast,
    Snack1,
    Lunch,
    Snack2,
    Dinner,
    Snack3,
    Night,
}

impl DayPart {
    pub const ALL: [DayPart; 7] = [
        DayPart::Breakfast,
        DayPart::Snack1,
        DayPart::Lunch,
        DayPart::Snack2,
        DayPart::Dinner,
        DayPart::Snack3,
        DayPart::Night,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DayPart::Breakfast => "breakfast",
            DayPart::Snack1 => "snack1",
            DayPart::Lunch => "lunch",
            DayPart::Snack2 => "snack2",
            DayPart::Dinner => "dinner",
            DayPart::Snack3 => "snack3",
            DayPart::Night => "night",
        }
    }

    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            DayPart::Breakfast => "Breakfast",
            DayPart::Snack1 | DayPart::Snack2 | DayPart::Snack3 => "Snack",
            DayPart::Lunch => "Lunch",
            DayPart::Dinner => "Dinner",
            DayPart::Night => "Night meal",
        }
    }

    #[must_use]
    pub fn icon(self) -> &'static str {
        match self {
            DayPart::Breakfast => "🍳",
            DayPart::Snack1 => "🍎",
            DayPart::Lunch => "🍲",
            DayPart::Snack2 => "🥜",
            DayPart::Dinner => "🍽️",
            DayPart::Snack3 => "🧀",
            DayPart::Night => "🌙",
        }
    }

    #[must_use]
    pub fn order(self) -> u8 {
        match self {
            DayPart::Breakfast => 1,
            DayPart::Snack1 => 2,
            DayPart::Lunch => 3,
            DayPart::Snack2 => 4,
            DayPart::Dinner => 5,
            DayPart::Snack3 => 6,
            DayPart::Night => 7,
        }
    }

    #[must_use]
    pub fn is_snack(self) -> bool {
        matches!(self, DayPart::Snack1 | DayPart::Snack2 | DayPart::Snack3)
    }
}

impl fmt::Display for DayPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayPart {
    type Err = LarderError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        DayPart::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| {
                let valid: Vec<&str> = DayPart::ALL.iter().map(|p| p.as_str()).collect();
                LarderError::InvalidInput(format!(
                    "Invalid meal type '{s}'. Must be one of: {}",
                    valid.join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MealLabel {
    #[serde(rename = "type")]
    pub day_part: DayPart,
    pub name: &'static str,
    pub icon: &'static str,
}

impl From<DayPart> for MealLabel {
    fn from(day_part: DayPart) -> Self {
        Self {
            day_part,
            name: day_part.display_name(),
            icon: day_part.icon(),
        }
    }
}

// --- Tombstones ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TombstoneKeyKind {
    #[default]
    Name,
    Id,
    Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TombstoneEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub deleted_at: i64,
    #[serde(default)]
    pub key_kind: TombstoneKeyKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    /// Keys present on both sides with different timestamps; the newer one was kept.
    pub conflicts: Vec<String>,
}

// --- Orphans & recovery ---

#[derive(Debug, Clone, PartialEq)]
pub struct OrphanRecord {
    pub name: String,
    pub product_id: Option<String>,
    pub fingerprint: Option<String>,
    pub used_in_days: BTreeSet<NaiveDate>,
    pub first_seen: i64,
    pub first_seen_date: NaiveDate,
    pub snapshot: Option<Nutrients>,
}

impl OrphanRecord {
    #[must_use]
    pub fn product_ref(&self) -> ProductRef {
        ProductRef {
            id: self.product_id.clone(),
            fingerprint: self.fingerprint.clone(),
            name: self.name.clone(),
        }
    }

    #[must_use]
    pub fn has_inline_data(&self) -> bool {
        self.snapshot.as_ref().is_some_and(Nutrients::has_data)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    pub used_in_days: Vec<NaiveDate>,
    pub days_count: usize,
    pub has_inline_data: bool,
    pub first_seen: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryReport {
    pub recovered: usize,
    pub from_snapshot: usize,
    pub from_remote: usize,
    pub skipped_deleted: usize,
    pub still_missing: Vec<String>,
}

// --- Day view ---

#[derive(Debug, Clone, Serialize)]
pub struct MealView {
    pub meal: Meal,
    pub label: MealLabel,
    /// Calendar date of the record the meal is stored under.
    pub stored_under: NaiveDate,
    pub kcal: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayView {
    pub date: NaiveDate,
    pub meals: Vec<MealView>,
    pub total_kcal: f64,
}

/// Validate product data: name must not be empty, nutrients must not be negative.
pub fn validate_product(name: &str, nutrients: &Nutrients) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LarderError::InvalidInput(
            "Product name must not be empty".to_string(),
        ));
    }
    if nutrients.values().iter().flatten().any(|v| *v < 0.0 || !v.is_finite()) {
        return Err(LarderError::InvalidInput(format!(
            "Nutrient values for '{name}' must be finite and not negative"
        )));
    }
    Ok(())
}

pub fn validate_grams(grams: f64) -> Result<()> {
    if !grams.is_finite() || grams <= 0.0 {
        return Err(LarderError::InvalidInput(
            "grams must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Accepts "HH:MM" with hours 0-26 (24-26 being night hours of the same logical day).
pub fn validate_time(time: &str) -> Result<()> {
    let invalid = || {
        LarderError::InvalidInput(format!("Invalid meal time '{time}'. Use HH:MM"))
    };
    let (h, m) = time.split_once(':').ok_or_else(invalid)?;
    let hh: u32 = h.trim().parse().map_err(|_| invalid())?;
    let mm: u32 = m.trim().parse().map_err(|_| invalid())?;
    if hh > 26 || mm > 59 {
        return Err(invalid());
    }
    Ok(())
}
