use serde::Serialize;

use crate::models::{DayPart, Meal, MealLabel};
use crate::product_index::ProductIndex;
use crate::time_model::TimeModel;

const SLOT_TYPES: [DayPart; 6] = [
    DayPart::Snack1,
    DayPart::Lunch,
    DayPart::Snack2,
    DayPart::Dinner,
    DayPart::Snack3,
    DayPart::Night,
];

const MAIN_MIN_PRODUCTS: usize = 3;
const MAIN_MIN_GRAMS: f64 = 200.0;
const MAIN_MIN_KCAL: f64 = 300.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MealStats {
    pub total_grams: f64,
    pub product_count: usize,
    pub total_kcal: f64,
}

/// Totals for one meal. Kcal come from the resolved product, or from the item's
/// snapshot when the product is gone.
#[must_use]
pub fn meal_stats(meal: &Meal, products: Option<&ProductIndex>) -> MealStats {
    let mut total_grams = 0.0;
    let mut total_kcal = 0.0;
    for item in &meal.items {
        total_grams += item.grams;
        let per_100 = products
            .and_then(|idx| idx.resolve_item(item))
            .map(|p| p.nutrients.kcal_100())
            .or_else(|| item.nutrient_snapshot.as_ref().map(|n| n.kcal_100()));
        if let Some(kcal) = per_100 {
            total_kcal += kcal * item.grams / 100.0;
        }
    }
    MealStats {
        total_grams,
        product_count: meal.items.len(),
        total_kcal: total_kcal.round(),
    }
}

/// A meal counts as a main meal when it has 3+ products, 200g+ across 2+ products, or 300+ kcal.
#[must_use]
pub fn is_main_meal(stats: &MealStats) -> bool {
    stats.product_count >= MAIN_MIN_PRODUCTS
        || (stats.total_grams >= MAIN_MIN_GRAMS && stats.product_count >= 2)
        || stats.total_kcal >= MAIN_MIN_KCAL
}

/// Assigns day-part labels. Pure and deterministic for a fixed set of meals.
#[derive(Debug, Clone, Copy, Default)]
pub struct MealClassifier {
    time_model: TimeModel,
}

impl MealClassifier {
    #[must_use]
    pub fn new(time_model: TimeModel) -> Self {
        Self { time_model }
    }

    /// Label the meal at `index` of `all` (sorted as returned by
    /// [`TimeModel::load_meals_for_date`]).
    #[must_use]
    pub fn classify(
        &self,
        index: usize,
        meal: &Meal,
        all: &[Meal],
        products: Option<&ProductIndex>,
    ) -> MealLabel {
        if all.is_empty() {
            return DayPart::Snack1.into();
        }
        if let Some(part) = meal.meal_type_override {
            return part.into();
        }
        if index == 0 {
            return DayPart::Breakfast.into();
        }

        let is_main = is_main_meal(&meal_stats(meal, products));
        let Some(slot) = self.slot_index(meal, all) else {
            return fallback_type(index, is_main).into();
        };

        let mut part = promote(slot, is_main);

        let earlier: Vec<DayPart> = all
            .iter()
            .take(index)
            .enumerate()
            .map(|(i, m)| self.simple_type(i, m, all, products))
            .collect();
        if part == DayPart::Lunch && earlier.contains(&DayPart::Lunch) {
            part = DayPart::Snack2;
        }
        if part == DayPart::Dinner && earlier.contains(&DayPart::Dinner) {
            part = DayPart::Snack3;
        }
        part.into()
    }

    #[must_use]
    pub fn classify_day(&self, meals: &[Meal], products: Option<&ProductIndex>) -> Vec<MealLabel> {
        meals
            .iter()
            .enumerate()
            .map(|(i, m)| self.classify(i, m, meals, products))
            .collect()
    }

    /// Type a meal at `time` would get if added now, before it has any items.
    #[must_use]
    pub fn preview_meal_type(&self, time: &str, existing: &[Meal]) -> DayPart {
        if existing.is_empty() {
            return DayPart::Breakfast;
        }
        let first = existing
            .iter()
            .filter_map(|m| self.time_model.time_to_minutes(m.time.as_deref()))
            .min();
        let (Some(breakfast), Some(current)) = (first, self.time_model.time_to_minutes(Some(time)))
        else {
            return DayPart::Snack1;
        };
        if current < breakfast {
            return DayPart::Breakfast;
        }
        SLOT_TYPES[self.slot_between(breakfast, current)]
    }

    /// Same slot and promotion rules without the duplicate check. Used for earlier meals.
    fn simple_type(
        &self,
        index: usize,
        meal: &Meal,
        all: &[Meal],
        products: Option<&ProductIndex>,
    ) -> DayPart {
        if let Some(part) = meal.meal_type_override {
            return part;
        }
        if index == 0 {
            return DayPart::Breakfast;
        }
        match self.slot_index(meal, all) {
            Some(slot) => promote(slot, is_main_meal(&meal_stats(meal, products))),
            None => DayPart::Snack1,
        }
    }

    fn slot_index(&self, meal: &Meal, all: &[Meal]) -> Option<usize> {
        let breakfast = self.time_model.time_to_minutes(all.first()?.time.as_deref())?;
        let current = self.time_model.time_to_minutes(meal.time.as_deref())?;
        Some(self.slot_between(breakfast, current))
    }

    #[allow(clippy::cast_sign_loss)]
    fn slot_between(&self, breakfast: u32, current: u32) -> usize {
        let span = f64::from(self.time_model.day_end_minutes()) - f64::from(breakfast);
        if span <= 0.0 {
            // breakfast at or after the end of the day
            return SLOT_TYPES.len() - 1;
        }
        let slot = ((f64::from(current) - f64::from(breakfast)) / (span / 6.0)).floor();
        slot.clamp(0.0, 5.0) as usize
    }
}

fn promote(slot: usize, is_main: bool) -> DayPart {
    let part = SLOT_TYPES[slot.min(SLOT_TYPES.len() - 1)];
    if part.is_snack() && is_main {
        match slot {
            0 | 1 => return DayPart::Lunch,
            2 | 3 => return DayPart::Dinner,
            _ => {}
        }
    }
    part
}

fn fallback_type(index: usize, is_main: bool) -> DayPart {
    let order = [
        DayPart::Breakfast,
        if is_main { DayPart::Lunch } else { DayPart::Snack1 },
        if is_main { DayPart::Dinner } else { DayPart::Snack2 },
        DayPart::Snack3,
        DayPart::Night,
    ];
    order[index.min(order.len() - 1)]
}
