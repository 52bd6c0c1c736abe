use anyhow::{Context, Result, bail};
use std::collections::BTreeSet;
use chrono::NaiveDate;
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::models::{Meal, Product};
use larder_core::time_model::{next_day, previous_day};

pub(crate) fn parse_grams(s: &str) -> Result<f64> {
    let trimmed = s.trim().trim_end_matches('g').trim();
    let value: f64 = trimmed
        .parse()
        .with_context(|| format!("Invalid amount: '{s}'. Use a number like '150' or '150g'"))?;
    if value <= 0.0 {
        bail!("Amount must be greater than 0");
    }
    Ok(value)
}

/// Parse a date argument. `today` is the logical today, so "yesterday" after
/// midnight but before the night threshold still means the day before that.
pub(crate) fn parse_date(date_str: Option<String>, today: NaiveDate) -> Result<NaiveDate> {
    match date_str {
        None => Ok(today),
        Some(s) => match s.as_str() {
            "today" => Ok(today),
            "yesterday" => Ok(previous_day(today)),
            "tomorrow" => Ok(next_day(today)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Find a meal by its id or an unambiguous id prefix.
pub(crate) fn find_meal_id(meals: &[Meal], key: &str) -> Result<String> {
    if let Some(meal) = meals.iter().find(|m| m.id == key) {
        return Ok(meal.id.clone());
    }
    let matches: Vec<&Meal> = meals.iter().filter(|m| m.id.starts_with(key)).collect();
    match matches.as_slice() {
        [meal] => Ok(meal.id.clone()),
        [] => bail!("No meal matching '{key}'"),
        _ => bail!("Meal id '{key}' is ambiguous, {} meals match", matches.len()),
    }
}

pub(crate) fn print_product_table(products: &[Product], favorites: &BTreeSet<String>) {
    #[derive(Tabled)]
    struct ProductRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Kcal/100g")]
        kcal: String,
        #[tabled(rename = "P/100g")]
        protein: String,
        #[tabled(rename = "C/100g")]
        carbs: String,
        #[tabled(rename = "F/100g")]
        fat: String,
        #[tabled(rename = "")]
        marks: String,
    }

    let rows: Vec<ProductRow> = products
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let n = &p.nutrients;
            let mut marks = String::new();
            if favorites.contains(&p.id) {
                marks.push('★');
            }
            if p.recovered_from.is_some() {
                marks.push_str(" recovered");
            }
            ProductRow {
                idx: i + 1,
                id: truncate(&p.id, 11),
                name: truncate(&p.name, 35),
                kcal: format!("{:.0}", no_neg_zero(n.kcal_100())),
                protein: n.protein.map_or("-".into(), |v| format!("{v:.1}")),
                carbs: n.carbs.map_or("-".into(), |v| format!("{v:.1}")),
                fat: n.fat.map_or("-".into(), |v| format!("{v:.1}")),
                marks: marks.trim().to_string(),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..7)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
