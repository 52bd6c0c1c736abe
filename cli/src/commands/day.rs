use anyhow::Result;
use std::process;

use larder_core::LarderService;
use larder_core::models::Item;
use larder_core::time_model::format_meal_time;

use super::helpers::{find_meal_id, json_error, no_neg_zero, parse_date, parse_grams};

pub(crate) fn cmd_day(svc: &mut LarderService, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date, svc.today())?;
    let view = svc.day_view(date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    if view.meals.is_empty() {
        eprintln!("No meals for {date}");
        process::exit(2);
    }

    println!("=== {date} ===\n");
    for mv in &view.meals {
        let label = mv.label.name.to_uppercase();
        let icon = mv.label.icon;
        let time = mv
            .meal
            .time
            .as_deref()
            .map_or_else(|| "--:--".to_string(), format_meal_time);
        let short_id: String = mv.meal.id.chars().take(8).collect();
        let kcal = no_neg_zero(mv.kcal);
        let moved = if mv.stored_under == date {
            String::new()
        } else {
            format!(" (logged {})", mv.stored_under)
        };
        println!("  {icon} {label} {time}{moved} ({kcal:.0} kcal) [{short_id}]");
        for item in &mv.meal.items {
            println!("    {}", describe_item(svc, item));
        }
        println!();
    }
    let total = no_neg_zero(view.total_kcal);
    println!("  TOTAL: {total:.0} kcal");
    Ok(())
}

fn describe_item(svc: &mut LarderService, item: &Item) -> String {
    let grams = item.grams;
    match svc.resolve_product(item) {
        Ok(product) => {
            let kcal = product.nutrients.kcal_100() * grams / 100.0;
            format!("{}, {grams:.0}g, {kcal:.0} kcal", product.name)
        }
        Err(_) => {
            let kcal = item
                .nutrient_snapshot
                .as_ref()
                .map_or(0.0, |n| n.kcal_100() * grams / 100.0);
            format!(
                "{}, {grams:.0}g, {kcal:.0} kcal (missing from catalog)",
                item.product_ref.name
            )
        }
    }
}

pub(crate) fn cmd_meal_add(
    svc: &mut LarderService,
    date: Option<String>,
    time: Option<&str>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date, svc.today())?;
    let expected = time
        .map(|t| svc.preview_meal_type(date, t))
        .transpose()?;
    let meal = svc.add_meal(date, time)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "date": date, "meal": meal, "expected_type": expected })
        );
    } else {
        let at = time.map(|t| format!(" at {}", format_meal_time(t))).unwrap_or_default();
        println!("Added meal {}{at} on {date}", meal.id);
        if let Some(part) = expected {
            println!("  Expected type: {} {}", part.icon(), part.display_name());
        }
    }
    Ok(())
}

pub(crate) fn cmd_meal_remove(
    svc: &mut LarderService,
    meal_id: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date, svc.today())?;
    let meals = svc.load_meals_for_date(date)?;
    let Ok(id) = find_meal_id(&meals, meal_id) else {
        if json {
            println!("{}", json_error(&format!("Meal {meal_id} not found on {date}")));
        } else {
            eprintln!("Meal {meal_id} not found on {date}");
        }
        process::exit(2);
    };
    let meal = svc.remove_meal(date, &id)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": meal.id }));
    } else {
        println!("Deleted meal {} ({} items)", meal.id, meal.items.len());
    }
    Ok(())
}

pub(crate) fn cmd_meal_clear(svc: &mut LarderService, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date, svc.today())?;
    let removed = svc.clear_day(date)?;

    if json {
        println!("{}", serde_json::json!({ "date": date, "removed": removed }));
    } else {
        println!("Removed {removed} meals from {date}");
    }
    Ok(())
}

pub(crate) fn cmd_item_add(
    svc: &mut LarderService,
    meal_id: &str,
    product: &str,
    grams: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let grams = parse_grams(grams)?;
    let date = parse_date(date, svc.today())?;
    let meals = svc.load_meals_for_date(date)?;
    let id = find_meal_id(&meals, meal_id)?;
    let item = svc.add_item(date, &id, product, grams)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        let kcal = item
            .nutrient_snapshot
            .as_ref()
            .map_or(0.0, |n| n.kcal_100() * grams / 100.0);
        println!(
            "Added {grams:.0}g {} to meal {} ({kcal:.0} kcal)",
            item.product_ref.name, id
        );
    }
    Ok(())
}

pub(crate) fn cmd_hours(svc: &LarderService, json: bool) -> Result<()> {
    let tm = svc.time_model();
    let hours = tm.hours_order();

    if json {
        println!(
            "{}",
            serde_json::json!({ "night_threshold": tm.threshold(), "hours": hours })
        );
    } else {
        let line: Vec<String> = hours.iter().map(|h| format!("{h:02}")).collect();
        println!("Day runs {:02}:00 to {:02}:00 next morning", tm.threshold(), tm.threshold());
        println!("{}", line.join(" "));
    }
    Ok(())
}
