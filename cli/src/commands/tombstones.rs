use anyhow::{Context, Result};
use chrono::DateTime;
use std::path::Path;
use tabled::{Table, Tabled, settings::Style};

use larder_core::LarderService;
use larder_core::tombstones::TombstoneExport;

use super::helpers::truncate;

pub(crate) fn cmd_tombstones_list(svc: &LarderService, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct TombstoneRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Deleted")]
        deleted_at: String,
    }

    let entries = svc.tombstones();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No deleted products.");
        return Ok(());
    }

    let rows: Vec<TombstoneRow> = entries
        .iter()
        .map(|e| TombstoneRow {
            name: truncate(&e.name, 35),
            id: e.id.as_deref().map(|id| truncate(id, 11)).unwrap_or_default(),
            deleted_at: DateTime::from_timestamp_millis(e.deleted_at)
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
        })
        .collect();
    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_tombstones_sweep(svc: &mut LarderService, json: bool) -> Result<()> {
    let removed = svc.sweep_tombstones()?;

    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else {
        println!("Removed {removed} expired tombstone keys");
    }
    Ok(())
}

pub(crate) fn cmd_tombstones_clear(svc: &mut LarderService, json: bool) -> Result<()> {
    let cleared = svc.clear_tombstones()?;

    if json {
        println!("{}", serde_json::json!({ "cleared": cleared }));
    } else {
        println!("Forgot {cleared} deleted products");
    }
    Ok(())
}

pub(crate) fn cmd_tombstones_export(svc: &LarderService, output: Option<&Path>) -> Result<()> {
    let body = serde_json::to_string_pretty(&svc.export_tombstones())?;
    match output {
        Some(path) => {
            std::fs::write(path, body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Exported tombstones to {}", path.display());
        }
        None => println!("{body}"),
    }
    Ok(())
}

pub(crate) fn cmd_tombstones_import(svc: &mut LarderService, file: &Path, json: bool) -> Result<()> {
    let body = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let export: TombstoneExport = serde_json::from_str(&body)
        .with_context(|| format!("{} is not a tombstone export", file.display()))?;
    let report = svc.import_tombstones(&export)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Imported {} tombstone keys", report.imported);
        if !report.conflicts.is_empty() {
            println!(
                "  {} keys differed, the newer deletion was kept: {}",
                report.conflicts.len(),
                report.conflicts.join(", ")
            );
        }
    }
    Ok(())
}
