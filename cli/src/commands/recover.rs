use anyhow::{Context, Result};
use chrono::DateTime;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::LarderService;
use larder_core::recovery::{RecoveryOptions, RemoteCatalog};

use super::helpers::{json_error, truncate};
use crate::remote::SharedCatalogClient;

pub(crate) fn cmd_orphans(svc: &mut LarderService, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct OrphanRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Days")]
        days: usize,
        #[tabled(rename = "Last used")]
        last_used: String,
        #[tabled(rename = "Snapshot")]
        snapshot: &'static str,
        #[tabled(rename = "First seen")]
        first_seen: String,
    }

    let orphans = svc.orphan_summary()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&orphans)?);
        return Ok(());
    }
    if orphans.is_empty() {
        println!("Every logged product is in the catalog.");
        return Ok(());
    }

    let rows: Vec<OrphanRow> = orphans
        .iter()
        .map(|o| OrphanRow {
            name: truncate(&o.name, 35),
            days: o.days_count,
            last_used: o
                .used_in_days
                .last()
                .map(ToString::to_string)
                .unwrap_or_default(),
            snapshot: if o.has_inline_data { "yes" } else { "no" },
            first_seen: DateTime::from_timestamp_millis(o.first_seen)
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    println!("\nRun `larder recover` to rebuild them.");
    Ok(())
}

pub(crate) fn cmd_recover(
    svc: &mut LarderService,
    remote_url: Option<&str>,
    no_remote: bool,
    json: bool,
) -> Result<()> {
    let client = match remote_url.filter(|_| !no_remote) {
        Some(url) => Some(SharedCatalogClient::new(url).context("Failed to set up remote catalog")?),
        None => None,
    };
    let options = RecoveryOptions {
        try_remote: client.is_some(),
    };

    let report = match svc.run_recovery(client.as_ref().map(|c| c as &dyn RemoteCatalog), options) {
        Ok(report) => report,
        Err(e) if e.is_blocking() => {
            if json {
                println!("{}", json_error(&e.to_string()));
            } else {
                eprintln!("Recovery blocked: {e}");
                eprintln!("The catalog was left untouched.");
            }
            process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.recovered == 0 && report.still_missing.is_empty() {
        println!("Nothing to recover.");
    } else {
        println!(
            "Recovered {} products ({} from snapshots, {} from the shared catalog)",
            report.recovered, report.from_snapshot, report.from_remote
        );
    }
    if report.skipped_deleted > 0 {
        println!("  Skipped {} deleted products", report.skipped_deleted);
    }
    if !report.still_missing.is_empty() {
        println!("  Still missing: {}", report.still_missing.join(", "));
    }
    Ok(())
}
