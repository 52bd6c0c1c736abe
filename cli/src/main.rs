mod commands;
mod config;
mod remote;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    ProductArgs, cmd_day, cmd_favorite, cmd_hours, cmd_item_add, cmd_meal_add, cmd_meal_clear,
    cmd_meal_remove, cmd_orphans, cmd_popular, cmd_product_add, cmd_product_delete,
    cmd_product_list, cmd_product_restore, cmd_recover, cmd_tombstones_clear,
    cmd_tombstones_export, cmd_tombstones_import, cmd_tombstones_list, cmd_tombstones_sweep,
};
use crate::config::Config;
use larder_core::LarderService;

#[derive(Parser)]
#[command(
    name = "larder",
    version,
    about = "A local-first meal ledger whose product catalog heals itself"
)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the meals of a logical day with their types (defaults to today)
    Day {
        /// Date to show (YYYY-MM-DD or today/yesterday/tomorrow)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add, remove or clear meals
    Meal {
        #[command(subcommand)]
        command: MealCommands,
    },
    /// Add products to meals
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Manage the product catalog
    Product {
        #[command(subcommand)]
        command: ProductCommands,
    },
    /// Toggle a product in the favorites
    Favorite {
        /// Product name or ID
        product: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List logged products that are missing from the catalog
    Orphans {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rebuild missing products from ledger snapshots and the shared catalog
    Recover {
        /// Only use snapshots stored in the ledger
        #[arg(long)]
        no_remote: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Most used products of the last 30 days, favorites first
    Popular {
        /// Reference date (YYYY-MM-DD or today/yesterday/tomorrow)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and sync deleted-product markers
    Tombstones {
        #[command(subcommand)]
        command: TombstoneCommands,
    },
    /// Show the hour order of a logical day
    Hours {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MealCommands {
    /// Add an empty meal
    Add {
        /// Logical day (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Time as HH:MM. Times before the night threshold belong to the previous evening.
        #[arg(long)]
        time: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a meal by ID or ID prefix
    Remove {
        meal_id: String,
        /// Logical day the meal belongs to (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every meal of a logical day
    Clear {
        /// Logical day (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ItemCommands {
    /// Add an amount of a product to a meal
    Add {
        /// Meal ID or ID prefix
        meal_id: String,
        /// Product name or ID
        product: String,
        /// Amount in grams (e.g. "150" or "150g")
        grams: String,
        /// Logical day the meal belongs to (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProductCommands {
    /// Add a product
    Add {
        /// Product name
        name: String,
        /// Kcal per 100g
        #[arg(long)]
        kcal: f64,
        /// Protein per 100g
        #[arg(long)]
        protein: Option<f64>,
        /// Carbs per 100g
        #[arg(long)]
        carbs: Option<f64>,
        /// Fat per 100g
        #[arg(long)]
        fat: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List/search the catalog
    List {
        /// Search query to filter products
        #[arg(short, long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a product and keep it from being recovered
    Delete {
        /// Product name or ID
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Lift the deletion of a product so recovery may bring it back
    Restore {
        /// Product name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TombstoneCommands {
    /// List deleted products
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop markers older than the retention period
    Sweep {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget every deletion so recovery may bring those products back
    Clear {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the ledger as JSON for another device
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Merge a ledger exported on another device
    Import {
        /// Path to the exported JSON
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    debug!(data_dir = %config.data_dir.display(), "opening store");
    let mut svc = LarderService::open(&config.db_path, config.settings())
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    let svc = &mut svc;

    match cli.command {
        Commands::Day { date, json } => cmd_day(svc, date, json),
        Commands::Meal { command } => match command {
            MealCommands::Add { date, time, json } => {
                cmd_meal_add(svc, date, time.as_deref(), json)
            }
            MealCommands::Remove {
                meal_id,
                date,
                json,
            } => cmd_meal_remove(svc, &meal_id, date, json),
            MealCommands::Clear { date, json } => cmd_meal_clear(svc, date, json),
        },
        Commands::Item { command } => match command {
            ItemCommands::Add {
                meal_id,
                product,
                grams,
                date,
                json,
            } => cmd_item_add(svc, &meal_id, &product, &grams, date, json),
        },
        Commands::Product { command } => match command {
            ProductCommands::Add {
                name,
                kcal,
                protein,
                carbs,
                fat,
                json,
            } => cmd_product_add(
                svc,
                ProductArgs {
                    name,
                    kcal,
                    protein,
                    carbs,
                    fat,
                },
                json,
            ),
            ProductCommands::List { search, json } => cmd_product_list(svc, search.as_deref(), json),
            ProductCommands::Delete { name, json } => cmd_product_delete(svc, &name, json),
            ProductCommands::Restore { name, json } => cmd_product_restore(svc, &name, json),
        },
        Commands::Favorite { product, json } => cmd_favorite(svc, &product, json),
        Commands::Orphans { json } => cmd_orphans(svc, json),
        Commands::Recover { no_remote, json } => {
            cmd_recover(svc, config.remote_url.as_deref(), no_remote, json)
        }
        Commands::Popular { date, json } => cmd_popular(svc, date, json),
        Commands::Tombstones { command } => match command {
            TombstoneCommands::List { json } => cmd_tombstones_list(svc, json),
            TombstoneCommands::Sweep { json } => cmd_tombstones_sweep(svc, json),
            TombstoneCommands::Clear { json } => cmd_tombstones_clear(svc, json),
            TombstoneCommands::Export { output } => cmd_tombstones_export(svc, output.as_deref()),
            TombstoneCommands::Import { file, json } => cmd_tombstones_import(svc, &file, json),
        },
        Commands::Hours { json } => cmd_hours(svc, json),
    }
}
