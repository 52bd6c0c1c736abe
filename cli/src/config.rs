use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use std::path::PathBuf;

use larder_core::EngineSettings;
use larder_core::time_model::NIGHT_HOUR_THRESHOLD;

const DATA_DIR_ENV: &str = "LARDER_DATA_DIR";
const REMOTE_URL_ENV: &str = "LARDER_REMOTE_URL";
const NIGHT_THRESHOLD_ENV: &str = "LARDER_NIGHT_THRESHOLD";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    /// Shared-catalog endpoint. Remote recovery is off when unset.
    pub remote_url: Option<String>,
    pub night_threshold: u32,
}

impl Config {
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => ProjectDirs::from("", "", "larder")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("larder.db");
        let remote_url = std::env::var(REMOTE_URL_ENV)
            .ok()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        let night_threshold = parse_night_threshold(std::env::var(NIGHT_THRESHOLD_ENV).ok().as_deref())?;

        Ok(Config {
            db_path,
            data_dir,
            remote_url,
            night_threshold,
        })
    }

    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            night_threshold: self.night_threshold,
            ..EngineSettings::default()
        }
    }
}

fn parse_night_threshold(raw: Option<&str>) -> Result<u32> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(NIGHT_HOUR_THRESHOLD);
    };
    let hour: u32 = raw
        .parse()
        .with_context(|| format!("Invalid {NIGHT_THRESHOLD_ENV} '{raw}'. Use an hour from 0 to 12"))?;
    if hour > 12 {
        bail!("{NIGHT_THRESHOLD_ENV} must be between 0 and 12, got {hour}");
    }
    Ok(hour)
}
