use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// CLI flags that take precedence over the environment. Built in `main` from
/// the parsed arguments so the config layer stays independent of clap.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub project: Option<String>,
    pub devices: Vec<String>,
    pub output: Option<PathBuf>,
    pub cursor_cache: Option<PathBuf>,
    pub max_pages: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub project_uid: String,
    pub device_uids: Vec<String>,
    pub api_token: String,
    pub event_files: String,

    pub page_limit: u32,
    pub max_pages_per_device: u32,
    pub http_timeout_secs: u64,

    pub output_path: PathBuf,
    pub cursor_cache_path: PathBuf,
}

impl Config {
    pub fn load(overrides: &CliOverrides) -> Result<Self> {
        dotenv().ok();

        let api_base_url = env_string(
            "EXPORTER_API_BASE_URL",
            Some("https://api.notefile.net/v1".to_string()),
        )?;
        let api_base_url = api_base_url.trim_end_matches('/').to_string();

        let api_token = env::var("EXPORTER_API_TOKEN")
            .or_else(|_| env::var("NOTEHUB_PIN"))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .context("EXPORTER_API_TOKEN or NOTEHUB_PIN is required")?;

        let project_uid = overrides
            .project
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| env_optional("EXPORTER_PROJECT_UID"))
            .ok_or_else(|| anyhow!("EXPORTER_PROJECT_UID or --project is required"))?;

        let device_uids = if overrides.devices.is_empty() {
            parse_device_list(&env_string("EXPORTER_DEVICE_UIDS", Some(String::new()))?)
        } else {
            overrides.devices.clone()
        };
        if device_uids.is_empty() {
            return Err(anyhow!(
                "no devices configured; set EXPORTER_DEVICE_UIDS or pass --device"
            ));
        }

        let event_files = env_string("EXPORTER_EVENT_FILES", Some("_air.qo".to_string()))?;
        let page_limit = env_u64("EXPORTER_PAGE_LIMIT", Some(100))? as u32;
        let max_pages_per_device = match overrides.max_pages {
            Some(value) => value,
            None => env_u64("EXPORTER_MAX_PAGES_PER_DEVICE", Some(20))? as u32,
        };
        let http_timeout_secs = env_u64("EXPORTER_HTTP_TIMEOUT_SECS", Some(30))?;

        let output_path = match overrides.output.clone() {
            Some(path) => path,
            None => PathBuf::from(env_string(
                "EXPORTER_OUTPUT_PATH",
                Some("data.csv".to_string()),
            )?),
        };
        let cursor_cache_path = match overrides.cursor_cache.clone() {
            Some(path) => path,
            None => PathBuf::from(env_string(
                "EXPORTER_CURSOR_CACHE_PATH",
                Some("event_cursor_cache.json".to_string()),
            )?),
        };

        Ok(Self {
            api_base_url,
            project_uid,
            device_uids,
            api_token,
            event_files,
            page_limit,
            max_pages_per_device,
            http_timeout_secs,
            output_path,
            cursor_cache_path,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_device_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
