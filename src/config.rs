//! Harvest configuration: defaults, optional TOML file, CLI overrides.
//!
//! Precedence is CLI flag → config file → built-in default. The
//! collection convenience mapping turns a bare collection slug into both
//! the base URL and the output directory, exactly mirroring how the tool
//! is usually pointed at a Library of Congress collection.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Prefix for the collection slug → base URL convenience mapping.
pub const LOC_COLLECTIONS_BASE: &str = "https://www.loc.gov/collections/";

/// Collection harvested when nothing at all is specified.
pub const DEFAULT_COLLECTION: &str = "brady-handy";

/// Effective configuration for one harvest run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base collection URL; pre-existing query parameters are preserved.
    pub base_url: String,
    /// Output root; one subdirectory per record is created beneath it.
    pub output_dir: PathBuf,
    /// Records requested per page (the `c` parameter).
    pub per_page: u32,
    /// First page number to fetch (the `sp` parameter).
    pub start_page: u32,
    /// Polite delay between pages, in seconds.
    pub delay_secs: f64,
    /// Maximum fetch attempts per page before it is reported failed.
    pub max_retries: u32,
    /// Base backoff delay between attempts, in milliseconds.
    pub backoff_ms: u64,
    /// Per-request timeout for page fetches and probes, in seconds.
    pub timeout_secs: u64,
    /// Download referenced image assets.
    pub download_images: bool,
    /// Write per-record metadata documents.
    pub save_json: bool,
    /// Avoid rewriting/redownloading content that is already current.
    pub skip_existing: bool,
    /// Set when this process is a self-verification child.
    pub self_check_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: collection_base_url(DEFAULT_COLLECTION),
            output_dir: Path::new("output").join(DEFAULT_COLLECTION),
            per_page: default_per_page(),
            start_page: default_start_page(),
            delay_secs: default_delay_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            download_images: true,
            save_json: true,
            skip_existing: true,
            self_check_run: false,
        }
    }
}

fn default_per_page() -> u32 {
    100
}
fn default_start_page() -> u32 {
    1
}
fn default_delay_secs() -> f64 {
    0.25
}
fn default_max_retries() -> u32 {
    4
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    20
}

/// Optional TOML config file; every field falls through to the defaults.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub collection: Option<String>,
    pub base_url: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub per_page: Option<u32>,
    pub start_page: Option<u32>,
    pub delay_secs: Option<f64>,
    pub max_retries: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub download_images: Option<bool>,
    pub save_json: Option<bool>,
    pub skip_existing: Option<bool>,
}

/// Everything the CLI can specify; `None` falls through to the config file,
/// then to built-in defaults.
#[derive(Debug, Default)]
pub struct Overrides {
    pub collection: Option<String>,
    pub base_url: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub per_page: Option<u32>,
    pub start_page: Option<u32>,
    pub delay_secs: Option<f64>,
    pub max_retries: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub no_images: bool,
    pub no_json: bool,
    pub force: bool,
    pub self_check_run: bool,
}

pub fn load_file(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| "Failed to parse config file")
}

pub fn collection_base_url(name: &str) -> String {
    format!("{LOC_COLLECTIONS_BASE}{name}/")
}

/// Resolve CLI overrides over an optional config file into the effective
/// [`Config`], then validate it.
pub fn resolve(over: Overrides, file: FileConfig) -> Result<Config> {
    let collection = over.collection.or(file.collection);

    let base_url = over
        .base_url
        .or(file.base_url)
        .unwrap_or_else(|| {
            collection_base_url(collection.as_deref().unwrap_or(DEFAULT_COLLECTION))
        });

    // An explicit collection writes into a directory of the same name;
    // the no-arguments default nests under output/ instead.
    let output_dir = over
        .output_dir
        .or(file.output_dir)
        .unwrap_or_else(|| match &collection {
            Some(name) => PathBuf::from(name),
            None => Path::new("output").join(DEFAULT_COLLECTION),
        });

    let config = Config {
        base_url,
        output_dir,
        per_page: over.per_page.or(file.per_page).unwrap_or_else(default_per_page),
        start_page: over
            .start_page
            .or(file.start_page)
            .unwrap_or_else(default_start_page),
        delay_secs: over
            .delay_secs
            .or(file.delay_secs)
            .unwrap_or_else(default_delay_secs),
        max_retries: over
            .max_retries
            .or(file.max_retries)
            .unwrap_or_else(default_max_retries),
        backoff_ms: over
            .backoff_ms
            .or(file.backoff_ms)
            .unwrap_or_else(default_backoff_ms),
        timeout_secs: over
            .timeout_secs
            .or(file.timeout_secs)
            .unwrap_or_else(default_timeout_secs),
        download_images: !over.no_images && file.download_images.unwrap_or(true),
        save_json: !over.no_json && file.save_json.unwrap_or(true),
        skip_existing: !over.force && file.skip_existing.unwrap_or(true),
        self_check_run: over.self_check_run,
    };

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.per_page == 0 {
        bail!("per-page must be >= 1");
    }
    if config.start_page == 0 {
        bail!("start-page must be >= 1");
    }
    if config.max_retries == 0 {
        bail!("max-retries must be >= 1");
    }
    if config.delay_secs < 0.0 || !config.delay_secs.is_finite() {
        bail!("delay must be a non-negative number of seconds");
    }
    Ok(())
}

impl Config {
    /// Re-serialize the effective configuration as CLI flags so a
    /// self-verification child reproduces this run exactly (minus the
    /// marker, which the spawner appends itself).
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--base-url".to_string(),
            self.base_url.clone(),
            "--output-dir".to_string(),
            self.output_dir.display().to_string(),
            "--per-page".to_string(),
            self.per_page.to_string(),
            "--start-page".to_string(),
            self.start_page.to_string(),
            "--delay".to_string(),
            self.delay_secs.to_string(),
            "--max-retries".to_string(),
            self.max_retries.to_string(),
            "--backoff-ms".to_string(),
            self.backoff_ms.to_string(),
            "--timeout".to_string(),
            self.timeout_secs.to_string(),
        ];
        if !self.download_images {
            args.push("--no-images".to_string());
        }
        if !self.save_json {
            args.push("--no-json".to_string());
        }
        if !self.skip_existing {
            args.push("--force".to_string());
        }
        args
    }
}
