//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/maryland.toml
//!
//! Only the default path may fall back to built-in defaults. A file named
//! explicitly must load and validate, or startup fails.
//!
//! The API key never has to live in the file: `YELP_API_KEY` (or the older
//! `YELPFUSION_API_KEY`) takes precedence over `[api].api_key`.

use crate::domain::types::BoundingBox;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables checked for the API key, in order
pub const API_KEY_ENV_VARS: [&str; 2] = ["YELP_API_KEY", "YELPFUSION_API_KEY"];

#[derive(Debug, Clone, Deserialize)]
pub struct RegionConfig {
    #[serde(default = "default_region_name")]
    pub name: String,
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

fn default_region_name() -> String {
    "maryland".to_string()
}

impl Default for RegionConfig {
    fn default() -> Self {
        let bbox = BoundingBox::maryland();
        Self {
            name: default_region_name(),
            north: bbox.north,
            south: bbox.south,
            east: bbox.east,
            west: bbox.west,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_grid_dim")]
    pub rows: u32,
    #[serde(default = "default_grid_dim")]
    pub cols: u32,
}

fn default_grid_dim() -> u32 {
    10
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { rows: default_grid_dim(), cols: default_grid_dim() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Offset of the last page requested for a cell
    #[serde(default = "default_max_offset")]
    pub max_offset: u32,
}

fn default_base_url() -> String {
    "https://api.yelp.com/v3".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_category() -> String {
    "restaurants".to_string()
}

fn default_term() -> String {
    "restaurant".to_string()
}

fn default_sort_by() -> String {
    "distance".to_string()
}

fn default_page_size() -> u32 {
    50
}

fn default_max_offset() -> u32 {
    950
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_ms: default_timeout_ms(),
            category: default_category(),
            term: default_term(),
            sort_by: default_sort_by(),
            page_size: default_page_size(),
            max_offset: default_max_offset(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory the file names below are resolved against
    #[serde(default = "default_output_dir")]
    pub dir: String,
    #[serde(default = "default_grid_file")]
    pub grid_file: String,
    #[serde(default = "default_dataset_file")]
    pub dataset_file: String,
    #[serde(default = "default_progress_file")]
    pub progress_file: String,
    #[serde(default = "default_backup_file")]
    pub backup_file: String,
    #[serde(default = "default_emergency_file")]
    pub emergency_file: String,
}

fn default_output_dir() -> String {
    ".".to_string()
}

fn default_grid_file() -> String {
    "maryland_grid_cells.csv".to_string()
}

fn default_dataset_file() -> String {
    "maryland_restaurants.csv".to_string()
}

fn default_progress_file() -> String {
    "maryland_restaurants_progress.json".to_string()
}

fn default_backup_file() -> String {
    "maryland_restaurants_json_backup.json".to_string()
}

fn default_emergency_file() -> String {
    "maryland_restaurants_emergency_save.json".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            grid_file: default_grid_file(),
            dataset_file: default_dataset_file(),
            progress_file: default_progress_file(),
            backup_file: default_backup_file(),
            emergency_file: default_emergency_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Write the progress snapshot after every Nth processed cell (0 disables)
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: usize,
    /// Extra passes over failed detail lookups before a cell is marked done
    #[serde(default = "default_detail_retry_passes")]
    pub detail_retry_passes: u32,
    /// Pause before every remote call
    #[serde(default)]
    pub request_delay_ms: u64,
}

fn default_snapshot_every() -> usize {
    5
}

fn default_detail_retry_passes() -> u32 {
    1
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            snapshot_every: default_snapshot_every(),
            detail_retry_passes: default_detail_retry_passes(),
            request_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub region: RegionConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    region_name: String,
    bbox: BoundingBox,
    grid_rows: u32,
    grid_cols: u32,
    api_base_url: String,
    api_key: Option<String>,
    api_timeout_ms: u64,
    api_category: String,
    api_term: String,
    api_sort_by: String,
    page_size: u32,
    max_offset: u32,
    output_dir: PathBuf,
    grid_file: String,
    dataset_file: String,
    progress_file: String,
    backup_file: String,
    emergency_file: String,
    snapshot_every: usize,
    detail_retry_passes: u32,
    request_delay_ms: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let region = toml_config.region;
        Self {
            region_name: region.name,
            bbox: BoundingBox::new(region.north, region.south, region.east, region.west),
            grid_rows: toml_config.grid.rows,
            grid_cols: toml_config.grid.cols,
            api_base_url: toml_config.api.base_url.trim_end_matches('/').to_string(),
            api_key: toml_config.api.api_key.filter(|k| !k.trim().is_empty()),
            api_timeout_ms: toml_config.api.timeout_ms,
            api_category: toml_config.api.category,
            api_term: toml_config.api.term,
            api_sort_by: toml_config.api.sort_by,
            page_size: toml_config.api.page_size,
            max_offset: toml_config.api.max_offset,
            output_dir: PathBuf::from(toml_config.output.dir),
            grid_file: toml_config.output.grid_file,
            dataset_file: toml_config.output.dataset_file,
            progress_file: toml_config.output.progress_file,
            backup_file: toml_config.output.backup_file,
            emergency_file: toml_config.output.emergency_file,
            snapshot_every: toml_config.harvest.snapshot_every,
            detail_retry_passes: toml_config.harvest.detail_retry_passes,
            request_delay_ms: toml_config.harvest.request_delay_ms,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(arg: Option<&str>) -> String {
        if let Some(path) = arg {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/maryland.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config.validate()?;
        Ok(config)
    }

    /// Load the file named by `--config` or `CONFIG_FILE` strictly, or the
    /// default path with fallback to defaults
    pub fn load(arg: Option<&str>) -> anyhow::Result<Self> {
        let explicit = arg.is_some() || env::var_os("CONFIG_FILE").is_some();
        let path = Self::resolve_config_path(arg);
        if explicit {
            Self::from_file(&path)
        } else {
            Ok(Self::load_from_path(&path))
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.bbox.is_valid(), "[region] needs north > south and east > west");
        anyhow::ensure!(self.grid_rows >= 1 && self.grid_cols >= 1, "[grid] rows and cols must be >= 1");
        anyhow::ensure!(
            (1..=50).contains(&self.page_size),
            "[api] page_size must be between 1 and 50, got {}",
            self.page_size
        );
        anyhow::ensure!(
            self.max_offset + self.page_size <= 1000,
            "[api] max_offset + page_size must not exceed 1000"
        );
        Ok(())
    }

    /// API key from the environment first, then the config file.
    /// A missing key is fatal: nothing is harvested without one.
    pub fn resolve_api_key(&self) -> anyhow::Result<String> {
        let from_env = API_KEY_ENV_VARS
            .iter()
            .find_map(|name| env::var(name).ok().filter(|v| !v.trim().is_empty()));

        from_env.or_else(|| self.api_key.clone()).with_context(|| {
            format!(
                "no API key: set {} or [api].api_key in {}",
                API_KEY_ENV_VARS[0], self.config_file
            )
        })
    }

    pub fn region_name(&self) -> &str {
        &self.region_name
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn grid_rows(&self) -> u32 {
        self.grid_rows
    }

    pub fn grid_cols(&self) -> u32 {
        self.grid_cols
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn api_category(&self) -> &str {
        &self.api_category
    }

    pub fn api_term(&self) -> &str {
        &self.api_term
    }

    pub fn api_sort_by(&self) -> &str {
        &self.api_sort_by
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn max_offset(&self) -> u32 {
        self.max_offset
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn grid_path(&self) -> PathBuf {
        self.output_dir.join(&self.grid_file)
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.output_dir.join(&self.dataset_file)
    }

    pub fn progress_path(&self) -> PathBuf {
        self.output_dir.join(&self.progress_file)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.output_dir.join(&self.backup_file)
    }

    pub fn emergency_path(&self) -> PathBuf {
        self.output_dir.join(&self.emergency_file)
    }

    pub fn snapshot_every(&self) -> usize {
        self.snapshot_every
    }

    pub fn detail_retry_passes(&self) -> u32 {
        self.detail_retry_passes
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to point every output file at another directory
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Builder method to override the grid dimensions
    pub fn with_grid(mut self, rows: u32, cols: u32) -> Self {
        self.grid_rows = rows;
        self.grid_cols = cols;
        self
    }

    /// Builder method to override the region
    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = bbox;
        self
    }

    /// Builder method to override the API endpoint
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.region_name(), "maryland");
        assert_eq!(config.bbox(), BoundingBox::maryland());
        assert_eq!(config.grid_rows(), 10);
        assert_eq!(config.grid_cols(), 10);
        assert_eq!(config.api_timeout(), Duration::from_secs(5));
        assert_eq!(config.page_size(), 50);
        assert_eq!(config.max_offset(), 950);
        assert_eq!(config.snapshot_every(), 5);
        assert_eq!(config.api_category(), "restaurants");
        assert_eq!(config.api_base_url(), "https://api.yelp.com/v3");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        assert_eq!(Config::resolve_config_path(Some("config/test.toml")), "config/test.toml");
    }

    #[test]
    fn test_output_paths_join_dir() {
        let config = Config::default().with_output_dir("/tmp/harvest");
        assert_eq!(config.grid_path(), PathBuf::from("/tmp/harvest/maryland_grid_cells.csv"));
        assert_eq!(config.dataset_path(), PathBuf::from("/tmp/harvest/maryland_restaurants.csv"));
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[grid]
rows = 4

[api]
base_url = "http://localhost:8080/v3/"
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.grid_rows(), 4);
        assert_eq!(config.grid_cols(), 10);
        assert_eq!(config.api_base_url(), "http://localhost:8080/v3");
        assert_eq!(config.progress_path(), PathBuf::from("./maryland_restaurants_progress.json"));
    }

    #[test]
    fn test_validate_rejects_deep_pagination() {
        let toml_config: TomlConfig = toml::from_str("[api]\nmax_offset = 1000\n").unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blank_api_key_is_ignored() {
        let toml_config: TomlConfig = toml::from_str("[api]\napi_key = \"  \"\n").unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert!(config.api_key.is_none());
    }
}
