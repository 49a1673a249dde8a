use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rand::distr::{Distribution, Uniform};
use serde::Deserialize;

use crate::scraping::driver::Locator;

// ---------------------------------------------------------------------------
// HarvestConfig: file-based config loader (aadt-harvest.json) with env-var overrides
// ---------------------------------------------------------------------------

pub const CONFIG_FILE_NAME: &str = "aadt-harvest.json";
pub const ENV_CONFIG_PATH: &str = "AADT_HARVEST_CONFIG";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";
pub const ENV_HEADLESS: &str = "AADT_HARVEST_HEADLESS";
pub const ENV_OUTPUT_DIR: &str = "AADT_HARVEST_OUTPUT_DIR";

/// Inclusive millisecond range a jitter delay is drawn from.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    /// Draw one delay. A reversed range is treated as its swapped form.
    pub fn sample(&self) -> Duration {
        let (lo, hi) = if self.min_ms <= self.max_ms {
            (self.min_ms, self.max_ms)
        } else {
            (self.max_ms, self.min_ms)
        };
        if lo == hi {
            return Duration::from_millis(lo);
        }
        let ms = match Uniform::new_inclusive(lo, hi) {
            Ok(dist) => {
                let mut rng = rand::rng();
                dist.sample(&mut rng)
            }
            Err(_) => lo,
        };
        Duration::from_millis(ms)
    }
}

/// Target site: how a station ID becomes a detail-page URL and how long the
/// page gets to settle after navigation.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SiteConfig {
    /// `{id}` is replaced with the percent-encoded station ID.
    pub station_url_template: String,
    pub navigation_timeout_ms: u64,
    pub settle_quiet_ms: u64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            station_url_template: "https://txdot.public.ms2soft.com/tcds/set_session.asp?ext=y&loc=txdot&LOCAL_ID={id}&MASTER_LOCAL_ID={id}".to_string(),
            navigation_timeout_ms: 30_000,
            settle_quiet_ms: 1_500,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Explicit browser binary; auto-discovered when unset.
    pub chrome_executable: Option<String>,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            window_width: 1920,
            window_height: 1080,
        }
    }
}

/// DOM hooks of the TCDS station detail page.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Selectors {
    /// The AADT history table wrapper.
    pub container: Locator,
    /// Data rows, relative to `container`.
    pub rows: Locator,
    /// Cells, relative to a row.
    pub cells: Locator,
    pub year_cell: usize,
    pub count_cell: usize,
    pub min_cells: usize,
    pub next_button: Locator,
    pub direction_container: Locator,
    /// Toggle controls, relative to `direction_container`.
    pub direction_toggles: Locator,
    /// Attribute of a toggle that names its direction.
    pub direction_value_attribute: String,
    /// Absolute locator of one toggle; `{direction}` / `{direction_name}` are filled in.
    pub direction_button: Locator,
    pub active_marker_attribute: String,
    /// Value `active_marker_attribute` takes once the page shows that direction.
    pub active_marker_sentinel: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            container: Locator::Css("#TCDS_TDETAIL_AADT_DIV".to_string()),
            rows: Locator::Css("tr.FormRowLabel ~ tr".to_string()),
            cells: Locator::Css(".FormRow".to_string()),
            year_cell: 1,
            count_cell: 2,
            min_cells: 3,
            next_button: Locator::Xpath(
                r#"//div[@id="TCDS_TDETAIL_AADT_DIV"]//input[@type="button" and @value=">" and @name="a_first"]"#
                    .to_string(),
            ),
            direction_container: Locator::Css("#TCDS_TDETAIL_DIR_DIV".to_string()),
            direction_toggles: Locator::Css("input[type='button']".to_string()),
            direction_value_attribute: "value".to_string(),
            direction_button: Locator::Xpath(
                r#"//div[@id="TCDS_TDETAIL_DIR_DIV"]//input[@type="button" and @value="{direction}"]"#
                    .to_string(),
            ),
            active_marker_attribute: "onclick".to_string(),
            active_marker_sentinel: "return false;".to_string(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Timeout for the container and next-page waits.
    pub element_timeout_ms: u64,
    pub max_pages: usize,
    pub activation_timeout_ms: u64,
    /// Pause between clicking a direction toggle and re-locating it.
    pub activation_settle_ms: u64,
}

impl ExtractionConfig {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            element_timeout_ms: 10_000,
            max_pages: 50,
            activation_timeout_ms: 10_000,
            activation_settle_ms: 1_000,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PacingConfig {
    pub between_stations: DelayRange,
    pub between_batches: DelayRange,
    /// Wait before reading each table page; the page keeps re-rendering briefly
    /// after a pagination click.
    pub page_settle: DelayRange,
}

impl PacingConfig {
    pub fn none() -> Self {
        Self {
            between_stations: DelayRange::zero(),
            between_batches: DelayRange::zero(),
            page_settle: DelayRange::zero(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            between_stations: DelayRange::new(2_000, 5_000),
            between_batches: DelayRange::new(30_000, 60_000),
            page_settle: DelayRange::new(3_000, 5_000),
        }
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct LedgerConfig {
    /// Persist the ledger after every station instead of only at batch boundaries.
    pub flush_per_station: bool,
    /// Move a malformed ledger aside and start empty instead of aborting.
    pub reset_on_corrupt: bool,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub csv_export: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("aadt_output"),
            csv_export: false,
        }
    }
}

impl OutputConfig {
    pub fn results_path(&self) -> PathBuf {
        self.dir.join("aadt_results.jsonl")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join("progress.json")
    }

    pub fn batches_dir(&self) -> PathBuf {
        self.dir.join("batches")
    }

    pub fn csv_dir(&self) -> PathBuf {
        self.dir.join("csv")
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also append log lines to this file.
    pub file: Option<PathBuf>,
}

/// Top-level config loaded from `aadt-harvest.json`.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct HarvestConfig {
    pub site: SiteConfig,
    pub browser: BrowserSettings,
    pub selectors: Selectors,
    pub extraction: ExtractionConfig,
    pub pacing: PacingConfig,
    pub ledger: LedgerConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl HarvestConfig {
    /// Load the harvest config.
    ///
    /// An `explicit` path must exist and parse. Otherwise the first file found wins:
    /// 1. `AADT_HARVEST_CONFIG` env var path
    /// 2. `./aadt-harvest.json`
    /// 3. `<config dir>/aadt-harvest/config.json`
    ///
    /// Missing file → defaults. Parse error in a discovered file → warning, defaults.
    /// Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::discover(),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg = serde_json::from_str::<HarvestConfig>(&contents)
            .map_err(|e| anyhow!("config parse error at {}: {}", path.display(), e))?;
        tracing::info!("{} loaded from {}", CONFIG_FILE_NAME, path.display());
        Ok(cfg)
    }

    fn discover() -> Self {
        let mut candidates = Vec::new();
        if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
            candidates.push(PathBuf::from(env_path));
        }
        candidates.push(PathBuf::from(CONFIG_FILE_NAME));
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("aadt-harvest").join("config.json"));
        }

        for path in &candidates {
            if !path.exists() {
                continue;
            }
            return match Self::from_file(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!("{}; using defaults", e);
                    HarvestConfig::default()
                }
            };
        }

        HarvestConfig::default()
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(exe) = std::env::var(ENV_CHROME_EXECUTABLE) {
            let exe = exe.trim();
            if !exe.is_empty() && Path::new(exe).exists() {
                self.browser.chrome_executable = Some(exe.to_string());
            }
        }
        if let Ok(v) = std::env::var(ENV_HEADLESS) {
            let v = v.trim().to_ascii_lowercase();
            if matches!(v.as_str(), "0" | "false" | "no" | "off") {
                self.browser.headless = false;
            } else if matches!(v.as_str(), "1" | "true" | "yes" | "on") {
                self.browser.headless = true;
            }
        }
        if let Ok(dir) = std::env::var(ENV_OUTPUT_DIR) {
            if !dir.trim().is_empty() {
                self.output.dir = PathBuf::from(dir.trim());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let cfg: HarvestConfig = serde_json::from_str(
            r##"{
                "pacing": {"between_stations": {"min_ms": 10, "max_ms": 20}},
                "selectors": {"container": {"xpath": "//div[@id='x']"}},
                "ledger": {"flush_per_station": true}
            }"##,
        )
        .unwrap();

        assert_eq!(cfg.pacing.between_stations, DelayRange::new(10, 20));
        assert_eq!(cfg.pacing.between_batches, DelayRange::new(30_000, 60_000));
        assert_eq!(cfg.selectors.container, Locator::Xpath("//div[@id='x']".into()));
        assert_eq!(cfg.selectors.cells, Locator::Css(".FormRow".into()));
        assert!(cfg.ledger.flush_per_station);
        assert!(!cfg.ledger.reset_on_corrupt);
        assert_eq!(cfg.extraction.max_pages, 50);
    }

    #[test]
    fn delay_samples_stay_in_range() {
        let range = DelayRange::new(5, 9);
        for _ in 0..200 {
            let d = range.sample().as_millis() as u64;
            assert!((5..=9).contains(&d), "{d}ms out of range");
        }
        assert!(DelayRange::new(9, 5).sample() >= Duration::from_millis(5));
        assert_eq!(DelayRange::zero().sample(), Duration::ZERO);
    }

    #[test]
    fn output_layout_hangs_off_dir() {
        let out = OutputConfig {
            dir: PathBuf::from("/tmp/run"),
            csv_export: true,
        };
        assert_eq!(out.ledger_path(), PathBuf::from("/tmp/run/progress.json"));
        assert_eq!(out.results_path(), PathBuf::from("/tmp/run/aadt_results.jsonl"));
        assert_eq!(out.batches_dir(), PathBuf::from("/tmp/run/batches"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(HarvestConfig::load(Some(Path::new("/definitely/not/here.json"))).is_err());
    }
}
