use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub rules: RulesConfig,

    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    #[serde(default)]
    pub lookup: LookupConfig,
}

/// General daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory holding per-location area databases and exports.
    #[serde(default = "default_database_dir")]
    pub database_dir: PathBuf,

    /// Active location name; selects `<location>.db` under `database_dir`.
    #[serde(default)]
    pub location: String,

    /// Field delimiter for CSV export.
    #[serde(default = "default_export_delimiter")]
    pub export_delimiter: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_dir: default_database_dir(),
            location: String::new(),
            export_delimiter: default_export_delimiter(),
        }
    }
}

fn default_database_dir() -> PathBuf {
    PathBuf::from("/var/lib/btsmon")
}

fn default_export_delimiter() -> String {
    ", ".to_string()
}

/// External scanner subprocess commands and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Sweep scanner command line (program + args).
    #[serde(default = "default_scan_command")]
    pub scan_command: Vec<String>,

    /// Paging-channel scanner; the target ARFCN is appended as `-a <arfcn>`.
    #[serde(default = "default_pch_command")]
    pub pch_command: Vec<String>,

    /// Firmware loader command line.
    #[serde(default = "default_firmware_command")]
    pub firmware_command: Vec<String>,

    /// Line the loader prints once the firmware is on the device.
    #[serde(default = "default_firmware_sentinel")]
    pub firmware_sentinel: String,

    /// Seconds to let a freshly spawned subprocess warm up.
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,

    /// Wall-clock budget for one PCH scan.
    #[serde(default = "default_pch_timeout_secs")]
    pub pch_timeout_secs: u64,

    /// Respawn budget when the PCH scanner reports a sync failure.
    #[serde(default = "default_pch_retries")]
    pub pch_retries: u32,

    /// Worker poll interval; also the cancellation latency bound.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_command: default_scan_command(),
            pch_command: default_pch_command(),
            firmware_command: default_firmware_command(),
            firmware_sentinel: default_firmware_sentinel(),
            warmup_secs: default_warmup_secs(),
            pch_timeout_secs: default_pch_timeout_secs(),
            pch_retries: default_pch_retries(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_scan_command() -> Vec<String> {
    vec!["/usr/local/bin/catcher".to_string()]
}

fn default_pch_command() -> Vec<String> {
    vec!["/usr/local/bin/pch_scan".to_string()]
}

fn default_firmware_command() -> Vec<String> {
    vec![
        "/usr/local/bin/osmocon".to_string(),
        "-p".to_string(),
        "/dev/ttyUSB0".to_string(),
        "-m".to_string(),
        "c123xor".to_string(),
        "layer1.compalram.bin".to_string(),
    ]
}

fn default_firmware_sentinel() -> String {
    "Finishing download".to_string()
}

fn default_warmup_secs() -> u64 {
    2
}

fn default_pch_timeout_secs() -> u64 {
    20
}

fn default_pch_retries() -> u32 {
    5
}

fn default_poll_interval_ms() -> u64 {
    250
}

/// Providers of the home network the default tables are built for.
const DEFAULT_PROVIDERS: [&str; 5] = [
    "T-Mobile",
    "O2",
    "Vodafone",
    "E-Plus",
    "DB Systel GSM-R",
];

/// Tables and thresholds consumed by the rule engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Providers considered legitimate at all.
    #[serde(default = "default_provider_whitelist")]
    pub provider_whitelist: Vec<String>,

    /// Home country per provider.
    #[serde(default = "default_provider_country")]
    pub provider_country: HashMap<String, String>,

    /// Allowed ARFCN ranges per provider, inclusive.
    #[serde(default = "default_arfcn_mapping")]
    pub arfcn_mapping: HashMap<String, Vec<(u16, u16)>>,

    /// Allowed LAC ranges per provider, inclusive.
    #[serde(default = "default_lac_mapping")]
    pub lac_mapping: HashMap<String, Vec<(u32, u32)>>,

    /// Relative deviation from the provider LAC median still considered sane.
    #[serde(default = "default_lac_median_tolerance")]
    pub lac_median_tolerance: f64,

    /// Relative RX-level change between sightings still considered sane.
    #[serde(default = "default_rx_change_tolerance")]
    pub rx_change_tolerance: f64,

    /// Relative widening of the cached [rxmin, rxmax] interval.
    #[serde(default = "default_cache_rx_tolerance")]
    pub cache_rx_tolerance: f64,

    /// Minimum pagings for a healthy paging channel.
    #[serde(default = "default_min_pagings")]
    pub min_pagings: u32,

    /// Minimum hopping immediate assignments for a healthy paging channel.
    #[serde(default = "default_min_assignments")]
    pub min_assignments: u32,

    /// Discovered-neighbour threshold: >= 1 absolute count, (0,1) fraction
    /// of the neighbour set, negative disables the rule.
    #[serde(default = "default_neighbour_threshold")]
    pub neighbour_threshold: f64,

    /// Per-rule active flags, keyed by rule identifier. Unlisted rules keep
    /// their built-in default.
    #[serde(default)]
    pub active: HashMap<String, bool>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            provider_whitelist: default_provider_whitelist(),
            provider_country: default_provider_country(),
            arfcn_mapping: default_arfcn_mapping(),
            lac_mapping: default_lac_mapping(),
            lac_median_tolerance: default_lac_median_tolerance(),
            rx_change_tolerance: default_rx_change_tolerance(),
            cache_rx_tolerance: default_cache_rx_tolerance(),
            min_pagings: default_min_pagings(),
            min_assignments: default_min_assignments(),
            neighbour_threshold: default_neighbour_threshold(),
            active: HashMap::new(),
        }
    }
}

fn default_provider_whitelist() -> Vec<String> {
    DEFAULT_PROVIDERS.iter().map(|p| p.to_string()).collect()
}

fn default_provider_country() -> HashMap<String, String> {
    DEFAULT_PROVIDERS
        .iter()
        .map(|p| (p.to_string(), "Germany".to_string()))
        .collect()
}

fn default_arfcn_mapping() -> HashMap<String, Vec<(u16, u16)>> {
    DEFAULT_PROVIDERS
        .iter()
        .map(|p| (p.to_string(), vec![(0u16, 9999u16)]))
        .collect()
}

fn default_lac_mapping() -> HashMap<String, Vec<(u32, u32)>> {
    let mut lac_mapping = HashMap::new();
    lac_mapping.insert("DB Systel GSM-R".to_string(), vec![(0, 999_999)]);
    lac_mapping.insert("T-Mobile".to_string(), vec![(21_000, 22_000)]);
    lac_mapping.insert("O2".to_string(), vec![(0, 99_999)]);
    lac_mapping.insert("Vodafone".to_string(), vec![(0, 100_000)]);
    lac_mapping.insert("E-Plus".to_string(), vec![(0, 100_000)]);
    lac_mapping
}

fn default_lac_median_tolerance() -> f64 {
    0.05
}

fn default_rx_change_tolerance() -> f64 {
    0.05
}

fn default_cache_rx_tolerance() -> f64 {
    0.1
}

fn default_min_pagings() -> u32 {
    1
}

fn default_min_assignments() -> u32 {
    1
}

fn default_neighbour_threshold() -> f64 {
    -1.0
}

/// Evaluator selection and rule grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// One of `conservative`, `group`, `bayes`, `weighted`. The latter two
    /// are recognized but unsupported.
    #[serde(default = "default_evaluator_kind")]
    pub kind: String,

    /// Named rule groups for the group evaluator, in declaration order.
    #[serde(default = "default_rule_groups")]
    pub groups: Vec<RuleGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGroup {
    pub name: String,
    pub rules: Vec<String>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            kind: default_evaluator_kind(),
            groups: default_rule_groups(),
        }
    }
}

fn default_evaluator_kind() -> String {
    "conservative".to_string()
}

fn default_rule_groups() -> Vec<RuleGroup> {
    vec![
        RuleGroup {
            name: "configuration".to_string(),
            rules: vec![
                "Provider Check".to_string(),
                "Country Provider Mapping".to_string(),
                "ARFCN Mapping".to_string(),
                "LAC Mapping".to_string(),
            ],
        },
        RuleGroup {
            name: "consistency".to_string(),
            rules: vec![
                "Unique CellID".to_string(),
                "LAC Median Deviation".to_string(),
                "LAC Change".to_string(),
                "RX Change".to_string(),
            ],
        },
        RuleGroup {
            name: "neighbourhood".to_string(),
            rules: vec![
                "Neighbourhood Structure".to_string(),
                "Pure Neighbourhood".to_string(),
                "Discovered Neighbourhoods".to_string(),
            ],
        },
        RuleGroup {
            name: "databases".to_string(),
            rules: vec![
                "CellID Database".to_string(),
                "Location Area Database".to_string(),
                "PCH Scan".to_string(),
            ],
        },
    ]
}

/// Remote geolocation lookup chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    #[serde(default)]
    pub use_google: bool,

    #[serde(default)]
    pub use_opencellid: bool,

    #[serde(default)]
    pub use_local: bool,

    /// Local database name for the presence-check provider.
    #[serde(default)]
    pub local_database: String,

    #[serde(default)]
    pub opencellid_key: String,

    #[serde(default = "default_lookup_timeout_secs")]
    pub timeout_secs: u64,

    /// Country name to mobile country code.
    #[serde(default = "default_mcc")]
    pub mcc: HashMap<String, u16>,

    /// Provider name to mobile network code.
    #[serde(default = "default_mnc")]
    pub mnc: HashMap<String, String>,

    /// Country name to ISO code for the binary protocol.
    #[serde(default = "default_country_codes")]
    pub country_codes: HashMap<String, String>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            use_google: false,
            use_opencellid: false,
            use_local: false,
            local_database: String::new(),
            opencellid_key: String::new(),
            timeout_secs: default_lookup_timeout_secs(),
            mcc: default_mcc(),
            mnc: default_mnc(),
            country_codes: default_country_codes(),
        }
    }
}

fn default_lookup_timeout_secs() -> u64 {
    10
}

fn default_mcc() -> HashMap<String, u16> {
    let mut mcc = HashMap::new();
    mcc.insert("Germany".to_string(), 262);
    mcc
}

fn default_mnc() -> HashMap<String, String> {
    let mut mnc = HashMap::new();
    mnc.insert("T-Mobile".to_string(), "01".to_string());
    mnc.insert("Vodafone".to_string(), "02".to_string());
    mnc.insert("E-Plus".to_string(), "03".to_string());
    mnc.insert("O2".to_string(), "07".to_string());
    mnc
}

fn default_country_codes() -> HashMap<String, String> {
    let mut country_codes = HashMap::new();
    country_codes.insert("Germany".to_string(), "de".to_string());
    country_codes
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load from the first config file found in standard locations, or
    /// fall back to defaults.
    pub fn load_or_default() -> Result<Self> {
        let candidates = [
            Some(PathBuf::from("/etc/btsmon/config.toml")),
            dirs_config_dir().map(|p| p.join("btsmon/config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in candidates.into_iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Write the configuration as pretty TOML.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config: {}", path.as_ref().display()))?;
        Ok(())
    }

    /// Path of the area database for the active location, if one is set.
    pub fn area_database_path(&self) -> Option<PathBuf> {
        if self.general.location.is_empty() {
            return None;
        }
        Some(
            self.general
                .database_dir
                .join(format!("{}.db", self.general.location)),
        )
    }
}

fn dirs_config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
}
