//! Engine configuration
//!
//! Settings come from an optional TOML file, then `SPINWISE_*` environment
//! overrides, and are validated as a whole before the engine sees them.

use crate::errors::{EngineResult, SettingsError};
use crate::probability::payout::PayoutRule;
use crate::probability::table::{SymbolTable, TableLimits, TableSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub game: GameConfig,
    pub probability: ProbabilitySettings,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub reel_count: usize,
    pub initial_credits: u64,
    pub max_initial_credits: u64,
    pub min_bet: u64,
    pub max_bet: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            reel_count: 3,
            initial_credits: 100,
            max_initial_credits: 10_000,
            min_bet: 1,
            max_bet: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbabilitySettings {
    /// Bonus factor for 2, 3, 4, ... matching symbols
    pub bonus_tiers: Vec<u32>,
    pub limits: TableLimits,
    pub table: TableSpec,
}

impl Default for ProbabilitySettings {
    fn default() -> Self {
        Self {
            bonus_tiers: PayoutRule::default().bonus_tiers().to_vec(),
            limits: TableLimits::default(),
            table: TableSpec::classic(),
        }
    }
}

impl ProbabilitySettings {
    pub fn payout_rule(&self) -> Result<PayoutRule, crate::errors::ConfigError> {
        PayoutRule::with_tiers(self.bonus_tiers.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub timeout_secs: u64,
    pub reap_interval_secs: u64,
    pub max_sessions_per_owner: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 24 * 60 * 60,
            reap_interval_secs: 60 * 60,
            max_sessions_per_owner: 5,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
    Rocksdb,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageBackend::File => "file",
            StorageBackend::Memory => "memory",
            StorageBackend::Rocksdb => "rocksdb",
        };
        f.write_str(name)
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "memory" => Ok(StorageBackend::Memory),
            "rocksdb" => Ok(StorageBackend::Rocksdb),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
    pub write_retry_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: PathBuf::from("./spinwise_data"),
            write_retry_backoff_ms: 50,
        }
    }
}

impl StorageConfig {
    pub fn write_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.write_retry_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub batch_size: u64,
    pub min_spins: u64,
    pub max_spins: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            min_spins: 100,
            max_spins: 100_000,
        }
    }
}

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load from file (or defaults), apply environment overrides, validate
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = match &self.config_path {
            Some(path) => self.load_from_file(path)?,
            None => EngineConfig::default(),
        };

        apply_overrides(&mut config, |key| std::env::var(key).ok())?;
        validate(&config)?;
        Ok(config)
    }

    fn load_from_file(&self, path: &Path) -> EngineResult<EngineConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SettingsError::LoadFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content)
            .map_err(|e| SettingsError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    pub fn save<P: AsRef<Path>>(&self, config: &EngineConfig, path: P) -> EngineResult<()> {
        let path = path.as_ref();
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| SettingsError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string).map_err(|e| {
            let reason = format!("Failed to write to {}: {}", path.display(), e);
            SettingsError::SaveFailed(reason).into()
        })
    }
}

fn parse_override<T: FromStr>(key: &str, raw: String) -> Result<T, SettingsError> {
    raw.trim().parse().map_err(|_| SettingsError::InvalidValue {
        field: key.to_string(),
        value: raw.clone(),
        reason: "could not parse value".to_string(),
    })
}

/// Apply `SPINWISE_*` overrides read through `lookup`
pub fn apply_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<(), SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    macro_rules! set {
        ($key:literal, $field:expr) => {
            if let Some(raw) = lookup($key) {
                $field = parse_override($key, raw)?;
            }
        };
    }

    set!("SPINWISE_REEL_COUNT", config.game.reel_count);
    set!("SPINWISE_INITIAL_CREDITS", config.game.initial_credits);
    set!("SPINWISE_MAX_INITIAL_CREDITS", config.game.max_initial_credits);
    set!("SPINWISE_MIN_BET", config.game.min_bet);
    set!("SPINWISE_MAX_BET", config.game.max_bet);
    set!("SPINWISE_SESSION_TIMEOUT_SECS", config.session.timeout_secs);
    set!("SPINWISE_REAP_INTERVAL_SECS", config.session.reap_interval_secs);
    set!("SPINWISE_MAX_SESSIONS_PER_OWNER", config.session.max_sessions_per_owner);
    set!("SPINWISE_WRITE_RETRY_BACKOFF_MS", config.storage.write_retry_backoff_ms);
    set!("SPINWISE_SIMULATION_BATCH_SIZE", config.simulation.batch_size);

    if let Some(raw) = lookup("SPINWISE_STORAGE_BACKEND") {
        config.storage.backend = raw.parse().map_err(|reason| SettingsError::InvalidValue {
            field: "SPINWISE_STORAGE_BACKEND".to_string(),
            value: raw.clone(),
            reason,
        })?;
    }
    if let Some(dir) = lookup("SPINWISE_DATA_DIR") {
        config.storage.data_dir = PathBuf::from(dir);
    }
    Ok(())
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> SettingsError {
    SettingsError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Validate every section, including the probability table itself
pub fn validate(config: &EngineConfig) -> EngineResult<()> {
    let game = &config.game;
    if game.min_bet == 0 {
        return Err(invalid("game.min_bet", game.min_bet, "minimum bet must be at least 1").into());
    }
    if game.max_bet < game.min_bet {
        return Err(
            invalid("game.max_bet", game.max_bet, "maximum bet is below minimum bet").into(),
        );
    }
    if game.max_initial_credits == 0 {
        return Err(invalid("game.max_initial_credits", 0, "must be at least 1").into());
    }
    if game.initial_credits == 0 || game.initial_credits > game.max_initial_credits {
        return Err(invalid(
            "game.initial_credits",
            game.initial_credits,
            "must be between 1 and max_initial_credits",
        )
        .into());
    }

    let session = &config.session;
    if session.timeout_secs == 0 {
        return Err(invalid("session.timeout_secs", 0, "timeout must be positive").into());
    }
    if session.reap_interval_secs == 0 {
        return Err(invalid("session.reap_interval_secs", 0, "interval must be positive").into());
    }
    if session.max_sessions_per_owner == 0 {
        return Err(invalid(
            "session.max_sessions_per_owner",
            0,
            "must allow at least one session",
        )
        .into());
    }

    let storage = &config.storage;
    if storage.backend != StorageBackend::Memory && storage.data_dir.as_os_str().is_empty() {
        return Err(invalid("storage.data_dir", "", "data directory is required").into());
    }
    if storage.backend == StorageBackend::Rocksdb && !cfg!(feature = "rocksdb") {
        return Err(invalid(
            "storage.backend",
            storage.backend,
            "built without the rocksdb feature",
        )
        .into());
    }

    let sim = &config.simulation;
    if sim.batch_size == 0 {
        return Err(invalid("simulation.batch_size", 0, "batch size must be positive").into());
    }
    if sim.min_spins == 0 || sim.max_spins < sim.min_spins {
        return Err(invalid(
            "simulation.min_spins",
            sim.min_spins,
            "spin bounds must satisfy 1 <= min_spins <= max_spins",
        )
        .into());
    }

    config.probability.payout_rule()?;
    SymbolTable::validate(&config.probability.table, game.reel_count, &config.probability.limits)?;
    Ok(())
}

/// Builder for assembling configurations in code
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: EngineConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game(mut self, game: GameConfig) -> Self {
        self.config.game = game;
        self
    }

    pub fn reel_count(mut self, reel_count: usize) -> Self {
        self.config.game.reel_count = reel_count;
        self
    }

    pub fn table(mut self, table: TableSpec) -> Self {
        self.config.probability.table = table;
        self
    }

    pub fn limits(mut self, limits: TableLimits) -> Self {
        self.config.probability.limits = limits;
        self
    }

    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn simulation(mut self, simulation: SimulationConfig) -> Self {
        self.config.simulation = simulation;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

/// Write the default configuration to `path`
pub fn generate_sample_config<P: AsRef<Path>>(path: P) -> EngineResult<()> {
    ConfigLoader::new().save(&EngineConfig::default(), path)
}
