// workrail-config/src/config.rs
// ============================================================================
// Module: WorkRail Configuration
// Description: Layered configuration loading for the engine's data root and budgets.
// Purpose: Provide strict, fail-closed config parsing with sane built-in defaults.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! Configuration resolves in three layers, lowest to highest precedence:
//! built-in defaults, an optional `workrail.toml` file, then `WORKRAIL_*`
//! environment variables. Missing configuration is never an error — every
//! field has a built-in default — but a malformed file or a malformed
//! environment variable fails closed, mirroring the teacher's config
//! loader's refusal to silently coerce bad input.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "workrail.toml";
/// Environment variable used to override the config file path.
pub const CONFIG_PATH_ENV_VAR: &str = "WORKRAIL_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 256 * 1024;
/// Prefix every environment-variable override shares.
const ENV_PREFIX: &str = "WORKRAIL_";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while loading or validating [`WorkRailConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(String),
    /// The config file exceeded [`MAX_CONFIG_FILE_SIZE`].
    #[error("config file exceeds the {MAX_CONFIG_FILE_SIZE}-byte size limit")]
    TooLarge,
    /// The config file did not parse as TOML.
    #[error("failed to parse config file: {0}")]
    Parse(String),
    /// An environment variable override did not parse.
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar {
        /// The environment variable name.
        var: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// The resolved configuration failed a consistency check.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Keyring Rotation Policy
// ============================================================================

/// How often the keyring file should be rotated by an embedding caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyringRotationPolicy {
    /// Never rotate automatically; an operator rotates manually.
    Manual,
    /// Rotate once per this many days of keyring age.
    EveryDays(u32),
}

impl Default for KeyringRotationPolicy {
    fn default() -> Self {
        Self::EveryDays(90)
    }
}

// ============================================================================
// SECTION: WorkRailConfig
// ============================================================================

/// The full, resolved configuration for an embedding of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkRailConfig {
    /// Root directory under which sessions, snapshots, workflows, and the
    /// keyring file live (the `base_dir` `workrail-store-fs`'s adapters are
    /// rooted at).
    pub data_root: PathBuf,
    /// Maximum canonical byte size of one advance call's context delta
    /// (§4.7.9, mirrored from `workrail-core::core::engine::CONTEXT_BYTE_BUDGET`).
    pub context_byte_budget: usize,
    /// Maximum number of blockers surfaced per blocked attempt (§3.5,
    /// mirrored from `workrail-core::core::engine::MAX_BLOCKERS`).
    pub max_blockers: usize,
    /// Maximum byte length of a single supplied-output note.
    pub message_byte_cap: usize,
    /// Maximum byte length of a session summary returned on resume.
    pub summary_byte_cap: usize,
    /// Maximum number of sessions scanned when resolving `resume_session`.
    pub resume_session_scan_cap: usize,
    /// Maximum ancestor-walk depth when resolving a checkpoint's lineage.
    pub resume_ancestor_walk_depth_cap: usize,
    /// Hint, in milliseconds, returned alongside `SESSION_LOCK_BUSY`.
    pub lock_retry_hint_ms: u64,
    /// Keyring rotation policy for an embedding caller to enforce.
    pub keyring_rotation: KeyringRotationPolicy,
}

impl Default for WorkRailConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./workrail-data"),
            context_byte_budget: 16 * 1024,
            max_blockers: 10,
            message_byte_cap: 8 * 1024,
            summary_byte_cap: 4 * 1024,
            resume_session_scan_cap: 10_000,
            resume_ancestor_walk_depth_cap: 1_000,
            lock_retry_hint_ms: 250,
            keyring_rotation: KeyringRotationPolicy::default(),
        }
    }
}

impl WorkRailConfig {
    /// Loads configuration by layering built-in defaults, an optional file
    /// (`path`, or `$WORKRAIL_CONFIG`, or `./workrail.toml` if present), and
    /// `WORKRAIL_*` environment variable overrides, in that order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a present file or environment override is
    /// malformed, or if the resolved configuration fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(file_path) = resolve_file_path(path) {
            config = read_file(&file_path)?;
        }
        apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates internal consistency beyond what deserialization alone checks.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if any budget is zero or the data
    /// root is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("dataRoot must not be empty".to_string()));
        }
        if self.context_byte_budget == 0 {
            return Err(ConfigError::Invalid("contextByteBudget must be greater than zero".to_string()));
        }
        if self.max_blockers == 0 {
            return Err(ConfigError::Invalid("maxBlockers must be greater than zero".to_string()));
        }
        if self.message_byte_cap == 0 || self.summary_byte_cap == 0 {
            return Err(ConfigError::Invalid("message and summary byte caps must be greater than zero".to_string()));
        }
        if self.resume_session_scan_cap == 0 || self.resume_ancestor_walk_depth_cap == 0 {
            return Err(ConfigError::Invalid("resume scan/walk caps must be greater than zero".to_string()));
        }
        if self.lock_retry_hint_ms == 0 {
            return Err(ConfigError::Invalid("lockRetryHintMs must be greater than zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: File Resolution
// ============================================================================

fn resolve_file_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(from_env) = env::var(CONFIG_PATH_ENV_VAR) {
        return Some(PathBuf::from(from_env));
    }
    let default_path = PathBuf::from(DEFAULT_CONFIG_NAME);
    if default_path.exists() { Some(default_path) } else { None }
}

fn read_file(path: &Path) -> Result<WorkRailConfig, ConfigError> {
    let bytes = fs::read(path).map_err(|err| ConfigError::Io(err.to_string()))?;
    if bytes.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::TooLarge);
    }
    let text = std::str::from_utf8(&bytes)
        .map_err(|_| ConfigError::Parse("config file must be utf-8".to_string()))?;
    toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))
}

// ============================================================================
// SECTION: Environment Overrides
// ============================================================================

fn env_var(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidEnvVar {
        var: format!("{ENV_PREFIX}{name}"),
        reason: "failed to parse".to_string(),
    })
}

fn apply_env_overrides(config: &mut WorkRailConfig) -> Result<(), ConfigError> {
    if let Some(raw) = env_var("DATA_ROOT") {
        config.data_root = PathBuf::from(raw);
    }
    if let Some(raw) = env_var("CONTEXT_BYTE_BUDGET") {
        config.context_byte_budget = parse_env("CONTEXT_BYTE_BUDGET", &raw)?;
    }
    if let Some(raw) = env_var("MAX_BLOCKERS") {
        config.max_blockers = parse_env("MAX_BLOCKERS", &raw)?;
    }
    if let Some(raw) = env_var("MESSAGE_BYTE_CAP") {
        config.message_byte_cap = parse_env("MESSAGE_BYTE_CAP", &raw)?;
    }
    if let Some(raw) = env_var("SUMMARY_BYTE_CAP") {
        config.summary_byte_cap = parse_env("SUMMARY_BYTE_CAP", &raw)?;
    }
    if let Some(raw) = env_var("RESUME_SESSION_SCAN_CAP") {
        config.resume_session_scan_cap = parse_env("RESUME_SESSION_SCAN_CAP", &raw)?;
    }
    if let Some(raw) = env_var("RESUME_ANCESTOR_WALK_DEPTH_CAP") {
        config.resume_ancestor_walk_depth_cap = parse_env("RESUME_ANCESTOR_WALK_DEPTH_CAP", &raw)?;
    }
    if let Some(raw) = env_var("LOCK_RETRY_HINT_MS") {
        config.lock_retry_hint_ms = parse_env("LOCK_RETRY_HINT_MS", &raw)?;
    }
    if let Some(raw) = env_var("KEYRING_ROTATION_DAYS") {
        config.keyring_rotation = KeyringRotationPolicy::EveryDays(parse_env("KEYRING_ROTATION_DAYS", &raw)?);
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        WorkRailConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn loading_with_no_file_and_no_env_returns_defaults() {
        let config = WorkRailConfig::load(Some(Path::new("/nonexistent/workrail.toml")));
        // An explicit, nonexistent path is a hard error, not a silent fallback.
        assert!(config.is_err());
    }

    #[test]
    fn loading_a_valid_file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("workrail.toml");
        fs::write(&path, "dataRoot = \"/tmp/custom-root\"\nmaxBlockers = 5\n").expect("write");

        let config = WorkRailConfig::load(Some(&path)).expect("loads");
        assert_eq!(config.data_root, PathBuf::from("/tmp/custom-root"));
        assert_eq!(config.max_blockers, 5);
    }

    #[test]
    fn zero_budgets_fail_validation() {
        let mut config = WorkRailConfig::default();
        config.max_blockers = 0;
        assert!(config.validate().is_err());
    }
}
