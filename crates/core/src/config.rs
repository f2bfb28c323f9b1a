//! Configuration surface for the duplication pipeline (§6).
//!
//! Supports loading from a TOML file (default `codeloom.toml` at the project
//! root); every field has a `#[serde(default = "...")]` so that
//! `Config::default()` and an empty TOML file produce the same struct.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration (§6 "Configuration surface").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Path to scan.
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Process-wide query cache (C2).
    #[serde(default)]
    pub cache: CacheConfig,

    /// Matcher executor (C1).
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Duplication detector defaults (C4).
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Enrichment orchestrator defaults (C7).
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Backup store root, default `<project_root>/.backups`.
    #[serde(default)]
    pub backup_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            cache: CacheConfig::default(),
            executor: ExecutorConfig::default(),
            detector: DetectorConfig::default(),
            enrichment: EnrichmentConfig::default(),
            backup_root: None,
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults for anything unset.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| Error::InvalidInput(format!("invalid config at {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolved backup root (`<project_root>/.backups` unless overridden).
    pub fn backup_root(&self) -> PathBuf {
        self.backup_root
            .clone()
            .unwrap_or_else(|| self.project_root.join(".backups"))
    }

    /// Validate range constraints from §6. Not done at the serde layer so
    /// that the error message can name the offending field.
    pub fn validate(&self) -> Result<()> {
        if !(1..=16).contains(&self.enrichment.max_workers) {
            return Err(Error::InvalidInput(format!(
                "enrichment.max_workers must be in 1..=16, got {}",
                self.enrichment.max_workers
            )));
        }
        if self.enrichment.timeout_per_candidate_seconds == 0
            || self.enrichment.timeout_per_candidate_seconds > 300
        {
            return Err(Error::InvalidInput(format!(
                "enrichment.timeout_per_candidate_seconds must be in 1..=300, got {}",
                self.enrichment.timeout_per_candidate_seconds
            )));
        }
        if !(0.0..=1.0).contains(&self.detector.min_similarity) {
            return Err(Error::InvalidInput(format!(
                "detector.min_similarity must be in [0,1], got {}",
                self.detector.min_similarity
            )));
        }
        Ok(())
    }
}

fn default_project_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Query cache configuration (C2).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_size")]
    pub size: usize,
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
            ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

fn default_cache_size() -> usize {
    1000
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

/// Matcher executor configuration (C1).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Name or path of the external structural-pattern matcher binary.
    #[serde(default = "default_matcher_binary")]
    pub matcher_binary: String,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            matcher_binary: default_matcher_binary(),
            max_file_size_mb: default_max_file_size_mb(),
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_matcher_binary() -> String {
    "ast-grep".to_string()
}

fn default_max_file_size_mb() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Duplication detector configuration (C4).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_min_lines")]
    pub min_lines: u32,
    #[serde(default)]
    pub construct_type: ConstructType,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            min_lines: default_min_lines(),
            construct_type: ConstructType::default(),
            exclude_patterns: Vec::new(),
        }
    }
}

fn default_min_similarity() -> f64 {
    0.8
}

fn default_min_lines() -> u32 {
    5
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructType {
    #[default]
    FunctionDefinition,
    ClassDefinition,
    Block,
}

/// Enrichment orchestrator configuration (C7).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    #[serde(default = "default_timeout_per_candidate")]
    pub timeout_per_candidate_seconds: u64,
    #[serde(default = "default_true")]
    pub include_test_coverage: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            timeout_per_candidate_seconds: default_timeout_per_candidate(),
            include_test_coverage: true,
        }
    }
}

fn default_max_workers() -> u32 {
    4
}

fn default_timeout_per_candidate() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_surface() {
        let config = Config::default();
        assert_eq!(config.cache.size, 1000);
        assert_eq!(config.cache.ttl_seconds, 300);
        assert_eq!(config.enrichment.max_workers, 4);
        assert_eq!(config.enrichment.timeout_per_candidate_seconds, 30);
        assert_eq!(config.executor.max_file_size_mb, 10);
        assert_eq!(config.detector.min_similarity, 0.8);
        assert_eq!(config.detector.min_lines, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_toml_equals_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.cache.size, Config::default().cache.size);
    }

    #[test]
    fn backup_root_defaults_under_project_root() {
        let mut config = Config::default();
        config.project_root = PathBuf::from("/tmp/proj");
        assert_eq!(config.backup_root(), PathBuf::from("/tmp/proj/.backups"));
    }

    #[test]
    fn validate_rejects_out_of_range_max_workers() {
        let mut config = Config::default();
        config.enrichment.max_workers = 32;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_timeout() {
        let mut config = Config::default();
        config.enrichment.timeout_per_candidate_seconds = 301;
        assert!(config.validate().is_err());
    }
}
