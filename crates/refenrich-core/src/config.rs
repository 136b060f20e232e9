//! Run configuration for the reference enrichment pipeline.
//!
//! Configuration is a plain TOML document loaded from a path given on the
//! command line; nothing about its shape is platform-specific, unlike the
//! data/config directory discovery this module used to own.
//!
//! ## Example Configuration File
//!
//! ```toml
//! input_file = "references.txt"
//! output_file = "references.txt"
//! selection_mode = "all_incomplete"
//! query_mode = "smart"
//! primary_threshold = 75.0
//! secondary_threshold = 75.0
//! auto_finalize = false
//!
//! [rate_limit]
//! search_ms = 1000
//! inter_ref_ms = 3000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

fn default_max_references() -> Option<u32> {
    None
}
const fn default_primary_threshold() -> f64 {
    75.0
}
const fn default_secondary_threshold() -> f64 {
    75.0
}
const fn default_validate_top_k() -> u32 {
    20
}
const fn default_rank_batch_size() -> u32 {
    10
}
const fn default_rank_timeout_ms() -> u64 {
    18_000
}
const fn default_primary_split() -> u32 {
    6
}
const fn default_secondary_split() -> u32 {
    2
}

/// Query generation mode, §4.C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Strategy-selected query generation (default).
    Smart,
    /// Fixed 8-query split.
    Standard,
}

impl Default for QueryMode {
    fn default() -> Self {
        Self::Smart
    }
}

/// How the run selects which references to process, §6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum SelectionMode {
    /// Process references whose ID falls in `[id_start, id_end)`.
    Range {
        /// Inclusive start of the ID range.
        id_start: u32,
        /// Exclusive end of the ID range.
        id_end: u32,
    },
    /// Process references matching a flag predicate.
    Criteria {
        /// When true, only references without `FINALIZED` are selected.
        not_finalized: bool,
    },
    /// Process every reference lacking both URL slots.
    AllIncomplete,
}

impl Default for SelectionMode {
    fn default() -> Self {
        Self::AllIncomplete
    }
}

/// Rate-limiting knobs, §4.D and §5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum milliseconds between search requests.
    pub search_ms: u64,
    /// Sleep between references, to stay well under quota.
    pub inter_ref_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            search_ms: 1000,
            inter_ref_ms: 3000,
        }
    }
}

fn default_search_endpoint() -> String {
    "https://api.search.example/v1/search".to_string()
}
fn default_search_key_env() -> String {
    "REFENRICH_SEARCH_API_KEY".to_string()
}
fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_llm_key_env() -> String {
    "REFENRICH_LLM_API_KEY".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Connection details for the external web-search endpoint. The key itself
/// is never stored here, only the name of the environment variable holding
/// it, so config files stay safe to commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchApiConfig {
    /// Search endpoint URL.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
}

impl Default for SearchApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_search_key_env(),
        }
    }
}

/// Connection details for the external LLM chat-completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmApiConfig {
    /// Chat-completion endpoint URL.
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    /// Model identifier sent with each request.
    #[serde(default = "default_llm_model")]
    pub model: String,
}

impl Default for LlmApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key_env: default_llm_key_env(),
            model: default_llm_model(),
        }
    }
}

/// A single run's full configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Path to the reference store to read.
    pub input_file: PathBuf,
    /// Path to the reference store to write (may equal `input_file`).
    pub output_file: PathBuf,
    /// Which references this run processes.
    #[serde(default)]
    pub selection_mode: SelectionMode,
    /// Hard cap on references processed in one run.
    #[serde(default = "default_max_references", skip_serializing_if = "Option::is_none")]
    pub max_references: Option<u32>,
    /// Query generation mode.
    #[serde(default)]
    pub query_mode: QueryMode,
    /// Standard-mode primary query allocation; must sum to 8 with `secondary_split`.
    #[serde(default = "default_primary_split")]
    pub primary_split: u32,
    /// Standard-mode secondary query allocation; must sum to 8 with `primary_split`.
    #[serde(default = "default_secondary_split")]
    pub secondary_split: u32,
    /// Minimum effective primary score to fill the primary slot.
    #[serde(default = "default_primary_threshold")]
    pub primary_threshold: f64,
    /// Minimum effective secondary score to fill the secondary slot.
    #[serde(default = "default_secondary_threshold")]
    pub secondary_threshold: f64,
    /// Whether to add `FINALIZED` when both slots fill at score >= 85.
    #[serde(default)]
    pub auto_finalize: bool,
    /// Search and inter-reference rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Number of top candidates the validator fetches, by rank/score.
    #[serde(default = "default_validate_top_k")]
    pub validate_top_k: u32,
    /// Candidates per LLM ranker request.
    #[serde(default = "default_rank_batch_size")]
    pub rank_batch_size: u32,
    /// Per-request rank deadline, milliseconds.
    #[serde(default = "default_rank_timeout_ms")]
    pub rank_timeout_ms: u64,
    /// Path to the progress ledger; defaults alongside `output_file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<PathBuf>,
    /// Web-search endpoint connection details.
    #[serde(default)]
    pub search_api: SearchApiConfig,
    /// LLM chat-completion endpoint connection details.
    #[serde(default)]
    pub llm_api: LlmApiConfig,
}

impl RunConfig {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let config: Self = toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.primary_split + self.secondary_split != 8 {
            return Err(Error::Config(format!(
                "primary_split ({}) + secondary_split ({}) must sum to 8",
                self.primary_split, self.secondary_split
            )));
        }
        if !(0.0..=100.0).contains(&self.primary_threshold) || !(0.0..=100.0).contains(&self.secondary_threshold) {
            return Err(Error::Config(
                "primary_threshold and secondary_threshold must be within 0..=100".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the ledger path, defaulting to a sibling of `output_file`.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.output_file.with_extension("progress.json"))
    }

    /// Stable hash of this config's content, recorded in the ledger to
    /// detect an accidental resume with a different configuration.
    #[must_use]
    pub fn content_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let serialized = toml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            input_file = "refs.txt"
            output_file = "refs.txt"
        "#
    }

    #[test]
    fn defaults_fill_in_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, minimal_toml()).unwrap();
        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.query_mode, QueryMode::Smart);
        assert_eq!(config.validate_top_k, 20);
        assert_eq!(config.rank_batch_size, 10);
        assert_eq!(config.primary_split + config.secondary_split, 8);
        assert_eq!(config.selection_mode, SelectionMode::AllIncomplete);
    }

    #[test]
    fn rejects_split_not_summing_to_eight() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, format!("{}\nprimary_split = 5\nsecondary_split = 5\n", minimal_toml())).unwrap();
        let err = RunConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn content_hash_is_stable_for_identical_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, minimal_toml()).unwrap();
        let a = RunConfig::load(&path).unwrap();
        let b = RunConfig::load(&path).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn ledger_path_defaults_alongside_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, minimal_toml()).unwrap();
        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.ledger_path().extension().unwrap(), "json");
    }
}
