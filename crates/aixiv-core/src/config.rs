//! Runtime configuration.
//!
//! Loaded from an optional TOML file (every field defaulted), then
//! overridden by `AIXIV_*` environment variables.

use std::path::Path;

use aixiv_state::MaturityLevel;
use serde::{Deserialize, Serialize};

use crate::arena::ArenaWeights;
use crate::completion::SamplingParams;
use crate::domain::error::{RailError, Result};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const STRONG_MODEL: &str = "claude-opus-4-20250514";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Drafting stages
    pub default_model: String,
    /// Review, red-team and meta-review stages
    pub strong_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            strong_model: STRONG_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per stage, first included
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Completed review cycles after which `revise` becomes a rejection
    pub max_review_cycles: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_review_cycles: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    pub promotion_threshold: MaturityLevel,
    pub weights: ArenaWeights,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: MaturityLevel::L2,
            weights: ArenaWeights::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdeaConfig {
    pub candidates: usize,
    /// Survivors kept after each critique round
    pub narrowing: Vec<usize>,
}

impl Default for IdeaConfig {
    fn default() -> Self {
        Self {
            candidates: 5,
            narrowing: vec![2, 1],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiteratureConfig {
    pub max_rounds: u32,
    pub queries_per_round: usize,
    pub max_results: usize,
}

impl Default for LiteratureConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            queries_per_round: 3,
            max_results: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub api_version: String,
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            url: "https://api.anthropic.com/v1/messages".to_string(),
            api_key: None,
            api_version: "2023-06-01".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RailConfig {
    pub models: ModelConfig,
    pub sampling: SamplingParams,
    pub retry: RetryConfig,
    pub lifecycle: LifecycleConfig,
    pub arena: ArenaConfig,
    pub idea: IdeaConfig,
    pub literature: LiteratureConfig,
    pub completion: CompletionConfig,
}

impl RailConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| RailError::Config(e.to_string()))
    }

    /// Read `path` (if any), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .map_err(|e| RailError::Config(format!("{}: {e}", p.display())))?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|k| std::env::var(k).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AIXIV_*` overrides read through `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("AIXIV_MODEL") {
            self.models.default_model = v;
        }
        if let Some(v) = var("AIXIV_STRONG_MODEL") {
            self.models.strong_model = v;
        }
        if let Some(v) = var("AIXIV_MAX_REVIEW_CYCLES") {
            self.lifecycle.max_review_cycles = v
                .parse()
                .map_err(|_| RailError::Config(format!("AIXIV_MAX_REVIEW_CYCLES: {v}")))?;
        }
        if let Some(v) = var("AIXIV_ARENA_THRESHOLD") {
            self.arena.promotion_threshold = v.parse().map_err(RailError::Config)?;
        }
        if let Some(v) = var("AIXIV_COMPLETION_URL") {
            self.completion.url = v;
        }
        if let Some(v) = var("ANTHROPIC_API_KEY") {
            self.completion.api_key = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(RailError::Config("retry.max_attempts must be >= 1".into()));
        }
        if self.idea.candidates == 0 {
            return Err(RailError::Config("idea.candidates must be >= 1".into()));
        }
        if self.idea.narrowing.iter().any(|&n| n == 0) {
            return Err(RailError::Config("idea.narrowing entries must be >= 1".into()));
        }
        if self.literature.max_rounds == 0 {
            return Err(RailError::Config("literature.max_rounds must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let c = RailConfig::default();
        assert_eq!(c.retry.max_attempts, 3);
        assert_eq!(c.lifecycle.max_review_cycles, 3);
        assert_eq!(c.idea.narrowing, vec![2, 1]);
        assert_eq!(c.literature.max_rounds, 5);
        assert_eq!(c.arena.promotion_threshold, MaturityLevel::L2);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let c = RailConfig::from_toml_str(
            r#"
            [lifecycle]
            max_review_cycles = 5

            [arena]
            promotion_threshold = "L3"
            "#,
        )
        .unwrap();
        assert_eq!(c.lifecycle.max_review_cycles, 5);
        assert_eq!(c.arena.promotion_threshold, MaturityLevel::L3);
        assert_eq!(c.retry, RetryConfig::default());
    }

    #[test]
    fn env_overrides_apply_after_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[models]\ndefault_model = \"from-file\"").unwrap();
        let mut c = RailConfig::from_toml_str(
            &std::fs::read_to_string(file.path()).unwrap(),
        )
        .unwrap();

        let vars: HashMap<&str, &str> = [
            ("AIXIV_STRONG_MODEL", "strong-env"),
            ("AIXIV_ARENA_THRESHOLD", "L4"),
        ]
        .into_iter()
        .collect();
        c.apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(c.models.default_model, "from-file");
        assert_eq!(c.models.strong_model, "strong-env");
        assert_eq!(c.arena.promotion_threshold, MaturityLevel::L4);
    }

    #[test]
    fn bad_override_is_config_error() {
        let mut c = RailConfig::default();
        let err = c
            .apply_overrides(|k| (k == "AIXIV_MAX_REVIEW_CYCLES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, RailError::Config(_)));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut c = RailConfig::default();
        c.retry.max_attempts = 0;
        assert!(c.validate().is_err());
    }
}
