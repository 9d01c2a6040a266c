// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Configuration for the evaluation pipeline
//!
//! Loaded from a TOML file where every field has a default, then overlaid
//! with environment variables for the assessor endpoint and credentials:
//!
//! - `AZURE_OPENAI_ENDPOINT`, `AZURE_OPENAI_DEPLOYMENT_NAME`, `OPENAI_API_VERSION`
//! - `AZURE_OPENAI_API_KEY`, `OPENAI_API_KEY`
//! - `OPENAI_BASE_URL`, `AXIOMEVAL_MODEL`

use crate::resilience::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Assessor model provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// OpenAI-compatible chat completions API
    #[default]
    OpenAi,
    /// Azure OpenAI deployment
    Azure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessorConfig {
    pub provider: Provider,
    pub model: String,
    pub base_url: Option<String>,

    /// Azure deployment name
    pub deployment: Option<String>,
    pub api_version: Option<String>,

    /// Never read from the TOML file; populated from the environment
    #[serde(skip)]
    pub api_key: Option<String>,

    /// Per-attempt timeout
    pub request_timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for AssessorConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            deployment: None,
            api_version: None,
            api_key: None,
            request_timeout_secs: 30,
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

impl AssessorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::exponential();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            jitter: policy.jitter,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

/// How expected-answer entities are sent to the assessor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// One call per entity
    PerEntity,
    /// Up to `batch_size` entities per call
    Batched { batch_size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    PerEntity,
    #[default]
    Batched,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub strategy: StrategyKind,

    /// Entities per call when batching
    pub batch_size: usize,

    /// Concurrent match calls per case
    pub max_concurrency: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Batched,
            batch_size: 8,
            max_concurrency: 4,
        }
    }
}

impl MatchingConfig {
    pub fn strategy(&self) -> MatchStrategy {
        match self.strategy {
            StrategyKind::PerEntity => MatchStrategy::PerEntity,
            StrategyKind::Batched => MatchStrategy::Batched {
                batch_size: self.batch_size,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cases evaluated concurrently within a batch
    pub max_concurrent_cases: usize,

    /// Deadline for one whole case, all retries included
    pub case_timeout_secs: u64,

    pub enable_cache: bool,
    pub cache_ttl_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_cases: 4,
            case_timeout_secs: 300,
            enable_cache: true,
            cache_ttl_secs: 3600, // 1 hour
        }
    }
}

impl PipelineConfig {
    pub fn case_timeout(&self) -> Duration {
        Duration::from_secs(self.case_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Subtracted from the score per invalid citation (0 = report only)
    pub invalid_citation_penalty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// JSON array of axioms
    pub axioms: PathBuf,

    /// Directory of `<template_id>_prompt.md` overrides
    pub prompts_dir: Option<PathBuf>,

    /// Parent directory of run output directories
    pub runs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            axioms: PathBuf::from("data/constitution.json"),
            prompts_dir: None,
            runs_dir: PathBuf::from("runs"),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub assessor: AssessorConfig,
    pub retry: RetryConfig,
    pub matching: MatchingConfig,
    pub pipeline: PipelineConfig,
    pub scoring: ScoringConfig,
    pub paths: PathsConfig,
}

impl EvaluatorConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Overlay values from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary variable lookup
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let assessor = &mut self.assessor;

        if let Some(model) = lookup("AXIOMEVAL_MODEL") {
            assessor.model = model;
        }

        match assessor.provider {
            Provider::Azure => {
                if let Some(endpoint) = lookup("AZURE_OPENAI_ENDPOINT") {
                    assessor.base_url = Some(endpoint);
                }
                if let Some(deployment) = lookup("AZURE_OPENAI_DEPLOYMENT_NAME") {
                    assessor.deployment = Some(deployment);
                }
                if let Some(version) = lookup("OPENAI_API_VERSION") {
                    assessor.api_version = Some(version);
                }
                assessor.api_key = lookup("AZURE_OPENAI_API_KEY")
                    .or_else(|| lookup("OPENAI_API_KEY"))
                    .or(assessor.api_key.take());
            }
            Provider::OpenAi => {
                if let Some(base_url) = lookup("OPENAI_BASE_URL") {
                    assessor.base_url = Some(base_url);
                }
                assessor.api_key = lookup("OPENAI_API_KEY").or(assessor.api_key.take());
            }
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(invalid("retry.multiplier", "must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(invalid("retry.jitter", "must be within [0, 1]"));
        }
        if self.assessor.request_timeout_secs == 0 {
            return Err(invalid("assessor.request_timeout_secs", "must be positive"));
        }
        if self.matching.max_concurrency == 0 {
            return Err(invalid("matching.max_concurrency", "must be at least 1"));
        }
        if let MatchStrategy::Batched { batch_size: 0 } = self.matching.strategy() {
            return Err(invalid("matching.batch_size", "must be at least 1"));
        }
        if self.pipeline.max_concurrent_cases == 0 {
            return Err(invalid("pipeline.max_concurrent_cases", "must be at least 1"));
        }
        if self.pipeline.case_timeout_secs == 0 {
            return Err(invalid("pipeline.case_timeout_secs", "must be positive"));
        }
        let penalty = self.scoring.invalid_citation_penalty;
        if !(penalty.is_finite() && penalty >= 0.0) {
            return Err(invalid(
                "scoring.invalid_citation_penalty",
                "must be a non-negative number",
            ));
        }

        if self.assessor.api_key.is_none() {
            return Err(invalid(
                "assessor.api_key",
                match self.assessor.provider {
                    Provider::OpenAi => "set OPENAI_API_KEY",
                    Provider::Azure => "set AZURE_OPENAI_API_KEY",
                },
            ));
        }
        if self.assessor.provider == Provider::Azure {
            if self.assessor.base_url.is_none() {
                return Err(invalid("assessor.base_url", "set AZURE_OPENAI_ENDPOINT"));
            }
            if self.assessor.deployment.is_none() {
                return Err(invalid(
                    "assessor.deployment",
                    "set AZURE_OPENAI_DEPLOYMENT_NAME",
                ));
            }
            if self.assessor.api_version.is_none() {
                return Err(invalid("assessor.api_version", "set OPENAI_API_VERSION"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EvaluatorConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.matching.max_concurrency, 4);
        assert_eq!(
            config.matching.strategy(),
            MatchStrategy::Batched { batch_size: 8 }
        );
        assert_eq!(config.scoring.invalid_citation_penalty, 0.0);
        assert!(config.pipeline.enable_cache);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EvaluatorConfig::from_toml_str(
            r#"
            [assessor]
            provider = "azure"
            request_timeout_secs = 10

            [matching]
            strategy = "per_entity"
            max_concurrency = 2

            [scoring]
            invalid_citation_penalty = 0.1
            "#,
        )
        .unwrap();

        assert_eq!(config.assessor.provider, Provider::Azure);
        assert_eq!(config.assessor.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.assessor.model, "gpt-4o-mini");
        assert_eq!(config.matching.strategy(), MatchStrategy::PerEntity);
        assert_eq!(config.matching.max_concurrency, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.scoring.invalid_citation_penalty, 0.1);
    }

    #[test]
    fn test_batched_strategy_from_toml() {
        let config = EvaluatorConfig::from_toml_str(
            r#"
            [matching]
            strategy = "batched"
            batch_size = 3
            "#,
        )
        .unwrap();
        assert_eq!(
            config.matching.strategy(),
            MatchStrategy::Batched { batch_size: 3 }
        );
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = EvaluatorConfig::from_toml_str("[assessor]\nprovider = \"bedrock\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_azure_env_overlay() {
        let mut config = EvaluatorConfig::default();
        config.assessor.provider = Provider::Azure;
        config.apply_env_with(env(&[
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com/"),
            ("AZURE_OPENAI_DEPLOYMENT_NAME", "eval-gpt"),
            ("OPENAI_API_VERSION", "2024-06-01"),
            ("AZURE_OPENAI_API_KEY", "secret"),
        ]));

        assert_eq!(
            config.assessor.base_url.as_deref(),
            Some("https://example.openai.azure.com/")
        );
        assert_eq!(config.assessor.deployment.as_deref(), Some("eval-gpt"));
        assert_eq!(config.assessor.api_key.as_deref(), Some("secret"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_credentials() {
        let mut config = EvaluatorConfig::default();
        config.apply_env_with(env(&[("OPENAI_API_KEY", "  ")]));
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "assessor.api_key",
                ..
            }
        ));

        config.apply_env_with(env(&[("OPENAI_API_KEY", "sk-test")]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = EvaluatorConfig::default();
        config.assessor.api_key = Some("k".into());

        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
        config.retry.max_attempts = 3;

        config.matching.batch_size = 0;
        assert!(config.validate().is_err());
        config.matching.strategy = StrategyKind::PerEntity;

        config.scoring.invalid_citation_penalty = -0.5;
        assert!(config.validate().is_err());
        config.scoring.invalid_citation_penalty = 0.0;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("axiomeval.toml");
        std::fs::write(&path, "[pipeline]\nmax_concurrent_cases = 8\n").unwrap();

        let config = EvaluatorConfig::from_path(&path).unwrap();
        assert_eq!(config.pipeline.max_concurrent_cases, 8);

        let err = EvaluatorConfig::from_path(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
