use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Complete configuration for a training run.
///
/// Every section has defaults, so a config file only needs the fields it
/// changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextRlConfig {
    pub train: TrainConfig,
    pub env: ChainConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

/// Training loop and agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Every `eval_frequency`-th episode is an evaluation episode (default: 10).
    pub eval_frequency: usize,
    /// Trajectory values at or below this count as failures (default: the
    /// environment's threshold).
    pub failure_threshold: Option<f64>,
    /// Discount factor (default: the environment's gamma).
    pub gamma: Option<f64>,
    /// Per-episode step cap before an episode times out (default: 16).
    pub max_steps: usize,
    /// Longest trajectory kept in the buffer (default: 8).
    pub max_trajectory: usize,
    /// Centre of the logistic trust curve (default: 3.0).
    pub min_successes: f64,
    /// How many top trajectory values feed the trust score (default: 4).
    pub n: usize,
    /// Trajectories per value-estimation prompt (default: 8).
    pub q_prompt_size: usize,
    /// Trajectories per policy prompt (default: 8).
    pub pi_prompt_size: usize,
    /// Continuation completions per value-estimation rollout (default: 8).
    pub max_depth: usize,
    /// Policy prompt attempts before giving up; `None` retries forever.
    pub max_policy_attempts: Option<usize>,
    /// Seed for action sampling and prompt ordering (default: 0).
    pub seed: u64,
    /// Sampling temperature (default: 0.1).
    pub temperature: f64,
    /// Training steps to run (default: 1000).
    pub total_steps: usize,
    /// Buffer capacity; `None` keeps every trajectory.
    pub buffer_capacity: Option<usize>,
}

/// Chain environment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Number of positions (default: 5).
    pub states: usize,
    /// Goal position (default: 3).
    pub goal: usize,
    /// Seed for start states (default: 0).
    pub seed: u64,
}

/// Completion service and cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API.
    pub api_base: String,
    /// Completion model name.
    pub model_id: String,
    /// API key (filled from `OPENAI_API_KEY` when empty).
    pub api_key: String,
    /// Prompt + completion token budget (default: 4000).
    pub max_context_tokens: usize,
    /// Output token cap per completion (default: 100).
    pub max_completion_tokens: usize,
    /// Tokens held back from the budget (default: 100).
    pub safety_margin: usize,
    /// Top log-probabilities to request per token.
    pub logprobs: Option<usize>,
    /// Wait before every live request, in seconds (default: 0).
    pub initial_wait_secs: f64,
    /// Smallest backoff after a rate-limit error, in seconds (default: 1).
    pub min_backoff_secs: f64,
    /// Backoff cap, in seconds (default: 60).
    pub max_wait_secs: f64,
    /// Rate-limit retries before giving up; `None` retries forever.
    pub max_rate_limit_retries: Option<usize>,
    /// Completion cache file; `None` keeps the cache in memory.
    pub cache_path: Option<PathBuf>,
    /// Fail on cache misses instead of calling the service.
    pub require_cache: bool,
}

/// Experiment logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Run identifier; records are only written when set.
    pub run_id: Option<String>,
    /// JSON lines file for run records; `None` logs through `tracing`.
    pub log_path: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            eval_frequency: 10,
            failure_threshold: None,
            gamma: None,
            max_steps: 16,
            max_trajectory: 8,
            min_successes: 3.0,
            n: 4,
            q_prompt_size: 8,
            pi_prompt_size: 8,
            max_depth: 8,
            max_policy_attempts: None,
            seed: 0,
            temperature: 0.1,
            total_steps: 1000,
            buffer_capacity: None,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            states: 5,
            goal: 3,
            seed: 0,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            model_id: "gpt-3.5-turbo-instruct".into(),
            api_key: String::new(),
            max_context_tokens: 4000,
            max_completion_tokens: 100,
            safety_margin: 100,
            logprobs: None,
            initial_wait_secs: 0.0,
            min_backoff_secs: 1.0,
            max_wait_secs: 60.0,
            max_rate_limit_retries: None,
            cache_path: Some(PathBuf::from("data/completions.jsonl")),
            require_cache: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TextRlConfig =
            serde_json::from_str(r#"{"train": {"total_steps": 50}, "env": {"goal": 2}}"#).unwrap();
        assert_eq!(config.train.total_steps, 50);
        assert_eq!(config.train.eval_frequency, 10);
        assert_eq!(config.env.goal, 2);
        assert_eq!(config.env.states, 5);
        assert_eq!(config.model.max_context_tokens, 4000);
        assert!(config.logging.run_id.is_none());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = TextRlConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: TextRlConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.train.q_prompt_size, config.train.q_prompt_size);
        assert_eq!(parsed.model.cache_path, config.model.cache_path);
    }
}
