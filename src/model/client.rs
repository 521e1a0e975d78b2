//! Caching, retrying front end to a [`CompletionService`].
//!
//! [`CompletionClient::complete`] is the only way the agents talk to the
//! language model. It
//!
//! 1. clips the prompt to the context budget (oldest lines first),
//! 2. answers from the [`CompletionCache`] when it can,
//! 3. otherwise calls the service, doubling a capped wait on every rate-limit
//!    signal, and
//! 4. stores the fresh completion before returning it.
//!
//! The client is used through `&mut`, so at most one request is in flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::logging::{LogRecord, RunLogger};

use super::api::{
    extract_top_logprobs, CompletionError, CompletionRequest, CompletionService,
};
use super::cache::{CompletionCache, CompletionRecord};

/// Estimated characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// Rough token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tunables for [`CompletionClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    /// Model name sent with every request.
    pub model: String,
    /// Total tokens (prompt + completion) the model accepts.
    pub max_context_tokens: usize,
    /// Upper bound on tokens generated per completion.
    pub max_completion_tokens: usize,
    /// Tokens held back from the context budget.
    pub safety_margin: usize,
    /// Top log-probabilities requested per token.
    pub logprobs: Option<usize>,
    /// Wait before every live request.
    pub initial_wait: Duration,
    /// Smallest wait after a rate-limit signal.
    pub min_backoff: Duration,
    /// Cap on the wait between rate-limited attempts.
    pub max_wait: Duration,
    /// Give up after this many rate-limited attempts; `None` retries forever.
    pub max_rate_limit_retries: Option<usize>,
    /// Fail on cache misses instead of calling the service.
    pub require_cache: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from(&ModelConfig::default())
    }
}

impl From<&ModelConfig> for ClientSettings {
    fn from(config: &ModelConfig) -> Self {
        let secs = |s: f64| Duration::try_from_secs_f64(s).unwrap_or(Duration::ZERO);
        Self {
            model: config.model_id.clone(),
            max_context_tokens: config.max_context_tokens,
            max_completion_tokens: config.max_completion_tokens,
            safety_margin: config.safety_margin,
            logprobs: config.logprobs,
            initial_wait: secs(config.initial_wait_secs),
            min_backoff: secs(config.min_backoff_secs),
            max_wait: secs(config.max_wait_secs),
            max_rate_limit_retries: config.max_rate_limit_retries,
            require_cache: config.require_cache,
        }
    }
}

impl ClientSettings {
    /// Tokens available to the prompt.
    pub fn max_prompt_tokens(&self) -> usize {
        self.max_context_tokens
            .saturating_sub(self.max_completion_tokens)
            .saturating_sub(self.safety_margin)
    }

    /// Output budget for a prompt of `prompt_tokens` tokens.
    pub fn completion_budget(&self, prompt_tokens: usize) -> usize {
        let remaining = self
            .max_context_tokens
            .saturating_sub(prompt_tokens)
            .saturating_sub(self.safety_margin);
        remaining.min(self.max_completion_tokens).max(1)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Cache-first completion client.
pub struct CompletionClient<S> {
    service: S,
    cache: CompletionCache,
    settings: ClientSettings,
    logger: Option<Arc<dyn RunLogger>>,
    started: Instant,
    live_calls: usize,
    cache_hits: usize,
}

impl<S: CompletionService> CompletionClient<S> {
    pub fn new(service: S, cache: CompletionCache, settings: ClientSettings) -> Self {
        Self {
            service,
            cache,
            settings,
            logger: None,
            started: Instant::now(),
            live_calls: 0,
            cache_hits: 0,
        }
    }

    /// Report query latency to `logger` (only when it carries a run id).
    pub fn with_logger(mut self, logger: Arc<dyn RunLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn cache(&self) -> &CompletionCache {
        &self.cache
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Completions fetched from the service so far.
    pub fn live_calls(&self) -> usize {
        self.live_calls
    }

    /// Completions answered from the cache so far.
    pub fn cache_hits(&self) -> usize {
        self.cache_hits
    }

    /// Complete `prompt`.
    ///
    /// With `use_cache`, a cached completion is returned without calling the
    /// service. When the cache is required no call ever reaches the service:
    /// a miss, or any call made with `use_cache` off, fails with
    /// [`CompletionError::CacheMiss`].
    ///
    /// Live completions are written to the cache. A completion that cannot be
    /// persisted is still returned.
    pub async fn complete(
        &mut self,
        prompt: &str,
        stop: &[String],
        temperature: f64,
        use_cache: bool,
    ) -> Result<CompletionRecord, CompletionError> {
        let prompt = self.clip_prompt(prompt);

        if use_cache {
            if let Some(record) = self.cache.get(&prompt) {
                self.cache_hits += 1;
                debug!(completion = %record.completion, "completion cache hit");
                return Ok(record.clone());
            }
        }
        if self.settings.require_cache {
            let tail = prompt.lines().last().unwrap_or_default().to_string();
            warn!(prompt_tail = %tail, use_cache, "cache required; refusing live completion");
            return Err(CompletionError::CacheMiss { prompt_tail: tail });
        }

        let request = CompletionRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.completion_budget(estimate_tokens(&prompt)),
            prompt,
            temperature,
            stop: stop.to_vec(),
            logprobs: self.settings.logprobs,
        };

        let mut wait = self.settings.initial_wait;
        let mut rate_limited = 0usize;
        let response = loop {
            wait = wait.min(self.settings.max_wait);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            let tick = Instant::now();
            match self.service.create(&request).await {
                Ok(response) => {
                    self.log_latency(tick.elapsed());
                    break response;
                }
                Err(CompletionError::RateLimited(message)) => {
                    rate_limited += 1;
                    if let Some(max) = self.settings.max_rate_limit_retries {
                        if rate_limited > max {
                            return Err(CompletionError::RetriesExhausted {
                                attempts: rate_limited,
                            });
                        }
                    }
                    wait = (wait * 2).max(self.settings.min_backoff);
                    warn!(
                        %message,
                        attempt = rate_limited,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited; backing off"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "completion request failed");
                    return Err(e);
                }
            }
        };

        let top_logprobs = extract_top_logprobs(&response);
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(CompletionError::EmptyResponse)?;

        let record = CompletionRecord {
            prompt: request.prompt,
            completion: choice.text.trim_start().to_string(),
            top_logprobs,
        };
        self.live_calls += 1;
        if let Err(e) = self.cache.insert(record.clone()) {
            warn!(error = %e, "failed to persist completion; returning it uncached");
        }

        debug!(
            completion = %record.completion.lines().next().unwrap_or_default(),
            live_calls = self.live_calls,
            "live completion"
        );
        Ok(record)
    }

    /// Drop the oldest prompt lines until the prompt fits the budget. The
    /// final line is always kept.
    fn clip_prompt(&self, prompt: &str) -> String {
        let budget = self.settings.max_prompt_tokens();
        if estimate_tokens(prompt) <= budget {
            return prompt.to_string();
        }

        let mut lines: Vec<&str> = prompt.split('\n').collect();
        let mut dropped = 0;
        while lines.len() > 1 && estimate_tokens(&lines.join("\n")) > budget {
            lines.remove(0);
            dropped += 1;
        }
        info!(dropped, budget, "clipped prompt to fit context budget");
        lines.join("\n")
    }

    fn log_latency(&self, latency: Duration) {
        let Some(logger) = &self.logger else {
            return;
        };
        let Some(run_id) = logger.run_id() else {
            return;
        };
        let record = LogRecord::new()
            .with("hours", self.started.elapsed().as_secs_f64() / 3600.0)
            .with("run ID", run_id)
            .with("seconds per query", latency.as_secs_f64());
        if let Err(e) = logger.log(&record) {
            warn!(error = %e, "failed to log completion latency");
        }
    }
}
