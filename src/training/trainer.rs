//! The online training loop.
//!
//! Episodes alternate between training and evaluation:
//!
//! ```text
//! while T < total_steps:
//!     reset the environment
//!     evaluate iff episodes % eval_frequency == 0
//!     until the episode ends or times out:
//!         p = logistic(2 * (top-n buffer values - min_successes))
//!         evaluation  -> Pi picks the action
//!         training    -> Q with probability p (if ready), else random
//!         step, record, T += 1 on training steps
//!     evaluation  -> log regret against the optimal return
//!     training    -> push every suffix of the last max_trajectory steps
//! ```
//!
//! Only training steps count towards `total_steps`. Timed-out training
//! episodes never enter the buffer, since their rendering would end without a
//! reward.

use std::cmp::Reverse;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentError, PolicyAgent, PromptSampler, ValueAgent};
use crate::config::TrainConfig;
use crate::env::Environment;
use crate::logging::{LogRecord, RunLogger};
use crate::model::{CompletionClient, CompletionError, CompletionService};
use crate::trajectory::{trajectory_value, TimeStep, Trajectory, TrajectoryBuffer};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one evaluation episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRecord {
    /// Training episodes completed before this evaluation.
    pub episode: usize,
    /// Training steps taken before this evaluation.
    pub step: usize,
    /// `optimal - return`.
    pub regret: f64,
    /// Discounted return achieved.
    #[serde(rename = "return")]
    pub return_: f64,
}

/// What a finished run did.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub steps: usize,
    pub episodes: usize,
    pub training_episodes: usize,
    pub evaluations: Vec<EvaluationRecord>,
    pub buffer_len: usize,
}

impl TrainingSummary {
    /// Mean regret over all evaluation episodes, if there were any.
    pub fn mean_regret(&self) -> Option<f64> {
        if self.evaluations.is_empty() {
            return None;
        }
        let total: f64 = self.evaluations.iter().map(|e| e.regret).sum();
        Some(total / self.evaluations.len() as f64)
    }
}

/// How an episode ended.
struct EpisodeOutcome<S> {
    trajectory: Vec<TimeStep<S>>,
    total_reward: f64,
    timed_out: bool,
}

/// Probability of trusting the value agent, given the summed top-n values.
pub fn confidence_probability(min_successes: f64, confidence: f64) -> f64 {
    1.0 / (1.0 + (2.0 * (min_successes - confidence)).exp())
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

pub struct Trainer<E: Environment, S> {
    env: E,
    client: CompletionClient<S>,
    buffer: TrajectoryBuffer<E::State>,
    q: Agent,
    pi: Agent,
    logger: Arc<dyn RunLogger>,
    rng: StdRng,
    gamma: f64,
    eval_frequency: usize,
    max_steps: usize,
    max_trajectory: usize,
    min_successes: f64,
    n: usize,
    total_steps: usize,
    steps: usize,
    episodes: usize,
    training_episodes: usize,
}

impl<E, S> Trainer<E, S>
where
    E: Environment,
    S: CompletionService,
{
    /// Build a trainer. Unset `gamma` and `failure_threshold` fall back to the
    /// environment's own values.
    pub fn new(
        env: E,
        client: CompletionClient<S>,
        config: &TrainConfig,
        logger: Arc<dyn RunLogger>,
    ) -> Result<Self> {
        if config.max_steps == 0 {
            bail!("max_steps must be at least 1");
        }
        if config.eval_frequency == 1 {
            bail!("eval_frequency 1 evaluates every episode and never trains");
        }

        let gamma = config.gamma.unwrap_or_else(|| env.gamma());
        let failure_threshold = config
            .failure_threshold
            .unwrap_or_else(|| env.failure_threshold());

        let q = ValueAgent::new(
            PromptSampler::new(config.q_prompt_size, failure_threshold),
            gamma,
            config.max_depth,
            config.temperature,
        );
        let pi = PolicyAgent::new(
            PromptSampler::new(config.pi_prompt_size, failure_threshold),
            config.temperature,
        )
        .with_max_attempts(config.max_policy_attempts);

        let buffer = match config.buffer_capacity {
            Some(capacity) => TrajectoryBuffer::with_capacity_limit(capacity),
            None => TrajectoryBuffer::new(),
        };

        Ok(Self {
            env,
            client,
            buffer,
            q: q.into(),
            pi: pi.into(),
            logger,
            rng: StdRng::seed_from_u64(config.seed),
            gamma,
            eval_frequency: config.eval_frequency,
            max_steps: config.max_steps,
            max_trajectory: config.max_trajectory,
            min_successes: config.min_successes,
            n: config.n,
            total_steps: config.total_steps,
            steps: 0,
            episodes: 0,
            training_episodes: 0,
        })
    }

    pub fn buffer(&self) -> &TrajectoryBuffer<E::State> {
        &self.buffer
    }

    /// Training steps taken so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn client(&self) -> &CompletionClient<S> {
        &self.client
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    /// Sum of the `n` highest undiscounted trajectory values in the buffer.
    pub fn confidence(&self) -> f64 {
        let mut values: Vec<f64> = self
            .buffer
            .iter()
            .map(|t| trajectory_value(&self.env, t, 1.0))
            .collect();
        values.sort_by_key(|v| Reverse(OrderedFloat(*v)));
        values.iter().take(self.n).sum()
    }

    /// Probability that a training step asks the value agent.
    pub fn use_model_probability(&self) -> f64 {
        confidence_probability(self.min_successes, self.confidence())
    }

    /// Run until `total_steps` training steps have been taken.
    pub async fn run(&mut self) -> Result<TrainingSummary> {
        info!(
            total_steps = self.total_steps,
            eval_frequency = self.eval_frequency,
            gamma = self.gamma,
            "starting training"
        );

        let mut evaluations = Vec::new();
        while self.steps < self.total_steps {
            let evaluate = self.eval_frequency > 0 && self.episodes % self.eval_frequency == 0;
            let start = self.env.reset();
            let outcome = self
                .run_episode(start.clone(), evaluate)
                .await
                .with_context(|| format!("episode {} failed", self.episodes))?;
            self.episodes += 1;

            if evaluate {
                let record = self.evaluation_record(&start, &outcome);
                self.log_evaluation(&record)?;
                evaluations.push(record);
            } else {
                self.training_episodes += 1;
                self.store(outcome);
            }
        }

        let summary = TrainingSummary {
            steps: self.steps,
            episodes: self.episodes,
            training_episodes: self.training_episodes,
            evaluations,
            buffer_len: self.buffer.len(),
        };
        info!(
            steps = summary.steps,
            episodes = summary.episodes,
            buffer = summary.buffer_len,
            live_calls = self.client.live_calls(),
            cache_hits = self.client.cache_hits(),
            "training finished"
        );
        Ok(summary)
    }

    async fn run_episode(
        &mut self,
        start: E::State,
        evaluate: bool,
    ) -> Result<EpisodeOutcome<E::State>> {
        let mut state = start;
        let mut trajectory = Vec::new();
        let mut total_reward = 0.0;

        loop {
            let action = self.choose_action(&state, evaluate).await?;
            let step = self.env.step(action)?;
            total_reward += step.reward;
            if !evaluate {
                self.steps += 1;
            }

            if step.done {
                trajectory.push(TimeStep::terminal(state, action, step.reward));
                return Ok(EpisodeOutcome {
                    trajectory,
                    total_reward,
                    timed_out: false,
                });
            }

            trajectory.push(TimeStep::new(state, action, step.reward, step.state.clone()));
            let out_of_steps = !evaluate && self.steps >= self.total_steps;
            if trajectory.len() >= self.max_steps || out_of_steps {
                debug!(len = trajectory.len(), "episode timed out");
                return Ok(EpisodeOutcome {
                    trajectory,
                    total_reward,
                    timed_out: true,
                });
            }
            state = step.state;
        }
    }

    async fn choose_action(&mut self, state: &E::State, evaluate: bool) -> Result<usize> {
        let view = self.buffer.view();
        let agent = if evaluate {
            &self.pi
        } else {
            let p = self.use_model_probability();
            if self.rng.gen::<f64>() >= p || !self.q.ready(view) {
                return Ok(self.env.sample_action(&mut self.rng));
            }
            &self.q
        };

        match agent
            .select_action(&self.env, state, view, &mut self.client, &mut self.rng)
            .await
        {
            Ok(action) => {
                debug!(agent = agent.name(), action, "agent acted");
                Ok(action)
            }
            // A rejected request only costs this selection.
            Err(AgentError::Completion(CompletionError::InvalidRequest(message))) => {
                warn!(agent = agent.name(), %message, "completion rejected; acting randomly");
                Ok(self.env.sample_action(&mut self.rng))
            }
            Err(e) => Err(e).with_context(|| format!("{} agent failed", agent.name())),
        }
    }

    fn evaluation_record(
        &self,
        start: &E::State,
        outcome: &EpisodeOutcome<E::State>,
    ) -> EvaluationRecord {
        let t = outcome.trajectory.len() as i32;
        let achieved = outcome.total_reward * self.gamma.powi(t);
        EvaluationRecord {
            episode: self.training_episodes,
            step: self.steps,
            regret: self.env.optimal_return(start) - achieved,
            return_: achieved,
        }
    }

    fn log_evaluation(&self, record: &EvaluationRecord) -> Result<()> {
        info!(
            episode = record.episode,
            step = record.step,
            regret = record.regret,
            achieved = record.return_,
            "evaluation"
        );
        let entry = LogRecord::new()
            .with("episode", record.episode)
            .with("step", record.step)
            .with("regret", record.regret)
            .with("return", record.return_)
            .with("run ID", self.logger.run_id());
        self.logger.log_if_enabled(&entry)
    }

    fn store(&mut self, outcome: EpisodeOutcome<E::State>) {
        if outcome.timed_out {
            return;
        }
        let mut trajectory = Trajectory::new(outcome.trajectory);
        trajectory.truncate_front(self.max_trajectory);
        let added = self.buffer.append_suffixes(&trajectory);
        debug!(added, buffer = self.buffer.len(), "stored trajectory suffixes");
    }
}
