//! The prompting agents and the machinery they share.
//!
//! Both agents build prompts out of rendered buffer trajectories:
//!
//! - [`PromptSampler::sample`] -- `prompt_size` trajectories in random order.
//! - [`PromptSampler::sample_best`] -- only trajectories whose undiscounted
//!   value beats the failure threshold, in random order.
//!
//! [`Agent`] is the closed set of action sources the training loop can pick.
//! An agent that is not [`ready`](Agent::ready) falls back to uniform random
//! actions.

use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

use crate::env::{Environment, SENTENCE_END};
use crate::model::{CompletionClient, CompletionError, CompletionService};
use crate::trajectory::{render_trajectory, BufferView};

use super::policy::PolicyAgent;
use super::value::ValueAgent;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Completion(#[from] CompletionError),
    /// The policy attempt bound was reached without a recognised action.
    #[error("no valid action after {attempts} policy completions")]
    NoValidAction { attempts: usize },
}

// ---------------------------------------------------------------------------
// Shared prompt sampling
// ---------------------------------------------------------------------------

/// Chooses which buffered trajectories go into a prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSampler {
    prompt_size: usize,
    failure_threshold: f64,
}

impl PromptSampler {
    pub fn new(prompt_size: usize, failure_threshold: f64) -> Self {
        Self {
            prompt_size,
            failure_threshold,
        }
    }

    pub fn prompt_size(&self) -> usize {
        self.prompt_size
    }

    /// Enough experience to fill a prompt.
    pub fn ready<S>(&self, buffer: BufferView<'_, S>) -> bool {
        buffer.len() >= self.prompt_size
    }

    /// Up to `prompt_size` rendered trajectories, in random order.
    pub fn sample<E: Environment, R: Rng>(
        &self,
        env: &E,
        buffer: BufferView<'_, E::State>,
        rng: &mut R,
    ) -> Vec<String> {
        let mut prompts: Vec<String> = buffer
            .iter()
            .map(|t| render_trajectory(env, t))
            .collect();
        prompts.shuffle(rng);
        prompts.truncate(self.prompt_size);
        prompts
    }

    /// Up to `prompt_size` rendered successful trajectories, in random order.
    pub fn sample_best<E: Environment, R: Rng>(
        &self,
        env: &E,
        buffer: BufferView<'_, E::State>,
        rng: &mut R,
    ) -> Vec<String> {
        let mut prompts: Vec<String> = buffer
            .iter()
            .map(|t| render_trajectory(env, t))
            .filter(|text| env.quantify(text, 1.0) > self.failure_threshold)
            .collect();
        prompts.shuffle(rng);
        prompts.truncate(self.prompt_size);
        prompts
    }
}

// ---------------------------------------------------------------------------
// Completion parsing helpers
// ---------------------------------------------------------------------------

/// Restore a sentence split off a completion: trim the front and put the
/// terminator back.
pub(crate) fn reformat(segment: &str) -> String {
    format!("{}{SENTENCE_END}", segment.trim_start())
}

/// The first two sentences of a completion. Missing sentences come back as a
/// bare terminator.
pub(crate) fn split_pair(completion: &str) -> (String, String) {
    let mut segments = completion.trim_start().split(SENTENCE_END);
    let first = reformat(segments.next().unwrap_or_default());
    let second = reformat(segments.next().unwrap_or_default());
    (first, second)
}

/// Join prompt lines with the environment's stop token.
pub(crate) fn join_prompt<E: Environment>(env: &E, lines: &[String]) -> String {
    lines.join(env.stop_token())
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// An action source backed by the language model.
#[derive(Debug, Clone)]
pub enum Agent {
    /// Rolls out each action with the model and picks the best return.
    ValueEstimation(ValueAgent),
    /// Asks the model for an action directly.
    Policy(PolicyAgent),
}

impl Agent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ValueEstimation(_) => "q",
            Self::Policy(_) => "pi",
        }
    }

    fn sampler(&self) -> &PromptSampler {
        match self {
            Self::ValueEstimation(q) => q.sampler(),
            Self::Policy(pi) => pi.sampler(),
        }
    }

    /// Whether the buffer holds enough trajectories to prompt with.
    pub fn ready<S>(&self, buffer: BufferView<'_, S>) -> bool {
        self.sampler().ready(buffer)
    }

    /// Choose an action for `state`, falling back to a uniformly random
    /// action while the agent is not ready.
    pub async fn select_action<E, S, R>(
        &self,
        env: &E,
        state: &E::State,
        buffer: BufferView<'_, E::State>,
        client: &mut CompletionClient<S>,
        rng: &mut R,
    ) -> Result<usize, AgentError>
    where
        E: Environment,
        S: CompletionService,
        R: Rng,
    {
        if !self.ready(buffer) {
            return Ok(env.sample_action(rng));
        }
        match self {
            Self::ValueEstimation(q) => q.select_action(env, state, buffer, client, rng).await,
            Self::Policy(pi) => pi.select_action(env, state, buffer, client, rng).await,
        }
    }
}

impl From<ValueAgent> for Agent {
    fn from(agent: ValueAgent) -> Self {
        Self::ValueEstimation(agent)
    }
}

impl From<PolicyAgent> for Agent {
    fn from(agent: PolicyAgent) -> Self {
        Self::Policy(agent)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::env::chain::{ChainEnv, LEFT, RIGHT, TRY_GOAL};
    use crate::model::{ClientSettings, CompletionCache, CompletionRequest, CompletionResponse};
    use crate::trajectory::{TimeStep, Trajectory, TrajectoryBuffer};

    struct NeverCalled;

    impl CompletionService for NeverCalled {
        async fn create(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            panic!("an agent that is not ready must not query the model");
        }
    }

    fn mixed_buffer() -> TrajectoryBuffer<usize> {
        let mut buffer = TrajectoryBuffer::new();
        buffer.append(Trajectory::new(vec![TimeStep::terminal(3, TRY_GOAL, 1.0)]));
        buffer.append(Trajectory::new(vec![TimeStep::terminal(1, TRY_GOAL, 0.0)]));
        buffer.append(Trajectory::new(vec![
            TimeStep::new(2, RIGHT, 0.0, 3),
            TimeStep::terminal(3, TRY_GOAL, 1.0),
        ]));
        buffer.append(Trajectory::new(vec![
            TimeStep::new(0, LEFT, 0.0, 0),
            TimeStep::terminal(0, TRY_GOAL, 0.0),
        ]));
        buffer
    }

    #[test]
    fn test_split_pair() {
        assert_eq!(
            split_pair(" You are at 3. Try goal. Success."),
            ("You are at 3.".to_string(), "Try goal.".to_string())
        );
        assert_eq!(split_pair("Success."), ("Success.".to_string(), ".".to_string()));
        assert_eq!(split_pair(""), (".".to_string(), ".".to_string()));
    }

    #[test]
    fn test_ready_needs_prompt_size_trajectories() {
        let buffer = mixed_buffer();
        assert!(PromptSampler::new(4, 0.0).ready(buffer.view()));
        assert!(!PromptSampler::new(5, 0.0).ready(buffer.view()));
    }

    #[test]
    fn test_sample_respects_prompt_size() {
        let env = ChainEnv::new(5, 3, 0).unwrap();
        let buffer = mixed_buffer();
        let mut rng = StdRng::seed_from_u64(1);

        let sampled = PromptSampler::new(3, 0.0).sample(&env, buffer.view(), &mut rng);
        assert_eq!(sampled.len(), 3);

        let sampled = PromptSampler::new(10, 0.0).sample(&env, buffer.view(), &mut rng);
        assert_eq!(sampled.len(), 4);
    }

    #[test]
    fn test_sample_best_keeps_only_successes() {
        let env = ChainEnv::new(5, 3, 0).unwrap();
        let buffer = mixed_buffer();
        let mut rng = StdRng::seed_from_u64(1);

        let best = PromptSampler::new(10, 0.0).sample_best(&env, buffer.view(), &mut rng);
        assert_eq!(best.len(), 2);
        assert!(best.iter().all(|text| text.ends_with("Success.")));

        let none = PromptSampler::new(10, 1.0).sample_best(&env, buffer.view(), &mut rng);
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_unready_agent_acts_randomly_without_model() {
        let env = ChainEnv::new(5, 3, 0).unwrap();
        let buffer: TrajectoryBuffer<usize> = TrajectoryBuffer::new();
        let mut client = CompletionClient::new(
            NeverCalled,
            CompletionCache::in_memory(),
            ClientSettings::default(),
        );
        let mut rng = StdRng::seed_from_u64(3);

        let agents: Vec<Agent> = vec![
            ValueAgent::new(PromptSampler::new(1, 0.0), 0.9, 4, 0.1).into(),
            PolicyAgent::new(PromptSampler::new(1, 0.0), 0.1).into(),
        ];
        for agent in &agents {
            assert!(!agent.ready(buffer.view()));
            for _ in 0..20 {
                let action = agent
                    .select_action(&env, &2, buffer.view(), &mut client, &mut rng)
                    .await
                    .unwrap();
                assert!(action < env.num_actions());
            }
        }
        assert_eq!(agents[0].name(), "q");
        assert_eq!(agents[1].name(), "pi");
    }
}
