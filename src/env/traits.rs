//! Core environment trait and shared types.
//!
//! Every discrete environment implements the [`Environment`] trait so that the
//! agents and the training loop can render its transitions as text and read
//! returns back out of model completions.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// The character that terminates every rendered state, action and reward.
pub const SENTENCE_END: char = '.';

/// The outcome of a single environment transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvStep<S> {
    /// The state reached after the action.
    pub state: S,
    /// The scalar reward for the transition.
    pub reward: f64,
    /// Whether the episode has terminated.
    pub done: bool,
    /// Arbitrary extra information from the environment.
    pub info: serde_json::Value,
}

/// A discrete environment whose states, actions and rewards render losslessly
/// to text.
///
/// All string renderers are deterministic: the same state always renders to
/// the same text, which keeps prompts (and therefore cached completions)
/// reproducible.
pub trait Environment {
    /// The environment state.
    type State: Clone + std::fmt::Debug + Send + Sync;

    /// Start a new episode and return the initial state.
    fn reset(&mut self) -> Self::State;

    /// Apply `action` (an index in `0..num_actions()`) to the current state.
    fn step(&mut self, action: usize) -> anyhow::Result<EnvStep<Self::State>>;

    /// Canonical action strings, indexed by action. Each ends with
    /// [`SENTENCE_END`].
    fn actions(&self) -> &[String];

    /// Render a state. The result ends with [`SENTENCE_END`].
    fn state_str(&self, state: &Self::State) -> String;

    /// Render the reward of a transition.
    ///
    /// Only terminal transitions (`next_state == None`) render a reward;
    /// non-terminal transitions render the empty string.
    fn reward_str(&self, reward: f64, next_state: Option<&Self::State>) -> String;

    /// The reward string forced onto a rollout that never terminated.
    fn no_reward_str(&self) -> String;

    /// Whether `text` is one of the terminal reward strings.
    fn is_reward_str(&self, text: &str) -> bool;

    /// Extract the rewards mentioned in `text` and combine them into a return
    /// discounted by `gamma`.
    fn quantify(&self, text: &str, gamma: f64) -> f64;

    /// Returns at or below this value count as failures.
    fn failure_threshold(&self) -> f64;

    /// The environment's natural discount factor.
    fn gamma(&self) -> f64;

    /// The best discounted return achievable from `start`.
    fn optimal_return(&self, start: &Self::State) -> f64;

    /// Separator placed between rendered trajectories in a prompt.
    fn stop_token(&self) -> &str {
        "\n"
    }

    /// Number of discrete actions.
    fn num_actions(&self) -> usize {
        self.actions().len()
    }

    /// Render an action, or the empty string for an out-of-range index.
    fn action_str(&self, action: usize) -> String {
        self.actions().get(action).cloned().unwrap_or_default()
    }

    /// Map a rendered action back to its index.
    ///
    /// Returns `None` unless exactly one canonical action matches.
    fn action(&self, action_str: &str) -> Option<usize> {
        let mut matches = self
            .actions()
            .iter()
            .enumerate()
            .filter(|(_, a)| a.as_str() == action_str)
            .map(|(i, _)| i);
        match (matches.next(), matches.next()) {
            (Some(index), None) => Some(index),
            _ => None,
        }
    }

    /// Sample an action uniformly at random.
    fn sample_action<R: Rng>(&self, rng: &mut R) -> usize {
        rng.gen_range(0..self.num_actions().max(1))
    }
}
