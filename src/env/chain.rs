//! A finite chain of positions with a single goal.
//!
//! The agent starts at a random position and moves left or right; declaring
//! "Try goal." ends the episode with reward 1 at the goal and 0 anywhere else.
//! Every state, action and reward renders as a single sentence, so whole
//! trajectories read as short paragraphs:
//!
//! ```text
//! You are at 1. Right. You are at 2. Right. You are at 3. Try goal. Success.
//! ```

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::traits::{EnvStep, Environment, SENTENCE_END};

/// Action index: move one position towards 0.
pub const LEFT: usize = 0;
/// Action index: end the episode, succeeding only at the goal.
pub const TRY_GOAL: usize = 1;
/// Action index: move one position away from 0.
pub const RIGHT: usize = 2;

const SUCCESS: &str = "Success.";
const FAILURE: &str = "Failure.";

/// Chain environment with `states` positions and a goal position.
#[derive(Debug, Clone)]
pub struct ChainEnv {
    states: usize,
    goal: usize,
    gamma: f64,
    state: usize,
    actions: Vec<String>,
    rng: StdRng,
}

impl ChainEnv {
    /// Create a chain of `states` positions with its goal at `goal`.
    ///
    /// Start states are drawn from a generator seeded with `seed`.
    pub fn new(states: usize, goal: usize, seed: u64) -> Result<Self> {
        if states == 0 {
            bail!("chain environment needs at least one state");
        }
        if goal >= states {
            bail!("goal {goal} is outside a chain of {states} states");
        }
        Ok(Self {
            states,
            goal,
            gamma: 0.9,
            state: 0,
            actions: vec!["Left.".into(), "Try goal.".into(), "Right.".into()],
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Override the discount factor (default 0.9).
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    /// The goal position.
    pub fn goal(&self) -> usize {
        self.goal
    }

    /// The current position.
    pub fn position(&self) -> usize {
        self.state
    }

    /// Reward carried by a reward sentence, if `sentence` is one.
    fn reward_of(sentence: &str) -> Option<f64> {
        match sentence {
            SUCCESS => Some(1.0),
            FAILURE => Some(0.0),
            _ => None,
        }
    }
}

impl Environment for ChainEnv {
    type State = usize;

    fn reset(&mut self) -> usize {
        self.state = self.rng.gen_range(0..self.states);
        self.state
    }

    fn step(&mut self, action: usize) -> Result<EnvStep<usize>> {
        let (reward, done) = match action {
            LEFT => {
                self.state = self.state.saturating_sub(1);
                (0.0, false)
            }
            RIGHT => {
                self.state = (self.state + 1).min(self.states - 1);
                (0.0, false)
            }
            TRY_GOAL => (if self.state == self.goal { 1.0 } else { 0.0 }, true),
            other => bail!("action {other} is not one of {} chain actions", self.actions.len()),
        };

        Ok(EnvStep {
            state: self.state,
            reward,
            done,
            info: serde_json::Value::Null,
        })
    }

    fn actions(&self) -> &[String] {
        &self.actions
    }

    fn state_str(&self, state: &usize) -> String {
        format!("You are at {state}{SENTENCE_END}")
    }

    fn reward_str(&self, reward: f64, next_state: Option<&usize>) -> String {
        match next_state {
            Some(_) => String::new(),
            None if reward > 0.0 => SUCCESS.to_string(),
            None => FAILURE.to_string(),
        }
    }

    fn no_reward_str(&self) -> String {
        FAILURE.to_string()
    }

    fn is_reward_str(&self, text: &str) -> bool {
        Self::reward_of(text.trim()).is_some()
    }

    /// Sum of `reward * gamma^t` over every reward sentence in `text`, where
    /// `t` counts the actions that precede the reward.
    fn quantify(&self, text: &str, gamma: f64) -> f64 {
        let mut actions_taken = 0i32;
        let mut total = 0.0;
        for sentence in text.split_inclusive(SENTENCE_END) {
            let sentence = sentence.trim();
            if self.actions.iter().any(|a| a == sentence) {
                actions_taken += 1;
            } else if let Some(reward) = Self::reward_of(sentence) {
                total += reward * gamma.powi(actions_taken);
            }
        }
        total
    }

    fn failure_threshold(&self) -> f64 {
        0.0
    }

    fn gamma(&self) -> f64 {
        self.gamma
    }

    fn optimal_return(&self, start: &usize) -> f64 {
        let distance = start.abs_diff(self.goal) as i32;
        self.gamma.powi(distance + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_goal_outside_chain() {
        assert!(ChainEnv::new(5, 5, 0).is_err());
        assert!(ChainEnv::new(0, 0, 0).is_err());
        assert!(ChainEnv::new(5, 4, 0).is_ok());
    }

    #[test]
    fn test_moves_are_clamped() {
        let mut env = ChainEnv::new(3, 1, 7).unwrap();
        env.state = 0;
        let step = env.step(LEFT).unwrap();
        assert_eq!(step.state, 0);
        assert!(!step.done);

        env.state = 2;
        let step = env.step(RIGHT).unwrap();
        assert_eq!(step.state, 2);
    }

    #[test]
    fn test_try_goal_terminates() {
        let mut env = ChainEnv::new(5, 3, 0).unwrap();
        env.state = 3;
        let step = env.step(TRY_GOAL).unwrap();
        assert!(step.done);
        assert!((step.reward - 1.0).abs() < 1e-12);

        env.state = 1;
        let step = env.step(TRY_GOAL).unwrap();
        assert!(step.done);
        assert_eq!(step.reward, 0.0);
    }

    #[test]
    fn test_invalid_action_is_an_error() {
        let mut env = ChainEnv::new(5, 3, 0).unwrap();
        env.reset();
        assert!(env.step(3).is_err());
    }

    #[test]
    fn test_action_lookup() {
        let env = ChainEnv::new(5, 3, 0).unwrap();
        assert_eq!(env.action("Left."), Some(LEFT));
        assert_eq!(env.action("Try goal."), Some(TRY_GOAL));
        assert_eq!(env.action("Right."), Some(RIGHT));
        assert_eq!(env.action("Right"), None);
        assert_eq!(env.action("Jump."), None);
    }

    #[test]
    fn test_reward_only_rendered_for_terminal_steps() {
        let env = ChainEnv::new(5, 3, 0).unwrap();
        assert_eq!(env.reward_str(1.0, Some(&2)), "");
        assert_eq!(env.reward_str(1.0, None), "Success.");
        assert_eq!(env.reward_str(0.0, None), "Failure.");
        assert!(env.is_reward_str("Success."));
        assert!(env.is_reward_str(" Failure. "));
        assert!(!env.is_reward_str("You are at 3."));
    }

    #[test]
    fn test_quantify_discounts_by_actions_taken() {
        let env = ChainEnv::new(5, 3, 0).unwrap();
        let text = "You are at 2. Right. You are at 3. Try goal. Success.";
        assert!((env.quantify(text, 1.0) - 1.0).abs() < 1e-12);
        assert!((env.quantify(text, 0.9) - 0.81).abs() < 1e-12);
        assert_eq!(env.quantify("You are at 1. Try goal. Failure.", 0.9), 0.0);
        assert_eq!(env.quantify("", 0.9), 0.0);
    }

    #[test]
    fn test_optimal_return() {
        let env = ChainEnv::new(5, 3, 0).unwrap();
        assert!((env.optimal_return(&3) - 0.9).abs() < 1e-12);
        assert!((env.optimal_return(&0) - 0.9f64.powi(4)).abs() < 1e-12);
    }

    #[test]
    fn test_reset_is_seeded() {
        let mut a = ChainEnv::new(10, 3, 42).unwrap();
        let mut b = ChainEnv::new(10, 3, 42).unwrap();
        let starts_a: Vec<usize> = (0..8).map(|_| a.reset()).collect();
        let starts_b: Vec<usize> = (0..8).map(|_| b.reset()).collect();
        assert_eq!(starts_a, starts_b);
        assert!(starts_a.iter().all(|&s| s < 10));
    }
}
