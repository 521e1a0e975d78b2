//! textrl: reinforcement learning with a language model as both world model
//! and policy.
//!
//! Trajectories are rendered as plain sentences and used as few-shot prompts.
//! A value-estimation agent imagines rollouts for each action and scores them;
//! a policy agent asks for the next action directly. The training loop blends
//! both with random exploration and measures regret on evaluation episodes.

pub mod agent;
pub mod config;
pub mod env;
pub mod logging;
pub mod model;
pub mod trajectory;
pub mod training;
