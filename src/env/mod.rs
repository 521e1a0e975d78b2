//! Environment abstractions and a concrete chain environment.
//!
//! Every environment implements the [`Environment`] trait so that the agents
//! can render transitions as text and the training loop can drive episodes
//! uniformly.
//!
//! Included environments:
//! - **Chain** ([`chain`]) -- a line of positions with one goal, small enough
//!   that every transition and reward renders as a single sentence.

pub mod chain;
pub mod traits;

// Re-export the core trait and step type at the module level.
pub use chain::ChainEnv;
pub use traits::{EnvStep, Environment, SENTENCE_END};
