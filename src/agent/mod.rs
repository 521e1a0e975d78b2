//! Agent module: language-model action sources.
//!
//! - [`value::ValueAgent`] ("Q") imagines a rollout for every action and picks
//!   the one with the best quantified return.
//! - [`policy::PolicyAgent`] ("Pi") asks the model for the action directly.
//! - [`agent::Agent`] is the closed set of both, with the shared readiness
//!   check and random fallback.

pub mod agent;
pub mod policy;
pub mod value;

// Re-export the primary types for convenient access.
pub use agent::{Agent, AgentError, PromptSampler};
pub use policy::PolicyAgent;
pub use value::ValueAgent;
