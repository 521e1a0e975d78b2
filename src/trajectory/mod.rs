//! Trajectory types, the shared experience buffer, and the text codec.
//!
//! This module provides:
//! - [`types::TimeStep`], [`types::Trajectory`] -- what happened in an episode.
//! - [`types::TrajectoryBuffer`] -- the FIFO experience store owned by the
//!   training loop, and [`types::BufferView`], the read-only handle agents get.
//! - [`codec`] -- rendering trajectories into prompt text and quantifying
//!   rendered text back into discounted returns.

pub mod codec;
pub mod types;

// Re-export the most commonly used items at the module level.
pub use codec::{quantify, render, render_query, render_trajectory, trajectory_value};
pub use types::{BufferView, TimeStep, Trajectory, TrajectoryBuffer};
