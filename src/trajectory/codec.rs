//! Rendering trajectories to prompt text and reading returns back out.
//!
//! A rendered trajectory alternates states and actions and ends with the
//! reward of its terminal step:
//!
//! ```text
//! You are at 2. Right. You are at 3. Try goal. Success.
//! ```
//!
//! Intermediate states are not repeated: the state after a non-terminal step
//! is the state of the step that follows it.

use crate::env::Environment;

use super::types::{TimeStep, Trajectory};

/// Render a `"{state} {action}"` query line, or `"{state} {action} {value}"`
/// when a continuation is present.
pub fn render_query<E: Environment>(
    env: &E,
    state: &E::State,
    action: usize,
    value: &str,
) -> String {
    let head = format!("{} {}", env.state_str(state), env.action_str(action));
    let value = value.trim_start();
    if value.is_empty() {
        head
    } else {
        format!("{head} {value}")
    }
}

/// Render a sequence of steps as a single line of text.
///
/// Each step contributes its state and action; a terminal step also
/// contributes its reward. Pieces are separated by single spaces.
pub fn render<E: Environment>(env: &E, steps: &[TimeStep<E::State>]) -> String {
    let mut pieces: Vec<String> = Vec::with_capacity(steps.len() * 3);
    for step in steps {
        pieces.push(env.state_str(&step.state));
        pieces.push(env.action_str(step.action));
        if step.is_terminal() {
            pieces.push(env.reward_str(step.reward, None));
        }
    }
    pieces.retain(|piece| !piece.is_empty());
    pieces.join(" ")
}

/// Render a whole trajectory.
pub fn render_trajectory<E: Environment>(env: &E, trajectory: &Trajectory<E::State>) -> String {
    render(env, trajectory.steps())
}

/// Discounted return of rendered text, as judged by the environment.
pub fn quantify<E: Environment>(env: &E, rendered: &str, gamma: f64) -> f64 {
    env.quantify(rendered, gamma)
}

/// Discounted return of a trajectory: `quantify(render(trajectory), gamma)`.
pub fn trajectory_value<E: Environment>(
    env: &E,
    trajectory: &Trajectory<E::State>,
    gamma: f64,
) -> f64 {
    quantify(env, &render_trajectory(env, trajectory), gamma)
}
