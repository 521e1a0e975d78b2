//! Core trajectory data types shared by the agents and the training loop.
//!
//! The [`TrajectoryBuffer`] is owned by the training loop. Agents only ever
//! see it through a [`BufferView`], which has no mutating methods.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Single step
// ---------------------------------------------------------------------------

/// A single environment transition.
///
/// `next_state` is `None` exactly when the step ended the episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeStep<S> {
    /// The state the action was taken in.
    pub state: S,
    /// The action index.
    pub action: usize,
    /// The reward for this transition.
    pub reward: f64,
    /// The state reached, or `None` for a terminal step.
    pub next_state: Option<S>,
}

impl<S> TimeStep<S> {
    /// A non-terminal step.
    pub fn new(state: S, action: usize, reward: f64, next_state: S) -> Self {
        Self {
            state,
            action,
            reward,
            next_state: Some(next_state),
        }
    }

    /// A step that ended the episode.
    pub fn terminal(state: S, action: usize, reward: f64) -> Self {
        Self {
            state,
            action,
            reward,
            next_state: None,
        }
    }

    /// Whether this step ended the episode.
    pub fn is_terminal(&self) -> bool {
        self.next_state.is_none()
    }
}

// ---------------------------------------------------------------------------
// Trajectory
// ---------------------------------------------------------------------------

/// An ordered run of steps from one episode (or the tail of one).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory<S> {
    steps: Vec<TimeStep<S>>,
}

impl<S: Clone> Trajectory<S> {
    /// Wrap a sequence of steps.
    pub fn new(steps: Vec<TimeStep<S>>) -> Self {
        Self { steps }
    }

    /// The steps in chronological order.
    pub fn steps(&self) -> &[TimeStep<S>] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the trajectory has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether the final step ended the episode.
    pub fn is_terminal(&self) -> bool {
        self.steps.last().is_some_and(TimeStep::is_terminal)
    }

    /// Keep only the `max_len` most recent steps.
    pub fn truncate_front(&mut self, max_len: usize) {
        if self.steps.len() > max_len {
            self.steps.drain(..self.steps.len() - max_len);
        }
    }

    /// Every suffix of the trajectory, shortest first.
    ///
    /// A trajectory of `n` steps yields `n` suffixes, the last of which is
    /// the full trajectory.
    pub fn suffixes(&self) -> impl Iterator<Item = Trajectory<S>> + '_ {
        (0..self.steps.len())
            .rev()
            .map(move |start| Trajectory::new(self.steps[start..].to_vec()))
    }
}

impl<S> From<Vec<TimeStep<S>>> for Trajectory<S> {
    fn from(steps: Vec<TimeStep<S>>) -> Self {
        Self { steps }
    }
}

// ---------------------------------------------------------------------------
// Trajectory buffer
// ---------------------------------------------------------------------------

/// FIFO store of past trajectories.
///
/// Grows without bound unless a capacity is set, in which case the oldest
/// entries are evicted first.
#[derive(Debug, Clone)]
pub struct TrajectoryBuffer<S> {
    entries: VecDeque<Trajectory<S>>,
    capacity: Option<usize>,
}

impl<S> Default for TrajectoryBuffer<S> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: None,
        }
    }
}

impl<S: Clone> TrajectoryBuffer<S> {
    /// Create an unbounded buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer that holds at most `capacity` trajectories.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }

    /// Number of trajectories currently buffered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a trajectory at the back, evicting from the front when over
    /// capacity.
    pub fn append(&mut self, trajectory: Trajectory<S>) {
        self.entries.push_back(trajectory);
        if let Some(capacity) = self.capacity {
            while self.entries.len() > capacity {
                self.entries.pop_front();
            }
        }
    }

    /// Append every suffix of `trajectory`, shortest first. Returns how many
    /// entries were added.
    pub fn append_suffixes(&mut self, trajectory: &Trajectory<S>) -> usize {
        let mut added = 0;
        for suffix in trajectory.suffixes() {
            self.append(suffix);
            added += 1;
        }
        added
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Trajectory<S>> {
        self.entries.iter()
    }

    /// A read-only view for agents.
    pub fn view(&self) -> BufferView<'_, S> {
        BufferView {
            entries: &self.entries,
        }
    }
}

/// Read-only access to a [`TrajectoryBuffer`].
#[derive(Debug)]
pub struct BufferView<'a, S> {
    entries: &'a VecDeque<Trajectory<S>>,
}

impl<S> Clone for BufferView<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for BufferView<'_, S> {}

impl<'a, S> BufferView<'a, S> {
    /// Number of buffered trajectories.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &'a Trajectory<S>> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_steps() -> Trajectory<usize> {
        Trajectory::new(vec![
            TimeStep::new(1, 2, 0.0, 2),
            TimeStep::new(2, 2, 0.0, 3),
            TimeStep::terminal(3, 1, 1.0),
        ])
    }

    #[test]
    fn test_terminal_iff_no_next_state() {
        let step = TimeStep::new(0usize, 0, 0.0, 1);
        assert!(!step.is_terminal());
        let step = TimeStep::terminal(0usize, 1, 1.0);
        assert!(step.is_terminal());
        assert!(three_steps().is_terminal());
    }

    #[test]
    fn test_truncate_front_keeps_recent_steps() {
        let mut t = three_steps();
        t.truncate_front(2);
        assert_eq!(t.len(), 2);
        assert_eq!(t.steps()[0].state, 2);
        assert!(t.is_terminal());

        let mut t = three_steps();
        t.truncate_front(10);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_suffixes_shortest_first() {
        let t = three_steps();
        let lens: Vec<usize> = t.suffixes().map(|s| s.len()).collect();
        assert_eq!(lens, vec![1, 2, 3]);
        let all: Vec<_> = t.suffixes().collect();
        assert_eq!(all[2], t);
        assert!(all.iter().all(Trajectory::is_terminal));
    }

    #[test]
    fn test_append_suffixes_adds_one_entry_per_step() {
        let mut buffer = TrajectoryBuffer::new();
        let added = buffer.append_suffixes(&three_steps());
        assert_eq!(added, 3);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.view().len(), 3);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut buffer = TrajectoryBuffer::with_capacity_limit(2);
        buffer.append_suffixes(&three_steps());
        assert_eq!(buffer.len(), 2);
        let lens: Vec<usize> = buffer.iter().map(Trajectory::len).collect();
        assert_eq!(lens, vec![2, 3]);
    }

    #[test]
    fn test_view_reads_buffer() {
        let mut buffer: TrajectoryBuffer<usize> = TrajectoryBuffer::new();
        assert!(buffer.view().is_empty());
        buffer.append(three_steps());
        let view = buffer.view();
        let copy = view;
        assert_eq!(copy.iter().count(), 1);
        assert_eq!(view.len(), 1);
    }
}
