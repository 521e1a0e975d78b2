//! Greedy value-estimation agent.
//!
//! For every candidate action the agent asks the model to continue the
//! trajectory `"{state} {action}"` until it names a reward, then scores the
//! imagined rollout with the environment's `quantify`. The action with the
//! best score wins; ties are broken uniformly at random.

use ordered_float::OrderedFloat;
use rand::Rng;
use tracing::debug;

use crate::env::Environment;
use crate::model::{CompletionClient, CompletionService};
use crate::trajectory::{render_query, BufferView};

use super::agent::{join_prompt, split_pair, AgentError, PromptSampler};

#[derive(Debug, Clone)]
pub struct ValueAgent {
    sampler: PromptSampler,
    gamma: f64,
    max_depth: usize,
    temperature: f64,
}

impl ValueAgent {
    /// `max_depth` bounds the continuation completions of each rollout; it is
    /// raised to at least 1.
    pub fn new(sampler: PromptSampler, gamma: f64, max_depth: usize, temperature: f64) -> Self {
        Self {
            sampler,
            gamma,
            max_depth: max_depth.max(1),
            temperature,
        }
    }

    pub fn sampler(&self) -> &PromptSampler {
        &self.sampler
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Pick the action whose imagined rollout has the highest return.
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
        let mut best: Option<(OrderedFloat<f64>, OrderedFloat<f64>, usize)> = None;
        for action in 0..env.num_actions() {
            let rollout = self.rollout(env, state, action, buffer, client, rng).await?;
            let value = env.quantify(&rollout, self.gamma);
            debug!(action, value, %rollout, "estimated action value");

            let key = (OrderedFloat(value), OrderedFloat(rng.gen::<f64>()), action);
            if best.map_or(true, |current| key > current) {
                best = Some(key);
            }
        }

        let (value, _, action) = best.unwrap_or((OrderedFloat(0.0), OrderedFloat(0.0), 0));
        debug!(action, value = value.0, "q chose action");
        Ok(action)
    }

    /// Imagine the rest of the episode after taking `action` in `state`.
    ///
    /// The result reads like a rendered trajectory,
    /// `"{state} {action} {next state} {action} ... {reward}"`, and always
    /// ends in a reward: if the model has not produced one after `max_depth`
    /// continuation completions, the environment's no-reward string is
    /// forced.
    pub async fn rollout<E, S, R>(
        &self,
        env: &E,
        state: &E::State,
        action: usize,
        buffer: BufferView<'_, E::State>,
        client: &mut CompletionClient<S>,
        rng: &mut R,
    ) -> Result<String, AgentError>
    where
        E: Environment,
        S: CompletionService,
        R: Rng,
    {
        let stop = vec![env.stop_token().to_string()];
        let query = render_query(env, state, action, "");

        let mut lines = self.sampler.sample(env, buffer, rng);
        lines.push(query);
        let completion = client
            .complete(&join_prompt(env, &lines), &stop, self.temperature, true)
            .await?;

        let (mut state_or_reward, _) = split_pair(&completion.completion);
        let mut chain = vec![state_or_reward.clone()];
        let mut depth = 1;

        while !env.is_reward_str(&state_or_reward) {
            let mut lines = self.sampler.sample_best(env, buffer, rng);
            lines.push(state_or_reward.clone());
            let completion = client
                .complete(&join_prompt(env, &lines), &stop, self.temperature, true)
                .await?;

            let (next_action, next) = split_pair(&completion.completion);
            state_or_reward = if depth >= self.max_depth {
                env.no_reward_str()
            } else {
                next
            };
            depth += 1;
            chain.push(next_action);
            chain.push(state_or_reward.clone());
        }

        Ok(render_query(env, state, action, &chain.join(" ")))
    }
}
