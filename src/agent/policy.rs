//! Direct policy agent.
//!
//! Shows the model successful trajectories followed by the current state and
//! reads the next sentence as the action. Completions that are not one of
//! the environment's canonical actions are discarded and the agent asks again
//! with a freshly sampled prompt.

use std::collections::HashSet;

use rand::Rng;
use tracing::debug;

use crate::env::{Environment, SENTENCE_END};
use crate::model::{CompletionClient, CompletionService};
use crate::trajectory::BufferView;

use super::agent::{join_prompt, reformat, AgentError, PromptSampler};

#[derive(Debug, Clone)]
pub struct PolicyAgent {
    sampler: PromptSampler,
    temperature: f64,
    max_attempts: Option<usize>,
}

impl PolicyAgent {
    pub fn new(sampler: PromptSampler, temperature: f64) -> Self {
        Self {
            sampler,
            temperature,
            max_attempts: None,
        }
    }

    /// Give up with [`AgentError::NoValidAction`] after `attempts` prompts.
    /// Without a bound the agent keeps asking until it gets a valid action.
    pub fn with_max_attempts(mut self, attempts: Option<usize>) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn sampler(&self) -> &PromptSampler {
        &self.sampler
    }

    /// Ask the model for an action until it names a valid one.
    ///
    /// A prompt already tried during this call is sent past the cache, since
    /// its cached completion is known to be invalid. With a required cache
    /// that request fails with a cache miss instead of reaching the service.
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
        let stop = vec![env.stop_token().to_string()];
        let state_str = env.state_str(state);
        let mut tried: HashSet<String> = HashSet::new();
        let mut attempts = 0;

        loop {
            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(AgentError::NoValidAction { attempts });
            }
            attempts += 1;

            let mut lines = self.sampler.sample_best(env, buffer, rng);
            lines.push(state_str.clone());
            let prompt = join_prompt(env, &lines);
            let use_cache = tried.insert(prompt.clone());

            let completion = client
                .complete(&prompt, &stop, self.temperature, use_cache)
                .await?;
            let candidate = first_sentence(&completion.completion);

            if let Some(action) = env.action(&candidate) {
                debug!(action, attempts, "pi chose action");
                return Ok(action);
            }
            debug!(
                %candidate,
                attempts,
                "completion is not an action; resampling prompt"
            );
        }
    }
}

/// The first sentence of a completion, terminator included.
fn first_sentence(completion: &str) -> String {
    let head = completion.trim_start().split(SENTENCE_END).next().unwrap_or_default();
    reformat(head)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::env::chain::{ChainEnv, RIGHT, TRY_GOAL};
    use crate::model::{
        ClientSettings, CompletionCache, CompletionError, CompletionRecord, CompletionRequest,
        CompletionResponse,
    };
    use crate::trajectory::{TimeStep, Trajectory, TrajectoryBuffer};

    /// Replays completions in order, then repeats the last one.
    struct Replay {
        texts: Mutex<VecDeque<&'static str>>,
        last: &'static str,
        calls: AtomicUsize,
    }

    impl Replay {
        fn new(texts: &[&'static str], last: &'static str) -> Self {
            Self {
                texts: Mutex::new(texts.iter().copied().collect()),
                last,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl CompletionService for Replay {
        async fn create(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = self.texts.lock().unwrap().pop_front().unwrap_or(self.last);
            Ok(CompletionResponse::from_text(text))
        }
    }

    fn one_success() -> TrajectoryBuffer<usize> {
        let mut buffer = TrajectoryBuffer::new();
        buffer.append(Trajectory::new(vec![
            TimeStep::new(2, RIGHT, 0.0, 3),
            TimeStep::terminal(3, TRY_GOAL, 1.0),
        ]));
        buffer
    }

    #[test]
    fn test_first_sentence() {
        assert_eq!(first_sentence(" Right. You are at 3."), "Right.");
        assert_eq!(first_sentence("Try goal"), "Try goal.");
        assert_eq!(first_sentence(""), ".");
    }

    #[tokio::test]
    async fn test_retries_until_valid_action() {
        let env = ChainEnv::new(5, 3, 0).unwrap();
        let buffer = one_success();
        let service = Replay::new(&["Jump. Success.", "", "You are at 3."], "Right. You are at 3.");
        let mut client =
            CompletionClient::new(service, CompletionCache::in_memory(), ClientSettings::default());
        let mut rng = StdRng::seed_from_u64(0);
        let pi = PolicyAgent::new(PromptSampler::new(1, 0.0), 0.1);

        let action = pi
            .select_action(&env, &2, buffer.view(), &mut client, &mut rng)
            .await
            .unwrap();
        assert_eq!(action, RIGHT);
        // The single-trajectory buffer always yields the same prompt, so every
        // retry had to go past the cache.
        assert_eq!(client.service().calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_attempt_bound() {
        let env = ChainEnv::new(5, 3, 0).unwrap();
        let buffer = one_success();
        let service = Replay::new(&[], "Fly.");
        let mut client =
            CompletionClient::new(service, CompletionCache::in_memory(), ClientSettings::default());
        let mut rng = StdRng::seed_from_u64(0);
        let pi = PolicyAgent::new(PromptSampler::new(1, 0.0), 0.1).with_max_attempts(Some(3));

        let err = pi
            .select_action(&env, &2, buffer.view(), &mut client, &mut rng)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NoValidAction { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_only_returns_canonical_actions() {
        let env = ChainEnv::new(5, 3, 0).unwrap();
        let buffer = one_success();
        let mut rng = StdRng::seed_from_u64(5);

        for text in ["Left.", "Try goal. Success.", "Right."] {
            let service = Replay::new(&["Up.", "Left right."], text);
            let mut client = CompletionClient::new(
                service,
                CompletionCache::in_memory(),
                ClientSettings::default(),
            );
            let pi = PolicyAgent::new(PromptSampler::new(1, 0.0), 0.1);
            let action = pi
                .select_action(&env, &0, buffer.view(), &mut client, &mut rng)
                .await
                .unwrap();
            assert!(action < env.num_actions());
            assert_eq!(env.action_str(action), first_sentence(text));
        }
    }

    #[tokio::test]
    async fn test_strict_cache_retry_stays_offline() {
        let env = ChainEnv::new(5, 3, 0).unwrap();
        let buffer = one_success();
        let prompt = [
            "You are at 2. Right. You are at 3. Try goal. Success.",
            "You are at 2.",
        ]
        .join("\n");
        let cache = CompletionCache::with_records([CompletionRecord::new(prompt, "Jump.")]);
        let settings = ClientSettings {
            require_cache: true,
            ..ClientSettings::default()
        };
        let mut client = CompletionClient::new(Replay::new(&[], "Right."), cache, settings);
        let mut rng = StdRng::seed_from_u64(0);
        let pi = PolicyAgent::new(PromptSampler::new(1, 0.0), 0.1);

        let err = pi
            .select_action(&env, &2, buffer.view(), &mut client, &mut rng)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Completion(CompletionError::CacheMiss { .. })
        ));
        assert_eq!(client.cache_hits(), 1);
        assert_eq!(client.live_calls(), 0);
        assert_eq!(client.service().calls.load(Ordering::SeqCst), 0);
    }
}
