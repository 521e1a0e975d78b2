//! Language-model access for the agents.
//!
//! This module provides:
//! - [`api`] -- request/response types, the [`CompletionService`] trait, the
//!   completion error taxonomy, and an OpenAI-compatible HTTP service.
//! - [`cache`] -- the persistent prompt -> completion store.
//! - [`client::CompletionClient`] -- cache-first access with prompt clipping,
//!   output budgeting and rate-limit backoff.

pub mod api;
pub mod cache;
pub mod client;

pub use api::{
    CompletionError, CompletionRequest, CompletionResponse, CompletionService,
    OpenAiCompletionService,
};
pub use cache::{CompletionCache, CompletionRecord};
pub use client::{ClientSettings, CompletionClient};
