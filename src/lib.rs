//! Library root for `intent-normalizer`.
//!
//! The intent normalizer sits between a chat integration and a hosted
//! analytics agent, and turns each incoming question into a deterministic
//! directive:
//! - Classify the question into exactly one topic (first matching rule wins)
//! - Resolve the counting key, required join, and disclosure restriction
//! - Refuse personal-data requests and ask for clarification when needed
//! - Record every decision in an append-only audit log
//!
//! The rule table is loaded once at startup and never changes afterwards,
//! so classification is a pure function that any number of callers can share.

pub mod base;
pub mod dedup;
pub mod normalizer;
pub mod prelude;
pub mod rules;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Void};
use tracing::info;

/// Public async entry for the binary crate.
///
/// Sets up the runtime and then either answers a single question or
/// reads questions from stdin until EOF.
pub async fn start(config: Config, question: Option<String>) -> Void {
    info!("Starting intent-normalizer ...");

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    match question {
        Some(text) => runtime.run_once(&text).await?,
        None => runtime.start().await?,
    }

    Ok(())
}
