//! Service integrations for external collaborators.
//!
//! This module contains implementations for the services used by the normalizer:
//! - Audit sinks (e.g., SurrealDB)
//! - Hosted analytics agents (e.g., over HTTP with server-sent events)
//!
//! Each service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod agent;
pub mod audit;
