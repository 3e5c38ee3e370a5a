//! Core components and types for the intent normalizer.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - Fixed reply texts that must never be customized.
//! - The data model and common result handling.

pub mod config;
pub mod messages;
pub mod types;
