//! Shared test utilities for maildesk integration tests.
//!
//! This module provides:
//! - `TestHarness` for running messages through the full parse-resolve-persist
//!   path against an isolated database and attachment directory
//! - `EmailBuilder` for composing raw RFC 5322 messages programmatically

pub mod builders;
pub mod harness;

pub use builders::EmailBuilder;
pub use harness::{Ingested, TestHarness};
