//! Utility functions and helpers for repolens.
//!
//! This module provides cross-cutting concerns like structured logging,
//! token sanitization, and retry logic with backoff.
//!
//! # Submodules
//!
//! - `logging`: Tracing initialization with token redaction.
//! - `retry`: Retry for transient failures that respects `Retry-After`.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod logging;
pub mod retry;
