// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Crucible Core
//!
//! Runs untrusted code snippets under a hard timeout, memoizes the outcome
//! by content fingerprint, profiles execution times and derives optimization
//! and code recommendations from recurring patterns.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Execution, caching and recommendation pipeline
//!
//! The [`application::ExecutionPipeline`] is the entry point; it owns the
//! [`infrastructure::ResultCache`] and drives a [`domain::runtime::CodeRuntime`]
//! (by default the process-backed [`infrastructure::ProcessExecutor`]).

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
