// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure pipeline types: requests, results, cache records, profiles,
//! patterns, recommendations, export formats and configuration.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Entities, value objects, errors and seam traits

pub mod cache;
pub mod classifier;
pub mod config;
pub mod events;
pub mod execution;
pub mod export;
pub mod optimization;
pub mod profile;
pub mod recommendation;
pub mod result;
pub mod runtime;
