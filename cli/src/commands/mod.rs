// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the crucible CLI

pub mod batch;
pub mod config;
pub mod run;

pub use self::batch::BatchArgs;
pub use self::config::ConfigCommand;
pub use self::run::RunArgs;
