// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod cache;
pub mod event_bus;
pub mod executor;
pub mod persistence;

pub use cache::{FlightHandle, Resolution, ResultCache};
pub use event_bus::EventBus;
pub use executor::ProcessExecutor;
