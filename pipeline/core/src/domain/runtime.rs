// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::execution::{ExecutionRequest, ExecutionResult};

/// Infrastructure failures. Failures of the executed code are never reported
/// here; they come back as an [`ExecutionResult`].
///
/// `Clone` so that one failed shared execution can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InfraError {
    #[error("failed to spawn '{program}': {reason}")]
    ProcessSpawnFailed { program: String, reason: String },

    #[error("executor queue is full ({capacity} requests admitted)")]
    QueueFull { capacity: usize },

    #[error("failed to prepare scratch directory: {0}")]
    ScratchSpace(String),

    #[error("execution task aborted: {0}")]
    TaskAborted(String),
}

/// Runs one snippet to completion, timeout or cancellation.
#[async_trait]
pub trait CodeRuntime: Send + Sync {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, InfraError>;
}
