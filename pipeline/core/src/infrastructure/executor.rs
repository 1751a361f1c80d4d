// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Process Executor
//!
//! Runs each snippet in its own interpreter process, as leader of a fresh
//! process group, inside a scratch directory that lives only for the call.
//!
//! # Admission
//!
//! `max_concurrency` processes run at once. Up to `queue_depth` further
//! requests wait for a worker; anything beyond that is rejected with
//! [`InfraError::QueueFull`] instead of piling up unbounded.
//!
//! # Termination
//!
//! The timeout clock starts after a successful spawn. On timeout or
//! cancellation the whole group gets `SIGKILL`, then the leader is reaped.
//! The group is signalled after a normal exit too, so background children
//! the snippet left behind do not outlive the call.

use async_trait::async_trait;
use chrono::Utc;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::classifier::{ErrorClassifier, FailureSignal};
use crate::domain::config::ExecutorConfig;
use crate::domain::execution::{CapturedOutput, ErrorCategory, ExecutionRequest, ExecutionResult};
use crate::domain::runtime::{CodeRuntime, InfraError};

/// How long to wait for the output pipes to drain once the group is dead.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

enum Exit {
    Status(ExitStatus),
    WaitFailed(io::Error),
    TimedOut,
    Cancelled,
}

pub struct ProcessExecutor {
    config: ExecutorConfig,
    classifier: ErrorClassifier,
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    capacity: usize,
    spawn_count: AtomicU64,
}

impl ProcessExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_classifier(config, ErrorClassifier::with_defaults())
    }

    pub fn with_classifier(config: ExecutorConfig, classifier: ErrorClassifier) -> Self {
        let workers = config.max_concurrency.max(1);
        let capacity = workers + config.effective_queue_depth();
        Self {
            config,
            classifier,
            admission: Arc::new(Semaphore::new(capacity)),
            workers: Arc::new(Semaphore::new(workers)),
            capacity,
            spawn_count: AtomicU64::new(0),
        }
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Running plus queued requests accepted before rejection.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Processes successfully spawned since construction.
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count.load(Ordering::SeqCst)
    }

    async fn run(
        &self,
        request: &ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, InfraError> {
        let interpreter = self.config.interpreters.get(&request.language).ok_or_else(|| {
            InfraError::ProcessSpawnFailed {
                program: request.language.to_string(),
                reason: "no interpreter configured for language".to_string(),
            }
        })?;

        let scratch = tempfile::Builder::new()
            .prefix("crucible-")
            .tempdir()
            .map_err(|e| InfraError::ScratchSpace(e.to_string()))?;
        let script = scratch.path().join(format!("snippet.{}", interpreter.extension));
        tokio::fs::write(&script, &request.code)
            .await
            .map_err(|e| InfraError::ScratchSpace(e.to_string()))?;

        let cwd = request
            .working_directory
            .clone()
            .unwrap_or_else(|| scratch.path().to_path_buf());

        let mut cmd = Command::new(&interpreter.program);
        cmd.args(&interpreter.args)
            .arg(&script)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(
                    "Interpreter '{}' could not be executed: {}",
                    interpreter.program, e
                );
                let stderr = e.to_string();
                let category = self.classifier.classify(&FailureSignal {
                    exit_code: None,
                    stderr: &stderr,
                    spawn_denied: true,
                });
                let output = CapturedOutput {
                    stderr,
                    ..CapturedOutput::default()
                };
                return Ok(ExecutionResult::failed(category, None, output, Utc::now(), Duration::ZERO));
            }
            Err(e) => {
                return Err(InfraError::ProcessSpawnFailed {
                    program: interpreter.program.clone(),
                    reason: format!("{} (cwd: {})", e, cwd.display()),
                });
            }
        };

        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        let started_at = Utc::now();
        let clock = Instant::now();
        let pgid = child.id();
        debug!(language = %request.language, pid = ?pgid, "Spawned snippet process");

        let limit = self.config.max_output_bytes;
        let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_capped(s, limit)));
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_capped(s, limit)));

        let exit = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Exit::Status(status),
                Err(e) => Exit::WaitFailed(e),
            },
            _ = tokio::time::sleep(request.timeout) => Exit::TimedOut,
            _ = cancel.cancelled() => Exit::Cancelled,
        };
        let elapsed = clock.elapsed();

        terminate_group(&mut child, pgid);
        if !matches!(exit, Exit::Status(_)) {
            if let Err(e) = child.wait().await {
                warn!("Failed to reap snippet process: {}", e);
            }
        }

        let (stdout, stdout_truncated) = collect(stdout_task).await;
        let (stderr, stderr_truncated) = collect(stderr_task).await;
        let output = CapturedOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            truncated: stdout_truncated || stderr_truncated,
        };
        if output.truncated {
            warn!(limit_bytes = limit, "Snippet output exceeded capture limit and was truncated");
        }

        let elapsed_ms = elapsed.as_millis() as u64;
        let result = match exit {
            Exit::TimedOut => {
                info!(language = %request.language, elapsed_ms, "Snippet timed out; process group killed");
                ExecutionResult::timed_out(output, started_at, elapsed)
            }
            Exit::Cancelled => {
                info!(language = %request.language, elapsed_ms, "Snippet cancelled; process group killed");
                ExecutionResult::cancelled(output, started_at, elapsed)
            }
            Exit::WaitFailed(e) => {
                warn!("Waiting on snippet process failed: {}", e);
                ExecutionResult::failed(ErrorCategory::Runtime, None, output, started_at, elapsed)
            }
            Exit::Status(status) if status.success() => {
                debug!(language = %request.language, elapsed_ms, "Snippet completed");
                ExecutionResult::succeeded(output, started_at, elapsed)
            }
            Exit::Status(status) => {
                let exit_code = status.code();
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    if let Some(signal) = status.signal() {
                        debug!(signal, "Snippet terminated by signal");
                    }
                }
                let category = self.classifier.classify(&FailureSignal {
                    exit_code,
                    stderr: &output.stderr,
                    spawn_denied: false,
                });
                debug!(language = %request.language, ?exit_code, %category, elapsed_ms, "Snippet failed");
                ExecutionResult::failed(category, exit_code, output, started_at, elapsed)
            }
        };

        drop(scratch);
        Ok(result)
    }
}

#[async_trait]
impl CodeRuntime for ProcessExecutor {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, InfraError> {
        let _admitted = self
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|_| InfraError::QueueFull { capacity: self.capacity })?;

        let queued_at = Utc::now();
        let _worker = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Execution cancelled while queued");
                return Ok(ExecutionResult::cancelled(CapturedOutput::default(), queued_at, Duration::ZERO));
            }
            permit = self.workers.clone().acquire_owned() => {
                permit.map_err(|_| InfraError::QueueFull { capacity: self.capacity })?
            }
        };

        self.run(request, cancel).await
    }
}

/// Sends SIGKILL to the whole process group. A group that is already gone
/// is not an error.
fn terminate_group(child: &mut Child, pgid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid.and_then(|id| i32::try_from(id).ok()) {
        let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                warn!("Failed to kill process group {}: {}", pgid, err);
            }
        }
        return;
    }

    let _ = pgid;
    if let Err(e) = child.start_kill() {
        debug!("Leader already gone: {}", e);
    }
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> (Vec<u8>, bool) {
    let mut captured = Vec::new();
    let mut truncated = false;
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(captured.len());
                if n > room {
                    captured.extend_from_slice(&chunk[..room]);
                    truncated = true;
                } else {
                    captured.extend_from_slice(&chunk[..n]);
                }
            }
            Err(e) => {
                debug!("Output pipe read failed: {}", e);
                break;
            }
        }
    }
    (captured, truncated)
}

async fn collect(task: Option<JoinHandle<(Vec<u8>, bool)>>) -> (Vec<u8>, bool) {
    let Some(mut task) = task else {
        return (Vec::new(), false);
    };
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut task).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("Output reader task failed: {}", e);
            (Vec::new(), false)
        }
        Err(_) => {
            warn!("Output pipe still open after the process group was killed; discarding");
            task.abort();
            (Vec::new(), true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::InterpreterConfig;
    use crate::domain::execution::Language;

    fn shell_executor(max_concurrency: usize, queue_depth: usize) -> ProcessExecutor {
        ProcessExecutor::new(ExecutorConfig {
            max_concurrency,
            queue_depth: Some(queue_depth),
            ..ExecutorConfig::default()
        })
    }

    fn shell(code: &str, timeout: Duration) -> ExecutionRequest {
        ExecutionRequest::new(code, timeout).with_language(Language::Shell)
    }

    #[tokio::test]
    async fn test_shell_success_captures_stdout() {
        let executor = shell_executor(1, 1);
        let result = executor
            .execute(&shell("echo hi", Duration::from_secs(5)), CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.error_category, ErrorCategory::None);
        assert_eq!(executor.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_command_is_dependency() {
        let executor = shell_executor(1, 1);
        let result = executor
            .execute(
                &shell("definitely_not_a_command_xyz", Duration::from_secs(5)),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(127));
        assert_eq!(result.error_category, ErrorCategory::Dependency);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_runtime() {
        let executor = shell_executor(1, 1);
        let result = executor
            .execute(&shell("echo boom >&2; exit 3", Duration::from_secs(5)), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stderr, "boom\n");
        assert_eq!(result.error_category, ErrorCategory::Runtime);
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let executor = shell_executor(1, 1);
        let marker = tempfile::tempdir().unwrap();
        let witness = marker.path().join("survived");
        let code = format!("(sleep 2; touch {}) &\nwhile true; do sleep 0.05; done\n", witness.display());

        let result = executor
            .execute(&shell(&code, Duration::from_millis(500)), CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error_category, ErrorCategory::Timeout);
        assert!(result.execution_time >= Duration::from_millis(500));
        assert!(result.execution_time < Duration::from_millis(1500));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!witness.exists(), "background child outlived the timeout");
    }

    #[tokio::test]
    async fn test_cancellation_is_distinct_from_timeout() {
        let executor = shell_executor(1, 1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let result = executor
            .execute(&shell("sleep 10", Duration::from_secs(10)), cancel)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert!(!result.success);
        assert_ne!(result.error_category, ErrorCategory::Timeout);
        assert!(result.execution_time < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_infra_error() {
        let mut config = ExecutorConfig::default();
        config.interpreters.insert(
            Language::Shell,
            InterpreterConfig {
                program: "/nonexistent/interpreter".to_string(),
                args: vec![],
                extension: "sh".to_string(),
            },
        );
        let executor = ProcessExecutor::new(config);

        let err = executor
            .execute(&shell("echo hi", Duration::from_secs(1)), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, InfraError::ProcessSpawnFailed { .. }));
        assert_eq!(executor.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_non_executable_interpreter_is_permission() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("not-executable");
        std::fs::write(&fake, "#!/bin/sh\necho hi\n").unwrap();

        let mut config = ExecutorConfig::default();
        config.interpreters.insert(
            Language::Shell,
            InterpreterConfig {
                program: fake.display().to_string(),
                args: vec![],
                extension: "sh".to_string(),
            },
        );
        let executor = ProcessExecutor::new(config);

        let result = executor
            .execute(&shell("echo hi", Duration::from_secs(1)), CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error_category, ErrorCategory::Permission);
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let executor = ProcessExecutor::new(ExecutorConfig {
            max_output_bytes: 16,
            ..ExecutorConfig::default()
        });
        let request = shell("i=0; while [ $i -lt 100 ]; do echo 0123456789; i=$((i+1)); done", Duration::from_secs(5));
        let result = executor.execute(&request, CancellationToken::new()).await.unwrap();

        assert!(result.success);
        assert!(result.output_truncated);
        assert_eq!(result.stdout.len(), 16);
    }

    #[tokio::test]
    async fn test_working_directory_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "payload").unwrap();
        let executor = shell_executor(1, 1);

        let request = shell("cat data.txt", Duration::from_secs(5)).with_working_directory(dir.path());
        let result = executor.execute(&request, CancellationToken::new()).await.unwrap();
        assert_eq!(result.stdout, "payload");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_saturated_queue_rejects() {
        let executor = Arc::new(shell_executor(1, 1));
        assert_eq!(executor.capacity(), 2);

        let mut running = Vec::new();
        for _ in 0..2 {
            let executor = executor.clone();
            running.push(tokio::spawn(async move {
                executor
                    .execute(&shell("sleep 1", Duration::from_secs(5)), CancellationToken::new())
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let rejected = executor
            .execute(&shell("echo late", Duration::from_secs(5)), CancellationToken::new())
            .await;
        assert_eq!(rejected, Err(InfraError::QueueFull { capacity: 2 }));

        for handle in running {
            assert!(handle.await.unwrap().unwrap().success);
        }
    }
}
