// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crucible_core::application::ExecutionPipeline;
use crucible_core::domain::config::{ExecutorConfig, PipelineConfig};
use crucible_core::domain::execution::{ErrorCategory, ExecutionRequest, Language};
use crucible_core::domain::runtime::CodeRuntime;
use crucible_core::infrastructure::{EventBus, ProcessExecutor, ResultCache};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn python3_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

macro_rules! require_python {
    () => {
        if !python3_available() {
            eprintln!("python3 not found; skipping");
            return;
        }
    };
}

#[tokio::test]
async fn test_print_hi_succeeds() {
    require_python!();
    let executor = ProcessExecutor::new(ExecutorConfig::default());
    let request = ExecutionRequest::new("print(\"hi\")", Duration::from_secs(5));

    let result = executor.execute(&request, CancellationToken::new()).await.unwrap();
    assert!(result.success, "stderr: {}", result.stderr);
    assert_eq!(result.stdout, "hi\n");
    assert_eq!(result.error_category, ErrorCategory::None);
    assert_eq!(result.exit_code, Some(0));
}

#[tokio::test]
async fn test_missing_module_is_dependency_failure() {
    require_python!();
    let executor = ProcessExecutor::new(ExecutorConfig::default());
    let request = ExecutionRequest::new(
        "import crucible_module_that_does_not_exist\n",
        Duration::from_secs(5),
    );

    let result = executor.execute(&request, CancellationToken::new()).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error_category, ErrorCategory::Dependency);
}

#[tokio::test]
async fn test_python_syntax_error_is_classified() {
    require_python!();
    let executor = ProcessExecutor::new(ExecutorConfig::default());
    let request = ExecutionRequest::new("def broken(:\n    pass\n", Duration::from_secs(5));

    let result = executor.execute(&request, CancellationToken::new()).await.unwrap();
    assert_eq!(result.error_category, ErrorCategory::Syntax);
}

#[tokio::test]
async fn test_infinite_loop_times_out_within_bounds() {
    require_python!();
    let executor = ProcessExecutor::new(ExecutorConfig::default());
    let request = ExecutionRequest::new("while True:\n    pass\n", Duration::from_secs(1));

    let result = executor.execute(&request, CancellationToken::new()).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error_category, ErrorCategory::Timeout);
    let secs = result.execution_time.as_secs_f64();
    assert!((1.0..1.5).contains(&secs), "execution_time was {secs}s");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_requests_spawn_once() {
    let config = PipelineConfig::default();
    let executor = Arc::new(ProcessExecutor::new(config.executor.clone()));
    let events = EventBus::new(64);
    let cache = ResultCache::from_config(&config.cache).unwrap();
    let pipeline = ExecutionPipeline::new(config, executor.clone(), cache, events);

    let request = ExecutionRequest::new("sleep 0.3\necho shared", Duration::from_secs(5))
        .with_language(Language::Shell);
    let mut handles = Vec::new();
    for _ in 0..10 {
        let pipeline = pipeline.clone();
        let request = request.clone();
        handles.push(tokio::spawn(async move { pipeline.execute(request).await }));
    }

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.raw.stdout, "shared\n");
    }
    assert_eq!(executor.spawn_count(), 1);
}
