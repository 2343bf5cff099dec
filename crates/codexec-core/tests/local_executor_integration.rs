use codexec_core::config::{ExecutionConfig, LocalExecutorConfig};
use codexec_core::context::{CodeExecutorContext, InvocationContext, Session};
use codexec_core::core_types::{CodeExecutionFile, CodeExecutionInput, ExecutionErrorKind};
use codexec_core::errors::CodeExecutorError;
use codexec_core::executors::{CodeExecutor, LocalCodeExecutor};
use codexec_core::processor::CodeExecutionProcessor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn has_program(program: &str) -> bool {
    if which::which(program).is_ok() {
        true
    } else {
        eprintln!("Skipping: '{}' is not installed", program);
        false
    }
}

fn invocation(id: &str) -> InvocationContext {
    InvocationContext::new(id, Arc::new(Session::in_memory("session-1")))
}

fn executor(config: ExecutionConfig) -> LocalCodeExecutor {
    LocalCodeExecutor::new(config, LocalExecutorConfig::unsafe_enabled()).unwrap()
}

#[tokio::test]
async fn test_python_stdout_and_history() {
    if !has_program("python3") {
        return;
    }
    let executor = executor(ExecutionConfig::default());
    let invocation = invocation("inv-python");

    let result = executor
        .execute_code(
            &CancellationToken::new(),
            &invocation,
            CodeExecutionInput::new("print(6 * 7)").with_language("python"),
        )
        .await
        .unwrap()
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.stdout, "42\n");
    assert_eq!(result.execution_id, "inv-python");

    let context = CodeExecutorContext::from_invocation(Some(&invocation)).unwrap();
    let history = context.execution_results("inv-python");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].stdout, "42\n");
    executor.close().await.unwrap();
}

#[tokio::test]
async fn test_bash_sleep_times_out_after_retries() {
    if !has_program("bash") {
        return;
    }
    let config = ExecutionConfig::builder()
        .timeout(Duration::from_secs(2))
        .max_retries(0)
        .build()
        .unwrap();
    let executor = executor(config);

    let started = Instant::now();
    let err = executor
        .execute_code(
            &CancellationToken::new(),
            &invocation("inv-sleep"),
            CodeExecutionInput::new("sleep 5").with_language("bash"),
        )
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(err.is_timeout());
    let result = err.partial_result().unwrap();
    assert_eq!(result.exit_code, 1);
    assert_eq!(
        result.error.as_ref().map(|e| e.kind),
        Some(ExecutionErrorKind::Timeout)
    );
    executor.close().await.unwrap();
}

#[tokio::test]
async fn test_non_zero_exit_is_retried() {
    if !has_program("bash") {
        return;
    }
    let config = ExecutionConfig::builder()
        .max_retries(2)
        .retry_delay(Duration::from_millis(10))
        .build()
        .unwrap();
    let executor = executor(config);
    let invocation = invocation("inv-fail");

    let err = executor
        .execute_code(
            &CancellationToken::new(),
            &invocation,
            CodeExecutionInput::new("echo oops >&2\nexit 3").with_language("sh"),
        )
        .await
        .unwrap_err();

    match err {
        CodeExecutorError::RetriesExhausted { attempts, result, .. } => {
            assert_eq!(attempts, 3);
            assert_eq!(result.exit_code, 3);
            assert_eq!(result.stderr, "oops\n");
        }
        other => panic!("unexpected error: {other}"),
    }
    let context = CodeExecutorContext::from_invocation(Some(&invocation)).unwrap();
    assert_eq!(context.error_count("inv-fail"), 3);
    assert!(context.execution_results("inv-fail").is_empty());
    executor.close().await.unwrap();
}

#[tokio::test]
async fn test_input_files_and_outputs() {
    if !has_program("python3") {
        return;
    }
    let executor = executor(ExecutionConfig::default());
    let invocation = invocation("inv-files");
    let code = "total = sum(int(x) for x in open('numbers.txt').read().split())\n\
                open('total.txt', 'w').write(str(total))\n\
                print(total)";

    let result = executor
        .execute_code(
            &CancellationToken::new(),
            &invocation,
            CodeExecutionInput::new(code)
                .with_input_file(CodeExecutionFile::new("numbers.txt", "1 2 3 4")),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.stdout.trim(), "10");
    let names: Vec<&str> = result.output_files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["total.txt"]);
    assert_eq!(result.output_files[0].content, b"10");

    let context = CodeExecutorContext::from_invocation(Some(&invocation)).unwrap();
    assert_eq!(context.processed_file_names(), vec!["numbers.txt"]);
    executor.close().await.unwrap();
}

#[tokio::test]
async fn test_environment_is_passed_through() {
    if !has_program("bash") {
        return;
    }
    let executor = executor(ExecutionConfig::default());
    let result = executor
        .execute_code(
            &CancellationToken::new(),
            &invocation("inv-env"),
            CodeExecutionInput::new("echo \"$GREETING\"")
                .with_language("bash")
                .with_env("GREETING", "hello"),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.stdout, "hello\n");
    executor.close().await.unwrap();
}

#[tokio::test]
async fn test_processor_round_trip() {
    if !has_program("python3") {
        return;
    }
    let executor = Arc::new(executor(ExecutionConfig::default()));
    let processor = CodeExecutionProcessor::new(executor.clone()).unwrap();
    let text = "Computing:\n```python\nprint(sum(range(5)))\n```\nMore prose.";

    let output = processor
        .process_model_output(&CancellationToken::new(), &invocation("inv-proc"), text)
        .await
        .unwrap();

    assert_eq!(
        output.response(),
        "Computing:\n```python\nprint(sum(range(5)))\n```\n```tool_output\n10\n\n```"
    );
    executor.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_run_their_own_code() {
    if !has_program("python3") {
        return;
    }
    let executor = Arc::new(executor(ExecutionConfig::default()));

    for round in 0..5 {
        let mut handles = Vec::new();
        for call in 0..4 {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move {
                let code = format!("open('out_{call}.txt', 'w').write('{call}')\nprint({call})");
                let result = executor
                    .execute_code(
                        &CancellationToken::new(),
                        &invocation(&format!("inv-{round}-{call}")),
                        CodeExecutionInput::new(code),
                    )
                    .await
                    .unwrap()
                    .unwrap();
                (call, result)
            }));
        }
        for handle in handles {
            let (call, result) = handle.await.unwrap();
            assert_eq!(result.stdout, format!("{call}\n"), "round {round}");
            let names: Vec<&str> = result.output_files.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec![format!("out_{call}.txt")], "round {round}");
        }
    }

    // Per-call directories are gone once their call returns.
    let mut entries = std::fs::read_dir(executor.work_dir()).unwrap();
    assert!(entries.next().is_none());
    executor.close().await.unwrap();
}

#[tokio::test]
async fn test_go_statements_are_wrapped_and_run() {
    if !has_program("go") {
        return;
    }
    // The first build can be slow on a cold cache.
    let config = ExecutionConfig::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .unwrap();
    let executor = executor(config);

    let result = executor
        .execute_code(
            &CancellationToken::new(),
            &invocation("inv-go"),
            CodeExecutionInput::new("import \"fmt\"\nfmt.Println(\"hello from go\")")
                .with_language("go"),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.stdout, "hello from go\n");
    assert!(result.output_files.is_empty());
    executor.close().await.unwrap();
}

#[tokio::test]
async fn test_javascript_runs_under_node() {
    if !has_program("node") {
        return;
    }
    let executor = executor(ExecutionConfig::default());

    let result = executor
        .execute_code(
            &CancellationToken::new(),
            &invocation("inv-js"),
            CodeExecutionInput::new("console.log([1, 2, 3].map(x => x * 2).join(','))")
                .with_language("javascript"),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.stdout, "2,4,6\n");
    assert!(result.output_files.is_empty());
    executor.close().await.unwrap();
}
