//! End-to-end runs through the public API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sandjs_runtime::{
    run, CachedLogger, CancelSignal, ExecutionResult, Limits, RunOptions, SourceDir,
};

const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

fn options(logger: &Arc<CachedLogger>) -> RunOptions {
    RunOptions {
        logger: logger.clone(),
        cancel: CancelSignal::new(),
        limits: Limits::default(),
    }
}

async fn run_main(source: &str) -> (ExecutionResult, Arc<CachedLogger>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let logger = Arc::new(CachedLogger::new(256));
    let dir = SourceDir::new("main.js", source);
    let result = run(&dir, options(&logger)).await.unwrap();
    (result, logger)
}

fn log_text(logger: &CachedLogger) -> String {
    logger
        .output()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn returns_the_default_export_value() {
    let (result, _) = run_main("export default () => ({answer: 42, tags: ['a', 'b']});").await;
    assert_eq!(
        result.value,
        Some(serde_json::json!({"answer": 42, "tags": ["a", "b"]}))
    );
}

#[tokio::test]
async fn async_default_export_is_awaited() {
    let (result, _) = run_main("export default async () => 'done';").await;
    assert_eq!(result.value, Some(serde_json::json!("done")));
}

#[tokio::test]
async fn missing_default_export_yields_no_value() {
    let (result, logger) = run_main("export const x = 1;").await;
    assert_eq!(result.value, None);
    assert!(log_text(&logger).contains("Main module exports"));
}

#[tokio::test]
async fn non_callable_default_export_yields_no_value() {
    let (result, _) = run_main("export default 42;").await;
    assert_eq!(result.value, None);
}

#[tokio::test]
async fn guest_exception_is_logged_not_raised() {
    let (result, logger) = run_main("export default () => { throw new Error('boom'); };").await;
    assert_eq!(result.value, None);
    assert!(log_text(&logger).contains("JS error"));
}

#[tokio::test]
async fn syntax_error_is_logged_not_raised() {
    let (result, logger) = run_main("export default () =>").await;
    assert_eq!(result.value, None);
    assert!(log_text(&logger).contains("JS error"));
}

#[tokio::test]
async fn imports_resolve_by_exact_name() {
    let logger = Arc::new(CachedLogger::new(256));
    let dir = SourceDir::new(
        "main.js",
        "import {x} from 'lib.js';\nexport default () => x * 2;",
    )
    .with_file("lib.js", "export const x = 21;");
    let result = run(&dir, options(&logger)).await.unwrap();
    assert_eq!(result.value, Some(serde_json::json!(42)));
}

#[tokio::test]
async fn unknown_import_yields_no_value() {
    let (result, logger) = run_main("import {x} from 'missing.js';\nexport default () => x;").await;
    assert_eq!(result.value, None);
    assert!(log_text(&logger).contains("missing.js"));
}

#[tokio::test]
async fn guest_log_is_captured() {
    let (result, logger) = run_main(
        "import sandbox from 'sandbox:std';\n\
         export default () => { sandbox.log('hello', 7, {a: 1}); return null; };",
    )
    .await;
    assert_eq!(result.value, Some(serde_json::json!(null)));
    let text = log_text(&logger);
    assert!(text.contains("qjs] hello 7"), "log: {text}");
    assert!(text.contains("\"a\": 1"), "log: {text}");
}

#[tokio::test]
async fn infinite_loop_is_stopped_by_cycle_cap() {
    let logger = Arc::new(CachedLogger::new(256));
    let dir = SourceDir::new("main.js", "export default () => { for (;;) {} };");
    let mut opts = options(&logger);
    opts.limits.cycle_cap = 64;
    let result = run(&dir, opts).await.unwrap();
    assert_eq!(result.value, None);
    assert!(result.cycles >= 1);
    assert!(result.cycles <= 65, "cycles: {}", result.cycles);
}

#[tokio::test]
async fn infinite_loop_is_stopped_by_deadline() {
    let logger = Arc::new(CachedLogger::new(256));
    let dir = SourceDir::new("main.js", "export default () => { for (;;) {} };");
    let mut opts = options(&logger);
    opts.limits.cycle_cap = u64::MAX;
    opts.limits.deadline = Duration::from_millis(200);
    let started = Instant::now();
    let result = run(&dir, opts).await.unwrap();
    assert_eq!(result.value, None);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(result.cycles >= 1);
}

#[tokio::test]
async fn cancellation_returns_promptly_with_no_value() {
    let logger = Arc::new(CachedLogger::new(256));
    let dir = SourceDir::new(
        "main.js",
        "import sandbox from 'sandbox:std';\n\
         export default async () => { await sandbox.sleep(60000); return 1; };",
    );
    let opts = options(&logger);
    let canceller = opts.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });
    let started = Instant::now();
    let result = run(&dir, opts).await.unwrap();
    assert_eq!(result.value, None);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn sleep_delays_guest_resumption() {
    let started = Instant::now();
    let (result, _) = run_main(
        "import sandbox from 'sandbox:std';\n\
         export default async () => { await sandbox.sleep(150); return 'woke'; };",
    )
    .await;
    assert_eq!(result.value, Some(serde_json::json!("woke")));
    assert!(
        started.elapsed() >= Duration::from_millis(140),
        "elapsed: {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn sleep_rejects_non_numeric_argument() {
    let (result, logger) = run_main(
        "import sandbox from 'sandbox:std';\n\
         export default async () => { await sandbox.sleep('soon'); return 1; };",
    )
    .await;
    assert_eq!(result.value, None);
    assert!(log_text(&logger).contains("JS error"));
}

#[tokio::test]
async fn sha256hex_of_empty_string_is_the_fixed_digest() {
    let (result, _) = run_main(
        "import sandbox from 'sandbox:std';\n\
         export default async () => await sandbox.sha256hex('');",
    )
    .await;
    assert_eq!(result.value, Some(serde_json::json!(EMPTY_SHA256)));
}

#[tokio::test]
async fn sha256hex_is_deterministic() {
    let (result, _) = run_main(
        "import sandbox from 'sandbox:std';\n\
         export default async () => {\n\
           const a = await sandbox.sha256hex('abc');\n\
           const b = await sandbox.sha256hex('abc');\n\
           return a === b && a.length === 64;\n\
         };",
    )
    .await;
    assert_eq!(result.value, Some(serde_json::json!(true)));
}

#[tokio::test]
async fn sha256hex_rejects_non_string_argument() {
    let (result, logger) = run_main(
        "import sandbox from 'sandbox:std';\n\
         export default async () => await sandbox.sha256hex(42);",
    )
    .await;
    assert_eq!(result.value, None);
    assert!(log_text(&logger).contains("JS error"));
}

#[tokio::test]
async fn guest_can_catch_bridge_type_errors() {
    let (result, _) = run_main(
        "import sandbox from 'sandbox:std';\n\
         export default async () => {\n\
           try { await sandbox.sha256hex(42); return 'no throw'; }\n\
           catch (err) { return 'caught'; }\n\
         };",
    )
    .await;
    assert_eq!(result.value, Some(serde_json::json!("caught")));
}

#[tokio::test]
async fn memory_limit_surfaces_as_guest_error() {
    let logger = Arc::new(CachedLogger::new(256));
    let dir = SourceDir::new(
        "main.js",
        "export default () => { const xs = []; for (;;) { xs.push('x'.repeat(65536)); } };",
    );
    let mut opts = options(&logger);
    opts.limits.memory_bytes = 4 * 1024 * 1024;
    let result = run(&dir, opts).await.unwrap();
    assert_eq!(result.value, None);
}

#[tokio::test]
async fn never_settling_promise_is_bounded_by_deadline() {
    let logger = Arc::new(CachedLogger::new(256));
    let dir = SourceDir::new("main.js", "export default () => new Promise(() => {});");
    let mut opts = options(&logger);
    opts.limits.deadline = Duration::from_millis(200);
    let started = Instant::now();
    let result = run(&dir, opts).await.unwrap();
    assert_eq!(result.value, None);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(log_text(&logger).contains("Deadline exceeded"));
}

#[tokio::test]
async fn promise_chain_is_unpacked_recursively() {
    let (result, _) = run_main("export default () => Promise.resolve(42).then(v => v + 1);").await;
    assert_eq!(result.value, Some(serde_json::json!(43)));
}

#[tokio::test]
async fn rejected_async_default_yields_no_value() {
    let (result, logger) =
        run_main("export default async () => { throw new Error('nope'); };").await;
    assert_eq!(result.value, None);
    assert!(log_text(&logger).contains("JS error"));
}

#[tokio::test]
async fn duration_and_cycles_are_reported() {
    let (result, _) = run_main("export default () => 'ok';").await;
    assert_eq!(result.value, Some(serde_json::json!("ok")));
    assert!(result.duration > Duration::ZERO);
    assert!(result.duration < Duration::from_secs(5));
}
