//! Isolation tests for the WebAssembly sandbox.
//!
//! Small WAT guests stand in for the script interpreter so the engine,
//! limits and deadline can be exercised without external assets. Tests
//! that need the real QuickJS build are ignored by default.

use std::sync::Arc;
use std::time::{Duration, Instant};

use wasm_preview_sandbox_rs::bridge::protocol::{GuestErrorKind, GuestMessage, HostMessage};
use wasm_preview_sandbox_rs::prelude::*;
use wasm_preview_sandbox_rs::sandbox::{InterpreterSource, Isolate, WasmIsolate};

const SPIN: &str = r#"(module (func (export "_start") (loop $spin (br $spin))))"#;

const GROW: &str = r#"
(module
  (memory 1)
  (func (export "_start")
    (if (i32.eq (memory.grow (i32.const 100)) (i32.const -1))
      (then unreachable))))"#;

/// A guest that writes `text` to `fd` and exits with `code`.
fn guest_writing(fd: u32, text: &str, code: u32) -> InterpreterSource {
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n");
    InterpreterSource::wat(format!(
        r#"(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (data (i32.const 64) "{escaped}")
  (func (export "_start")
    (i32.store (i32.const 0) (i32.const 64))
    (i32.store (i32.const 4) (i32.const {len}))
    (drop (call $fd_write (i32.const {fd}) (i32.const 0) (i32.const 1) (i32.const 8)))
    (call $proc_exit (i32.const {code}))))"#,
        len = text.len(),
    ))
}

/// Helper to create a test sandbox config around a guest.
fn test_config(guest: InterpreterSource) -> SandboxConfig {
    SandboxConfig::builder()
        .interpreter(guest)
        .watchdog_timeout(Duration::from_millis(100))
        .teardown_grace(Duration::from_millis(50))
        .epoch_tick_interval(Duration::from_millis(5))
        .max_memory(1024 * 1024)
        .build()
}

fn inject(revision: u64, text: &str) -> HostMessage {
    HostMessage::Inject {
        revision,
        kind: ContentKind::Component,
        executable_text: text.to_string(),
    }
}

async fn evaluate(isolate: &Arc<WasmIsolate>, message: HostMessage) -> Result<GuestMessage> {
    let isolate = Arc::clone(isolate);
    tokio::task::spawn_blocking(move || isolate.evaluate(&message))
        .await
        .expect("evaluation task panicked")
}

#[tokio::test]
async fn test_infinite_loop_hits_epoch_deadline() {
    let isolate = Arc::new(WasmIsolate::new(test_config(InterpreterSource::wat(SPIN))).unwrap());

    let started = Instant::now();
    let result = evaluate(&isolate, inject(1, "while(true){}")).await;

    assert!(
        matches!(result, Err(PreviewError::Timeout(_))),
        "infinite loop should time out, got {result:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_fuel_exhaustion_counts_as_timeout() {
    let config = SandboxConfig::builder()
        .interpreter(InterpreterSource::wat(SPIN))
        .watchdog_timeout(Duration::from_secs(5))
        .max_fuel(10_000)
        .build();
    let isolate = Arc::new(WasmIsolate::new(config).unwrap());

    let error = evaluate(&isolate, inject(1, "")).await.unwrap_err();
    assert!(matches!(error, PreviewError::OutOfFuel { .. }));
    assert!(error.is_timeout());
}

#[tokio::test]
async fn test_memory_growth_is_bounded() {
    let isolate = Arc::new(WasmIsolate::new(test_config(InterpreterSource::wat(GROW))).unwrap());

    let error = evaluate(&isolate, inject(1, "")).await.unwrap_err();
    assert!(error.is_memory_limit(), "expected memory limit, got {error:?}");
}

#[tokio::test]
async fn test_outcome_line_is_read_from_stdout() {
    let line = "console noise\n{\"type\":\"rendered\",\"revision\":1,\"measuredHeight\":24,\"surface\":\"<p>Hi</p>\"}\n";
    let isolate = Arc::new(WasmIsolate::new(test_config(guest_writing(1, line, 0))).unwrap());

    let answer = evaluate(&isolate, inject(1, "")).await.unwrap();
    assert_eq!(
        answer,
        GuestMessage::Rendered {
            revision: 1,
            measured_height: Some(24.0),
            surface: "<p>Hi</p>".to_string(),
        }
    );
}

#[tokio::test]
async fn test_answer_for_wrong_revision_is_malformed() {
    let line = "{\"type\":\"rendered\",\"revision\":1}\n";
    let isolate = Arc::new(WasmIsolate::new(test_config(guest_writing(1, line, 0))).unwrap());

    let error = evaluate(&isolate, inject(2, "")).await.unwrap_err();
    assert!(matches!(error, PreviewError::MalformedMessage(_)));
}

#[tokio::test]
async fn test_uncaught_exception_is_parsed_from_stderr() {
    let stderr = "Uncaught TypeError: boom\n    at <eval>:1\n";
    let isolate = Arc::new(WasmIsolate::new(test_config(guest_writing(2, stderr, 1))).unwrap());

    match evaluate(&isolate, inject(1, "")).await {
        Err(PreviewError::GuestException { name, message, stack }) => {
            assert_eq!(name, "TypeError");
            assert_eq!(message, "boom");
            assert_eq!(stack.as_deref(), Some("at <eval>:1"));
        }
        other => panic!("expected guest exception, got {other:?}"),
    }
}

#[tokio::test]
async fn test_runaway_component_does_not_freeze_sessions() {
    let host = SandboxHost::wasm(test_config(InterpreterSource::wat(SPIN))).unwrap();
    let sessions = PreviewSessions::new(
        host,
        SessionConfig::builder().debounce(Duration::from_millis(10)).build(),
    )
    .unwrap();
    let mut spinning = sessions.observe("d3");
    let mut prose = sessions.observe("notes");

    sessions.update("d3", "while(true){}", "react").unwrap();
    sessions.update("notes", "# Still responsive", "markdown").unwrap();

    let note = tokio::time::timeout(Duration::from_secs(1), prose.wait_for(Option::is_some))
        .await
        .expect("prose preview blocked")
        .unwrap()
        .clone()
        .unwrap();
    assert_eq!(note.status, OutcomeStatus::Ok);

    let outcome = tokio::time::timeout(Duration::from_secs(2), spinning.wait_for(Option::is_some))
        .await
        .expect("watchdog never fired")
        .unwrap()
        .clone()
        .unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Timeout);
    assert!(sessions.stats().await.unwrap().live_instances.is_empty());
}

/// Configuration for the real interpreter at its default location.
fn qjs_config() -> SandboxConfig {
    SandboxConfig::builder()
        .watchdog_timeout(Duration::from_secs(2))
        .max_memory(64 * 1024 * 1024)
        .build()
}

fn compiled(raw: &str) -> HostMessage {
    let artifact = wasm_preview_sandbox_rs::Transpiler::new(std::num::NonZeroUsize::MIN)
        .compile_source(raw, ContentKind::Component, 1);
    assert!(artifact.is_executable(), "{:?}", artifact.diagnostics);
    HostMessage::inject(&artifact)
}

#[tokio::test]
#[ignore = "requires qjs.wasm"]
async fn test_component_renders_with_hooks() {
    let isolate = Arc::new(WasmIsolate::new(qjs_config()).unwrap());
    let source = r#"
import React, { useState } from "react";

export default function Counter() {
  const [count] = useState(3);
  return <div className="p-4"><span>Count: {count}</span></div>;
}
"#;
    match evaluate(&isolate, compiled(source)).await.unwrap() {
        GuestMessage::Rendered { surface, measured_height, .. } => {
            assert!(surface.contains("<div class=\"p-4\"><span>Count: 3</span></div>"));
            assert_eq!(measured_height, Some(24.0));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires qjs.wasm"]
async fn test_runtime_errors_are_caught_in_guest() {
    let isolate = Arc::new(WasmIsolate::new(qjs_config()).unwrap());
    let source = "export default function Broken() { return undefinedThing(); }";
    match evaluate(&isolate, compiled(source)).await.unwrap() {
        GuestMessage::Error { kind, message, .. } => {
            assert_eq!(kind, GuestErrorKind::RuntimeError);
            assert!(message.starts_with("ReferenceError"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires qjs.wasm"]
async fn test_host_capabilities_are_unreachable() {
    let isolate = Arc::new(WasmIsolate::new(qjs_config()).unwrap());
    let source = r#"
export default function Probe() {
  const reachable = [typeof std, typeof os, typeof fetch, typeof XMLHttpRequest]
    .filter((t) => t !== "undefined").length;
  return <p>{"reachable:" + reachable}</p>;
}
"#;
    match evaluate(&isolate, compiled(source)).await.unwrap() {
        GuestMessage::Rendered { surface, .. } => assert!(surface.contains("reachable:0")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires qjs.wasm"]
async fn test_infinite_loop_times_out_in_interpreter() {
    let isolate = Arc::new(WasmIsolate::new(
        SandboxConfig::builder()
            .watchdog_timeout(Duration::from_millis(300))
            .build(),
    )
    .unwrap());
    let result = evaluate(&isolate, compiled("while(true){}")).await;
    assert!(matches!(result, Err(PreviewError::Timeout(_))));
}

#[tokio::test]
#[ignore = "requires qjs.wasm"]
async fn test_inline_event_attributes_never_reach_the_surface() {
    let isolate = Arc::new(WasmIsolate::new(qjs_config()).unwrap());
    let source = r#"export default () => <button onclick="steal()" onMouseOver="x()" title="ok">Go</button>;"#;
    match evaluate(&isolate, compiled(source)).await.unwrap() {
        GuestMessage::Rendered { surface, .. } => {
            assert_eq!(surface, "<button title=\"ok\">Go</button>");
        }
        other => panic!("unexpected {other:?}"),
    }
}
