//! Live preview of a few snippets, the way a feed and an editor drive it.
//!
//! Run with: RUST_LOG=wasm_preview_sandbox_rs=debug cargo run --example live_preview
//!
//! Note: Requires qjs.wasm (QuickJS built for WASI) to be present in assets/

use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use wasm_preview_sandbox_rs::prelude::*;

async fn show(name: &str, rx: &mut watch::Receiver<Option<RenderOutcome>>, revision: u64) {
    let waited = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|o| o.as_ref().is_some_and(|o| o.revision >= revision)),
    )
    .await;
    let outcome = match waited {
        Ok(Ok(outcome)) => outcome.clone(),
        _ => {
            println!("[{name}] no outcome");
            return;
        }
    };
    match outcome {
        Some(o) if o.status == OutcomeStatus::Ok => {
            let surface = o.surface.unwrap_or_default();
            println!(
                "[{name}] r{} Ok, height {:?}, {} bytes of HTML",
                o.revision,
                o.measured_height,
                surface.len()
            );
        }
        Some(o) => println!("[{name}] r{} {}", o.revision, o.summary()),
        None => println!("[{name}] no outcome"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let sandbox = SandboxConfig::builder()
        .interpreter_path("assets/qjs.wasm")
        .watchdog_timeout(Duration::from_secs(2))
        .max_memory(64 * 1024 * 1024) // 64MB
        .build();
    let sessions = match PreviewSessions::wasm(sandbox, SessionConfig::default()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start preview sessions: {e}");
            return Err(e);
        }
    };

    println!("=== Feed card with stored markup ===");
    let mut card = sessions.observe("card-1");
    sessions.mount("card-1", "<div class='p-4 rounded bg-sky-100'>Hi</div>", "html-tailwind")?;
    show("card-1", &mut card, 1).await;

    println!("\n=== Editor typing a component ===");
    let mut editor = sessions.observe("composer");
    for text in [
        "export default function Greeting() {",
        "export default function Greeting() { return <h1>Hel",
        "export default function Greeting() { return <h1 className=\"text-2xl\">Hello</h1>; }",
    ] {
        sessions.update("composer", text, "react-tailwind")?;
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    show("composer", &mut editor, 1).await;

    println!("\n=== Runtime error ===");
    sessions.update(
        "composer",
        "export default function Greeting() { return missing(); }",
        "react-tailwind",
    )?;
    show("composer", &mut editor, 2).await;

    println!("\n=== Runaway loop ===");
    let mut runaway = sessions.observe("runaway");
    sessions.update("runaway", "while(true){}", "react")?;
    show("runaway", &mut runaway, 1).await;

    println!("\n=== Documentation post ===");
    let mut post = sessions.observe("post");
    let record = SnippetRecord {
        code: "# Hooks\n\nSee [the docs](https://react.dev).".to_string(),
        post_type: Some("documentation".to_string()),
        ..SnippetRecord::default()
    };
    sessions.update_snippet("post", &record)?;
    show("post", &mut post, 1).await;

    let stats = sessions.stats().await?;
    println!(
        "\n{} documents, {} live instances, compile cache {} hits / {} misses",
        stats.documents,
        stats.live_instances.len(),
        stats.cache_hits,
        stats.cache_misses
    );

    if let Some(source) = sessions.source("composer").await? {
        println!("copy-to-clipboard would take r{}: {}", source.revision, source.raw_text);
    }

    Ok(())
}
