use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use docqa_answer::{CancellationToken, Pipeline};
use docqa_core::config::Config;
use docqa_core::logging;

const USAGE: &str = "Usage: docqa <ingest <file|dir> | query \"<question>\" | batch <questions.txt> | status>";

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() { eprintln!("{}", USAGE); std::process::exit(1); }
    let cmd = args.remove(0);
    (cmd, args)
}

fn main() -> anyhow::Result<()> {
    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let settings = config.settings()?;
    logging::init(&settings.logging);
    let (cmd, args) = parse_args();
    let pipeline = Arc::new(Pipeline::from_settings(&settings)?);
    match cmd.as_str() {
        "ingest" => {
            let path = args.first().map(PathBuf::from).unwrap_or_else(|| { eprintln!("{}", USAGE); std::process::exit(1) });
            let added = pipeline.ingest_file(&path)?;
            println!("{}", serde_json::json!({ "status": "indexed", "chunks": added }));
        }
        "query" => {
            let question = args.join(" ");
            if question.trim().is_empty() { eprintln!("{}", USAGE); std::process::exit(1); }
            let response = pipeline.query(&question)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        "batch" => {
            let path = args.first().map(PathBuf::from).unwrap_or_else(|| { eprintln!("{}", USAGE); std::process::exit(1) });
            run_batch(Arc::clone(&pipeline), &path)?;
        }
        "status" => println!("{}", serde_json::to_string_pretty(&pipeline.status())?),
        _ => { eprintln!("Unknown command: {}\n{}", cmd, USAGE); std::process::exit(1); }
    }
    pipeline.store().flush()?;
    Ok(())
}

/// One blocking worker per question; Ctrl-C cancels pending generation retries.
fn run_batch(pipeline: Arc<Pipeline>, path: &std::path::Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let questions: Vec<String> = text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
    info!("Running {} questions concurrently", questions.len());
    let cancel = CancellationToken::new();
    let runtime = tokio::runtime::Runtime::new()?;
    let results = runtime.block_on(async {
        let signal_token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling pending generations");
                signal_token.cancel();
            }
        });
        let tasks = questions.iter().cloned().map(|question| {
            let pipeline = Arc::clone(&pipeline);
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || pipeline.query_with(&question, Some(cancel)))
        });
        futures::future::join_all(tasks).await
    });
    runtime.shutdown_background();
    for (question, joined) in questions.iter().zip(results) {
        let line = match joined {
            Ok(Ok(response)) => serde_json::json!({ "question": question, "response": response }),
            Ok(Err(e)) => serde_json::json!({ "question": question, "error": e.to_string() }),
            Err(e) => serde_json::json!({ "question": question, "error": format!("worker failed: {}", e) }),
        };
        println!("{}", line);
    }
    Ok(())
}
