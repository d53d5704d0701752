//! Job Prospector CLI entrypoint.
//! Runs one aggregation/qualification scan and prints streamed results;
//! Ctrl-C requests cooperative cancellation.

use anyhow::Result;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use job_prospector::config::{self, AppConfig};
use job_prospector::pipeline::{Pipeline, PipelineEvent};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default()?;
    let resume = config::load_resume(cfg.resume_path.as_deref());

    let pipeline = Pipeline::new(cfg);
    let stop = pipeline.stop_handle();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = pipeline.spawn_run(resume, tx)?;

    loop {
        tokio::select! {
            ev = rx.recv() => match ev {
                Some(PipelineEvent::Status(text)) => eprintln!("[status] {text}"),
                Some(PipelineEvent::Progress(pct)) => eprintln!("[progress] {pct}%"),
                Some(PipelineEvent::Result(result)) => {
                    // Results go to stdout as JSON lines; narration stays on stderr.
                    println!("{}", serde_json::to_string(&result)?);
                }
                Some(PipelineEvent::Error(text)) => eprintln!("[error] {text}"),
                Some(PipelineEvent::Completed) => break,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                stop.stop();
            }
        }
    }

    let outcome = worker.await?;
    tracing::info!(?outcome, "scan finished");
    Ok(())
}
