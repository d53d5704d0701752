//! Pipeline orchestration: resolve scouts, gather leads, qualify each one,
//! and stream progress and results to the consumer over a channel.
//!
//! One run moves `Idle → Running → {Completed | Cancelled | Failed} → Idle`.
//! The worker task and the consumer share nothing but two atomic flags and
//! the event channel.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::qualify::Qualifier;
use crate::scout::types::{Lead, Scout};
use crate::scout::ScoutRegistry;

/// One-time metrics registration (so series carry descriptions).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Pipeline runs started.");
        describe_counter!("scout_leads_total", "Leads collected by scouts.");
        describe_counter!("scout_errors_total", "Scout fetch/parse errors.");
        describe_counter!(
            "qualify_results_total",
            "Leads that produced a qualification result."
        );
        describe_counter!(
            "qualify_failures_total",
            "Qualification attempts that failed."
        );
        describe_histogram!("feed_parse_ms", "Feed parse time in milliseconds.");
    });
}

/// Events streamed to the consumer, in emission order.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PipelineEvent {
    Status(String),
    Progress(u8),
    Result(crate::qualify::QualificationResult),
    Error(String),
    Completed,
}

/// Terminal state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Rejection returned by `spawn_run` while a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunError {
    AlreadyRunning,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::AlreadyRunning => write!(f, "a scan is already in progress"),
        }
    }
}

impl std::error::Error for RunError {}

/// Cancels the in-flight run at the next checkpoint.
#[derive(Debug, Clone)]
pub struct StopHandle {
    cancel: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        tracing::info!("stop requested; run will halt at the next checkpoint");
        self.cancel.store(true, Ordering::SeqCst);
    }
}

pub struct Pipeline {
    cfg: AppConfig,
    registry: Arc<ScoutRegistry>,
    qualifier: Option<Qualifier>,
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(cfg: AppConfig) -> Self {
        Self {
            cfg,
            registry: Arc::new(ScoutRegistry::with_defaults()),
            qualifier: None,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the default scout registry (tests inject fixture scouts).
    pub fn with_registry(mut self, registry: ScoutRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Replace the config-built qualifier (tests inject mock backends).
    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: Arc::clone(&self.cancel),
        }
    }

    /// Request cancellation of the in-flight run. Cooperative: observed only
    /// at the inter-source and inter-lead checkpoints; a call already in
    /// flight completes or errors on its own.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Start one run on a dedicated worker task. Rejected while a run is
    /// active; the in-flight run is not disturbed.
    pub fn spawn_run(
        &self,
        resume_text: String,
        events: UnboundedSender<PipelineEvent>,
    ) -> Result<JoinHandle<RunOutcome>, RunError> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("scan already in progress; ignoring new request");
            return Err(RunError::AlreadyRunning);
        }
        self.cancel.store(false, Ordering::SeqCst);
        ensure_metrics_described();
        counter!("pipeline_runs_total").increment(1);

        let cfg = self.cfg.clone();
        let registry = Arc::clone(&self.registry);
        let qualifier = self.qualifier.clone();
        let running = Arc::clone(&self.running);
        let cancel = Arc::clone(&self.cancel);

        Ok(tokio::spawn(async move {
            let outcome = run_loop(cfg, registry, qualifier, resume_text, events, cancel).await;
            running.store(false, Ordering::SeqCst);
            outcome
        }))
    }
}

fn emit(events: &UnboundedSender<PipelineEvent>, ev: PipelineEvent) {
    // A dropped consumer must not take the worker down with it.
    let _ = events.send(ev);
}

/// Drives one run and guarantees the terminal status/progress/completed trio
/// is emitted exactly once, whatever the outcome.
async fn run_loop(
    cfg: AppConfig,
    registry: Arc<ScoutRegistry>,
    qualifier: Option<Qualifier>,
    resume_text: String,
    events: UnboundedSender<PipelineEvent>,
    cancel: Arc<AtomicBool>,
) -> RunOutcome {
    tracing::info!("worker scan started");
    emit(&events, PipelineEvent::Status("Starting scan...".to_string()));
    emit(&events, PipelineEvent::Progress(0));

    let outcome = match scan(&cfg, &registry, qualifier, &resume_text, &events, &cancel).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = ?e, "scan failed");
            emit(
                &events,
                PipelineEvent::Error(format!("An error occurred during the scan: {e:#}")),
            );
            RunOutcome::Failed
        }
    };

    let status = match outcome {
        RunOutcome::Cancelled => "Scan cancelled.",
        _ => "Scan complete.",
    };
    emit(&events, PipelineEvent::Status(status.to_string()));
    emit(&events, PipelineEvent::Progress(100));
    emit(&events, PipelineEvent::Completed);
    tracing::info!(?outcome, "worker scan finished");
    outcome
}

async fn scan(
    cfg: &AppConfig,
    registry: &ScoutRegistry,
    qualifier: Option<Qualifier>,
    resume_text: &str,
    events: &UnboundedSender<PipelineEvent>,
    cancel: &AtomicBool,
) -> Result<RunOutcome> {
    emit(
        events,
        PipelineEvent::Status("Initializing agents...".to_string()),
    );
    let qualifier = qualifier.unwrap_or_else(|| Qualifier::from_config(&cfg.qualifier));

    let mut scouts: Vec<Box<dyn Scout>> = Vec::new();
    for id in &cfg.sources {
        match registry.resolve(id, cfg) {
            Ok(scout) => scouts.push(scout),
            Err(e) => {
                tracing::error!(error = ?e, source = %id, "source failed to resolve; skipping");
            }
        }
    }
    if scouts.is_empty() {
        bail!("no sources available");
    }

    let mut leads: Vec<Lead> = Vec::new();
    for scout in &scouts {
        if cancel.load(Ordering::SeqCst) {
            tracing::info!("scan stopped externally during lead search");
            return Ok(RunOutcome::Cancelled);
        }
        emit(
            events,
            PipelineEvent::Status(format!("Searching for job leads ({})...", scout.name())),
        );
        leads.extend(scout.find_leads().await);
    }
    if cancel.load(Ordering::SeqCst) {
        tracing::info!("scan stopped externally during lead search");
        return Ok(RunOutcome::Cancelled);
    }

    if leads.is_empty() {
        tracing::info!("no new leads found");
        emit(
            events,
            PipelineEvent::Status("No new job leads found.".to_string()),
        );
        return Ok(RunOutcome::Completed);
    }

    tracing::info!(count = leads.len(), "found potential leads; starting analysis");
    let total = leads.len();
    let mut cancelled = false;

    for (i, lead) in leads.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            tracing::info!("scan stopped externally during analysis");
            cancelled = true;
            break;
        }

        let short_title: String = lead.title.chars().take(50).collect();
        emit(
            events,
            PipelineEvent::Status(format!(
                "Analyzing lead {}/{total}: {short_title}...",
                i + 1
            )),
        );

        if let Some(result) = qualifier.qualify(lead, resume_text).await {
            tracing::info!(title = %lead.title, score = result.score, "lead qualified");
            emit(events, PipelineEvent::Result(result));
        } else {
            tracing::info!(title = %lead.title, "lead was not qualified or failed analysis");
        }

        let progress = (((i + 1) * 100) / total) as u8;
        emit(events, PipelineEvent::Progress(progress));
    }

    Ok(if cancelled {
        RunOutcome::Cancelled
    } else {
        RunOutcome::Completed
    })
}
