use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use job_prospector::config::AppConfig;
use job_prospector::pipeline::{Pipeline, PipelineEvent, RunError, RunOutcome};
use job_prospector::qualify::{LlmBackend, MockBackend, Qualifier};
use job_prospector::scout::types::{Lead, Scout};
use job_prospector::scout::ScoutRegistry;

const VERDICT: &str = r#"{
    "score": 70,
    "justification": "Reasonable match.",
    "cover_letter_draft": "Hello,"
}"#;

struct StaticScout {
    leads: Vec<Lead>,
}

#[async_trait]
impl Scout for StaticScout {
    async fn find_leads(&self) -> Vec<Lead> {
        self.leads.clone()
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

fn lead(n: usize) -> Lead {
    Lead {
        id: format!("lead-{n}"),
        title: format!("Posting {n}"),
        body: "A real job description.".to_string(),
        url: format!("https://example.com/postings/{n}"),
        source: "static".to_string(),
    }
}

fn registry_with(leads: Vec<Lead>) -> ScoutRegistry {
    let mut reg = ScoutRegistry::new();
    reg.register(
        "static",
        Box::new(move |_cfg| {
            Ok(Box::new(StaticScout {
                leads: leads.clone(),
            }) as Box<dyn Scout>)
        }),
    );
    reg
}

fn config_with_sources(sources: &[&str]) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.sources = sources.iter().map(|s| s.to_string()).collect();
    cfg
}

fn mock_qualifier() -> Qualifier {
    Qualifier::with_backend(Arc::new(MockBackend::returning(VERDICT)), vec![])
}

async fn run_and_collect(pipeline: &Pipeline) -> (RunOutcome, Vec<PipelineEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = pipeline
        .spawn_run("resume text".to_string(), tx)
        .expect("run should start");
    let outcome = handle.await.expect("worker task should not panic");

    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    (outcome, events)
}

fn progress_values(events: &[PipelineEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect()
}

fn assert_progress_monotonic_to_100(events: &[PipelineEvent]) {
    let progress = progress_values(events);
    assert!(!progress.is_empty());
    assert!(
        progress.windows(2).all(|w| w[0] <= w[1]),
        "progress must be non-decreasing: {progress:?}"
    );
    assert_eq!(*progress.last().unwrap(), 100);
}

fn assert_single_terminal_completed(events: &[PipelineEvent]) {
    let completed = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Completed))
        .count();
    assert_eq!(completed, 1, "exactly one completed event per run");
    assert!(
        matches!(events.last(), Some(PipelineEvent::Completed)),
        "completed must be the final event"
    );
}

#[tokio::test]
async fn run_streams_results_in_order_and_completes() {
    let leads: Vec<Lead> = (1..=3).map(lead).collect();
    let pipeline = Pipeline::new(config_with_sources(&["static"]))
        .with_registry(registry_with(leads))
        .with_qualifier(mock_qualifier());

    let (outcome, events) = run_and_collect(&pipeline).await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert_single_terminal_completed(&events);
    assert_progress_monotonic_to_100(&events);
    assert_eq!(progress_values(&events)[0], 0);

    let result_ids: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Result(r) => Some(r.lead_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(result_ids, vec!["lead-1", "lead-2", "lead-3"]);

    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Status(s) if s == "Starting scan...")));
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Status(s) if s == "Scan complete.")));
    assert!(!events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Error(_))));
}

#[tokio::test]
async fn unresolvable_sources_fail_the_run_explicitly() {
    let pipeline = Pipeline::new(config_with_sources(&["bogus"]))
        .with_registry(ScoutRegistry::new())
        .with_qualifier(mock_qualifier());

    let (outcome, events) = run_and_collect(&pipeline).await;
    assert_eq!(outcome, RunOutcome::Failed);
    assert_single_terminal_completed(&events);
    assert_progress_monotonic_to_100(&events);
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Error(msg) if msg.contains("no sources available"))));
}

#[tokio::test]
async fn empty_lead_set_reports_and_completes() {
    let pipeline = Pipeline::new(config_with_sources(&["static"]))
        .with_registry(registry_with(Vec::new()))
        .with_qualifier(mock_qualifier());

    let (outcome, events) = run_and_collect(&pipeline).await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert_single_terminal_completed(&events);
    assert_progress_monotonic_to_100(&events);
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Status(s) if s == "No new job leads found.")));
    assert!(!events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Result(_))));
}

#[tokio::test]
async fn failed_qualifications_do_not_stop_the_run() {
    // A backend that never returns valid JSON: every lead fails per-item.
    let pipeline = Pipeline::new(config_with_sources(&["static"]))
        .with_registry(registry_with((1..=3).map(lead).collect()))
        .with_qualifier(Qualifier::with_backend(
            Arc::new(MockBackend::returning("not json")),
            vec![],
        ));

    let (outcome, events) = run_and_collect(&pipeline).await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert_single_terminal_completed(&events);
    assert_progress_monotonic_to_100(&events);
    assert!(!events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Result(_))));
}

struct GatedBackend {
    gate: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl LlmBackend for GatedBackend {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        self.gate.notified().await;
        Ok(VERDICT.to_string())
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

#[tokio::test]
async fn second_run_while_running_is_rejected() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let pipeline = Pipeline::new(config_with_sources(&["static"]))
        .with_registry(registry_with(vec![lead(1)]))
        .with_qualifier(Qualifier::with_backend(
            Arc::new(GatedBackend {
                gate: Arc::clone(&gate),
            }),
            vec![],
        ));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = pipeline
        .spawn_run("resume".to_string(), tx)
        .expect("first run should start");
    assert!(pipeline.is_running());

    let (tx2, _rx2) = mpsc::unbounded_channel();
    assert_eq!(
        pipeline.spawn_run("resume".to_string(), tx2).unwrap_err(),
        RunError::AlreadyRunning
    );

    gate.notify_one();
    let outcome = handle.await.expect("worker task should not panic");
    assert_eq!(outcome, RunOutcome::Completed);
    assert!(!pipeline.is_running());

    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    assert_single_terminal_completed(&events);
}

#[tokio::test]
async fn worker_survives_a_dropped_consumer() {
    let leads: Vec<Lead> = (1..=2).map(lead).collect();
    let pipeline = Pipeline::new(config_with_sources(&["static"]))
        .with_registry(registry_with(leads))
        .with_qualifier(mock_qualifier());

    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    let handle = pipeline
        .spawn_run("resume".to_string(), tx)
        .expect("run should start");
    let outcome = handle.await.expect("worker task should not panic");
    assert_eq!(outcome, RunOutcome::Completed);
}
