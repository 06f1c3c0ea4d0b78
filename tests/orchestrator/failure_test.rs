//! Cancellation, timeout, and parse-failure handling tests.

use std::time::Duration;

use tokio::sync::mpsc;

use sleuth::cancel::CancelToken;
use sleuth::investigation::events::InvestigationEvent;
use sleuth::investigation::Phase;
use sleuth::orchestrator::{InvestigateOptions, Orchestrator};

use crate::mocks::{
    conclusion_response, empty_remediation_response, evaluation_response, parts,
    single_hypothesis_response, triage_response, RecordingExecutor, ScriptedLlm,
};

fn error_kinds(rx: &mut mpsc::UnboundedReceiver<InvestigationEvent>) -> Vec<String> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let InvestigationEvent::Error { kind, .. } = event {
            kinds.push(kind);
        }
    }
    kinds
}

#[tokio::test]
async fn pre_cancelled_token_returns_partial_result() {
    let llm = ScriptedLlm::new(vec![triage_response()]);
    let executor = RecordingExecutor::new();
    let orchestrator = Orchestrator::new(parts(llm, executor.clone(), &[]));

    let cancel = CancelToken::new();
    cancel.cancel();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let result = orchestrator
        .investigate_with(
            "Why is the API slow?",
            None,
            InvestigateOptions {
                cancel,
                events: Some(tx),
            },
        )
        .await;

    // Partial result: non-terminal phase, error recorded, nothing executed.
    assert_eq!(result.state.phase, Phase::Triage);
    assert!(result.error.as_deref().expect("error").contains("cancelled"));
    assert!(result.root_cause.is_empty());
    assert!(executor.call_names().is_empty());
    assert_eq!(error_kinds(&mut rx), vec!["cancelled".to_owned()]);
}

#[tokio::test]
async fn cancellation_mid_run_stops_before_next_tool_call() {
    let llm = ScriptedLlm::new(vec![triage_response(), single_hypothesis_response("aws_query")]);
    let executor = RecordingExecutor::new();
    let orchestrator = Orchestrator::new(parts(llm, executor.clone(), &["aws_query"]));

    let cancel = CancelToken::new();
    // Raised after the run starts; the next suspension-point check stops
    // the investigation within a bounded number of steps.
    let canceller = cancel.clone();
    let handle = tokio::spawn(async move {
        orchestrator
            .investigate_with(
                "Why is the API slow?",
                None,
                InvestigateOptions {
                    cancel: canceller,
                    ..InvestigateOptions::default()
                },
            )
            .await
    });
    cancel.cancel();
    let result = handle.await.expect("join");

    assert!(!result.state.phase.is_terminal() || result.state.phase == Phase::Error);
    assert!(result.error.is_some() || result.state.phase == Phase::Error);
}

#[tokio::test]
async fn zero_timeout_behaves_like_cancellation() {
    let llm = ScriptedLlm::new(vec![triage_response()]);
    let executor = RecordingExecutor::new();
    let mut parts = parts(llm, executor, &[]);
    parts.config.timeout = Duration::ZERO;
    let orchestrator = Orchestrator::new(parts);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = orchestrator
        .investigate_with(
            "Why is the API slow?",
            None,
            InvestigateOptions {
                events: Some(tx),
                ..InvestigateOptions::default()
            },
        )
        .await;

    assert!(result.error.as_deref().expect("error").contains("timed out"));
    assert_eq!(error_kinds(&mut rx), vec!["cancelled".to_owned()]);
    assert!(!result.state.phase.is_terminal());
}

#[tokio::test]
async fn parse_failure_retries_once_with_feedback() {
    let llm = ScriptedLlm::new(vec![
        "I could not decide on a structure.".to_owned(), // unparseable triage
        triage_response(),                               // retry succeeds
        single_hypothesis_response("aws_query"),
        evaluation_response("h_1", "confirm", 90),
        conclusion_response(),
        empty_remediation_response(),
    ]);
    let executor = RecordingExecutor::new();
    let orchestrator = Orchestrator::new(parts(llm, executor, &["aws_query"]));

    let result = orchestrator.investigate("Why is the API slow?", None).await;
    assert_eq!(result.state.phase, Phase::Complete);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn second_parse_failure_aborts_with_error_phase() {
    let llm = ScriptedLlm::new(vec![
        "still not json".to_owned(),
        "no json here either".to_owned(),
    ]);
    let executor = RecordingExecutor::new();
    let orchestrator = Orchestrator::new(parts(llm, executor, &[]));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = orchestrator
        .investigate_with(
            "Why is the API slow?",
            None,
            InvestigateOptions {
                events: Some(tx),
                ..InvestigateOptions::default()
            },
        )
        .await;

    assert_eq!(result.state.phase, Phase::Error);
    assert!(result.error.is_some());
    assert_eq!(error_kinds(&mut rx), vec!["parse".to_owned()]);
    // Partial result still renders.
    assert!(result.summary.contains("# Investigation Summary"));
}

#[tokio::test]
async fn llm_failure_is_fatal_but_renderable() {
    // Empty script: the first completion call fails.
    let llm = ScriptedLlm::new(Vec::<String>::new());
    let executor = RecordingExecutor::new();
    let orchestrator = Orchestrator::new(parts(llm, executor, &[]));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = orchestrator
        .investigate_with(
            "Why is the API slow?",
            None,
            InvestigateOptions {
                events: Some(tx),
                ..InvestigateOptions::default()
            },
        )
        .await;

    assert_eq!(result.state.phase, Phase::Error);
    assert_eq!(error_kinds(&mut rx), vec!["fatal".to_owned()]);
    assert!(result.root_cause.is_empty());
    assert_eq!(result.confidence.as_str(), "low");
}
