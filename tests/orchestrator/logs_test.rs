//! Log-analysis capability tests.

use serde_json::json;

use sleuth::orchestrator::Orchestrator;

use crate::mocks::{parts, RecordingExecutor, ScriptedLlm};

fn log_lines() -> Vec<String> {
    vec![
        "2026-07-30T10:00:00Z INFO request ok".to_owned(),
        "2026-07-30T10:00:01Z ERROR out of memory: killed process 4812".to_owned(),
        "2026-07-30T10:00:02Z ERROR request timed out after 30s".to_owned(),
        "2026-07-30T10:00:03Z WARN upstream returned 502".to_owned(),
    ]
}

#[tokio::test]
async fn analyze_logs_combines_patterns_and_llm_output() {
    let llm = ScriptedLlm::new(vec![json!({
        "summary": "user-service is being OOM killed under load",
        "suggested_hypotheses": ["memory leak in user-service"],
        "anomalies": ["OOM kill at 10:00:01"]
    })
    .to_string()]);
    let executor = RecordingExecutor::new();
    let orchestrator = Orchestrator::new(parts(llm, executor, &[]));

    let analysis = orchestrator
        .analyze_logs(&log_lines())
        .await
        .expect("analysis");

    assert_eq!(analysis.total_lines, 4);
    assert!(analysis.pattern_matches.iter().any(|m| m.pattern == "oom"));
    assert!(analysis.pattern_matches.iter().any(|m| m.pattern == "timeout"));
    assert!(analysis
        .pattern_matches
        .iter()
        .any(|m| m.pattern == "http_5xx"));
    assert_eq!(
        analysis.suggested_hypotheses,
        vec!["memory leak in user-service".to_owned()]
    );
    assert!(analysis.summary.contains("OOM"));
}

#[tokio::test]
async fn analyze_logs_surfaces_parse_failures() {
    let llm = ScriptedLlm::new(vec!["not json".to_owned()]);
    let executor = RecordingExecutor::new();
    let orchestrator = Orchestrator::new(parts(llm, executor, &[]));

    let result = orchestrator.analyze_logs(&log_lines()).await;
    assert!(result.is_err());
}
