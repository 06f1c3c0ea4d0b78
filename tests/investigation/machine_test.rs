//! State machine transition, hypothesis, and evaluation tests.

use sleuth::investigation::machine::{MachineLimits, StateMachine};
use sleuth::investigation::{
    Conclusion, ConfidenceLevel, EvaluationAction, EvidenceEvaluation, EvidenceStrength,
    HypothesisCategory, HypothesisSeed, HypothesisStatus, InvestigationError, Phase, Severity,
    TriageResult,
};

fn machine() -> StateMachine {
    StateMachine::new("Why is the API slow?", None, MachineLimits::default())
}

fn seed(statement: &str, priority: u8) -> HypothesisSeed {
    HypothesisSeed {
        statement: statement.to_owned(),
        category: HypothesisCategory::Capacity,
        priority,
        parent_id: None,
        planned_queries: Vec::new(),
        reasoning: None,
    }
}

fn triage() -> TriageResult {
    TriageResult {
        incident_id: None,
        summary: "API latency spike".to_owned(),
        severity: Severity::High,
        affected_services: vec!["api-gateway".to_owned(), "user-service".to_owned()],
        symptoms: vec!["p99 over 5s".to_owned()],
        error_messages: Vec::new(),
        time_window: None,
        initial_hypotheses: Vec::new(),
    }
}

fn evaluation(id: &str, action: EvaluationAction, confidence: u8) -> EvidenceEvaluation {
    EvidenceEvaluation {
        hypothesis_id: id.to_owned(),
        evidence_strength: EvidenceStrength::Weak,
        confidence,
        reasoning: "test".to_owned(),
        action,
        findings: vec!["a finding".to_owned()],
        sub_hypotheses: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

#[test]
fn starts_idle_and_walks_the_happy_path() {
    let mut m = machine();
    assert_eq!(m.investigation().phase, Phase::Idle);

    m.start().expect("start");
    m.transition_to(Phase::Hypothesize, "t").expect("edge");
    m.transition_to(Phase::Investigate, "t").expect("edge");
    m.transition_to(Phase::Evaluate, "t").expect("edge");
    m.transition_to(Phase::Conclude, "t").expect("edge");
    m.transition_to(Phase::Remediate, "t").expect("edge");
    m.transition_to(Phase::Complete, "t").expect("edge");

    assert!(m.investigation().phase.is_terminal());
    assert!(m.investigation().completed_at.is_some());
    assert_eq!(m.investigation().phase_history.len(), 7);
}

#[test]
fn invalid_transition_is_rejected() {
    let mut m = machine();
    let err = m.transition_to(Phase::Conclude, "skip ahead").expect_err("bad edge");
    assert!(matches!(
        err,
        InvestigationError::InvalidTransition {
            from: Phase::Idle,
            to: Phase::Conclude
        }
    ));
    // State unchanged on rejection.
    assert_eq!(m.investigation().phase, Phase::Idle);
    assert!(m.investigation().phase_history.is_empty());
}

#[test]
fn any_non_terminal_phase_may_error() {
    let mut m = machine();
    m.start().expect("start");
    m.transition_to(Phase::Error, "boom").expect("error edge");
    assert_eq!(m.investigation().phase, Phase::Error);

    // Terminal: no way out.
    let err = m.transition_to(Phase::Triage, "revive").expect_err("terminal");
    assert!(matches!(err, InvestigationError::InvalidTransition { .. }));
}

#[test]
fn evaluate_can_return_to_hypothesize() {
    let mut m = machine();
    m.start().expect("start");
    m.transition_to(Phase::Hypothesize, "t").expect("edge");
    m.transition_to(Phase::Investigate, "t").expect("edge");
    m.transition_to(Phase::Evaluate, "t").expect("edge");
    m.transition_to(Phase::Hypothesize, "all pruned").expect("edge");
    assert_eq!(m.investigation().phase, Phase::Hypothesize);
}

#[test]
fn every_history_entry_is_an_allowed_edge() {
    let mut m = machine();
    m.start().expect("start");
    m.transition_to(Phase::Hypothesize, "t").expect("edge");
    m.transition_to(Phase::Investigate, "t").expect("edge");
    m.transition_to(Phase::Evaluate, "t").expect("edge");
    m.transition_to(Phase::Investigate, "t").expect("edge");
    m.transition_to(Phase::Conclude, "t").expect("edge");
    m.transition_to(Phase::Complete, "t").expect("edge");

    for change in &m.investigation().phase_history {
        assert!(
            change.from.can_transition_to(change.to),
            "{} -> {} is not an allowed edge",
            change.from,
            change.to
        );
    }
}

// ---------------------------------------------------------------------------
// Triage
// ---------------------------------------------------------------------------

#[test]
fn triage_only_sets_in_triage_phase() {
    let mut m = machine();
    let err = m.set_triage(triage()).expect_err("wrong phase");
    assert!(matches!(
        err,
        InvestigationError::WrongPhase {
            expected: Phase::Triage,
            ..
        }
    ));

    m.start().expect("start");
    m.set_triage(triage()).expect("set triage");
    assert!(m.investigation().triage.is_some());
}

// ---------------------------------------------------------------------------
// Hypotheses
// ---------------------------------------------------------------------------

#[test]
fn hypothesis_ids_are_sequential() {
    let mut m = machine();
    assert_eq!(m.add_hypothesis(seed("a", 1)).expect("add"), "h_1");
    assert_eq!(m.add_hypothesis(seed("b", 2)).expect("add"), "h_2");
    assert_eq!(m.add_hypothesis(seed("c", 3)).expect("add"), "h_3");
}

#[test]
fn cap_rejects_the_eleventh_hypothesis() {
    let mut m = machine();
    for i in 0..10 {
        m.add_hypothesis(seed(&format!("h{i}"), 3)).expect("add");
    }
    let err = m.add_hypothesis(seed("overflow", 3)).expect_err("cap");
    assert!(matches!(err, InvestigationError::CapExceeded { cap: 10 }));
    assert_eq!(m.investigation().hypotheses.len(), 10);
}

#[test]
fn unknown_parent_is_rejected() {
    let mut m = machine();
    let mut child = seed("orphan", 2);
    child.parent_id = Some("h_99".to_owned());
    let err = m.add_hypothesis(child).expect_err("unknown parent");
    assert!(matches!(err, InvestigationError::UnknownHypothesis { .. }));
}

#[test]
fn every_child_parent_resolves() {
    let mut m = machine();
    let parent = m.add_hypothesis(seed("parent", 1)).expect("add");
    let mut eval = evaluation(&parent, EvaluationAction::Branch, 60);
    eval.sub_hypotheses = vec![seed("child a", 1), seed("child b", 2)];
    let created = m.apply_evaluation(eval).expect("branch");
    assert_eq!(created, vec!["h_2".to_owned(), "h_3".to_owned()]);

    for h in &m.investigation().hypotheses {
        if let Some(pid) = &h.parent_id {
            assert!(m.find_hypothesis(pid).is_some(), "dangling parent {pid}");
        }
    }
    assert_eq!(m.children_of(&parent).len(), 2);
}

#[test]
fn next_hypothesis_orders_by_priority_then_insertion() {
    let mut m = machine();
    m.add_hypothesis(seed("late low prio", 4)).expect("add");
    m.add_hypothesis(seed("first high prio", 1)).expect("add");
    m.add_hypothesis(seed("second high prio", 1)).expect("add");

    let next = m.next_hypothesis().expect("next");
    assert_eq!(next.id, "h_2"); // priority 1, inserted before h_3
}

#[test]
fn next_hypothesis_skips_pruned_and_confirmed() {
    let mut m = machine();
    let a = m.add_hypothesis(seed("a", 1)).expect("add");
    let b = m.add_hypothesis(seed("b", 2)).expect("add");
    m.apply_evaluation(evaluation(&a, EvaluationAction::Prune, 10))
        .expect("prune");

    assert_eq!(m.next_hypothesis().expect("next").id, b);
    m.apply_evaluation(evaluation(&b, EvaluationAction::Confirm, 90))
        .expect("confirm");
    assert!(m.next_hypothesis().is_none());
}

// ---------------------------------------------------------------------------
// Evaluations
// ---------------------------------------------------------------------------

#[test]
fn prune_marks_hypothesis_inactive() {
    let mut m = machine();
    m.add_hypothesis(seed("Database connection pool exhausted", 1))
        .expect("add");
    let h2 = m.add_hypothesis(seed("Recent deploy regression", 2)).expect("add");

    m.apply_evaluation(evaluation(&h2, EvaluationAction::Prune, 10))
        .expect("prune");

    let pruned = m.find_hypothesis(&h2).expect("exists");
    assert_eq!(pruned.status, HypothesisStatus::Pruned);
    assert_eq!(pruned.confidence, 10);
    assert!(!pruned.refuting_evidence.is_empty());
    assert!(m.active_hypotheses().iter().all(|h| h.id != h2));
}

#[test]
fn confirm_marks_hypothesis_confirmed() {
    let mut m = machine();
    let id = m.add_hypothesis(seed("pool exhausted", 1)).expect("add");
    m.apply_evaluation(evaluation(&id, EvaluationAction::Confirm, 90))
        .expect("confirm");

    let confirmed = m.find_hypothesis(&id).expect("exists");
    assert_eq!(confirmed.status, HypothesisStatus::Confirmed);
    assert!(!confirmed.confirming_evidence.is_empty());
}

#[test]
fn continue_keeps_hypothesis_investigating() {
    let mut m = machine();
    let id = m.add_hypothesis(seed("pool exhausted", 1)).expect("add");
    m.apply_evaluation(evaluation(&id, EvaluationAction::Continue, 40))
        .expect("continue");
    assert_eq!(
        m.find_hypothesis(&id).expect("exists").status,
        HypothesisStatus::Investigating
    );
}

#[test]
fn evaluations_are_appended_in_order() {
    let mut m = machine();
    let id = m.add_hypothesis(seed("pool exhausted", 1)).expect("add");
    m.apply_evaluation(evaluation(&id, EvaluationAction::Continue, 30))
        .expect("eval");
    m.apply_evaluation(evaluation(&id, EvaluationAction::Confirm, 85))
        .expect("eval");

    let evals = &m.investigation().evaluations;
    assert_eq!(evals.len(), 2);
    assert_eq!(evals[0].confidence, 30);
    assert_eq!(evals[1].confidence, 85);
    for e in evals {
        assert!(m.find_hypothesis(&e.hypothesis_id).is_some());
        assert!(e.confidence <= 100);
    }
}

#[test]
fn unknown_evaluation_target_is_rejected() {
    let mut m = machine();
    let err = m
        .apply_evaluation(evaluation("h_42", EvaluationAction::Continue, 50))
        .expect_err("unknown");
    assert!(matches!(err, InvestigationError::UnknownHypothesis { .. }));
    assert!(m.investigation().evaluations.is_empty());
}

#[test]
fn branch_children_beyond_cap_are_dropped_not_fatal() {
    let mut m = machine();
    for i in 0..9 {
        m.add_hypothesis(seed(&format!("h{i}"), 3)).expect("add");
    }
    let mut eval = evaluation("h_1", EvaluationAction::Branch, 60);
    eval.sub_hypotheses = vec![seed("fits", 1), seed("dropped", 2)];
    let created = m.apply_evaluation(eval).expect("branch");
    assert_eq!(created.len(), 1);
    assert_eq!(m.investigation().hypotheses.len(), 10);
}

// ---------------------------------------------------------------------------
// Conclusion and remediation
// ---------------------------------------------------------------------------

#[test]
fn conclusion_confirms_its_hypothesis() {
    let mut m = machine();
    let id = m.add_hypothesis(seed("pool exhausted", 1)).expect("add");
    m.set_conclusion(Conclusion {
        root_cause: "connection pool exhausted".to_owned(),
        confidence: ConfidenceLevel::High,
        hypothesis_id: id.clone(),
        evidence_chain: Vec::new(),
        alternative_explanations: Vec::new(),
        unknowns: Vec::new(),
    })
    .expect("conclude");

    assert_eq!(
        m.find_hypothesis(&id).expect("exists").status,
        HypothesisStatus::Confirmed
    );
    assert!(m.investigation().conclusion.is_some());
}

#[test]
fn iteration_budget_gates_can_continue() {
    let mut m = StateMachine::new(
        "q",
        None,
        MachineLimits {
            max_hypotheses: 10,
            max_iterations: 2,
        },
    );
    m.start().expect("start");
    assert!(m.can_continue());
    m.increment_iteration();
    m.increment_iteration();
    assert!(!m.can_continue());
}
