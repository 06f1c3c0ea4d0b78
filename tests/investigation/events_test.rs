//! Event emission and ordering tests.

use sleuth::investigation::events::InvestigationEvent;
use sleuth::investigation::machine::{MachineLimits, StateMachine};
use sleuth::investigation::{
    EvaluationAction, EvidenceEvaluation, EvidenceStrength, HypothesisSeed, Phase,
};

fn seed(statement: &str) -> HypothesisSeed {
    HypothesisSeed {
        statement: statement.to_owned(),
        priority: 2,
        ..HypothesisSeed::default()
    }
}

fn drain(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<InvestigationEvent>,
) -> Vec<InvestigationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn events_arrive_in_emission_order() {
    let mut m = StateMachine::new("q", None, MachineLimits::default());
    let mut rx = m.bus().subscribe();

    m.start().expect("start");
    m.transition_to(Phase::Hypothesize, "t").expect("edge");
    let id = m.add_hypothesis(seed("pool exhausted")).expect("add");
    m.apply_evaluation(EvidenceEvaluation {
        hypothesis_id: id,
        evidence_strength: EvidenceStrength::Strong,
        confidence: 90,
        reasoning: "r".to_owned(),
        action: EvaluationAction::Confirm,
        findings: Vec::new(),
        sub_hypotheses: Vec::new(),
    })
    .expect("eval");

    let events = drain(&mut rx);
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            InvestigationEvent::PhaseChange { .. } => "phase_change",
            InvestigationEvent::HypothesisCreated { .. } => "hypothesis_created",
            InvestigationEvent::EvidenceEvaluated { .. } => "evidence_evaluated",
            InvestigationEvent::HypothesisUpdated { .. } => "hypothesis_updated",
            _ => "other",
        })
        .collect();

    assert_eq!(
        kinds,
        vec![
            "phase_change",
            "phase_change",
            "hypothesis_created",
            "evidence_evaluated",
            "hypothesis_updated",
        ]
    );
}

#[tokio::test]
async fn phase_change_events_follow_the_transition_graph() {
    let mut m = StateMachine::new("q", None, MachineLimits::default());
    let mut rx = m.bus().subscribe();

    m.start().expect("start");
    m.transition_to(Phase::Hypothesize, "t").expect("edge");
    m.transition_to(Phase::Investigate, "t").expect("edge");
    m.transition_to(Phase::Evaluate, "t").expect("edge");
    m.transition_to(Phase::Conclude, "t").expect("edge");
    m.transition_to(Phase::Complete, "t").expect("edge");

    let mut previous_to: Option<Phase> = None;
    for event in drain(&mut rx) {
        if let InvestigationEvent::PhaseChange { from, to } = event {
            assert!(from.can_transition_to(to));
            if let Some(prev) = previous_to {
                assert_eq!(prev, from, "phase chain must be contiguous");
            }
            previous_to = Some(to);
        }
    }
    assert_eq!(previous_to, Some(Phase::Complete));
}

#[tokio::test]
async fn every_subscriber_sees_every_event() {
    let mut m = StateMachine::new("q", None, MachineLimits::default());
    let mut first = m.bus().subscribe();
    let mut second = m.bus().subscribe();

    m.start().expect("start");
    m.add_hypothesis(seed("a")).expect("add");

    assert_eq!(drain(&mut first).len(), 2);
    assert_eq!(drain(&mut second).len(), 2);
}

#[tokio::test]
async fn dropped_subscribers_do_not_break_emission() {
    let mut m = StateMachine::new("q", None, MachineLimits::default());
    let rx = m.bus().subscribe();
    drop(rx);

    m.start().expect("start");

    let mut live = m.bus().subscribe();
    m.add_hypothesis(seed("a")).expect("add");
    assert_eq!(drain(&mut live).len(), 1);
}

#[tokio::test]
async fn events_serialize_with_snake_case_tags() {
    let mut m = StateMachine::new("q", None, MachineLimits::default());
    let mut rx = m.bus().subscribe();
    m.start().expect("start");

    let event = rx.try_recv().expect("one event");
    let json = serde_json::to_value(&event).expect("serialize");
    assert_eq!(json["type"], "phase_change");
    assert_eq!(json["from"], "idle");
    assert_eq!(json["to"], "triage");
}
