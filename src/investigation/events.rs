//! Typed event stream for investigations.
//!
//! Every state-machine mutation emits an [`InvestigationEvent`]. The
//! [`EventBus`] fans events out to any number of subscribers over
//! unbounded mpsc channels; each subscriber observes events in emission
//! order. Closed subscribers are dropped silently on the next emit.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{
    Conclusion, EvidenceEvaluation, Hypothesis, HypothesisStatus, InvestigationResult, Phase,
    RemediationPlan, StepStatus, TriageResult,
};

/// A typed investigation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvestigationEvent {
    /// The phase changed along an allowed edge.
    PhaseChange {
        /// Phase before.
        from: Phase,
        /// Phase after.
        to: Phase,
    },
    /// Triage finished and its result was recorded.
    TriageComplete {
        /// The recorded triage result.
        triage: TriageResult,
    },
    /// A hypothesis was added to the tree.
    HypothesisCreated {
        /// The new hypothesis.
        hypothesis: Hypothesis,
    },
    /// A hypothesis changed status or confidence.
    HypothesisUpdated {
        /// Hypothesis id.
        id: String,
        /// New status.
        status: HypothesisStatus,
        /// New confidence.
        confidence: u8,
    },
    /// A planned query is about to execute.
    QueryExecuting {
        /// Hypothesis being tested.
        hypothesis_id: String,
        /// Tool being called.
        tool: String,
        /// What the query is expected to show.
        description: String,
    },
    /// A planned query finished.
    QueryComplete {
        /// Hypothesis being tested.
        hypothesis_id: String,
        /// Tool that was called.
        tool: String,
        /// Scratchpad id of the recorded result, when it succeeded.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scratchpad_id: Option<String>,
        /// Error text, when it failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// An evidence evaluation was applied.
    EvidenceEvaluated {
        /// The applied evaluation.
        evaluation: EvidenceEvaluation,
    },
    /// The conclusion was recorded.
    ConclusionReached {
        /// The recorded conclusion.
        conclusion: Conclusion,
    },
    /// A remediation plan was proposed.
    RemediationProposed {
        /// The proposed plan.
        plan: RemediationPlan,
    },
    /// A remediation step reached a terminal status.
    StepCompleted {
        /// Step id.
        step_id: String,
        /// Terminal status.
        status: StepStatus,
    },
    /// Remediation finished for the whole plan.
    RemediationCompleted {
        /// Steps that completed successfully.
        completed: usize,
        /// Steps that failed or were skipped.
        not_completed: usize,
    },
    /// An error was recorded.
    Error {
        /// Error kind (`cancelled`, `parse`, `fatal`, …).
        kind: String,
        /// Phase the error occurred in.
        phase: Phase,
        /// Error detail.
        message: String,
    },
    /// The investigation reached its terminal phase.
    Complete {
        /// The final result.
        result: Box<InvestigationResult>,
    },
}

/// Fan-out bus delivering events to subscribers in emission order.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<InvestigationEvent>>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<InvestigationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    /// Subscribe as a [`tokio_stream::Stream`], for `.next().await` loops.
    pub fn subscribe_stream(
        &self,
    ) -> tokio_stream::wrappers::UnboundedReceiverStream<InvestigationEvent> {
        tokio_stream::wrappers::UnboundedReceiverStream::new(self.subscribe())
    }

    /// Attach an existing sender as a subscriber.
    pub fn attach(&self, tx: mpsc::UnboundedSender<InvestigationEvent>) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
    }

    /// Emit an event to every live subscriber, pruning closed ones.
    pub fn emit(&self, event: InvestigationEvent) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}
