//! Investigation state machine.
//!
//! The [`StateMachine`] is the single owner of an [`Investigation`]
//! aggregate. Every mutation goes through it: phase transitions are
//! checked against the allowed edge set, hypothesis ids are assigned
//! sequentially, evaluations are append-only, and each mutation emits an
//! event on the machine's [`EventBus`].

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::events::{EventBus, InvestigationEvent};
use super::{
    Conclusion, EvidenceEvaluation, EvaluationAction, Hypothesis, HypothesisSeed,
    HypothesisStatus, Investigation, InvestigationError, Phase, PhaseChange, RemediationPlan,
    StepStatus, StepUpdate, TriageResult,
};

/// Caps the machine enforces on its aggregate.
#[derive(Debug, Clone, Copy)]
pub struct MachineLimits {
    /// Hard cap on total hypotheses.
    pub max_hypotheses: usize,
    /// Maximum investigate+evaluate iterations.
    pub max_iterations: u32,
}

impl Default for MachineLimits {
    fn default() -> Self {
        Self {
            max_hypotheses: 10,
            max_iterations: 10,
        }
    }
}

/// Single owner of an investigation aggregate.
#[derive(Debug)]
pub struct StateMachine {
    investigation: Investigation,
    limits: MachineLimits,
    bus: EventBus,
}

impl StateMachine {
    /// Create a machine around a fresh investigation in [`Phase::Idle`].
    pub fn new(query: impl Into<String>, incident_id: Option<String>, limits: MachineLimits) -> Self {
        Self {
            investigation: Investigation::new(query, incident_id),
            limits,
            bus: EventBus::new(),
        }
    }

    /// Rebuild a machine from previously serialized state (checkpoint
    /// resume). No events are emitted for the restored history.
    pub fn restore(investigation: Investigation, limits: MachineLimits) -> Self {
        Self {
            investigation,
            limits,
            bus: EventBus::new(),
        }
    }

    /// Read access to the aggregate.
    pub fn investigation(&self) -> &Investigation {
        &self.investigation
    }

    /// The machine's event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Configured limits.
    pub fn limits(&self) -> MachineLimits {
        self.limits
    }

    // -----------------------------------------------------------------------
    // Phase lifecycle
    // -----------------------------------------------------------------------

    /// Start the investigation: `idle -> triage`.
    ///
    /// # Errors
    ///
    /// Returns [`InvestigationError::InvalidTransition`] unless the
    /// machine is in [`Phase::Idle`].
    pub fn start(&mut self) -> Result<(), InvestigationError> {
        self.transition_to(Phase::Triage, "investigation started")
    }

    /// Transition to `to`, recording the edge in the phase history.
    ///
    /// # Errors
    ///
    /// Returns [`InvestigationError::InvalidTransition`] when the edge is
    /// not in the allowed set.
    pub fn transition_to(
        &mut self,
        to: Phase,
        reason: impl Into<String>,
    ) -> Result<(), InvestigationError> {
        let from = self.investigation.phase;
        if !from.can_transition_to(to) {
            return Err(InvestigationError::InvalidTransition { from, to });
        }

        let reason = reason.into();
        info!(
            investigation_id = %self.investigation.id,
            from = %from,
            to = %to,
            reason = %reason,
            "phase transition"
        );

        self.investigation.phase_history.push(PhaseChange {
            from,
            to,
            at: Utc::now(),
            reason,
        });
        self.investigation.phase = to;
        if to.is_terminal() {
            self.investigation.completed_at = Some(Utc::now());
        }
        self.bus.emit(InvestigationEvent::PhaseChange { from, to });
        Ok(())
    }

    /// Whether another investigate+evaluate iteration is allowed.
    pub fn can_continue(&self) -> bool {
        !self.investigation.phase.is_terminal()
            && self.investigation.iterations < self.limits.max_iterations
    }

    /// Count one completed investigate+evaluate iteration.
    pub fn increment_iteration(&mut self) {
        self.investigation.iterations = self.investigation.iterations.saturating_add(1);
    }

    // -----------------------------------------------------------------------
    // Triage
    // -----------------------------------------------------------------------

    /// Record the triage result.
    ///
    /// # Errors
    ///
    /// Returns [`InvestigationError::WrongPhase`] outside [`Phase::Triage`].
    pub fn set_triage(&mut self, triage: TriageResult) -> Result<(), InvestigationError> {
        if self.investigation.phase != Phase::Triage {
            return Err(InvestigationError::WrongPhase {
                expected: Phase::Triage,
                actual: self.investigation.phase,
            });
        }
        self.bus.emit(InvestigationEvent::TriageComplete {
            triage: triage.clone(),
        });
        self.investigation.triage = Some(triage);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Hypotheses
    // -----------------------------------------------------------------------

    /// Add a hypothesis, assigning the next sequential id.
    ///
    /// # Errors
    ///
    /// Returns [`InvestigationError::CapExceeded`] at the hypothesis cap,
    /// or [`InvestigationError::UnknownHypothesis`] when the seed names a
    /// parent that does not exist.
    pub fn add_hypothesis(&mut self, seed: HypothesisSeed) -> Result<String, InvestigationError> {
        if self.investigation.hypotheses.len() >= self.limits.max_hypotheses {
            return Err(InvestigationError::CapExceeded {
                cap: self.limits.max_hypotheses,
            });
        }
        if let Some(parent_id) = &seed.parent_id {
            if self.find_hypothesis(parent_id).is_none() {
                return Err(InvestigationError::UnknownHypothesis {
                    id: parent_id.clone(),
                });
            }
        }

        let id = format!("h_{}", self.investigation.hypotheses.len().saturating_add(1));
        let hypothesis = Hypothesis {
            id: id.clone(),
            statement: seed.statement,
            category: seed.category,
            priority: seed.priority.clamp(1, 5),
            status: HypothesisStatus::Pending,
            evidence_strength: super::EvidenceStrength::Pending,
            confidence: 0,
            parent_id: seed.parent_id,
            planned_queries: seed.planned_queries,
            reasoning: seed.reasoning,
            confirming_evidence: Vec::new(),
            refuting_evidence: Vec::new(),
        };

        debug!(
            investigation_id = %self.investigation.id,
            hypothesis_id = %id,
            priority = hypothesis.priority,
            "hypothesis created"
        );
        self.bus.emit(InvestigationEvent::HypothesisCreated {
            hypothesis: hypothesis.clone(),
        });
        self.investigation.hypotheses.push(hypothesis);
        Ok(id)
    }

    /// Find a hypothesis by id.
    pub fn find_hypothesis(&self, id: &str) -> Option<&Hypothesis> {
        self.investigation.hypotheses.iter().find(|h| h.id == id)
    }

    /// Children of a hypothesis, reconstructed from parent links.
    pub fn children_of(&self, id: &str) -> Vec<&Hypothesis> {
        self.investigation
            .hypotheses
            .iter()
            .filter(|h| h.parent_id.as_deref() == Some(id))
            .collect()
    }

    /// Hypotheses still worth investigating (not pruned, not confirmed).
    pub fn active_hypotheses(&self) -> Vec<&Hypothesis> {
        self.investigation
            .hypotheses
            .iter()
            .filter(|h| h.is_active())
            .collect()
    }

    /// The next hypothesis to investigate: lowest priority number among
    /// active ones, ties broken by insertion (id) order.
    pub fn next_hypothesis(&self) -> Option<&Hypothesis> {
        self.investigation
            .hypotheses
            .iter()
            .filter(|h| h.is_active())
            .min_by_key(|h| h.priority)
    }

    /// Mark a hypothesis as under investigation.
    ///
    /// # Errors
    ///
    /// Returns [`InvestigationError::UnknownHypothesis`] for unknown ids.
    pub fn mark_investigating(&mut self, id: &str) -> Result<(), InvestigationError> {
        let hypothesis = self
            .investigation
            .hypotheses
            .iter_mut()
            .find(|h| h.id == id)
            .ok_or_else(|| InvestigationError::UnknownHypothesis { id: id.to_owned() })?;
        hypothesis.status = HypothesisStatus::Investigating;
        let (status, confidence) = (hypothesis.status, hypothesis.confidence);
        self.bus.emit(InvestigationEvent::HypothesisUpdated {
            id: id.to_owned(),
            status,
            confidence,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Apply an evidence evaluation to its target hypothesis.
    ///
    /// `prune` sets the status to pruned and files findings as refuting
    /// evidence; `confirm` sets confirmed; `branch` creates children
    /// linked to the target (children beyond the cap are dropped with a
    /// warning); `continue` keeps the hypothesis investigating. The
    /// evaluation itself is appended, never mutated. Returns the ids of
    /// any created children.
    ///
    /// # Errors
    ///
    /// Returns [`InvestigationError::UnknownHypothesis`] when the target
    /// does not exist.
    pub fn apply_evaluation(
        &mut self,
        evaluation: EvidenceEvaluation,
    ) -> Result<Vec<String>, InvestigationError> {
        let target_id = evaluation.hypothesis_id.clone();
        {
            let hypothesis = self
                .investigation
                .hypotheses
                .iter_mut()
                .find(|h| h.id == target_id)
                .ok_or_else(|| InvestigationError::UnknownHypothesis {
                    id: target_id.clone(),
                })?;

            hypothesis.evidence_strength = evaluation.evidence_strength;
            hypothesis.confidence = evaluation.confidence.min(100);
            if !evaluation.reasoning.is_empty() {
                hypothesis.reasoning = Some(evaluation.reasoning.clone());
            }
            match evaluation.action {
                EvaluationAction::Prune => {
                    hypothesis.status = HypothesisStatus::Pruned;
                    hypothesis
                        .refuting_evidence
                        .extend(evaluation.findings.iter().cloned());
                }
                EvaluationAction::Confirm => {
                    hypothesis.status = HypothesisStatus::Confirmed;
                    hypothesis
                        .confirming_evidence
                        .extend(evaluation.findings.iter().cloned());
                }
                EvaluationAction::Continue | EvaluationAction::Branch => {
                    hypothesis.status = HypothesisStatus::Investigating;
                    hypothesis
                        .confirming_evidence
                        .extend(evaluation.findings.iter().cloned());
                }
            }
        }

        let (status, confidence) = {
            let h = self
                .find_hypothesis(&target_id)
                .ok_or_else(|| InvestigationError::UnknownHypothesis {
                    id: target_id.clone(),
                })?;
            (h.status, h.confidence)
        };
        self.bus.emit(InvestigationEvent::EvidenceEvaluated {
            evaluation: evaluation.clone(),
        });
        self.bus.emit(InvestigationEvent::HypothesisUpdated {
            id: target_id.clone(),
            status,
            confidence,
        });

        // Branch: insert children, dropping overflow beyond the cap.
        let mut created = Vec::new();
        if evaluation.action == EvaluationAction::Branch {
            for seed in &evaluation.sub_hypotheses {
                let mut child = seed.clone();
                child.parent_id = Some(target_id.clone());
                match self.add_hypothesis(child) {
                    Ok(child_id) => created.push(child_id),
                    Err(InvestigationError::CapExceeded { cap }) => {
                        warn!(
                            investigation_id = %self.investigation.id,
                            cap,
                            "hypothesis cap reached, dropping branch child"
                        );
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.investigation.evaluations.push(evaluation);
        Ok(created)
    }

    // -----------------------------------------------------------------------
    // Conclusion and remediation
    // -----------------------------------------------------------------------

    /// Record the conclusion and mark its hypothesis confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`InvestigationError::UnknownHypothesis`] when the
    /// conclusion references a hypothesis that does not exist.
    pub fn set_conclusion(&mut self, conclusion: Conclusion) -> Result<(), InvestigationError> {
        if !conclusion.hypothesis_id.is_empty() {
            let hypothesis = self
                .investigation
                .hypotheses
                .iter_mut()
                .find(|h| h.id == conclusion.hypothesis_id)
                .ok_or_else(|| InvestigationError::UnknownHypothesis {
                    id: conclusion.hypothesis_id.clone(),
                })?;
            hypothesis.status = HypothesisStatus::Confirmed;
        }
        self.bus.emit(InvestigationEvent::ConclusionReached {
            conclusion: conclusion.clone(),
        });
        self.investigation.conclusion = Some(conclusion);
        Ok(())
    }

    /// Record a proposed remediation plan.
    pub fn set_remediation_plan(&mut self, plan: RemediationPlan) {
        self.bus
            .emit(InvestigationEvent::RemediationProposed { plan: plan.clone() });
        self.investigation.remediation_plan = Some(plan);
    }

    /// Apply a partial update to a remediation step.
    ///
    /// # Errors
    ///
    /// Returns [`InvestigationError::UnknownStep`] for unknown step ids.
    pub fn update_remediation_step(
        &mut self,
        step_id: &str,
        update: StepUpdate,
    ) -> Result<(), InvestigationError> {
        let step = self
            .investigation
            .remediation_plan
            .as_mut()
            .and_then(|plan| plan.steps.iter_mut().find(|s| s.id == step_id))
            .ok_or_else(|| InvestigationError::UnknownStep {
                id: step_id.to_owned(),
            })?;

        if let Some(status) = update.status {
            step.status = status;
        }
        if update.result.is_some() {
            step.result = update.result;
        }
        if update.error.is_some() {
            step.error = update.error;
        }
        let status = step.status;

        if matches!(
            status,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        ) {
            self.bus.emit(InvestigationEvent::StepCompleted {
                step_id: step_id.to_owned(),
                status,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Errors and reporting
    // -----------------------------------------------------------------------

    /// Record an error in the aggregate's error log and emit it.
    pub fn record_error(&mut self, kind: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(
            investigation_id = %self.investigation.id,
            kind,
            error = %message,
            "investigation error"
        );
        self.investigation.errors.push(message.clone());
        self.bus.emit(InvestigationEvent::Error {
            kind: kind.to_owned(),
            phase: self.investigation.phase,
            message,
        });
    }

    /// Serialize the aggregate.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.investigation).unwrap_or(Value::Null)
    }

    /// Render a human-readable report of the investigation.
    ///
    /// Pruned hypotheses appear under a "Rejected / Deprioritized"
    /// section so the reader sees what was ruled out and why.
    pub fn summary(&self) -> String {
        let inv = &self.investigation;
        let mut out = String::new();

        out.push_str("# Investigation Summary\n");
        out.push_str(&format!("Query: {}\n", inv.query));
        if let Some(incident_id) = &inv.incident_id {
            out.push_str(&format!("Incident: {incident_id}\n"));
        }
        out.push_str(&format!("Phase: {}\n", inv.phase));
        out.push_str(&format!(
            "Iterations: {}/{}\n",
            inv.iterations, self.limits.max_iterations
        ));

        if let Some(triage) = &inv.triage {
            out.push_str("\n## Triage\n");
            out.push_str(&format!("Severity: {:?}\n", triage.severity));
            out.push_str(&format!("Summary: {}\n", triage.summary));
            if !triage.affected_services.is_empty() {
                out.push_str(&format!(
                    "Affected services: {}\n",
                    triage.affected_services.join(", ")
                ));
            }
        }

        let (active_or_confirmed, pruned): (Vec<_>, Vec<_>) = inv
            .hypotheses
            .iter()
            .partition(|h| h.status != HypothesisStatus::Pruned);

        if !active_or_confirmed.is_empty() {
            out.push_str("\n## Hypotheses\n");
            for h in &active_or_confirmed {
                out.push_str(&format!(
                    "- [{:?}] {} (priority {}, confidence {}): {}\n",
                    h.status, h.id, h.priority, h.confidence, h.statement
                ));
            }
        }

        if !pruned.is_empty() {
            out.push_str("\n## Rejected / Deprioritized\n");
            for h in &pruned {
                let reason = h
                    .reasoning
                    .as_deref()
                    .unwrap_or("no supporting evidence");
                out.push_str(&format!("- {} — {}: {}\n", h.id, h.statement, reason));
            }
        }

        if let Some(conclusion) = &inv.conclusion {
            out.push_str("\n## Conclusion\n");
            out.push_str(&format!("Root cause: {}\n", conclusion.root_cause));
            out.push_str(&format!("Confidence: {}\n", conclusion.confidence.as_str()));
            for evidence in &conclusion.evidence_chain {
                out.push_str(&format!(
                    "- {} (source: {}, {:?})\n",
                    evidence.finding, evidence.source, evidence.strength
                ));
            }
            if !conclusion.unknowns.is_empty() {
                out.push_str(&format!("Unknowns: {}\n", conclusion.unknowns.join("; ")));
            }
        }

        if let Some(plan) = &inv.remediation_plan {
            out.push_str("\n## Remediation\n");
            for step in &plan.steps {
                out.push_str(&format!(
                    "- [{:?}] {}: {}\n",
                    step.status, step.id, step.description
                ));
            }
            if let Some(eta) = &plan.estimated_recovery_time {
                out.push_str(&format!("Estimated recovery: {eta}\n"));
            }
        }

        if !inv.errors.is_empty() {
            out.push_str("\n## Errors\n");
            for error in &inv.errors {
                out.push_str(&format!("- {error}\n"));
            }
        }

        out
    }
}
