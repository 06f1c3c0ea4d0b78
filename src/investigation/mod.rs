//! Investigation domain model.
//!
//! The [`Investigation`] aggregate owns everything produced during one
//! root-cause analysis: the phase history, the hypothesis tree, evidence
//! evaluations, the triage result, the conclusion, and the remediation
//! plan. All types serialize to JSON — the checkpoint store persists them
//! verbatim.
//!
//! Hypotheses form a tree, but storage is a flat ordered list: children
//! back-reference their parent by id, and the parent/child relation is
//! reconstructed by scanning for matching `parent_id`. Ids are the only
//! cross-links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gate::RiskLevel;

pub mod events;
pub mod machine;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Lifecycle phase of an investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Created, not yet started.
    Idle,
    /// Classifying severity, services, and time window.
    Triage,
    /// Generating candidate root causes.
    Hypothesize,
    /// Executing planned queries for the current hypothesis.
    Investigate,
    /// Weighing gathered evidence against the hypothesis.
    Evaluate,
    /// Producing the root-cause conclusion.
    Conclude,
    /// Proposing and executing remediation steps.
    Remediate,
    /// Terminal: investigation finished.
    Complete,
    /// Terminal: investigation aborted on error.
    Error,
}

impl Phase {
    /// String form used in events, summaries, and serialized state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Triage => "triage",
            Self::Hypothesize => "hypothesize",
            Self::Investigate => "investigate",
            Self::Evaluate => "evaluate",
            Self::Conclude => "conclude",
            Self::Remediate => "remediate",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Whether a transition from `self` to `to` is an allowed edge.
    ///
    /// Any non-terminal phase may transition to [`Phase::Error`].
    pub fn can_transition_to(self, to: Phase) -> bool {
        if to == Self::Error {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Self::Idle, Self::Triage)
                | (Self::Triage, Self::Hypothesize | Self::Conclude)
                | (Self::Hypothesize, Self::Investigate | Self::Conclude)
                | (Self::Investigate, Self::Evaluate | Self::Conclude)
                | (Self::Evaluate, Self::Investigate | Self::Hypothesize | Self::Conclude)
                | (Self::Conclude, Self::Remediate | Self::Complete)
                | (Self::Remediate, Self::Complete)
        )
    }
}

/// One recorded phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChange {
    /// Phase before the transition.
    pub from: Phase,
    /// Phase after the transition.
    pub to: Phase,
    /// When the transition happened.
    pub at: DateTime<Utc>,
    /// Why the transition happened.
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Triage
// ---------------------------------------------------------------------------

/// Incident severity, as classified during triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Information only, no action needed.
    Low,
    /// May need attention soon.
    Medium,
    /// Needs attention now.
    High,
    /// System is down or at risk.
    Critical,
}

impl Severity {
    /// Numeric rank for sorting (higher = more severe).
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

/// Time window the incident is believed to span.
///
/// Boundaries are kept as the strings the LLM produced (ISO-8601 or
/// relative forms like `-1h`); the engine never does time math on them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start.
    pub start: String,
    /// Window end.
    pub end: String,
}

/// Result of the triage phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageResult {
    /// Incident tracker id, when the investigation was opened against one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    /// One-paragraph incident summary.
    pub summary: String,
    /// Classified severity.
    pub severity: Severity,
    /// Services believed to be affected.
    #[serde(default)]
    pub affected_services: Vec<String>,
    /// Observed symptoms.
    #[serde(default)]
    pub symptoms: Vec<String>,
    /// Error messages seen in telemetry.
    #[serde(default)]
    pub error_messages: Vec<String>,
    /// Time window of the incident.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    /// Initial hypothesis statements suggested during triage.
    #[serde(default)]
    pub initial_hypotheses: Vec<String>,
}

// ---------------------------------------------------------------------------
// Hypotheses
// ---------------------------------------------------------------------------

/// Closed category set for hypotheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypothesisCategory {
    /// Compute, network, storage, or platform faults.
    Infrastructure,
    /// Application-level bugs or regressions.
    Application,
    /// Upstream or third-party dependency failures.
    Dependency,
    /// Misconfiguration or bad rollouts.
    Configuration,
    /// Saturation: CPU, memory, connections, queues.
    Capacity,
    /// Attacks, credential issues, policy blocks.
    Security,
    /// Not yet classifiable.
    Unknown,
}

impl HypothesisCategory {
    /// Parse from the string the LLM produced.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "infrastructure" => Some(Self::Infrastructure),
            "application" => Some(Self::Application),
            "dependency" => Some(Self::Dependency),
            "configuration" => Some(Self::Configuration),
            "capacity" => Some(Self::Capacity),
            "security" => Some(Self::Security),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Lifecycle status of a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypothesisStatus {
    /// Not yet investigated.
    Pending,
    /// Currently being investigated.
    Investigating,
    /// Confirmed as (part of) the root cause.
    Confirmed,
    /// Rejected for lack of supporting evidence.
    Pruned,
}

/// Qualitative strength of the evidence gathered for a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceStrength {
    /// No evaluation yet.
    Pending,
    /// Evaluated, nothing supports it.
    None,
    /// Some supporting signal.
    Weak,
    /// Strong supporting signal.
    Strong,
}

impl EvidenceStrength {
    /// Parse from the string the LLM produced.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "none" => Some(Self::None),
            "weak" => Some(Self::Weak),
            "strong" => Some(Self::Strong),
            _ => None,
        }
    }
}

/// A query the LLM planned to test a hypothesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedQuery {
    /// Tool name to execute.
    #[serde(rename = "type")]
    pub query_type: String,
    /// What the query is expected to show.
    pub description: String,
    /// Service to scope the query to, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Tool parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Input for creating a hypothesis — everything except the assigned id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HypothesisSeed {
    /// Proposed root-cause statement.
    pub statement: String,
    /// Category of the proposed cause.
    #[serde(default = "default_category")]
    pub category: HypothesisCategory,
    /// Priority 1..5, lower investigates first.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Parent hypothesis id, for branch refinements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Queries planned to test this hypothesis.
    #[serde(default)]
    pub planned_queries: Vec<PlannedQuery>,
    /// Why the LLM proposed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

fn default_category() -> HypothesisCategory {
    HypothesisCategory::Unknown
}

fn default_priority() -> u8 {
    3
}

impl Default for HypothesisCategory {
    fn default() -> Self {
        Self::Unknown
    }
}

/// A node in the hypothesis tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Sequential id (`h_1`, `h_2`, …), stable for the whole investigation.
    pub id: String,
    /// Proposed root-cause statement.
    pub statement: String,
    /// Category of the proposed cause.
    pub category: HypothesisCategory,
    /// Priority 1..5, lower investigates first.
    pub priority: u8,
    /// Current lifecycle status.
    pub status: HypothesisStatus,
    /// Strength of evidence gathered so far.
    pub evidence_strength: EvidenceStrength,
    /// Confidence 0..100 from the latest evaluation.
    pub confidence: u8,
    /// Parent hypothesis id, when created by a branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Queries planned to test this hypothesis.
    #[serde(default)]
    pub planned_queries: Vec<PlannedQuery>,
    /// Free-text reasoning from creation or the latest evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Evidence text supporting the hypothesis.
    #[serde(default)]
    pub confirming_evidence: Vec<String>,
    /// Evidence text contradicting the hypothesis.
    #[serde(default)]
    pub refuting_evidence: Vec<String>,
}

impl Hypothesis {
    /// Whether the hypothesis is still worth investigating.
    pub fn is_active(&self) -> bool {
        !matches!(
            self.status,
            HypothesisStatus::Pruned | HypothesisStatus::Confirmed
        )
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// What the evaluator decided to do with a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationAction {
    /// Keep investigating this hypothesis.
    Continue,
    /// Refine into child hypotheses.
    Branch,
    /// Reject for lack of evidence.
    Prune,
    /// Accept as the root cause.
    Confirm,
}

impl EvaluationAction {
    /// Parse from the string the LLM produced.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "continue" => Some(Self::Continue),
            "branch" => Some(Self::Branch),
            "prune" => Some(Self::Prune),
            "confirm" => Some(Self::Confirm),
            _ => None,
        }
    }
}

/// An appended, never-mutated evidence evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceEvaluation {
    /// Hypothesis this evaluation targets.
    pub hypothesis_id: String,
    /// Qualitative evidence strength.
    pub evidence_strength: EvidenceStrength,
    /// Confidence 0..100.
    pub confidence: u8,
    /// Evaluator reasoning.
    pub reasoning: String,
    /// Decided next action.
    pub action: EvaluationAction,
    /// Findings extracted from the tool results.
    #[serde(default)]
    pub findings: Vec<String>,
    /// Child hypotheses to create (only with [`EvaluationAction::Branch`]).
    #[serde(default)]
    pub sub_hypotheses: Vec<HypothesisSeed>,
}

// ---------------------------------------------------------------------------
// Conclusion
// ---------------------------------------------------------------------------

/// Qualitative confidence in the conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    /// Weak support; alternatives remain plausible.
    Low,
    /// Reasonable support.
    Medium,
    /// Strong, corroborated support.
    High,
}

impl ConfidenceLevel {
    /// String form used in results and summaries.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse from the string the LLM produced.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// One link in the evidence chain backing a conclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// The finding text.
    pub finding: String,
    /// Where it came from (tool name, scratchpad id, runbook title).
    pub source: String,
    /// How strongly it supports the root cause.
    pub strength: EvidenceStrength,
}

/// Root-cause conclusion of an investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conclusion {
    /// The root cause statement.
    pub root_cause: String,
    /// Confidence in the conclusion.
    pub confidence: ConfidenceLevel,
    /// The confirmed hypothesis.
    pub hypothesis_id: String,
    /// Evidence backing the conclusion.
    #[serde(default)]
    pub evidence_chain: Vec<EvidenceRef>,
    /// Explanations considered and not chosen.
    #[serde(default)]
    pub alternative_explanations: Vec<String>,
    /// Open questions the evidence did not settle.
    #[serde(default)]
    pub unknowns: Vec<String>,
}

// ---------------------------------------------------------------------------
// Remediation
// ---------------------------------------------------------------------------

/// Execution status of a remediation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not yet attempted.
    Pending,
    /// Approved, not yet executing.
    Approved,
    /// Currently executing.
    Executing,
    /// Executed successfully.
    Completed,
    /// Execution failed.
    Failed,
    /// Deliberately not executed.
    Skipped,
}

/// One ordered action in a remediation plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationStep {
    /// Step id, unique within the plan.
    pub id: String,
    /// Short action name (e.g. `restart_service`).
    pub action: String,
    /// What the step does and why.
    pub description: String,
    /// Shell command for manual execution, when no skill matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Command to undo the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_command: Option<String>,
    /// Classified risk of executing the step.
    pub risk_level: RiskLevel,
    /// Whether human approval is required regardless of risk.
    #[serde(default)]
    pub requires_approval: bool,
    /// Name of an available skill that implements the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_skill: Option<String>,
    /// Title of a runbook covering the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_runbook: Option<String>,
    /// Arguments for the matching skill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    /// Execution status.
    #[serde(default = "default_step_status")]
    pub status: StepStatus,
    /// Output captured from successful execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Error captured from failed or deferred execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_step_status() -> StepStatus {
    StepStatus::Pending
}

/// Partial update applied to a remediation step.
#[derive(Debug, Clone, Default)]
pub struct StepUpdate {
    /// New status, if changing.
    pub status: Option<StepStatus>,
    /// Captured result, if any.
    pub result: Option<String>,
    /// Captured error, if any.
    pub error: Option<String>,
}

/// Ordered remediation plan with monitoring hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationPlan {
    /// Ordered steps.
    pub steps: Vec<RemediationStep>,
    /// What to watch while and after remediating.
    #[serde(default)]
    pub monitoring: Vec<String>,
    /// Estimated time to recovery, free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_recovery_time: Option<String>,
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// The root investigation aggregate.
///
/// Owned and mutated exclusively by the
/// [`machine::StateMachine`]; serialized verbatim into checkpoints and
/// final results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investigation {
    /// Unique investigation id.
    pub id: String,
    /// The originating query.
    pub query: String,
    /// Incident tracker id, when investigating a tracked incident.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    /// Current phase.
    pub phase: Phase,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Completion timestamp, once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Ordered phase transition history.
    #[serde(default)]
    pub phase_history: Vec<PhaseChange>,
    /// Flat, ordered hypothesis list (tree via `parent_id`).
    #[serde(default)]
    pub hypotheses: Vec<Hypothesis>,
    /// Appended evidence evaluations, in application order.
    #[serde(default)]
    pub evaluations: Vec<EvidenceEvaluation>,
    /// Triage result, once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage: Option<TriageResult>,
    /// Conclusion, once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<Conclusion>,
    /// Remediation plan, once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_plan: Option<RemediationPlan>,
    /// Errors recorded along the way.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Completed investigate+evaluate iterations.
    #[serde(default)]
    pub iterations: u32,
}

impl Investigation {
    /// Create a fresh investigation in [`Phase::Idle`].
    pub fn new(query: impl Into<String>, incident_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            incident_id,
            phase: Phase::Idle,
            created_at: Utc::now(),
            completed_at: None,
            phase_history: Vec::new(),
            hypotheses: Vec::new(),
            evaluations: Vec::new(),
            triage: None,
            conclusion: None,
            remediation_plan: None,
            errors: Vec::new(),
            iterations: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Final product of an investigation run.
///
/// Always populated, even on partial success — `root_cause` may be empty
/// and `error` set, but consumers can render a report from any outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationResult {
    /// Id of the investigation this result belongs to.
    pub investigation_id: String,
    /// Root cause statement; empty when none was reached.
    pub root_cause: String,
    /// Confidence in the root cause.
    pub confidence: ConfidenceLevel,
    /// Human-readable report.
    pub summary: String,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
    /// Remediation plan, when one was proposed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_plan: Option<RemediationPlan>,
    /// Scratchpad ids issued during the run, for checkpointing.
    #[serde(default)]
    pub scratchpad_ids: Vec<String>,
    /// Full serializable investigation state.
    pub state: Investigation,
    /// Error that ended the run early, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from state-machine operations.
#[derive(Debug, thiserror::Error)]
pub enum InvestigationError {
    /// The requested phase transition is not an allowed edge.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// Current phase.
        from: Phase,
        /// Requested phase.
        to: Phase,
    },

    /// The hypothesis cap would be exceeded.
    #[error("hypothesis cap exceeded: {cap}")]
    CapExceeded {
        /// Configured maximum hypothesis count.
        cap: usize,
    },

    /// A referenced hypothesis does not exist.
    #[error("unknown hypothesis: {id}")]
    UnknownHypothesis {
        /// The unresolved id.
        id: String,
    },

    /// An operation was attempted in the wrong phase.
    #[error("operation requires phase {expected}, current phase is {actual}")]
    WrongPhase {
        /// Phase the operation requires.
        expected: Phase,
        /// Current phase.
        actual: Phase,
    },

    /// A referenced remediation step does not exist.
    #[error("unknown remediation step: {id}")]
    UnknownStep {
        /// The unresolved step id.
        id: String,
    },
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
