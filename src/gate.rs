//! Approval gate: risk classification, mutation budgets, and cooldowns.
//!
//! Every state-changing operation passes through the [`ApprovalGate`]
//! before execution. The gate classifies the operation's risk, enforces a
//! per-session mutation budget and a cooldown between critical mutations,
//! and — unless the risk level is in the auto-approve set — defers the
//! decision to an injected [`ApprovalChannel`]. The channel may block
//! arbitrarily long; the gate checks the caller's [`CancelToken`] before
//! invoking it.
//!
//! All counters are per-gate, and the orchestrator creates one gate per
//! investigation session — there is no process-wide state.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::GateConfig;

// ---------------------------------------------------------------------------
// Risk classification
// ---------------------------------------------------------------------------

/// Risk level of a mutating operation, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Restarts, drains, single-instance reboots.
    Low,
    /// Configuration updates and scaling changes.
    Medium,
    /// Scaling to zero, force-replacement deployments.
    High,
    /// Destructive operations: deletes, terminations, IAM writes, drops.
    Critical,
}

impl RiskLevel {
    /// String form used in prompts and summaries.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse from the string the LLM produced.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// The next level up, saturating at [`RiskLevel::Critical`].
    pub fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

/// Operation prefixes that are destructive regardless of target.
const DESTRUCTIVE_PREFIXES: &[&str] = &["delete", "terminate", "stop", "destroy", "drop"];

/// Operation fragments that indicate IAM policy writes or database drops.
const DESTRUCTIVE_FRAGMENTS: &[&str] = &[
    "put_role_policy",
    "attach_policy",
    "detach_policy",
    "iam_policy",
    "drop_database",
    "drop_table",
];

/// Classify the risk of `operation` against `resource`.
///
/// Base risk comes from the operation name (first matching rule wins):
/// destructive operations are critical, scale-to-zero and forced
/// deployments are high, configuration and scaling changes are medium,
/// restarts and drains are low. A resource name containing `prod` then
/// raises the result one level.
pub fn classify_risk(operation: &str, resource: &str) -> RiskLevel {
    let op = operation.to_lowercase();
    let base = classify_operation(&op);

    if resource.to_lowercase().contains("prod") {
        return base.escalate();
    }
    base
}

fn classify_operation(op: &str) -> RiskLevel {
    if DESTRUCTIVE_PREFIXES.iter().any(|p| op.starts_with(p))
        || DESTRUCTIVE_FRAGMENTS.iter().any(|f| op.contains(f))
    {
        return RiskLevel::Critical;
    }

    if op.contains("scale_to_zero")
        || (op.contains("scale") && op.contains("zero"))
        || (op.contains("force") && op.contains("deploy"))
        || op.contains("force_new_deployment")
    {
        return RiskLevel::High;
    }

    if op.starts_with("update")
        || op.starts_with("put")
        || op.starts_with("set")
        || op.starts_with("modify")
        || op.contains("scale")
        || op.contains("config")
    {
        return RiskLevel::Medium;
    }

    if op.starts_with("restart") || op.starts_with("reboot") || op.starts_with("drain") {
        return RiskLevel::Low;
    }

    // Unrecognized mutations sit in the middle rather than slipping
    // through as low.
    RiskLevel::Medium
}

// ---------------------------------------------------------------------------
// Requests and decisions
// ---------------------------------------------------------------------------

/// A mutation submitted for authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRequest {
    /// Operation name (e.g. `restart_service`).
    pub operation: String,
    /// Target resource (e.g. `prod-api-gateway`).
    pub resource: String,
    /// Classified risk level.
    pub risk: RiskLevel,
    /// Why the mutation is being requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Command that would be executed, for display to the approver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl MutationRequest {
    /// Build a request, classifying risk from the operation and resource.
    pub fn classified(operation: impl Into<String>, resource: impl Into<String>) -> Self {
        let operation = operation.into();
        let resource = resource.into();
        let risk = classify_risk(&operation, &resource);
        Self {
            operation,
            resource,
            risk,
            reason: None,
            command: None,
        }
    }
}

/// The approval channel's verdict on a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponse {
    /// Whether the mutation was approved.
    pub approved: bool,
    /// Who approved or rejected, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
    /// When the decision was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
}

/// Why the gate blocked a request without consulting the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "lowercase")]
pub enum BlockReason {
    /// The per-session mutation budget is exhausted.
    Budget {
        /// Mutations already approved this session.
        used: u32,
        /// Configured maximum.
        limit: u32,
    },
    /// A critical mutation was approved too recently.
    Cooldown {
        /// Milliseconds until the cooldown expires.
        remaining_ms: u64,
    },
}

/// Outcome of an authorization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum GateDecision {
    /// The mutation may proceed.
    Approved {
        /// Who approved, when the channel supplied it.
        approver: Option<String>,
        /// Whether the auto-approve set bypassed the channel.
        auto: bool,
    },
    /// The channel rejected the mutation.
    Rejected {
        /// Who rejected, when the channel supplied it.
        approver: Option<String>,
    },
    /// Blocked by budget or cooldown; the channel was not consulted.
    Blocked(BlockReason),
}

impl GateDecision {
    /// Whether the caller may execute the mutation.
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

/// One audited gate decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateAuditEntry {
    /// Operation that was requested.
    pub operation: String,
    /// Target resource.
    pub resource: String,
    /// Classified risk.
    pub risk: RiskLevel,
    /// The decision taken.
    pub decision: GateDecision,
    /// When the decision was recorded.
    pub at: DateTime<Utc>,
}

/// Errors from the gate itself (not rejections — those are decisions).
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The approval channel failed to deliver a decision.
    #[error("approval channel failed: {0}")]
    Channel(String),
    /// Cancellation was requested before the channel was invoked.
    #[error("approval cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Approval channel
// ---------------------------------------------------------------------------

/// Injected capability that asks a human (or an automated policy) to
/// approve a mutation. Free to block arbitrarily long.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    /// Request a decision for the given mutation.
    ///
    /// # Errors
    ///
    /// Returns an error when the channel cannot deliver a decision at all;
    /// a rejection is a successful response with `approved == false`.
    async fn request(&self, request: &MutationRequest) -> Result<ApprovalResponse, GateError>;
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Counters and timestamps accumulated over one session.
#[derive(Debug, Default)]
struct GateState {
    approved_mutations: u32,
    last_critical_at: Option<DateTime<Utc>>,
    audit: Vec<GateAuditEntry>,
}

/// Per-session approval gate.
///
/// Uses a sync [`Mutex`] for counters since critical sections are brief
/// and never held across an await.
pub struct ApprovalGate {
    channel: Option<std::sync::Arc<dyn ApprovalChannel>>,
    config: GateConfig,
    state: Mutex<GateState>,
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ApprovalGate {
    /// Create a gate with an approval channel.
    pub fn new(channel: std::sync::Arc<dyn ApprovalChannel>, config: GateConfig) -> Self {
        Self {
            channel: Some(channel),
            config,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Create a gate without a channel: only auto-approved risk levels
    /// pass; everything else is rejected.
    pub fn without_channel(config: GateConfig) -> Self {
        Self {
            channel: None,
            config,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Risk levels configured to bypass the channel.
    pub fn auto_approve_set(&self) -> &HashSet<RiskLevel> {
        &self.config.auto_approve
    }

    /// Mutations approved so far this session.
    pub fn approved_count(&self) -> u32 {
        self.state.lock().map(|s| s.approved_mutations).unwrap_or(0)
    }

    /// Snapshot of the decision audit trail.
    pub fn audit_trail(&self) -> Vec<GateAuditEntry> {
        self.state.lock().map(|s| s.audit.clone()).unwrap_or_default()
    }

    /// Authorize a mutation.
    ///
    /// Order of enforcement: budget, cooldown (critical only), auto-approve
    /// set, then the approval channel. Budget and cooldown overages return
    /// [`GateDecision::Blocked`] without consulting the channel. Approvals
    /// update the session counters; rejections and blocks leave them
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Cancelled`] when the token is raised before the
    /// channel is invoked, or [`GateError::Channel`] when the channel
    /// itself fails.
    pub async fn authorize(
        &self,
        request: &MutationRequest,
        cancel: &CancelToken,
    ) -> Result<GateDecision, GateError> {
        // Budget and cooldown are decided under the lock, before any await.
        if let Some(blocked) = self.check_limits(request) {
            warn!(
                operation = %request.operation,
                resource = %request.resource,
                risk = request.risk.as_str(),
                "mutation blocked"
            );
            self.record(request, blocked.clone());
            return Ok(blocked);
        }

        if self.config.auto_approve.contains(&request.risk) {
            debug!(
                operation = %request.operation,
                risk = request.risk.as_str(),
                "mutation auto-approved"
            );
            let decision = GateDecision::Approved {
                approver: None,
                auto: true,
            };
            self.record_approval(request);
            self.record(request, decision.clone());
            return Ok(decision);
        }

        let channel = match &self.channel {
            Some(c) => std::sync::Arc::clone(c),
            None => {
                let decision = GateDecision::Rejected { approver: None };
                self.record(request, decision.clone());
                return Ok(decision);
            }
        };

        if cancel.is_cancelled() {
            return Err(GateError::Cancelled);
        }

        let response = channel.request(request).await?;
        let decision = if response.approved {
            self.record_approval(request);
            info!(
                operation = %request.operation,
                resource = %request.resource,
                approver = response.approver.as_deref().unwrap_or("unknown"),
                "mutation approved"
            );
            GateDecision::Approved {
                approver: response.approver,
                auto: false,
            }
        } else {
            info!(
                operation = %request.operation,
                resource = %request.resource,
                "mutation rejected"
            );
            GateDecision::Rejected {
                approver: response.approver,
            }
        };
        self.record(request, decision.clone());
        Ok(decision)
    }

    /// Authorize a mutation whose approval was decided outside the gate
    /// (auto-approved remediation, an approval callback). Budget and
    /// cooldown are still enforced; the channel is not consulted.
    pub fn authorize_preapproved(&self, request: &MutationRequest) -> GateDecision {
        if let Some(blocked) = self.check_limits(request) {
            self.record(request, blocked.clone());
            return blocked;
        }
        let decision = GateDecision::Approved {
            approver: None,
            auto: true,
        };
        self.record_approval(request);
        self.record(request, decision.clone());
        decision
    }

    /// Check budget and cooldown; returns the block decision if any.
    fn check_limits(&self, request: &MutationRequest) -> Option<GateDecision> {
        let state = self.state.lock().ok()?;

        if state.approved_mutations >= self.config.max_mutations_per_session {
            return Some(GateDecision::Blocked(BlockReason::Budget {
                used: state.approved_mutations,
                limit: self.config.max_mutations_per_session,
            }));
        }

        if request.risk == RiskLevel::Critical {
            if let Some(last) = state.last_critical_at {
                let elapsed_ms = Utc::now()
                    .signed_duration_since(last)
                    .num_milliseconds()
                    .max(0);
                let elapsed_ms = u64::try_from(elapsed_ms).unwrap_or(0);
                if elapsed_ms < self.config.critical_cooldown_ms {
                    return Some(GateDecision::Blocked(BlockReason::Cooldown {
                        remaining_ms: self.config.critical_cooldown_ms.saturating_sub(elapsed_ms),
                    }));
                }
            }
        }

        None
    }

    /// Record an approved mutation: bump the budget counter and, for
    /// critical mutations, arm the cooldown.
    fn record_approval(&self, request: &MutationRequest) {
        if let Ok(mut state) = self.state.lock() {
            state.approved_mutations = state.approved_mutations.saturating_add(1);
            if request.risk == RiskLevel::Critical {
                state.last_critical_at = Some(Utc::now());
            }
        }
    }

    fn record(&self, request: &MutationRequest, decision: GateDecision) {
        if let Ok(mut state) = self.state.lock() {
            state.audit.push(GateAuditEntry {
                operation: request.operation.clone(),
                resource: request.resource.clone(),
                risk: request.risk,
                decision,
                at: Utc::now(),
            });
        }
    }

    /// Force the critical cooldown to start `ms_ago` milliseconds in the
    /// past. Testing hook for cooldown expiry.
    #[doc(hidden)]
    pub fn backdate_critical(&self, ms_ago: i64) {
        if let Ok(mut state) = self.state.lock() {
            state.last_critical_at =
                Utc::now().checked_sub_signed(chrono::Duration::milliseconds(ms_ago));
        }
    }
}
