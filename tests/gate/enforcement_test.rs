//! Budget, cooldown, auto-approval, and channel tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sleuth::cancel::CancelToken;
use sleuth::config::GateConfig;
use sleuth::gate::{
    ApprovalChannel, ApprovalGate, ApprovalResponse, BlockReason, GateDecision, GateError,
    MutationRequest, RiskLevel,
};

/// Channel that always answers the same way and counts invocations.
struct FixedChannel {
    approved: bool,
    calls: AtomicU32,
}

impl FixedChannel {
    fn new(approved: bool) -> Arc<Self> {
        Arc::new(Self {
            approved,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ApprovalChannel for FixedChannel {
    async fn request(&self, _request: &MutationRequest) -> Result<ApprovalResponse, GateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ApprovalResponse {
            approved: self.approved,
            approver: Some("oncall".to_owned()),
            at: None,
        })
    }
}

fn request(risk: RiskLevel) -> MutationRequest {
    MutationRequest {
        operation: "restart_service".to_owned(),
        resource: "staging-api".to_owned(),
        risk,
        reason: None,
        command: None,
    }
}

fn config(budget: u32, cooldown_ms: u64) -> GateConfig {
    GateConfig {
        max_mutations_per_session: budget,
        critical_cooldown_ms: cooldown_ms,
        auto_approve: HashSet::new(),
    }
}

#[tokio::test]
async fn channel_approval_increments_budget() {
    let channel = FixedChannel::new(true);
    let gate = ApprovalGate::new(channel.clone(), config(10, 0));
    let cancel = CancelToken::new();

    let decision = gate
        .authorize(&request(RiskLevel::Low), &cancel)
        .await
        .expect("authorize");
    assert!(decision.is_approved());
    assert_eq!(gate.approved_count(), 1);
    assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejection_leaves_budget_untouched() {
    let channel = FixedChannel::new(false);
    let gate = ApprovalGate::new(channel, config(10, 0));
    let cancel = CancelToken::new();

    let decision = gate
        .authorize(&request(RiskLevel::High), &cancel)
        .await
        .expect("authorize");
    assert!(matches!(decision, GateDecision::Rejected { .. }));
    assert_eq!(gate.approved_count(), 0);
}

#[tokio::test]
async fn budget_overage_blocks_without_consulting_channel() {
    let channel = FixedChannel::new(true);
    let gate = ApprovalGate::new(channel.clone(), config(2, 0));
    let cancel = CancelToken::new();

    for _ in 0..2 {
        let decision = gate
            .authorize(&request(RiskLevel::Low), &cancel)
            .await
            .expect("authorize");
        assert!(decision.is_approved());
    }

    let decision = gate
        .authorize(&request(RiskLevel::Low), &cancel)
        .await
        .expect("authorize");
    assert!(matches!(
        decision,
        GateDecision::Blocked(BlockReason::Budget { used: 2, limit: 2 })
    ));
    // Channel was only invoked for the two approved mutations.
    assert_eq!(channel.calls.load(Ordering::SeqCst), 2);
    assert_eq!(gate.approved_count(), 2);
}

#[tokio::test]
async fn critical_cooldown_blocks_second_approval() {
    let channel = FixedChannel::new(true);
    let gate = ApprovalGate::new(channel, config(10, 60_000));
    let cancel = CancelToken::new();

    let first = gate
        .authorize(&request(RiskLevel::Critical), &cancel)
        .await
        .expect("authorize");
    assert!(first.is_approved());

    let second = gate
        .authorize(&request(RiskLevel::Critical), &cancel)
        .await
        .expect("authorize");
    match second {
        GateDecision::Blocked(BlockReason::Cooldown { remaining_ms }) => {
            assert!(remaining_ms > 0);
            assert!(remaining_ms <= 60_000);
        }
        other => panic!("expected cooldown block, got {other:?}"),
    }
}

#[tokio::test]
async fn cooldown_expires_after_window() {
    let channel = FixedChannel::new(true);
    let gate = ApprovalGate::new(channel, config(10, 60_000));
    let cancel = CancelToken::new();

    gate.authorize(&request(RiskLevel::Critical), &cancel)
        .await
        .expect("authorize");
    // Pretend the first approval happened well outside the window.
    gate.backdate_critical(120_000);

    let decision = gate
        .authorize(&request(RiskLevel::Critical), &cancel)
        .await
        .expect("authorize");
    assert!(decision.is_approved());
}

#[tokio::test]
async fn cooldown_does_not_affect_lower_risks() {
    let channel = FixedChannel::new(true);
    let gate = ApprovalGate::new(channel, config(10, 60_000));
    let cancel = CancelToken::new();

    gate.authorize(&request(RiskLevel::Critical), &cancel)
        .await
        .expect("authorize");
    let decision = gate
        .authorize(&request(RiskLevel::Medium), &cancel)
        .await
        .expect("authorize");
    assert!(decision.is_approved());
}

#[tokio::test]
async fn auto_approve_set_bypasses_channel() {
    let channel = FixedChannel::new(false); // would reject if consulted
    let mut cfg = config(10, 0);
    cfg.auto_approve.insert(RiskLevel::Low);
    let gate = ApprovalGate::new(channel.clone(), cfg);
    let cancel = CancelToken::new();

    let decision = gate
        .authorize(&request(RiskLevel::Low), &cancel)
        .await
        .expect("authorize");
    assert!(matches!(decision, GateDecision::Approved { auto: true, .. }));
    assert_eq!(channel.calls.load(Ordering::SeqCst), 0);
    assert_eq!(gate.approved_count(), 1);
}

#[tokio::test]
async fn cancellation_short_circuits_before_channel() {
    let channel = FixedChannel::new(true);
    let gate = ApprovalGate::new(channel.clone(), config(10, 0));
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = gate.authorize(&request(RiskLevel::High), &cancel).await;
    assert!(matches!(result, Err(GateError::Cancelled)));
    assert_eq!(channel.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn gate_without_channel_rejects_non_auto_risks() {
    let mut cfg = config(10, 0);
    cfg.auto_approve.insert(RiskLevel::Low);
    let gate = ApprovalGate::without_channel(cfg);
    let cancel = CancelToken::new();

    let low = gate
        .authorize(&request(RiskLevel::Low), &cancel)
        .await
        .expect("authorize");
    assert!(low.is_approved());

    let high = gate
        .authorize(&request(RiskLevel::High), &cancel)
        .await
        .expect("authorize");
    assert!(matches!(high, GateDecision::Rejected { .. }));
}

#[tokio::test]
async fn preapproved_path_still_enforces_budget() {
    let gate = ApprovalGate::without_channel(config(1, 0));

    let first = gate.authorize_preapproved(&request(RiskLevel::Medium));
    assert!(first.is_approved());
    let second = gate.authorize_preapproved(&request(RiskLevel::Medium));
    assert!(matches!(
        second,
        GateDecision::Blocked(BlockReason::Budget { .. })
    ));
}

#[tokio::test]
async fn audit_trail_records_every_decision() {
    let channel = FixedChannel::new(true);
    let gate = ApprovalGate::new(channel, config(1, 0));
    let cancel = CancelToken::new();

    gate.authorize(&request(RiskLevel::Low), &cancel)
        .await
        .expect("authorize");
    gate.authorize(&request(RiskLevel::Low), &cancel)
        .await
        .expect("authorize"); // blocked by budget

    let trail = gate.audit_trail();
    assert_eq!(trail.len(), 2);
    assert!(trail[0].decision.is_approved());
    assert!(matches!(trail[1].decision, GateDecision::Blocked(_)));
}
