//! Configuration structs for the investigation engine.
//!
//! The engine never reads configuration files itself — hosts embed these
//! structs in their own configuration and pass them in at construction.
//! Every struct has a `Default` matching the documented defaults, and
//! derives `Deserialize` so hosts can flatten them into TOML/JSON configs.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::gate::RiskLevel;

/// Configuration for the investigation orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum investigate+evaluate iterations per investigation.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Hard cap on hypotheses per investigation.
    #[serde(default = "default_max_hypotheses")]
    pub max_hypotheses: usize,
    /// Wall-clock timeout for a whole investigation. Behaves like
    /// cancellation when exceeded.
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
    /// Auto-approve remediation steps of any risk level without invoking
    /// the approval channel (budget and cooldown still apply).
    #[serde(default)]
    pub auto_approve_remediation: bool,
    /// Whether to propose and execute a remediation plan after concluding.
    #[serde(default = "default_true")]
    pub enable_remediation: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_hypotheses: default_max_hypotheses(),
            timeout: default_timeout(),
            auto_approve_remediation: false,
            enable_remediation: true,
        }
    }
}

/// Configuration for the free-form agent loop.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Maximum reasoning iterations (LLM round-trips) per query.
    #[serde(default = "default_agent_iterations")]
    pub max_iterations: u32,
    /// Scratchpad token estimate above which compaction runs.
    #[serde(default = "default_context_threshold")]
    pub context_threshold_tokens: u64,
    /// Conversation token estimate above which older turns are trimmed.
    #[serde(default = "default_max_context")]
    pub max_context_tokens: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_agent_iterations(),
            context_threshold_tokens: default_context_threshold(),
            max_context_tokens: default_max_context(),
        }
    }
}

/// Configuration for the approval gate.
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Maximum approved mutations per investigation session.
    #[serde(default = "default_max_mutations")]
    pub max_mutations_per_session: u32,
    /// Minimum milliseconds between two approved critical mutations.
    #[serde(default = "default_critical_cooldown_ms")]
    pub critical_cooldown_ms: u64,
    /// Risk levels that bypass the approval channel entirely.
    #[serde(default)]
    pub auto_approve: HashSet<RiskLevel>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_mutations_per_session: default_max_mutations(),
            critical_cooldown_ms: default_critical_cooldown_ms(),
            auto_approve: HashSet::new(),
        }
    }
}

/// Configuration for the tool-result scratchpad.
#[derive(Debug, Clone, Deserialize)]
pub struct ScratchpadConfig {
    /// Maximum characters retained in a compact summary line.
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
}

impl Default for ScratchpadConfig {
    fn default() -> Self {
        Self {
            summary_max_chars: default_summary_max_chars(),
        }
    }
}

/// Configuration for the checkpoint store.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    /// Oldest checkpoints beyond this count are pruned on save.
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints_per_investigation: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            max_checkpoints_per_investigation: default_max_checkpoints(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

fn default_max_iterations() -> u32 {
    10
}

fn default_max_hypotheses() -> usize {
    10
}

fn default_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_true() -> bool {
    true
}

fn default_agent_iterations() -> u32 {
    15
}

fn default_context_threshold() -> u64 {
    50_000
}

fn default_max_context() -> u64 {
    100_000
}

fn default_max_mutations() -> u32 {
    10
}

fn default_critical_cooldown_ms() -> u64 {
    60_000
}

fn default_summary_max_chars() -> usize {
    400
}

fn default_max_checkpoints() -> usize {
    50
}

/// Serde adapter: deserialize a `Duration` from whole seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
