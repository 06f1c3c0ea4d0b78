//! Scripted LLM, recording executor, and canned responses shared by the
//! orchestrator tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use sleuth::config::{GateConfig, OrchestratorConfig};
use sleuth::gate::{ApprovalChannel, ApprovalResponse, GateError, MutationRequest};
use sleuth::llm::{LlmClient, LlmError};
use sleuth::orchestrator::OrchestratorParts;
use sleuth::tools::{ToolError, ToolExecutor};

// ---------------------------------------------------------------------------
// Scripted LLM
// ---------------------------------------------------------------------------

/// Completion client that replays a fixed script of responses.
pub(crate) struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedLlm {
    pub(crate) fn new<S: Into<String>>(responses: Vec<S>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        self.responses
            .lock()
            .expect("lock")
            .pop_front()
            .ok_or_else(|| LlmError::Request("script exhausted".to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Recording executor
// ---------------------------------------------------------------------------

/// Executor that records every call and serves canned responses.
pub(crate) struct RecordingExecutor {
    pub(crate) calls: Mutex<Vec<(String, Value)>>,
    responses: Mutex<HashMap<String, Value>>,
    failing: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(HashMap::new()),
            failing: Mutex::new(Vec::new()),
        })
    }

    /// Register a canned response for a tool name.
    pub(crate) fn respond(self: &Arc<Self>, tool: &str, value: Value) -> Arc<Self> {
        self.responses
            .lock()
            .expect("lock")
            .insert(tool.to_owned(), value);
        Arc::clone(self)
    }

    /// Make a tool fail with a fixed message.
    pub(crate) fn fail(self: &Arc<Self>, tool: &str) -> Arc<Self> {
        self.failing.lock().expect("lock").push(tool.to_owned());
        Arc::clone(self)
    }

    /// Names of all recorded calls, in order.
    pub(crate) fn call_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Parameters of the first call to `tool`, if any.
    pub(crate) fn params_of(&self, tool: &str) -> Option<Value> {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .find(|(name, _)| name == tool)
            .map(|(_, params)| params.clone())
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, name: &str, params: &Value) -> Result<Value, ToolError> {
        self.calls
            .lock()
            .expect("lock")
            .push((name.to_owned(), params.clone()));
        if self.failing.lock().expect("lock").iter().any(|t| t == name) {
            return Err(ToolError::Failed {
                tool: name.to_owned(),
                message: "simulated failure".to_owned(),
            });
        }
        let canned = self.responses.lock().expect("lock").get(name).cloned();
        Ok(canned.unwrap_or_else(|| json!({"ok": true, "tool": name})))
    }
}

// ---------------------------------------------------------------------------
// Approval channel
// ---------------------------------------------------------------------------

/// Channel with a fixed verdict that counts invocations.
pub(crate) struct FixedChannel {
    approved: bool,
    pub(crate) calls: AtomicU32,
}

impl FixedChannel {
    pub(crate) fn new(approved: bool) -> Arc<Self> {
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

// ---------------------------------------------------------------------------
// Canned LLM responses
// ---------------------------------------------------------------------------

pub(crate) fn triage_response() -> String {
    json!({
        "summary": "API latency spike across the gateway",
        "severity": "high",
        "affected_services": ["api-gateway", "user-service"],
        "symptoms": ["p99 latency over 5s"],
        "error_messages": ["connection timed out"],
        "time_window": {"start": "-1h", "end": "now"}
    })
    .to_string()
}

pub(crate) fn single_hypothesis_response(tool: &str) -> String {
    json!({
        "hypotheses": [{
            "statement": "Database connection pool exhausted",
            "category": "capacity",
            "priority": 1,
            "planned_queries": [{
                "type": tool,
                "description": "inspect pool utilization",
                "service": "user-db"
            }]
        }],
        "reasoning": "timeouts point at the pool"
    })
    .to_string()
}

pub(crate) fn evaluation_response(hypothesis_id: &str, action: &str, confidence: u8) -> String {
    json!({
        "hypothesis_id": hypothesis_id,
        "action": action,
        "evidence_strength": if confidence >= 70 { "strong" } else { "weak" },
        "confidence": confidence,
        "reasoning": "pool metrics held at maximum",
        "findings": ["pool at 100/100 connections for 40 minutes"]
    })
    .to_string()
}

pub(crate) fn conclusion_response() -> String {
    conclusion_for("h_1")
}

pub(crate) fn conclusion_for(hypothesis_id: &str) -> String {
    json!({
        "root_cause": "Database connection pool exhausted by slow queries",
        "confidence": "high",
        "hypothesis_id": hypothesis_id,
        "evidence_chain": [{
            "finding": "pool at 100/100 connections",
            "source": "aws_query",
            "strength": "strong"
        }],
        "alternative_explanations": ["network partition"],
        "unknowns": []
    })
    .to_string()
}

pub(crate) fn empty_remediation_response() -> String {
    json!({"steps": [], "monitoring": ["watch p99 latency"]}).to_string()
}

// ---------------------------------------------------------------------------
// Parts builder
// ---------------------------------------------------------------------------

/// Default orchestrator parts over the given mocks.
pub(crate) fn parts(
    llm: Arc<ScriptedLlm>,
    executor: Arc<RecordingExecutor>,
    tools: &[&str],
) -> OrchestratorParts {
    OrchestratorParts {
        llm,
        executor,
        knowledge: None,
        approval: None,
        available_tools: tools.iter().map(|t| (*t).to_owned()).collect(),
        skills: Vec::new(),
        config: OrchestratorConfig::default(),
        gate_config: GateConfig::default(),
        approve_step: None,
        fetch_runbooks: None,
    }
}
