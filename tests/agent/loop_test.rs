//! Agent loop tests: tool fan-out, drill-down, compaction, synthesis.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use sleuth::agent::{Agent, AgentError, AgentEvent, AgentParts, AgentRunOptions};
use sleuth::cancel::CancelToken;
use sleuth::config::AgentConfig;
use sleuth::knowledge::{
    KnowledgeBundle, KnowledgeChunk, KnowledgeContext, KnowledgeError, KnowledgeKind,
    KnowledgeRetriever,
};
use sleuth::llm::{ChatResponse, LlmClient, LlmError, Message, ToolCall, ToolDefinition};
use sleuth::tools::{ToolError, ToolExecutor};

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

/// Chat client replaying scripted turns; completions serve synthesis.
struct ChatScript {
    turns: Mutex<VecDeque<ChatResponse>>,
    completions: Mutex<VecDeque<String>>,
}

impl ChatScript {
    fn new(turns: Vec<ChatResponse>, completions: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            completions: Mutex::new(completions.into_iter().map(str::to_owned).collect()),
        })
    }
}

#[async_trait]
impl LlmClient for ChatScript {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        self.completions
            .lock()
            .expect("lock")
            .pop_front()
            .ok_or_else(|| LlmError::Request("completion script exhausted".to_owned()))
    }

    async fn chat(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        self.turns
            .lock()
            .expect("lock")
            .pop_front()
            .ok_or_else(|| LlmError::Request("chat script exhausted".to_owned()))
    }
}

/// Completion-only client, for the chat-unsupported path.
struct CompleteOnly;

#[async_trait]
impl LlmClient for CompleteOnly {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        Ok("answer".to_owned())
    }
}

struct CountingExecutor {
    calls: Mutex<Vec<(String, Value)>>,
    fail: bool,
}

impl CountingExecutor {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail,
        })
    }

    fn names(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }
}

#[async_trait]
impl ToolExecutor for CountingExecutor {
    async fn execute(&self, name: &str, params: &Value) -> Result<Value, ToolError> {
        self.calls
            .lock()
            .expect("lock")
            .push((name.to_owned(), params.clone()));
        if self.fail {
            return Err(ToolError::Failed {
                tool: name.to_owned(),
                message: "simulated failure".to_owned(),
            });
        }
        Ok(json!({"instances": [{"id": "i-0abc", "state": "running"}], "count": 3}))
    }
}

struct RunbookRetriever;

#[async_trait]
impl KnowledgeRetriever for RunbookRetriever {
    async fn retrieve(&self, _ctx: &KnowledgeContext) -> Result<KnowledgeBundle, KnowledgeError> {
        Ok(KnowledgeBundle {
            runbooks: vec![KnowledgeChunk {
                id: "c1".to_owned(),
                document_id: "doc-ec2".to_owned(),
                title: "EC2 triage runbook".to_owned(),
                content: "check instance states first".to_owned(),
                kind: KnowledgeKind::Runbook,
                services: vec!["ec2".to_owned()],
                score: 0.92,
                source_url: Some("https://wiki/ec2".to_owned()),
            }],
            ..KnowledgeBundle::default()
        })
    }
}

fn tool_defs() -> Vec<ToolDefinition> {
    vec![ToolDefinition {
        name: "aws_query".to_owned(),
        description: "query AWS resources".to_owned(),
        input_schema: json!({"type": "object"}),
    }]
}

fn tool_turn(calls: Vec<(&str, &str, Value)>) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        tool_calls: calls
            .into_iter()
            .map(|(id, name, arguments)| ToolCall {
                id: id.to_owned(),
                name: name.to_owned(),
                arguments,
            })
            .collect(),
    }
}

fn final_turn(content: &str) -> ChatResponse {
    ChatResponse {
        content: content.to_owned(),
        tool_calls: Vec::new(),
    }
}

fn agent(llm: Arc<dyn LlmClient>, executor: Arc<dyn ToolExecutor>, config: AgentConfig) -> Agent {
    Agent::new(AgentParts {
        llm,
        executor,
        knowledge: Some(Arc::new(RunbookRetriever)),
        tools: tool_defs(),
        skills: vec!["deploy-service".to_owned()],
        config,
    })
}

fn drain(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn answers_with_tools_then_synthesis_and_citations() {
    let llm = ChatScript::new(
        vec![
            tool_turn(vec![("c1", "aws_query", json!({"service": "ec2"}))]),
            final_turn("I have what I need."),
        ],
        vec!["There are 3 EC2 instances running."],
    );
    let executor = CountingExecutor::new(false);
    let agent = agent(llm, executor.clone(), AgentConfig::default());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = agent
        .run_with(
            "what EC2 instances are running?",
            AgentRunOptions {
                events: Some(tx),
                ..AgentRunOptions::default()
            },
        )
        .await
        .expect("run");

    assert!(outcome.answer.contains("3 EC2 instances"));
    assert!(outcome.answer.contains("## Sources"));
    assert!(outcome.answer.contains("EC2 triage runbook (https://wiki/ec2)"));
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.scratchpad_ids.len(), 1);
    assert_eq!(executor.names(), vec!["aws_query".to_owned()]);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::KnowledgeRetrieved { chunks: 1 })));
    assert!(events.iter().any(|e| matches!(e, AgentEvent::Done { .. })));
}

#[tokio::test]
async fn parallel_tool_calls_get_ids_in_call_order() {
    let llm = ChatScript::new(
        vec![
            tool_turn(vec![
                ("c1", "aws_query", json!({"service": "ec2"})),
                ("c2", "aws_query", json!({"service": "rds"})),
                ("c3", "aws_query", json!({"service": "ecs"})),
            ]),
            final_turn(""),
        ],
        vec!["Three services inspected."],
    );
    let executor = CountingExecutor::new(false);
    let agent = agent(llm, executor, AgentConfig::default());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = agent
        .run_with(
            "inspect everything",
            AgentRunOptions {
                events: Some(tx),
                ..AgentRunOptions::default()
            },
        )
        .await
        .expect("run");

    // Three results recorded; event order matches tool-call order, and
    // the outcome lists ids in the same order they were assigned.
    assert_eq!(outcome.scratchpad_ids.len(), 3);
    let event_ids: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            AgentEvent::ToolResult {
                scratchpad_id: Some(id),
                ..
            } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(event_ids, outcome.scratchpad_ids);
}

#[tokio::test]
async fn drill_down_tools_are_served_locally() {
    let llm = ChatScript::new(
        vec![
            tool_turn(vec![("c1", "aws_query", json!({}))]),
            tool_turn(vec![
                ("c2", "list_results", json!({})),
                ("c3", "get_full_result", json!({"id": "zzzzzz"})),
            ]),
            final_turn(""),
        ],
        vec!["done"],
    );
    let executor = CountingExecutor::new(false);
    let agent = agent(llm, executor.clone(), AgentConfig::default());

    let outcome = agent.run("list my results").await.expect("run");
    assert_eq!(outcome.iterations, 3);
    // Only the real tool reached the executor.
    assert_eq!(executor.names(), vec!["aws_query".to_owned()]);
    // The unknown drill-down id did not create a scratchpad entry.
    assert_eq!(outcome.scratchpad_ids.len(), 1);
}

#[tokio::test]
async fn tool_failures_feed_back_without_aborting() {
    let llm = ChatScript::new(
        vec![
            tool_turn(vec![("c1", "aws_query", json!({}))]),
            final_turn(""),
        ],
        vec!["Could not query AWS; access appears broken."],
    );
    let executor = CountingExecutor::new(true);
    let agent = agent(llm, executor, AgentConfig::default());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = agent
        .run_with(
            "what instances exist?",
            AgentRunOptions {
                events: Some(tx),
                ..AgentRunOptions::default()
            },
        )
        .await
        .expect("run");

    assert!(outcome.answer.contains("Could not query AWS"));
    assert!(outcome.scratchpad_ids.is_empty());
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::ToolResult { is_error: true, .. }
    )));
}

#[tokio::test]
async fn iteration_budget_forces_synthesis() {
    let llm = ChatScript::new(
        vec![
            tool_turn(vec![("c1", "aws_query", json!({}))]),
            tool_turn(vec![("c2", "aws_query", json!({}))]),
            // Would keep calling tools, but the budget stops at 2.
            tool_turn(vec![("c3", "aws_query", json!({}))]),
        ],
        vec!["best effort answer"],
    );
    let executor = CountingExecutor::new(false);
    let agent = agent(
        llm,
        executor,
        AgentConfig {
            max_iterations: 2,
            ..AgentConfig::default()
        },
    );

    let outcome = agent.run("dig forever").await.expect("run");
    assert_eq!(outcome.iterations, 2);
    assert!(outcome.answer.contains("best effort answer"));
}

#[tokio::test]
async fn compaction_fires_past_the_context_threshold() {
    let llm = ChatScript::new(
        vec![
            tool_turn(vec![
                ("c1", "aws_query", json!({})),
                ("c2", "aws_query", json!({})),
            ]),
            final_turn(""),
        ],
        vec!["compact answer"],
    );
    let executor = CountingExecutor::new(false);
    let agent = agent(
        llm,
        executor,
        AgentConfig {
            context_threshold_tokens: 5,
            ..AgentConfig::default()
        },
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = agent
        .run_with(
            "query twice",
            AgentRunOptions {
                events: Some(tx),
                ..AgentRunOptions::default()
            },
        )
        .await
        .expect("run");

    // Bodies were evicted but ids remain listed for the whole run.
    assert_eq!(outcome.scratchpad_ids.len(), 2);
    let events = drain(&mut rx);
    let evicted = events.iter().find_map(|e| match e {
        AgentEvent::Compacted { evicted } => Some(*evicted),
        _ => None,
    });
    assert!(evicted.expect("compaction event") >= 1);
}

#[tokio::test]
async fn cancellation_aborts_the_run() {
    let llm = ChatScript::new(vec![final_turn("never reached")], vec!["never"]);
    let executor = CountingExecutor::new(false);
    let agent = agent(llm, executor, AgentConfig::default());

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = agent
        .run_with(
            "anything",
            AgentRunOptions {
                cancel,
                ..AgentRunOptions::default()
            },
        )
        .await;
    assert!(matches!(result, Err(AgentError::Cancelled)));
}

#[tokio::test]
async fn completion_only_client_cannot_drive_the_agent() {
    let executor = CountingExecutor::new(false);
    let agent = Agent::new(AgentParts {
        llm: Arc::new(CompleteOnly),
        executor,
        knowledge: None,
        tools: tool_defs(),
        skills: Vec::new(),
        config: AgentConfig::default(),
    });

    let result = agent.run("anything").await;
    assert!(matches!(
        result,
        Err(AgentError::Llm(LlmError::ChatUnsupported))
    ));
}
