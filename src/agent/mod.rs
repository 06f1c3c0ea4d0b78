//! Agent loop: iterative tool-calling for free-form queries.
//!
//! Where the orchestrator runs a fixed lifecycle, the [`Agent`] lets the
//! LLM drive: each iteration sends the conversation and tool schema to
//! `chat`, fans out the returned tool calls, substitutes compact
//! summaries back into the conversation, and loops until the model stops
//! calling tools (or the iteration budget runs out). A final synthesis
//! call produces the answer, with deduplicated runbook citations
//! appended.
//!
//! Scratchpad ids are assigned in tool-call order even when calls run
//! concurrently, so conversations and tests stay reproducible. When the
//! scratchpad estimate crosses the context threshold, the oldest
//! non-pinned bodies are evicted; the model can still list them and
//! re-request any body that survives.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::{AgentConfig, ScratchpadConfig};
use crate::knowledge::{Citation, KnowledgeContext, KnowledgeRetriever};
use crate::llm::{prompts, ContentPart, LlmClient, LlmError, Message, MessageContent, Role};
use crate::scratchpad::Scratchpad;
use crate::tools::{ToolExecutor, ToolRegistry, TOOL_GET_FULL_RESULT, TOOL_LIST_RESULTS};

pub mod context;

// ---------------------------------------------------------------------------
// Events and outcome
// ---------------------------------------------------------------------------

/// Progress events emitted by one agent run.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Knowledge was retrieved and prepended to the system prompt.
    KnowledgeRetrieved {
        /// Total chunks across buckets.
        chunks: usize,
    },
    /// A new reasoning iteration started.
    Iteration {
        /// 1-based iteration number.
        n: u32,
    },
    /// The LLM requested a tool call.
    ToolCall {
        /// Tool name.
        name: String,
        /// LLM-assigned call id.
        call_id: String,
    },
    /// A tool call finished and was recorded.
    ToolResult {
        /// Tool name.
        name: String,
        /// Scratchpad id, when the call succeeded.
        scratchpad_id: Option<String>,
        /// Compact summary or error text.
        summary: String,
        /// Whether the tool failed.
        is_error: bool,
    },
    /// The scratchpad was compacted.
    Compacted {
        /// How many bodies were evicted.
        evicted: usize,
    },
    /// The run finished with an answer.
    Done {
        /// The final answer, citations included.
        answer: String,
    },
}

/// Final product of an agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// The final answer, citations included.
    pub answer: String,
    /// Iterations consumed.
    pub iterations: u32,
    /// Scratchpad ids issued during the run.
    pub scratchpad_ids: Vec<String>,
}

/// Errors that abort an agent run.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The LLM client failed.
    #[error(transparent)]
    Llm(#[from] LlmError),
    /// The caller's cancellation token was raised.
    #[error("agent run cancelled")]
    Cancelled,
}

/// Options for one agent run.
#[derive(Debug, Default)]
pub struct AgentRunOptions {
    /// Cancellation token checked before every suspension point.
    pub cancel: CancelToken,
    /// Optional progress event subscriber.
    pub events: Option<mpsc::UnboundedSender<AgentEvent>>,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Everything an agent needs, bundled to avoid long parameter lists.
pub struct AgentParts {
    /// Chat-capable LLM client.
    pub llm: Arc<dyn LlmClient>,
    /// Tool executor.
    pub executor: Arc<dyn ToolExecutor>,
    /// Knowledge retriever, when the host has one.
    pub knowledge: Option<Arc<dyn KnowledgeRetriever>>,
    /// Tool definitions declared to the LLM (drill-down tools are added).
    pub tools: Vec<crate::llm::ToolDefinition>,
    /// Names of available skills, listed in the system prompt.
    pub skills: Vec<String>,
    /// Agent configuration.
    pub config: AgentConfig,
}

impl std::fmt::Debug for AgentParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentParts")
            .field("skills", &self.skills)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Free-form query agent.
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    executor: Arc<dyn ToolExecutor>,
    knowledge: Option<Arc<dyn KnowledgeRetriever>>,
    registry: ToolRegistry,
    skills: Vec<String>,
    config: AgentConfig,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct AgentRun {
    scratchpad: Scratchpad,
    cancel: CancelToken,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
    citations: Vec<Citation>,
}

impl AgentRun {
    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn check_continue(&self) -> Result<(), AgentError> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }
}

impl Agent {
    /// Build an agent from its parts.
    pub fn new(parts: AgentParts) -> Self {
        Self {
            llm: parts.llm,
            executor: parts.executor,
            knowledge: parts.knowledge,
            registry: ToolRegistry::new(parts.tools),
            skills: parts.skills,
            config: parts.config,
        }
    }

    /// Run a query with default options.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on LLM failure or cancellation.
    pub async fn run(&self, query: &str) -> Result<AgentOutcome, AgentError> {
        self.run_with(query, AgentRunOptions::default()).await
    }

    /// Run a query.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on LLM failure or cancellation. Tool
    /// failures do not abort the run — they are fed back to the model as
    /// error results.
    pub async fn run_with(
        &self,
        query: &str,
        options: AgentRunOptions,
    ) -> Result<AgentOutcome, AgentError> {
        let mut run = AgentRun {
            scratchpad: Scratchpad::new(ScratchpadConfig::default()),
            cancel: options.cancel,
            events: options.events,
            citations: Vec::new(),
        };

        // Step 1: retrieve knowledge once and prepend it.
        let knowledge_section = self.retrieve_knowledge(&mut run, query).await;
        let system_prompt = context::assemble_system_prompt(
            &self.registry.describe(),
            &self.skills,
            &knowledge_section,
        );

        let mut conversation: Vec<Message> = vec![
            Message::text(Role::System, system_prompt),
            Message::text(Role::User, query),
        ];

        let mut iterations: u32 = 0;
        loop {
            iterations = iterations.saturating_add(1);
            run.emit(AgentEvent::Iteration { n: iterations });
            run.check_continue()?;

            let window = context::trim_messages(&conversation, self.config.max_context_tokens);
            let response = self
                .llm
                .chat(&window, self.registry.definitions())
                .await?;

            if response.tool_calls.is_empty() {
                debug!(iterations, "no tool calls, synthesizing final answer");
                let answer = self.synthesize(&mut run, query, &response.content).await?;
                run.emit(AgentEvent::Done {
                    answer: answer.clone(),
                });
                return Ok(AgentOutcome {
                    answer,
                    iterations,
                    scratchpad_ids: run.scratchpad.ids(),
                });
            }

            // Record the assistant turn verbatim.
            let mut assistant_parts: Vec<ContentPart> = Vec::new();
            if !response.content.is_empty() {
                assistant_parts.push(ContentPart::Text {
                    text: response.content.clone(),
                });
            }
            for call in &response.tool_calls {
                run.emit(AgentEvent::ToolCall {
                    name: call.name.clone(),
                    call_id: call.id.clone(),
                });
                assistant_parts.push(ContentPart::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                });
            }
            conversation.push(Message {
                role: Role::Assistant,
                content: MessageContent::Parts(assistant_parts),
            });

            // Fan out tool calls; join and record in call order so
            // scratchpad ids stay deterministic.
            let result_parts = self.execute_tool_calls(&mut run, &response.tool_calls).await?;
            conversation.push(Message {
                role: Role::User,
                content: MessageContent::Parts(result_parts),
            });

            // Compact when the scratchpad estimate crosses the threshold.
            let estimate = run.scratchpad.estimated_tokens();
            if estimate > self.config.context_threshold_tokens {
                let evicted = run.scratchpad.compact(self.config.context_threshold_tokens);
                run.emit(AgentEvent::Compacted {
                    evicted: evicted.len(),
                });
            }

            if iterations >= self.config.max_iterations {
                warn!(iterations, "iteration budget exhausted, synthesizing");
                let answer = self.synthesize(&mut run, query, "").await?;
                run.emit(AgentEvent::Done {
                    answer: answer.clone(),
                });
                return Ok(AgentOutcome {
                    answer,
                    iterations,
                    scratchpad_ids: run.scratchpad.ids(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Knowledge
    // -----------------------------------------------------------------------

    async fn retrieve_knowledge(&self, run: &mut AgentRun, query: &str) -> String {
        let Some(retriever) = &self.knowledge else {
            return String::new();
        };
        let context = KnowledgeContext {
            query: query.to_owned(),
            ..KnowledgeContext::default()
        };
        match retriever.retrieve(&context).await {
            Ok(bundle) => {
                let chunks = bundle.all_chunks().count();
                run.emit(AgentEvent::KnowledgeRetrieved { chunks });
                run.citations = bundle.citations();
                bundle.format_for_prompt()
            }
            Err(e) => {
                debug!(error = %e, "knowledge retrieval failed, continuing without it");
                String::new()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tool execution
    // -----------------------------------------------------------------------

    async fn execute_tool_calls(
        &self,
        run: &mut AgentRun,
        calls: &[crate::llm::ToolCall],
    ) -> Result<Vec<ContentPart>, AgentError> {
        run.check_continue()?;

        // Spawn executor-bound calls concurrently; drill-down calls are
        // answered locally from the scratchpad at their position.
        let mut handles: Vec<Option<JoinHandle<Result<Value, crate::tools::ToolError>>>> =
            Vec::with_capacity(calls.len());
        for call in calls {
            if ToolRegistry::is_drill_down(&call.name) {
                handles.push(None);
            } else {
                let executor = Arc::clone(&self.executor);
                let name = call.name.clone();
                let args = call.arguments.clone();
                handles.push(Some(tokio::spawn(async move {
                    executor.execute(&name, &args).await
                })));
            }
        }

        let mut parts = Vec::with_capacity(calls.len());
        for (call, handle) in calls.iter().zip(handles) {
            let part = match handle {
                None => self.serve_drill_down(run, call),
                Some(handle) => {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(join_err) => Err(crate::tools::ToolError::Failed {
                            tool: call.name.clone(),
                            message: join_err.to_string(),
                        }),
                    };
                    match result {
                        Ok(value) => {
                            let id = run.scratchpad.record(
                                &call.name,
                                call.arguments.clone(),
                                value,
                            );
                            let summary = run
                                .scratchpad
                                .summary(&id)
                                .unwrap_or_default();
                            let content = format!("[result {id}] {summary}");
                            run.emit(AgentEvent::ToolResult {
                                name: call.name.clone(),
                                scratchpad_id: Some(id),
                                summary: content.clone(),
                                is_error: false,
                            });
                            ContentPart::ToolResult {
                                tool_use_id: call.id.clone(),
                                content,
                                is_error: false,
                            }
                        }
                        Err(e) => {
                            let message = format!("tool {} failed: {e}", call.name);
                            run.emit(AgentEvent::ToolResult {
                                name: call.name.clone(),
                                scratchpad_id: None,
                                summary: message.clone(),
                                is_error: true,
                            });
                            ContentPart::ToolResult {
                                tool_use_id: call.id.clone(),
                                content: message,
                                is_error: true,
                            }
                        }
                    }
                }
            };
            parts.push(part);
        }
        Ok(parts)
    }

    /// Serve `get_full_result` / `list_results` from the scratchpad.
    fn serve_drill_down(&self, run: &mut AgentRun, call: &crate::llm::ToolCall) -> ContentPart {
        let content = match call.name.as_str() {
            TOOL_GET_FULL_RESULT => {
                let id = call
                    .arguments
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                match run.scratchpad.get(id) {
                    Some(value) => {
                        // The model asked for this body; keep it resident
                        // through the next compaction.
                        run.scratchpad.pin(id);
                        serde_json::to_string_pretty(&value)
                            .unwrap_or_else(|_| "null".to_owned())
                    }
                    None => format!("null (result {id} unknown or evicted)"),
                }
            }
            TOOL_LIST_RESULTS => {
                let listing = run
                    .scratchpad
                    .entries()
                    .iter()
                    .map(|e| {
                        let state = if e.value.is_some() { "full" } else { "summary-only" };
                        format!("- {} [{}] {}", e.id, state, e.summary)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                if listing.is_empty() {
                    "(no results recorded yet)".to_owned()
                } else {
                    listing
                }
            }
            other => format!("unknown drill-down tool: {other}"),
        };
        ContentPart::ToolResult {
            tool_use_id: call.id.clone(),
            content,
            is_error: false,
        }
    }

    // -----------------------------------------------------------------------
    // Synthesis
    // -----------------------------------------------------------------------

    async fn synthesize(
        &self,
        run: &mut AgentRun,
        query: &str,
        last_content: &str,
    ) -> Result<String, AgentError> {
        run.check_continue()?;

        let mut data = String::new();
        if !last_content.is_empty() {
            data.push_str(last_content);
            data.push('\n');
        }
        for entry in run.scratchpad.entries() {
            data.push_str(&format!("[{}] {}\n", entry.id, entry.summary));
        }

        let answer = if data.trim().is_empty() {
            // Nothing was gathered; the model's own text is the answer.
            if last_content.is_empty() {
                self.llm
                    .complete(&prompts::synthesis(query, "(no data gathered)"))
                    .await?
            } else {
                last_content.to_owned()
            }
        } else {
            self.llm.complete(&prompts::synthesis(query, &data)).await?
        };

        let mut answer = answer;
        answer.push_str(&context::format_citations(&run.citations));
        info!(citations = run.citations.len(), "agent answer synthesized");
        Ok(answer)
    }
}
