//! Sleuth — a hypothesis-driven incident investigation engine.
//!
//! Given an incident description or a free-form operational query, the
//! engine coordinates an injected LLM client, a tool executor, a knowledge
//! retriever, and an approval channel to produce a root-cause conclusion
//! with an evidence chain and a gated remediation plan.
//!
//! The crate is a library: it performs no network I/O, parses no
//! configuration files, and renders no UI. All external capabilities are
//! supplied by the caller as trait objects:
//!
//! - [`llm::LlmClient`] — `complete` for the orchestrator, `chat` for the agent
//! - [`tools::ToolExecutor`] — named tool execution with JSON parameters
//! - [`knowledge::KnowledgeRetriever`] — runbooks / postmortems / known issues
//! - [`gate::ApprovalChannel`] — human (or automated) mutation approval
//!
//! Two entry points drive an investigation:
//!
//! - [`orchestrator::Orchestrator::investigate`] — the full five-phase
//!   lifecycle (triage → hypothesize → investigate → evaluate → conclude
//!   → remediate) over the [`investigation::machine::StateMachine`].
//! - [`agent::Agent::run`] — iterative tool-calling for free-form queries,
//!   with scratchpad-backed context compaction.
//!
//! Investigations can be suspended and resumed via the
//! [`checkpoint::CheckpointStore`].

pub mod agent;
pub mod cancel;
pub mod checkpoint;
pub mod config;
pub mod gate;
pub mod investigation;
pub mod knowledge;
pub mod llm;
pub mod orchestrator;
pub mod scratchpad;
pub mod tools;
