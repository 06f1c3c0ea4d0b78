//! Investigation orchestrator: drives the five-phase lifecycle.
//!
//! The [`Orchestrator`] is the authoritative investigator. Each call to
//! [`Orchestrator::investigate`] creates a fresh [`StateMachine`],
//! scratchpad, and approval gate, then walks the machine through triage,
//! hypothesis generation, the investigate/evaluate loop, conclusion, and
//! remediation, calling the LLM for judgment and the tool executor for
//! telemetry at every step.
//!
//! Error posture follows the taxonomy in the crate docs: tool failures
//! become evidence and the investigation continues; a response that fails
//! to parse is retried once with error feedback; cancellation and the
//! wall-clock timeout stop the run before the next suspension point and
//! still return a partial, renderable result.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::checkpoint::Checkpoint;
use crate::config::{GateConfig, OrchestratorConfig, ScratchpadConfig};
use crate::gate::{ApprovalChannel, ApprovalGate, GateError};
use crate::investigation::events::InvestigationEvent;
use crate::investigation::machine::{MachineLimits, StateMachine};
use crate::investigation::{
    ConfidenceLevel, EvaluationAction, HypothesisStatus, Investigation, InvestigationError,
    InvestigationResult, Phase, PlannedQuery, RemediationStep,
};
use crate::knowledge::{KnowledgeContext, KnowledgeRetriever};
use crate::llm::parser::{self, ParseError};
use crate::llm::{prompts, LlmClient, LlmError};
use crate::scratchpad::Scratchpad;
use crate::tools::{
    find_code_search_tool, find_incident_tool, find_knowledge_tool, ToolExecutor,
};

pub mod logs;
mod remediation;

pub use logs::{LogAnalysis, LogPatternMatch};

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Decides whether a remediation step may execute without the channel.
pub type StepApprover = Box<dyn Fn(&RemediationStep) -> bool + Send + Sync>;

/// Fetches titles of runbooks relevant to remediation.
pub type RunbookFetcher = Box<dyn Fn(&RunbookContext) -> Vec<String> + Send + Sync>;

/// Context handed to the runbook fetcher.
#[derive(Debug, Clone, Default)]
pub struct RunbookContext {
    /// Incident id, when investigating a tracked incident.
    pub incident_id: Option<String>,
    /// Services the triage marked as affected.
    pub affected_services: Vec<String>,
}

/// Everything an orchestrator needs, bundled to avoid long parameter
/// lists.
pub struct OrchestratorParts {
    /// LLM client (completion capability is sufficient).
    pub llm: Arc<dyn LlmClient>,
    /// Tool executor.
    pub executor: Arc<dyn ToolExecutor>,
    /// Knowledge retriever, when the host has one.
    pub knowledge: Option<Arc<dyn KnowledgeRetriever>>,
    /// Approval channel for remediation mutations.
    pub approval: Option<Arc<dyn ApprovalChannel>>,
    /// Names of the tools the executor serves.
    pub available_tools: Vec<String>,
    /// Names of the skills the `skill` tool can run.
    pub skills: Vec<String>,
    /// Orchestrator configuration.
    pub config: OrchestratorConfig,
    /// Approval gate configuration.
    pub gate_config: GateConfig,
    /// Optional per-step remediation approver.
    pub approve_step: Option<StepApprover>,
    /// Optional runbook title fetcher for remediation prompts.
    pub fetch_runbooks: Option<RunbookFetcher>,
}

impl std::fmt::Debug for OrchestratorParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorParts")
            .field("available_tools", &self.available_tools)
            .field("skills", &self.skills)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Options for a single investigation run.
#[derive(Debug, Default)]
pub struct InvestigateOptions {
    /// Cancellation token checked before every suspension point.
    pub cancel: CancelToken,
    /// Optional event subscriber attached before the run starts.
    pub events: Option<mpsc::UnboundedSender<InvestigationEvent>>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an investigation stopped before completing.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The caller's cancellation token was raised.
    #[error("investigation cancelled")]
    Cancelled,
    /// The per-investigation wall-clock timeout elapsed.
    #[error("investigation timed out")]
    TimedOut,
    /// The LLM produced an unusable response twice in a row.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The LLM client failed.
    #[error(transparent)]
    Llm(#[from] LlmError),
    /// A state-machine invariant was violated.
    #[error(transparent)]
    Machine(#[from] InvestigationError),
    /// The approval gate failed.
    #[error(transparent)]
    Gate(#[from] GateError),
}

impl OrchestratorError {
    /// Event-facing error kind. Timeouts behave as cancellation.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cancelled | Self::TimedOut | Self::Gate(GateError::Cancelled) => "cancelled",
            Self::Parse(_) => "parse",
            Self::Llm(_) | Self::Gate(GateError::Channel(_)) => "fatal",
            Self::Machine(InvestigationError::InvalidTransition { .. }) => "invalid_transition",
            Self::Machine(_) => "fatal",
        }
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Mutable state of one investigation run.
pub(crate) struct Run {
    pub(crate) machine: StateMachine,
    pub(crate) scratchpad: Scratchpad,
    pub(crate) gate: ApprovalGate,
    pub(crate) cancel: CancelToken,
    deadline: Instant,
    started: Instant,
    /// Formatted knowledge sections for prompts, built during triage.
    knowledge_context: String,
    /// Incident title fetched during triage, for knowledge query scoping.
    incident_title: Option<String>,
    /// Hypothesis selected by the current investigate step.
    current_hypothesis: Option<String>,
    /// Compact evidence lines gathered by the current investigate step.
    current_evidence: Vec<String>,
}

impl Run {
    /// Stop before the next suspension point when cancelled or timed out.
    fn check_continue(&self) -> Result<(), OrchestratorError> {
        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(OrchestratorError::TimedOut);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// The authoritative investigator.
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    executor: Arc<dyn ToolExecutor>,
    knowledge: Option<Arc<dyn KnowledgeRetriever>>,
    approval: Option<Arc<dyn ApprovalChannel>>,
    available_tools: Vec<String>,
    skills: Vec<String>,
    config: OrchestratorConfig,
    gate_config: GateConfig,
    approve_step: Option<StepApprover>,
    fetch_runbooks: Option<RunbookFetcher>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("available_tools", &self.available_tools)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build an orchestrator from its parts.
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            llm: parts.llm,
            executor: parts.executor,
            knowledge: parts.knowledge,
            approval: parts.approval,
            available_tools: parts.available_tools,
            skills: parts.skills,
            config: parts.config,
            gate_config: parts.gate_config,
            approve_step: parts.approve_step,
            fetch_runbooks: parts.fetch_runbooks,
        }
    }

    /// Run a full investigation with default options.
    pub async fn investigate(&self, query: &str, incident_id: Option<&str>) -> InvestigationResult {
        self.investigate_with(query, incident_id, InvestigateOptions::default())
            .await
    }

    /// Run a full investigation.
    ///
    /// Always returns a renderable result: on cancellation, timeout, or a
    /// surfaced error, the result carries the partial state and the
    /// error, and a matching `error` event is emitted first.
    pub async fn investigate_with(
        &self,
        query: &str,
        incident_id: Option<&str>,
        options: InvestigateOptions,
    ) -> InvestigationResult {
        let machine = StateMachine::new(query, incident_id.map(str::to_owned), self.limits());
        self.run_machine(machine, options).await
    }

    /// Resume an investigation from a checkpoint.
    ///
    /// The state machine is rebuilt from the snapshot (phase, hypotheses,
    /// triage, conclusion) and driven from the saved phase. Scratchpad
    /// bodies are not restored — drill-down on pre-checkpoint ids returns
    /// nothing, which the loops tolerate.
    pub async fn resume(
        &self,
        checkpoint: Checkpoint,
        options: InvestigateOptions,
    ) -> InvestigationResult {
        info!(
            investigation_id = %checkpoint.investigation_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            phase = %checkpoint.phase,
            "resuming investigation from checkpoint"
        );
        let machine = StateMachine::restore(checkpoint.into_investigation(), self.limits());
        self.run_machine(machine, options).await
    }

    fn limits(&self) -> MachineLimits {
        MachineLimits {
            max_hypotheses: self.config.max_hypotheses,
            max_iterations: self.config.max_iterations,
        }
    }

    async fn run_machine(
        &self,
        machine: StateMachine,
        options: InvestigateOptions,
    ) -> InvestigationResult {
        if let Some(tx) = options.events {
            machine.bus().attach(tx);
        }

        let gate = match &self.approval {
            Some(channel) => ApprovalGate::new(Arc::clone(channel), self.gate_config.clone()),
            None => ApprovalGate::without_channel(self.gate_config.clone()),
        };

        let started = Instant::now();
        let mut run = Run {
            machine,
            scratchpad: Scratchpad::new(ScratchpadConfig::default()),
            gate,
            cancel: options.cancel,
            deadline: started
                .checked_add(self.config.timeout)
                .unwrap_or(started),
            started,
            knowledge_context: String::new(),
            incident_title: None,
            current_hypothesis: None,
            current_evidence: Vec::new(),
        };

        let outcome = self.drive(&mut run).await;
        self.finish(run, outcome)
    }

    // -----------------------------------------------------------------------
    // Phase driver
    // -----------------------------------------------------------------------

    async fn drive(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        if run.machine.investigation().phase == Phase::Idle {
            run.machine.start()?;
        }

        loop {
            match run.machine.investigation().phase {
                Phase::Idle => run.machine.start()?,
                Phase::Triage => {
                    self.phase_triage(run).await?;
                    run.machine
                        .transition_to(Phase::Hypothesize, "triage complete")?;
                }
                Phase::Hypothesize => {
                    let created = self.phase_hypothesize(run).await?;
                    if created == 0 {
                        run.machine
                            .transition_to(Phase::Conclude, "no hypotheses to investigate")?;
                    } else {
                        run.machine
                            .transition_to(Phase::Investigate, "hypotheses generated")?;
                    }
                }
                Phase::Investigate => {
                    if !run.machine.can_continue() {
                        run.machine
                            .transition_to(Phase::Conclude, "iteration budget exhausted")?;
                        continue;
                    }
                    match self.phase_investigate(run).await? {
                        true => run
                            .machine
                            .transition_to(Phase::Evaluate, "queries executed")?,
                        false => run
                            .machine
                            .transition_to(Phase::Conclude, "no active hypotheses")?,
                    }
                }
                Phase::Evaluate => {
                    if run.current_hypothesis.is_none() {
                        // Resumed mid-evaluation without in-flight evidence.
                        run.machine
                            .transition_to(Phase::Investigate, "resumed")?;
                        continue;
                    }
                    self.phase_evaluate(run).await?;
                }
                Phase::Conclude => {
                    self.phase_conclude(run).await?;
                    let concluded = run.machine.investigation().conclusion.is_some();
                    if self.config.enable_remediation && concluded {
                        run.machine
                            .transition_to(Phase::Remediate, "conclusion reached")?;
                    } else {
                        run.machine
                            .transition_to(Phase::Complete, "investigation finished")?;
                    }
                }
                Phase::Remediate => {
                    self.phase_remediate(run).await?;
                    run.machine
                        .transition_to(Phase::Complete, "remediation finished")?;
                }
                Phase::Complete | Phase::Error => return Ok(()),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Triage
    // -----------------------------------------------------------------------

    async fn phase_triage(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        let query = run.machine.investigation().query.clone();
        let incident_id = run.machine.investigation().incident_id.clone();

        // Enrich from the incident tracker when a fetch tool exists.
        let mut incident_context = String::new();
        if let (Some(id), Some(tool)) = (
            incident_id.as_deref(),
            find_incident_tool(&self.available_tools).map(str::to_owned),
        ) {
            run.check_continue()?;
            let params = json!({ "incident_id": id });
            match self.executor.execute(&tool, &params).await {
                Ok(value) => {
                    run.incident_title = value
                        .get("title")
                        .and_then(|t| t.as_str())
                        .map(str::to_owned);
                    run.scratchpad.record(&tool, params, value.clone());
                    incident_context =
                        serde_json::to_string_pretty(&value).unwrap_or_default();
                }
                Err(e) => {
                    // Tool failures are evidence, not fatal.
                    incident_context = format!("tool {tool} failed: {e}");
                }
            }
        }

        // One supplemental knowledge query, scoped without the incident id
        // so results generalize beyond this ticket.
        if let Some(tool) = find_knowledge_tool(&self.available_tools).map(str::to_owned) {
            run.check_continue()?;
            let scoped = scoped_knowledge_query(
                &query,
                incident_id.as_deref(),
                run.incident_title.as_deref(),
            );
            let params = json!({ "query": scoped });
            match self.executor.execute(&tool, &params).await {
                Ok(value) => {
                    let id = run.scratchpad.record(&tool, params, value);
                    if let Some(summary) = run.scratchpad.summary(&id) {
                        run.knowledge_context.push_str(&summary);
                        run.knowledge_context.push('\n');
                    }
                }
                Err(e) => {
                    debug!(error = %e, "knowledge search failed, continuing without it");
                }
            }
        }

        // Retriever bundle, when a retriever is injected.
        if let Some(retriever) = &self.knowledge {
            run.check_continue()?;
            let context = KnowledgeContext {
                query: query.clone(),
                incident_id: incident_id.clone(),
                services: Vec::new(),
                symptoms: Vec::new(),
                error_messages: Vec::new(),
            };
            match retriever.retrieve(&context).await {
                Ok(bundle) if !bundle.is_empty() => {
                    run.knowledge_context.push_str(&bundle.format_for_prompt());
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "knowledge retrieval failed, continuing without it");
                }
            }
        }

        let prompt = prompts::triage(&query, &incident_context, &run.knowledge_context);
        let mut triage = self.call_parse(run, &prompt, parser::parse_triage).await?;
        triage.incident_id = incident_id;
        run.machine.set_triage(triage)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Hypothesize
    // -----------------------------------------------------------------------

    /// Generate hypotheses; returns how many were inserted.
    async fn phase_hypothesize(&self, run: &mut Run) -> Result<usize, OrchestratorError> {
        let Some(triage) = run.machine.investigation().triage.clone() else {
            return Ok(0);
        };

        let existing = run.machine.investigation().hypotheses.len();
        let room = self.config.max_hypotheses.saturating_sub(existing);
        if room == 0 {
            return Ok(0);
        }

        let prompt = prompts::hypothesize(&triage, &run.knowledge_context, room);
        let batch = self.call_parse(run, &prompt, parser::parse_hypotheses).await?;

        let mut created = 0_usize;
        for mut seed in batch.hypotheses {
            // Fresh generations never carry parent links.
            seed.parent_id = None;
            match run.machine.add_hypothesis(seed) {
                Ok(_) => created = created.saturating_add(1),
                Err(InvestigationError::CapExceeded { cap }) => {
                    warn!(cap, "hypothesis cap reached, dropping remaining candidates");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(created)
    }

    // -----------------------------------------------------------------------
    // Investigate
    // -----------------------------------------------------------------------

    /// Execute planned queries for the next hypothesis; `false` when no
    /// active hypothesis remains.
    async fn phase_investigate(&self, run: &mut Run) -> Result<bool, OrchestratorError> {
        let Some(next) = run.machine.next_hypothesis() else {
            return Ok(false);
        };
        let hypothesis_id = next.id.clone();
        let queries = next.planned_queries.clone();
        run.machine.mark_investigating(&hypothesis_id)?;

        run.current_hypothesis = Some(hypothesis_id.clone());
        run.current_evidence.clear();

        for query in &queries {
            run.check_continue()?;
            self.execute_planned_query(run, &hypothesis_id, query).await;
        }
        Ok(true)
    }

    async fn execute_planned_query(&self, run: &mut Run, hypothesis_id: &str, query: &PlannedQuery) {
        let tool = query.query_type.clone();
        run.machine.bus().emit(InvestigationEvent::QueryExecuting {
            hypothesis_id: hypothesis_id.to_owned(),
            tool: tool.clone(),
            description: query.description.clone(),
        });

        let params = query.parameters.clone().unwrap_or_else(|| {
            json!({
                "description": query.description,
                "service": query.service,
            })
        });

        match self.executor.execute(&tool, &params).await {
            Ok(value) => {
                let id = run.scratchpad.record(&tool, params, value);
                if let Some(summary) = run.scratchpad.summary(&id) {
                    run.current_evidence.push(format!("[{id}] {summary}"));
                }
                run.machine.bus().emit(InvestigationEvent::QueryComplete {
                    hypothesis_id: hypothesis_id.to_owned(),
                    tool,
                    scratchpad_id: Some(id),
                    error: None,
                });
            }
            Err(e) => {
                let message = format!("tool {tool} failed: {e}");
                warn!(hypothesis_id, error = %e, "planned query failed");
                run.current_evidence.push(message.clone());
                run.machine.bus().emit(InvestigationEvent::QueryComplete {
                    hypothesis_id: hypothesis_id.to_owned(),
                    tool,
                    scratchpad_id: None,
                    error: Some(message),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Evaluate
    // -----------------------------------------------------------------------

    async fn phase_evaluate(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        let hypothesis_id = run
            .current_hypothesis
            .clone()
            .unwrap_or_default();
        let hypothesis = run
            .machine
            .find_hypothesis(&hypothesis_id)
            .cloned()
            .ok_or(InvestigationError::UnknownHypothesis {
                id: hypothesis_id.clone(),
            })?;

        let evidence = run.current_evidence.join("\n");
        let iteration = run.machine.investigation().iterations.saturating_add(1);
        let prompt = prompts::evaluate(
            &hypothesis,
            &evidence,
            iteration,
            self.config.max_iterations,
        );

        let mut evaluation = self.call_parse(run, &prompt, parser::parse_evaluation).await?;
        // The machine applies by id — pin it to the hypothesis actually
        // under evaluation in case the model echoed a different one.
        evaluation.hypothesis_id = hypothesis_id.clone();
        let action = evaluation.action;
        let confidence = evaluation.confidence;
        run.machine.apply_evaluation(evaluation)?;
        run.machine.increment_iteration();
        run.current_hypothesis = None;
        run.current_evidence.clear();

        match action {
            EvaluationAction::Confirm if confidence >= 80 => {
                run.machine
                    .transition_to(Phase::Conclude, "hypothesis confirmed")?;
            }
            EvaluationAction::Prune => {
                if run.machine.active_hypotheses().is_empty() {
                    let any_confirmed = run
                        .machine
                        .investigation()
                        .hypotheses
                        .iter()
                        .any(|h| h.status == HypothesisStatus::Confirmed);
                    let cap_reached = run.machine.investigation().hypotheses.len()
                        >= self.config.max_hypotheses;
                    if any_confirmed || cap_reached || !run.machine.can_continue() {
                        run.machine
                            .transition_to(Phase::Conclude, "all hypotheses resolved")?;
                    } else {
                        run.machine.transition_to(
                            Phase::Hypothesize,
                            "all hypotheses pruned, generating fresh candidates",
                        )?;
                    }
                } else {
                    run.machine
                        .transition_to(Phase::Investigate, "hypothesis pruned")?;
                }
            }
            EvaluationAction::Branch => {
                run.machine
                    .transition_to(Phase::Investigate, "branched into children")?;
            }
            EvaluationAction::Continue | EvaluationAction::Confirm => {
                if run.machine.can_continue() {
                    run.machine
                        .transition_to(Phase::Investigate, "evidence inconclusive")?;
                } else {
                    run.machine
                        .transition_to(Phase::Conclude, "iteration budget exhausted")?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Conclude
    // -----------------------------------------------------------------------

    async fn phase_conclude(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        let investigation = run.machine.investigation();
        if investigation.hypotheses.is_empty() {
            // Nothing to conclude about; finish with an empty conclusion.
            return Ok(());
        }

        let query = investigation.query.clone();
        let hypotheses_text = investigation
            .hypotheses
            .iter()
            .map(|h| {
                format!(
                    "- {} [{:?}, confidence {}]: {}",
                    h.id, h.status, h.confidence, h.statement
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let findings_text = investigation
            .evaluations
            .iter()
            .flat_map(|e| e.findings.iter())
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n");
        let tool_summaries = run
            .scratchpad
            .entries()
            .iter()
            .map(|e| format!("[{}] {}", e.id, e.summary))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = prompts::conclude(&query, &hypotheses_text, &findings_text, &tool_summaries);
        let mut conclusion = self.call_parse(run, &prompt, parser::parse_conclusion).await?;

        // Anchor the conclusion to a real hypothesis.
        let valid_target = run
            .machine
            .find_hypothesis(&conclusion.hypothesis_id)
            .is_some();
        if conclusion.hypothesis_id.is_empty() || !valid_target {
            if let Some(best) = best_hypothesis(run.machine.investigation()) {
                conclusion.hypothesis_id = best;
            }
        }

        run.machine.set_conclusion(conclusion)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Remediate (implementation in remediation.rs)
    // -----------------------------------------------------------------------

    async fn phase_remediate(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        remediation::run_remediation(self, run).await
    }

    // -----------------------------------------------------------------------
    // Log analysis side capability
    // -----------------------------------------------------------------------

    /// Analyze raw log lines for failure signatures and suggested
    /// hypotheses. Does not read or mutate any investigation state.
    ///
    /// # Errors
    ///
    /// Returns [`logs::LogAnalysisError`] when the LLM fails or its
    /// response does not parse.
    pub async fn analyze_logs(
        &self,
        lines: &[String],
    ) -> Result<LogAnalysis, logs::LogAnalysisError> {
        logs::analyze_logs(self.llm.as_ref(), lines).await
    }

    // -----------------------------------------------------------------------
    // LLM call with one retry on parse failure
    // -----------------------------------------------------------------------

    pub(crate) async fn call_parse<T>(
        &self,
        run: &mut Run,
        prompt: &str,
        parse: fn(&str) -> Result<T, ParseError>,
    ) -> Result<T, OrchestratorError> {
        run.check_continue()?;
        let first = self.llm.complete(prompt).await?;
        match parse(&first) {
            Ok(value) => Ok(value),
            Err(first_err) => {
                warn!(error = %first_err, "LLM response unparseable, retrying with feedback");
                run.check_continue()?;
                let retry_prompt = prompts::retry(prompt, &first, &first_err.to_string());
                let second = self.llm.complete(&retry_prompt).await?;
                parse(&second).map_err(OrchestratorError::from)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Finish
    // -----------------------------------------------------------------------

    fn finish(&self, mut run: Run, outcome: Result<(), OrchestratorError>) -> InvestigationResult {
        if let Err(error) = &outcome {
            let kind = error.kind();
            run.machine.record_error(kind, error.to_string());
            // Cancellation leaves the phase where it stopped so a
            // checkpoint can resume it; everything else terminates.
            if kind != "cancelled" && !run.machine.investigation().phase.is_terminal() {
                let _ = run
                    .machine
                    .transition_to(Phase::Error, error.to_string());
            }
        }

        let investigation = run.machine.investigation().clone();
        let (root_cause, confidence) = match &investigation.conclusion {
            Some(c) => (c.root_cause.clone(), c.confidence),
            None => (String::new(), ConfidenceLevel::Low),
        };
        let duration_ms =
            u64::try_from(run.started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = InvestigationResult {
            investigation_id: investigation.id.clone(),
            root_cause,
            confidence,
            summary: run.machine.summary(),
            duration_ms,
            remediation_plan: investigation.remediation_plan.clone(),
            scratchpad_ids: run.scratchpad.ids(),
            state: investigation,
            error: outcome.err().map(|e| e.to_string()),
        };

        if result.state.phase == Phase::Complete {
            run.machine.bus().emit(InvestigationEvent::Complete {
                result: Box::new(result.clone()),
            });
        }
        info!(
            investigation_id = %result.investigation_id,
            phase = %result.state.phase,
            duration_ms = result.duration_ms,
            "investigation finished"
        );
        result
    }

    // -----------------------------------------------------------------------
    // Checkpointing
    // -----------------------------------------------------------------------

    /// Capture a checkpoint from a (possibly partial) result.
    pub fn checkpoint_from_result(result: &InvestigationResult, sequence: u64) -> Checkpoint {
        Checkpoint::capture(&result.state, result.scratchpad_ids.clone(), sequence)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build the supplemental knowledge query: the user query with any
/// incident id removed, plus the incident title when one was fetched.
/// Keeping the id out makes results generalize beyond this ticket.
fn scoped_knowledge_query(
    query: &str,
    incident_id: Option<&str>,
    incident_title: Option<&str>,
) -> String {
    let mut scoped = query.to_owned();
    if let Some(id) = incident_id {
        if !id.is_empty() {
            scoped = scoped.replace(id, " ");
        }
    }
    let mut scoped = scoped.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some(title) = incident_title {
        if !title.is_empty() {
            scoped.push(' ');
            scoped.push_str(title);
        }
    }
    scoped.trim().to_owned()
}

/// Pick the hypothesis a conclusion should anchor to: a confirmed one if
/// any, else the highest-confidence one, else the first.
fn best_hypothesis(investigation: &Investigation) -> Option<String> {
    investigation
        .hypotheses
        .iter()
        .find(|h| h.status == HypothesisStatus::Confirmed)
        .or_else(|| investigation.hypotheses.iter().max_by_key(|h| h.confidence))
        .map(|h| h.id.clone())
}

/// Find a code-search tool and build candidate URLs for remediation.
pub(crate) async fn code_fix_candidates(
    executor: &Arc<dyn ToolExecutor>,
    available_tools: &[String],
    root_cause: &str,
) -> Vec<String> {
    let Some(tool) = find_code_search_tool(available_tools) else {
        return Vec::new();
    };
    let params = json!({ "query": root_cause });
    match executor.execute(tool, &params).await {
        Ok(value) => extract_urls(&value),
        Err(e) => {
            debug!(error = %e, "code search failed, continuing without candidates");
            Vec::new()
        }
    }
}

/// Pull `url` fields out of a JSON-shaped code-search result.
fn extract_urls(value: &serde_json::Value) -> Vec<String> {
    let mut urls = Vec::new();
    collect_urls(value, &mut urls);
    urls
}

fn collect_urls(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(url) = map.get("url").and_then(|u| u.as_str()) {
                out.push(url.to_owned());
            }
            for nested in map.values() {
                collect_urls(nested, out);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_urls(item, out);
            }
        }
        _ => {}
    }
}
