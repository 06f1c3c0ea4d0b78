//! Prompt templates for the investigation lifecycle.
//!
//! Templates are plain strings with `{name}` placeholders filled by
//! [`super::parser::fill_prompt`]. Each template states the JSON fields
//! the response must carry; the matching parse function in
//! [`super::parser`] validates them. Wording is deliberately compact —
//! context is carried in the filled sections, not the instructions.

use serde_json::json;

use crate::investigation::{Hypothesis, TriageResult};

use super::parser::fill_prompt;

/// Triage: classify the incident from the query and any fetched context.
///
/// Placeholders: `{query}`, `{incident_context}`, `{knowledge_context}`.
pub const TRIAGE_TEMPLATE: &str = "\
You are an SRE triaging a production incident.

## Query
{query}

## Incident Context
{incident_context}

## Organizational Knowledge
{knowledge_context}

Classify the incident. Respond with JSON only:
{\"summary\": string, \"severity\": \"low\"|\"medium\"|\"high\"|\"critical\", \
\"affected_services\": [string], \"symptoms\": [string], \"error_messages\": [string], \
\"time_window\": {\"start\": string, \"end\": string}, \"initial_hypotheses\": [string]}";

/// Hypothesis generation from the triage result.
///
/// Placeholders: `{triage}`, `{knowledge_context}`, `{max_hypotheses}`.
pub const HYPOTHESIZE_TEMPLATE: &str = "\
You are an SRE proposing root-cause hypotheses for an incident.

## Triage
{triage}

## Organizational Knowledge
{knowledge_context}

Propose at most {max_hypotheses} testable hypotheses, most likely first.
For each, plan the queries that would confirm or refute it using the
available tools. Respond with JSON only:
{\"hypotheses\": [{\"statement\": string, \"category\": \"infrastructure\"|\"application\"|\
\"dependency\"|\"configuration\"|\"capacity\"|\"security\"|\"unknown\", \"priority\": 1-5, \
\"planned_queries\": [{\"type\": string, \"description\": string, \"service\": string?, \
\"parameters\": object?}], \"reasoning\": string}], \"reasoning\": string}";

/// Evidence evaluation for one hypothesis against fresh tool results.
///
/// Placeholders: `{hypothesis}`, `{evidence}`, `{iteration}`,
/// `{max_iterations}`.
pub const EVALUATE_TEMPLATE: &str = "\
You are an SRE weighing evidence for a root-cause hypothesis.

## Hypothesis
{hypothesis}

## Evidence (tool results, compact)
{evidence}

Iteration {iteration} of {max_iterations}.
Decide: confirm (strong, conclusive), branch (refine into children),
prune (evidence contradicts), or continue (inconclusive, keep digging).
Respond with JSON only:
{\"hypothesis_id\": string, \"action\": \"continue\"|\"branch\"|\"prune\"|\"confirm\", \
\"evidence_strength\": \"none\"|\"weak\"|\"strong\", \"confidence\": 0-100, \
\"reasoning\": string, \"findings\": [string], \
\"sub_hypotheses\": [{\"statement\": string, \"category\": string, \"priority\": 1-5, \
\"planned_queries\": [object]}]?}";

/// Conclusion over the full evidence chain.
///
/// Placeholders: `{query}`, `{hypotheses}`, `{findings}`,
/// `{tool_summaries}`.
pub const CONCLUDE_TEMPLATE: &str = "\
You are an SRE writing the root-cause conclusion of an investigation.

## Original Query
{query}

## Hypotheses and Statuses
{hypotheses}

## Findings
{findings}

## Tool Result Summaries
{tool_summaries}

Respond with JSON only:
{\"root_cause\": string, \"confidence\": \"low\"|\"medium\"|\"high\", \
\"hypothesis_id\": string, \"evidence_chain\": [{\"finding\": string, \"source\": string, \
\"strength\": \"none\"|\"weak\"|\"strong\"}], \"alternative_explanations\": [string], \
\"unknowns\": [string]}";

/// Remediation planning from the conclusion.
///
/// Placeholders: `{root_cause}`, `{affected_services}`, `{skills}`,
/// `{runbooks}`, `{code_candidates}`.
pub const REMEDIATE_TEMPLATE: &str = "\
You are an SRE planning remediation for a diagnosed incident.

## Root Cause
{root_cause}

## Affected Services
{affected_services}

## Available Skills
{skills}

## Relevant Runbooks
{runbooks}

## Code Fix Candidates
{code_candidates}

Plan ordered, reversible steps. Prefer an available skill over a raw
command; include a rollback for every mutating step. Respond with JSON only:
{\"steps\": [{\"id\": string, \"action\": string, \"description\": string, \
\"command\": string?, \"rollback_command\": string?, \"risk_level\": \"low\"|\"medium\"|\
\"high\"|\"critical\", \"requires_approval\": bool, \"matching_skill\": string?, \
\"matching_runbook\": string?, \"parameters\": object?}], \"monitoring\": [string], \
\"estimated_recovery_time\": string}";

/// Log analysis: narrative over pattern-prefiltered log lines.
///
/// Placeholders: `{total_lines}`, `{pattern_summary}`, `{log_sample}`.
pub const LOG_ANALYSIS_TEMPLATE: &str = "\
You are an SRE reading service logs during an incident.

{total_lines} lines were scanned. Pattern prefilter results:
{pattern_summary}

## Sample Lines
{log_sample}

Respond with JSON only:
{\"summary\": string, \"suggested_hypotheses\": [string], \"anomalies\": [string]}";

/// Final-answer synthesis for the agent loop.
///
/// Placeholders: `{query}`, `{data}`.
pub const SYNTHESIS_TEMPLATE: &str = "\
Answer the user's question from the gathered data. Be direct and
specific; cite concrete values from the data rather than generalities.

## Question
{query}

## Gathered Data
{data}";

/// Error-feedback retry after an unparseable response.
///
/// Placeholders: `{error}`, `{response}`, `{prompt}`.
pub const RETRY_TEMPLATE: &str = "\
Your previous response could not be parsed: {error}

Previous response:
{response}

Answer the original request again, as valid JSON only, with the exact
fields requested.

{prompt}";

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Build the triage prompt.
pub fn triage(query: &str, incident_context: &str, knowledge_context: &str) -> String {
    fill_prompt(
        TRIAGE_TEMPLATE,
        &[
            ("query", query),
            ("incident_context", or_none(incident_context)),
            ("knowledge_context", or_none(knowledge_context)),
        ],
    )
}

/// Build the hypothesis-generation prompt.
pub fn hypothesize(triage: &TriageResult, knowledge_context: &str, max_hypotheses: usize) -> String {
    let triage_json =
        serde_json::to_string_pretty(triage).unwrap_or_else(|_| "{}".to_owned());
    fill_prompt(
        HYPOTHESIZE_TEMPLATE,
        &[
            ("triage", &triage_json),
            ("knowledge_context", or_none(knowledge_context)),
            ("max_hypotheses", &max_hypotheses.to_string()),
        ],
    )
}

/// Build the evidence-evaluation prompt.
pub fn evaluate(
    hypothesis: &Hypothesis,
    evidence: &str,
    iteration: u32,
    max_iterations: u32,
) -> String {
    let hypothesis_json = serde_json::to_string_pretty(&json!({
        "hypothesis_id": hypothesis.id,
        "statement": hypothesis.statement,
        "category": hypothesis.category,
        "priority": hypothesis.priority,
        "reasoning": hypothesis.reasoning,
    }))
    .unwrap_or_else(|_| "{}".to_owned());
    fill_prompt(
        EVALUATE_TEMPLATE,
        &[
            ("hypothesis", &hypothesis_json),
            ("evidence", or_none(evidence)),
            ("iteration", &iteration.to_string()),
            ("max_iterations", &max_iterations.to_string()),
        ],
    )
}

/// Build the conclusion prompt.
pub fn conclude(query: &str, hypotheses: &str, findings: &str, tool_summaries: &str) -> String {
    fill_prompt(
        CONCLUDE_TEMPLATE,
        &[
            ("query", query),
            ("hypotheses", or_none(hypotheses)),
            ("findings", or_none(findings)),
            ("tool_summaries", or_none(tool_summaries)),
        ],
    )
}

/// Build the remediation prompt.
pub fn remediate(
    root_cause: &str,
    affected_services: &str,
    skills: &str,
    runbooks: &str,
    code_candidates: &str,
) -> String {
    fill_prompt(
        REMEDIATE_TEMPLATE,
        &[
            ("root_cause", root_cause),
            ("affected_services", or_none(affected_services)),
            ("skills", or_none(skills)),
            ("runbooks", or_none(runbooks)),
            ("code_candidates", or_none(code_candidates)),
        ],
    )
}

/// Build the log-analysis prompt.
pub fn log_analysis(total_lines: usize, pattern_summary: &str, log_sample: &str) -> String {
    fill_prompt(
        LOG_ANALYSIS_TEMPLATE,
        &[
            ("total_lines", &total_lines.to_string()),
            ("pattern_summary", or_none(pattern_summary)),
            ("log_sample", or_none(log_sample)),
        ],
    )
}

/// Build the agent synthesis prompt.
pub fn synthesis(query: &str, data: &str) -> String {
    fill_prompt(SYNTHESIS_TEMPLATE, &[("query", query), ("data", or_none(data))])
}

/// Build the parse-error retry prompt around the original one.
pub fn retry(original_prompt: &str, bad_response: &str, error: &str) -> String {
    fill_prompt(
        RETRY_TEMPLATE,
        &[
            ("error", error),
            ("response", bad_response),
            ("prompt", original_prompt),
        ],
    )
}

fn or_none(section: &str) -> &str {
    if section.trim().is_empty() {
        "(none)"
    } else {
        section
    }
}
