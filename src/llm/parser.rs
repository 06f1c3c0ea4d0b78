//! Structured-response parsing for LLM free text.
//!
//! The orchestrator's prompts ask for JSON, but models wrap it in prose,
//! markdown fences, or reasoning tags. Extraction tries, in order: a
//! fenced block labeled `json`, any fenced block, then the first balanced
//! `{…}` or `[…]` substring found by bracket counting.
//!
//! Each of the six investigation shapes has its own parse function.
//! Validation is strict on closed sets and numeric ranges so a drifting
//! model fails loudly; unknown extra fields are tolerated. Failure kinds
//! are distinct [`ParseError`] variants so the orchestrator can decide
//! whether an error-feedback retry is worthwhile.

use serde_json::Value;

use crate::gate::RiskLevel;
use crate::investigation::{
    Conclusion, ConfidenceLevel, EvaluationAction, EvidenceEvaluation, EvidenceRef,
    EvidenceStrength, HypothesisCategory, HypothesisSeed, PlannedQuery, RemediationPlan,
    RemediationStep, Severity, StepStatus, TimeWindow, TriageResult,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an LLM response could not be parsed into the expected shape.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// No JSON found anywhere in the response.
    #[error("no JSON found in response: {snippet}")]
    NoJson {
        /// Leading snippet of the offending response.
        snippet: String,
    },

    /// JSON located but not syntactically valid.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// A required field is absent or null.
    #[error("missing required field: {field}")]
    MissingField {
        /// The absent field.
        field: &'static str,
    },

    /// A numeric field is outside its declared range.
    #[error("field {field} out of range: {value} (expected {min}..={max})")]
    OutOfRange {
        /// The offending field.
        field: &'static str,
        /// The value the model produced.
        value: i64,
        /// Inclusive minimum.
        min: i64,
        /// Inclusive maximum.
        max: i64,
    },

    /// An enumerated field holds a value outside its closed set.
    #[error("field {field} has unknown value: {value}")]
    UnknownEnum {
        /// The offending field.
        field: &'static str,
        /// The value the model produced.
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Locate the JSON payload inside an LLM response.
///
/// # Errors
///
/// Returns [`ParseError::NoJson`] when no candidate is found.
pub fn extract_json(text: &str) -> Result<&str, ParseError> {
    if let Some(block) = fenced_block(text, true).or_else(|| fenced_block(text, false)) {
        return Ok(block);
    }
    if let Some(span) = balanced_span(text) {
        return Ok(span);
    }
    Err(ParseError::NoJson {
        snippet: truncate_for_error(text, 120).to_owned(),
    })
}

/// Extract the contents of a markdown code fence.
///
/// With `labeled`, only a fence opened as ```` ```json ```` matches.
fn fenced_block(text: &str, labeled: bool) -> Option<&str> {
    let marker = if labeled { "```json" } else { "```" };
    let open = text.find(marker)?;
    let after = open.checked_add(marker.len())?;
    let rest = text.get(after..)?;
    // Skip the remainder of the fence line (language tag, newline).
    let body_start = rest.find('\n').map(|p| p.saturating_add(1)).unwrap_or(0);
    let body = rest.get(body_start..)?;
    let close = body.find("```")?;
    Some(body.get(..close)?.trim())
}

/// Find the first balanced `{…}` or `[…]` span via bracket counting,
/// skipping brackets inside string literals.
fn balanced_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = *bytes.get(start)?;
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth: u32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes.get(start..)?.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            _ if b == open => depth = depth.saturating_add(1),
            _ if b == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start.saturating_add(offset).saturating_add(1);
                    return text.get(start..end);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract and decode the JSON payload as a [`Value`].
fn extract_value(text: &str) -> Result<Value, ParseError> {
    let raw = extract_json(text)?;
    serde_json::from_str(raw).map_err(|e| ParseError::InvalidJson(e.to_string()))
}

/// Truncate a string for inclusion in an error message.
fn truncate_for_error(s: &str, max_len: usize) -> &str {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ---------------------------------------------------------------------------
// Prompt filling
// ---------------------------------------------------------------------------

/// Fill `{name}` placeholders in a template with literal values.
///
/// Substitution is literal — no escaping is applied, and placeholders
/// without a matching name are left intact.
pub fn fill_prompt(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_owned();
    for (name, value) in values {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn require_str(obj: &Value, field: &'static str) -> Result<String, ParseError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err(ParseError::MissingField { field }),
    }
}

/// Optional string: null and absent both normalize to `None`.
fn opt_str(obj: &Value, field: &str) -> Option<String> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// List of strings; a bare string coerces to a one-element list.
fn str_list(obj: &Value, field: &str) -> Vec<String> {
    match obj.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn bounded_int(
    obj: &Value,
    field: &'static str,
    min: i64,
    max: i64,
    default: Option<i64>,
) -> Result<i64, ParseError> {
    let value = match obj.get(field) {
        Some(Value::Number(n)) => n.as_i64().ok_or(ParseError::MissingField { field })?,
        Some(Value::Null) | None => default.ok_or(ParseError::MissingField { field })?,
        Some(_) => return Err(ParseError::MissingField { field }),
    };
    if value < min || value > max {
        return Err(ParseError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

fn confidence_field(obj: &Value, field: &'static str) -> Result<u8, ParseError> {
    let v = bounded_int(obj, field, 0, 100, Some(0))?;
    Ok(u8::try_from(v).unwrap_or(0))
}

fn enum_field<T>(
    obj: &Value,
    field: &'static str,
    parse: impl Fn(&str) -> Option<T>,
    default: Option<T>,
) -> Result<T, ParseError> {
    match obj.get(field) {
        Some(Value::String(s)) => parse(&s.to_lowercase()).ok_or_else(|| ParseError::UnknownEnum {
            field,
            value: s.clone(),
        }),
        Some(Value::Null) | None => default.ok_or(ParseError::MissingField { field }),
        Some(other) => Err(ParseError::UnknownEnum {
            field,
            value: other.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Shape: triage
// ---------------------------------------------------------------------------

/// Parse a triage response.
///
/// Required: `summary`, `severity`. Everything else is optional and
/// normalizes to empty lists or `None`.
///
/// # Errors
///
/// Returns [`ParseError`] on missing JSON, missing required fields, or an
/// unknown severity.
pub fn parse_triage(text: &str) -> Result<TriageResult, ParseError> {
    let v = extract_value(text)?;
    let severity = enum_field(&v, "severity", parse_severity, None)?;
    let time_window = v.get("time_window").and_then(|tw| {
        let start = opt_str(tw, "start")?;
        let end = opt_str(tw, "end").unwrap_or_else(|| "now".to_owned());
        Some(TimeWindow { start, end })
    });

    Ok(TriageResult {
        incident_id: opt_str(&v, "incident_id"),
        summary: require_str(&v, "summary")?,
        severity,
        affected_services: str_list(&v, "affected_services"),
        symptoms: str_list(&v, "symptoms"),
        error_messages: str_list(&v, "error_messages"),
        time_window,
        initial_hypotheses: str_list(&v, "initial_hypotheses"),
    })
}

fn parse_severity(s: &str) -> Option<Severity> {
    match s {
        "low" => Some(Severity::Low),
        "medium" => Some(Severity::Medium),
        "high" => Some(Severity::High),
        "critical" => Some(Severity::Critical),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Shape: hypothesis generation
// ---------------------------------------------------------------------------

/// A batch of generated hypotheses with the generator's reasoning.
#[derive(Debug, Clone)]
pub struct HypothesisBatch {
    /// Generated hypothesis seeds, in response order.
    pub hypotheses: Vec<HypothesisSeed>,
    /// Why the model proposed this set.
    pub reasoning: Option<String>,
}

/// Parse a hypothesis-generation response.
///
/// Accepts either `{"hypotheses": [...], "reasoning": ...}` or a bare
/// array of hypothesis objects.
///
/// # Errors
///
/// Returns [`ParseError`] when no hypothesis carries a statement, a
/// category is outside the closed set, or a priority is outside 1..5.
pub fn parse_hypotheses(text: &str) -> Result<HypothesisBatch, ParseError> {
    let v = extract_value(text)?;
    let (items, reasoning) = match &v {
        Value::Array(items) => (items.clone(), None),
        Value::Object(_) => {
            let items = match v.get("hypotheses") {
                Some(Value::Array(items)) => items.clone(),
                _ => return Err(ParseError::MissingField { field: "hypotheses" }),
            };
            (items, opt_str(&v, "reasoning"))
        }
        _ => return Err(ParseError::InvalidJson("expected object or array".to_owned())),
    };

    let mut hypotheses = Vec::with_capacity(items.len());
    for item in &items {
        hypotheses.push(parse_seed(item)?);
    }
    if hypotheses.is_empty() {
        return Err(ParseError::MissingField { field: "hypotheses" });
    }

    Ok(HypothesisBatch {
        hypotheses,
        reasoning,
    })
}

fn parse_seed(item: &Value) -> Result<HypothesisSeed, ParseError> {
    let priority = bounded_int(item, "priority", 1, 5, Some(3))?;
    Ok(HypothesisSeed {
        statement: require_str(item, "statement")?,
        category: enum_field(
            item,
            "category",
            HypothesisCategory::parse,
            Some(HypothesisCategory::Unknown),
        )?,
        priority: u8::try_from(priority).unwrap_or(3),
        parent_id: opt_str(item, "parent_id"),
        planned_queries: planned_queries(item),
        reasoning: opt_str(item, "reasoning"),
    })
}

fn planned_queries(item: &Value) -> Vec<PlannedQuery> {
    let Some(Value::Array(queries)) = item.get("planned_queries") else {
        return Vec::new();
    };
    queries
        .iter()
        .filter_map(|q| {
            Some(PlannedQuery {
                query_type: opt_str(q, "type")?,
                description: opt_str(q, "description").unwrap_or_default(),
                service: opt_str(q, "service"),
                parameters: q.get("parameters").filter(|p| !p.is_null()).cloned(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Shape: evidence evaluation
// ---------------------------------------------------------------------------

/// Parse an evidence-evaluation response.
///
/// Required: `hypothesis_id`, `action`, `evidence_strength`, `confidence`.
/// `sub_hypotheses` is only meaningful with `action = "branch"`.
///
/// # Errors
///
/// Returns [`ParseError`] on missing fields, unknown enum values, or a
/// confidence outside 0..100.
pub fn parse_evaluation(text: &str) -> Result<EvidenceEvaluation, ParseError> {
    let v = extract_value(text)?;
    let action = enum_field(&v, "action", EvaluationAction::parse, None)?;
    let evidence_strength = enum_field(
        &v,
        "evidence_strength",
        EvidenceStrength::parse,
        Some(EvidenceStrength::Pending),
    )?;

    let sub_hypotheses = match v.get("sub_hypotheses") {
        Some(Value::Array(items)) if action == EvaluationAction::Branch => {
            let mut seeds = Vec::with_capacity(items.len());
            for item in items {
                seeds.push(parse_seed(item)?);
            }
            seeds
        }
        _ => Vec::new(),
    };

    Ok(EvidenceEvaluation {
        hypothesis_id: require_str(&v, "hypothesis_id")?,
        evidence_strength,
        confidence: confidence_field(&v, "confidence")?,
        reasoning: opt_str(&v, "reasoning").unwrap_or_default(),
        action,
        findings: str_list(&v, "findings"),
        sub_hypotheses,
    })
}

// ---------------------------------------------------------------------------
// Shape: conclusion
// ---------------------------------------------------------------------------

/// Parse a conclusion response.
///
/// Required: `root_cause`, `confidence`. `hypothesis_id` may be absent —
/// the orchestrator substitutes the confirmed hypothesis.
///
/// # Errors
///
/// Returns [`ParseError`] on missing fields or an unknown confidence.
pub fn parse_conclusion(text: &str) -> Result<Conclusion, ParseError> {
    let v = extract_value(text)?;
    let confidence = enum_field(&v, "confidence", ConfidenceLevel::parse, None)?;

    let evidence_chain = match v.get("evidence_chain") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|e| {
                Some(EvidenceRef {
                    finding: opt_str(e, "finding")?,
                    source: opt_str(e, "source").unwrap_or_else(|| "investigation".to_owned()),
                    strength: e
                        .get("strength")
                        .and_then(Value::as_str)
                        .and_then(EvidenceStrength::parse)
                        .unwrap_or(EvidenceStrength::Weak),
                })
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(Conclusion {
        root_cause: require_str(&v, "root_cause")?,
        confidence,
        hypothesis_id: opt_str(&v, "hypothesis_id").unwrap_or_default(),
        evidence_chain,
        alternative_explanations: str_list(&v, "alternative_explanations"),
        unknowns: str_list(&v, "unknowns"),
    })
}

// ---------------------------------------------------------------------------
// Shape: remediation
// ---------------------------------------------------------------------------

/// Parse a remediation-plan response.
///
/// Steps without an explicit id are assigned `s_1…s_N` by position.
///
/// # Errors
///
/// Returns [`ParseError`] when the step list is absent or a step lacks a
/// description, or a risk level is outside the closed set.
pub fn parse_remediation(text: &str) -> Result<RemediationPlan, ParseError> {
    let v = extract_value(text)?;
    let items = match v.get("steps") {
        Some(Value::Array(items)) => items.clone(),
        _ => return Err(ParseError::MissingField { field: "steps" }),
    };

    let mut steps = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let fallback_id = format!("s_{}", index.saturating_add(1));
        steps.push(RemediationStep {
            id: opt_str(item, "id").unwrap_or(fallback_id),
            action: opt_str(item, "action").unwrap_or_else(|| "remediate".to_owned()),
            description: require_str(item, "description")?,
            command: opt_str(item, "command"),
            rollback_command: opt_str(item, "rollback_command"),
            risk_level: enum_field(item, "risk_level", RiskLevel::parse, Some(RiskLevel::Medium))?,
            requires_approval: item
                .get("requires_approval")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            matching_skill: opt_str(item, "matching_skill"),
            matching_runbook: opt_str(item, "matching_runbook"),
            parameters: item.get("parameters").filter(|p| !p.is_null()).cloned(),
            status: StepStatus::Pending,
            result: None,
            error: None,
        });
    }

    Ok(RemediationPlan {
        steps,
        monitoring: str_list(&v, "monitoring"),
        estimated_recovery_time: opt_str(&v, "estimated_recovery_time"),
    })
}

// ---------------------------------------------------------------------------
// Shape: log analysis
// ---------------------------------------------------------------------------

/// The LLM's contribution to a log analysis.
#[derive(Debug, Clone, Default)]
pub struct LogAnalysisRecord {
    /// Narrative summary of what the logs show.
    pub summary: String,
    /// Root-cause hypotheses the logs suggest.
    pub suggested_hypotheses: Vec<String>,
    /// Notable anomalies called out by the model.
    pub anomalies: Vec<String>,
}

/// Parse a log-analysis response.
///
/// # Errors
///
/// Returns [`ParseError`] when no JSON is found or `summary` is absent.
pub fn parse_log_analysis(text: &str) -> Result<LogAnalysisRecord, ParseError> {
    let v = extract_value(text)?;
    Ok(LogAnalysisRecord {
        summary: require_str(&v, "summary")?,
        suggested_hypotheses: str_list(&v, "suggested_hypotheses"),
        anomalies: str_list(&v, "anomalies"),
    })
}
