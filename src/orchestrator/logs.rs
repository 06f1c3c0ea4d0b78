//! Log analysis: rule-based pattern prefilter plus one LLM pass.
//!
//! Eight regex rules detect common failure signatures without an LLM
//! call; their counts and sample lines are handed to the model, which
//! contributes the narrative and suggested hypotheses. The capability is
//! stateless — it never touches an investigation.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::llm::parser::{self, ParseError};
use crate::llm::{prompts, LlmClient, LlmError};

/// Maximum raw log lines embedded in the prompt.
const MAX_SAMPLE_LINES: usize = 40;

/// One rule of the prefilter table.
struct PatternRule {
    name: &'static str,
    pattern: &'static str,
}

/// Failure signatures worth counting before the LLM ever sees the logs.
const PATTERN_RULES: &[PatternRule] = &[
    PatternRule { name: "error", pattern: r"(?i)\berror\b" },
    PatternRule { name: "exception", pattern: r"(?i)\bexception\b|panicked at" },
    PatternRule { name: "timeout", pattern: r"(?i)\btime[d]? ?out\b" },
    PatternRule { name: "oom", pattern: r"(?i)out of memory|oom[- ]?kill" },
    PatternRule {
        name: "connection_refused",
        pattern: r"(?i)connection (refused|reset|closed)",
    },
    PatternRule { name: "http_5xx", pattern: r"\b5\d{2}\b" },
    PatternRule {
        name: "throttling",
        pattern: r"(?i)throttl|rate limit|too many requests",
    },
    PatternRule {
        name: "disk_pressure",
        pattern: r"(?i)no space left|disk full",
    },
];

/// A matched prefilter pattern with its count and first sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPatternMatch {
    /// Rule name.
    pub pattern: String,
    /// How many lines matched.
    pub count: usize,
    /// First matching line.
    pub sample: String,
}

/// Combined rule-based and LLM log analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogAnalysis {
    /// Lines scanned.
    pub total_lines: usize,
    /// Prefilter matches, in rule-table order.
    pub pattern_matches: Vec<LogPatternMatch>,
    /// LLM narrative summary.
    pub summary: String,
    /// Root-cause hypotheses the logs suggest.
    pub suggested_hypotheses: Vec<String>,
    /// Anomalies the model called out.
    pub anomalies: Vec<String>,
}

/// Errors from log analysis.
#[derive(Debug, thiserror::Error)]
pub enum LogAnalysisError {
    /// The LLM client failed.
    #[error(transparent)]
    Llm(#[from] LlmError),
    /// The LLM response was unusable.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Run the rule table over the lines.
pub fn prefilter_patterns(lines: &[String]) -> Vec<LogPatternMatch> {
    PATTERN_RULES
        .iter()
        .filter_map(|rule| {
            let regex = Regex::new(rule.pattern).ok()?;
            let mut count = 0_usize;
            let mut sample = None;
            for line in lines {
                if regex.is_match(line) {
                    count = count.saturating_add(1);
                    if sample.is_none() {
                        sample = Some(line.clone());
                    }
                }
            }
            if count == 0 {
                return None;
            }
            Some(LogPatternMatch {
                pattern: rule.name.to_owned(),
                count,
                sample: sample.unwrap_or_default(),
            })
        })
        .collect()
}

/// Analyze log lines: prefilter, then one LLM call for the narrative.
///
/// # Errors
///
/// Returns [`LogAnalysisError`] when the LLM fails or its response does
/// not parse.
pub async fn analyze_logs(
    llm: &dyn LlmClient,
    lines: &[String],
) -> Result<LogAnalysis, LogAnalysisError> {
    let matches = prefilter_patterns(lines);

    let pattern_summary = matches
        .iter()
        .map(|m| format!("- {}: {} lines (e.g. {})", m.pattern, m.count, m.sample))
        .collect::<Vec<_>>()
        .join("\n");

    // Prefer matched lines in the sample; pad with the head of the log.
    let mut sample: Vec<&str> = matches.iter().map(|m| m.sample.as_str()).collect();
    for line in lines {
        if sample.len() >= MAX_SAMPLE_LINES {
            break;
        }
        if !sample.contains(&line.as_str()) {
            sample.push(line);
        }
    }

    let prompt = prompts::log_analysis(lines.len(), &pattern_summary, &sample.join("\n"));
    let response = llm.complete(&prompt).await?;
    let record = parser::parse_log_analysis(&response)?;

    Ok(LogAnalysis {
        total_lines: lines.len(),
        pattern_matches: matches,
        summary: record.summary,
        suggested_hypotheses: record.suggested_hypotheses,
        anomalies: record.anomalies,
    })
}
