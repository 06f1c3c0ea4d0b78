//! Scratchpad: per-investigation store of tool-call results.
//!
//! Every tool result is recorded in full and addressed by a short stable
//! id. The LLM only ever sees the derived compact summary; the full body
//! is available through the `get_full_result` drill-down tool until it is
//! evicted by [`Scratchpad::compact`]. Summaries and ids survive eviction,
//! so `list_results` stays complete for the whole run.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;
use tracing::debug;

use crate::config::ScratchpadConfig;

/// Length of generated scratchpad ids.
const SCRATCH_ID_LEN: usize = 6;

/// Approximate characters per token for estimation.
///
/// Intentionally conservative (overestimates) to trigger compaction early
/// rather than late.
const CHARS_PER_TOKEN: u64 = 4;

/// One recorded tool result.
#[derive(Debug, Clone)]
pub struct ScratchpadEntry {
    /// Stable short hex id.
    pub id: String,
    /// Tool that produced the result.
    pub tool_name: String,
    /// Parameters the tool was called with.
    pub params: Value,
    /// When the result was recorded.
    pub observed_at: DateTime<Utc>,
    /// Full result body; `None` once evicted.
    pub value: Option<Value>,
    /// Derived compact summary, always retained.
    pub summary: String,
    /// Token estimate of the full body at record time.
    pub token_estimate: u64,
    /// Pinned entries are never evicted.
    pub pinned: bool,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<ScratchpadEntry>,
    index: HashMap<String, usize>,
}

/// Store and summarize tool results; bound memory growth.
///
/// Uses a sync [`Mutex`] — critical sections are brief and never held
/// across an await.
#[derive(Debug, Default)]
pub struct Scratchpad {
    inner: Mutex<Inner>,
    config: ScratchpadConfig,
}

impl Scratchpad {
    /// Create an empty scratchpad.
    pub fn new(config: ScratchpadConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
        }
    }

    /// Record a full tool result, returning its assigned id.
    ///
    /// Ids are 6 hex chars, unique for the run, and issued in call order.
    pub fn record(&self, tool_name: &str, params: Value, value: Value) -> String {
        let summary_body = summarize_value(&value, self.config.summary_max_chars);
        let summary = format!("{tool_name}: {summary_body}");
        let token_estimate = estimate_value_tokens(&value);

        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = generate_unique_id(&inner.index);
        let entry = ScratchpadEntry {
            id: id.clone(),
            tool_name: tool_name.to_owned(),
            params,
            observed_at: Utc::now(),
            value: Some(value),
            summary,
            token_estimate,
            pinned: false,
        };
        let position = inner.entries.len();
        inner.entries.push(entry);
        inner.index.insert(id.clone(), position);
        id
    }

    /// Retrieve the full result body, or `None` if unknown or evicted.
    pub fn get(&self, id: &str) -> Option<Value> {
        let inner = self.inner.lock().ok()?;
        let position = *inner.index.get(id)?;
        inner.entries.get(position)?.value.clone()
    }

    /// Retrieve the compact summary for an id, if the id was ever issued.
    pub fn summary(&self, id: &str) -> Option<String> {
        let inner = self.inner.lock().ok()?;
        let position = *inner.index.get(id)?;
        Some(inner.entries.get(position)?.summary.clone())
    }

    /// A full snapshot of one entry.
    pub fn entry(&self, id: &str) -> Option<ScratchpadEntry> {
        let inner = self.inner.lock().ok()?;
        let position = *inner.index.get(id)?;
        inner.entries.get(position).cloned()
    }

    /// Every id ever issued this run, in issue order.
    pub fn ids(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(inner) => inner.entries.iter().map(|e| e.id.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// All entries in issue order (summaries always present).
    pub fn entries(&self) -> Vec<ScratchpadEntry> {
        match self.inner.lock() {
            Ok(inner) => inner.entries.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Pin an entry so compaction never evicts it. Returns `false` for an
    /// unknown id.
    pub fn pin(&self, id: &str) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        let Some(&position) = inner.index.get(id) else {
            return false;
        };
        if let Some(entry) = inner.entries.get_mut(position) {
            entry.pinned = true;
            return true;
        }
        false
    }

    /// Current token estimate: full bodies where retained, summaries
    /// where evicted.
    pub fn estimated_tokens(&self) -> u64 {
        match self.inner.lock() {
            Ok(inner) => inner.entries.iter().map(entry_tokens).sum(),
            Err(_) => 0,
        }
    }

    /// Evict oldest non-pinned full bodies until the estimate fits the
    /// budget. Summaries and ids are retained. Returns the evicted ids.
    pub fn compact(&self, budget_tokens: u64) -> Vec<String> {
        let Ok(mut inner) = self.inner.lock() else {
            return Vec::new();
        };
        let mut total: u64 = inner.entries.iter().map(entry_tokens).sum();
        let mut evicted = Vec::new();

        if total <= budget_tokens {
            return evicted;
        }

        for entry in &mut inner.entries {
            if total <= budget_tokens {
                break;
            }
            if entry.pinned || entry.value.is_none() {
                continue;
            }
            entry.value = None;
            let summary_tokens = estimate_str_tokens(&entry.summary);
            total = total
                .saturating_sub(entry.token_estimate)
                .saturating_add(summary_tokens);
            evicted.push(entry.id.clone());
        }

        debug!(
            evicted = evicted.len(),
            remaining_tokens = total,
            "scratchpad compacted"
        );
        evicted
    }
}

fn entry_tokens(entry: &ScratchpadEntry) -> u64 {
    if entry.value.is_some() {
        entry.token_estimate
    } else {
        estimate_str_tokens(&entry.summary)
    }
}

/// Estimate tokens for a JSON value using the chars-per-token heuristic.
fn estimate_value_tokens(value: &Value) -> u64 {
    let chars = serde_json::to_string(value)
        .map(|s| u64::try_from(s.len()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    chars
        .saturating_add(CHARS_PER_TOKEN.saturating_sub(1))
        / CHARS_PER_TOKEN
}

fn estimate_str_tokens(s: &str) -> u64 {
    let chars = u64::try_from(s.len()).unwrap_or(u64::MAX);
    chars
        .saturating_add(CHARS_PER_TOKEN.saturating_sub(1))
        / CHARS_PER_TOKEN
}

/// Generate a 6-hex-char id not already in use.
fn generate_unique_id(index: &HashMap<String, usize>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let id: String = (0..SCRATCH_ID_LEN)
            .map(|_| {
                let digit = rng.gen_range(0..16_u32);
                char::from_digit(digit, 16).unwrap_or('0')
            })
            .collect();
        if !index.contains_key(&id) {
            return id;
        }
    }
}

/// Derive a compact, LLM-visible summary of a tool result.
///
/// Objects show their top-level keys with abbreviated values; arrays show
/// their length and first element. The output is bounded by `max_chars`.
fn summarize_value(value: &Value, max_chars: usize) -> String {
    let body = match value {
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .take(8)
                .map(|(k, v)| format!("{k}={}", abbreviate(v)))
                .collect();
            let mut s = parts.join(", ");
            if map.len() > 8 {
                s.push_str(&format!(", … {} more keys", map.len().saturating_sub(8)));
            }
            s
        }
        Value::Array(items) => match items.first() {
            Some(first) => format!("[{} items] first: {}", items.len(), abbreviate(first)),
            None => "[0 items]".to_owned(),
        },
        other => other.to_string(),
    };
    truncate_chars(&body, max_chars)
}

fn abbreviate(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", truncate_chars(s, 40)),
        Value::Array(items) => format!("[{} items]", items.len()),
        Value::Object(map) => format!("{{{} keys}}", map.len()),
        other => other.to_string(),
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_owned();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}
