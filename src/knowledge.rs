//! Knowledge retrieval boundary: runbooks, postmortems, architecture
//! docs, and known issues.
//!
//! The engine consumes a [`KnowledgeRetriever`] and never looks behind
//! it — bundles are formatted into prompt sections and citation lists,
//! nothing more. Scores are the retriever's own ranking on 0..1.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of knowledge document a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeKind {
    /// Operational runbook.
    Runbook,
    /// Incident postmortem.
    Postmortem,
    /// Architecture documentation.
    Architecture,
    /// Known-issue record.
    KnownIssue,
}

/// A ranked chunk of organizational knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    /// Chunk id, unique within the retriever.
    pub id: String,
    /// Id of the document the chunk belongs to.
    pub document_id: String,
    /// Document title.
    pub title: String,
    /// Chunk content.
    pub content: String,
    /// Document kind.
    pub kind: KnowledgeKind,
    /// Services the document covers.
    #[serde(default)]
    pub services: Vec<String>,
    /// Relevance score on 0..1.
    pub score: f64,
    /// Link to the source document, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// Query context handed to the retriever.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeContext {
    /// The search query.
    pub query: String,
    /// Incident id, for retrievers that index incidents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    /// Services in scope.
    #[serde(default)]
    pub services: Vec<String>,
    /// Observed symptoms.
    #[serde(default)]
    pub symptoms: Vec<String>,
    /// Observed error messages.
    #[serde(default)]
    pub error_messages: Vec<String>,
}

/// Ranked knowledge, bucketed by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBundle {
    /// Runbook chunks, ranked.
    #[serde(default)]
    pub runbooks: Vec<KnowledgeChunk>,
    /// Postmortem chunks, ranked.
    #[serde(default)]
    pub postmortems: Vec<KnowledgeChunk>,
    /// Architecture chunks, ranked.
    #[serde(default)]
    pub architecture: Vec<KnowledgeChunk>,
    /// Known-issue chunks, ranked.
    #[serde(default)]
    pub known_issues: Vec<KnowledgeChunk>,
}

impl KnowledgeBundle {
    /// Whether every bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.runbooks.is_empty()
            && self.postmortems.is_empty()
            && self.architecture.is_empty()
            && self.known_issues.is_empty()
    }

    /// All chunks across buckets, in bucket order.
    pub fn all_chunks(&self) -> impl Iterator<Item = &KnowledgeChunk> {
        self.runbooks
            .iter()
            .chain(self.postmortems.iter())
            .chain(self.architecture.iter())
            .chain(self.known_issues.iter())
    }

    /// Render the bundle as prompt sections, one per non-empty bucket.
    pub fn format_for_prompt(&self) -> String {
        let mut sections: Vec<String> = Vec::new();
        for (label, bucket) in [
            ("Runbooks", &self.runbooks),
            ("Postmortems", &self.postmortems),
            ("Architecture", &self.architecture),
            ("Known Issues", &self.known_issues),
        ] {
            if bucket.is_empty() {
                continue;
            }
            let mut section = format!("### {label}\n");
            for chunk in bucket {
                section.push_str(&format!("- {}: {}\n", chunk.title, chunk.content));
            }
            sections.push(section);
        }
        sections.join("\n")
    }

    /// Deduplicated citations, keyed by document id, in bucket order.
    pub fn citations(&self) -> Vec<Citation> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for chunk in self.all_chunks() {
            if seen.insert(chunk.document_id.clone()) {
                out.push(Citation {
                    document_id: chunk.document_id.clone(),
                    title: chunk.title.clone(),
                    source_url: chunk.source_url.clone(),
                });
            }
        }
        out
    }
}

/// A deduplicated source reference for the final answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Document id the citation points at.
    pub document_id: String,
    /// Document title.
    pub title: String,
    /// Link to the source, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// Errors from an injected retriever.
#[derive(Debug, thiserror::Error)]
#[error("knowledge retrieval failed: {0}")]
pub struct KnowledgeError(pub String);

/// Injected retrieval capability.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Retrieve ranked knowledge for the given context.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError`] when the backing store is unavailable.
    /// Callers treat failures as an empty bundle — knowledge is
    /// supplemental, never required.
    async fn retrieve(&self, context: &KnowledgeContext) -> Result<KnowledgeBundle, KnowledgeError>;
}
