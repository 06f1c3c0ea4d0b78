//! Checkpoint persistence: suspend and resume investigations.
//!
//! A [`Checkpoint`] is an immutable value snapshot of one investigation.
//! The [`CheckpointStore`] writes snapshots as JSON files under
//! `<base>/checkpoints/<investigation_id>/`, with a sibling `latest.json`
//! maintained by temp-file write plus atomic rename. Reads tolerate
//! missing or corrupt files by returning `None` or skipping the entry.
//!
//! Scratchpad full bodies are deliberately not captured — only their ids.
//! After resume, `get_full_result` returns `None` for those ids, and the
//! loops tolerate that.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CheckpointConfig;
use crate::investigation::{
    Conclusion, EvidenceEvaluation, Hypothesis, Investigation, Phase, PhaseChange,
    RemediationPlan, TriageResult,
};

/// Length of generated checkpoint ids in hex chars.
const CHECKPOINT_ID_LEN: usize = 12;

/// Name of the per-investigation latest pointer file.
const LATEST_FILE: &str = "latest.json";

// ---------------------------------------------------------------------------
// Checkpoint record
// ---------------------------------------------------------------------------

/// Immutable snapshot of an investigation at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Investigation this snapshot belongs to.
    pub investigation_id: String,
    /// Snapshot id (12 hex chars).
    pub checkpoint_id: String,
    /// Monotonic sequence number within the investigation.
    pub sequence: u64,
    /// Phase at capture time.
    pub phase: Phase,
    /// The originating query.
    pub query: String,
    /// Incident id, when investigating a tracked incident.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    /// Flattened hypothesis snapshots.
    #[serde(default)]
    pub hypotheses: Vec<Hypothesis>,
    /// Services discovered so far.
    #[serde(default)]
    pub services_discovered: Vec<String>,
    /// Symptoms identified so far.
    #[serde(default)]
    pub symptoms_identified: Vec<String>,
    /// Scratchpad ids referenced by the run (bodies are not captured).
    #[serde(default)]
    pub scratchpad_ids: Vec<String>,
    /// Evidence evaluations applied so far.
    #[serde(default)]
    pub evaluations: Vec<EvidenceEvaluation>,
    /// Triage result, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage: Option<TriageResult>,
    /// Conclusion, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<Conclusion>,
    /// Remediation snapshot, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_plan: Option<RemediationPlan>,
    /// Root cause, when concluded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    /// Affected services, when triaged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_services: Option<Vec<String>>,
    /// Iterations completed at capture time.
    #[serde(default)]
    pub iterations: u32,
    /// Phase history at capture time.
    #[serde(default)]
    pub phase_history: Vec<PhaseChange>,
    /// Errors recorded at capture time.
    #[serde(default)]
    pub errors: Vec<String>,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// When the investigation was created.
    pub investigation_created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Capture a snapshot of an investigation and the scratchpad ids its
    /// run issued (bodies are not captured).
    pub fn capture(
        investigation: &Investigation,
        scratchpad_ids: Vec<String>,
        sequence: u64,
    ) -> Self {
        let (services, symptoms) = match &investigation.triage {
            Some(t) => (t.affected_services.clone(), t.symptoms.clone()),
            None => (Vec::new(), Vec::new()),
        };
        Self {
            investigation_id: investigation.id.clone(),
            checkpoint_id: generate_checkpoint_id(),
            sequence,
            phase: investigation.phase,
            query: investigation.query.clone(),
            incident_id: investigation.incident_id.clone(),
            hypotheses: investigation.hypotheses.clone(),
            services_discovered: services.clone(),
            symptoms_identified: symptoms,
            scratchpad_ids,
            evaluations: investigation.evaluations.clone(),
            triage: investigation.triage.clone(),
            conclusion: investigation.conclusion.clone(),
            remediation_plan: investigation.remediation_plan.clone(),
            root_cause: investigation
                .conclusion
                .as_ref()
                .map(|c| c.root_cause.clone()),
            affected_services: if services.is_empty() {
                None
            } else {
                Some(services)
            },
            iterations: investigation.iterations,
            phase_history: investigation.phase_history.clone(),
            errors: investigation.errors.clone(),
            created_at: Utc::now(),
            investigation_created_at: investigation.created_at,
        }
    }

    /// Rebuild the investigation aggregate from this snapshot.
    pub fn into_investigation(self) -> Investigation {
        Investigation {
            id: self.investigation_id,
            query: self.query,
            incident_id: self.incident_id,
            phase: self.phase,
            created_at: self.investigation_created_at,
            completed_at: None,
            phase_history: self.phase_history,
            hypotheses: self.hypotheses,
            evaluations: self.evaluations,
            triage: self.triage,
            conclusion: self.conclusion,
            remediation_plan: self.remediation_plan,
            errors: self.errors,
            iterations: self.iterations,
        }
    }
}

/// Generate a 12-hex-char checkpoint id from a cryptographically strong
/// RNG.
pub fn generate_checkpoint_id() -> String {
    let mut rng = rand::thread_rng();
    (0..CHECKPOINT_ID_LEN)
        .map(|_| {
            let digit = rng.gen_range(0..16_u32);
            char::from_digit(digit, 16).unwrap_or('0')
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Listing entry for a stored checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// Snapshot id.
    pub checkpoint_id: String,
    /// Monotonic sequence number.
    pub sequence: u64,
    /// Phase at capture time.
    pub phase: Phase,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

/// Errors from checkpoint persistence.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Filesystem failure.
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Snapshot could not be serialized.
    #[error("checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// File-backed checkpoint store.
///
/// Writes within one investigation directory are serialized by the
/// caller holding the store per run; the `latest.json` pointer is swapped
/// with an atomic rename so readers never observe a torn file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    base: PathBuf,
    config: CheckpointConfig,
}

impl CheckpointStore {
    /// Create a store rooted at `base` (checkpoints live under
    /// `<base>/checkpoints/`).
    pub fn new(base: impl Into<PathBuf>, config: CheckpointConfig) -> Self {
        Self {
            base: base.into(),
            config,
        }
    }

    fn investigation_dir(&self, investigation_id: &str) -> PathBuf {
        self.base.join("checkpoints").join(investigation_id)
    }

    /// Persist a checkpoint; returns its id.
    ///
    /// Updates the `latest.json` pointer and prunes the oldest
    /// checkpoints beyond the configured cap.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] on filesystem or serialization failure.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<String, CheckpointError> {
        let dir = self.investigation_dir(&checkpoint.investigation_id);
        tokio::fs::create_dir_all(&dir).await?;

        let body = serde_json::to_vec_pretty(checkpoint)?;
        let path = dir.join(format!("{}.json", checkpoint.checkpoint_id));
        write_atomic(&path, &body).await?;
        write_atomic(&dir.join(LATEST_FILE), &body).await?;

        debug!(
            investigation_id = %checkpoint.investigation_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            sequence = checkpoint.sequence,
            "checkpoint saved"
        );

        self.prune(&checkpoint.investigation_id).await?;
        Ok(checkpoint.checkpoint_id.clone())
    }

    /// Load one checkpoint; `None` when missing or corrupt.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] only for failures other than the
    /// file being absent.
    pub async fn load(
        &self,
        investigation_id: &str,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self
            .investigation_dir(investigation_id)
            .join(format!("{checkpoint_id}.json"));
        read_checkpoint(&path).await
    }

    /// Load the most recent checkpoint via the `latest.json` pointer,
    /// falling back to the newest listed entry when the pointer is
    /// missing or corrupt.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] on directory read failure.
    pub async fn load_latest(
        &self,
        investigation_id: &str,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let pointer = self.investigation_dir(investigation_id).join(LATEST_FILE);
        if let Some(checkpoint) = read_checkpoint(&pointer).await? {
            return Ok(Some(checkpoint));
        }
        match self.list(investigation_id).await?.first() {
            Some(entry) => self.load(investigation_id, &entry.checkpoint_id).await,
            None => Ok(None),
        }
    }

    /// List checkpoints for an investigation, newest first. Corrupt
    /// files are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] on directory read failure (a
    /// missing directory lists as empty).
    pub async fn list(
        &self,
        investigation_id: &str,
    ) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        let dir = self.investigation_dir(investigation_id);
        let mut entries = Vec::new();

        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(dirent) = read_dir.next_entry().await? {
            let path = dirent.path();
            if path.file_name().and_then(|n| n.to_str()) == Some(LATEST_FILE) {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_checkpoint(&path).await? {
                Some(checkpoint) => entries.push(CheckpointEntry {
                    checkpoint_id: checkpoint.checkpoint_id,
                    sequence: checkpoint.sequence,
                    phase: checkpoint.phase,
                    created_at: checkpoint.created_at,
                }),
                None => {
                    warn!(path = %path.display(), "skipping corrupt checkpoint file");
                }
            }
        }

        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.sequence.cmp(&a.sequence))
        });
        Ok(entries)
    }

    /// List all investigation ids that have checkpoints.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] on directory read failure.
    pub async fn list_investigations(&self) -> Result<Vec<String>, CheckpointError> {
        let root = self.base.join("checkpoints");
        let mut ids = Vec::new();

        let mut read_dir = match tokio::fs::read_dir(&root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(dirent) = read_dir.next_entry().await? {
            if dirent.file_type().await?.is_dir() {
                if let Some(name) = dirent.file_name().to_str() {
                    ids.push(name.to_owned());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Delete one checkpoint. Deleting a missing checkpoint is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] on filesystem failure.
    pub async fn delete(
        &self,
        investigation_id: &str,
        checkpoint_id: &str,
    ) -> Result<(), CheckpointError> {
        let path = self
            .investigation_dir(investigation_id)
            .join(format!("{checkpoint_id}.json"));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every checkpoint for an investigation.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] on filesystem failure.
    pub async fn delete_all(&self, investigation_id: &str) -> Result<(), CheckpointError> {
        let dir = self.investigation_dir(investigation_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the oldest checkpoints beyond the configured cap.
    async fn prune(&self, investigation_id: &str) -> Result<(), CheckpointError> {
        let entries = self.list(investigation_id).await?;
        let cap = self.config.max_checkpoints_per_investigation;
        if entries.len() <= cap {
            return Ok(());
        }
        for entry in entries.iter().skip(cap) {
            debug!(
                investigation_id,
                checkpoint_id = %entry.checkpoint_id,
                "pruning old checkpoint"
            );
            self.delete(investigation_id, &entry.checkpoint_id).await?;
        }
        Ok(())
    }
}

/// Read and decode a checkpoint file; `None` when missing or corrupt.
async fn read_checkpoint(path: &Path) -> Result<Option<Checkpoint>, CheckpointError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&bytes) {
        Ok(checkpoint) => Ok(Some(checkpoint)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt checkpoint file");
            Ok(None)
        }
    }
}

/// Write bytes to `path` via a temp file and atomic rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
