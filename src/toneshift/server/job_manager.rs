//! Job identity, cross-process locking, and lifecycle tracking.
//!
//! A *job* is one compute attempt for a specific request fingerprint. The
//! fingerprint doubles as the job id, so any instance in the fleet that sees
//! the same `(source, persona, options)` tuple lands on the same record and
//! the same lock key. Coordination happens entirely through the shared store:
//!
//! - `job:<id>` holds the JSON [`JobRecord`], re-written with a fresh TTL on
//!   every update (sliding expiration: an actively updated job never expires
//!   mid-flight);
//! - `job:lock:<id>` is a TTL-bound sentinel claimed with set-if-absent; its
//!   expiry is the crash-recovery path for a holder that died without
//!   releasing.
//!
//! Every operation here is best-effort against an unreliable store. Lock
//! acquisition fails closed (an unreachable store looks like contention),
//! reads report absence, and writes log and move on. Nothing propagates a
//! [`StoreError`](crate::toneshift::store::StoreError) to callers.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::toneshift::fingerprint::sha256_hex_truncated;
use crate::toneshift::pipeline::{SourceInput, TransformArtifact, TransformOptions};
use crate::toneshift::store::SharedStore;

const JOB_KEY_PREFIX: &str = "job:";
const LOCK_KEY_PREFIX: &str = "job:lock:";
const LOCK_SENTINEL: &str = "1";

/// Hex length of a job id. 64 bits of hash is plenty for dedup identity
/// while keeping store keys and log lines short.
const JOB_ID_CHARS: usize = 16;

/// Derive the deterministic job id for a request tuple.
///
/// Pure: the same `(source, persona, options)` always yields the same id,
/// across processes and across retries. `options` serializes stably (its
/// parameter map is ordered), so two semantically equal requests cannot
/// disagree on identity because of field ordering.
pub fn compute_job_id(source: &SourceInput, persona: &str, options: &TransformOptions) -> String {
    let options_json = serde_json::to_string(options).unwrap_or_default();
    let material = format!(
        "{}\n{}\n{}\n{}",
        source.kind(),
        source.value(),
        persona,
        options_json
    );
    sha256_hex_truncated(&material, JOB_ID_CHARS)
}

/// Lifecycle state of a job.
///
/// Moves queued → running → {done, error}; the two terminal states are
/// absorbing; `update_job` refuses to move a record out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse pipeline stage, informational while a job is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStage {
    Fetch,
    Clean,
    ModelCall,
    Persist,
}

impl JobStage {
    pub fn as_str(&self) -> &str {
        match self {
            JobStage::Fetch => "fetch",
            JobStage::Clean => "clean",
            JobStage::ModelCall => "model-call",
            JobStage::Persist => "persist",
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One compute attempt for a specific request fingerprint, as stored under
/// `job:<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,

    /// Current pipeline stage; meaningful while `status == Running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<JobStage>,

    /// Advisory completion percentage, clamped to 0–100. A late update may
    /// move it backwards; pollers should not assume monotonicity.
    pub progress: u8,

    /// Terminal payload on success. Mutually exclusive with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TransformArtifact>,

    /// Terminal payload on failure. Mutually exclusive with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Key of the cache entry this job produced, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn new(job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            stage: None,
            progress: 0,
            result: None,
            error: None,
            cache_key: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update merged into a [`JobRecord`] by [`JobManager::update_job`].
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub stage: Option<JobStage>,
    pub progress: Option<u8>,
    pub result: Option<TransformArtifact>,
    pub error: Option<String>,
    pub cache_key: Option<String>,
}

impl JobUpdate {
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn stage(mut self, stage: JobStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Manages job records and their mutual-exclusion locks in the shared store.
///
/// Cheap to clone; clones share the same store handle and TTL configuration.
#[derive(Clone)]
pub struct JobManager {
    store: Arc<dyn SharedStore>,
    job_ttl: Duration,
    lock_ttl: Duration,
}

impl JobManager {
    /// `lock_ttl` must be shorter than `job_ttl`; the configuration layer
    /// validates that invariant at startup.
    pub fn new(store: Arc<dyn SharedStore>, job_ttl: Duration, lock_ttl: Duration) -> Self {
        Self {
            store,
            job_ttl,
            lock_ttl,
        }
    }

    pub fn job_ttl(&self) -> Duration {
        self.job_ttl
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    fn job_key(job_id: &str) -> String {
        format!("{}{}", JOB_KEY_PREFIX, job_id)
    }

    fn lock_key(job_id: &str) -> String {
        format!("{}{}", LOCK_KEY_PREFIX, job_id)
    }

    /// Try to claim the lock for `job_id`. Returns `true` iff this caller
    /// now owns it.
    ///
    /// Fails closed: a store error reads as "someone else may be running
    /// it", because duplicate compute is worse than a skipped run the caller
    /// can retry.
    pub async fn acquire_lock(&self, job_id: &str) -> bool {
        match self
            .store
            .set_nx_ex(&Self::lock_key(job_id), LOCK_SENTINEL, self.lock_ttl)
            .await
        {
            Ok(acquired) => {
                debug!(
                    "Lock for job '{}': {}",
                    job_id,
                    if acquired { "acquired" } else { "held elsewhere" }
                );
                acquired
            }
            Err(err) => {
                warn!("Lock acquisition for job '{}' failed closed: {}", job_id, err);
                false
            }
        }
    }

    /// Release the lock for `job_id`. Idempotent; a failed release is logged
    /// and left to the lock's TTL.
    pub async fn release_lock(&self, job_id: &str) {
        if let Err(err) = self.store.del(&Self::lock_key(job_id)).await {
            warn!(
                "Failed to release lock for job '{}' (will expire by TTL): {}",
                job_id, err
            );
        }
    }

    /// Re-apply the lock TTL for a holder that knows it is still running.
    ///
    /// Unconditional: without an ownership token there is no proof the
    /// caller still holds the lock, so only the lock holder may call this.
    /// The base orchestrator does not; it exists for pipelines that outlive
    /// the default lock window.
    pub async fn renew_lock(&self, job_id: &str) -> bool {
        match self
            .store
            .set_ex(&Self::lock_key(job_id), LOCK_SENTINEL, self.lock_ttl)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to renew lock for job '{}': {}", job_id, err);
                false
            }
        }
    }

    /// Write a fresh `queued` record for `job_id`, overwriting any existing
    /// one. Callers that care about dedup semantics check [`get_job`] first.
    ///
    /// [`get_job`]: Self::get_job
    pub async fn create_job(&self, job_id: &str) -> JobRecord {
        self.create_job_with(job_id, JobUpdate::default()).await
    }

    /// Like [`create_job`], with initial fields merged into the fresh record
    /// before the first write.
    ///
    /// [`create_job`]: Self::create_job
    pub async fn create_job_with(&self, job_id: &str, initial: JobUpdate) -> JobRecord {
        let mut record = JobRecord::new(job_id);
        merge_update(&mut record, initial);
        self.write_job(&record).await;
        record
    }

    /// Fetch the record for `job_id`. `None` covers "never existed",
    /// "expired", and "store down or record unparseable" alike; absence is
    /// absence.
    pub async fn get_job(&self, job_id: &str) -> Option<JobRecord> {
        let raw = match self.store.get(&Self::job_key(job_id)).await {
            Ok(value) => value?,
            Err(err) => {
                warn!("Failed to read job '{}': {}", job_id, err);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!("Discarding unparseable record for job '{}': {}", job_id, err);
                None
            }
        }
    }

    /// Merge `update` into the existing record, refresh `updated_at`, and
    /// re-apply the full TTL window.
    ///
    /// No-op with a warning when the job does not exist (updates never
    /// create), and when the update would move a terminal record's status.
    pub async fn update_job(&self, job_id: &str, update: JobUpdate) {
        let Some(mut record) = self.get_job(job_id).await else {
            warn!("Ignoring update for unknown job '{}'", job_id);
            return;
        };

        if let Some(status) = update.status {
            if record.status.is_terminal() && status != record.status {
                warn!(
                    "Job '{}' is already {}; ignoring transition to {}",
                    job_id, record.status, status
                );
                return;
            }
        }
        merge_update(&mut record, update);
        record.updated_at = Utc::now();

        self.write_job(&record).await;
    }

    /// Mark `job_id` as running in `stage` at `progress` percent (clamped).
    pub async fn update_job_progress(&self, job_id: &str, stage: JobStage, progress: u8) {
        self.update_job(
            job_id,
            JobUpdate::default()
                .status(JobStatus::Running)
                .stage(stage)
                .progress(progress),
        )
        .await;
    }

    /// Terminal transition to `done` with the finished artifact.
    pub async fn complete_job(
        &self,
        job_id: &str,
        result: TransformArtifact,
        cache_key: Option<String>,
    ) {
        let mut update = JobUpdate::default()
            .status(JobStatus::Done)
            .progress(100);
        update.result = Some(result);
        update.cache_key = cache_key;
        self.update_job(job_id, update).await;
    }

    /// Terminal transition to `error`. Accepts anything displayable and
    /// normalizes it to a message string on the record.
    pub async fn fail_job(&self, job_id: &str, error: impl std::fmt::Display) {
        let mut update = JobUpdate::default().status(JobStatus::Error);
        update.error = Some(error.to_string());
        self.update_job(job_id, update).await;
    }

    async fn write_job(&self, record: &JobRecord) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(err) => {
                warn!("Failed to serialize job '{}': {}", record.job_id, err);
                return;
            }
        };
        if let Err(err) = self
            .store
            .set_ex(&Self::job_key(&record.job_id), &json, self.job_ttl)
            .await
        {
            warn!("Best-effort write for job '{}' failed: {}", record.job_id, err);
        }
    }
}

/// Merge a partial update into a record. Progress clamps to 100; a terminal
/// payload evicts its counterpart so `result` and `error` stay mutually
/// exclusive.
fn merge_update(record: &mut JobRecord, update: JobUpdate) {
    if let Some(status) = update.status {
        record.status = status;
    }
    if let Some(stage) = update.stage {
        record.stage = Some(stage);
    }
    if let Some(progress) = update.progress {
        record.progress = progress.min(100);
    }
    if let Some(result) = update.result {
        record.result = Some(result);
        record.error = None;
    }
    if let Some(error) = update.error {
        record.error = Some(error);
        record.result = None;
    }
    if let Some(cache_key) = update.cache_key {
        record.cache_key = Some(cache_key);
    }
}

/// Progress reporting handle bound to one job, handed to the compute
/// pipeline by the orchestrator. Forwards to [`JobManager::update_job_progress`];
/// updates are best-effort.
#[derive(Clone)]
pub struct JobProgress {
    manager: JobManager,
    job_id: String,
}

impl JobProgress {
    pub fn new(manager: JobManager, job_id: impl Into<String>) -> Self {
        Self {
            manager,
            job_id: job_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Report the current stage and completion percentage (clamped to 100).
    pub async fn update(&self, stage: JobStage, progress: u8) {
        self.manager
            .update_job_progress(&self.job_id, stage, progress)
            .await;
    }
}
