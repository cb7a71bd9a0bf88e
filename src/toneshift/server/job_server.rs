//! TransformJobServer - one compute run per request fingerprint
//!
//! The orchestrator tying the core together. For each submitted request it
//! walks the admission ladder: result cache, then the job record (a terminal
//! record is a job-layer cache hit), then the cross-process lock. Exactly one
//! caller in the fleet wins the lock and runs the compute pipeline; everyone
//! else gets the current job snapshot and polls.
//!
//! The server holds no in-process job registry; all coordination state
//! lives in the shared store, so any instance can answer for any job.

use log::{debug, error, info};
use std::sync::Arc;

use crate::toneshift::cache::ResultCache;
use crate::toneshift::pipeline::{TransformArtifact, TransformPipeline, TransformRequest};
use crate::toneshift::server::config::TransformCoreConfig;
use crate::toneshift::server::job_manager::{
    JobManager, JobProgress, JobRecord, JobStatus, compute_job_id,
};
use crate::toneshift::store::SharedStore;

/// What a submission call resolved to.
#[derive(Debug, Clone)]
pub enum TransformOutcome {
    /// A finished artifact, either freshly computed or replayed from the
    /// cache / a terminal job record.
    Completed {
        job_id: String,
        artifact: TransformArtifact,
        from_cache: bool,
    },

    /// Another caller holds the lock; `job` is the snapshot at the time of
    /// the call (`None` when the store could not produce one, e.g. while
    /// degraded). Poll [`TransformJobServer::job_snapshot`] to follow it.
    InFlight {
        job_id: String,
        job: Option<JobRecord>,
    },

    /// The compute pipeline failed, now or on a previous run of this
    /// fingerprint.
    Failed { job_id: String, error: String },
}

/// Orchestrates cache, job manager, lock, and pipeline for transform
/// requests.
pub struct TransformJobServer {
    manager: JobManager,
    cache: ResultCache,
    pipeline: Arc<dyn TransformPipeline>,
}

impl TransformJobServer {
    pub fn new(manager: JobManager, cache: ResultCache, pipeline: Arc<dyn TransformPipeline>) -> Self {
        Self {
            manager,
            cache,
            pipeline,
        }
    }

    /// Build manager and cache over `store` from `config`.
    pub fn with_config(
        store: Arc<dyn SharedStore>,
        pipeline: Arc<dyn TransformPipeline>,
        config: TransformCoreConfig,
    ) -> Self {
        let manager = JobManager::new(store.clone(), config.job_ttl, config.lock_ttl);
        let cache = ResultCache::new(store, config.cache_ttl, config.text_key_prefix_chars);
        Self::new(manager, cache, pipeline)
    }

    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Current job record for a request's fingerprint, for pollers.
    pub async fn job_snapshot(&self, request: &TransformRequest) -> Option<JobRecord> {
        let job_id = compute_job_id(&request.source, &request.persona, &request.options);
        self.manager.get_job(&job_id).await
    }

    /// Run the admission ladder for `request`; at most one concurrent caller
    /// per fingerprint reaches the pipeline.
    pub async fn submit(&self, request: &TransformRequest) -> TransformOutcome {
        let job_id = compute_job_id(&request.source, &request.persona, &request.options);

        if let Some(artifact) = self.cache.get(&request.source, &request.persona).await {
            debug!("Job '{}' served from result cache", job_id);
            return TransformOutcome::Completed {
                job_id,
                artifact,
                from_cache: true,
            };
        }

        // A terminal record is a cache hit at the job layer; it stands until
        // its TTL lapses.
        if let Some(job) = self.manager.get_job(&job_id).await {
            match job.status {
                JobStatus::Done => {
                    if let Some(artifact) = job.result {
                        debug!("Job '{}' replayed from terminal record", job_id);
                        return TransformOutcome::Completed {
                            job_id,
                            artifact,
                            from_cache: false,
                        };
                    }
                    // Done without a payload is an inconsistent record;
                    // fall through and let the lock decide who recomputes.
                }
                JobStatus::Error => {
                    let message = job
                        .error
                        .unwrap_or_else(|| "transformation failed".to_string());
                    return TransformOutcome::Failed {
                        job_id,
                        error: message,
                    };
                }
                JobStatus::Queued | JobStatus::Running => {}
            }
        }

        if !self.manager.acquire_lock(&job_id).await {
            debug!("Job '{}' already in flight elsewhere", job_id);
            return TransformOutcome::InFlight {
                job_id: job_id.clone(),
                job: self.manager.get_job(&job_id).await,
            };
        }

        let outcome = self.run_locked(&job_id, request).await;
        self.manager.release_lock(&job_id).await;
        outcome
    }

    async fn run_locked(&self, job_id: &str, request: &TransformRequest) -> TransformOutcome {
        info!(
            "Starting transform job '{}' ({} source, persona '{}')",
            job_id,
            request.source.kind(),
            request.persona
        );
        self.manager.create_job(job_id).await;

        let progress = JobProgress::new(self.manager.clone(), job_id);
        match self.pipeline.run(request, &progress).await {
            Ok(artifact) => {
                // Cache first so the terminal record's back-reference points
                // at an entry that exists.
                let cache_key = self
                    .cache
                    .set(&request.source, &request.persona, &artifact)
                    .await;
                self.manager
                    .complete_job(job_id, artifact.clone(), Some(cache_key))
                    .await;
                info!("Transform job '{}' completed", job_id);
                TransformOutcome::Completed {
                    job_id: job_id.to_string(),
                    artifact,
                    from_cache: false,
                }
            }
            Err(err) => {
                let message = err.to_string();
                self.manager.fail_job(job_id, &message).await;
                error!("Transform job '{}' failed: {}", job_id, message);
                TransformOutcome::Failed {
                    job_id: job_id.to_string(),
                    error: message,
                }
            }
        }
    }
}
