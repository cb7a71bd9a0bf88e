//! Admission and deduplication layer: configuration, job manager, rate
//! limiter, and the transform job server orchestrating one compute run per
//! request fingerprint.

pub mod config;
pub mod job_manager;
pub mod job_server;
pub mod rate_limiter;
