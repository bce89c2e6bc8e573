// SPDX-License-Identifier: MIT OR Apache-2.0
//! Default [`Generator`] wiring.
//!
//! The LLM pipeline that turns API documentation into an adapter
//! descriptor is explicitly out of scope for this gateway.
//! [`UnconfiguredGenerator`] is the seam's default
//! implementation: it fails every job with a clear, actionable message
//! rather than panicking or silently fabricating a descriptor, so the
//! queue and worker can be exercised end to end before a real generation
//! backend is wired in.

use agp_core::GenerationJob;
use agp_error::{AgpError, ErrorCode};
use agp_jobqueue::worker::{Generator, GenerationOutcome, JobLogger};
use async_trait::async_trait;

/// A [`Generator`] that always fails, recording why on the job log.
pub struct UnconfiguredGenerator;

#[async_trait]
impl Generator for UnconfiguredGenerator {
    async fn generate(&self, job: &GenerationJob, log: &dyn JobLogger) -> Result<GenerationOutcome, AgpError> {
        log.log(format!(
            "no generation backend is configured for platform '{}'",
            job.platform
        ))
        .await;
        Err(AgpError::new(
            ErrorCode::Internal,
            "adapter generation backend is not configured",
        )
        .with_context("platform", job.platform.clone()))
    }
}
