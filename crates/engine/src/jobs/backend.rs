//! Job backend abstraction and its HTTP implementation

use async_trait::async_trait;
use stoat_core::{JobSnapshot, Result, ScanRequest};
use stoat_networking::{api, StoatClient};

/// Server that runs background jobs
#[async_trait]
pub trait JobBackend: Send + Sync + 'static {
    /// What a job is created from
    type Request: Send + 'static;

    /// Create a job, returning its id
    async fn submit_job(&self, request: Self::Request) -> Result<String>;

    async fn job_status(&self, job_id: &str) -> Result<JobSnapshot>;

    /// Request cancellation. Success only means the request was accepted.
    async fn cancel_job(&self, job_id: &str) -> Result<()>;
}

/// Directory scans over the REST API
#[async_trait]
impl JobBackend for StoatClient {
    type Request = ScanRequest;

    async fn submit_job(&self, request: ScanRequest) -> Result<String> {
        api::scan_directory(self, &request.path, request.recursive).await
    }

    async fn job_status(&self, job_id: &str) -> Result<JobSnapshot> {
        api::job_status(self, job_id).await
    }

    async fn cancel_job(&self, job_id: &str) -> Result<()> {
        api::cancel_job(self, job_id).await
    }
}
