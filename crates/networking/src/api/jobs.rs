//! Job API operations with validation

use crate::StoatClient;
use stoat_core::{Error, JobSnapshot, Result, ScanRequest};
use tracing::info;

/// Start a scan of a media directory
///
/// # Arguments
/// * `client` - The Stoat client
/// * `path` - Directory to scan, as seen by the server
/// * `recursive` - Descend into subdirectories
///
/// # Returns
/// The id of the scan job
pub async fn scan_directory(client: &StoatClient, path: &str, recursive: bool) -> Result<String> {
    let path = path.trim();
    if path.is_empty() {
        return Err(Error::InvalidData("Scan path must not be empty".to_string()));
    }

    let request = ScanRequest {
        path: path.to_string(),
        recursive,
    };

    info!("Scanning {} (recursive: {})", path, recursive);
    client.submit_scan(&request).await
}

/// Fetch one job's current snapshot
pub async fn job_status(client: &StoatClient, job_id: &str) -> Result<JobSnapshot> {
    if job_id.trim().is_empty() {
        return Err(Error::InvalidData("Job id must not be empty".to_string()));
    }
    client.get_job_status(job_id).await
}

pub async fn cancel_job(client: &StoatClient, job_id: &str) -> Result<()> {
    if job_id.trim().is_empty() {
        return Err(Error::InvalidData("Job id must not be empty".to_string()));
    }
    info!("Cancelling job {}", job_id);
    client.cancel_job(job_id).await
}
