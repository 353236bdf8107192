//! Submit a scan and follow it to a terminal state

use anyhow::{bail, Result};
use std::sync::Arc;
use stoat_core::{PollSettings, ScanRequest};
use stoat_engine::{JobPoller, PollerPhase, PollerState};
use stoat_networking::StoatClient;
use tracing::{info, warn};

pub async fn run(
    client: StoatClient,
    settings: &PollSettings,
    path: String,
    recursive: bool,
) -> Result<()> {
    let poller = JobPoller::new(Arc::new(client), settings)?;
    let mut states = poller.subscribe();

    poller.submit(ScanRequest { path, recursive });

    let mut interrupted = false;
    let finished = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    warn!("Stopped following the scan; it may still be running on the server");
                    poller.shutdown().await;
                    bail!("scan abandoned");
                }
                interrupted = true;
                if poller.phase() == PollerPhase::Polling {
                    info!("Cancelling scan, press Ctrl-C again to stop waiting");
                    poller.cancel();
                } else {
                    info!("Scan is not cancellable yet, press Ctrl-C again to stop waiting");
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    bail!("job poller stopped unexpectedly");
                }
                let state = states.borrow_and_update().clone();
                report(&state);
                if state.phase.is_terminal() {
                    break state;
                }
            }
        }
    };

    poller.shutdown().await;

    match finished.phase {
        PollerPhase::Completed => {
            let result = finished.job.and_then(|job| job.result);
            if let Some(result) = result {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            Ok(())
        }
        PollerPhase::Cancelled => bail!("scan cancelled"),
        _ => bail!(
            "scan failed: {}",
            finished.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn report(state: &PollerState) {
    match (&state.phase, &state.job) {
        (PollerPhase::Submitting, _) => info!("Submitting scan"),
        (PollerPhase::Cancelling, Some(job)) => info!("Job {} cancelling", job.id),
        (_, Some(job)) => match job.progress {
            Some(progress) => info!("Job {} {} ({})", job.id, job.status, progress),
            None => info!("Job {} {}", job.id, job.status),
        },
        (phase, None) => info!("Scan {:?}", phase),
    }
}
