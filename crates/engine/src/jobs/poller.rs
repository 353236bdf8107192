//! Fixed-interval poller for one background job

use super::JobBackend;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stoat_core::{Error, Job, JobSnapshot, JobStatus, JobUpdate, PollSettings, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the poller is in a job's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerPhase {
    Idle,
    Submitting,
    Polling,
    /// Cancel requested; still polling until the server confirms
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl PollerPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PollerPhase::Completed | PollerPhase::Failed | PollerPhase::Cancelled
        )
    }

    fn from_terminal(status: JobStatus) -> Self {
        match status {
            JobStatus::Completed => PollerPhase::Completed,
            JobStatus::Cancelled => PollerPhase::Cancelled,
            _ => PollerPhase::Failed,
        }
    }
}

/// Observable poller state
#[derive(Debug, Clone, PartialEq)]
pub struct PollerState {
    pub phase: PollerPhase,
    /// Set once the server has accepted the job
    pub job: Option<Job>,
    /// Why the poller ended in `Failed`
    pub error: Option<String>,
}

impl PollerState {
    fn idle() -> Self {
        Self {
            phase: PollerPhase::Idle,
            job: None,
            error: None,
        }
    }
}

enum Command {
    Cancel,
}

// ─── Shared ──────────────────────────────────────────────────────────

struct Shared {
    state_tx: watch::Sender<PollerState>,
    cancel: CancellationToken,
}

impl Shared {
    /// Mutate the state unless the poller has been torn down
    fn update(&self, f: impl FnOnce(&mut PollerState) -> bool) -> bool {
        self.state_tx
            .send_if_modified(|state| !self.cancel.is_cancelled() && f(state))
    }

    fn phase(&self) -> PollerPhase {
        self.state_tx.borrow().phase
    }
}

// ─── Handle ──────────────────────────────────────────────────────────

/// Tracks one submitted job to completion, failure, or cancellation.
///
/// Dropping the poller tears it down.
pub struct JobPoller<B: JobBackend> {
    shared: Arc<Shared>,
    backend: Arc<B>,
    interval: Duration,
    max_consecutive_failures: Option<u32>,
    command_tx: mpsc::UnboundedSender<Command>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<B: JobBackend> JobPoller<B> {
    /// Create an idle poller. A zero poll interval is rejected.
    pub fn new(backend: Arc<B>, settings: &PollSettings) -> Result<Self> {
        if settings.interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "Poll interval must be positive".to_string(),
            ));
        }

        let (state_tx, _) = watch::channel(PollerState::idle());
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Ok(Self {
            shared: Arc::new(Shared {
                state_tx,
                cancel: CancellationToken::new(),
            }),
            backend,
            interval: settings.interval(),
            max_consecutive_failures: settings.max_consecutive_failures,
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            task: Mutex::new(None),
        })
    }

    /// Submit the job and start polling it.
    ///
    /// Only valid once, from `Idle`; later calls are ignored and return
    /// `false`. Must be called from within a tokio runtime.
    pub fn submit(&self, request: B::Request) -> bool {
        let started = self.shared.update(|state| {
            if state.phase != PollerPhase::Idle {
                return false;
            }
            state.phase = PollerPhase::Submitting;
            true
        });
        if !started {
            debug!("submit() ignored in phase {:?}", self.shared.phase());
            return false;
        }

        let commands = match self.command_rx.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(commands) = commands else {
            return false;
        };

        let task = tokio::spawn(run_job(
            self.shared.clone(),
            self.backend.clone(),
            request,
            self.interval,
            self.max_consecutive_failures,
            commands,
        ));

        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(task);
        }
        true
    }

    /// Ask the server to cancel the job.
    ///
    /// Only meaningful while polling. The terminal state still comes from a
    /// poll, so a job that finishes first ends `Completed`.
    pub fn cancel(&self) {
        if self.shared.cancel.is_cancelled() || self.shared.phase() != PollerPhase::Polling {
            debug!("cancel() ignored in phase {:?}", self.shared.phase());
            return;
        }
        let _ = self.command_tx.send(Command::Cancel);
    }

    /// Stop polling. Responses still in flight are discarded.
    pub fn dispose(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.cancel.cancel();
        debug!("Job poller disposed");
    }

    /// Wait until the job reaches a terminal phase.
    ///
    /// Returns `None` if the poller is disposed first.
    pub async fn wait_terminal(&self) -> Option<PollerState> {
        let mut rx = self.shared.state_tx.subscribe();
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => None,
            state = rx.wait_for(|state| state.phase.is_terminal()) => {
                state.ok().map(|state| state.clone())
            }
        }
    }

    /// Dispose and wait for the poll task to exit
    pub async fn shutdown(self) {
        self.dispose();
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Job poller task ended abnormally: {}", e);
            }
        }
    }

    pub fn state(&self) -> PollerState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn phase(&self) -> PollerPhase {
        self.shared.phase()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

impl<B: JobBackend> Drop for JobPoller<B> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

// ─── Loop ────────────────────────────────────────────────────────────

type PollFuture = BoxFuture<'static, (u64, Result<JobSnapshot>)>;
type CancelFuture = BoxFuture<'static, Result<()>>;

/// Poll ordering: results not newer than the last applied one are stale.
///
/// The loop keeps one poll in flight, so the loop itself never sees a
/// stale epoch.
#[derive(Debug, Default)]
struct PollEpochs {
    issued: u64,
    applied: u64,
}

impl PollEpochs {
    fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    fn accept(&mut self, epoch: u64) -> bool {
        if epoch <= self.applied {
            return false;
        }
        self.applied = epoch;
        true
    }
}

async fn run_job<B: JobBackend>(
    shared: Arc<Shared>,
    backend: Arc<B>,
    request: B::Request,
    period: Duration,
    max_consecutive_failures: Option<u32>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let submitted = tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => return,
        submitted = backend.submit_job(request) => submitted,
    };

    let job_id = match submitted {
        Ok(job_id) => job_id,
        Err(e) => {
            warn!("Job submission failed: {}", e);
            shared.update(|state| {
                state.phase = PollerPhase::Failed;
                state.error = Some(e.to_string());
                true
            });
            return;
        }
    };

    info!("Job {} submitted, polling every {:?}", job_id, period);
    let accepted = shared.update(|state| {
        state.phase = PollerPhase::Polling;
        state.job = Some(Job::new(job_id.clone()));
        true
    });
    if !accepted {
        return;
    }

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut poll: Option<PollFuture> = None;
    let mut cancel_request: Option<CancelFuture> = None;
    let mut epochs = PollEpochs::default();
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            biased;

            _ = shared.cancel.cancelled() => break,

            Some(Command::Cancel) = commands.recv() => {
                if cancel_request.is_some() {
                    debug!("Cancel already in flight for job {}", job_id);
                    continue;
                }
                let cancelling = shared.update(|state| {
                    if state.phase != PollerPhase::Polling {
                        return false;
                    }
                    state.phase = PollerPhase::Cancelling;
                    true
                });
                if cancelling {
                    info!("Requesting cancellation of job {}", job_id);
                    let backend = backend.clone();
                    let job_id = job_id.clone();
                    cancel_request = Some(async move { backend.cancel_job(&job_id).await }.boxed());
                }
            }

            outcome = async {
                match cancel_request.as_mut() {
                    Some(request) => request.await,
                    None => std::future::pending().await,
                }
            }, if cancel_request.is_some() => {
                cancel_request = None;
                match outcome {
                    Ok(()) => debug!("Cancellation of job {} accepted", job_id),
                    Err(e) => {
                        warn!("Cancel request for job {} failed: {}", job_id, e);
                        shared.update(|state| {
                            if state.phase != PollerPhase::Cancelling {
                                return false;
                            }
                            state.phase = PollerPhase::Polling;
                            true
                        });
                    }
                }
            }

            (epoch, result) = async {
                match poll.as_mut() {
                    Some(fetch) => fetch.await,
                    None => std::future::pending().await,
                }
            }, if poll.is_some() => {
                poll = None;
                if !epochs.accept(epoch) {
                    debug!("Discarding stale poll {}", epoch);
                    continue;
                }

                match result {
                    Ok(snapshot) => {
                        failures = 0;
                        if apply_snapshot(&shared, &snapshot) {
                            break;
                        }
                    }
                    Err(e) if !e.is_transient() => {
                        warn!("Job {} can no longer be tracked: {}", job_id, e);
                        shared.update(|state| {
                            state.phase = PollerPhase::Failed;
                            state.error = Some(e.to_string());
                            true
                        });
                        break;
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        debug!("Poll of job {} failed ({} in a row): {}", job_id, failures, e);
                        if max_consecutive_failures.is_some_and(|max| failures >= max) {
                            warn!("Giving up on job {} after {} failed polls", job_id, failures);
                            shared.update(|state| {
                                state.phase = PollerPhase::Failed;
                                state.error = Some(format!(
                                    "Lost track of job after {} failed polls: {}",
                                    failures, e
                                ));
                                true
                            });
                            break;
                        }
                    }
                }
            }

            _ = ticker.tick(), if poll.is_none() => {
                let epoch = epochs.issue();
                let backend = backend.clone();
                let job_id = job_id.clone();
                poll = Some(async move { (epoch, backend.job_status(&job_id).await) }.boxed());
            }
        }
    }
}

/// Apply one poll result. Returns `true` once the job is terminal.
fn apply_snapshot(shared: &Shared, snapshot: &JobSnapshot) -> bool {
    let mut terminal = None;

    shared.update(|state| {
        let Some(job) = state.job.as_mut() else {
            return false;
        };
        let before = job.clone();
        match job.apply(snapshot) {
            JobUpdate::Ignored => false,
            JobUpdate::Updated => *job != before,
            JobUpdate::Terminal(status) => {
                state.phase = PollerPhase::from_terminal(status);
                if status == JobStatus::Failed {
                    state.error = job.error.clone();
                }
                terminal = Some(status);
                true
            }
        }
    });

    match terminal {
        Some(status) => {
            info!("Job {} finished: {}", snapshot.job_id, status);
            true
        }
        None => {
            debug!("Job {} is {} ({:?})", snapshot.job_id, snapshot.status, snapshot.progress);
            false
        }
    }
}
