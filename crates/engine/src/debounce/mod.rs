//! Debounced value pipeline
//!
//! Coalesces bursts of updates into one settled value once the input has
//! been quiet for a full window. Used to keep expensive calls (effect
//! previews, searches) from firing on every keystroke.

use std::sync::Arc;
use std::time::Duration;
use stoat_core::{DebounceSettings, Error, Result};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Snapshot of a pipeline: the last settled value and when the current
/// unsettled burst started, if any.
///
/// `pending_since` is the time of the first update since the last settle;
/// later updates in the same burst restart the window but not this clock.
#[derive(Debug, Clone, PartialEq)]
pub struct DebouncedValue<T> {
    pub settled: T,
    pub pending_since: Option<Instant>,
}

// ─── Shared ──────────────────────────────────────────────────────────

struct Shared<T> {
    settled_tx: watch::Sender<T>,
    pending_tx: watch::Sender<Option<Instant>>,
    cancel: CancellationToken,
}

impl<T: PartialEq> Shared<T> {
    /// Start the burst clock unless a burst is already running
    fn mark_pending(&self, at: Instant) {
        self.pending_tx.send_if_modified(|pending| {
            if self.cancel.is_cancelled() || pending.is_some() {
                return false;
            }
            *pending = Some(at);
            true
        });
    }

    fn settle(&self, value: T) {
        self.settled_tx.send_if_modified(|current| {
            if self.cancel.is_cancelled() || *current == value {
                return false;
            }
            *current = value;
            true
        });
        self.pending_tx.send_if_modified(|pending| pending.take().is_some());
    }
}

// ─── Handle ──────────────────────────────────────────────────────────

/// Debounces updates of `T` over a quiet window.
///
/// Observers subscribe to the settled value; they are woken once per settled
/// change, never for intermediate updates. Dropping the pipeline disposes it.
pub struct Debounced<T> {
    shared: Arc<Shared<T>>,
    update_tx: mpsc::UnboundedSender<(T, Instant)>,
    window: Duration,
}

impl<T> Debounced<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Start a pipeline. Must be called from within a tokio runtime.
    pub fn new(initial: T, window: Duration) -> Self {
        let (settled_tx, _) = watch::channel(initial);
        let (pending_tx, _) = watch::channel(None);
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            settled_tx,
            pending_tx,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(run_debounce(shared.clone(), update_rx, window));

        Self {
            shared,
            update_tx,
            window,
        }
    }

    /// Build from an untrusted millisecond count; negative windows are rejected
    pub fn from_millis(initial: T, window_ms: i64) -> Result<Self> {
        let window_ms = u64::try_from(window_ms).map_err(|_| {
            Error::InvalidConfig(format!(
                "Debounce window must not be negative (got {}ms)",
                window_ms
            ))
        })?;
        Ok(Self::new(initial, Duration::from_millis(window_ms)))
    }

    pub fn from_settings(initial: T, settings: &DebounceSettings) -> Self {
        Self::new(initial, settings.window())
    }

    /// Record a new input value and restart the quiet window
    pub fn update(&self, value: T) {
        if self.shared.cancel.is_cancelled() {
            debug!("update() after dispose ignored");
            return;
        }
        let now = Instant::now();
        self.shared.mark_pending(now);
        if self.update_tx.send((value, now)).is_err() {
            debug!("Debounce task gone, update dropped");
        }
    }

    /// Cancel the pending window. No settle is published afterwards.
    pub fn dispose(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.cancel.cancel();
        self.shared.pending_tx.send_replace(None);
    }

    pub fn settled(&self) -> T {
        self.shared.settled_tx.borrow().clone()
    }

    pub fn pending_since(&self) -> Option<Instant> {
        *self.shared.pending_tx.borrow()
    }

    pub fn snapshot(&self) -> DebouncedValue<T> {
        DebouncedValue {
            settled: self.settled(),
            pending_since: self.pending_since(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.shared.settled_tx.subscribe()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

impl<T> Drop for Debounced<T> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

// ─── Loop ────────────────────────────────────────────────────────────

async fn run_debounce<T: PartialEq>(
    shared: Arc<Shared<T>>,
    mut updates: mpsc::UnboundedReceiver<(T, Instant)>,
    window: Duration,
) {
    let mut pending: Option<(T, Instant)> = None;

    loop {
        let deadline = pending.as_ref().map(|(_, at)| *at + window);

        tokio::select! {
            biased;

            _ = shared.cancel.cancelled() => break,

            update = updates.recv() => {
                let Some((value, at)) = update else { break };
                if window.is_zero() {
                    shared.settle(value);
                } else {
                    // Re-opens the burst if a settle raced this update
                    shared.mark_pending(at);
                    pending = Some((value, at));
                }
            }

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some((value, _)) = pending.take() {
                    shared.settle(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    const WINDOW: Duration = Duration::from_millis(300);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_negative_window_rejected() {
        let err = Debounced::from_millis(0u32, -1).err();
        assert!(matches!(err, Some(Error::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_settles_once_with_last_value() {
        let debounced = Debounced::new(0, WINDOW);
        let mut rx = debounced.subscribe();

        debounced.update(1);
        sleep(ms(150)).await;
        debounced.update(2);
        sleep(ms(150)).await;
        debounced.update(3);
        assert!(debounced.pending_since().is_some());

        sleep(ms(299)).await;
        assert!(!rx.has_changed().unwrap());
        assert_eq!(debounced.settled(), 0);

        sleep(ms(2)).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 3);
        assert_eq!(debounced.pending_since(), None);

        sleep(ms(1000)).await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_updates_each_settle() {
        let debounced = Debounced::new(String::new(), WINDOW);
        let mut rx = debounced.subscribe();

        for word in ["a", "ab", "abc"] {
            debounced.update(word.to_string());
            sleep(ms(400)).await;
            assert!(rx.has_changed().unwrap());
            assert_eq!(*rx.borrow_and_update(), word);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_pending_settle() {
        let debounced = Debounced::new(0, WINDOW);
        let mut rx = debounced.subscribe();

        debounced.update(7);
        sleep(ms(100)).await;
        debounced.dispose();
        debounced.dispose();

        sleep(ms(1000)).await;
        assert!(!rx.has_changed().unwrap());
        assert_eq!(debounced.settled(), 0);

        debounced.update(8);
        sleep(ms(1000)).await;
        assert_eq!(*rx.borrow_and_update(), 0);
        assert!(debounced.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_window_settles_every_update() {
        let debounced = Debounced::from_millis(0, 0).unwrap();
        let mut rx = debounced.subscribe();

        debounced.update(1);
        sleep(ms(1)).await;
        assert_eq!(*rx.borrow_and_update(), 1);

        debounced.update(2);
        sleep(ms(1)).await;
        assert_eq!(*rx.borrow_and_update(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_settled_value_not_renotified() {
        let debounced = Debounced::new(5, WINDOW);
        let mut rx = debounced.subscribe();

        debounced.update(6);
        sleep(ms(400)).await;
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        debounced.update(6);
        sleep(ms(400)).await;
        assert!(!rx.has_changed().unwrap());
        assert_eq!(debounced.pending_since(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_tracks_pending_burst() {
        let debounced = Debounced::new("x", WINDOW);
        let started = Instant::now();
        debounced.update("y");

        let snap = debounced.snapshot();
        assert_eq!(snap.settled, "x");
        assert_eq!(snap.pending_since, Some(started));

        // A second update restarts the window but not the burst clock
        sleep(ms(200)).await;
        debounced.update("z");
        assert_eq!(debounced.pending_since(), Some(started));

        sleep(ms(299)).await;
        assert_eq!(debounced.snapshot().settled, "x");
        assert_eq!(debounced.pending_since(), Some(started));

        sleep(ms(2)).await;
        assert_eq!(
            debounced.snapshot(),
            DebouncedValue {
                settled: "z",
                pending_since: None
            }
        );

        // The next burst gets a fresh clock
        let second_burst = Instant::now();
        debounced.update("w");
        assert_eq!(debounced.pending_since(), Some(second_burst));
    }
}
