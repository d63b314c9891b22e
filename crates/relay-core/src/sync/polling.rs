use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::DEFAULT_POLL_INTERVAL;
use crate::gateway::{Gateway, GatewayResult, Issue};

use super::displayed::DisplayedIssue;

/// Shortest cadence the scheduler will run at.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Whether the view showing the issue is currently on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Interval timer armed.
    Active,
    /// No timer.
    Suspended,
    /// Torn down or stopped after the session was rejected.
    Stopped,
}

impl PollState {
    pub fn for_visibility(visibility: Visibility) -> Self {
        match visibility {
            Visibility::Visible => PollState::Active,
            Visibility::Hidden => PollState::Suspended,
        }
    }

    /// Next state after a visibility event; `Stopped` is terminal.
    pub fn on_visibility(self, visibility: Visibility) -> Self {
        match self {
            PollState::Stopped => PollState::Stopped,
            _ => PollState::for_visibility(visibility),
        }
    }
}

/// Re-fetches the displayed issue on a fixed cadence while it is visible.
#[derive(Debug, Clone, Copy)]
pub struct PollingScheduler {
    interval: Duration,
}

impl Default for PollingScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl PollingScheduler {
    /// Intervals below [`MIN_POLL_INTERVAL`] (including zero) are raised to it.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll `key` through the gateway into `target`.
    pub fn spawn_for_issue(
        &self,
        gateway: Gateway,
        key: String,
        target: DisplayedIssue,
        visibility: watch::Receiver<Visibility>,
    ) -> PollingHandle {
        self.spawn(target, visibility, move || {
            let gateway = gateway.clone();
            let key = key.clone();
            async move { gateway.get_issue(&key).await }
        })
    }

    /// Start the poll loop with an arbitrary fetcher.
    ///
    /// The first fetch happens one full interval after becoming visible; the
    /// initial load is the caller's business.
    pub fn spawn<F, Fut>(
        &self,
        target: DisplayedIssue,
        visibility: watch::Receiver<Visibility>,
        fetch: F,
    ) -> PollingHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = GatewayResult<Issue>> + Send + 'static,
    {
        let initial = PollState::for_visibility(*visibility.borrow());
        let (state_tx, state_rx) = watch::channel(initial);
        let fetches = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(run_poll_loop(
            self.interval,
            target,
            visibility,
            fetch,
            state_tx,
            fetches.clone(),
        ));
        PollingHandle {
            task,
            state: state_rx,
            fetches,
        }
    }
}

async fn run_poll_loop<F, Fut>(
    period: Duration,
    target: DisplayedIssue,
    mut visibility: watch::Receiver<Visibility>,
    mut fetch: F,
    state: watch::Sender<PollState>,
    fetches: Arc<AtomicU64>,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = GatewayResult<Issue>> + Send + 'static,
{
    loop {
        let current = state
            .borrow()
            .on_visibility(*visibility.borrow_and_update());
        state.send_replace(current);

        match current {
            PollState::Stopped => return,
            PollState::Suspended => {
                if visibility.changed().await.is_err() {
                    break;
                }
            }
            PollState::Active => {
                let mut ticker = time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        changed = visibility.changed() => {
                            if changed.is_err() {
                                state.send_replace(PollState::Stopped);
                                return;
                            }
                            if *visibility.borrow() == Visibility::Hidden {
                                break;
                            }
                        }
                        _ = ticker.tick() => {
                            fetches.fetch_add(1, Ordering::Relaxed);
                            match fetch().await {
                                Ok(issue) => target.replace(issue),
                                Err(err) if err.is_unauthorized() => {
                                    tracing::debug!(error = %err, "poll rejected; stopping");
                                    state.send_replace(PollState::Stopped);
                                    return;
                                }
                                Err(err) => tracing::debug!(error = %err, "poll failed"),
                            }
                        }
                    }
                }
            }
        }
    }
    state.send_replace(PollState::Stopped);
}

/// Owner of a running poll loop; dropping it cancels the timer.
#[derive(Debug)]
pub struct PollingHandle {
    task: JoinHandle<()>,
    state: watch::Receiver<PollState>,
    fetches: Arc<AtomicU64>,
}

impl PollingHandle {
    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.clone()
    }

    /// Number of poll fetches started so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use crate::sync::displayed::tests::sample_issue;
    use reqwest::StatusCode;
    use std::sync::atomic::AtomicUsize;

    const PERIOD: Duration = Duration::from_secs(30);

    fn counting_fetcher(
        calls: Arc<AtomicUsize>,
    ) -> impl FnMut() -> std::future::Ready<GatewayResult<Issue>> + Send + 'static {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Ok(sample_issue("BUG-1", &format!("Poll {n}"))))
        }
    }

    async fn advance(secs: u64) {
        time::sleep(Duration::from_secs(secs)).await;
    }

    #[test]
    fn state_machine_transitions() {
        assert_eq!(
            PollState::Active.on_visibility(Visibility::Hidden),
            PollState::Suspended
        );
        assert_eq!(
            PollState::Suspended.on_visibility(Visibility::Visible),
            PollState::Active
        );
        assert_eq!(
            PollState::Stopped.on_visibility(Visibility::Visible),
            PollState::Stopped
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_on_each_interval_boundary_while_visible() {
        let (_vis_tx, vis_rx) = watch::channel(Visibility::Visible);
        let calls = Arc::new(AtomicUsize::new(0));
        let target = DisplayedIssue::with_issue(sample_issue("BUG-1", "Open"));
        let handle =
            PollingScheduler::new(PERIOD).spawn(target.clone(), vis_rx, counting_fetcher(calls.clone()));

        advance(29).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        advance(2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(target.snapshot().unwrap().status.as_deref(), Some("Poll 1"));
        advance(30).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.state(), PollState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_suspends_and_visible_rearms_fresh_interval() {
        let (vis_tx, vis_rx) = watch::channel(Visibility::Visible);
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = PollingScheduler::new(PERIOD).spawn(
            DisplayedIssue::new(),
            vis_rx,
            counting_fetcher(calls.clone()),
        );

        advance(31).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        vis_tx.send(Visibility::Hidden).unwrap();
        advance(300).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), PollState::Suspended);

        vis_tx.send(Visibility::Visible).unwrap();
        advance(1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no immediate fetch on resume");
        advance(28).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        advance(2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn starting_hidden_waits_for_visibility() {
        let (vis_tx, vis_rx) = watch::channel(Visibility::Hidden);
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = PollingScheduler::new(PERIOD).spawn(
            DisplayedIssue::new(),
            vis_rx,
            counting_fetcher(calls.clone()),
        );

        advance(120).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(handle.state(), PollState::Suspended);

        vis_tx.send(Visibility::Visible).unwrap();
        advance(31).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_cancels_timer() {
        let (_vis_tx, vis_rx) = watch::channel(Visibility::Visible);
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = PollingScheduler::new(PERIOD).spawn(
            DisplayedIssue::new(),
            vis_rx,
            counting_fetcher(calls.clone()),
        );

        advance(10).await;
        handle.teardown();
        advance(300).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_silent_and_keep_previous_state() {
        let (_vis_tx, vis_rx) = watch::channel(Visibility::Visible);
        let target = DisplayedIssue::with_issue(sample_issue("BUG-1", "Open"));
        let handle = PollingScheduler::new(PERIOD).spawn(target.clone(), vis_rx, || async {
            Err::<Issue, _>(GatewayError::Status {
                status: StatusCode::BAD_GATEWAY,
                message: "HTTP error, status 502".into(),
            })
        });

        advance(95).await;
        assert_eq!(handle.fetch_count(), 3);
        assert_eq!(handle.state(), PollState::Active);
        assert_eq!(target.snapshot().unwrap().status.as_deref(), Some("Open"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_runs_at_the_minimum_cadence() {
        let scheduler = PollingScheduler::new(Duration::ZERO);
        assert_eq!(scheduler.interval(), MIN_POLL_INTERVAL);

        let (_vis_tx, vis_rx) = watch::channel(Visibility::Visible);
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = scheduler.spawn(DisplayedIssue::new(), vis_rx, counting_fetcher(calls.clone()));

        time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!handle.is_finished());
        assert_eq!(handle.state(), PollState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_stops_polling() {
        let (_vis_tx, vis_rx) = watch::channel(Visibility::Visible);
        let handle = PollingScheduler::new(PERIOD).spawn(DisplayedIssue::new(), vis_rx, || async {
            Err::<Issue, _>(GatewayError::Unauthorized {
                message: "Token expired".into(),
            })
        });

        advance(100).await;
        assert_eq!(handle.fetch_count(), 1);
        assert_eq!(handle.state(), PollState::Stopped);
        assert!(handle.is_finished());
    }
}
