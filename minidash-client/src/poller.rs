use std::{sync::Arc, time::Duration};

use log::{debug, info, trace, warn};
use minidash_proto::MetricsSnapshot;
use tokio::{
    select,
    sync::{RwLock, watch},
    task::JoinHandle,
    time::{MissedTickBehavior, interval, sleep},
};
use time::UtcOffset;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    error::FetchError,
    sample::Sample,
    source::MetricsSource,
    state::{ConnectionState, DashboardView, EngineState},
};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:9090";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How the next poll is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleMode {
    /// A poll every `interval` regardless of latency; slow polls may overlap
    /// and are applied in the order they resolve.
    #[default]
    FixedInterval,
    /// The next poll starts `interval` after the previous one settled.
    SingleFlight,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub endpoint: String,
    pub interval: Duration,
    pub history_capacity: usize,
    pub schedule: ScheduleMode,
    /// Drop the history when the endpoint changes, so one chart never mixes
    /// two sources.
    pub clear_history_on_reconfigure: bool,
    /// Offset the sample timestamps are labelled in.
    pub utc_offset: UtcOffset,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            interval: DEFAULT_POLL_INTERVAL,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            schedule: ScheduleMode::default(),
            clear_history_on_reconfigure: true,
            utc_offset: UtcOffset::UTC,
        }
    }
}

/// Drives the polling loop and owns the engine state.
///
/// Readers get a [`Dashboard`] handle; nothing outside the poller mutates the
/// state. Must be started from within a tokio runtime.
pub struct Poller<S> {
    shared: Arc<Shared<S>>,
    running: Option<RunningLoop>,
}

struct Shared<S> {
    source: S,
    state: Arc<RwLock<EngineState>>,
    revision: watch::Sender<u64>,
    interval: Duration,
    schedule: ScheduleMode,
    clear_history_on_reconfigure: bool,
    utc_offset: UtcOffset,
    in_flight: TaskTracker,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl<S: MetricsSource> Poller<S> {
    pub fn new(source: S, config: PollerConfig) -> Self {
        debug_assert!(!config.interval.is_zero());

        let state = EngineState::new(config.endpoint, config.history_capacity);
        let (revision, _) = watch::channel(0);

        Self {
            shared: Arc::new(Shared {
                source,
                state: Arc::new(RwLock::new(state)),
                revision,
                interval: config.interval.max(MIN_POLL_INTERVAL),
                schedule: config.schedule,
                clear_history_on_reconfigure: config.clear_history_on_reconfigure,
                utc_offset: config.utc_offset,
                in_flight: TaskTracker::new(),
            }),
            running: None,
        }
    }

    /// Read handle for a presenter.
    pub fn dashboard(&self) -> Dashboard {
        Dashboard {
            state: Arc::clone(&self.shared.state),
            revision: self.shared.revision.subscribe(),
        }
    }

    /// Point the poller at another exporter. Applies from the next poll on;
    /// requests already in flight run to completion but their results are
    /// discarded.
    pub async fn configure(&self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        let changed = self
            .shared
            .state
            .write()
            .await
            .set_endpoint(endpoint.clone(), self.shared.clear_history_on_reconfigure);

        if changed {
            info!("metrics endpoint set to {endpoint}");
            self.shared.notify();
        }
    }

    /// Spawn the polling loop: one poll right away, then one per interval.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!("poller already running");
            return;
        }

        self.shared.in_flight.reopen();
        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let schedule = shared.schedule;
        let handle = match schedule {
            ScheduleMode::FixedInterval => tokio::spawn(shared.run_fixed(cancel.clone())),
            ScheduleMode::SingleFlight => tokio::spawn(shared.run_single_flight(cancel.clone())),
        };

        debug!(
            "poller started ({:?}, every {} ms)",
            self.shared.schedule,
            self.shared.interval.as_millis()
        );
        self.running = Some(RunningLoop { cancel, handle });
    }

    /// Cancel future ticks. Polls already in flight still land in the state.
    pub fn stop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
            debug!("poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.cancel.is_cancelled() && !r.handle.is_finished())
    }

    /// Stop, then wait for the loop and every in-flight poll to settle.
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(running) = self.running.take() {
            if let Err(e) = running.handle.await {
                warn!("polling loop ended abnormally: {e}");
            }
        }

        let in_flight = &self.shared.in_flight;
        in_flight.close();
        trace!("waiting for {} in-flight polls", in_flight.len());
        in_flight.wait().await;
    }

    /// Run one poll cycle to completion.
    ///
    /// The outcome is already recorded in the state when this returns; the
    /// result is only handed back for the caller's information.
    pub async fn poll_once(&self) -> Result<(), FetchError> {
        self.shared.poll().await
    }
}

impl<S> Drop for Poller<S> {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

impl<S: MetricsSource> Shared<S> {
    async fn run_fixed(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let shared = Arc::clone(&self);
                    self.in_flight.spawn(async move {
                        let _ = shared.poll().await;
                    });
                }
            }
        }
    }

    async fn run_single_flight(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let _ = self.poll().await;

            select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
        }
    }

    async fn poll(&self) -> Result<(), FetchError> {
        let (endpoint, generation) = {
            let state = self.state.read().await;
            (state.endpoint().to_owned(), state.generation())
        };

        trace!("polling {endpoint}");
        let outcome = self.source.fetch(&endpoint).await;

        let mut state = self.state.write().await;
        if state.generation() != generation {
            debug!("discarding poll result from previous endpoint {endpoint}");
            return outcome.map(|_| ());
        }

        match outcome {
            Ok(snapshot) => {
                self.apply_success(&mut state, &endpoint, snapshot);
                drop(state);
                self.notify();
                Ok(())
            }
            Err(e) => {
                let previous = state.record_failure(e.to_string());
                drop(state);
                match previous {
                    ConnectionState::Connected => warn!("lost connection to {endpoint}: {e}"),
                    ConnectionState::Disconnected => warn!("polling {endpoint} failed: {e}"),
                }
                self.notify();
                Err(e)
            }
        }
    }

    fn apply_success(&self, state: &mut EngineState, endpoint: &str, snapshot: MetricsSnapshot) {
        let sample = Sample::captured_now(&snapshot, self.utc_offset);
        trace!("decoded into sample: {sample:?}");

        if state.record_success(snapshot, sample) == ConnectionState::Disconnected {
            info!("connected to {endpoint}");
        }
        debug!("history holds {} samples", state.history().len());
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

/// Cheap, cloneable read handle on the engine state.
#[derive(Debug, Clone)]
pub struct Dashboard {
    state: Arc<RwLock<EngineState>>,
    revision: watch::Receiver<u64>,
}

impl Dashboard {
    pub async fn view(&self) -> DashboardView {
        self.state.read().await.view()
    }

    pub async fn latest(&self) -> Option<MetricsSnapshot> {
        self.state.read().await.latest().cloned()
    }

    pub async fn history(&self) -> Vec<Sample> {
        self.state.read().await.history().snapshot()
    }

    pub async fn connection(&self) -> (ConnectionState, Option<String>) {
        let state = self.state.read().await;
        (state.connection(), state.last_error().map(str::to_owned))
    }

    /// Wait until the state changed since the last call. Returns `false` once
    /// the poller is gone.
    pub async fn changed(&mut self) -> bool {
        self.revision.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use super::*;
    use crate::{sample::tests::snapshot, state::ViewStatus};

    type Step = (Duration, Result<MetricsSnapshot, FetchError>);

    /// Plays back canned outcomes, each after its own latency.
    #[derive(Default)]
    struct ScriptedSource {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into_iter().collect()),
                ..Default::default()
            }
        }
    }

    impl MetricsSource for Arc<ScriptedSource> {
        async fn fetch(&self, base_url: &str) -> Result<MetricsSnapshot, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(base_url.to_owned());
            let step = self.steps.lock().unwrap().pop_front();

            match step {
                Some((latency, outcome)) => {
                    sleep(latency).await;
                    outcome
                }
                None => Err(FetchError::transport("script exhausted")),
            }
        }
    }

    fn ok(cpu: f64) -> Step {
        (Duration::ZERO, Ok(snapshot(cpu)))
    }

    fn ok_after(latency_ms: u64, cpu: f64) -> Step {
        (Duration::from_millis(latency_ms), Ok(snapshot(cpu)))
    }

    fn fail(msg: &str) -> Step {
        (Duration::ZERO, Err(FetchError::transport(msg)))
    }

    fn poller(
        steps: impl IntoIterator<Item = Step>,
        schedule: ScheduleMode,
    ) -> (Poller<Arc<ScriptedSource>>, Arc<ScriptedSource>) {
        let source = Arc::new(ScriptedSource::new(steps));
        let config = PollerConfig {
            schedule,
            ..Default::default()
        };
        (Poller::new(Arc::clone(&source), config), source)
    }

    async fn cpu_history(dashboard: &Dashboard) -> Vec<f64> {
        dashboard.history().await.iter().map(|s| s.cpu).collect()
    }

    #[tokio::test]
    async fn samples_are_stamped_in_the_configured_offset() {
        let offset = time::macros::offset!(+2);
        let source = Arc::new(ScriptedSource::new([ok(10.0)]));
        let poller = Poller::new(
            Arc::clone(&source),
            PollerConfig {
                utc_offset: offset,
                ..Default::default()
            },
        );

        poller.poll_once().await.unwrap();

        let history = poller.dashboard().history().await;
        assert_eq!(history[0].timestamp.offset(), offset);
    }

    #[tokio::test]
    async fn failure_then_success_reconnects() {
        let (poller, _) = poller([fail("connection refused"), ok(10.0)], ScheduleMode::default());
        let dashboard = poller.dashboard();

        assert_eq!(
            dashboard.connection().await,
            (ConnectionState::Disconnected, None)
        );

        assert!(poller.poll_once().await.is_err());
        assert_eq!(
            dashboard.connection().await,
            (
                ConnectionState::Disconnected,
                Some("connection refused".to_owned())
            )
        );

        assert!(poller.poll_once().await.is_ok());
        assert_eq!(
            dashboard.connection().await,
            (ConnectionState::Connected, None)
        );
        assert_eq!(dashboard.view().await.status(), ViewStatus::Live);
    }

    #[tokio::test]
    async fn consecutive_failures_keep_latest_error() {
        let (poller, _) = poller([fail("first"), fail("second")], ScheduleMode::default());
        let dashboard = poller.dashboard();

        let _ = poller.poll_once().await;
        let _ = poller.poll_once().await;

        let (connection, error) = dashboard.connection().await;
        assert_eq!(connection, ConnectionState::Disconnected);
        assert_eq!(error.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn failure_does_not_fill_gaps() {
        let (poller, _) = poller(
            [ok(1.0), ok(2.0), ok(3.0), fail("timeout")],
            ScheduleMode::default(),
        );
        let dashboard = poller.dashboard();

        for _ in 0..4 {
            let _ = poller.poll_once().await;
        }

        assert_eq!(cpu_history(&dashboard).await, vec![1.0, 2.0, 3.0]);
        assert_eq!(dashboard.latest().await.map(|s| s.cpu_usage), Some(3.0));
        assert_eq!(dashboard.view().await.status(), ViewStatus::Error);
    }

    #[tokio::test]
    async fn history_keeps_last_twenty_polls() {
        let (poller, _) = poller((1..=25).map(|n| ok(n as f64)), ScheduleMode::default());
        let dashboard = poller.dashboard();

        for _ in 0..25 {
            poller.poll_once().await.unwrap();
        }

        let expected: Vec<f64> = (6..=25).map(|n| n as f64).collect();
        assert_eq!(cpu_history(&dashboard).await, expected);
    }

    #[tokio::test]
    async fn reconfigure_clears_history_and_retargets() {
        let (poller, source) = poller([ok(1.0), ok(2.0)], ScheduleMode::default());
        let dashboard = poller.dashboard();

        poller.poll_once().await.unwrap();
        poller.configure("http://10.0.0.2:9090").await;
        assert!(dashboard.history().await.is_empty());

        poller.poll_once().await.unwrap();
        assert_eq!(cpu_history(&dashboard).await, vec![2.0]);
        assert_eq!(
            *source.urls.lock().unwrap(),
            vec![DEFAULT_ENDPOINT.to_owned(), "http://10.0.0.2:9090".to_owned()]
        );
    }

    #[tokio::test]
    async fn changes_are_announced() {
        let (poller, _) = poller([ok(1.0)], ScheduleMode::default());
        let mut dashboard = poller.dashboard();

        poller.poll_once().await.unwrap();
        assert!(dashboard.changed().await);
        assert_eq!(dashboard.history().await.len(), 1);

        drop(poller);
        assert!(!dashboard.changed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_immediately_then_every_interval() {
        let (mut poller, source) = poller((1..=10).map(|n| ok(n as f64)), ScheduleMode::FixedInterval);
        let dashboard = poller.dashboard();

        poller.start();
        sleep(Duration::from_millis(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(5000)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        sleep(Duration::from_millis(10_000)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert_eq!(cpu_history(&dashboard).await, vec![1.0, 2.0, 3.0, 4.0]);

        poller.shutdown().await;
        sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_interval_overlaps_slow_polls() {
        let (mut poller, source) = poller(
            [ok_after(7000, 1.0), ok(2.0)],
            ScheduleMode::FixedInterval,
        );
        let dashboard = poller.dashboard();

        poller.start();
        sleep(Duration::from_millis(5001)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cpu_history(&dashboard).await, vec![2.0]);

        poller.stop();
        sleep(Duration::from_millis(2000)).await;
        // resolution order, not request order
        assert_eq!(cpu_history(&dashboard).await, vec![2.0, 1.0]);
        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn single_flight_waits_for_the_previous_poll() {
        let (mut poller, source) = poller(
            [ok_after(7000, 1.0), ok(2.0)],
            ScheduleMode::SingleFlight,
        );

        poller.start();
        sleep(Duration::from_millis(11_000)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(1001)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_in_flight_polls_land() {
        let (mut poller, _) = poller([ok_after(3000, 1.0)], ScheduleMode::FixedInterval);
        let dashboard = poller.dashboard();

        poller.start();
        sleep(Duration::from_millis(1)).await;
        poller.stop();
        assert!(!poller.is_running());

        poller.shutdown().await;
        assert_eq!(cpu_history(&dashboard).await, vec![1.0]);
        assert_eq!(
            dashboard.connection().await,
            (ConnectionState::Connected, None)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn results_from_a_replaced_endpoint_are_dropped() {
        let (mut poller, _) = poller([ok_after(3000, 1.0)], ScheduleMode::FixedInterval);
        let dashboard = poller.dashboard();

        poller.start();
        sleep(Duration::from_millis(1)).await;
        poller.configure("http://10.0.0.2:9090").await;
        poller.stop();
        poller.shutdown().await;

        assert!(dashboard.history().await.is_empty());
        assert_eq!(dashboard.latest().await, None);
    }
}
