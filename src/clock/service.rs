//! Clock-sync service — keeps a [`ClockSync`] fed from a reference time server.
//!
//! Enabling spawns a Tokio task that runs a sync round, then resyncs on a
//! fixed interval. Between rounds a watchdog compares the wall clock with
//! the monotonic clock; a jump larger than the configured threshold (system
//! clock change, sleep/wake) invalidates the drift history and forces an
//! immediate round. Disabling aborts the task: pending waits are dropped
//! and a round in progress is discarded, while committed history is kept.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, sleep, sleep_until};

use super::drift::{self, ClockSync};
use crate::config::ClockSyncConfig;
use crate::error::TimegrapherError;

/// Body returned by the reference time endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    /// ISO 8601 reference time; absent when the server could not answer.
    #[serde(default)]
    pub date: Option<String>,
    /// The server instance was just started and its answer is unreliable.
    #[serde(default)]
    pub server_cold: bool,
}

impl ServerTime {
    /// Reference time in ms since the Unix epoch, if the answer carried one.
    pub fn reference_ms(&self) -> Result<Option<f64>, TimegrapherError> {
        let Some(date) = &self.date else {
            return Ok(None);
        };
        let parsed = chrono::DateTime::parse_from_rfc3339(date)
            .map_err(|_| TimegrapherError::InvalidReferenceTime(date.clone()))?;
        Ok(Some(parsed.timestamp_micros() as f64 / 1000.0))
    }
}

/// Something that can be asked for the current reference time.
pub trait ReferenceTimeSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<ServerTime, TimegrapherError>> + Send;
}

impl<T: ReferenceTimeSource> ReferenceTimeSource for Arc<T> {
    fn fetch(&self) -> impl Future<Output = Result<ServerTime, TimegrapherError>> + Send {
        (**self).fetch()
    }
}

/// Reference time fetched with an HTTP GET returning [`ServerTime`] JSON.
#[derive(Debug, Clone)]
pub struct HttpReferenceTime {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpReferenceTime {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl ReferenceTimeSource for HttpReferenceTime {
    async fn fetch(&self) -> Result<ServerTime, TimegrapherError> {
        let response = self.client.get(&self.endpoint).send().await?.error_for_status()?;
        Ok(response.json::<ServerTime>().await?)
    }
}

/// Local time sources compared against the reference.
pub trait LocalClock: Send + Sync + 'static {
    /// Monotonic ms; the domain all offsets are expressed in.
    fn monotonic_ms(&self) -> f64;
    /// Wall-clock ms since the Unix epoch; may jump.
    fn wall_ms(&self) -> f64;
}

impl<T: LocalClock> LocalClock for Arc<T> {
    fn monotonic_ms(&self) -> f64 {
        (**self).monotonic_ms()
    }

    fn wall_ms(&self) -> f64 {
        (**self).wall_ms()
    }
}

/// [`Instant`] for monotonic time, [`SystemTime`] for wall time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalClock for SystemClock {
    fn monotonic_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn wall_ms(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |since_epoch| since_epoch.as_secs_f64() * 1000.0)
    }
}

struct Shared<S, C> {
    source: S,
    clock: C,
    config: ClockSyncConfig,
    state: Mutex<ClockSync>,
}

/// Background synchronisation against a [`ReferenceTimeSource`].
pub struct ClockSyncService<S: ReferenceTimeSource, C: LocalClock = SystemClock> {
    shared: Arc<Shared<S, C>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ClockSyncService<HttpReferenceTime> {
    /// HTTP source at `config.endpoint`, system clocks.
    pub fn from_config(config: ClockSyncConfig) -> Result<Self, TimegrapherError> {
        let source = HttpReferenceTime::new(config.endpoint.clone());
        Self::new(source, config)
    }
}

impl<S: ReferenceTimeSource> ClockSyncService<S> {
    pub fn new(source: S, config: ClockSyncConfig) -> Result<Self, TimegrapherError> {
        Self::with_clock(source, SystemClock::new(), config)
    }
}

impl<S: ReferenceTimeSource, C: LocalClock> ClockSyncService<S, C> {
    pub fn with_clock(source: S, clock: C, config: ClockSyncConfig) -> Result<Self, TimegrapherError> {
        config.validate()?;
        let state = ClockSync::new(config.per_check_error_ms);
        Ok(Self {
            shared: Arc::new(Shared {
                source,
                clock,
                config,
                state: Mutex::new(state),
            }),
            driver: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClockSyncConfig {
        &self.shared.config
    }

    /// Start or stop background synchronisation.
    ///
    /// Enabling must happen inside a Tokio runtime. If the last round is
    /// still within the refresh interval, the next one is scheduled for the
    /// remainder of that interval instead of running immediately.
    pub fn set_enabled(&self, enabled: bool) {
        let mut driver = lock(&self.driver);
        if let Some(handle) = driver.take() {
            handle.abort();
        }
        if enabled {
            *driver = Some(tokio::spawn(Arc::clone(&self.shared).drive()));
        }
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.driver).as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Run one sync round now, independent of the background schedule.
    pub async fn sync_once(&self) {
        self.shared.sync_round().await;
    }

    pub fn is_synced(&self) -> bool {
        self.shared.state().is_synced()
    }

    pub fn drift_rate(&self) -> Option<f64> {
        self.shared.state().drift_rate()
    }

    pub fn estimated_error_sec_per_day(&self) -> Option<f64> {
        self.shared.state().estimated_error_sec_per_day()
    }

    /// Current reference time in ms since the Unix epoch.
    pub fn reference_now(&self) -> Option<f64> {
        let now = self.shared.clock.monotonic_ms();
        self.shared.state().reference_time(now)
    }

    /// Copy of the estimator state.
    pub fn snapshot(&self) -> ClockSync {
        self.shared.state().clone()
    }
}

impl<S: ReferenceTimeSource, C: LocalClock> Drop for ClockSyncService<S, C> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.driver).take() {
            handle.abort();
        }
    }
}

impl<S: ReferenceTimeSource, C: LocalClock> Shared<S, C> {
    fn state(&self) -> MutexGuard<'_, ClockSync> {
        lock(&self.state)
    }

    fn wall_offset(&self) -> f64 {
        self.clock.wall_ms() - self.clock.monotonic_ms()
    }

    async fn drive(self: Arc<Self>) {
        let interval_ms = self.config.refresh_interval_ms();
        let mut delay_ms = self.state().resync_delay(self.clock.monotonic_ms(), interval_ms);
        loop {
            if delay_ms > 0.0 && self.watch(delay_ms).await {
                log::info!("Large clock discontinuity detected, resetting drift history and resyncing");
                self.state().reset();
            }
            self.sync_round().await;
            delay_ms = interval_ms;
        }
    }

    /// Wait `delay_ms`, returning early with `true` on a clock discontinuity.
    async fn watch(&self, delay_ms: f64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(delay_ms / 1000.0);
        let mut watchdog = tokio::time::interval(Duration::from_millis(self.config.watchdog_interval_ms));
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return false,
                _ = watchdog.tick() => {
                    let wall_offset = self.wall_offset();
                    if self.state().detect_discontinuity(wall_offset, self.config.discontinuity_threshold_ms) {
                        return true;
                    }
                }
            }
        }
    }

    async fn sync_round(&self) {
        let wanted = self.config.samples_per_refresh;
        let spacing = Duration::from_millis(self.config.query_spacing_ms);
        let backoff = Duration::from_millis(self.config.failure_backoff_ms);

        let mut offsets = Vec::with_capacity(wanted);
        let mut round_end = self.clock.monotonic_ms();
        while offsets.len() < wanted {
            let call_start = self.clock.monotonic_ms();
            let response = self.source.fetch().await;
            let call_end = self.clock.monotonic_ms();

            match response.and_then(|answer| Ok((answer.reference_ms()?, answer.server_cold))) {
                Ok((Some(reference), false)) => {
                    offsets.push(drift::query_offset(call_start, call_end, reference));
                    round_end = call_end;
                    if offsets.len() < wanted {
                        sleep(spacing).await;
                    }
                }
                Ok((Some(_), true)) => {
                    log::debug!("Reference time server is cold, retrying");
                    sleep(spacing).await;
                }
                Ok((None, _)) => {
                    log::warn!("Reference time server answered without a date, retrying");
                    sleep(backoff).await;
                }
                Err(e) => {
                    log::warn!("Reference time query failed: {e}");
                    sleep(backoff).await;
                }
            }
        }

        let wall_offset = self.wall_offset();
        let mut state = self.state();
        if let Some(sample) = state.record_round(round_end, &offsets, wall_offset) {
            log::debug!("Clock offset {:.1} ms at local {:.0} ms", sample.offset, sample.local_time);
        }
        if let Some(rate) = state.drift_rate() {
            log::info!(
                "Drift {:.2} ms/min (±{:.1} s/day)",
                rate * 60_000.0,
                state.estimated_error_sec_per_day().unwrap_or(f64::NAN)
            );
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REFERENCE: &str = "2024-01-01T00:00:00.000Z";
    const REFERENCE_MS: f64 = 1_704_067_200_000.0;

    #[derive(Default)]
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<ServerTime, TimegrapherError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn with_script(script: Vec<Result<ServerTime, TimegrapherError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ReferenceTimeSource for ScriptedSource {
        fn fetch(&self) -> impl Future<Output = Result<ServerTime, TimegrapherError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = lock(&self.script).pop_front().unwrap_or_else(|| Ok(warm()));
            std::future::ready(next)
        }
    }

    /// Real monotonic time with a wall clock that tests can step.
    struct SteppableClock {
        inner: SystemClock,
        wall_step_ms: Mutex<f64>,
    }

    impl SteppableClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: SystemClock::new(),
                wall_step_ms: Mutex::new(0.0),
            })
        }

        fn step_wall(&self, ms: f64) {
            *lock(&self.wall_step_ms) += ms;
        }
    }

    impl LocalClock for SteppableClock {
        fn monotonic_ms(&self) -> f64 {
            self.inner.monotonic_ms()
        }

        fn wall_ms(&self) -> f64 {
            REFERENCE_MS + self.inner.monotonic_ms() + *lock(&self.wall_step_ms)
        }
    }

    fn warm() -> ServerTime {
        ServerTime {
            date: Some(REFERENCE.to_string()),
            server_cold: false,
        }
    }

    fn fast_config(samples_per_refresh: usize) -> ClockSyncConfig {
        ClockSyncConfig {
            samples_per_refresh,
            query_spacing_ms: 1,
            failure_backoff_ms: 2,
            watchdog_interval_ms: 5,
            ..ClockSyncConfig::default()
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn parses_server_time() {
        let answer: ServerTime = serde_json::from_str(r#"{"date": "2024-01-01T00:00:00.250Z", "serverCold": true}"#).unwrap();
        assert!(answer.server_cold);
        assert_eq!(answer.reference_ms().unwrap(), Some(REFERENCE_MS + 250.0));

        let empty: ServerTime = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.reference_ms().unwrap(), None);

        let garbage = ServerTime {
            date: Some("yesterday".into()),
            server_cold: false,
        };
        assert!(matches!(garbage.reference_ms(), Err(TimegrapherError::InvalidReferenceTime(_))));
    }

    #[tokio::test]
    async fn round_counts_only_warm_answers() {
        let source = ScriptedSource::with_script(vec![
            Ok(ServerTime {
                date: Some(REFERENCE.into()),
                server_cold: true,
            }),
            Err(TimegrapherError::InvalidConfig("network down".into())),
            Ok(ServerTime::default()),
            Ok(warm()),
            Ok(warm()),
            Ok(warm()),
        ]);
        let service = ClockSyncService::with_clock(Arc::clone(&source), SteppableClock::new(), fast_config(3)).unwrap();

        service.sync_once().await;

        assert_eq!(source.calls(), 6);
        let state = service.snapshot();
        assert_eq!(state.history().len(), 1);
        // Monotonic time is only a few ms past its origin
        let offset = state.history()[0].offset;
        assert!((offset - REFERENCE_MS).abs() < 1000.0, "offset {offset}");
        assert_eq!(service.drift_rate(), None);
    }

    #[tokio::test]
    async fn periodic_resync_builds_drift_history() {
        let source = ScriptedSource::with_script(Vec::new());
        let config = ClockSyncConfig {
            refresh_interval_minutes: 0.0005,
            ..fast_config(2)
        };
        let service = ClockSyncService::with_clock(source, SteppableClock::new(), config).unwrap();

        service.set_enabled(true);
        wait_until(|| service.snapshot().history().len() >= 3).await;
        service.set_enabled(false);

        assert!(!service.is_enabled());
        assert!(service.drift_rate().is_some());
        assert!(service.estimated_error_sec_per_day().unwrap() > 0.0);
        assert!(service.reference_now().is_some());
    }

    #[tokio::test]
    async fn disable_keeps_history_and_reenable_waits_for_interval() {
        let source = ScriptedSource::with_script(Vec::new());
        let service = ClockSyncService::with_clock(Arc::clone(&source), SteppableClock::new(), fast_config(2)).unwrap();

        service.set_enabled(true);
        assert!(service.is_enabled());
        wait_until(|| service.is_synced()).await;
        service.set_enabled(false);
        let calls = source.calls();
        assert!(service.is_synced());

        // Last sync is fresh: re-enabling schedules the remainder of the 10 min interval
        service.set_enabled(true);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(source.calls(), calls);
        assert_eq!(service.snapshot().history().len(), 1);
    }

    #[tokio::test]
    async fn clock_step_resets_history_and_resyncs() {
        let source = ScriptedSource::with_script(Vec::new());
        let clock = SteppableClock::new();
        let service = ClockSyncService::with_clock(Arc::clone(&source), Arc::clone(&clock), fast_config(2)).unwrap();

        service.set_enabled(true);
        wait_until(|| service.is_synced()).await;
        let first_round = service.snapshot().history()[0];

        clock.step_wall(60_000.0);
        wait_until(|| {
            let history = service.snapshot();
            history.history().len() == 1 && history.history()[0] != first_round
        })
        .await;

        assert_eq!(source.calls(), 4);
        assert!(service.is_enabled());
    }

    #[tokio::test]
    async fn disabling_discards_partial_round() {
        // Every answer fails, so the round never completes
        let source = ScriptedSource::with_script(
            (0..1000)
                .map(|_| Err(TimegrapherError::InvalidConfig("unreachable".into())))
                .collect(),
        );
        let service = ClockSyncService::with_clock(Arc::clone(&source), SteppableClock::new(), fast_config(2)).unwrap();

        service.set_enabled(true);
        wait_until(|| source.calls() >= 3).await;
        service.set_enabled(false);
        let calls = source.calls();

        sleep(Duration::from_millis(30)).await;
        assert_eq!(source.calls(), calls);
        assert!(!service.is_synced());
    }
}
