//! Drift estimation between the local monotonic clock and a reference clock.
//!
//! Each sync round yields one averaged offset (`reference − local`). The
//! drift rate is the slope of that offset across the whole history:
//!
//! ```text
//! first:  local 10,  offset 101   (reference 111)
//! last:   local 999, offset 102   (reference 1101)
//! drift_rate = (102 − 101) / (999 − 10) = 1/989
//!
//! true_duration = drift_rate · local_duration + local_duration
//! 1101 = (1/989)·989 + 989 + 101 + 10
//! ```
//!
//! Network jitter dwarfs real crystal drift over short spans, so the rate
//! only becomes useful once the history covers tens of minutes; see
//! [`ClockSync::estimated_error_sec_per_day`].

const SECONDS_PER_DAY: f64 = 60.0 * 60.0 * 24.0;

/// One completed sync round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    /// Local monotonic time (ms) at the end of the round.
    pub local_time: f64,
    /// Averaged `reference − local` offset (ms).
    pub offset: f64,
}

/// Offset of a single round trip, assuming symmetric network latency.
pub fn query_offset(call_start: f64, call_end: f64, reference_time: f64) -> f64 {
    let half_flight = (call_end - call_start) / 2.0;
    (reference_time + half_flight) - call_end
}

/// Offset / drift history for one local clock.
#[derive(Debug, Clone)]
pub struct ClockSync {
    history: Vec<ClockSample>,
    drift_rate: Option<f64>,
    estimated_error_sec_per_day: Option<f64>,
    wall_offset_at_sync: Option<f64>,
    per_check_error_ms: f64,
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new(100.0)
    }
}

impl ClockSync {
    /// `per_check_error_ms` is the measurement error budget of one round.
    pub fn new(per_check_error_ms: f64) -> Self {
        Self {
            history: Vec::new(),
            drift_rate: None,
            estimated_error_sec_per_day: None,
            wall_offset_at_sync: None,
            per_check_error_ms,
        }
    }

    pub fn history(&self) -> &[ClockSample] {
        &self.history
    }

    pub fn is_synced(&self) -> bool {
        !self.history.is_empty()
    }

    /// `true_duration = drift_rate · local_duration + local_duration`.
    ///
    /// `None` until two rounds spanning a positive local duration exist.
    pub fn drift_rate(&self) -> Option<f64> {
        self.drift_rate
    }

    /// ± seconds per day of uncertainty in [`Self::drift_rate`].
    pub fn estimated_error_sec_per_day(&self) -> Option<f64> {
        self.estimated_error_sec_per_day
    }

    pub fn latest(&self) -> Option<ClockSample> {
        self.history.last().copied()
    }

    /// Reference time corresponding to `local_now`, from the newest offset.
    pub fn reference_time(&self, local_now: f64) -> Option<f64> {
        self.latest().map(|sample| local_now + sample.offset)
    }

    /// Append one sample and refresh the derived estimates.
    ///
    /// `wall_offset` is `wall clock − monotonic clock` at the time of the
    /// sample, remembered for [`Self::detect_discontinuity`].
    pub fn record(&mut self, sample: ClockSample, wall_offset: f64) {
        self.history.push(sample);
        self.wall_offset_at_sync = Some(wall_offset);
        self.update_estimates();
    }

    /// Average the offsets of one round and record the result.
    ///
    /// Returns the recorded sample, or `None` for an empty round.
    pub fn record_round(&mut self, local_time: f64, offsets: &[f64], wall_offset: f64) -> Option<ClockSample> {
        if offsets.is_empty() {
            return None;
        }
        let offset = offsets.iter().sum::<f64>() / offsets.len() as f64;
        let sample = ClockSample { local_time, offset };
        self.record(sample, wall_offset);
        Some(sample)
    }

    /// True when the wall/monotonic relationship moved by more than
    /// `threshold_ms` since the last sync (clock change, sleep/wake).
    pub fn detect_discontinuity(&self, wall_offset_now: f64, threshold_ms: f64) -> bool {
        self.wall_offset_at_sync
            .is_some_and(|at_sync| (wall_offset_now - at_sync).abs() > threshold_ms)
    }

    /// Time to wait before the next round is due.
    ///
    /// Zero when nothing was ever synced or the last round is older than
    /// `interval_ms`; otherwise the remainder of the interval.
    pub fn resync_delay(&self, local_now: f64, interval_ms: f64) -> f64 {
        match self.latest() {
            Some(sample) => {
                let elapsed = local_now - sample.local_time;
                if elapsed > interval_ms { 0.0 } else { interval_ms - elapsed }
            }
            None => 0.0,
        }
    }

    /// Forget every sample and derived value.
    pub fn reset(&mut self) {
        self.history.clear();
        self.drift_rate = None;
        self.estimated_error_sec_per_day = None;
        self.wall_offset_at_sync = None;
    }

    fn update_estimates(&mut self) {
        let (first, last) = match (self.history.first(), self.history.last()) {
            (Some(first), Some(last)) if self.history.len() >= 2 => (*first, *last),
            _ => {
                self.drift_rate = None;
                self.estimated_error_sec_per_day = None;
                return;
            }
        };

        let local_duration = last.local_time - first.local_time;
        if local_duration <= 0.0 {
            self.drift_rate = None;
            self.estimated_error_sec_per_day = None;
            return;
        }

        self.drift_rate = Some((last.offset - first.offset) / local_duration);
        self.estimated_error_sec_per_day = Some(self.per_check_error_ms / local_duration * SECONDS_PER_DAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_rate_from_two_rounds() {
        let mut sync = ClockSync::default();
        sync.record(ClockSample { local_time: 10.0, offset: 101.0 }, 0.0);
        assert_eq!(sync.drift_rate(), None);

        sync.record(ClockSample { local_time: 999.0, offset: 102.0 }, 0.0);
        let rate = sync.drift_rate().unwrap();
        assert_eq!(rate, 1.0 / 989.0);

        // Reconstruct the reference time of the last round from the first
        let local_duration = 989.0;
        let true_duration = rate * local_duration + local_duration;
        let reconstructed = true_duration + 101.0 + 10.0;
        assert!((reconstructed - 1101.0).abs() < 1e-9);
    }

    #[test]
    fn error_estimate_shrinks_with_span() {
        let mut sync = ClockSync::new(100.0);
        sync.record(ClockSample { local_time: 0.0, offset: 5.0 }, 0.0);
        sync.record(ClockSample { local_time: 60_000.0, offset: 5.0 }, 0.0);
        let one_minute = sync.estimated_error_sec_per_day().unwrap();
        assert!((one_minute - 144.0).abs() < 1e-9);

        sync.record(ClockSample { local_time: 3_600_000.0, offset: 5.0 }, 0.0);
        let one_hour = sync.estimated_error_sec_per_day().unwrap();
        assert!((one_hour - 2.4).abs() < 1e-9);
        assert_eq!(sync.drift_rate(), Some(0.0));
    }

    #[test]
    fn zero_local_span_has_no_rate() {
        let mut sync = ClockSync::default();
        sync.record(ClockSample { local_time: 5.0, offset: 1.0 }, 0.0);
        sync.record(ClockSample { local_time: 5.0, offset: 2.0 }, 0.0);
        assert_eq!(sync.drift_rate(), None);
        assert_eq!(sync.estimated_error_sec_per_day(), None);
    }

    #[test]
    fn symmetric_round_trip_offset() {
        // Sent at 100, answered 140 with reference 1120 stamped mid-flight
        assert_eq!(query_offset(100.0, 140.0, 1120.0), 1000.0);
    }

    #[test]
    fn round_is_averaged() {
        let mut sync = ClockSync::default();
        assert_eq!(sync.record_round(50.0, &[], 0.0), None);
        assert!(!sync.is_synced());

        let sample = sync.record_round(50.0, &[10.0, 12.0, 14.0], 0.0).unwrap();
        assert_eq!(sample, ClockSample { local_time: 50.0, offset: 12.0 });
        assert_eq!(sync.reference_time(100.0), Some(112.0));
    }

    #[test]
    fn discontinuity_against_last_sync() {
        let mut sync = ClockSync::default();
        assert!(!sync.detect_discontinuity(1e12, 30_000.0));

        sync.record(ClockSample { local_time: 0.0, offset: 0.0 }, 1_000_000.0);
        assert!(!sync.detect_discontinuity(1_020_000.0, 30_000.0));
        assert!(sync.detect_discontinuity(1_040_000.0, 30_000.0));
        assert!(sync.detect_discontinuity(960_000.0, 30_000.0));
    }

    #[test]
    fn resync_delay_resumes_interval() {
        let mut sync = ClockSync::default();
        assert_eq!(sync.resync_delay(0.0, 600_000.0), 0.0);

        sync.record(ClockSample { local_time: 100_000.0, offset: 0.0 }, 0.0);
        assert_eq!(sync.resync_delay(400_000.0, 600_000.0), 300_000.0);
        assert_eq!(sync.resync_delay(800_000.0, 600_000.0), 0.0);
    }

    #[test]
    fn reset_discards_history() {
        let mut sync = ClockSync::default();
        sync.record(ClockSample { local_time: 0.0, offset: 1.0 }, 10.0);
        sync.record(ClockSample { local_time: 1000.0, offset: 2.0 }, 10.0);
        sync.reset();

        assert!(!sync.is_synced());
        assert_eq!(sync.drift_rate(), None);
        assert!(!sync.detect_discontinuity(1e9, 30_000.0));
    }
}
