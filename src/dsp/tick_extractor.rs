//! Tick extraction — turn the rolling sample history into tick timestamps.
//!
//! The extractor is re-run periodically while audio streams in. It keeps a
//! time cursor just past the last tick it recorded, so every scan only
//! looks at frames it has not consumed yet, even though the underlying
//! ring buffer keeps overwriting its oldest samples.

use super::peak::{self, PeakDetectionMethod};
use super::sample_buffer::SampleBuffer;

/// Seconds of audio required before signal statistics are trusted.
pub const MIN_HISTORY_SECONDS: f64 = 1.5;

/// Fraction of a frame skipped after a tick, so its trailing edge is not
/// detected as a new tick.
pub const DEAD_ZONE_FRACTION: f64 = 0.1;

/// Peaks this close to the newest sample are left for the next scan.
pub const TAIL_GUARD_MS: f64 = 200.0;

/// Detection parameters that may change while the stream is running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractorSettings {
    /// Nominal time between ticks in ms.
    pub frame_span_ms: f64,
    pub method: PeakDetectionMethod,
    /// Threshold for [`PeakDetectionMethod::ThresholdCrossing`].
    pub db_cutoff: f64,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            frame_span_ms: 1000.0,
            method: PeakDetectionMethod::MaxMagnitude,
            db_cutoff: 7.0,
        }
    }
}

/// Incremental tick finder over a [`SampleBuffer`].
#[derive(Debug, Clone, Default)]
pub struct TickExtractor {
    settings: ExtractorSettings,
    tick_times: Vec<f64>,
    /// Time of the last sample already consumed by a scan.
    cursor: Option<f64>,
    data_end_time: Option<f64>,
}

impl TickExtractor {
    pub fn new(settings: ExtractorSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    /// Change the frame span. Recorded ticks are kept; only future windows
    /// use the new span.
    pub fn set_frame_span_ms(&mut self, frame_span_ms: f64) {
        self.settings.frame_span_ms = frame_span_ms;
    }

    pub fn set_method(&mut self, method: PeakDetectionMethod) {
        self.settings.method = method;
    }

    pub fn set_db_cutoff(&mut self, db_cutoff: f64) {
        self.settings.db_cutoff = db_cutoff;
    }

    /// All ticks found so far, strictly increasing.
    pub fn tick_times(&self) -> &[f64] {
        &self.tick_times
    }

    pub fn first_tick_time(&self) -> Option<f64> {
        self.tick_times.first().copied()
    }

    pub fn last_tick_time(&self) -> Option<f64> {
        self.tick_times.last().copied()
    }

    /// End timestamp of the data seen by the latest scan with enough history.
    pub fn data_end_time(&self) -> Option<f64> {
        self.data_end_time
    }

    /// Drop every tick and restart detection from scratch.
    pub fn clear(&mut self) {
        self.tick_times.clear();
        self.cursor = None;
        self.data_end_time = None;
    }

    /// Scan newly buffered audio for ticks. Returns how many were appended.
    pub fn scan(&mut self, buffer: &SampleBuffer, sample_rate: f64) -> usize {
        if sample_rate <= 0.0 || (buffer.len() as f64) < sample_rate * MIN_HISTORY_SECONDS {
            return 0;
        }

        let before = self.tick_times.len();
        let end = buffer.end_timestamp();
        self.data_end_time = Some(end);

        let cursor = match self.cursor {
            Some(cursor) => cursor,
            None => match self.seed(buffer, sample_rate) {
                Some(cursor) => cursor,
                None => return 0,
            },
        };

        // Only the span after the cursor is needed; one extra sample absorbs rounding.
        let needed = ((end - cursor) * sample_rate / 1000.0).ceil().max(0.0) as usize + 1;
        let (end, samples) = buffer.window(Some(needed));
        let window = Window {
            samples: &samples,
            end,
            sample_rate,
        };

        let frame_len = ((self.settings.frame_span_ms * sample_rate / 1000.0).round() as usize).max(1);
        let dead_zone_ms = self.settings.frame_span_ms * DEAD_ZONE_FRACTION;
        let reference = match self.settings.method {
            PeakDetectionMethod::ThresholdCrossing => buffer.root_mean_square(),
            PeakDetectionMethod::MaxMagnitude => 0.0,
        };

        let mut cursor = cursor;
        loop {
            let start = window.index_after(cursor);
            let stop = start + frame_len;
            if stop > samples.len() {
                break;
            }

            let frame = &samples[start..stop];
            match self.settings.method.locate(frame, reference, self.settings.db_cutoff) {
                Some(offset) => {
                    let tick = window.time_of(start + offset);
                    if tick > end - TAIL_GUARD_MS {
                        break;
                    }
                    debug_assert!(self.tick_times.last().is_none_or(|&last| tick > last));
                    self.tick_times.push(tick);
                    cursor = tick + dead_zone_ms;
                }
                None => cursor = window.time_of(stop - 1),
            }
        }
        self.cursor = Some(cursor);

        let found = self.tick_times.len() - before;
        if found > 0 {
            log::debug!(
                "Found {} tick(s), {} total, latest at {:.1} ms",
                found,
                self.tick_times.len(),
                self.tick_times[self.tick_times.len() - 1]
            );
        }
        found
    }

    // Locate the first tick from the loudest sample in the whole held window.
    fn seed(&mut self, buffer: &SampleBuffer, sample_rate: f64) -> Option<f64> {
        let (end, samples) = buffer.window(None);
        let index = peak::max_magnitude_index(&samples)?;
        let window = Window {
            samples: &samples,
            end,
            sample_rate,
        };

        let tick = window.time_of(index);
        if tick > end - TAIL_GUARD_MS {
            log::debug!("Seed peak at {tick:.1} ms is still forming, deferring");
            return None;
        }

        self.tick_times.push(tick);
        log::debug!("Seeded tick timeline at {tick:.1} ms");
        Some(tick + self.settings.frame_span_ms * DEAD_ZONE_FRACTION)
    }
}

/// A contiguous run of samples whose last sample sits at `end` ms.
struct Window<'a> {
    samples: &'a [f32],
    end: f64,
    sample_rate: f64,
}

impl Window<'_> {
    fn time_of(&self, index: usize) -> f64 {
        let samples_from_end = (self.samples.len() - 1 - index) as f64;
        self.end - samples_from_end * 1000.0 / self.sample_rate
    }

    fn start_time(&self) -> f64 {
        self.time_of(0)
    }

    /// Index of the first sample strictly after `time`, clamped to the window start.
    fn index_after(&self, time: f64) -> usize {
        let position = ((time - self.start_time()) * self.sample_rate / 1000.0).round() + 1.0;
        position.max(0.0) as usize
    }
}
