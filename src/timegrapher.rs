//! Timegrapher session — one audio stream from capture to display.
//!
//! Owns the sample buffer, tick extractor and frame windower for a single
//! stream, and keeps them consistent when settings change mid-run.

use crate::config::TimegrapherConfig;
use crate::display::frames::{FrameView, FrameWindower};
use crate::dsp::peak::PeakDetectionMethod;
use crate::dsp::sample_buffer::SampleBuffer;
use crate::dsp::tick_extractor::{ExtractorSettings, TickExtractor};
use crate::error::TimegrapherError;

/// A running timegrapher measurement.
#[derive(Debug)]
pub struct Timegrapher {
    config: TimegrapherConfig,
    sample_rate: f64,
    buffer: SampleBuffer,
    extractor: TickExtractor,
    windower: FrameWindower,
    drift_rate: Option<f64>,
}

impl Timegrapher {
    /// Start a session for audio arriving at `sample_rate` Hz.
    pub fn new(config: TimegrapherConfig, sample_rate: f64) -> Result<Self, TimegrapherError> {
        config.validate()?;
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(TimegrapherError::InvalidConfig(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }

        let buffer = SampleBuffer::with_duration(config.retention_ms, sample_rate);
        let extractor = TickExtractor::new(ExtractorSettings {
            frame_span_ms: config.frame_span_ms(),
            method: config.peak_detection_method,
            db_cutoff: config.db_cutoff,
        });
        let mut windower = FrameWindower::new(config.max_frames_visible);
        windower.set_use_network_time(config.use_network_time);

        log::debug!(
            "Timegrapher started: {} bph, {} Hz, {} sample buffer",
            config.bph,
            sample_rate,
            buffer.capacity()
        );

        Ok(Self {
            config,
            sample_rate,
            buffer,
            extractor,
            windower,
            drift_rate: None,
        })
    }

    pub fn config(&self) -> &TimegrapherConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    /// Feed captured audio. `end_timestamp` is the time of the last sample.
    pub fn push_samples(&mut self, end_timestamp: f64, samples: &[f32]) {
        self.buffer.add(end_timestamp, samples);
    }

    /// Look for new ticks in buffered audio. Returns how many were found.
    pub fn scan(&mut self) -> usize {
        self.extractor.scan(&self.buffer, self.sample_rate)
    }

    pub fn tick_times(&self) -> &[f64] {
        self.extractor.tick_times()
    }

    /// Current display grid, or `None` before the first tick.
    pub fn view(&mut self) -> Option<FrameView> {
        let latest = self
            .extractor
            .data_end_time()
            .or_else(|| self.extractor.last_tick_time())?;
        self.windower.view(
            self.extractor.tick_times(),
            latest,
            self.config.frame_span_ms(),
            self.drift_rate,
        )
    }

    /// Change the nominal rate. Ticks are kept and re-bucketed on the next view.
    pub fn set_bph(&mut self, bph: f64) -> Result<(), TimegrapherError> {
        let mut config = self.config.clone();
        config.bph = bph;
        config.validate()?;
        self.config = config;
        self.extractor.set_frame_span_ms(self.config.frame_span_ms());
        Ok(())
    }

    pub fn set_peak_detection_method(&mut self, method: PeakDetectionMethod) {
        self.config.peak_detection_method = method;
        self.extractor.set_method(method);
    }

    pub fn set_db_cutoff(&mut self, db_cutoff: f64) -> Result<(), TimegrapherError> {
        let mut config = self.config.clone();
        config.db_cutoff = db_cutoff;
        config.validate()?;
        self.config = config;
        self.extractor.set_db_cutoff(db_cutoff);
        Ok(())
    }

    pub fn set_max_frames_visible(&mut self, max_frames_visible: usize) {
        self.config.max_frames_visible = max_frames_visible.max(1);
        self.windower.set_max_frames_visible(max_frames_visible);
    }

    pub fn set_use_network_time(&mut self, enabled: bool) {
        self.config.use_network_time = enabled;
        self.windower.set_use_network_time(enabled);
    }

    /// Latest reference-clock drift rate, applied when network time is on.
    pub fn set_drift_rate(&mut self, drift_rate: Option<f64>) {
        self.drift_rate = drift_rate;
    }

    pub fn scroll_fraction(&self) -> f64 {
        self.windower.scroll_fraction()
    }

    pub fn set_scroll_fraction(&mut self, fraction: f64) {
        self.windower.set_scroll_fraction(fraction);
    }

    /// Notify `listener` whenever a pinned viewport re-derives its scroll fraction.
    pub fn on_scroll_fraction_changed(&mut self, listener: impl FnMut(f64) + 'static) {
        self.windower.on_scroll_fraction_changed(listener);
    }

    /// Discard buffered audio and detected ticks; settings are kept.
    ///
    /// The viewport returns to the trailing edge and scroll listeners are
    /// told if it moved.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.extractor.clear();
        self.windower.reset_scroll();
    }
}
