//! Frame windowing — lay tick times onto a grid of one slot per expected beat.
//!
//! Each tick is plotted as its signed deviation (ms) from the nominal beat
//! instant, measured from the first tick. The grid grows without bound, so
//! only a viewport of at most `max_frames_visible` slots is returned; the
//! viewport either tracks the newest frames or stays pinned where the user
//! scrolled it.

use serde::Serialize;

/// Beats per hour → nominal ms between beats.
pub fn frame_span_ms(bph: f64) -> f64 {
    3_600_000.0 / bph
}

/// Where the viewport sits on the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollState {
    /// Position derives from the scroll fraction on every view.
    Tracking,
    /// Position is fixed to a grid index while the grid grows underneath.
    Pinned { start_frame: usize },
}

/// Display-ready slice of the frame grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameView {
    /// One entry per visible slot; `None` where no tick was recorded.
    pub offsets: Vec<Option<f64>>,
    /// Start time of the first visible slot.
    pub viewport_start_time: f64,
    /// Start time of slot 0 (half a frame before the first tick).
    pub first_frame_time: f64,
    pub first_tick_time: f64,
    /// Scroll fraction matching the returned viewport.
    pub scroll_fraction: f64,
    /// Length of the whole grid.
    pub total_frames: usize,
}

type ScrollListener = Box<dyn FnMut(f64)>;

/// Maps a tick timeline onto a scrollable grid of beat frames.
pub struct FrameWindower {
    max_frames_visible: usize,
    scroll_fraction: f64,
    scroll_state: ScrollState,
    use_network_time: bool,
    listeners: Vec<ScrollListener>,
}

impl std::fmt::Debug for FrameWindower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWindower")
            .field("max_frames_visible", &self.max_frames_visible)
            .field("scroll_fraction", &self.scroll_fraction)
            .field("scroll_state", &self.scroll_state)
            .field("use_network_time", &self.use_network_time)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for FrameWindower {
    fn default() -> Self {
        Self::new(100)
    }
}

impl FrameWindower {
    pub fn new(max_frames_visible: usize) -> Self {
        Self {
            max_frames_visible: max_frames_visible.max(1),
            scroll_fraction: 1.0,
            scroll_state: ScrollState::Tracking,
            use_network_time: false,
            listeners: Vec::new(),
        }
    }

    pub fn max_frames_visible(&self) -> usize {
        self.max_frames_visible
    }

    pub fn set_max_frames_visible(&mut self, max_frames_visible: usize) {
        self.max_frames_visible = max_frames_visible.max(1);
    }

    pub fn scroll_fraction(&self) -> f64 {
        self.scroll_fraction
    }

    pub fn scroll_state(&self) -> ScrollState {
        self.scroll_state
    }

    /// Move the viewport. 1.0 follows the newest frames; anything lower pins
    /// the viewport on the next view.
    pub fn set_scroll_fraction(&mut self, fraction: f64) {
        self.scroll_fraction = if fraction.is_nan() { 1.0 } else { fraction.clamp(0.0, 1.0) };
        self.scroll_state = ScrollState::Tracking;
    }

    pub fn use_network_time(&self) -> bool {
        self.use_network_time
    }

    /// Rescale tick offsets by the reference-clock drift rate when set.
    pub fn set_use_network_time(&mut self, enabled: bool) {
        self.use_network_time = enabled;
    }

    /// Register a callback for scroll fractions re-derived by [`Self::view`].
    pub fn on_scroll_fraction_changed(&mut self, listener: impl FnMut(f64) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Return to the trailing edge, notifying listeners if the fraction moved.
    pub fn reset_scroll(&mut self) {
        let moved = self.scroll_fraction != 1.0;
        self.scroll_fraction = 1.0;
        self.scroll_state = ScrollState::Tracking;
        if moved {
            self.publish(1.0);
        }
    }

    fn publish(&mut self, fraction: f64) {
        for listener in &mut self.listeners {
            listener(fraction);
        }
    }

    /// Build the visible slice of the grid.
    ///
    /// `latest_time` is the end of the analysed data and sets the grid length;
    /// drift scaling only moves the ticks within that grid.
    /// Returns `None` until at least one tick exists.
    pub fn view(
        &mut self,
        tick_times: &[f64],
        latest_time: f64,
        frame_span_ms: f64,
        drift_rate: Option<f64>,
    ) -> Option<FrameView> {
        let first_tick_time = *tick_times.first()?;
        if frame_span_ms.is_nan() || frame_span_ms <= 0.0 {
            return None;
        }

        let scale = match drift_rate {
            Some(rate) if self.use_network_time && rate != 0.0 => 1.0 + rate,
            _ => 1.0,
        };

        let span = (latest_time - first_tick_time).max(0.0);
        let total_frames = (span / frame_span_ms).round() as usize;

        let (start_frame, frame_count) = if total_frames <= self.max_frames_visible {
            (0, total_frames)
        } else {
            let max_start = total_frames - self.max_frames_visible;
            (self.viewport_start(max_start), self.max_frames_visible)
        };

        let mut offsets = vec![None; frame_count];
        for &tick in tick_times {
            let since_first = (tick - first_tick_time) * scale;
            let frame = (since_first / frame_span_ms).round() as i64 - start_frame as i64;
            if frame >= 0 && (frame as usize) < frame_count {
                let nominal = (frame as usize + start_frame) as f64 * frame_span_ms;
                offsets[frame as usize] = Some(since_first - nominal);
            }
        }

        let first_frame_time = first_tick_time - frame_span_ms / 2.0;
        Some(FrameView {
            offsets,
            viewport_start_time: first_frame_time + start_frame as f64 * frame_span_ms,
            first_frame_time,
            first_tick_time,
            scroll_fraction: self.scroll_fraction,
            total_frames,
        })
    }

    // Resolve the first visible frame, pinning it when the user scrolled away
    // from the trailing edge.
    fn viewport_start(&mut self, max_start: usize) -> usize {
        let start = match self.scroll_state {
            ScrollState::Pinned { start_frame } => start_frame.min(max_start),
            ScrollState::Tracking => (self.scroll_fraction * max_start as f64).round() as usize,
        };

        if self.scroll_fraction < 1.0 || matches!(self.scroll_state, ScrollState::Pinned { .. }) {
            self.scroll_state = ScrollState::Pinned { start_frame: start };
            let fraction = start as f64 / max_start as f64;
            if fraction != self.scroll_fraction {
                self.scroll_fraction = fraction;
                self.publish(fraction);
            }
        }

        start
    }
}
