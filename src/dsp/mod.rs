//! Signal processing — from raw microphone samples to tick timestamps.
//!
//! Audio lands in a fixed-capacity [`sample_buffer::SampleBuffer`]; the
//! [`tick_extractor::TickExtractor`] walks that buffer one beat-sized window
//! at a time and uses a [`peak::PeakDetectionMethod`] to find each tick.

pub mod peak;
pub mod sample_buffer;
pub mod tick_extractor;
