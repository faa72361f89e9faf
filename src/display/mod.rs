//! Display geometry for the beat-error plot.

pub mod frames;
