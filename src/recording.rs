//! Offline analysis of WAV recordings.
//!
//! A recording is replayed through a [`Timegrapher`] in 100 ms chunks with a
//! scan every `scan_interval_ms`, so results match what live capture of the
//! same audio would have produced.

use std::path::Path;

use crate::config::TimegrapherConfig;
use crate::display::frames::FrameView;
use crate::error::TimegrapherError;
use crate::timegrapher::Timegrapher;

/// Result of replaying a recording.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingAnalysis {
    pub sample_rate: u32,
    pub duration_ms: f64,
    pub tick_times: Vec<f64>,
    pub view: Option<FrameView>,
}

/// Read a WAV file as mono f32 in [-1, 1]. Channels are averaged.
pub fn read_mono(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32), TimegrapherError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let full_scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / full_scale))
                .collect::<Result<_, _>>()?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };
    Ok((mono, spec.sample_rate))
}

/// Run a recording through a fresh session.
///
/// Sample `i` is stamped `i × 1000 / sample_rate` ms.
pub fn analyse_recording(
    path: impl AsRef<Path>,
    config: TimegrapherConfig,
) -> Result<RecordingAnalysis, TimegrapherError> {
    let (samples, sample_rate) = read_mono(path)?;
    let rate = f64::from(sample_rate);
    let scan_interval_ms = config.scan_interval_ms;
    let mut session = Timegrapher::new(config, rate)?;

    let chunk_len = (sample_rate as usize / 10).max(1);
    let mut written = 0usize;
    let mut next_scan_ms = scan_interval_ms;
    for chunk in samples.chunks(chunk_len) {
        written += chunk.len();
        let end = (written - 1) as f64 * 1000.0 / rate;
        session.push_samples(end, chunk);
        if end + 1000.0 / rate >= next_scan_ms {
            session.scan();
            next_scan_ms += scan_interval_ms;
        }
    }
    session.scan();

    let duration_ms = samples.len() as f64 * 1000.0 / rate;
    log::debug!(
        "Analysed {:.1} s recording: {} ticks",
        duration_ms / 1000.0,
        session.tick_times().len()
    );

    Ok(RecordingAnalysis {
        sample_rate,
        duration_ms,
        tick_times: session.tick_times().to_vec(),
        view: session.view(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_ticks(name: &str, channels: u16) -> PathBuf {
        let path = std::env::temp_dir().join(format!("timegrapher-{}-{name}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels,
            sample_rate: 1000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..5000 {
            let value = if i % 1000 == 500 { 29_000i16 } else { 0 };
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn reads_and_mixes_channels() {
        let path = write_ticks("stereo", 2);
        let (samples, rate) = read_mono(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(rate, 1000);
        assert_eq!(samples.len(), 5000);
        assert!((samples[500] - 29_000.0 / 32_768.0).abs() < 1e-6);
        assert_eq!(samples[501], 0.0);
    }

    #[test]
    fn replays_recording() {
        let path = write_ticks("mono", 1);
        let analysis = analyse_recording(&path, TimegrapherConfig::default()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(analysis.duration_ms, 5000.0);
        assert_eq!(analysis.tick_times, vec![500.0, 1500.0, 2500.0, 3500.0, 4500.0]);
        let view = analysis.view.unwrap();
        assert_eq!(view.total_frames, 4);
        assert!(view.offsets.iter().all(|offset| *offset == Some(0.0)));
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = read_mono("/nonexistent/recording.wav");
        assert!(matches!(result, Err(TimegrapherError::Wav(_))));
    }
}
