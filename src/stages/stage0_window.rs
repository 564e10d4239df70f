use tracing::debug;

use crate::error::{ConsensusError, Result};
use crate::models::{Window, WindowConfig, WindowGrid, WaveformRecord};

/// Stage 0: cut a waveform record into its canonical window grid
///
/// `window_samples = floor(frequency * window_secs)` and only whole windows are
/// kept, so a trailing partial window is dropped. Window `i` spans
/// `[start + i * window, start + (i + 1) * window)` in microseconds. The grid
/// depends only on the record and the window length, which is what makes
/// windows from different annotators comparable by `(start, end)` alone.
pub fn build_window_grid(record: &WaveformRecord, config: &WindowConfig) -> Result<WindowGrid> {
    if record.sample_count() == 0 {
        return Err(ConsensusError::EmptySignal {
            signal: record.name().to_string(),
            source_id: record.source_id().to_string(),
        });
    }

    let frequency = record.frequency();
    if !frequency.is_finite() || frequency <= 0.0 {
        return Err(ConsensusError::InvalidFrequency {
            signal: record.name().to_string(),
            frequency,
        });
    }

    let window_samples = (frequency * config.window_secs as f64).floor() as usize;
    let window_count = if window_samples == 0 {
        0
    } else {
        record.sample_count() / window_samples
    };
    let window_us = config.window_us();

    let windows: Vec<Window> = (0..window_count)
        .map(|i| {
            let start_us = record.start_us() + i as i64 * window_us;
            Window {
                index: i,
                start_us,
                end_us: start_us + window_us,
                start_sample: i * window_samples,
                end_sample: (i + 1) * window_samples,
            }
        })
        .collect();

    debug!(
        "{} ({}): {} windows of {} samples, {} trailing samples dropped",
        record.name(),
        record.source_id(),
        windows.len(),
        window_samples,
        record.sample_count() - window_count * window_samples
    );

    Ok(WindowGrid {
        source_id: record.source_id().to_string(),
        signal_name: record.name().to_string(),
        window_samples,
        windows,
    })
}
