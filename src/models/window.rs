use serde::{Deserialize, Serialize};

use super::MICROS_PER_SECOND;

/// Configuration for window generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window duration in seconds
    pub window_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { window_secs: 10 }
    }
}

impl WindowConfig {
    /// Window duration in microseconds
    pub fn window_us(&self) -> i64 {
        self.window_secs as i64 * MICROS_PER_SECOND
    }
}

/// One fixed-duration slice of a signal's time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Position of the window in its grid
    pub index: usize,
    /// Start timestamp in microseconds
    pub start_us: i64,
    /// End timestamp in microseconds (exclusive)
    pub end_us: i64,
    /// First sample index
    pub start_sample: usize,
    /// One past the last sample index
    pub end_sample: usize,
}

impl Window {
    /// Duration of this window in microseconds
    pub fn duration_us(&self) -> i64 {
        self.end_us - self.start_us
    }

    /// Whether an annotator range touches this window
    ///
    /// A range counts when it covers the window start (`start <= w.start < end`)
    /// or covers the window end (`start < w.end <= end`). The two tests are
    /// deliberately asymmetric at the edges.
    pub fn overlaps(&self, range_start: i64, range_end: i64) -> bool {
        (range_start <= self.start_us && self.start_us < range_end)
            || (range_start < self.end_us && self.end_us <= range_end)
    }
}

/// The canonical windows of one waveform record
#[derive(Debug, Clone)]
pub struct WindowGrid {
    /// Source the windows belong to
    pub source_id: String,
    /// Signal the windows belong to
    pub signal_name: String,
    /// Samples per window
    pub window_samples: usize,
    /// All windows in time order
    pub windows: Vec<Window>,
}

impl WindowGrid {
    /// Number of windows
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Find the window covering exactly `[start_us, end_us)`
    pub fn find(&self, start_us: i64, end_us: i64) -> Option<&Window> {
        let first = self.windows.first()?;
        let width = first.duration_us();
        if width <= 0 || start_us < first.start_us {
            return None;
        }
        let index = ((start_us - first.start_us) / width) as usize;
        self.windows
            .get(index)
            .filter(|w| w.start_us == start_us && w.end_us == end_us)
    }
}
