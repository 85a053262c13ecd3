use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt;
use std::time::Instant;

/// Below this average rate the progress line carries a slow-connection warning.
pub const SLOW_RATE_KB_PER_SEC: f64 = 512.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub bytes_received: u64,
    pub at: Instant,
}

/// Average transfer rate in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct TransferRate(pub f64);

impl TransferRate {
    pub fn kilobytes_per_sec(&self) -> f64 {
        self.0 / 1024.0
    }

    pub fn is_slow(&self) -> bool {
        self.kilobytes_per_sec() < SLOW_RATE_KB_PER_SEC
    }
}

impl fmt::Display for TransferRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kb = self.kilobytes_per_sec();
        if kb < 1024.0 {
            write!(f, "{kb:.2} KB/s")
        } else {
            write!(f, "{:.2} MB/s", kb / 1024.0)
        }
    }
}

/// Append-only record of bytes received over time for one transfer.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    samples: Vec<ProgressSample>,
    total_bytes: Option<u64>,
}

impl ProgressTracker {
    pub fn new(total_bytes: Option<u64>) -> Self {
        Self {
            samples: Vec::new(),
            total_bytes: total_bytes.filter(|&n| n > 0),
        }
    }

    pub fn record(&mut self, bytes_received: u64) -> ProgressSample {
        self.record_at(bytes_received, Instant::now())
    }

    /// Appends a sample. Byte counts never go backwards: a smaller value than
    /// the last one recorded is clamped up to it.
    pub fn record_at(&mut self, bytes_received: u64, at: Instant) -> ProgressSample {
        let bytes_received = self
            .last()
            .map_or(bytes_received, |last| bytes_received.max(last.bytes_received));
        let sample = ProgressSample { bytes_received, at };
        self.samples.push(sample);
        sample
    }

    pub fn samples(&self) -> &[ProgressSample] {
        &self.samples
    }

    pub fn last(&self) -> Option<&ProgressSample> {
        self.samples.last()
    }

    pub fn bytes_received(&self) -> u64 {
        self.last().map_or(0, |s| s.bytes_received)
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    pub fn percent(&self) -> Option<u8> {
        self.total_bytes.map(|total| {
            let pct = self.bytes_received().saturating_mul(100) / total;
            pct.min(100) as u8
        })
    }

    /// Average rate since the first sample. The first sample only starts the
    /// clock, so at least two samples with elapsed time are needed.
    pub fn rate(&self) -> Option<TransferRate> {
        let first = self.samples.first()?;
        let last = self.samples.last()?;
        let elapsed = last.at.checked_duration_since(first.at)?.as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        Some(TransferRate(last.bytes_received as f64 / elapsed))
    }

    /// Bar message for the latest sample, or `None` while no rate is known yet.
    pub fn rate_message(&self) -> Option<String> {
        let rate = self.rate()?;
        let mut message = format!("(Average speed: {rate})");
        if rate.is_slow() {
            message.push_str(" [Warning: slow connection detected, this will take a while]");
        }
        Some(message)
    }
}

/// Returns the style for a download whose size is known.
pub fn bytes_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "  Downloaded: {percent:>3}% [{bar:30}] {bytes:>10}/{total_bytes} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("━━╾─")
}

/// Returns the style for a download the server did not report a size for.
pub fn unknown_size_style() -> ProgressStyle {
    ProgressStyle::with_template("  {spinner} Downloaded: {bytes:>10} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Progress bar for one transfer. Drawn to stderr, or not at all when hidden.
pub fn download_bar(total_bytes: Option<u64>, visible: bool) -> ProgressBar {
    let target = if visible {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };
    let total_bytes = total_bytes.filter(|&n| n > 0);
    let style = match total_bytes {
        Some(_) => bytes_style(),
        None => unknown_size_style(),
    };
    ProgressBar::with_draw_target(total_bytes, target).with_style(style)
}
