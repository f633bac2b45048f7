//! Transfer progress reporting
//!
//! A blob transfer hands every chunk's byte count to a [`ProgressObserver`]
//! right after writing it. The observer owns any counting and display; the
//! transfer itself stays unaware of how progress is shown.

const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// Receives the progress of a single blob transfer.
pub trait ProgressObserver: Send {
    /// A transfer of `total` bytes, shown as `label`, is about to begin.
    fn on_start(&mut self, label: &str, total: u64);

    /// `delta` more bytes were written to disk.
    fn on_chunk(&mut self, delta: u64);

    /// The transfer finished. `skipped` is true when the destination already
    /// held a file of the expected size and nothing was transferred.
    fn on_finish(&mut self, skipped: bool);
}

/// An observer that discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_start(&mut self, _label: &str, _total: u64) {}
    fn on_chunk(&mut self, _delta: u64) {}
    fn on_finish(&mut self, _skipped: bool) {}
}

/// The running byte count of one transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferProgress {
    /// The label the transfer is shown under
    pub label: String,
    /// Bytes written so far
    pub written: u64,
    /// Bytes expected in total
    pub total: u64,
}

impl TransferProgress {
    /// Starts counting a transfer.
    pub fn new(label: &str, total: u64) -> Self {
        TransferProgress {
            label: label.to_owned(),
            written: 0,
            total,
        }
    }

    /// Adds `delta` written bytes.
    pub fn record(&mut self, delta: u64) {
        self.written = self.written.saturating_add(delta);
    }

    /// The progress line, e.g. `deadb:Downloading 1KB/3MB`.
    pub fn message(&self) -> String {
        format!(
            "{}:Downloading {}/{}",
            self.label,
            humanize(self.written),
            humanize(self.total)
        )
    }
}

/// Formats a byte count in binary units, truncating to a whole number.
///
/// ```
/// use oci_distribution::progress::humanize;
///
/// assert_eq!(humanize(1536), "1KB");
/// assert_eq!(humanize(5 * 1024 * 1024), "5MB");
/// ```
pub fn humanize(bytes: u64) -> String {
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024 && unit < UNITS.len() - 1 {
        value /= 1024;
        unit += 1;
    }
    format!("{}{}", value, UNITS[unit])
}
