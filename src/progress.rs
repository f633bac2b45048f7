use indicatif::{ProgressBar, ProgressStyle};
use oci_distribution::progress::{ProgressObserver, TransferProgress};

/// Draws one progress line per blob, e.g. `deadb:Downloading 12MB/30MB`.
#[derive(Default)]
pub struct TerminalProgress {
    bar: Option<ProgressBar>,
    transfer: TransferProgress,
}

impl ProgressObserver for TerminalProgress {
    fn on_start(&mut self, label: &str, total: u64) {
        self.transfer = TransferProgress::new(label, total);
        let bar = ProgressBar::new(total);
        bar.set_style(line_style());
        bar.set_message(self.transfer.message());
        self.bar = Some(bar);
    }

    fn on_chunk(&mut self, delta: u64) {
        self.transfer.record(delta);
        if let Some(bar) = &self.bar {
            bar.inc(delta);
            bar.set_message(self.transfer.message());
        }
    }

    fn on_finish(&mut self, skipped: bool) {
        if let Some(bar) = self.bar.take() {
            let status = if skipped {
                "Already exists"
            } else {
                "Download complete!"
            };
            bar.finish_with_message(format!("{}:{}", self.transfer.label, status));
        }
    }
}

fn line_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_bar())
}
