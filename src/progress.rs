//! Download progress display and byte formatting for the client.

use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressStyle};

use crate::client::DownloadReport;

/// Byte-count progress bar shown while a download is receiving.
pub struct DownloadProgress {
    bar: ProgressBar,
}

impl DownloadProgress {
    pub fn new(visible: bool) -> Self {
        if !visible {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.green}] {percent}% ({bytes}/{total_bytes}) {bytes_per_sec}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self { bar }
    }

    /// Handle passed to the transfer session.
    pub fn bar(&self) -> ProgressBar {
        self.bar.clone()
    }

    pub fn finish_success(&self, report: &DownloadReport) {
        self.bar.finish_and_clear();
        println!(
            "{} {} ({}) in {} ms ({:.2} MB/s, {} mode)",
            "Completed".with(Color::Green).bold(),
            report.path.display(),
            format_bytes(report.bytes),
            report.elapsed.as_millis(),
            report.throughput_mb_s(),
            report.mode
        );
    }

    pub fn finish_error(&self, msg: &str) {
        self.bar.abandon();
        eprintln!("{} {}", "Failed".with(Color::Red).bold(), msg);
    }
}

/// Human-readable size with two decimals above one KiB.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if b < KB * KB {
        format!("{:.2} KB", b / KB)
    } else if b < KB * KB * KB {
        format!("{:.2} MB", b / (KB * KB))
    } else {
        format!("{:.2} GB", b / (KB * KB * KB))
    }
}

#[cfg(test)]
mod tests {
    use super::format_bytes;

    #[test]
    fn formats_each_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
