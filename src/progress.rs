//! Progress reporting for the directory walker
//!
//! Provides a live spinner fed by the shared walk counters, and the header
//! and summary printed around a walk.

use crate::tree::{TreeStats, WalkCounters};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

/// Progress reporter that displays walk status
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(style);

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display from the live counters
    pub fn update(&self, counters: &WalkCounters) {
        let (dirs, files, bytes, errors) = counters.snapshot();
        let elapsed = self.bar.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            (dirs + files) as f64 / elapsed
        } else {
            0.0
        };

        let msg = format!(
            "Dirs: {} | Files: {} | Size: {} | Rate: {:.0}/s | Errors: {}",
            format_number(dirs),
            format_number(files),
            format_size(bytes, BINARY),
            rate,
            format_number(errors),
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print the per-rank breakdown and totals of a finished walk
pub fn print_summary(per_rank: &[TreeStats], duration: Duration) {
    let total = TreeStats::total(per_rank);
    let duration_secs = duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        total.entries() as f64 / duration_secs
    } else {
        0.0
    };

    println!();
    println!("{}", style("Walk Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());

    if per_rank.len() > 1 {
        for (rank, stats) in per_rank.iter().enumerate() {
            println!(
                "  {} {:>4}  dirs {:>12}  files {:>14}",
                style("Rank").dim(),
                rank,
                format_number(stats.dirs),
                format_number(stats.files),
            );
        }
        println!("{}", style("─".repeat(50)).dim());
    }

    println!(
        "  {} {}",
        style("Directories:").bold(),
        format_number(total.dirs)
    );
    println!("  {} {}", style("Files:").bold(), format_number(total.files));
    if total.symlinks > 0 {
        println!(
            "  {} {}",
            style("Symlinks:").bold(),
            format_number(total.symlinks)
        );
    }
    println!("  {} {}", style("Total Size:").bold(), format_size(total.bytes, BINARY));
    println!(
        "  {} {:.1}s ({:.0} entries/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    if total.skipped > 0 {
        println!(
            "  {} {}",
            style("Skipped:").bold(),
            format_number(total.skipped)
        );
    }
    if total.errors > 0 {
        println!(
            "  {} {}",
            style("Errors:").yellow().bold(),
            format_number(total.errors)
        );
    }
    println!();
}

/// Print a header at the start of the walk
pub fn print_header(roots: &[PathBuf], ranks: usize) {
    println!();
    println!(
        "{} {}",
        style("ring-walker").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    for root in roots {
        println!("  {} {}", style("Root:").bold(), root.display());
    }
    println!("  {} {}", style("Ranks:").bold(), ranks);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }
}
