use indicatif::{ProgressBar, ProgressStyle};
use refile_core::ProgressReporter;
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Index and listing phases: spinner (totals unknown upfront)
/// - Matching and relocation: progress bar
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn spinner(&self, message: &'static str) {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn counter(&self, verb: &str, total: usize) {
        let pb = ProgressBar::new(total as u64);
        let template = format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} files ({{eta}} remaining)",
            verb
        );
        let style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn set_position(&self, done: usize, total: usize) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                if pb.length() != Some(total as u64) {
                    pb.set_length(total as u64);
                }
                pb.set_position(done as u64);
            }
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_index_start(&self) {
        self.spinner("Indexing local files...");
    }

    fn on_index_complete(&self, total_files: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Index complete: {} local files in {:.2}s",
            total_files, duration_secs
        );
    }

    fn on_enumerate_start(&self) {
        self.spinner("Listing remote files...");
    }

    fn on_enumerate_complete(&self, remote_files: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Listing complete: {} remote files in {:.2}s",
            remote_files, duration_secs
        );
    }

    fn on_match_start(&self, remote_files: usize) {
        self.counter("Hashing", remote_files);
    }

    fn on_match_progress(&self, files_done: usize, total_files: usize) {
        self.set_position(files_done, total_files);
    }

    fn on_match_complete(&self, matched: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Matching complete: {} files matched in {:.2}s",
            matched, duration_secs
        );
    }

    fn on_relocate_start(&self, planned: usize) {
        self.counter("Relocating", planned);
    }

    fn on_relocate_progress(&self, files_done: usize, total_files: usize) {
        self.set_position(files_done, total_files);
    }

    fn on_relocate_complete(&self, succeeded: usize, failed: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Relocation complete: {} moved, {} failed in {:.2}s",
            succeeded, failed, duration_secs
        );
    }
}
