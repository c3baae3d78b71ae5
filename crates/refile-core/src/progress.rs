/// Trait for reporting run progress.
///
/// The CLI implements it with indicatif bars. All methods have default no-op
/// implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_index_start(&self) {}
    fn on_index_complete(&self, _total_files: usize, _duration_secs: f64) {}
    fn on_enumerate_start(&self) {}
    fn on_enumerate_complete(&self, _remote_files: usize, _duration_secs: f64) {}
    fn on_match_start(&self, _remote_files: usize) {}
    fn on_match_progress(&self, _files_done: usize, _total_files: usize) {}
    fn on_match_complete(&self, _matched: usize, _duration_secs: f64) {}
    fn on_relocate_start(&self, _planned: usize) {}
    fn on_relocate_progress(&self, _files_done: usize, _total_files: usize) {}
    fn on_relocate_complete(&self, _succeeded: usize, _failed: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
