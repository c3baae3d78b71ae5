pub mod walk;

pub use walk::{ScanIssue, ScanStats, SizeIndex};
