use crate::snapshot::UploadStats;

/// Receives throttled progress reports during an upload.
///
/// Reports arrive at most every 100 ms, plus a forced report when the
/// current directory completes. Rendering is the caller's concern.
pub trait UploadProgress: Send + Sync {
    fn progress(&self, directory: &str, completed: u64, total: u64, stats: &UploadStats);
    fn upload_finished(&self);
}

/// Discards all reports; the default.
pub struct NullUploadProgress;

impl UploadProgress for NullUploadProgress {
    fn progress(&self, _directory: &str, _completed: u64, _total: u64, _stats: &UploadStats) {}
    fn upload_finished(&self) {}
}
