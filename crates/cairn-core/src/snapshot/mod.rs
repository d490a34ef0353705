use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::block::BlockStatsSnapshot;
use crate::object::ObjectId;

/// Per-upload statistics, frozen into the snapshot manifest.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStats {
    pub total_file_count: u64,
    pub total_file_size: u64,
    pub cached_files: u64,
    pub non_cached_files: u64,
    pub total_directory_count: u64,
    pub read_errors: u64,
    pub excluded_file_count: u64,
    pub excluded_total_file_size: u64,
    #[serde(default)]
    pub blocks: BlockStatsSnapshot,
}

/// Top-level record of one upload: the root object, the hash cache written
/// for the next run, and statistics. Persisting this document is the
/// caller's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub root_object_id: ObjectId,
    pub hash_cache_id: ObjectId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Files modified after this instant were not written to the hash cache.
    pub hash_cache_cutoff: DateTime<Utc>,
    /// `None` for a complete upload; otherwise "cancelled" or "limit reached".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_reason: Option<String>,
    pub stats: UploadStats,
}
