pub mod dir;
pub mod hashcache;
pub mod progress;
pub mod source;

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::error::{CairnError, Result};
use crate::object::{ObjectId, ObjectWriter, WriterOptions};
use crate::repo::Repository;
use crate::snapshot::{Manifest, UploadStats};
use crate::upload::dir::{DirEntry, DirectoryWriter};
use crate::upload::hashcache::{metadata_hash, HashCacheEntry, HashCacheReader, HashCacheWriter};
use crate::upload::progress::{NullUploadProgress, UploadProgress};
use crate::upload::source::{
    DirectoryEntry, EntryMetadata, EntryType, FileEntry, SourceEntry, SymlinkEntry,
};

/// Buffer size for the file-copy inner loop.
const COPY_BUFFER_SIZE: usize = 128 * 1024;

/// Minimum interval between progress reports.
const PROGRESS_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Default age below which files are not written to the new hash cache,
/// protecting against caching the hash of a file being mutated concurrently.
pub const DEFAULT_HASH_CACHE_MIN_AGE: Duration = Duration::from_secs(3600);

/// Include/exclude predicate applied to every entry before upload.
#[derive(Debug, Clone, Default)]
pub struct FilesPolicy {
    /// Entry names excluded from the upload. Excluded directories are not
    /// descended into.
    pub exclude_names: Vec<String>,
    /// Files larger than this are excluded.
    pub max_file_size: Option<u64>,
}

impl FilesPolicy {
    pub fn should_include(&self, metadata: &EntryMetadata) -> bool {
        if self.exclude_names.iter().any(|n| n == &metadata.name) {
            return false;
        }
        if metadata.entry_type == EntryType::File {
            if let Some(max) = self.max_file_size {
                if metadata.size > max {
                    return false;
                }
            }
        }
        true
    }
}

/// Atomic upload counters; workers increment concurrently.
#[derive(Debug, Default)]
struct Counters {
    total_file_count: AtomicU64,
    total_file_size: AtomicU64,
    cached_files: AtomicU64,
    non_cached_files: AtomicU64,
    total_directory_count: AtomicU64,
    read_errors: AtomicU64,
    excluded_file_count: AtomicU64,
    excluded_total_file_size: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.total_file_count.store(0, Ordering::Relaxed);
        self.total_file_size.store(0, Ordering::Relaxed);
        self.cached_files.store(0, Ordering::Relaxed);
        self.non_cached_files.store(0, Ordering::Relaxed);
        self.total_directory_count.store(0, Ordering::Relaxed);
        self.read_errors.store(0, Ordering::Relaxed);
        self.excluded_file_count.store(0, Ordering::Relaxed);
        self.excluded_total_file_size.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self, repo: &Repository) -> UploadStats {
        UploadStats {
            total_file_count: self.total_file_count.load(Ordering::Relaxed),
            total_file_size: self.total_file_size.load(Ordering::Relaxed),
            cached_files: self.cached_files.load(Ordering::Relaxed),
            non_cached_files: self.non_cached_files.load(Ordering::Relaxed),
            total_directory_count: self.total_directory_count.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            excluded_file_count: self.excluded_file_count.load(Ordering::Relaxed),
            excluded_total_file_size: self.excluded_total_file_size.load(Ordering::Relaxed),
            blocks: repo.blocks().stats(),
        }
    }
}

/// Per-directory progress accounting, guarded by its own mutex.
struct ProgressState {
    next_report_at: Instant,
    current_dir: String,
    dir_completed: u64,
    dir_total: u64,
}

/// Result of one work item: the directory entry to record (or the error
/// that produced none) and the metadata hash for the new hash cache.
struct EntryResult {
    outcome: Result<DirEntry>,
    metadata_hash: Option<u64>,
}

/// A unit of per-entry work, dispatched to the worker pool.
struct WorkItem<'a> {
    relative_path: String,
    mtime_ns: i64,
    task: Task<'a>,
}

enum Task<'a> {
    /// Hash cache hit: the result is already known.
    Cached(Box<EntryResult>),
    File(&'a dyn FileEntry),
    Symlink(&'a dyn SymlinkEntry),
}

/// Uploads filesystem trees into the repository.
///
/// Walks each directory in two passes (subdirectories, then regular
/// entries), dispatches per-entry work to a pool of `parallel_uploads`
/// workers, and consumes results in the original entry order so directory
/// objects are byte-identical regardless of worker scheduling.
pub struct Uploader<'r> {
    repo: &'r Repository,

    /// Progress sink; reports are throttled.
    pub progress: Box<dyn UploadProgress>,
    /// Criteria for including and excluding entries.
    pub files_policy: FilesPolicy,
    /// Cancel automatically once this many bytes were written. 0 = unlimited.
    pub max_upload_bytes: u64,
    /// Count-and-skip per-file read errors instead of aborting.
    pub ignore_file_errors: bool,
    /// Probability [0..100] with which hash cache entries are ignored, so
    /// flaky cached hashes eventually get refreshed.
    pub force_hash_percentage: u32,
    /// Files younger than this are not written to the new hash cache.
    pub hash_cache_min_age: Duration,
    /// Number of entries to hash and upload in parallel.
    pub parallel_uploads: usize,

    counters: Counters,
    cancelled: AtomicBool,
    /// Nanosecond timestamp of the hash-cache cutoff for the current run.
    hash_cache_cutoff_ns: i64,
    /// Block-layer written bytes at upload start, for `max_upload_bytes`.
    base_written_bytes: u64,
    /// Per-upload PRNG for the force-hash coin.
    rng: Mutex<StdRng>,
    progress_state: Mutex<ProgressState>,
}

impl<'r> Uploader<'r> {
    pub fn new(repo: &'r Repository) -> Self {
        Self {
            repo,
            progress: Box::new(NullUploadProgress),
            files_policy: FilesPolicy::default(),
            max_upload_bytes: 0,
            ignore_file_errors: true,
            force_hash_percentage: 0,
            hash_cache_min_age: DEFAULT_HASH_CACHE_MIN_AGE,
            parallel_uploads: 1,
            counters: Counters::default(),
            cancelled: AtomicBool::new(false),
            hash_cache_cutoff_ns: 0,
            base_written_bytes: 0,
            rng: Mutex::new(StdRng::from_entropy()),
            progress_state: Mutex::new(ProgressState {
                next_report_at: Instant::now(),
                current_dir: String::new(),
                dir_completed: 0,
                dir_total: 0,
            }),
        }
    }

    /// Request cancellation of an upload in progress. Typically results in
    /// a manifest with `incomplete_reason` set.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_reason().is_some()
    }

    fn cancel_reason(&self) -> Option<&'static str> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Some("cancelled");
        }
        if self.max_upload_bytes > 0 {
            let written = self
                .repo
                .blocks()
                .stats()
                .written_bytes
                .saturating_sub(self.base_written_bytes);
            if written > self.max_upload_bytes {
                return Some("limit reached");
            }
        }
        None
    }

    /// Upload the source tree, consulting `old`'s hash cache to skip
    /// unchanged files, and return the manifest for this run.
    pub fn upload(&mut self, source: &SourceEntry, old: Option<&Manifest>) -> Result<Manifest> {
        self.counters.reset();
        *self.rng.lock().expect("uploader rng lock poisoned") = StdRng::from_entropy();
        self.base_written_bytes = self.repo.blocks().stats().written_bytes;

        let start_time = Utc::now();
        let min_age =
            chrono::Duration::from_std(self.hash_cache_min_age).unwrap_or(chrono::Duration::hours(1));
        let cutoff = start_time - min_age;
        self.hash_cache_cutoff_ns = cutoff.timestamp_nanos_opt().unwrap_or(i64::MAX);

        let mut cache_reader = self.open_previous_cache(old);

        let (root_object_id, hash_cache_id) = match source {
            SourceEntry::Directory(dir) => self.upload_root_dir(dir.as_ref(), &mut cache_reader)?,
            SourceEntry::File(file) => {
                let name = file.metadata().name.clone();
                self.counters.total_file_count.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .total_file_size
                    .fetch_add(file.metadata().size, Ordering::Relaxed);
                let result = self.upload_file_internal(file.as_ref(), &name);
                (result.outcome?.object_id, ObjectId::Null)
            }
            SourceEntry::Symlink(link) => {
                let name = link.metadata().name.clone();
                let result = self.upload_symlink_internal(link.as_ref(), &name);
                (result.outcome?.object_id, ObjectId::Null)
            }
        };

        // Make written object data durable; the caller persists the index
        // via `BlockManager::flush` before treating IDs as addressable.
        self.repo.objects().flush()?;

        let manifest = Manifest {
            root_object_id,
            hash_cache_id,
            start_time,
            end_time: Utc::now(),
            hash_cache_cutoff: cutoff,
            incomplete_reason: self.cancel_reason().map(String::from),
            stats: self.counters.snapshot(self.repo),
        };
        self.progress.upload_finished();
        Ok(manifest)
    }

    fn open_previous_cache(&self, old: Option<&Manifest>) -> HashCacheReader {
        let Some(old) = old else {
            return HashCacheReader::empty();
        };
        if old.hash_cache_id.is_null() {
            return HashCacheReader::empty();
        }
        match self
            .repo
            .objects()
            .open(&old.hash_cache_id)
            .and_then(HashCacheReader::open)
        {
            Ok(reader) => {
                debug!(id = %old.hash_cache_id, entries = reader.len(), "opened hash cache");
                reader
            }
            Err(e) => {
                warn!(id = %old.hash_cache_id, "unable to open hash cache: {e}");
                HashCacheReader::empty()
            }
        }
    }

    fn upload_root_dir(
        &self,
        dir: &dyn DirectoryEntry,
        cache_reader: &mut HashCacheReader,
    ) -> Result<(ObjectId, ObjectId)> {
        let cache_object_writer = self.repo.objects().new_writer(WriterOptions {
            description: format!("HASHCACHE:{}", dir.metadata().name),
        });
        let mut cache_writer = HashCacheWriter::new(cache_object_writer);

        let result = self.upload_dir_internal(dir, ".", cache_reader, &mut cache_writer);

        if self.is_cancelled() {
            // Preserve the un-consumed remainder of the previous cache so the
            // next run can resume; best-effort only.
            if let Err(e) = cache_reader.copy_to(&mut cache_writer) {
                warn!("unable to copy remaining hash cache entries: {e}");
            }
        }

        let root = result?;
        let hash_cache_id = cache_writer.finalize()?;
        Ok((root, hash_cache_id))
    }

    /// Upload one directory, returning its object ID. On cancellation the
    /// directory finishes flushing the entries it already has.
    fn upload_dir_internal(
        &self,
        dir: &dyn DirectoryEntry,
        relative_path: &str,
        cache_reader: &mut HashCacheReader,
        cache_writer: &mut HashCacheWriter,
    ) -> Result<ObjectId> {
        self.counters
            .total_directory_count
            .fetch_add(1, Ordering::Relaxed);

        let entries = dir.entries()?;
        let writer = self.repo.objects().new_writer(WriterOptions {
            description: format!("DIR:{relative_path}"),
        });
        let mut dw = DirectoryWriter::new(writer);

        match self.run_dir_passes(&entries, relative_path, &mut dw, cache_reader, cache_writer) {
            Ok(()) => {}
            Err(CairnError::Cancelled) => {
                debug!(path = relative_path, "cancelled; flushing partial directory");
            }
            Err(e) => return Err(e),
        }

        dw.finalize()
    }

    fn run_dir_passes(
        &self,
        entries: &[SourceEntry],
        relative_path: &str,
        dw: &mut DirectoryWriter,
        cache_reader: &mut HashCacheReader,
        cache_writer: &mut HashCacheWriter,
    ) -> Result<()> {
        // Pass 1: recurse into subdirectories.
        for entry in entries {
            if self.is_cancelled() {
                return Err(CairnError::Cancelled);
            }
            let SourceEntry::Directory(sub) = entry else {
                continue;
            };
            let metadata = sub.metadata();
            if !self.files_policy.should_include(metadata) {
                debug!(name = %metadata.name, "ignoring excluded directory");
                self.counters
                    .excluded_file_count
                    .fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let child_path = format!("{relative_path}/{}", metadata.name);
            let object_id =
                self.upload_dir_internal(sub.as_ref(), &child_path, cache_reader, cache_writer)?;
            dw.write_entry(&DirEntry {
                metadata: metadata.clone(),
                object_id,
            })?;
        }

        self.prepare_progress(relative_path, entries);

        // Pass 2: files and symlinks through the worker pool.
        let items = self.prepare_work_items(entries, relative_path, cache_reader)?;
        self.process_work_items(items, dw, cache_writer)
    }

    /// Sum included file sizes for per-directory progress reporting.
    fn prepare_progress(&self, relative_path: &str, entries: &[SourceEntry]) {
        let total: u64 = entries
            .iter()
            .filter(|e| matches!(e, SourceEntry::File(_)))
            .filter(|e| self.files_policy.should_include(e.metadata()))
            .map(|e| e.metadata().size)
            .sum();

        let mut state = self
            .progress_state
            .lock()
            .expect("progress state lock poisoned");
        state.current_dir = relative_path.to_string();
        state.dir_completed = 0;
        state.dir_total = total;
    }

    /// Build work items for the regular entries of one directory,
    /// consulting the previous run's hash cache.
    fn prepare_work_items<'a>(
        &self,
        entries: &'a [SourceEntry],
        relative_path: &str,
        cache_reader: &mut HashCacheReader,
    ) -> Result<Vec<WorkItem<'a>>> {
        let mut items = Vec::new();

        for entry in entries {
            if self.is_cancelled() {
                return Err(CairnError::Cancelled);
            }
            if matches!(entry, SourceEntry::Directory(_)) {
                continue;
            }

            let metadata = entry.metadata();
            if !self.files_policy.should_include(metadata) {
                debug!(name = %metadata.name, "ignoring excluded entry");
                self.counters
                    .excluded_file_count
                    .fetch_add(1, Ordering::Relaxed);
                self.counters
                    .excluded_total_file_size
                    .fetch_add(metadata.size, Ordering::Relaxed);
                continue;
            }

            let entry_relative_path = format!("{relative_path}/{}", metadata.name);

            if metadata.entry_type == EntryType::File {
                self.counters.total_file_count.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .total_file_size
                    .fetch_add(metadata.size, Ordering::Relaxed);
            }

            // See if we had this entry during the previous run, and whether
            // its metadata is unchanged.
            let cached = cache_reader
                .find_entry(&entry_relative_path)
                .filter(|_| !self.roll_force_hash())
                .cloned();
            let computed_hash = metadata_hash(&metadata.name, metadata);
            let cache_matches = cached.as_ref().is_some_and(|c| c.hash == computed_hash);

            let task = if cache_matches {
                let cached = cached.expect("cache_matches implies a cached entry");
                self.counters.cached_files.fetch_add(1, Ordering::Relaxed);
                self.add_dir_progress(metadata.size);
                Task::Cached(Box::new(EntryResult {
                    outcome: Ok(DirEntry {
                        metadata: metadata.clone(),
                        object_id: cached.object_id,
                    }),
                    metadata_hash: Some(cached.hash),
                }))
            } else {
                debug!(path = %entry_relative_path, "hash cache miss");
                match entry {
                    SourceEntry::File(file) => {
                        self.counters.non_cached_files.fetch_add(1, Ordering::Relaxed);
                        Task::File(file.as_ref())
                    }
                    SourceEntry::Symlink(link) => Task::Symlink(link.as_ref()),
                    SourceEntry::Directory(_) => unreachable!("directories handled in pass 1"),
                }
            };

            items.push(WorkItem {
                relative_path: entry_relative_path,
                mtime_ns: metadata.mtime_ns,
                task,
            });
        }

        Ok(items)
    }

    /// Per-entry coin deciding whether to ignore a hash cache entry.
    fn roll_force_hash(&self) -> bool {
        if self.force_hash_percentage == 0 {
            return false;
        }
        let roll = self
            .rng
            .lock()
            .expect("uploader rng lock poisoned")
            .gen_range(0..100);
        roll < self.force_hash_percentage
    }

    /// Dispatch work items to the worker pool and consume their per-item
    /// result channels in the original entry order.
    fn process_work_items(
        &self,
        items: Vec<WorkItem<'_>>,
        dw: &mut DirectoryWriter,
        cache_writer: &mut HashCacheWriter,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let worker_count = self.parallel_uploads.max(1);

        // Each item gets its own single-slot result channel; ordering comes
        // from the consumer reading those channels in item order, never from
        // worker completion order.
        let mut receivers: Vec<(String, i64, Receiver<EntryResult>)> =
            Vec::with_capacity(items.len());
        let mut dispatch: Vec<(Task<'_>, String, Sender<EntryResult>)> =
            Vec::with_capacity(items.len());
        for item in items {
            let (tx, rx) = bounded(1);
            receivers.push((item.relative_path.clone(), item.mtime_ns, rx));
            dispatch.push((item.task, item.relative_path, tx));
        }

        std::thread::scope(|s| -> Result<()> {
            let (work_tx, work_rx) = bounded::<(Task<'_>, String, Sender<EntryResult>)>(worker_count);

            for _ in 0..worker_count {
                let rx = work_rx.clone();
                s.spawn(move || {
                    for (task, relative_path, tx) in rx {
                        let result = self.run_task(task, &relative_path);
                        // A dropped receiver means the consumer bailed early.
                        let _ = tx.send(result);
                    }
                });
            }
            drop(work_rx);

            s.spawn(move || {
                for item in dispatch {
                    if work_tx.send(item).is_err() {
                        return;
                    }
                }
            });

            for (relative_path, mtime_ns, rx) in receivers {
                let result = rx
                    .recv()
                    .map_err(|_| CairnError::Fatal("upload worker disconnected".into()))?;

                match result.outcome {
                    Err(CairnError::Cancelled) => return Err(CairnError::Cancelled),
                    Err(e) => {
                        if self.ignore_file_errors {
                            self.counters.read_errors.fetch_add(1, Ordering::Relaxed);
                            warn!(path = %relative_path, "unable to upload entry, ignoring: {e}");
                            continue;
                        }
                        return Err(e);
                    }
                    Ok(dir_entry) => {
                        dw.write_entry(&dir_entry)?;
                        if let Some(hash) = result.metadata_hash {
                            if mtime_ns < self.hash_cache_cutoff_ns {
                                cache_writer.write_entry(&HashCacheEntry {
                                    path: relative_path,
                                    hash,
                                    object_id: dir_entry.object_id,
                                })?;
                            }
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn run_task(&self, task: Task<'_>, relative_path: &str) -> EntryResult {
        match task {
            Task::Cached(result) => *result,
            Task::File(file) => self.upload_file_internal(file, relative_path),
            Task::Symlink(link) => self.upload_symlink_internal(link, relative_path),
        }
    }

    fn upload_file_internal(&self, file: &dyn FileEntry, relative_path: &str) -> EntryResult {
        let mut reader = match file.open() {
            Ok(reader) => reader,
            Err(e) => {
                return EntryResult {
                    outcome: Err(e),
                    metadata_hash: None,
                }
            }
        };

        let mut writer = self.repo.objects().new_writer(WriterOptions {
            description: format!("FILE:{}", file.metadata().name),
        });

        let written = match self.copy_with_progress(&mut writer, reader.as_mut(), relative_path) {
            Ok(written) => written,
            Err(e) => {
                return EntryResult {
                    outcome: Err(e),
                    metadata_hash: None,
                }
            }
        };

        let object_id = match writer.result() {
            Ok(id) => id,
            Err(e) => {
                return EntryResult {
                    outcome: Err(e),
                    metadata_hash: None,
                }
            }
        };

        let mut metadata = file.metadata().clone();
        metadata.size = written;
        let hash = metadata_hash(&metadata.name, &metadata);
        EntryResult {
            outcome: Ok(DirEntry {
                metadata,
                object_id,
            }),
            metadata_hash: Some(hash),
        }
    }

    fn upload_symlink_internal(&self, link: &dyn SymlinkEntry, relative_path: &str) -> EntryResult {
        let target = match link.read_link() {
            Ok(target) => target,
            Err(e) => {
                return EntryResult {
                    outcome: Err(e),
                    metadata_hash: None,
                }
            }
        };

        debug!(path = %relative_path, "uploading symlink target");
        let mut writer = self.repo.objects().new_writer(WriterOptions {
            description: format!("SYMLINK:{}", link.metadata().name),
        });

        let result = writer.write(target.as_bytes()).and_then(|()| writer.result());
        let object_id = match result {
            Ok(id) => id,
            Err(e) => {
                return EntryResult {
                    outcome: Err(e),
                    metadata_hash: None,
                }
            }
        };
        self.add_dir_progress(target.len() as u64);

        let mut metadata = link.metadata().clone();
        metadata.size = target.len() as u64;
        let hash = metadata_hash(&metadata.name, &metadata);
        EntryResult {
            outcome: Ok(DirEntry {
                metadata,
                object_id,
            }),
            metadata_hash: Some(hash),
        }
    }

    /// Copy a stream into an object writer with cancellation checks and
    /// progress accounting on every buffer.
    fn copy_with_progress(
        &self,
        writer: &mut ObjectWriter,
        reader: &mut dyn Read,
        relative_path: &str,
    ) -> Result<u64> {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut written = 0u64;

        loop {
            if self.is_cancelled() {
                return Err(CairnError::Cancelled);
            }
            let n = reader.read(&mut buf).map_err(|source| CairnError::ReadError {
                path: relative_path.to_string(),
                source,
            })?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n])?;
            written += n as u64;
            self.add_dir_progress(n as u64);
        }

        Ok(written)
    }

    /// Account progress and report it, throttled to one report per interval
    /// with a forced report when the directory completes.
    fn add_dir_progress(&self, length: u64) {
        let report = {
            let mut state = self
                .progress_state
                .lock()
                .expect("progress state lock poisoned");
            state.dir_completed += length;

            let now = Instant::now();
            let due = now >= state.next_report_at;
            let complete = state.dir_completed == state.dir_total;
            if due {
                state.next_report_at = now + PROGRESS_REPORT_INTERVAL;
            }
            (due || complete)
                .then(|| (state.current_dir.clone(), state.dir_completed, state.dir_total))
        };

        if let Some((dir, completed, total)) = report {
            let stats = self.counters.snapshot(self.repo);
            self.progress.progress(&dir, completed, total, &stats);
        }
    }
}
