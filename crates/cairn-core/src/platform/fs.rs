use std::fs::Metadata;
use std::path::Path;

/// Filesystem metadata fields that feed directory entries and the
/// hash-cache metadata hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataSummary {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime_ns: i64,
    pub size: u64,
}

pub fn summarize_metadata(metadata: &Metadata) -> MetadataSummary {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        MetadataSummary {
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            mtime_ns: metadata.mtime() * 1_000_000_000 + metadata.mtime_nsec(),
            size: metadata.len(),
        }
    }

    #[cfg(not(unix))]
    {
        use std::time::UNIX_EPOCH;

        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        MetadataSummary {
            mode: if metadata.permissions().readonly() {
                0o444
            } else {
                0o644
            },
            uid: 0,
            gid: 0,
            mtime_ns,
            size: metadata.len(),
        }
    }
}

/// Set a file's mtime without touching atime. Used by tests to age files
/// past the hash-cache cutoff.
pub fn set_file_mtime(path: &Path, secs: i64, nanos: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains null")
        })?;
        let times = [
            libc::timespec {
                tv_sec: 0,
                tv_nsec: libc::UTIME_OMIT,
            },
            libc::timespec {
                tv_sec: secs as _,
                tv_nsec: nanos as _,
            },
        ];
        if unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) } == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (path, secs, nanos);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn set_file_mtime_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.txt");
        std::fs::write(&path, b"hello").unwrap();

        let target_secs: i64 = 1_700_000_000;
        set_file_mtime(&path, target_secs, 0).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        let mtime = meta.modified().unwrap();
        let since_epoch = mtime.duration_since(SystemTime::UNIX_EPOCH).unwrap();
        let diff = (since_epoch.as_secs() as i64 - target_secs).unsigned_abs();
        assert!(diff <= 1, "mtime off by {diff} seconds");
    }

    #[test]
    fn summarize_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        std::fs::write(&path, b"12345").unwrap();

        let summary = summarize_metadata(&std::fs::metadata(&path).unwrap());
        assert_eq!(summary.size, 5);
        assert!(summary.mtime_ns > 0);
    }
}
