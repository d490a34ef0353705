use std::cmp::Ordering;
use std::io::Read;
use std::str::FromStr;

use crate::object::{ObjectId, WriterOptions};
use crate::testutil::test_repo;
use crate::upload::hashcache::{
    metadata_hash, traversal_cmp, HashCacheEntry, HashCacheReader, HashCacheWriter,
};
use crate::upload::source::{EntryMetadata, EntryType};

fn entry(path: &str, hash: u64) -> HashCacheEntry {
    HashCacheEntry {
        path: path.to_string(),
        hash,
        object_id: ObjectId::from_str("Ddeadbeef").unwrap(),
    }
}

fn metadata(name: &str, mtime_ns: i64, size: u64) -> EntryMetadata {
    EntryMetadata {
        name: name.to_string(),
        entry_type: EntryType::File,
        mode: 0o644,
        mtime_ns,
        uid: 1000,
        gid: 1000,
        size,
    }
}

#[test]
fn metadata_hash_is_stable_and_sensitive() {
    let md = metadata("file.txt", 1_700_000_000_000_000_000, 1234);
    let base = metadata_hash("file.txt", &md);
    assert_eq!(base, metadata_hash("file.txt", &md));

    let mut touched = md.clone();
    touched.mtime_ns += 1;
    assert_ne!(base, metadata_hash("file.txt", &touched));

    let mut resized = md.clone();
    resized.size += 1;
    assert_ne!(base, metadata_hash("file.txt", &resized));

    assert_ne!(base, metadata_hash("other.txt", &metadata("other.txt", md.mtime_ns, md.size)));
}

#[test]
fn traversal_order_puts_subtrees_before_files() {
    // Within a directory, subdirectory subtrees come before regular files,
    // regardless of names.
    assert_eq!(traversal_cmp("./sub/x", "./file"), Ordering::Less);
    assert_eq!(traversal_cmp("./file", "./sub/x"), Ordering::Greater);

    // Among leaves and among directories, names order as usual.
    assert_eq!(traversal_cmp("./a", "./b"), Ordering::Less);
    assert_eq!(traversal_cmp("./a/x", "./b/x"), Ordering::Less);
    assert_eq!(traversal_cmp("./x", "./x"), Ordering::Equal);

    // Deeper subtrees order by their first differing component.
    assert_eq!(traversal_cmp("./a/b/c", "./a/b/d"), Ordering::Less);
    assert_eq!(traversal_cmp("./a/sub/x", "./a/leaf"), Ordering::Less);
}

#[test]
fn writer_reader_roundtrip() {
    let (_store, repo) = test_repo();

    let writer = repo.objects().new_writer(WriterOptions::default());
    let mut cache_writer = HashCacheWriter::new(writer);
    cache_writer.write_entry(&entry("./sub/inner", 11)).unwrap();
    cache_writer.write_entry(&entry("./a", 22)).unwrap();
    cache_writer.write_entry(&entry("./b", 33)).unwrap();
    let id = cache_writer.finalize().unwrap();

    let reader = repo.objects().open(&id).unwrap();
    let mut cache = HashCacheReader::open(reader).unwrap();
    assert_eq!(cache.len(), 3);

    assert_eq!(cache.find_entry("./sub/inner").unwrap().hash, 11);
    assert_eq!(cache.find_entry("./a").unwrap().hash, 22);
    assert_eq!(cache.find_entry("./b").unwrap().hash, 33);
    // Cursor is exhausted.
    assert!(cache.find_entry("./z").is_none());
}

#[test]
fn find_entry_skips_deleted_paths() {
    let (_store, repo) = test_repo();

    let writer = repo.objects().new_writer(WriterOptions::default());
    let mut cache_writer = HashCacheWriter::new(writer);
    for (path, hash) in [("./a", 1u64), ("./b", 2), ("./c", 3)] {
        cache_writer.write_entry(&entry(path, hash)).unwrap();
    }
    let id = cache_writer.finalize().unwrap();

    let reader = repo.objects().open(&id).unwrap();
    let mut cache = HashCacheReader::open(reader).unwrap();

    // "./b" was deleted from the tree; querying "./c" skips past it.
    assert_eq!(cache.find_entry("./a").unwrap().hash, 1);
    assert_eq!(cache.find_entry("./c").unwrap().hash, 3);
    // A path before the cursor is gone.
    assert!(cache.find_entry("./b").is_none());
}

#[test]
fn writer_rejects_out_of_order_paths() {
    let (_store, repo) = test_repo();

    let writer = repo.objects().new_writer(WriterOptions::default());
    let mut cache_writer = HashCacheWriter::new(writer);
    cache_writer.write_entry(&entry("./b", 1)).unwrap();
    let err = cache_writer.write_entry(&entry("./a", 2)).unwrap_err();
    assert!(matches!(err, crate::error::CairnError::MalformedData(_)));
}

#[test]
fn copy_to_preserves_unconsumed_tail() {
    let (_store, repo) = test_repo();

    let writer = repo.objects().new_writer(WriterOptions::default());
    let mut cache_writer = HashCacheWriter::new(writer);
    for (path, hash) in [("./a", 1u64), ("./b", 2), ("./c", 3), ("./d", 4)] {
        cache_writer.write_entry(&entry(path, hash)).unwrap();
    }
    let id = cache_writer.finalize().unwrap();

    let reader = repo.objects().open(&id).unwrap();
    let mut cache = HashCacheReader::open(reader).unwrap();
    // Consume the first two entries.
    cache.find_entry("./a").unwrap();
    cache.find_entry("./b").unwrap();

    // Copy the remainder into a fresh cache object.
    let writer = repo.objects().new_writer(WriterOptions::default());
    let mut new_writer = HashCacheWriter::new(writer);
    cache.copy_to(&mut new_writer).unwrap();
    let new_id = new_writer.finalize().unwrap();

    let reader = repo.objects().open(&new_id).unwrap();
    let mut copied = HashCacheReader::open(reader).unwrap();
    assert_eq!(copied.len(), 2);
    assert_eq!(copied.find_entry("./c").unwrap().hash, 3);
    assert_eq!(copied.find_entry("./d").unwrap().hash, 4);
}

#[test]
fn truncated_stream_is_malformed() {
    let (_store, repo) = test_repo();

    let writer = repo.objects().new_writer(WriterOptions::default());
    let mut cache_writer = HashCacheWriter::new(writer);
    cache_writer.write_entry(&entry("./a", 1)).unwrap();
    let id = cache_writer.finalize().unwrap();

    let mut reader = repo.objects().open(&id).unwrap();
    let mut data = Vec::new();
    reader.read_to_end(&mut data).unwrap();
    data.truncate(data.len() - 3);

    let err = HashCacheReader::open(&data[..]).unwrap_err();
    assert!(matches!(err, crate::error::CairnError::MalformedData(_)));
}

#[test]
fn empty_reader_finds_nothing() {
    let mut cache = HashCacheReader::empty();
    assert!(cache.is_empty());
    assert!(cache.find_entry("./anything").is_none());
}
