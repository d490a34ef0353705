use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use cairn_core::chunker::SplitterKind;
use cairn_core::config::{CompactOptions, MetadataEncryption, RepositoryOptions};
use cairn_core::hashing::HashAlgorithm;
use cairn_core::object::WriterOptions;
use cairn_core::platform::fs::set_file_mtime;
use cairn_core::repo::Repository;
use cairn_core::storage::local::LocalStore;
use cairn_core::upload::dir::parse_directory;
use cairn_core::upload::source::local_source;
use cairn_core::upload::Uploader;

fn test_options() -> RepositoryOptions {
    RepositoryOptions {
        max_block_size: 4096,
        splitter: SplitterKind::Fixed,
        block_format: HashAlgorithm::HmacSha256,
        object_hmac_secret: None,
        metadata_encryption: MetadataEncryption::None,
        pack_target_size: 1 << 20,
    }
}

fn init_repo(dir: &Path) -> Repository {
    let store = Box::new(LocalStore::new(dir).unwrap());
    Repository::init(store, &test_options(), None).unwrap()
}

fn open_repo(dir: &Path) -> Repository {
    let store = Box::new(LocalStore::new(dir).unwrap());
    Repository::open(store, None).unwrap()
}

fn write_tree(root: &Path) {
    std::fs::create_dir_all(root.join("docs")).unwrap();
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(root.join("README.md"), b"cairn integration fixture\n").unwrap();
    std::fs::write(root.join("docs/guide.txt"), vec![0x42u8; 10_000]).unwrap();
    std::fs::write(root.join("src/main.rs"), b"fn main() {}\n").unwrap();

    // Age every file past the hash-cache cutoff.
    for path in [
        root.join("README.md"),
        root.join("docs/guide.txt"),
        root.join("src/main.rs"),
    ] {
        set_file_mtime(&path, 1_600_000_000, 0).unwrap();
    }
}

fn read_object(repo: &Repository, id: &cairn_core::object::ObjectId) -> Vec<u8> {
    let mut reader = repo.objects().open(id).unwrap();
    let mut data = Vec::new();
    reader.read_to_end(&mut data).unwrap();
    data
}

#[test]
fn init_write_reopen_read() {
    let repo_dir = tempfile::tempdir().unwrap();

    let data: Vec<u8> = (0u32..100_000).map(|i| (i % 251) as u8).collect();
    let id = {
        let repo = init_repo(repo_dir.path());
        let mut writer = repo.objects().new_writer(WriterOptions::default());
        writer.write(&data).unwrap();
        let id = writer.result().unwrap();
        repo.flush().unwrap();
        id
    };

    let repo = open_repo(repo_dir.path());
    assert_eq!(read_object(&repo, &id), data);

    // Random access after reopen.
    let mut reader = repo.objects().open(&id).unwrap();
    reader.seek(SeekFrom::Start(50_000)).unwrap();
    let mut slice = vec![0u8; 1000];
    reader.read_exact(&mut slice).unwrap();
    assert_eq!(slice, &data[50_000..51_000]);
}

#[test]
fn backup_restore_lifecycle() {
    let repo_dir = tempfile::tempdir().unwrap();
    let source_dir = tempfile::tempdir().unwrap();
    write_tree(source_dir.path());

    // Initial upload.
    let first = {
        let repo = init_repo(repo_dir.path());
        let source = local_source(source_dir.path()).unwrap();
        let mut uploader = Uploader::new(&repo);
        uploader.parallel_uploads = 4;
        let manifest = uploader.upload(&source, None).unwrap();
        repo.flush().unwrap();
        manifest
    };
    assert!(first.incomplete_reason.is_none());
    assert_eq!(first.stats.total_file_count, 3);

    // Reopen, read everything back.
    {
        let repo = open_repo(repo_dir.path());
        let root = parse_directory(&read_object(&repo, &first.root_object_id)).unwrap();
        let readme = root
            .iter()
            .find(|e| e.metadata.name == "README.md")
            .expect("README.md present");
        assert_eq!(
            read_object(&repo, &readme.object_id),
            b"cairn integration fixture\n"
        );

        let docs = root.iter().find(|e| e.metadata.name == "docs").unwrap();
        let docs_entries = parse_directory(&read_object(&repo, &docs.object_id)).unwrap();
        assert_eq!(docs_entries.len(), 1);
        assert_eq!(
            read_object(&repo, &docs_entries[0].object_id),
            vec![0x42u8; 10_000]
        );
    }

    // Second upload of the unchanged tree: full hash-cache reuse.
    let second = {
        let repo = open_repo(repo_dir.path());
        let source = local_source(source_dir.path()).unwrap();
        let mut uploader = Uploader::new(&repo);
        let manifest = uploader.upload(&source, Some(&first)).unwrap();
        repo.flush().unwrap();
        manifest
    };
    assert_eq!(second.stats.cached_files, second.stats.total_file_count);
    assert_eq!(second.root_object_id, first.root_object_id);

    // Compact repeatedly; everything stays readable across restarts.
    for _ in 0..2 {
        let repo = open_repo(repo_dir.path());
        repo.blocks()
            .compact_indexes(CompactOptions {
                min_small_blocks: 1,
                max_small_blocks: 100,
            })
            .unwrap();
    }
    let repo = open_repo(repo_dir.path());
    let root = parse_directory(&read_object(&repo, &first.root_object_id)).unwrap();
    assert_eq!(root.len(), 3);
}

#[test]
fn modified_file_produces_new_root() {
    let repo_dir = tempfile::tempdir().unwrap();
    let source_dir = tempfile::tempdir().unwrap();
    write_tree(source_dir.path());

    let repo = init_repo(repo_dir.path());
    let source = local_source(source_dir.path()).unwrap();
    let mut uploader = Uploader::new(&repo);
    let first = uploader.upload(&source, None).unwrap();
    repo.flush().unwrap();

    std::fs::write(source_dir.path().join("README.md"), b"changed\n").unwrap();
    set_file_mtime(&source_dir.path().join("README.md"), 1_600_000_100, 0).unwrap();

    let source = local_source(source_dir.path()).unwrap();
    let mut uploader = Uploader::new(&repo);
    let second = uploader.upload(&source, Some(&first)).unwrap();
    repo.flush().unwrap();

    assert_ne!(second.root_object_id, first.root_object_id);
    // Only the changed file was rehashed.
    assert_eq!(second.stats.non_cached_files, 1);
    assert_eq!(second.stats.cached_files, 2);

    let root = parse_directory(&read_object(&repo, &second.root_object_id)).unwrap();
    let readme = root
        .iter()
        .find(|e| e.metadata.name == "README.md")
        .unwrap();
    assert_eq!(read_object(&repo, &readme.object_id), b"changed\n");
}
