use std::io::{Read, Seek, SeekFrom};
use std::str::FromStr;

use rand::{Rng, SeedableRng};

use crate::config::RepositoryOptions;
use crate::error::CairnError;
use crate::hashing::HashAlgorithm;
use crate::object::{ObjectId, WriterOptions};
use crate::storage::BlobStore;
use crate::testutil::{reopen, test_options, test_repo, test_repo_with};

#[test]
fn writer_produces_known_object_ids() {
    let cases: Vec<(&[u8], &str)> = vec![
        (
            b"the quick brown fox jumps over the lazy dog",
            "D345acef0bcf82f1daf8e49fab7b7fac7ec296c518501eabea3645b99345a4e08",
        ),
        (
            &[0u8; 100],
            "D1d804f1f69df08f3f59070bf962de69433e3d61ac18522a805a84d8c92741340",
        ),
    ];

    for (data, expected) in cases {
        let (store, repo) = test_repo();

        let mut writer = repo.objects().new_writer(WriterOptions::default());
        writer.write(data).unwrap();
        let id = writer.result().unwrap();
        assert_eq!(id.to_string(), expected);

        repo.objects().flush().unwrap();
        repo.blocks().flush().unwrap();

        // 1 format block + 1 pack block + 1 pack index block.
        assert_eq!(store.blob_count(), 3, "blobs: {:?}", store.blob_names());
    }
}

#[test]
fn complete_chunk_in_two_writes() {
    let (_store, repo) = test_repo();

    let zeros = [0u8; 100];
    let mut writer = repo.objects().new_writer(WriterOptions::default());
    writer.write(&zeros[0..50]).unwrap();
    writer.write(&zeros[0..50]).unwrap();
    assert_eq!(
        writer.result().unwrap().to_string(),
        "D1d804f1f69df08f3f59070bf962de69433e3d61ac18522a805a84d8c92741340"
    );
}

#[test]
fn hmac_formats_produce_known_ids() {
    let cases: Vec<(HashAlgorithm, &str)> = vec![
        (
            HashAlgorithm::HmacSha256,
            "Df7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8",
        ),
        (
            HashAlgorithm::HmacSha256Half,
            "Df7bc83f430538424b13298e6aa6fb143",
        ),
    ];

    for (block_format, expected) in cases {
        let options = RepositoryOptions {
            max_block_size: 10000,
            block_format,
            object_hmac_secret: Some(b"key".to_vec()),
            ..test_options()
        };
        let (_store, repo) = test_repo_with(options);

        let mut writer = repo.objects().new_writer(WriterOptions::default());
        writer
            .write(b"The quick brown fox jumps over the lazy dog")
            .unwrap();
        let id = writer.result().unwrap();
        assert_eq!(id.to_string(), expected);

        // Round trip through the reader.
        let mut reader = repo.objects().open(&id).unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"The quick brown fox jumps over the lazy dog");
    }
}

#[test]
fn empty_object_has_id_of_empty_chunk() {
    let (_store, repo) = test_repo();
    let mut writer = repo.objects().new_writer(WriterOptions::default());
    assert_eq!(
        writer.result().unwrap().to_string(),
        "Db613679a0814d9ec772f95d778c35fc5ff1697c493715653c6c712144292c5ad"
    );
}

#[test]
fn packing_dedups_identical_objects() {
    let (store, repo) = test_repo();

    let content1 = b"hello, how do you do?";
    let content2 = b"hi, how are you?";
    let content3 = b"thank you!";

    let write = |data: &[u8]| {
        let mut w = repo.objects().new_writer(WriterOptions::default());
        w.write(data).unwrap();
        w.result().unwrap()
    };

    let oid1a = write(content1);
    let oid1b = write(content1);
    let oid2a = write(content2);
    let oid2b = write(content2);
    let oid3a = write(content3);
    let oid3b = write(content3);
    let oid2c = write(content2);
    let oid1c = write(content1);

    repo.objects().flush().unwrap();
    repo.blocks().flush().unwrap();

    assert_eq!(oid1a, oid1b);
    assert_eq!(oid1a, oid1c);
    assert_eq!(oid2a, oid2b);
    assert_eq!(oid2a, oid2c);
    assert_eq!(oid3a, oid3b);

    // format + one pack + one index, despite eight writes.
    assert_eq!(store.blob_count(), 3, "blobs: {:?}", store.blob_names());

    // Reopen and verify all objects still read back.
    let repo = reopen(&store);
    for (oid, content) in [
        (oid1a, &content1[..]),
        (oid2a, &content2[..]),
        (oid3a, &content3[..]),
    ] {
        let mut reader = repo.objects().open(&oid).unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        assert_eq!(data, content);
    }
}

#[test]
fn end_to_end_read_and_seek() {
    let (_store, repo) = test_repo();
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);

    for size in [1usize, 199, 200, 201, 9999, 512_434] {
        let mut data = vec![0u8; size];
        rng.fill(&mut data[..]);

        let mut writer = repo.objects().new_writer(WriterOptions::default());
        writer.write(&data).unwrap();
        let id = writer.result().unwrap();

        let mut reader = repo.objects().open(&id).unwrap();
        assert_eq!(reader.len(), size as u64);

        // Full read.
        let mut round_trip = Vec::new();
        reader.read_to_end(&mut round_trip).unwrap();
        assert_eq!(round_trip, data, "full read mismatch at size {size}");

        // Random partial reads.
        for _ in 0..20 {
            let sample_size = rng.gen_range(0..300usize);
            let seek_offset = rng.gen_range(0..size);
            let sample_size = sample_size.min(size - seek_offset);
            if sample_size == 0 {
                continue;
            }

            let offset = reader.seek(SeekFrom::Start(seek_offset as u64)).unwrap();
            assert_eq!(offset, seek_offset as u64);

            let mut got = vec![0u8; sample_size];
            reader.read_exact(&mut got).unwrap();
            assert_eq!(
                got,
                data[seek_offset..seek_offset + sample_size],
                "slice mismatch at size {size}, offset {seek_offset}"
            );
        }
    }
}

#[test]
fn large_object_id_is_indirect_and_survives_restart() {
    let (store, repo) = test_repo();

    let data: Vec<u8> = (0u32..40_000).map(|i| (i % 253) as u8).collect();
    let mut writer = repo.objects().new_writer(WriterOptions::default());
    writer.write(&data).unwrap();
    let id = writer.result().unwrap();
    assert!(
        id.to_string().starts_with('I'),
        "expected indirect ID, got {id}"
    );

    repo.flush().unwrap();

    let repo = reopen(&store);
    let mut reader = repo.objects().open(&id).unwrap();
    let mut round_trip = Vec::new();
    reader.read_to_end(&mut round_trip).unwrap();
    assert_eq!(round_trip, data);
}

#[test]
fn malformed_stored_data_fails_to_open() {
    let (store, repo) = test_repo();

    // Make the chunk addressable: write it, flush, then corrupt the pack.
    let mut writer = repo.objects().new_writer(WriterOptions::default());
    writer.write(b"original chunk content").unwrap();
    let id = writer.result().unwrap();
    repo.flush().unwrap();

    let pack_name = store
        .blob_names()
        .into_iter()
        .find(|n| n.starts_with('P'))
        .unwrap();

    for garbage in [&b"foo\nba"[..], b"foo\nbar1"] {
        store.corrupt(&pack_name, garbage);
        let repo = reopen(&store);
        let err = match repo.objects().open(&id) {
            Err(e) => e,
            Ok(_) => panic!("open of corrupted chunk succeeded"),
        };
        assert!(
            matches!(
                err,
                CairnError::CorruptData(_) | CairnError::MalformedData(_)
            ),
            "unexpected error: {err}"
        );
    }
}

#[test]
fn tampered_chunk_is_corrupt_data() {
    let (store, repo) = test_repo();

    let mut writer = repo.objects().new_writer(WriterOptions::default());
    writer.write(b"bytes to be tampered with").unwrap();
    let id = writer.result().unwrap();
    repo.flush().unwrap();

    let pack_name = store
        .blob_names()
        .into_iter()
        .find(|n| n.starts_with('P'))
        .unwrap();
    // Same length, different bytes: offsets stay valid, the hash does not.
    store.corrupt(&pack_name, &vec![0x5A; b"bytes to be tampered with".len()]);

    let repo = reopen(&store);
    let err = match repo.objects().open(&id) {
        Err(e) => e,
        Ok(_) => panic!("open of tampered chunk succeeded"),
    };
    assert!(matches!(err, CairnError::CorruptData(_)));
}

#[test]
fn missing_block_is_block_not_found() {
    let (_store, repo) = test_repo();

    let id = ObjectId::from_str("Ddeadbeef").unwrap();
    let err = match repo.objects().open(&id) {
        Err(e) => e,
        Ok(_) => panic!("open of missing block succeeded"),
    };
    assert!(matches!(err, CairnError::BlockNotFound(_)));
}

#[test]
fn object_id_parse_and_display() {
    let direct = ObjectId::from_str("Ddeadbeef").unwrap();
    assert_eq!(direct.to_string(), "Ddeadbeef");

    let indirect = ObjectId::from_str("Ideadbeef").unwrap();
    assert_eq!(indirect.to_string(), "Ideadbeef");
    assert_eq!(indirect.parent().unwrap(), direct);

    let double = ObjectId::from_str("IIdeadbeef").unwrap();
    assert_eq!(double.parent().unwrap(), indirect);

    assert_eq!(ObjectId::from_str("null").unwrap(), ObjectId::Null);
    assert!(ObjectId::Null.is_null());

    assert!(ObjectId::from_str("").is_err());
    assert!(ObjectId::from_str("Zdeadbeef").is_err());
    assert!(ObjectId::from_str("D").is_err());
    assert!(ObjectId::from_str("I").is_err());
    assert!(ObjectId::from_str("Dnothex").is_err());
}

#[test]
fn object_id_serde_is_textual() {
    let id = ObjectId::from_str("Ddeadbeef").unwrap();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"Ddeadbeef\"");
    let parsed: ObjectId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn open_null_object_fails() {
    let (_store, repo) = test_repo();
    let err = match repo.objects().open(&ObjectId::Null) {
        Err(e) => e,
        Ok(_) => panic!("open of null object succeeded"),
    };
    assert!(matches!(err, CairnError::InvalidObjectId(_)));
}

#[test]
fn determinism_across_repositories() {
    // Identical bytes and format parameters give identical IDs in separate
    // repository instances.
    let data: Vec<u8> = (0u32..5000).map(|i| (i * 31 % 256) as u8).collect();

    let (_s1, repo1) = test_repo();
    let (_s2, repo2) = test_repo();

    let mut w1 = repo1.objects().new_writer(WriterOptions::default());
    let mut w2 = repo2.objects().new_writer(WriterOptions::default());
    // Different write granularities.
    w1.write(&data).unwrap();
    for part in data.chunks(7) {
        w2.write(part).unwrap();
    }

    assert_eq!(w1.result().unwrap(), w2.result().unwrap());
}

#[test]
fn unflushed_objects_are_readable_from_open_pack() {
    let (_store, repo) = test_repo();

    let mut writer = repo.objects().new_writer(WriterOptions::default());
    writer.write(b"still buffered").unwrap();
    let id = writer.result().unwrap();

    // No flush: the chunk only exists in the open pack.
    let mut reader = repo.objects().open(&id).unwrap();
    let mut data = Vec::new();
    reader.read_to_end(&mut data).unwrap();
    assert_eq!(data, b"still buffered");
}

#[test]
fn auto_flush_when_pack_target_reached() {
    let options = RepositoryOptions {
        pack_target_size: 1000,
        ..test_options()
    };
    let (store, repo) = test_repo_with(options);

    // Distinct content per object so nothing dedups away.
    for i in 0u8..10 {
        let mut writer = repo.objects().new_writer(WriterOptions::default());
        writer.write(&vec![i; 300]).unwrap();
        writer.result().unwrap();
    }

    let packs = store
        .list_blobs("P")
        .unwrap()
        .len();
    assert!(packs >= 2, "expected auto-flushed packs, got {packs}");
}
