//! Segmented log store: round trip, rotation, per-segment dedup, clearing and reopen

use beaconmesh::storage::{LogStore, RecordFilter, StoreError, StoreOptions, WriteOutcome};
use tempfile::tempdir;

const TS: &str = "2024-06-01_08:00_00";

fn checksum(n: usize) -> String {
    format!("{:08x}", n)
}

fn segment_files(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("messages"))
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn round_trip_newest_first() {
    let tmp = tempdir().unwrap();
    let mut store = LogStore::open(StoreOptions::new(tmp.path())).await.unwrap();

    let contents: Vec<Vec<u8>> = (0..25)
        .map(|n| format!("X1ABCD:ANY:message number {n} | with\nodd bytes").into_bytes())
        .collect();
    for (n, content) in contents.iter().enumerate() {
        let out = store.write(&checksum(n), TS, "RCV", content).await.unwrap();
        assert!(matches!(out, WriteOutcome::Appended { .. }));
    }

    let all = store.query(&RecordFilter::default(), contents.len()).await.unwrap();
    assert_eq!(all.len(), contents.len());
    for (rec, expected) in all.iter().zip(contents.iter().rev()) {
        assert_eq!(&rec.content, expected);
        assert_eq!(rec.kind, "RCV");
        assert_eq!(rec.timestamp, TS);
    }
    assert_eq!(store.count_total().await.unwrap(), 25);

    let limited = store.query(&RecordFilter::default(), 3).await.unwrap();
    assert_eq!(limited.len(), 3);
    assert_eq!(limited[0].checksum, checksum(24));
}

#[tokio::test]
async fn rotation_keeps_records_whole_and_ordered() {
    let tmp = tempdir().unwrap();
    let mut opts = StoreOptions::new(tmp.path());
    opts.segment_bytes = 300;
    let mut store = LogStore::open(opts).await.unwrap();
    assert_eq!(store.current_seq(), 1);

    for n in 0..20 {
        let content = format!("payload {n:02} padded to a steady width");
        store.write(&checksum(n), TS, "TXT", content.as_bytes()).await.unwrap();
        assert!(store.current_bytes() <= 300);
    }
    assert!(store.current_seq() > 1);
    assert_eq!(segment_files(tmp.path()).len() as u32, store.current_seq());

    let all = store.query(&RecordFilter::default(), 100).await.unwrap();
    assert_eq!(all.len(), 20);
    let order: Vec<String> = all.iter().map(|r| r.checksum.clone()).collect();
    let expected: Vec<String> = (0..20).rev().map(checksum).collect();
    assert_eq!(order, expected);
}

#[tokio::test]
async fn duplicate_checksum_rejected_until_rotation() {
    let tmp = tempdir().unwrap();
    let mut store = LogStore::open(StoreOptions::new(tmp.path())).await.unwrap();

    let first = store.write("deadbeef", TS, "RCV", b"first").await.unwrap();
    assert!(matches!(first, WriteOutcome::Appended { seq: 1, .. }));
    let second = store.write("deadbeef", TS, "RCV", b"second").await.unwrap();
    assert_eq!(second, WriteOutcome::Duplicate);

    assert_eq!(store.roll_segment().await.unwrap(), 2);
    let third = store.write("deadbeef", TS, "RCV", b"third").await.unwrap();
    assert!(matches!(third, WriteOutcome::Appended { seq: 2, .. }));
    assert_eq!(store.count_total().await.unwrap(), 2);
}

#[tokio::test]
async fn invalid_fields_are_refused() {
    let tmp = tempdir().unwrap();
    let mut opts = StoreOptions::new(tmp.path());
    opts.max_content_bytes = 16;
    let mut store = LogStore::open(opts).await.unwrap();

    assert!(matches!(
        store.write("nothex!!", TS, "RCV", b"x").await,
        Err(StoreError::Field(_))
    ));
    assert!(matches!(
        store.write("deadbeef", "2024-06-01", "RCV", b"x").await,
        Err(StoreError::Field(_))
    ));
    assert!(matches!(
        store.write("deadbeef", TS, "RECV", b"x").await,
        Err(StoreError::Field(_))
    ));
    assert!(matches!(
        store.write("deadbeef", TS, "RCV", &[b'a'; 17]).await,
        Err(StoreError::Field(_))
    ));
    assert!(store.write("deadbeef", TS, "RCV", &[b'a'; 16]).await.is_ok());
}

#[tokio::test]
async fn reopen_continues_tail_and_remembers_checksums() {
    let tmp = tempdir().unwrap();
    {
        let mut store = LogStore::open(StoreOptions::new(tmp.path())).await.unwrap();
        store.write("00000001", TS, "RCV", b"before restart").await.unwrap();
        store.close().await.unwrap();
    }
    let mut store = LogStore::open(StoreOptions::new(tmp.path())).await.unwrap();
    assert_eq!(store.current_seq(), 1);
    assert!(store.current_bytes() > 0);
    assert_eq!(
        store.write("00000001", TS, "RCV", b"again").await.unwrap(),
        WriteOutcome::Duplicate
    );
    store.write("00000002", TS, "RCV", b"after restart").await.unwrap();
    let all = store.query(&RecordFilter::default(), 10).await.unwrap();
    assert_eq!(all[0].content, b"after restart");
    assert_eq!(all[1].content, b"before restart");
}

#[tokio::test]
async fn delete_all_with_and_without_sequence_reset() {
    let tmp = tempdir().unwrap();
    let mut store = LogStore::open(StoreOptions::new(tmp.path())).await.unwrap();
    store.write("00000001", TS, "RCV", b"one").await.unwrap();
    store.roll_segment().await.unwrap();
    store.write("00000002", TS, "RCV", b"two").await.unwrap();
    assert_eq!(store.current_seq(), 2);

    store.delete_all(false).await.unwrap();
    assert_eq!(store.current_seq(), 3);
    assert_eq!(store.current_bytes(), 0);
    assert_eq!(store.count_total().await.unwrap(), 0);
    assert_eq!(segment_files(tmp.path()), vec!["messages00000003.txt"]);
    // the tail's dedup set starts empty
    store.write("00000001", TS, "RCV", b"one again").await.unwrap();

    store.delete_all(true).await.unwrap();
    assert_eq!(store.current_seq(), 1);
    assert_eq!(segment_files(tmp.path()), vec!["messages00000001.txt"]);
}

#[tokio::test]
async fn sequence_file_outranks_missing_segments() {
    let tmp = tempdir().unwrap();
    std::fs::write(tmp.path().join(".seq"), "41").unwrap();
    let store = LogStore::open(StoreOptions::new(tmp.path())).await.unwrap();
    assert_eq!(store.current_seq(), 41);
    store.close().await.unwrap();

    std::fs::write(tmp.path().join("messages00000050.txt"), b"").unwrap();
    let store = LogStore::open(StoreOptions::new(tmp.path())).await.unwrap();
    assert_eq!(store.current_seq(), 50);
}

#[tokio::test]
async fn full_tail_starts_new_segment_on_open() {
    let tmp = tempdir().unwrap();
    let mut opts = StoreOptions::new(tmp.path());
    opts.segment_bytes = 64;
    {
        let mut store = LogStore::open(opts.clone()).await.unwrap();
        store.write("0000000a", TS, "TXT", &[b'z'; 40]).await.unwrap();
        assert!(store.current_bytes() >= 64);
        store.close().await.unwrap();
    }
    let store = LogStore::open(opts).await.unwrap();
    assert_eq!(store.current_seq(), 2);
    assert_eq!(store.current_bytes(), 0);
}

#[tokio::test]
async fn oversized_record_gets_its_own_segment() {
    let tmp = tempdir().unwrap();
    let mut opts = StoreOptions::new(tmp.path());
    opts.segment_bytes = 64;
    let mut store = LogStore::open(opts).await.unwrap();
    store.write("0000000a", TS, "TXT", b"small").await.unwrap();
    store.write("0000000b", TS, "TXT", &[b'x'; 100]).await.unwrap();
    assert_eq!(store.current_seq(), 2);
    store.write("0000000c", TS, "TXT", b"after").await.unwrap();
    assert_eq!(store.current_seq(), 3);
    assert_eq!(store.count_total().await.unwrap(), 3);
}

#[tokio::test]
async fn count_skips_torn_tail() {
    let tmp = tempdir().unwrap();
    let mut store = LogStore::open(StoreOptions::new(tmp.path())).await.unwrap();
    store.write("00000001", TS, "RCV", b"intact").await.unwrap();
    store.close().await.unwrap();

    let seg = tmp.path().join("messages00000001.txt");
    let mut data = std::fs::read(&seg).unwrap();
    data.extend_from_slice(b"120|0000");
    std::fs::write(&seg, data).unwrap();

    let store = LogStore::open(StoreOptions::new(tmp.path())).await.unwrap();
    assert_eq!(store.count_total().await.unwrap(), 1);
    assert_eq!(store.query(&RecordFilter::default(), 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn filters_select_by_type_content_and_time() {
    let tmp = tempdir().unwrap();
    let mut store = LogStore::open(StoreOptions::new(tmp.path())).await.unwrap();
    store.write("00000001", "2024-06-01_08:00_00", "RCV", b"X1AAAA:ANY:alpha").await.unwrap();
    store.write("00000002", "2024-06-01_09:00_00", "SNT", b"X1BBBB:ANY:beta").await.unwrap();
    store.write("00000003", "2024-06-01_10:00_00", "RCV", b"X1CCCC:ANY:gamma").await.unwrap();

    let rcv = RecordFilter {
        kind: Some("rcv".into()),
        ..RecordFilter::default()
    };
    let got = store.query(&rcv, 10).await.unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].checksum, "00000003");

    let window = RecordFilter {
        from: Some("2024-06-01_08:30_00".into()),
        to: Some("2024-06-01_10:00_00".into()),
        ..RecordFilter::default()
    };
    assert_eq!(store.query(&window, 10).await.unwrap().len(), 2);

    let both = RecordFilter {
        kind: Some("RCV".into()),
        contains: Some("alpha".into()),
        ..RecordFilter::default()
    };
    let got = store.query(&both, 10).await.unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].checksum, "00000001");
}
