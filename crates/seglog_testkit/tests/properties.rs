//! End-to-end behavior of the log through its public API.

use seglog_core::{CoreError, Log, SegmentId};
use seglog_testkit::prelude::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn four_slot_segment_rotates_on_fifth_append() {
    let log = TempLog::small();

    let ids = append_all(&log, &[b"a", b"b", b"c", b"d"]);
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(log.read(2).unwrap(), b"b");
    assert_eq!(log.segment_ids().unwrap(), vec![SegmentId::new(0)]);

    let fifth = log.append(b"e").unwrap();
    assert_eq!(fifth.as_u64(), 5);
    assert_eq!(
        log.segment_ids().unwrap(),
        vec![SegmentId::new(0), SegmentId::new(1)]
    );
    assert_eq!(log.read_all(false).unwrap().len(), 1);
    assert_eq!(log.read(5).unwrap(), b"e");
    assert_eq!(log.read(1).unwrap(), b"a");
}

#[test]
fn identifiers_increase_by_one_across_rotations() {
    let log = TempLog::new(test_config(3));
    let mut last = 0;
    for i in 0..20u32 {
        let seq = if i % 7 == 6 {
            log.checkpoint(&i.to_le_bytes()).unwrap()
        } else {
            log.append(&i.to_le_bytes()).unwrap()
        };
        assert_eq!(seq.as_u64(), last + 1);
        last = seq.as_u64();
        if i == 10 {
            log.rotate().unwrap();
        }
    }
    assert!(log.segment_ids().unwrap().len() > 5);
}

#[test]
fn misaligned_index_size_is_a_configuration_error() {
    let dir = tempdir().unwrap();
    let config = test_config(4).max_index_size(100);

    let err = Log::open(dir.path(), config).unwrap_err();
    assert!(matches!(err, CoreError::InvalidConfig { .. }));
    let written: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .filter(|name| name.to_string_lossy().starts_with("segment-"))
        .collect();
    assert!(written.is_empty(), "unexpected files: {written:?}");
}

#[test]
fn zero_and_unassigned_ids_are_not_found() {
    let log = TempLog::small();
    append_all(&log, &[b"x", b"y", b"z", b"w", b"v"]);

    for id in [0, 6, 7, 1_000_000] {
        let err = log.read(id).unwrap_err();
        assert!(err.is_not_found(), "id {id}: {err}");
        assert!(!err.is_corruption(), "id {id}: {err}");
    }
}

#[test]
fn retention_drops_the_oldest_segment() {
    let log = TempLog::new(test_config(2).max_segments(3));
    let ids = append_all(&log, &[b"0a", b"0b", b"1a", b"1b", b"2a", b"2b", b"3a"]);
    assert_eq!(ids.last(), Some(&7));

    assert_eq!(
        log.segment_ids().unwrap(),
        vec![SegmentId::new(1), SegmentId::new(2), SegmentId::new(3)]
    );
    assert!(!log.store_path(0).exists());
    assert!(!log.index_path(0).exists());

    assert!(log.read(1).unwrap_err().is_not_found());
    let replayed: Vec<u64> = log
        .read_from_offset(SegmentId::new(0), false)
        .unwrap()
        .iter()
        .map(|r| r.sequence.as_u64())
        .collect();
    assert_eq!(replayed, vec![3, 4, 5, 6, 7]);
}

#[test]
fn checkpoint_replay_starts_at_third_record() {
    let log = TempLog::new(test_config(16));
    assert!(log.read_all(true).unwrap().is_empty());

    log.append(b"1").unwrap();
    log.append(b"2").unwrap();
    log.checkpoint(b"3").unwrap();
    log.append(b"4").unwrap();
    log.append(b"5").unwrap();

    let replay = log.read_all(true).unwrap();
    let seqs: Vec<u64> = replay.iter().map(|r| r.sequence.as_u64()).collect();
    assert_eq!(seqs, vec![3, 4, 5]);
    assert!(replay[0].is_checkpoint());
    assert_eq!(replay[2].payload, b"5");

    assert_eq!(log.read_all(false).unwrap().len(), 5);
}

#[test]
fn no_checkpoint_means_empty_replay() {
    let log = TempLog::small();
    append_all(&log, &[b"a", b"b", b"c", b"d", b"e", b"f"]);

    assert!(log.read_all(true).unwrap().is_empty());
    assert!(log
        .read_from_offset(SegmentId::new(0), true)
        .unwrap()
        .is_empty());
}

#[test]
fn later_checkpoint_in_later_segment_wins() {
    let log = TempLog::new(test_config(2));
    log.checkpoint(b"old").unwrap();
    log.append(b"x").unwrap();
    log.append(b"y").unwrap();
    log.checkpoint(b"new").unwrap();
    log.append(b"z").unwrap();

    let seqs: Vec<u64> = log
        .read_from_offset(SegmentId::new(0), true)
        .unwrap()
        .iter()
        .map(|r| r.sequence.as_u64())
        .collect();
    assert_eq!(seqs, vec![4, 5]);
    assert_eq!(log.last_checkpoint().unwrap().map(|s| s.as_u64()), Some(4));
}

#[test]
fn read_from_offset_skips_lower_segments() {
    let log = TempLog::new(test_config(2));
    append_all(&log, &[b"a", b"b", b"c", b"d", b"e"]);

    let seqs: Vec<u64> = log
        .read_from_offset(SegmentId::new(1), false)
        .unwrap()
        .iter()
        .map(|r| r.sequence.as_u64())
        .collect();
    assert_eq!(seqs, vec![3, 4, 5]);
    assert!(log
        .read_from_offset(SegmentId::new(9), false)
        .unwrap()
        .is_empty());
}

#[test]
fn records_survive_reopen() {
    let log = TempLog::new(test_config(3));
    append_all(&log, &[b"a", b"b", b"c", b"d"]);
    log.checkpoint(b"e").unwrap();

    let log = log.reopen();
    assert_eq!(log.read(1).unwrap(), b"a");
    assert_eq!(log.read(5).unwrap(), b"e");
    assert_eq!(log.last_checkpoint().unwrap().map(|s| s.as_u64()), Some(5));
    assert_eq!(log.append(b"f").unwrap().as_u64(), 6);
}

#[test]
fn sync_is_idempotent_and_empty_safe() {
    let log = TempLog::small();
    log.sync().unwrap();
    log.append(b"a").unwrap();
    log.sync().unwrap();
    let size = fs::metadata(log.store_path(0)).unwrap().len();
    log.sync().unwrap();
    assert_eq!(fs::metadata(log.store_path(0)).unwrap().len(), size);
    assert_eq!(log.stats().unwrap().buffered_bytes, 0);
}

#[test]
fn trim_removes_only_fully_older_segments() {
    let log = TempLog::new(test_config(2));
    append_all(&log, &[b"a", b"b", b"c", b"d", b"e"]);

    assert_eq!(log.trim_before(4).unwrap(), 1);
    assert_eq!(log.first_sequence().unwrap().map(|s| s.as_u64()), Some(3));
    assert!(!log.store_path(0).exists());
    assert_eq!(log.read(4).unwrap(), b"d");
}

#[test]
fn closed_log_rejects_operations() {
    let mut log = TempLog::small();
    log.append(b"a").unwrap();
    log.log().close().unwrap();

    assert!(matches!(log.append(b"b"), Err(CoreError::LogClosed)));
    assert!(matches!(log.read(1), Err(CoreError::LogClosed)));
    assert!(matches!(log.sync(), Err(CoreError::LogClosed)));
    log.close();

    let log = log.reopen();
    assert_eq!(log.read(1).unwrap(), b"a");
}

#[test]
fn second_writer_is_refused() {
    let log = TempLog::small();
    let err = Log::open(log.path(), log.config().clone()).unwrap_err();
    assert!(matches!(err, CoreError::LogLocked));
}

#[test]
fn sequence_resumes_after_reopen_when_retention_evicted_everything() {
    let log = TempLog::new(test_config(4).max_segments(1));
    append_all(&log, &["a", "b", "c"]);
    log.rotate().unwrap();
    assert_eq!(log.segment_ids().unwrap(), vec![SegmentId::new(1)]);

    let log = log.reopen();
    assert_eq!(log.next_sequence().unwrap().as_u64(), 4);
    assert_eq!(log.append(b"d").unwrap().as_u64(), 4);
    assert_eq!(log.read(4).unwrap(), b"d");
}

#[test]
fn sequence_resumes_after_reopen_behind_empty_sealed_segment() {
    let log = TempLog::new(test_config(4).max_segments(2));
    append_all(&log, &["a", "b"]);
    log.rotate().unwrap();
    log.rotate().unwrap();
    assert_eq!(
        log.segment_ids().unwrap(),
        vec![SegmentId::new(1), SegmentId::new(2)]
    );

    let log = log.reopen();
    assert_eq!(log.first_sequence().unwrap(), None);
    assert_eq!(log.append(b"c").unwrap().as_u64(), 3);
}

#[test]
fn sequence_resumes_after_reopen_following_trim() {
    let log = TempLog::new(test_config(4));
    append_all(&log, &["a", "b", "c"]);
    log.rotate().unwrap();
    assert_eq!(log.trim_before(100).unwrap(), 1);

    // Reopening twice without appending must not lose the floor either.
    let log = log.reopen().reopen();
    assert_eq!(log.next_sequence().unwrap().as_u64(), 4);
    assert!(log.read(3).unwrap_err().is_not_found());
    assert_eq!(log.append(b"d").unwrap().as_u64(), 4);
}

#[test]
fn start_id_offsets_the_first_sequence() {
    let first = with_temp_log(test_config(2).start_id(100), |log| {
        let ids = append_all(log, &["a", "b", "c"]);
        assert_eq!(log.first_sequence().unwrap().map(|s| s.as_u64()), Some(100));
        ids
    });
    assert_eq!(first, vec![100, 101, 102]);
}
