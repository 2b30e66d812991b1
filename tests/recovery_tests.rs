//! Crash-recovery scenarios driven end to end through the log manager.

use basalt::{
    LogManager, LogRecord, MemoryEngine, RecordKind, StorageEngine, TxStatus, Error, NULL_LSN,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tail_records(lm: &LogManager<MemoryEngine>) -> Vec<LogRecord> {
    lm.tail().iter().cloned().collect()
}

/// Crash with nothing durable: recovery has no work to do.
#[test]
fn recover_on_empty_log_is_a_noop() {
    init_logging();
    let mut lm = LogManager::new(MemoryEngine::new());

    // an update sat in the tail and died with the crash
    lm.write(1, 1, 0, "ab", "  ");
    let engine = lm.into_engine().restarted();

    let raw = engine.read_log().unwrap();
    assert!(raw.is_empty());

    let mut lm = LogManager::new(engine);
    lm.recover(&raw).unwrap();

    assert!(lm.tx_table().is_empty());
    assert!(lm.dirty_page_table().is_empty());
    assert!(lm.tail().is_empty());
}

/// The COMMIT record was durable but the END was lost: recovery replays
/// the update and re-emits the END.
#[test]
fn recover_reemits_end_after_commit_then_crash() {
    init_logging();
    let mut lm = LogManager::new(MemoryEngine::new());

    lm.write(1, 1, 0, "ab", "  ");
    lm.commit(1).unwrap();
    // crash: the END record in the tail is lost, the page never hit disk
    let engine = lm.into_engine().restarted();

    let raw = engine.read_log().unwrap();
    let mut lm = LogManager::new(engine);
    lm.recover(&raw).unwrap();

    assert!(lm.tx_table().is_empty());
    let records = tail_records(&lm);
    assert_eq!(records.len(), 1);
    assert!(matches!(records[0].kind, RecordKind::End));
    assert_eq!(records[0].prev_lsn, 2);

    // redo reinstalled the committed update
    assert_eq!(lm.engine().page_contents(1), "ab");
    assert_eq!(lm.engine().page_lsn(1), 1);
}

/// Checkpoint, more work, crash before commit: analysis seeds from the
/// END_CKPT snapshot, redo replays both updates, undo rolls the loser
/// back to nothing.
#[test]
fn checkpoint_then_crash_undoes_loser() {
    init_logging();
    let mut lm = LogManager::new(MemoryEngine::new());

    assert_eq!(lm.write(1, 1, 0, "ab", "  "), 1);
    lm.checkpoint().unwrap(); // BEGIN_CKPT = 2, END_CKPT = 3
    assert_eq!(lm.write(1, 2, 0, "cd", "  "), 4);
    lm.flush_log_tail(4).unwrap();

    let engine = lm.into_engine().restarted();
    assert_eq!(engine.master(), 2);

    let raw = engine.read_log().unwrap();
    let mut lm = LogManager::new(engine);
    lm.recover(&raw).unwrap();

    // both updates were redone, then compensated in descending order
    let records = tail_records(&lm);
    assert_eq!(records.len(), 3);
    match &records[0].kind {
        RecordKind::Clr { page_id, undo_next_lsn, .. } => {
            assert_eq!(*page_id, 2);
            assert_eq!(*undo_next_lsn, 1);
        }
        other => panic!("expected CLR, got {:?}", other),
    }
    match &records[1].kind {
        RecordKind::Clr { page_id, undo_next_lsn, .. } => {
            assert_eq!(*page_id, 1);
            assert_eq!(*undo_next_lsn, NULL_LSN);
        }
        other => panic!("expected CLR, got {:?}", other),
    }
    assert!(matches!(records[2].kind, RecordKind::End));

    assert!(lm.tx_table().is_empty());
    assert_eq!(lm.engine().page_contents(1), "  ");
    assert_eq!(lm.engine().page_contents(2), "  ");
}

/// Running recovery twice over the same durable log leaves the same
/// database state.
#[test]
fn recovery_is_idempotent() {
    init_logging();
    let mut lm = LogManager::new(MemoryEngine::new());

    lm.write(1, 1, 0, "ab", "  ");
    lm.checkpoint().unwrap();
    lm.write(1, 2, 0, "cd", "  ");
    lm.flush_log_tail(4).unwrap();

    let engine = lm.into_engine().restarted();
    let raw = engine.read_log().unwrap();

    let mut first = LogManager::new(engine);
    first.recover(&raw).unwrap();
    let after_first = (
        first.engine().page_contents(1),
        first.engine().page_contents(2),
    );

    // crash again before the recovery tail was ever flushed; this time
    // the pages had reached disk
    let mut second = LogManager::new(first.into_engine().restarted_with_pages());
    second.recover(&raw).unwrap();

    assert_eq!(second.engine().page_contents(1), after_first.0);
    assert_eq!(second.engine().page_contents(2), after_first.1);
    assert!(second.tx_table().is_empty());
}

/// Every update of a fully undone transaction is compensated exactly
/// once, in reverse order.
#[test]
fn undo_compensates_each_update_once_in_reverse() {
    init_logging();
    let mut lm = LogManager::new(MemoryEngine::new());

    lm.write(1, 1, 0, "a", " ");
    lm.write(1, 2, 0, "b", " ");
    lm.write(1, 3, 0, "c", " ");
    lm.abort(1).unwrap();

    let clrs: Vec<&LogRecord> = lm
        .tail()
        .iter()
        .filter(|r| matches!(r.kind, RecordKind::Clr { .. }))
        .collect();
    assert_eq!(clrs.len(), 3);

    let pages: Vec<i64> = clrs.iter().filter_map(|r| r.page_id()).collect();
    assert_eq!(pages, vec![3, 2, 1]);

    let chain: Vec<i64> = clrs
        .iter()
        .map(|r| match r.kind {
            RecordKind::Clr { undo_next_lsn, .. } => undo_next_lsn,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(chain, vec![2, 1, NULL_LSN]);
}

/// A crash between BEGIN_CKPT and END_CKPT leaves a master record with no
/// snapshot to seed from; analysis starts from empty tables.
#[test]
fn malformed_checkpoint_missing_end_ckpt() {
    init_logging();
    let mut engine = MemoryEngine::new();
    engine
        .append_log(&LogRecord::begin_checkpoint(1).to_line().unwrap())
        .unwrap();
    engine
        .append_log(
            &LogRecord::update(2, NULL_LSN, 1, 1, 0, " ", "a")
                .to_line()
                .unwrap(),
        )
        .unwrap();
    engine.store_master(1).unwrap();
    engine.next_lsn();
    engine.next_lsn();

    let raw = engine.read_log().unwrap();
    let mut lm = LogManager::new(engine);
    lm.recover(&raw).unwrap();

    // the update after the broken checkpoint was still found and undone
    let records = tail_records(&lm);
    assert_eq!(records.len(), 2);
    assert!(matches!(records[0].kind, RecordKind::Clr { .. }));
    assert!(matches!(records[1].kind, RecordKind::End));
    assert!(lm.tx_table().is_empty());
    assert_eq!(lm.engine().page_contents(1), " ");
}

/// A compensation chain interrupted by a crash resumes where it stopped:
/// no update is re-undone past a CLR whose chain already closed.
#[test]
fn undo_resumes_after_partial_rollback() {
    init_logging();
    let mut engine = MemoryEngine::new();
    let lines = [
        LogRecord::update(1, NULL_LSN, 1, 1, 0, " ", "a"),
        LogRecord::abort(2, 1, 1),
        LogRecord::clr(3, 2, 1, 1, 0, " ", NULL_LSN),
    ];
    for record in &lines {
        engine.append_log(&record.to_line().unwrap()).unwrap();
    }
    for _ in 0..3 {
        engine.next_lsn();
    }

    let raw = engine.read_log().unwrap();
    let mut lm = LogManager::new(engine);
    lm.recover(&raw).unwrap();

    // only the END was missing; no second compensation is emitted
    let records = tail_records(&lm);
    assert_eq!(records.len(), 1);
    assert!(matches!(records[0].kind, RecordKind::End));
    assert!(lm.tx_table().is_empty());
    assert_eq!(lm.engine().page_contents(1), " ");
}

/// Redo stops at the first refused page write and undo never runs; a
/// later restart with a healthy engine finishes the job.
#[test]
fn storage_unavailable_suspends_recovery_until_retry() {
    init_logging();
    let mut lm = LogManager::new(MemoryEngine::new());
    lm.write(1, 1, 0, "a", " ");
    lm.flush_log_tail(1).unwrap();

    let mut engine = lm.into_engine().restarted();
    engine.set_fail_page_writes(true);

    let raw = engine.read_log().unwrap();
    let mut lm = LogManager::new(engine);
    lm.recover(&raw).unwrap();

    // undo was skipped: the loser is still live and nothing was appended
    assert!(lm.tx_table().contains_key(&1));
    assert!(lm.tail().is_empty());

    // the engine comes back and recovery is redriven
    lm.engine_mut().set_fail_page_writes(false);
    lm.recover(&raw).unwrap();

    assert!(lm.tx_table().is_empty());
    let records = tail_records(&lm);
    assert!(matches!(records[0].kind, RecordKind::Clr { .. }));
    assert!(matches!(records[1].kind, RecordKind::End));
    assert_eq!(lm.engine().page_contents(1), " ");
}

/// A log line that decodes into no variant is fatal during recovery.
#[test]
fn recover_rejects_malformed_log() {
    init_logging();
    let mut lm = LogManager::new(MemoryEngine::new());
    let err = lm.recover("this is not a log record").unwrap_err();
    assert!(matches!(err, Error::MalformedRecord(_)));
}

/// Analysis keeps committed-but-not-ended transactions in status C so
/// redo can retire them.
#[test]
fn analysis_tracks_commit_status() {
    init_logging();
    let mut lm = LogManager::new(MemoryEngine::new());

    lm.write(1, 1, 0, "a", " ");
    lm.write(2, 2, 0, "b", " ");
    lm.commit(1).unwrap();
    lm.flush_log_tail(4).unwrap();

    // re-analyze the durable image of the log
    let raw = lm.engine().read_log().unwrap();
    let log = basalt::parse_log(&raw).unwrap();
    lm.analyze(&log);

    // tx 1 ENDed on disk and is gone; tx 2 is still live
    assert!(!lm.tx_table().contains_key(&1));
    let t2 = lm.tx_table().get(&2).unwrap();
    assert_eq!(t2.status, TxStatus::InProgress);
    assert_eq!(t2.last_lsn, 2);
}
