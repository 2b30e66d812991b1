//! The log manager: ARIES logging, WAL enforcement, and crash recovery
//!
//! ## Normal operation
//!
//! 1. Clients call [`LogManager::write`] for every page modification and
//!    get back the LSN to stamp on the cached page.
//! 2. [`LogManager::commit`] forces the log through the COMMIT record
//!    before returning; [`LogManager::abort`] rolls the transaction back
//!    through compensation records.
//! 3. The storage engine calls [`LogManager::page_flushed`] immediately
//!    before writing a dirty page to disk; the manager forces the log up
//!    to that page's LSN first. This is the sole write-ahead enforcement
//!    point.
//! 4. [`LogManager::checkpoint`] takes a fuzzy checkpoint without
//!    quiescing anything: a BEGIN_CKPT/END_CKPT pair carrying snapshots of
//!    the transaction and dirty-page tables, plus a master-record update.
//!
//! ## Recovery
//!
//! [`LogManager::recover`] runs the three classic passes over the durable
//! log:
//!
//! - **Analysis** rebuilds the transaction and dirty-page tables, seeded
//!   from the most recent complete checkpoint when one exists.
//! - **Redo** repeats history from the oldest recLSN forward, skipping
//!   work whose effects already reached the page.
//! - **Undo** rolls back every transaction that never committed,
//!   emitting compensation records so a crash during undo is itself
//!   recoverable.
//!
//! The manager is single-writer: callers serialize their entry, methods
//! take `&mut self`, and nothing suspends internally.

use std::collections::{BinaryHeap, BTreeMap};

use crate::config::LogConfig;
use crate::engine::StorageEngine;
use crate::error::Result;
use crate::record::{parse_log, LogRecord, RecordKind};
use crate::tail::LogTail;
use crate::types::{
    DirtyPageTable, Lsn, PageId, PageSnapshot, TxId, TxSnapshot, TxStatus, TxTable, TxTableEntry,
    NULL_LSN,
};

/// The recovery and logging core.
///
/// Owns its storage engine (injected at construction), the transaction
/// table, the dirty page table, and the log tail.
pub struct LogManager<E: StorageEngine> {
    engine: E,
    config: LogConfig,
    tx_table: TxTable,
    dirty_page_table: DirtyPageTable,
    tail: LogTail,
    /// Approximate bytes appended since the last checkpoint
    bytes_since_checkpoint: u64,
}

impl<E: StorageEngine> LogManager<E> {
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, LogConfig::default())
    }

    pub fn with_config(engine: E, config: LogConfig) -> Self {
        Self {
            engine,
            config,
            tx_table: TxTable::new(),
            dirty_page_table: DirtyPageTable::new(),
            tail: LogTail::new(),
            bytes_since_checkpoint: 0,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Release the storage engine (for crash simulation in tests).
    pub fn into_engine(self) -> E {
        self.engine
    }

    pub fn tx_table(&self) -> &TxTable {
        &self.tx_table
    }

    pub fn dirty_page_table(&self) -> &DirtyPageTable {
        &self.dirty_page_table
    }

    pub fn tail(&self) -> &LogTail {
        &self.tail
    }

    /// LSN of the most recent record for this transaction, NULL_LSN if the
    /// transaction is unknown.
    pub fn last_lsn(&self, tx_id: TxId) -> Lsn {
        self.tx_table
            .get(&tx_id)
            .map(|e| e.last_lsn)
            .unwrap_or(NULL_LSN)
    }

    /// Record the LSN of the most recent record for this transaction.
    pub fn set_last_lsn(&mut self, tx_id: TxId, lsn: Lsn) {
        self.tx_table
            .entry(tx_id)
            .or_insert_with(|| TxTableEntry::new(NULL_LSN, TxStatus::InProgress))
            .last_lsn = lsn;
    }

    /// Force log records up to and including `max_lsn` to the engine's log
    /// sink, removing them from the tail. Negative `max_lsn` is a no-op.
    pub fn flush_log_tail(&mut self, max_lsn: Lsn) -> Result<()> {
        self.tail.flush_up_to(&mut self.engine, max_lsn)
    }

    fn append_to_tail(&mut self, record: LogRecord) {
        // Rough size accounting for the auto-checkpoint trigger; exact
        // serialized length is not worth a second serialization here.
        self.bytes_since_checkpoint += std::mem::size_of::<LogRecord>() as u64;
        self.tail.append(record);
    }

    /// Log an update to `page_id` and return the LSN the caller must stamp
    /// on the cached page.
    pub fn write(
        &mut self,
        tx_id: TxId,
        page_id: PageId,
        offset: usize,
        new_text: &str,
        old_text: &str,
    ) -> Lsn {
        let lsn = self.engine.next_lsn();
        let prev_lsn = self.last_lsn(tx_id);
        self.append_to_tail(LogRecord::update(
            lsn, prev_lsn, tx_id, page_id, offset, old_text, new_text,
        ));

        let entry = self
            .tx_table
            .entry(tx_id)
            .or_insert_with(|| TxTableEntry::new(lsn, TxStatus::InProgress));
        entry.last_lsn = lsn;
        entry.status = TxStatus::InProgress;

        // recLSN is the first update since the page was last clean
        self.dirty_page_table.entry(page_id).or_insert(lsn);

        lsn
    }

    /// Commit a transaction. Returns once the COMMIT record is durable.
    /// Unknown transactions are a silent no-op.
    pub fn commit(&mut self, tx_id: TxId) -> Result<()> {
        let prev_lsn = match self.tx_table.get(&tx_id) {
            Some(entry) => entry.last_lsn,
            None => return Ok(()),
        };

        let commit_lsn = self.engine.next_lsn();
        self.append_to_tail(LogRecord::commit(commit_lsn, prev_lsn, tx_id));
        // Durability point: everything through the COMMIT record hits disk
        self.flush_log_tail(commit_lsn)?;

        let end_lsn = self.engine.next_lsn();
        self.append_to_tail(LogRecord::end(end_lsn, commit_lsn, tx_id));
        self.tx_table.remove(&tx_id);

        if self.bytes_since_checkpoint > self.config.checkpoint_threshold_bytes {
            log::debug!(
                "checkpoint threshold reached after commit of tx {}",
                tx_id
            );
            self.checkpoint()?;
        }
        Ok(())
    }

    /// Roll back a transaction, emitting compensation records and a final
    /// END. Unknown transactions are a silent no-op.
    pub fn abort(&mut self, tx_id: TxId) -> Result<()> {
        if !self.tx_table.contains_key(&tx_id) {
            return Ok(());
        }
        let mut log = parse_log(&self.engine.read_log()?)?;

        let prev_lsn = self.last_lsn(tx_id);
        let abort_lsn = self.engine.next_lsn();
        self.append_to_tail(LogRecord::abort(abort_lsn, prev_lsn, tx_id));
        self.set_last_lsn(tx_id, abort_lsn);

        log.extend(self.tail.iter().cloned());
        self.undo(&log, Some(tx_id));
        Ok(())
    }

    /// Called by the storage engine immediately before it writes `page_id`
    /// to disk: force the log through the page's LSN, then drop the page
    /// from the dirty page table.
    pub fn page_flushed(&mut self, page_id: PageId) -> Result<()> {
        let page_lsn = self.engine.page_lsn(page_id);
        self.flush_log_tail(page_lsn)?;
        self.dirty_page_table.remove(&page_id);
        Ok(())
    }

    /// Take a fuzzy checkpoint: rebuild the tables against the full
    /// visible log, append a BEGIN_CKPT/END_CKPT pair with table
    /// snapshots, point the master record at the BEGIN_CKPT, and flush.
    pub fn checkpoint(&mut self) -> Result<()> {
        let begin_lsn = self.engine.next_lsn();
        let end_lsn = self.engine.next_lsn();

        let mut log = parse_log(&self.engine.read_log()?)?;
        log.extend(self.tail.iter().cloned());
        // Re-derive the tables from the suffix after the previous
        // checkpoint; analyze seeds from its END_CKPT snapshot.
        self.analyze(&log);

        self.append_to_tail(LogRecord::begin_checkpoint(begin_lsn));
        self.append_to_tail(LogRecord::end_checkpoint(
            end_lsn,
            begin_lsn,
            &self.tx_table,
            &self.dirty_page_table,
        ));
        self.engine.store_master(begin_lsn)?;
        self.flush_log_tail(end_lsn)?;
        self.bytes_since_checkpoint = 0;

        log::info!(
            "checkpoint complete at LSN {} ({} live transactions, {} dirty pages)",
            begin_lsn,
            self.tx_table.len(),
            self.dirty_page_table.len()
        );
        Ok(())
    }

    /// Analysis pass: rebuild the transaction and dirty-page tables from
    /// the log, seeded from the most recent complete checkpoint when the
    /// master record points at one.
    pub fn analyze(&mut self, log: &[LogRecord]) {
        self.tx_table.clear();
        self.dirty_page_table.clear();

        let mut start = 0;
        let master = self.engine.master();
        if master != NULL_LSN {
            if let Some(index) = log.iter().position(|r| r.lsn == master) {
                start = index + 1;
                if let Some(LogRecord {
                    kind: RecordKind::EndCheckpoint {
                        tx_table,
                        dirty_pages,
                    },
                    ..
                }) = log.get(start)
                {
                    self.tx_table = TxSnapshot::restore(tx_table);
                    self.dirty_page_table = PageSnapshot::restore(dirty_pages);
                } else {
                    // Crash between BEGIN_CKPT and END_CKPT: scan with
                    // empty seeds from just after the BEGIN_CKPT.
                    log::warn!(
                        "checkpoint at LSN {} has no END_CKPT snapshot; analyzing from empty tables",
                        master
                    );
                }
            } else {
                log::warn!(
                    "master record LSN {} not found in log; analyzing the full log",
                    master
                );
            }
        }

        for record in &log[start..] {
            match &record.kind {
                RecordKind::Commit => {
                    let entry = self
                        .tx_table
                        .entry(record.tx_id)
                        .or_insert_with(|| TxTableEntry::new(record.lsn, TxStatus::Committed));
                    entry.status = TxStatus::Committed;
                    entry.last_lsn = record.lsn;
                }
                RecordKind::End => {
                    self.tx_table.remove(&record.tx_id);
                }
                RecordKind::Abort => {
                    let entry = self
                        .tx_table
                        .entry(record.tx_id)
                        .or_insert_with(|| TxTableEntry::new(record.lsn, TxStatus::InProgress));
                    entry.status = TxStatus::InProgress;
                    entry.last_lsn = record.lsn;
                }
                RecordKind::Update { page_id, .. } | RecordKind::Clr { page_id, .. } => {
                    let entry = self
                        .tx_table
                        .entry(record.tx_id)
                        .or_insert_with(|| TxTableEntry::new(record.lsn, TxStatus::InProgress));
                    entry.status = TxStatus::InProgress;
                    entry.last_lsn = record.lsn;
                    self.dirty_page_table
                        .entry(*page_id)
                        .or_insert(record.lsn);
                }
                RecordKind::BeginCheckpoint | RecordKind::EndCheckpoint { .. } => {}
            }
        }
    }

    /// Redo pass: repeat history from the oldest recLSN forward. Returns
    /// `false` as soon as the storage engine refuses a page write; the
    /// caller skips undo and the whole recovery is redriven on the next
    /// restart.
    pub fn redo(&mut self, log: &[LogRecord]) -> bool {
        if let Some(min_rec_lsn) = self.dirty_page_table.values().copied().min() {
            let start = log
                .iter()
                .position(|r| r.lsn >= min_rec_lsn)
                .unwrap_or(log.len());

            for record in &log[start..] {
                let (page_id, offset, after_image) = match &record.kind {
                    RecordKind::Update {
                        page_id,
                        offset,
                        after_image,
                        ..
                    }
                    | RecordKind::Clr {
                        page_id,
                        offset,
                        after_image,
                        ..
                    } => (*page_id, *offset, after_image.as_str()),
                    _ => continue,
                };

                // Redoable iff the page is dirty, was dirtied no later
                // than this record, and the on-disk image predates it.
                match self.dirty_page_table.get(&page_id) {
                    Some(&rec_lsn) if rec_lsn <= record.lsn => {}
                    _ => continue,
                }
                if self.engine.page_lsn(page_id) < record.lsn {
                    if !self
                        .engine
                        .page_write(page_id, offset, after_image, record.lsn)
                    {
                        log::warn!(
                            "redo stopped: storage engine refused write of page {} at LSN {}",
                            page_id,
                            record.lsn
                        );
                        return false;
                    }
                }
            }
        }

        // Committed transactions only needed their END records; emit them
        // and retire the entries.
        let committed: Vec<(TxId, Lsn)> = self
            .tx_table
            .iter()
            .filter(|(_, entry)| entry.status == TxStatus::Committed)
            .map(|(&tx_id, entry)| (tx_id, entry.last_lsn))
            .collect();
        for (tx_id, last_lsn) in committed {
            let end_lsn = self.engine.next_lsn();
            self.append_to_tail(LogRecord::end(end_lsn, last_lsn, tx_id));
            self.tx_table.remove(&tx_id);
        }
        true
    }

    /// Undo pass. With `scope = None`, rolls back every transaction still
    /// in the table; with `scope = Some(tx)`, rolls back that transaction
    /// only (the abort path).
    ///
    /// Records are processed in strictly descending LSN order across
    /// transactions, so compensation records receive LSNs in the same
    /// order as the work they reverse; a crash mid-undo then recovers
    /// cleanly. A refused page write aborts the pass without emitting the
    /// terminating END, leaving the tables consistent with the durable
    /// log.
    pub fn undo(&mut self, log: &[LogRecord], scope: Option<TxId>) {
        if self.tx_table.is_empty() {
            return;
        }
        if let Some(tx_id) = scope {
            if !self.tx_table.contains_key(&tx_id) {
                return;
            }
        }

        let mut to_undo: BinaryHeap<Lsn> = BinaryHeap::new();
        let mut by_lsn: BTreeMap<Lsn, &LogRecord> = BTreeMap::new();
        for record in log {
            if !record.touches_page() {
                continue;
            }
            let in_scope = match scope {
                Some(tx_id) => record.tx_id == tx_id,
                None => self.tx_table.contains_key(&record.tx_id),
            };
            if in_scope {
                to_undo.push(record.lsn);
                by_lsn.insert(record.lsn, record);
            }
        }

        while let Some(lsn) = to_undo.pop() {
            let record = by_lsn[&lsn];
            // The transaction may have been retired by a compensation
            // chain that already reached its first update.
            if !self.tx_table.contains_key(&record.tx_id) {
                continue;
            }

            let (undo_next, end_prev_lsn) = match &record.kind {
                RecordKind::Update {
                    page_id,
                    offset,
                    before_image,
                    ..
                } => {
                    let clr_lsn = self.engine.next_lsn();
                    let prev_lsn = self.last_lsn(record.tx_id);
                    self.append_to_tail(LogRecord::clr(
                        clr_lsn,
                        prev_lsn,
                        record.tx_id,
                        *page_id,
                        *offset,
                        before_image,
                        record.prev_lsn,
                    ));
                    self.set_last_lsn(record.tx_id, clr_lsn);

                    if !self
                        .engine
                        .page_write(*page_id, *offset, before_image, clr_lsn)
                    {
                        log::warn!(
                            "undo stopped: storage engine refused write of page {} at LSN {}",
                            page_id,
                            clr_lsn
                        );
                        return;
                    }
                    (record.prev_lsn, clr_lsn)
                }
                RecordKind::Clr { undo_next_lsn, .. } => (*undo_next_lsn, record.lsn),
                _ => continue,
            };

            if undo_next == NULL_LSN {
                let end_lsn = self.engine.next_lsn();
                self.append_to_tail(LogRecord::end(end_lsn, end_prev_lsn, record.tx_id));
                self.tx_table.remove(&record.tx_id);
                if scope.is_some() {
                    return;
                }
            }
        }
    }

    /// Recover from a crash given the durable log: analysis, redo, undo.
    /// Undo is skipped when redo reports the storage engine unavailable.
    pub fn recover(&mut self, raw_log: &str) -> Result<()> {
        let log = parse_log(raw_log)?;
        log::info!("starting recovery over {} log records", log.len());

        self.analyze(&log);
        log::debug!(
            "analysis found {} live transactions and {} dirty pages",
            self.tx_table.len(),
            self.dirty_page_table.len()
        );

        if self.redo(&log) {
            self.undo(&log, None);
            log::info!("recovery complete");
        } else {
            log::warn!("recovery suspended: storage engine refused writes during redo");
        }
        Ok(())
    }
}
