//! The log tail: records appended but not yet forced to disk
//!
//! Records arrive in strict LSN order (LSNs are minted monotonically and
//! appended immediately), so the buffer is a plain vector and a flush is a
//! prefix drain. The prefix rule is the write-ahead enforcement primitive:
//! everything up to `max_lsn` reaches the engine's log sink in order
//! before the call returns, and nothing past it moves.

use crate::engine::StorageEngine;
use crate::error::Result;
use crate::record::LogRecord;
use crate::types::Lsn;

/// Ordered buffer of not-yet-durable log records
#[derive(Debug, Default)]
pub struct LogTail {
    records: Vec<LogRecord>,
}

impl LogTail {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Push a record. The caller has already assigned it a fresh LSN, so
    /// insertion order is LSN order.
    pub fn append(&mut self, record: LogRecord) {
        self.records.push(record);
    }

    /// Write every record with `lsn <= max_lsn` to the engine's log sink in
    /// order, then drop exactly those records from the buffer. A negative
    /// `max_lsn` is a no-op.
    pub fn flush_up_to(&mut self, engine: &mut dyn StorageEngine, max_lsn: Lsn) -> Result<()> {
        if max_lsn < 0 {
            return Ok(());
        }
        let split = self
            .records
            .iter()
            .take_while(|r| r.lsn <= max_lsn)
            .count();
        for record in &self.records[..split] {
            engine.append_log(&record.to_line()?)?;
        }
        if split > 0 {
            log::debug!("log tail flushed {} records through LSN {}", split, max_lsn);
        }
        self.records.drain(..split);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// LSN of the most recently appended record, if any.
    pub fn last_lsn(&self) -> Option<Lsn> {
        self.records.last().map(|r| r.lsn)
    }
}
