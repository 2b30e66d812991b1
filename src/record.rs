//! Log record structures and line serialization
//!
//! Every record shares a header (`lsn`, `prev_lsn`, `tx_id`) and carries a
//! tagged payload. The persisted form is one JSON object per line (the same
//! JSONL convention the data files use), with the `type` tag as the variant
//! discriminator:
//!
//! ```json
//! {"lsn":1,"prev_lsn":-1,"tx_id":1,"type":"UPDATE","page_id":1,"offset":0,"before_image":"  ","after_image":"ab"}
//! {"lsn":2,"prev_lsn":1,"tx_id":1,"type":"COMMIT"}
//! ```
//!
//! The parser is the source of truth for the format: every record produced
//! by [`LogRecord::to_line`] parses back to an equal record.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{
    DirtyPageTable, Lsn, PageId, PageSnapshot, TxId, TxSnapshot, TxTable, NULL_LSN, NULL_TX,
};

/// A write-ahead log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Log sequence number
    pub lsn: Lsn,
    /// LSN of the previous record of the same transaction (NULL_LSN if none)
    pub prev_lsn: Lsn,
    /// Owning transaction (NULL_TX for checkpoint records)
    pub tx_id: TxId,
    /// The variant payload
    #[serde(flatten)]
    pub kind: RecordKind,
}

/// Record variants, discriminated by the `type` tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RecordKind {
    /// A page modification with both images, so it can be redone and undone
    #[serde(rename = "UPDATE")]
    Update {
        page_id: PageId,
        offset: usize,
        before_image: String,
        after_image: String,
    },
    /// Compensation record: the redo-only reversal of a previous update.
    /// `undo_next_lsn` is the next LSN to undo for the transaction;
    /// NULL_LSN ends the chain.
    #[serde(rename = "CLR")]
    Clr {
        page_id: PageId,
        offset: usize,
        after_image: String,
        undo_next_lsn: Lsn,
    },
    #[serde(rename = "COMMIT")]
    Commit,
    #[serde(rename = "ABORT")]
    Abort,
    /// Transaction fully terminated; drop it from the transaction table
    #[serde(rename = "END")]
    End,
    #[serde(rename = "BEGIN_CKPT")]
    BeginCheckpoint,
    /// Carries the table snapshots of a fuzzy checkpoint
    #[serde(rename = "END_CKPT")]
    EndCheckpoint {
        tx_table: Vec<TxSnapshot>,
        dirty_pages: Vec<PageSnapshot>,
    },
}

impl LogRecord {
    pub fn update(
        lsn: Lsn,
        prev_lsn: Lsn,
        tx_id: TxId,
        page_id: PageId,
        offset: usize,
        before_image: &str,
        after_image: &str,
    ) -> Self {
        Self {
            lsn,
            prev_lsn,
            tx_id,
            kind: RecordKind::Update {
                page_id,
                offset,
                before_image: before_image.to_string(),
                after_image: after_image.to_string(),
            },
        }
    }

    pub fn clr(
        lsn: Lsn,
        prev_lsn: Lsn,
        tx_id: TxId,
        page_id: PageId,
        offset: usize,
        after_image: &str,
        undo_next_lsn: Lsn,
    ) -> Self {
        Self {
            lsn,
            prev_lsn,
            tx_id,
            kind: RecordKind::Clr {
                page_id,
                offset,
                after_image: after_image.to_string(),
                undo_next_lsn,
            },
        }
    }

    pub fn commit(lsn: Lsn, prev_lsn: Lsn, tx_id: TxId) -> Self {
        Self {
            lsn,
            prev_lsn,
            tx_id,
            kind: RecordKind::Commit,
        }
    }

    pub fn abort(lsn: Lsn, prev_lsn: Lsn, tx_id: TxId) -> Self {
        Self {
            lsn,
            prev_lsn,
            tx_id,
            kind: RecordKind::Abort,
        }
    }

    pub fn end(lsn: Lsn, prev_lsn: Lsn, tx_id: TxId) -> Self {
        Self {
            lsn,
            prev_lsn,
            tx_id,
            kind: RecordKind::End,
        }
    }

    pub fn begin_checkpoint(lsn: Lsn) -> Self {
        Self {
            lsn,
            prev_lsn: NULL_LSN,
            tx_id: NULL_TX,
            kind: RecordKind::BeginCheckpoint,
        }
    }

    pub fn end_checkpoint(
        lsn: Lsn,
        begin_lsn: Lsn,
        tx_table: &TxTable,
        dirty_pages: &DirtyPageTable,
    ) -> Self {
        Self {
            lsn,
            prev_lsn: begin_lsn,
            tx_id: NULL_TX,
            kind: RecordKind::EndCheckpoint {
                tx_table: TxSnapshot::collect(tx_table),
                dirty_pages: PageSnapshot::collect(dirty_pages),
            },
        }
    }

    /// True for the record kinds that modify a page (UPDATE and CLR)
    pub fn touches_page(&self) -> bool {
        matches!(
            self.kind,
            RecordKind::Update { .. } | RecordKind::Clr { .. }
        )
    }

    /// The affected page, for UPDATE and CLR records
    pub fn page_id(&self) -> Option<PageId> {
        match self.kind {
            RecordKind::Update { page_id, .. } | RecordKind::Clr { page_id, .. } => Some(page_id),
            _ => None,
        }
    }

    /// The redo image, for UPDATE and CLR records
    pub fn after_image(&self) -> Option<&str> {
        match &self.kind {
            RecordKind::Update { after_image, .. } | RecordKind::Clr { after_image, .. } => {
                Some(after_image)
            }
            _ => None,
        }
    }

    /// Serialize to the persisted one-line form.
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a single log line. Fails with [`Error::MalformedRecord`] when
    /// the line does not decode into any variant.
    pub fn parse(line: &str) -> Result<LogRecord> {
        serde_json::from_str(line)
            .map_err(|e| Error::MalformedRecord(format!("{} ({})", line, e)))
    }
}

/// Parse a newline-separated log stream into records, skipping blank lines.
pub fn parse_log(raw: &str) -> Result<Vec<LogRecord>> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(LogRecord::parse)
        .collect()
}
