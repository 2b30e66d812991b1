//! Core types for basalt
//!
//! Log sequence numbers, transaction identifiers, and the two in-memory
//! tables ARIES maintains: the transaction table and the dirty page table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Log Sequence Number - a total order over log records.
///
/// Minted by the storage engine, strictly increasing. Signed so the null
/// sentinel can sort below every real LSN.
pub type Lsn = i64;

/// Transaction ID
pub type TxId = i64;

/// Page identifier
pub type PageId = i64;

/// Sentinel LSN meaning "no such record"
pub const NULL_LSN: Lsn = -1;

/// Sentinel transaction ID carried by system records (checkpoints)
pub const NULL_TX: TxId = -1;

/// Transaction status as tracked by the transaction table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// In progress; an undo candidate after a crash
    #[serde(rename = "U")]
    InProgress,
    /// Committed, awaiting its END record
    #[serde(rename = "C")]
    Committed,
}

/// One live entry of the transaction table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxTableEntry {
    /// LSN of the most recent record appended for this transaction
    pub last_lsn: Lsn,
    pub status: TxStatus,
}

impl TxTableEntry {
    pub fn new(last_lsn: Lsn, status: TxStatus) -> Self {
        Self { last_lsn, status }
    }
}

/// txID -> { lastLSN, status } for every live transaction.
///
/// Entries appear lazily on a transaction's first update (or during
/// analysis) and disappear on END.
pub type TxTable = BTreeMap<TxId, TxTableEntry>;

/// pageID -> recLSN of the earliest record that dirtied the page since it
/// was last clean on disk. Entries are removed when the page is flushed.
pub type DirtyPageTable = BTreeMap<PageId, Lsn>;

/// Checkpoint snapshot of one transaction-table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSnapshot {
    pub tx_id: TxId,
    pub last_lsn: Lsn,
    pub status: TxStatus,
}

impl TxSnapshot {
    /// Capture the transaction table as a checkpoint payload.
    pub fn collect(table: &TxTable) -> Vec<TxSnapshot> {
        table
            .iter()
            .map(|(&tx_id, entry)| TxSnapshot {
                tx_id,
                last_lsn: entry.last_lsn,
                status: entry.status,
            })
            .collect()
    }

    /// Rebuild a transaction table from a checkpoint payload.
    pub fn restore(snapshot: &[TxSnapshot]) -> TxTable {
        snapshot
            .iter()
            .map(|s| (s.tx_id, TxTableEntry::new(s.last_lsn, s.status)))
            .collect()
    }
}

/// Checkpoint snapshot of one dirty-page-table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub page_id: PageId,
    pub rec_lsn: Lsn,
}

impl PageSnapshot {
    /// Capture the dirty page table as a checkpoint payload.
    pub fn collect(table: &DirtyPageTable) -> Vec<PageSnapshot> {
        table
            .iter()
            .map(|(&page_id, &rec_lsn)| PageSnapshot { page_id, rec_lsn })
            .collect()
    }

    /// Rebuild a dirty page table from a checkpoint payload.
    pub fn restore(snapshot: &[PageSnapshot]) -> DirtyPageTable {
        snapshot.iter().map(|s| (s.page_id, s.rec_lsn)).collect()
    }
}
