//! basalt - an ARIES-style recovery and logging core
//!
//! This crate is the durability and atomicity heart of a transactional
//! storage system: it records every page modification in a write-ahead
//! log, enforces the WAL rule when pages are flushed, drives commit and
//! abort, and rebuilds a consistent state after a crash with the classic
//! three-pass Analysis/Redo/Undo recovery.
//!
//! Architecture overview:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Transaction Driver / Clients                │
//! │            (write, commit, abort, checkpoint)               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Log Manager                          │
//! │   transaction table · dirty page table · log tail buffer    │
//! │         analysis / redo / undo recovery passes              │
//! └─────────────────────────────────────────────────────────────┘
//!               │  pageFlushed ▲            │
//!               ▼              │            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Storage Engine                         │
//! │    (LSN minting, log sink, page writes, master record)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Buffer management, page formats, locking and query layers live outside
//! this crate; everything below the log manager goes through the
//! [`StorageEngine`] trait. The manager follows a steal/no-force buffer
//! policy: dirty pages may be written before commit (hence undo and
//! compensation records) and need not be written at commit (hence redo).

pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod record;
pub mod tail;
pub mod types;

pub use config::LogConfig;
pub use engine::{EngineCall, FileEngine, MemoryEngine, StorageEngine};
pub use error::{Error, Result};
pub use manager::LogManager;
pub use record::{parse_log, LogRecord, RecordKind};
pub use tail::LogTail;
pub use types::{
    DirtyPageTable, Lsn, PageId, PageSnapshot, TxId, TxSnapshot, TxStatus, TxTable, TxTableEntry,
    NULL_LSN, NULL_TX,
};
