//! Storage engine boundary
//!
//! The log manager owns no disk and no pages; it drives everything through
//! the [`StorageEngine`] trait. The engine mints LSNs, persists log lines,
//! applies page writes, and keeps the master record.
//!
//! Two reference engines ship with the crate:
//!
//! - [`MemoryEngine`]: everything in memory, with a recorded call trace so
//!   tests can assert write-ahead ordering and simulate crashes.
//! - [`FileEngine`]: the log and master record on disk under a data
//!   directory (`wal.log` / `wal.master`), pages in memory. Page
//!   persistence belongs to the buffer manager, which is outside this
//!   crate.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::record::LogRecord;
use crate::types::{Lsn, PageId, NULL_LSN};

/// The capability the log manager consumes.
///
/// `append_log` returning implies durability of that line and all lines
/// appended before it. `page_write` returns `false` when the engine cannot
/// accept writes; recovery treats that as a signal to stop and retry on
/// the next restart.
pub trait StorageEngine {
    /// Mint a fresh, strictly increasing LSN.
    fn next_lsn(&mut self) -> Lsn;

    /// Append one serialized record line to the durable log.
    fn append_log(&mut self, line: &str) -> Result<()>;

    /// The entire durable log as newline-separated record lines.
    fn read_log(&self) -> Result<String>;

    /// Write `text` at `offset` in the page and set its pageLSN.
    /// Returns `false` on engine failure.
    fn page_write(&mut self, page_id: PageId, offset: usize, text: &str, new_page_lsn: Lsn)
        -> bool;

    /// Current pageLSN of the page, NULL_LSN if the page is unknown.
    fn page_lsn(&self, page_id: PageId) -> Lsn;

    /// Durably record the master-record LSN.
    fn store_master(&mut self, lsn: Lsn) -> Result<()>;

    /// The master LSN, or NULL_LSN if no checkpoint has completed.
    fn master(&self) -> Lsn;
}

/// One page held by a reference engine
#[derive(Debug, Clone, Default)]
struct Page {
    data: Vec<u8>,
    page_lsn: Lsn,
}

/// Splice `text` into the page image at `offset`, padding with spaces when
/// the page is shorter than the write requires.
fn splice(data: &mut Vec<u8>, offset: usize, text: &str) {
    let bytes = text.as_bytes();
    let end = offset + bytes.len();
    if data.len() < end {
        data.resize(end, b' ');
    }
    data[offset..end].copy_from_slice(bytes);
}

/// One recorded engine invocation, for test assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    AppendLog { lsn: Lsn },
    PageWrite { page_id: PageId, page_lsn: Lsn },
    StoreMaster { lsn: Lsn },
}

/// In-memory reference engine.
///
/// Keeps the durable log, the master record, and page images in memory,
/// and records every durable-side call so tests can assert ordering.
/// `restarted` clones only what would survive a crash.
#[derive(Debug)]
pub struct MemoryEngine {
    next_lsn: Lsn,
    log: Vec<String>,
    master: Lsn,
    pages: BTreeMap<PageId, Page>,
    calls: Vec<EngineCall>,
    fail_page_writes: bool,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            next_lsn: 1,
            log: Vec::new(),
            master: NULL_LSN,
            pages: BTreeMap::new(),
            calls: Vec::new(),
            fail_page_writes: false,
        }
    }

    /// The durable log lines appended so far.
    pub fn log_lines(&self) -> &[String] {
        &self.log
    }

    /// The recorded call trace.
    pub fn calls(&self) -> &[EngineCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Make every subsequent `page_write` refuse.
    pub fn set_fail_page_writes(&mut self, fail: bool) {
        self.fail_page_writes = fail;
    }

    /// Current contents of a page, for assertions.
    pub fn page_contents(&self, page_id: PageId) -> String {
        self.pages
            .get(&page_id)
            .map(|p| String::from_utf8_lossy(&p.data).into_owned())
            .unwrap_or_default()
    }

    /// Install a page image directly, as if the buffer manager had
    /// written it.
    pub fn seed_page(&mut self, page_id: PageId, text: &str, page_lsn: Lsn) {
        self.pages.insert(
            page_id,
            Page {
                data: text.as_bytes().to_vec(),
                page_lsn,
            },
        );
    }

    /// A post-crash engine: the durable log and master record survive,
    /// page images do not (nothing had been flushed).
    pub fn restarted(&self) -> MemoryEngine {
        MemoryEngine {
            next_lsn: self.next_lsn,
            log: self.log.clone(),
            master: self.master,
            pages: BTreeMap::new(),
            calls: Vec::new(),
            fail_page_writes: false,
        }
    }

    /// A post-crash engine where every page had reached disk before the
    /// crash.
    pub fn restarted_with_pages(&self) -> MemoryEngine {
        MemoryEngine {
            pages: self.pages.clone(),
            ..self.restarted()
        }
    }
}

impl StorageEngine for MemoryEngine {
    fn next_lsn(&mut self) -> Lsn {
        let lsn = self.next_lsn;
        self.next_lsn += 1;
        lsn
    }

    fn append_log(&mut self, line: &str) -> Result<()> {
        let lsn = LogRecord::parse(line).map(|r| r.lsn).unwrap_or(NULL_LSN);
        self.calls.push(EngineCall::AppendLog { lsn });
        self.log.push(line.to_string());
        Ok(())
    }

    fn read_log(&self) -> Result<String> {
        Ok(self.log.join("\n"))
    }

    fn page_write(
        &mut self,
        page_id: PageId,
        offset: usize,
        text: &str,
        new_page_lsn: Lsn,
    ) -> bool {
        if self.fail_page_writes {
            return false;
        }
        let page = self.pages.entry(page_id).or_default();
        splice(&mut page.data, offset, text);
        page.page_lsn = new_page_lsn;
        self.calls.push(EngineCall::PageWrite {
            page_id,
            page_lsn: new_page_lsn,
        });
        true
    }

    fn page_lsn(&self, page_id: PageId) -> Lsn {
        self.pages.get(&page_id).map(|p| p.page_lsn).unwrap_or(NULL_LSN)
    }

    fn store_master(&mut self, lsn: Lsn) -> Result<()> {
        self.calls.push(EngineCall::StoreMaster { lsn });
        self.master = lsn;
        Ok(())
    }

    fn master(&self) -> Lsn {
        self.master
    }
}

/// Shape of the persisted master record file
#[derive(Debug, Serialize, Deserialize)]
struct MasterRecord {
    lsn: Lsn,
}

/// File-backed reference engine.
///
/// ### Directory layout
/// ```text
/// data/
/// ├── wal.log      # append-only log, one JSON record per line
/// └── wal.master   # master record, {"lsn":N}
/// ```
///
/// `append_log` fsyncs before returning, so a returned call means the line
/// (and everything before it) is durable. Page images live in memory only;
/// persisting them is the buffer manager's job.
#[derive(Debug)]
pub struct FileEngine {
    log_path: PathBuf,
    master_path: PathBuf,
    log_file: File,
    next_lsn: Lsn,
    master: Lsn,
    pages: BTreeMap<PageId, Page>,
}

impl FileEngine {
    /// Open (or create) the engine under `data_dir`. The next LSN resumes
    /// above the highest LSN found in the existing log.
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let log_path = data_dir.join("wal.log");
        let master_path = data_dir.join("wal.master");

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let mut next_lsn = 1;
        if log_path.exists() {
            for line in fs::read_to_string(&log_path)?.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let record = LogRecord::parse(line)?;
                if record.lsn >= next_lsn {
                    next_lsn = record.lsn + 1;
                }
            }
        }

        let master = if master_path.exists() {
            let raw = fs::read_to_string(&master_path)?;
            serde_json::from_str::<MasterRecord>(&raw)
                .map(|m| m.lsn)
                .unwrap_or(NULL_LSN)
        } else {
            NULL_LSN
        };

        Ok(Self {
            log_path,
            master_path,
            log_file,
            next_lsn,
            master,
            pages: BTreeMap::new(),
        })
    }

    /// Current contents of a page, for assertions.
    pub fn page_contents(&self, page_id: PageId) -> String {
        self.pages
            .get(&page_id)
            .map(|p| String::from_utf8_lossy(&p.data).into_owned())
            .unwrap_or_default()
    }
}

impl StorageEngine for FileEngine {
    fn next_lsn(&mut self) -> Lsn {
        let lsn = self.next_lsn;
        self.next_lsn += 1;
        lsn
    }

    fn append_log(&mut self, line: &str) -> Result<()> {
        self.log_file.write_all(line.as_bytes())?;
        self.log_file.write_all(b"\n")?;
        self.log_file.sync_data()?;
        Ok(())
    }

    fn read_log(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.log_path)?)
    }

    fn page_write(
        &mut self,
        page_id: PageId,
        offset: usize,
        text: &str,
        new_page_lsn: Lsn,
    ) -> bool {
        let page = self.pages.entry(page_id).or_default();
        splice(&mut page.data, offset, text);
        page.page_lsn = new_page_lsn;
        true
    }

    fn page_lsn(&self, page_id: PageId) -> Lsn {
        self.pages.get(&page_id).map(|p| p.page_lsn).unwrap_or(NULL_LSN)
    }

    fn store_master(&mut self, lsn: Lsn) -> Result<()> {
        let mut file = File::create(&self.master_path)?;
        file.write_all(serde_json::to_string(&MasterRecord { lsn })?.as_bytes())?;
        file.sync_all()?;
        self.master = lsn;
        Ok(())
    }

    fn master(&self) -> Lsn {
        self.master
    }
}
