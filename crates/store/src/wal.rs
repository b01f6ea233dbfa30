// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only, JSON-lines write-ahead log backing the document store's
//! change feed and crash recovery.
//!
//! Each committed transaction is appended as one line. Lines are replayed
//! in order to rebuild the in-memory document map after a restart, and
//! read by change-feed subscribers that attach after the fact. Corruption
//! (a non-UTF-8 or non-JSON trailing line, e.g. from a torn write) is
//! truncated away and the bad tail is rotated into a `.bak` file instead
//! of failing the open.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::doc::Op;

/// One committed transaction as persisted in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub committed_at_ms: u64,
    pub ops: Vec<Op>,
}

#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Number of buffered-but-unflushed entries that forces a flush (see
/// [`Wal::needs_flush`]).
const FLUSH_THRESHOLD: usize = 100;

const MAX_BAK_FILES: u32 = 3;

/// Rotate `.bak` / `.bak.N` backups, keeping at most [`MAX_BAK_FILES`].
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }
    bak(1)
}

/// Parse every line as a `WalEntry`, stopping at the first line that fails
/// to parse (binary data, a torn write, or truncated JSON). Returns the
/// valid entries and whether a corrupt tail was found.
fn parse_lines(bytes: &[u8]) -> (Vec<WalEntry>, bool) {
    let mut entries = Vec::new();
    let mut corrupt = false;
    for line in bytes.split(|&b| b == b'\n') {
        if line.is_empty() {
            continue;
        }
        let Ok(text) = std::str::from_utf8(line) else {
            corrupt = true;
            break;
        };
        match serde_json::from_str::<WalEntry>(text) {
            Ok(entry) => entries.push(entry),
            Err(_) => {
                corrupt = true;
                break;
            }
        }
    }
    (entries, corrupt)
}

/// Append-only transaction log.
pub struct Wal {
    path: PathBuf,
    file: File,
    write_seq: u64,
    processed_seq: u64,
    /// Entries cached in memory (the whole log fits in memory for this
    /// engine's scale; see `entries_after`/`next_unprocessed`).
    entries: Vec<WalEntry>,
    unflushed: usize,
}

impl Wal {
    /// Open (creating if absent) the log at `path`. `processed_seq` marks
    /// the sequence number already reflected in a snapshot, so
    /// `next_unprocessed`/the initial cursor skip everything up to and
    /// including it.
    pub fn open(path: impl AsRef<Path>, processed_seq: u64) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let mut raw = Vec::new();
        if path.exists() {
            File::open(&path)?.read_to_end(&mut raw)?;
        }
        let (entries, corrupt) = parse_lines(&raw);

        if corrupt {
            let bak = rotate_bak_path(&path);
            if path.exists() {
                fs::rename(&path, &bak)?;
            }
            tracing::warn!(path = %path.display(), backup = %bak.display(), "WAL corruption detected; rotated to backup");
        }

        let write_seq = entries.last().map(|e| e.seq).unwrap_or(0);

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if corrupt {
            // Rewrite the clean prefix into the fresh file.
            for entry in &entries {
                let mut line = serde_json::to_vec(entry)?;
                line.push(b'\n');
                file.write_all(&line)?;
            }
            file.flush()?;
        }

        Ok(Self { path, file, write_seq, processed_seq, entries, unflushed: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq
    }

    /// Append a committed transaction's ops, returning the assigned seq.
    /// Not yet durable until [`Wal::flush`].
    pub fn append(&mut self, ops: &[Op], committed_at_ms: u64) -> Result<u64, WalError> {
        self.write_seq += 1;
        let entry = WalEntry { seq: self.write_seq, committed_at_ms, ops: ops.to_vec() };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.entries.push(entry);
        self.unflushed += 1;
        Ok(self.write_seq)
    }

    pub fn flush(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.unflushed = 0;
        Ok(())
    }

    /// `true` once enough entries have been appended since the last flush
    /// that a caller should flush proactively rather than waiting on a
    /// timer.
    pub fn needs_flush(&self) -> bool {
        self.unflushed >= FLUSH_THRESHOLD
    }

    /// The next entry after `processed_seq`, advancing an internal read
    /// cursor. Returns `None` once caught up.
    pub fn next_unprocessed(&mut self) -> Result<Option<WalEntry>, WalError> {
        let next = self.entries.iter().find(|e| e.seq > self.processed_seq).cloned();
        Ok(next)
    }

    /// Mark `seq` as processed so future `next_unprocessed` calls (and a
    /// future reopen) skip past it.
    pub fn mark_processed(&mut self, seq: u64) {
        if seq > self.processed_seq {
            self.processed_seq = seq;
        }
    }

    /// All entries with `seq > after`, in order.
    pub fn entries_after(&self, after: u64) -> Result<Vec<WalEntry>, WalError> {
        Ok(self.entries.iter().filter(|e| e.seq > after).cloned().collect())
    }

    /// Drop entries with `seq < keep_from` from the in-memory log and
    /// rewrite the file, used after a snapshot checkpoint makes them
    /// redundant for recovery.
    pub fn truncate_before(&mut self, keep_from: u64) -> Result<(), WalError> {
        self.entries.retain(|e| e.seq >= keep_from);
        self.rewrite()
    }

    fn rewrite(&mut self) -> Result<(), WalError> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for entry in &self.entries {
                let mut line = serde_json::to_vec(entry)?;
                line.push(b'\n');
                tmp.write_all(&line)?;
            }
            tmp.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.unflushed = 0;
        Ok(())
    }
}

/// Read every well-formed entry from a log file without holding it open,
/// used by the document store to rebuild the in-memory map at startup.
pub fn replay_all(path: impl AsRef<Path>) -> Result<Vec<WalEntry>, WalError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<WalEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(_) => break,
        }
    }
    Ok(entries)
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
