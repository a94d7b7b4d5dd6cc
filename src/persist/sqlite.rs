//! SQLite-backed revision journal with periodic snapshot checkpoints.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::{
    file::{
        FileSnapshot, FileSnapshotV1, StoredRevision, StoredRevisionEnvelope,
        revision::REVISION_FORMAT_VERSION,
    },
    types::{RevNum, now_ms},
};

use super::{PersistError, PersistResult, RevisionSink};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: FileSnapshotV1,
}

/// SQLite implementation of [`crate::persist::RevisionSink`].
pub struct SqliteRevisionSink {
    conn: Connection,
}

impl SqliteRevisionSink {
    /// Opens or creates a sink at `path` in WAL mode with `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds the latest state from the newest checkpoint plus the journal tail.
    pub fn load_snapshot(&self) -> PersistResult<FileSnapshot> {
        let mut snapshot = match self.load_latest_checkpoint()? {
            Some(export) => FileSnapshot::import(export)?,
            None => FileSnapshot::empty(),
        };
        for revision in self.load_revisions_after(snapshot.rev_num())? {
            let expected = snapshot.rev_num() + 1;
            if revision.rev_num != expected {
                return Err(PersistError::Corrupt(format!(
                    "journal gap: expected revision {expected}, found {}",
                    revision.rev_num
                )));
            }
            snapshot = snapshot.apply_revision(&revision)?;
        }
        Ok(snapshot)
    }

    /// Loads revisions strictly after `rev_num`, oldest first.
    pub fn load_revisions_after(&self, rev_num: RevNum) -> PersistResult<Vec<StoredRevision>> {
        let mut stmt = self
            .conn
            .prepare("SELECT rev_num, payload FROM revisions WHERE rev_num > ?1 ORDER BY rev_num ASC")?;

        let rows = stmt.query_map(params![rev_num as i64], |row| {
            let rev_num: i64 = row.get(0)?;
            let payload: Vec<u8> = row.get(1)?;
            Ok((rev_num as RevNum, payload))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (rev_num, payload) = row?;
            let revision = decode_revision_payload(&payload)?;
            if revision.rev_num != rev_num {
                return Err(PersistError::Corrupt(format!(
                    "row {rev_num} holds revision {}",
                    revision.rev_num
                )));
            }
            out.push(revision);
        }
        Ok(out)
    }

    /// Stores a checkpoint of `snapshot`.
    pub fn write_snapshot(&mut self, snapshot: &FileSnapshotV1) -> PersistResult<()> {
        let env = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let payload = serde_json::to_vec(&env)?;
        self.conn.execute(
            "INSERT INTO snapshots(rev_num, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![snapshot.rev_num as i64, now_ms() as i64, payload],
        )?;
        Ok(())
    }

    /// Deletes revisions up to and including `rev_num`.
    pub fn compact_through(&mut self, rev_num: RevNum) -> PersistResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM revisions WHERE rev_num <= ?1", params![rev_num as i64])?;
        Ok(count)
    }

    /// Highest revision in the journal, or 0 when it is empty.
    pub fn latest_rev_num(&self) -> PersistResult<RevNum> {
        let rev_num: Option<i64> = self
            .conn
            .query_row("SELECT MAX(rev_num) FROM revisions", [], |row| row.get(0))?;
        Ok(rev_num.unwrap_or(0) as RevNum)
    }

    fn load_latest_checkpoint(&self) -> PersistResult<Option<FileSnapshotV1>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::Corrupt(format!(
                "unsupported snapshot format version: {}",
                env.format_version
            )));
        }
        Ok(Some(env.snapshot))
    }
}

impl RevisionSink for SqliteRevisionSink {
    fn append_revisions(&mut self, revisions: &[StoredRevision]) -> PersistResult<RevNum> {
        if revisions.is_empty() {
            return self.latest_rev_num();
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO revisions(rev_num, ts_ms, push_count, payload) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for stored in revisions {
                let payload = serde_json::to_vec(&StoredRevisionEnvelope::new(stored.clone()))?;
                stmt.execute(params![
                    stored.rev_num as i64,
                    stored.ts_ms as i64,
                    stored.pushes.len() as i64,
                    payload,
                ])?;
            }
        }
        tx.commit()?;

        Ok(revisions.last().map(|r| r.rev_num).unwrap_or(0))
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &FileSnapshotV1) -> PersistResult<()> {
        SqliteRevisionSink::write_snapshot(self, snapshot)
    }

    fn compact_through(&mut self, rev_num: RevNum) -> PersistResult<usize> {
        SqliteRevisionSink::compact_through(self, rev_num)
    }
}

fn decode_revision_payload(payload: &[u8]) -> PersistResult<StoredRevision> {
    let envelope: StoredRevisionEnvelope = serde_json::from_slice(payload)?;
    let version = envelope.format_version;
    envelope.into_current().ok_or_else(|| {
        PersistError::Corrupt(format!(
            "unsupported revision format version: {version} (expected {REVISION_FORMAT_VERSION})"
        ))
    })
}
