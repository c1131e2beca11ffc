//! SQLite-backed offline queue.
//!
//! A single database file at `{root_dir}/queue.db` holds every pending
//! server write. Entries are consumed strictly oldest-first.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use super::schema::{apply_schema, read_schema_version};
use super::types::{
    DestinationKind, HttpMethod, PendingOperation, QueuedOperation, now_epoch_secs,
};

/// Database filename within the queue root directory.
const DB_FILENAME: &str = "queue.db";

/// Durable FIFO of [`PendingOperation`]s.
///
/// Thread-safe via an internal mutex. [`remove_oldest`](Self::remove_oldest)
/// deletes exactly the entry last handed out by
/// [`peek_oldest`](Self::peek_oldest), so a caller can never remove an entry
/// it has not looked at.
pub struct OfflineQueue {
    root: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    conn: Connection,
    /// Sequence number of the entry last returned by `peek_oldest`.
    last_peeked: Option<i64>,
}

impl OfflineQueue {
    /// Open (or create) the queue at `{root_dir}/queue.db`.
    pub fn open(root_dir: &Path) -> Result<Self, QueueError> {
        std::fs::create_dir_all(root_dir).map_err(|e| QueueError::Io(e.to_string()))?;
        let conn = Connection::open(root_dir.join(DB_FILENAME))?;
        apply_schema(&conn)?;
        debug!(root = %root_dir.display(), "offline queue opened");
        Ok(Self {
            root: root_dir.to_path_buf(),
            inner: Mutex::new(Inner {
                conn,
                last_peeked: None,
            }),
        })
    }

    /// In-memory queue with no durability. Used by tests and dry runs.
    pub fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            root: PathBuf::new(),
            inner: Mutex::new(Inner {
                conn,
                last_peeked: None,
            }),
        })
    }

    /// Returns the root directory path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn schema_version(&self) -> Result<Option<u32>, QueueError> {
        let inner = self.lock()?;
        Ok(read_schema_version(&inner.conn)?)
    }

    /// Durably append an operation. Returns its sequence number.
    pub fn enqueue(&self, op: &PendingOperation) -> Result<i64, QueueError> {
        let inner = self.lock()?;
        let params_json =
            serde_json::to_string(&op.normal_params).map_err(|e| QueueError::Io(e.to_string()))?;

        inner.conn.execute(
            "INSERT INTO pending_operations \
             (http_method, url, normal_params, json_payload, destination_kind, enqueued_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                op.http_method.as_str(),
                op.url,
                params_json,
                op.json_payload,
                op.destination_kind.as_str(),
                now_epoch_secs()
            ],
        )?;
        let seq = inner.conn.last_insert_rowid();
        debug!(
            seq,
            method = %op.http_method,
            destination = op.destination_kind.as_str(),
            "operation enqueued"
        );
        Ok(seq)
    }

    /// The earliest remaining entry, or `None` when the queue is empty.
    ///
    /// A row that cannot be decoded yields [`QueueError::Corrupt`]; it still
    /// counts as peeked, so the caller may discard it with `remove_oldest`.
    pub fn peek_oldest(&self) -> Result<Option<QueuedOperation>, QueueError> {
        let mut inner = self.lock()?;
        let row = inner
            .conn
            .query_row(
                "SELECT seq, http_method, url, normal_params, json_payload, \
                 destination_kind, enqueued_at \
                 FROM pending_operations ORDER BY seq ASC LIMIT 1",
                [],
                |row| {
                    Ok(RawRow {
                        seq: row.get(0)?,
                        http_method: row.get(1)?,
                        url: row.get(2)?,
                        normal_params: row.get(3)?,
                        json_payload: row.get(4)?,
                        destination_kind: row.get(5)?,
                        enqueued_at: row.get(6)?,
                    })
                },
            )
            .optional()?;

        let Some(raw) = row else {
            inner.last_peeked = None;
            return Ok(None);
        };

        inner.last_peeked = Some(raw.seq);
        raw.decode().map(Some)
    }

    /// Delete the entry last returned by [`peek_oldest`](Self::peek_oldest).
    ///
    /// # Errors
    ///
    /// [`QueueError::NothingPending`] when nothing was peeked or the peeked
    /// entry no longer exists. The queue is left unchanged.
    pub fn remove_oldest(&self) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let Some(seq) = inner.last_peeked.take() else {
            warn!("remove_oldest called with no peeked entry");
            return Err(QueueError::NothingPending);
        };

        let rows = inner
            .conn
            .execute("DELETE FROM pending_operations WHERE seq = ?1", params![seq])?;
        if rows == 0 {
            warn!(seq, "remove_oldest: peeked entry already gone");
            return Err(QueueError::NothingPending);
        }
        debug!(seq, "operation removed");
        Ok(())
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    pub fn len(&self) -> Result<usize, QueueError> {
        let inner = self.lock()?;
        let count: i64 =
            inner
                .conn
                .query_row("SELECT COUNT(*) FROM pending_operations", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// All entries oldest-first, without affecting the peek cursor.
    pub fn snapshot(&self) -> Result<Vec<QueuedOperation>, QueueError> {
        let inner = self.lock()?;
        let mut stmt = inner.conn.prepare(
            "SELECT seq, http_method, url, normal_params, json_payload, \
             destination_kind, enqueued_at \
             FROM pending_operations ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RawRow {
                seq: row.get(0)?,
                http_method: row.get(1)?,
                url: row.get(2)?,
                normal_params: row.get(3)?,
                json_payload: row.get(4)?,
                destination_kind: row.get(5)?,
                enqueued_at: row.get(6)?,
            })
        })?;

        let mut entries = Vec::new();
        for r in rows {
            entries.push(r?.decode()?);
        }
        Ok(entries)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, QueueError> {
        self.inner
            .lock()
            .map_err(|e| QueueError::Lock(e.to_string()))
    }
}

/// Errors from the offline queue store.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("no peeked entry to remove")]
    NothingPending,

    #[error("corrupt queue entry {seq}: {reason}")]
    Corrupt { seq: i64, reason: String },

    #[error("lock poisoned: {0}")]
    Lock(String),
}

struct RawRow {
    seq: i64,
    http_method: String,
    url: String,
    normal_params: String,
    json_payload: String,
    destination_kind: String,
    enqueued_at: i64,
}

impl RawRow {
    fn decode(self) -> Result<QueuedOperation, QueueError> {
        let http_method = HttpMethod::parse(&self.http_method).ok_or_else(|| QueueError::Corrupt {
            seq: self.seq,
            reason: format!("unknown http method `{}`", self.http_method),
        })?;
        let normal_params: Vec<(String, String)> = serde_json::from_str(&self.normal_params)
            .map_err(|e| QueueError::Corrupt {
                seq: self.seq,
                reason: format!("bad normal_params: {e}"),
            })?;

        Ok(QueuedOperation {
            seq: self.seq,
            enqueued_at: u64::try_from(self.enqueued_at).unwrap_or(0),
            op: PendingOperation {
                http_method,
                url: self.url,
                normal_params,
                json_payload: self.json_payload,
                destination_kind: DestinationKind::parse(&self.destination_kind),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    fn op(n: u32) -> PendingOperation {
        PendingOperation::new(
            HttpMethod::Post,
            format!("https://example.org/responses/{n}"),
            &json!({ "n": n }),
            DestinationKind::ResponseProcessing,
        )
    }

    #[test]
    fn empty_queue_peeks_none() {
        let queue = OfflineQueue::in_memory().unwrap();
        assert!(queue.peek_oldest().unwrap().is_none());
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn entries_come_back_in_insertion_order() {
        let queue = OfflineQueue::in_memory().unwrap();
        for n in 1..=3 {
            queue.enqueue(&op(n)).unwrap();
        }

        for n in 1..=3 {
            let head = queue.peek_oldest().unwrap().expect("entry");
            assert_eq!(head.op, op(n));
            queue.remove_oldest().unwrap();
        }
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn peek_does_not_consume() {
        let queue = OfflineQueue::in_memory().unwrap();
        queue.enqueue(&op(1)).unwrap();
        let a = queue.peek_oldest().unwrap().unwrap();
        let b = queue.peek_oldest().unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn remove_without_peek_is_rejected() {
        let queue = OfflineQueue::in_memory().unwrap();
        queue.enqueue(&op(1)).unwrap();
        assert!(matches!(
            queue.remove_oldest(),
            Err(QueueError::NothingPending)
        ));
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn remove_twice_after_one_peek_is_rejected() {
        let queue = OfflineQueue::in_memory().unwrap();
        queue.enqueue(&op(1)).unwrap();
        queue.enqueue(&op(2)).unwrap();
        queue.peek_oldest().unwrap();
        queue.remove_oldest().unwrap();
        assert!(matches!(
            queue.remove_oldest(),
            Err(QueueError::NothingPending)
        ));
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn remove_targets_peeked_entry_even_after_later_enqueues() {
        let queue = OfflineQueue::in_memory().unwrap();
        queue.enqueue(&op(1)).unwrap();
        let head = queue.peek_oldest().unwrap().unwrap();
        queue.enqueue(&op(2)).unwrap();
        queue.remove_oldest().unwrap();

        let next = queue.peek_oldest().unwrap().unwrap();
        assert!(next.seq > head.seq);
        assert_eq!(next.op, op(2));
    }

    #[test]
    fn sequence_numbers_are_never_reused() {
        let queue = OfflineQueue::in_memory().unwrap();
        let first = queue.enqueue(&op(1)).unwrap();
        queue.peek_oldest().unwrap();
        queue.remove_oldest().unwrap();
        let second = queue.enqueue(&op(2)).unwrap();
        assert!(second > first);
    }

    #[test]
    fn malformed_payload_is_stored_verbatim() {
        let queue = OfflineQueue::in_memory().unwrap();
        let bad = op(1).with_raw_payload("{not json");
        queue.enqueue(&bad).unwrap();
        let head = queue.peek_oldest().unwrap().unwrap();
        assert_eq!(head.op.json_payload, "{not json");
    }

    #[test]
    fn corrupt_row_can_be_discarded() {
        let queue = OfflineQueue::in_memory().unwrap();
        queue.enqueue(&op(1)).unwrap();
        queue.enqueue(&op(2)).unwrap();
        {
            let inner = queue.lock().unwrap();
            inner
                .conn
                .execute(
                    "UPDATE pending_operations SET http_method = 'TRACE' \
                     WHERE seq = (SELECT MIN(seq) FROM pending_operations)",
                    [],
                )
                .unwrap();
        }

        assert!(matches!(
            queue.peek_oldest(),
            Err(QueueError::Corrupt { .. })
        ));
        queue.remove_oldest().unwrap();
        assert_eq!(queue.peek_oldest().unwrap().unwrap().op, op(2));
    }

    #[test]
    fn snapshot_lists_everything_oldest_first() {
        let queue = OfflineQueue::in_memory().unwrap();
        for n in 1..=4 {
            queue.enqueue(&op(n)).unwrap();
        }
        let all = queue.snapshot().unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(matches!(
            queue.remove_oldest(),
            Err(QueueError::NothingPending)
        ));
    }

    #[test]
    fn reopen_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let original = op(7).with_param("participantId", "P-42");
        {
            let queue = OfflineQueue::open(dir.path()).unwrap();
            queue.enqueue(&original).unwrap();
        }

        let reopened = OfflineQueue::open(dir.path()).unwrap();
        let head = reopened.peek_oldest().unwrap().expect("entry survives");
        assert_eq!(head.op, original);
        assert_eq!(reopened.schema_version().unwrap(), Some(1));
    }
}
