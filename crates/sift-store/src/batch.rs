//! Spill-to-disk write batch.
//!
//! Staged operations live in memory until a threshold, then overflow to a
//! durable log under [`sift_core::schema::P_OVERFLOW`]. The batch moves
//! through three persisted states:
//!
//! * `Empty` — nothing spilled; a commit is a single atomic write.
//! * `Filling` — overflow rows exist but the batch is still open. A crash
//!   here discards the partial batch on restart.
//! * `Emptying` — the batch committed; overflow rows are being replayed
//!   into the main keyspace in chunks. A crash here resumes the replay.
//!
//! Replay order equals staging order, so later operations on a key win.

use std::sync::Arc;

use tracing::{debug, warn};

use sift_core::error::{BatchError, SiftError, StoreError};
use sift_core::schema::{self, ScanBounds};

use crate::kv::Store;

/// One staged mutation.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum StagedOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Persisted lifecycle state of the write batch.
///
/// Stored as a single byte; an absent key reads as `Empty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Empty,
    Filling,
    Emptying,
}

impl BatchState {
    pub fn as_byte(self) -> u8 {
        match self {
            BatchState::Empty => 0,
            BatchState::Filling => 1,
            BatchState::Emptying => 2,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, BatchError> {
        match b {
            0 => Ok(BatchState::Empty),
            1 => Ok(BatchState::Filling),
            2 => Ok(BatchState::Emptying),
            other => Err(BatchError::UnknownState(other)),
        }
    }
}

/// Crash-safe write batch over a [`Store`].
///
/// All index mutations for one block are staged here and committed as a
/// unit; the overflow log keeps memory bounded for blocks that touch many
/// keys.
#[derive(Debug)]
pub struct WriteBatchService {
    store: Arc<Store>,
    buf: Vec<StagedOp>,
    spill_threshold: usize,
    drain_chunk: usize,
    next_seq: u64,
    state: BatchState,
}

impl WriteBatchService {
    /// Attach to a store, picking up any persisted batch state.
    ///
    /// Callers should run [`process`](Self::process) before staging new
    /// work so that an interrupted batch is discarded or completed first.
    pub fn new(
        store: Arc<Store>,
        spill_threshold: usize,
        drain_chunk: usize,
    ) -> Result<Self, SiftError> {
        let state = match store.get(&schema::batch_state_key())? {
            Some(bytes) => {
                let byte = bytes
                    .first()
                    .copied()
                    .ok_or_else(|| BatchError::CorruptOverflow("empty state value".into()))?;
                BatchState::from_byte(byte)?
            }
            None => BatchState::Empty,
        };
        let next_seq = match state {
            BatchState::Empty => 0,
            _ => {
                let last = store.scan(
                    &ScanBounds::table(schema::P_OVERFLOW).reverse().limit(1),
                )?;
                match last.first() {
                    Some((key, _)) => schema::parse_overflow_key(key)? + 1,
                    None => 0,
                }
            }
        };
        Ok(Self {
            store,
            buf: Vec::new(),
            spill_threshold: spill_threshold.max(1),
            drain_chunk: drain_chunk.max(1),
            next_seq,
            state,
        })
    }

    /// Stage a put.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), SiftError> {
        self.push(StagedOp::Put { key, value })
    }

    /// Stage a delete.
    pub fn delete(&mut self, key: Vec<u8>) -> Result<(), SiftError> {
        self.push(StagedOp::Delete { key })
    }

    fn push(&mut self, op: StagedOp) -> Result<(), SiftError> {
        if self.state == BatchState::Emptying {
            return Err(BatchError::AlreadyCommitted.into());
        }
        self.buf.push(op);
        if self.buf.len() >= self.spill_threshold {
            self.spill()?;
        }
        Ok(())
    }

    /// Move the in-memory buffer to the overflow log.
    fn spill(&mut self) -> Result<(), SiftError> {
        let staged = std::mem::take(&mut self.buf);
        let mut ops = Vec::with_capacity(staged.len() + 1);
        for op in staged {
            ops.push(StagedOp::Put {
                key: schema::overflow_key(self.next_seq),
                value: encode_op(&op)?,
            });
            self.next_seq += 1;
        }
        ops.push(StagedOp::Put {
            key: schema::batch_state_key(),
            value: vec![BatchState::Filling.as_byte()],
        });
        self.store.apply(&ops)?;
        self.state = BatchState::Filling;
        debug!(spilled_through = self.next_seq, "write batch spilled to overflow log");
        Ok(())
    }

    /// Commit everything staged since the last commit.
    ///
    /// With no spill this is one atomic write. With a spill the remaining
    /// buffer is flushed together with the `Emptying` state marker, then
    /// the overflow log is replayed; a crash anywhere after that marker
    /// resumes the replay on restart.
    pub fn commit(&mut self) -> Result<(), SiftError> {
        match self.state {
            BatchState::Empty => {
                let staged = std::mem::take(&mut self.buf);
                if !staged.is_empty() {
                    self.store.apply(&staged)?;
                }
                Ok(())
            }
            BatchState::Filling => {
                let staged = std::mem::take(&mut self.buf);
                let mut ops = Vec::with_capacity(staged.len() + 1);
                for op in staged {
                    ops.push(StagedOp::Put {
                        key: schema::overflow_key(self.next_seq),
                        value: encode_op(&op)?,
                    });
                    self.next_seq += 1;
                }
                ops.push(StagedOp::Put {
                    key: schema::batch_state_key(),
                    value: vec![BatchState::Emptying.as_byte()],
                });
                self.store.apply(&ops)?;
                self.state = BatchState::Emptying;
                self.drain()
            }
            BatchState::Emptying => Err(BatchError::AlreadyCommitted.into()),
        }
    }

    /// Replay the overflow log into the main keyspace, chunk by chunk.
    ///
    /// Each chunk applies the decoded operations and deletes the log rows
    /// in one atomic write, so an interrupted drain never replays a row
    /// twice.
    fn drain(&mut self) -> Result<(), SiftError> {
        loop {
            let rows = self
                .store
                .scan(&ScanBounds::table(schema::P_OVERFLOW).limit(self.drain_chunk))?;
            if rows.is_empty() {
                self.store
                    .apply(&[StagedOp::Delete { key: schema::batch_state_key() }])?;
                self.state = BatchState::Empty;
                self.next_seq = 0;
                return Ok(());
            }
            let last_chunk = rows.len() < self.drain_chunk;
            let mut ops = Vec::with_capacity(rows.len() * 2 + 1);
            for (key, value) in rows {
                ops.push(decode_op(&value)?);
                ops.push(StagedOp::Delete { key });
            }
            if last_chunk {
                // Clearing the state key marks the batch fully applied;
                // absent means Empty.
                ops.push(StagedOp::Delete { key: schema::batch_state_key() });
            }
            self.store.apply(&ops)?;
            if last_chunk {
                self.state = BatchState::Empty;
                self.next_seq = 0;
                return Ok(());
            }
        }
    }

    /// Recover from whatever state a previous process left behind.
    ///
    /// `Filling` means the batch never committed: its overflow rows are
    /// discarded. `Emptying` means it committed: the replay is finished.
    pub fn process(&mut self) -> Result<(), SiftError> {
        match self.state {
            BatchState::Empty => Ok(()),
            BatchState::Filling => {
                warn!("discarding uncommitted write batch from previous run");
                loop {
                    let rows = self
                        .store
                        .scan(&ScanBounds::table(schema::P_OVERFLOW).limit(self.drain_chunk))?;
                    if rows.is_empty() {
                        self.store
                            .apply(&[StagedOp::Delete { key: schema::batch_state_key() }])?;
                        self.state = BatchState::Empty;
                        self.next_seq = 0;
                        self.buf.clear();
                        return Ok(());
                    }
                    let ops: Vec<StagedOp> = rows
                        .into_iter()
                        .map(|(key, _)| StagedOp::Delete { key })
                        .collect();
                    self.store.apply(&ops)?;
                }
            }
            BatchState::Emptying => {
                warn!("resuming interrupted write batch replay");
                self.drain()
            }
        }
    }

    /// Current persisted state.
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Operations currently held in memory.
    pub fn staged_len(&self) -> usize {
        self.buf.len()
    }
}

fn encode_op(op: &StagedOp) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(op, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(format!("overflow entry encode: {e}")))
}

fn decode_op(bytes: &[u8]) -> Result<StagedOp, BatchError> {
    let (op, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| BatchError::CorruptOverflow(e.to_string()))?;
    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (Arc<Store>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("index")).unwrap());
        (store, dir)
    }

    fn overflow_rows(store: &Store) -> usize {
        store
            .scan(&ScanBounds::table(schema::P_OVERFLOW))
            .unwrap()
            .len()
    }

    #[test]
    fn small_commit_writes_directly() {
        let (store, _dir) = temp_store();
        let mut batch = WriteBatchService::new(store.clone(), 100, 10).unwrap();
        batch.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        batch.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        assert!(store.get(b"a").unwrap().is_none());
        batch.commit().unwrap();
        assert_eq!(store.get(b"a").unwrap().unwrap(), b"1");
        assert_eq!(store.get(b"b").unwrap().unwrap(), b"2");
        assert_eq!(overflow_rows(&store), 0);
        assert_eq!(batch.state(), BatchState::Empty);
    }

    #[test]
    fn threshold_triggers_spill_without_touching_main_keys() {
        let (store, _dir) = temp_store();
        let mut batch = WriteBatchService::new(store.clone(), 3, 10).unwrap();
        for i in 0..4u8 {
            batch.put(vec![b'k', i], vec![i]).unwrap();
        }
        assert_eq!(batch.state(), BatchState::Filling);
        assert_eq!(batch.staged_len(), 1);
        assert_eq!(overflow_rows(&store), 3);
        assert!(store.get(&[b'k', 0]).unwrap().is_none());

        batch.commit().unwrap();
        for i in 0..4u8 {
            assert_eq!(store.get(&[b'k', i]).unwrap().unwrap(), vec![i]);
        }
        assert_eq!(overflow_rows(&store), 0);
        assert_eq!(batch.state(), BatchState::Empty);
    }

    #[test]
    fn replay_preserves_staging_order() {
        let (store, _dir) = temp_store();
        let mut batch = WriteBatchService::new(store.clone(), 2, 2).unwrap();
        batch.put(b"k".to_vec(), b"first".to_vec()).unwrap();
        batch.put(b"k".to_vec(), b"second".to_vec()).unwrap();
        batch.delete(b"k".to_vec()).unwrap();
        batch.put(b"k".to_vec(), b"final".to_vec()).unwrap();
        batch.commit().unwrap();
        assert_eq!(store.get(b"k").unwrap().unwrap(), b"final");
    }

    #[test]
    fn empty_commit_is_a_no_op() {
        let (store, _dir) = temp_store();
        let mut batch = WriteBatchService::new(store, 10, 10).unwrap();
        batch.commit().unwrap();
        assert_eq!(batch.state(), BatchState::Empty);
    }

    #[test]
    fn crash_while_filling_discards_the_batch() {
        let (store, _dir) = temp_store();
        {
            let mut batch = WriteBatchService::new(store.clone(), 2, 10).unwrap();
            batch.put(b"a".to_vec(), b"1".to_vec()).unwrap();
            batch.put(b"b".to_vec(), b"2".to_vec()).unwrap();
            assert_eq!(batch.state(), BatchState::Filling);
            // Dropped without commit.
        }
        let mut batch = WriteBatchService::new(store.clone(), 2, 10).unwrap();
        assert_eq!(batch.state(), BatchState::Filling);
        batch.process().unwrap();
        assert_eq!(batch.state(), BatchState::Empty);
        assert!(store.get(b"a").unwrap().is_none());
        assert_eq!(overflow_rows(&store), 0);
    }

    #[test]
    fn crash_while_emptying_resumes_the_replay() {
        let (store, _dir) = temp_store();
        // Simulate a process that died mid-drain: committed overflow rows
        // plus the Emptying marker, main keys not yet written.
        store
            .apply(&[
                StagedOp::Put {
                    key: schema::overflow_key(0),
                    value: encode_op(&StagedOp::Put {
                        key: b"x".to_vec(),
                        value: b"1".to_vec(),
                    })
                    .unwrap(),
                },
                StagedOp::Put {
                    key: schema::overflow_key(1),
                    value: encode_op(&StagedOp::Put {
                        key: b"y".to_vec(),
                        value: b"2".to_vec(),
                    })
                    .unwrap(),
                },
                StagedOp::Put {
                    key: schema::batch_state_key(),
                    value: vec![BatchState::Emptying.as_byte()],
                },
            ])
            .unwrap();

        let mut batch = WriteBatchService::new(store.clone(), 10, 1).unwrap();
        assert_eq!(batch.state(), BatchState::Emptying);
        batch.process().unwrap();
        assert_eq!(batch.state(), BatchState::Empty);
        assert_eq!(store.get(b"x").unwrap().unwrap(), b"1");
        assert_eq!(store.get(b"y").unwrap().unwrap(), b"2");
        assert_eq!(overflow_rows(&store), 0);
    }

    #[test]
    fn staging_after_commit_state_is_rejected() {
        let (store, _dir) = temp_store();
        store
            .apply(&[StagedOp::Put {
                key: schema::batch_state_key(),
                value: vec![BatchState::Emptying.as_byte()],
            }])
            .unwrap();
        let mut batch = WriteBatchService::new(store, 10, 10).unwrap();
        let err = batch.put(b"a".to_vec(), b"1".to_vec()).unwrap_err();
        assert!(matches!(err, SiftError::Batch(BatchError::AlreadyCommitted)));
    }

    #[test]
    fn unknown_state_byte_is_rejected() {
        let (store, _dir) = temp_store();
        store
            .apply(&[StagedOp::Put {
                key: schema::batch_state_key(),
                value: vec![9],
            }])
            .unwrap();
        let err = WriteBatchService::new(store, 10, 10).unwrap_err();
        assert!(matches!(err, SiftError::Batch(BatchError::UnknownState(9))));
    }
}
