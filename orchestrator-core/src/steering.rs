//! Steering Queue: mid-execution course correction for a running agent
//! session.
//!
//! Messages are pushed by the Worker Loop (or any bridge handler) while a
//! session is in flight and drained by the Agent Runner's PostToolUse hook
//! on every tool call. Backed by the same embedded RocksDB instance as the
//! Job Store, one column family keyed `"{session_id}:{seq}"` so a prefix
//! scan returns a session's queue in FIFO order.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{Deserialize, Serialize};

use crate::error::SteeringError;

const CF_STEERING: &str = "steering";

/// Phrases that, sent as the entire (trimmed, lowercased) message body,
/// mark a steering message as an abort regardless of the caller's explicit
/// flag.
pub fn abort_keywords() -> &'static HashSet<&'static str> {
    static KEYWORDS: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    KEYWORDS.get_or_init(|| HashSet::from(["stop", "cancel", "abort", "nevermind"]))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteeringMessage {
    pub text: String,
    pub sender: String,
    pub timestamp: f64,
    pub is_abort: bool,
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub type SteeringResult<T> = Result<T, SteeringError>;
pub type SharedSteeringQueue = Arc<SteeringQueue>;

pub struct SteeringQueue {
    db: RwLock<DB>,
    #[allow(dead_code)]
    path: PathBuf,
    // Disambiguates pushes that land in the same microsecond (two rapid
    // concurrent pushes, or pop_one's re-push loop) so their keys never
    // collide in the pending-index sense: the timestamp still dominates
    // ordering, this only breaks ties.
    seq: AtomicU64,
}

impl SteeringQueue {
    pub fn open(path: impl Into<PathBuf>) -> SteeringResult<Self> {
        let path = path.into();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf = ColumnFamilyDescriptor::new(CF_STEERING, Options::default());
        let db = DB::open_cf_descriptors(&opts, &path, vec![cf])
            .map_err(|e| SteeringError::Store(crate::error::JobStoreError::Db(e)))?;

        Ok(Self {
            db: RwLock::new(db),
            path,
            seq: AtomicU64::new(0),
        })
    }

    pub fn shared(self) -> SharedSteeringQueue {
        Arc::new(self)
    }

    fn cf_handle<'a>(&self, db: &'a DB) -> SteeringResult<std::sync::Arc<rocksdb::BoundColumnFamily<'a>>> {
        db.cf_handle(CF_STEERING)
            .ok_or(crate::error::JobStoreError::ColumnFamilyMissing(CF_STEERING))
            .map_err(SteeringError::Store)
    }

    /// Push a message onto a session's queue. Text matching an abort
    /// keyword (after trimming and lowercasing) is treated as an abort even
    /// if the caller did not set `is_abort`.
    pub fn push(&self, session_id: &str, text: &str, sender: &str, is_abort: bool) -> SteeringResult<()> {
        let is_abort = is_abort || abort_keywords().contains(text.trim().to_lowercase().as_str());
        let message = SteeringMessage {
            text: text.to_string(),
            sender: sender.to_string(),
            timestamp: now_secs(),
            is_abort,
        };

        let db = self.db.read().map_err(|_| crate::error::JobStoreError::LockPoisoned)?;
        let cf = self.cf_handle(&db)?;
        let bytes = bincode::serde::encode_to_vec(&message, bincode::config::standard())
            .map_err(|e| SteeringError::Store(crate::error::JobStoreError::Serialize(e.to_string())))?;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let key = format!(
            "{session_id}:{:020}-{:020}",
            (message.timestamp * 1_000_000.0) as u64,
            seq
        );
        db.put_cf(&cf, key.as_bytes(), bytes)
            .map_err(|e| SteeringError::Store(crate::error::JobStoreError::Db(e)))?;
        Ok(())
    }

    /// Drain all pending messages for a session in FIFO order. Not strictly
    /// atomic against a concurrent push, but safe: the watchdog hook is the
    /// queue's only consumer for a given session.
    pub fn pop_all(&self, session_id: &str) -> SteeringResult<Vec<SteeringMessage>> {
        let prefix = format!("{session_id}:");
        let db = self.db.read().map_err(|_| crate::error::JobStoreError::LockPoisoned)?;
        let cf = self.cf_handle(&db)?;

        let mut keys = Vec::new();
        let mut messages = Vec::new();
        for item in db.prefix_iterator_cf(&cf, prefix.as_bytes()) {
            let (key, bytes) = item.map_err(|e| SteeringError::Store(crate::error::JobStoreError::Db(e)))?;
            let key_str = String::from_utf8_lossy(&key).into_owned();
            if !key_str.starts_with(&prefix) {
                break;
            }
            match bincode::serde::decode_from_slice::<SteeringMessage, _>(&bytes, bincode::config::standard()) {
                Ok((message, _)) => messages.push(message),
                Err(_) => {
                    tracing::warn!(session_id, key = %key_str, "invalid steering payload, skipping");
                }
            }
            keys.push(key.to_vec());
        }
        for key in keys {
            db.delete_cf(&cf, key)
                .map_err(|e| SteeringError::Store(crate::error::JobStoreError::Db(e)))?;
        }
        Ok(messages)
    }

    /// Pop the single oldest pending message, leaving the rest queued.
    pub fn pop_one(&self, session_id: &str) -> SteeringResult<Option<SteeringMessage>> {
        let mut all = self.pop_all(session_id)?;
        if all.is_empty() {
            return Ok(None);
        }
        let head = all.remove(0);
        for remaining in all {
            self.push(session_id, &remaining.text, &remaining.sender, remaining.is_abort)?;
        }
        Ok(Some(head))
    }

    pub fn clear(&self, session_id: &str) -> SteeringResult<usize> {
        Ok(self.pop_all(session_id)?.len())
    }

    pub fn has_messages(&self, session_id: &str) -> SteeringResult<bool> {
        let prefix = format!("{session_id}:");
        let db = self.db.read().map_err(|_| crate::error::JobStoreError::LockPoisoned)?;
        let cf = self.cf_handle(&db)?;
        Ok(db
            .prefix_iterator_cf(&cf, prefix.as_bytes())
            .next()
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_queue() -> (SteeringQueue, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let queue = SteeringQueue::open(dir.path().join("steering.db")).unwrap();
        (queue, dir)
    }

    #[test]
    fn push_then_pop_all_drains_in_fifo_order() {
        let (queue, _dir) = test_queue();
        queue.push("sess-1", "first", "alice", false).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        queue.push("sess-1", "second", "alice", false).unwrap();

        let drained = queue.pop_all("sess-1").unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].text, "first");
        assert_eq!(drained[1].text, "second");
        assert!(!queue.has_messages("sess-1").unwrap());
    }

    #[test]
    fn abort_keyword_is_auto_detected_case_insensitively() {
        let (queue, _dir) = test_queue();
        queue.push("sess-1", "  STOP  ", "alice", false).unwrap();
        let drained = queue.pop_all("sess-1").unwrap();
        assert!(drained[0].is_abort);
    }

    #[test]
    fn explicit_abort_flag_is_respected_even_without_keyword() {
        let (queue, _dir) = test_queue();
        queue.push("sess-1", "please wrap up now", "alice", true).unwrap();
        let drained = queue.pop_all("sess-1").unwrap();
        assert!(drained[0].is_abort);
    }

    #[test]
    fn pop_one_leaves_remaining_messages_queued() {
        let (queue, _dir) = test_queue();
        queue.push("sess-1", "first", "alice", false).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        queue.push("sess-1", "second", "alice", false).unwrap();

        let head = queue.pop_one("sess-1").unwrap().unwrap();
        assert_eq!(head.text, "first");
        assert!(queue.has_messages("sess-1").unwrap());

        let rest = queue.pop_all("sess-1").unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].text, "second");
    }

    #[test]
    fn same_microsecond_pushes_do_not_collide() {
        let (queue, _dir) = test_queue();
        // pop_one's re-push loop (and genuinely concurrent producers) can
        // issue two pushes for one session within the same microsecond;
        // both must survive rather than one clobbering the other.
        for i in 0..20 {
            queue.push("sess-1", &format!("msg-{i}"), "alice", false).unwrap();
        }
        let drained = queue.pop_all("sess-1").unwrap();
        assert_eq!(drained.len(), 20);
        for (i, message) in drained.iter().enumerate() {
            assert_eq!(message.text, format!("msg-{i}"));
        }
    }

    #[test]
    fn queues_are_isolated_per_session() {
        let (queue, _dir) = test_queue();
        queue.push("sess-1", "for one", "alice", false).unwrap();
        queue.push("sess-2", "for two", "bob", false).unwrap();

        assert_eq!(queue.pop_all("sess-1").unwrap().len(), 1);
        assert!(queue.has_messages("sess-2").unwrap());
    }
}
