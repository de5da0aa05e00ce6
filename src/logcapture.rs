//! `LogCaptor`: the out-of-scope collaborator (§6.2) that mines the
//! database's redo/transaction log and produces ordered
//! [`TransactionLogList`]s. Row-to-column value encoding is opaque to this
//! crate; `Column::value` is passed through byte-for-byte.
//!
//! This module defines the data model (§3) shared with [`crate::streamer`]
//! plus a channel-fed reference implementation suitable for wiring a real
//! log-mining backend in behind an `mpsc` producer.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

/// The statement kind a [`LogItem`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtType {
    /// A committed row insert.
    Insert = 1,
    /// A committed row update.
    Update = 2,
    /// A committed row delete.
    Delete = 3,
}

/// One column's name/type/value, prefix-length encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: Vec<u8>,
    /// Backend-defined type tag, passed through opaquely.
    pub r#type: u32,
    /// Encoded column value, passed through opaquely.
    pub value: Vec<u8>,
}

/// A single captured row mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogItem {
    /// `INSERT`: every column of the new row.
    Insert {
        /// Table the row was inserted into.
        table_name: String,
        /// The inserted row's columns.
        set_columns: Vec<Column>,
    },
    /// `UPDATE`: the row's key plus every changed column.
    Update {
        /// Table the row belongs to.
        table_name: String,
        /// The row's primary key column.
        key_column: Column,
        /// Columns that changed.
        set_columns: Vec<Column>,
    },
    /// `DELETE`: just the row's key.
    Delete {
        /// Table the row was deleted from.
        table_name: String,
        /// The deleted row's primary key column.
        key_column: Column,
    },
}

impl LogItem {
    /// The table this item concerns.
    #[must_use]
    pub fn table_name(&self) -> &str {
        match self {
            Self::Insert { table_name, .. }
            | Self::Update { table_name, .. }
            | Self::Delete { table_name, .. } => table_name,
        }
    }

    /// The wire `stmt_type` tag for this item.
    #[must_use]
    pub const fn stmt_type(&self) -> StmtType {
        match self {
            Self::Insert { .. } => StmtType::Insert,
            Self::Update { .. } => StmtType::Update,
            Self::Delete { .. } => StmtType::Delete,
        }
    }
}

/// An ordered batch of log items belonging to one committed transaction.
///
/// Produced by [`LogCaptor`], retained until `ref_cnt == 0`. The streamer
/// decrements `ref_cnt` after successfully emitting every item.
#[derive(Debug, Clone)]
pub struct TransactionLogList {
    /// Transaction id.
    pub tid: u32,
    /// Items in log order.
    pub items: Vec<LogItem>,
    /// Outstanding-consumer count; the streamer decrements this once per
    /// successfully streamed list.
    pub ref_cnt: u32,
}

impl TransactionLogList {
    /// Number of items in this transaction (`item_num` on the wire).
    #[must_use]
    pub fn item_num(&self) -> u32 { u32::try_from(self.items.len()).unwrap_or(u32::MAX) }
}

/// Out-of-scope collaborator contract (§6.2): produces committed
/// transactions for a job's registered tables into a per-job queue.
#[async_trait]
pub trait LogCaptor: Send + Sync {
    /// Pull the next batch of ready transactions for `jd`, if any are
    /// buffered. Returns an empty vector rather than blocking when the
    /// queue is currently empty; the dispatcher decides how long to wait
    /// between capture polls.
    async fn poll(&self, jd: u16) -> Vec<TransactionLogList>;
}

/// Reference [`LogCaptor`] fed by an `mpsc` channel per job. A real
/// log-mining backend can push [`TransactionLogList`]s into the sender
/// half returned by [`ChannelLogCaptor::register_job`].
#[derive(Default)]
pub struct ChannelLogCaptor {
    queues: Mutex<std::collections::HashMap<u16, mpsc::UnboundedReceiver<TransactionLogList>>>,
    next_tid: AtomicU32,
}

impl ChannelLogCaptor {
    /// Create a captor with no jobs registered yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(std::collections::HashMap::new()),
            next_tid: AtomicU32::new(1),
        }
    }

    /// Register a job's queue, returning the sender a producer pushes
    /// completed transactions into.
    pub async fn register_job(&self, jd: u16) -> mpsc::UnboundedSender<TransactionLogList> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues.lock().await.insert(jd, rx);
        tx
    }

    /// Allocate the next transaction id, for producers that don't track
    /// their own.
    pub fn next_tid(&self) -> u32 { self.next_tid.fetch_add(1, Ordering::Relaxed) }
}

#[async_trait]
impl LogCaptor for ChannelLogCaptor {
    async fn poll(&self, jd: u16) -> Vec<TransactionLogList> {
        let mut queues = self.queues.lock().await;
        let Some(rx) = queues.get_mut(&jd) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Ok(list) = rx.try_recv() {
            out.push(list);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_drains_everything_queued_for_a_job() -> anyhow::Result<()> {
        let captor = ChannelLogCaptor::new();
        let tx = captor.register_job(1).await;
        tx.send(TransactionLogList {
            tid: captor.next_tid(),
            items: vec![LogItem::Delete {
                table_name: "orders".into(),
                key_column: Column { name: b"id".to_vec(), r#type: 0, value: b"1".to_vec() },
            }],
            ref_cnt: 1,
        })?;

        let batch = captor.poll(1).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].items.len(), 1);
        assert!(captor.poll(1).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn poll_for_unknown_job_returns_empty() {
        let captor = ChannelLogCaptor::new();
        assert!(captor.poll(42).await.is_empty());
    }
}
