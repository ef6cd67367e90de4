//! Test doubles for the engine's collaborators: an in-memory transport log
//! with a controllable change feed, a scriptable transaction client, and a
//! fixed identity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use sofa_core::{
    now_millis, ChangeEvent, ChatReconciler, ChatUpdate, Direction, IdentityProvider, Record,
    TransactionClient, TransactionParams, TransportLog,
};

pub const IDENTITY_ADDRESS: &str = "0xa2a0134f1df987bc388dbcb635dfeed4ce497e2a";
pub const PEER_ADDRESS: &str = "0x011c6dd9565b8b83e6a9ee3f06e89ece3251ef2f";

pub fn incoming(id: &str, timestamp: i64, body: &str) -> Record {
    Record {
        id: id.to_string(),
        timestamp,
        direction: Direction::Incoming,
        body: body.to_string(),
        attachment_refs: vec![],
    }
}

pub struct MemoryLog {
    records: Mutex<Vec<Record>>,
    feed_tx: flume::Sender<ChangeEvent>,
    feed_rx: flume::Receiver<ChangeEvent>,
    append_seq: AtomicU64,
}

impl MemoryLog {
    pub fn new() -> Arc<Self> {
        let (feed_tx, feed_rx) = flume::unbounded();
        Arc::new(Self {
            records: Mutex::new(Vec::new()),
            feed_tx,
            feed_rx,
            append_seq: AtomicU64::new(0),
        })
    }

    /// Pre-session history: present in `read_all` without a feed event.
    pub fn seed(&self, record: Record) {
        self.records.lock().unwrap().push(record);
    }

    pub fn inject_insert(&self, record: Record) {
        self.records.lock().unwrap().push(record.clone());
        let _ = self.feed_tx.send(ChangeEvent::Inserted(record));
    }

    pub fn inject_update(&self, record: Record) {
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
            *existing = record.clone();
        }
        let _ = self.feed_tx.send(ChangeEvent::Updated(record));
    }

    pub fn inject_remove(&self, id: &str) {
        self.records.lock().unwrap().retain(|r| r.id != id);
        let _ = self.feed_tx.send(ChangeEvent::Removed(id.to_string()));
    }

    /// Bodies of records appended through the trait, in append order.
    pub fn outgoing_bodies(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.direction == Direction::Outgoing)
            .map(|r| r.body.clone())
            .collect()
    }
}

#[async_trait]
impl TransportLog for MemoryLog {
    async fn read_all(&self, _conversation_id: &str) -> Result<Vec<Record>> {
        Ok(self.records.lock().unwrap().clone())
    }

    fn subscribe(&self, _conversation_id: &str) -> flume::Receiver<ChangeEvent> {
        self.feed_rx.clone()
    }

    async fn append(&self, _conversation_id: &str, body: String) -> Result<Record> {
        let seq = self.append_seq.fetch_add(1, Ordering::SeqCst);
        let record = Record {
            id: format!("out-{seq}"),
            timestamp: now_millis(),
            direction: Direction::Outgoing,
            body,
            attachment_refs: vec![],
        };
        // A real log echoes its own writes through the change feed.
        self.records.lock().unwrap().push(record.clone());
        let _ = self.feed_tx.send(ChangeEvent::Inserted(record.clone()));
        Ok(record)
    }
}

#[derive(Clone, Copy, PartialEq)]
pub enum FailAt {
    Nothing,
    Build,
    Sign,
    Broadcast,
}

pub struct MockTransactions {
    fail_at: FailAt,
    delay: Duration,
    broadcasts: AtomicU64,
}

impl MockTransactions {
    pub fn ok() -> Arc<Self> {
        Self::failing_at(FailAt::Nothing)
    }

    pub fn failing_at(fail_at: FailAt) -> Arc<Self> {
        Arc::new(Self {
            fail_at,
            delay: Duration::ZERO,
            broadcasts: AtomicU64::new(0),
        })
    }

    /// Holds the pipeline open inside `build_unsigned`, so tests can race a
    /// second operation against an in-flight flow.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fail_at: FailAt::Nothing,
            delay,
            broadcasts: AtomicU64::new(0),
        })
    }

    pub fn broadcast_count(&self) -> u64 {
        self.broadcasts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionClient for MockTransactions {
    async fn build_unsigned(&self, params: &TransactionParams) -> Result<Vec<u8>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_at == FailAt::Build {
            anyhow::bail!("gas estimation failed");
        }
        let mut unsigned = params.to.as_bytes().to_vec();
        unsigned.extend_from_slice(&params.value.to_string().into_bytes());
        Ok(unsigned)
    }

    async fn sign(&self, _unsigned: &[u8]) -> Result<String> {
        if self.fail_at == FailAt::Sign {
            anyhow::bail!("keystore locked");
        }
        Ok("0xfeedsignature".to_string())
    }

    async fn broadcast(&self, _unsigned: &[u8], _signature: &str) -> Result<String> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == FailAt::Broadcast {
            anyhow::bail!("nonce too low");
        }
        Ok("0x8bce5da4d102d1d48a42f8f5ffa6f9e3eac3b0a2".to_string())
    }
}

pub struct TestIdentity;

impl IdentityProvider for TestIdentity {
    fn payment_address(&self) -> String {
        IDENTITY_ADDRESS.to_string()
    }

    fn language(&self) -> String {
        "en".to_string()
    }
}

/// Collects every published update for later assertions.
#[derive(Clone, Default)]
pub struct UpdateRecorder {
    updates: Arc<Mutex<Vec<ChatUpdate>>>,
}

impl UpdateRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<ChatUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

impl ChatReconciler for UpdateRecorder {
    fn reconcile(&self, update: ChatUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

/// Poll until `pred` holds or the timeout elapses; returns the final result.
pub fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if pred() {
            return true;
        }
        if Instant::now() >= deadline {
            return pred();
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
