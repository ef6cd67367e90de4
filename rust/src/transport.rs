use anyhow::Result;
use async_trait::async_trait;
use primitive_types::U256;

pub type RecordId = String;
pub type AttachmentId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// One entry of the encrypted transport's append-only log, post-decryption.
/// The body is an opaque string; classifying it is the codec's job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    pub direction: Direction,
    pub body: String,
    pub attachment_refs: Vec<AttachmentId>,
}

#[derive(Clone, Debug)]
pub enum ChangeEvent {
    Inserted(Record),
    Updated(Record),
    Removed(RecordId),
}

/// The durable message log owned by the encryption transport. The engine
/// never sees keys or ciphertext; it reads and appends opaque bodies.
#[async_trait]
pub trait TransportLog: Send + Sync + 'static {
    async fn read_all(&self, conversation_id: &str) -> Result<Vec<Record>>;

    /// Change feed for one conversation. Events arrive in the order the log
    /// was mutated; that order is the engine's ordering guarantee.
    fn subscribe(&self, conversation_id: &str) -> flume::Receiver<ChangeEvent>;

    async fn append(&self, conversation_id: &str, body: String) -> Result<Record>;
}

#[derive(Clone, Debug)]
pub struct TransactionParams {
    pub from: String,
    pub to: String,
    pub value: U256,
}

/// Blockchain RPC surface used by payment flows. Build/sign/broadcast only;
/// transaction encoding lives entirely behind this trait.
#[async_trait]
pub trait TransactionClient: Send + Sync + 'static {
    async fn build_unsigned(&self, params: &TransactionParams) -> Result<Vec<u8>>;

    async fn sign(&self, unsigned: &[u8]) -> Result<String>;

    /// Returns the transaction hash. Once this resolves the transaction is
    /// on the network and cannot be recalled.
    async fn broadcast(&self, unsigned: &[u8], signature: &str) -> Result<String>;
}

/// Locally known identity/locale data, used to answer capability handshakes
/// and as the `from` address of outgoing payments.
pub trait IdentityProvider: Send + Sync + 'static {
    fn payment_address(&self) -> String;

    /// BCP-47-ish locale identifier, e.g. "en".
    fn language(&self) -> String;
}
