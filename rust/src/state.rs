use crate::payment::PaymentState;
use crate::sofa::{self, Envelope};
use crate::transport::{AttachmentId, Direction, Record, RecordId};

/// One conversation entry, owned exclusively by the engine. The UI layer
/// only ever receives clones; approve/reject/send all route back through
/// engine actions.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: RecordId,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    pub direction: Direction,
    pub envelope: Envelope,
    pub attachment_refs: Vec<AttachmentId>,
    pub payment_state: PaymentState,
    pub is_displayable: bool,
    pub is_actionable: bool,
}

impl Message {
    /// Classify a raw log record. A body that fails to decode under a known
    /// tag degrades to a non-actionable, non-payment plain message so one
    /// bad record never stalls the conversation.
    pub fn from_record(record: &Record) -> Self {
        let envelope = match sofa::parse(&record.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(record_id = %record.id, %e, "envelope parse failed, degrading to plain text");
                Envelope::text("")
            }
        };
        let mut message = Self {
            id: record.id.clone(),
            timestamp: record.timestamp,
            direction: record.direction,
            envelope,
            attachment_refs: record.attachment_refs.clone(),
            payment_state: PaymentState::None,
            is_displayable: false,
            is_actionable: false,
        };
        message.recompute_flags();
        message
    }

    /// Re-derive envelope and flags from an updated record, keeping the
    /// local payment state.
    pub fn apply_update(&mut self, record: &Record) {
        let refreshed = Message::from_record(record);
        self.timestamp = refreshed.timestamp;
        self.envelope = refreshed.envelope;
        self.attachment_refs = refreshed.attachment_refs;
        self.recompute_flags();
    }

    pub fn recompute_flags(&mut self) {
        self.is_displayable = self.compute_displayable();
        self.is_actionable = self.direction == Direction::Incoming
            && matches!(self.envelope, Envelope::PaymentRequest { .. })
            && self.payment_state == PaymentState::None;
    }

    fn compute_displayable(&self) -> bool {
        // Media messages are displayable even when the text half is empty.
        if !self.attachment_refs.is_empty() {
            return true;
        }
        match &self.envelope {
            // An empty text with no attachment is a wake-up/handshake probe
            // and stays hidden.
            Envelope::Text { body, .. } => !body.is_empty(),
            Envelope::PaymentRequest { .. } | Envelope::Payment { .. } => true,
            Envelope::None
            | Envelope::Command { .. }
            | Envelope::CapabilityRequest { .. }
            | Envelope::CapabilityResponse { .. } => false,
        }
    }

    pub fn set_payment_state(&mut self, state: PaymentState) {
        self.payment_state = state;
        self.recompute_flags();
    }

    /// Ordering key: ascending timestamp; on a tie the attachment-bearing
    /// record sorts first, because the transport splits one logical media
    /// message into an attachment part and a text part sharing a timestamp.
    pub(crate) fn sort_key(&self) -> (i64, bool) {
        (self.timestamp, self.attachment_refs.is_empty())
    }
}

/// Immutable snapshot handed to the UI layer.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ConversationState {
    pub rev: u64,
    pub messages: Vec<Message>,
}

pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
