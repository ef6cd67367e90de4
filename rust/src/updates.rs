use primitive_types::U256;

use crate::actions::ChatAction;
use crate::error::ChatErrorKind;
use crate::state::Message;
use crate::transport::{ChangeEvent, Record, RecordId};

/// Diffable updates published to the UI layer. `rev` is monotonically
/// increasing per conversation; a gap tells the UI to resync from the
/// shared snapshot.
#[derive(Clone, Debug)]
pub enum ChatUpdate {
    /// Bulk change (initial load, history backfill): replace everything.
    FullReload { rev: u64, messages: Vec<Message> },
    /// Exactly one newly visible message: candidate for an append animation.
    MessageAppended { rev: u64, message: Message },
    MessageUpdated { rev: u64, message: Message },
    MessageRemoved { rev: u64, id: RecordId },
    OperationFailed {
        rev: u64,
        kind: ChatErrorKind,
        error: String,
    },
}

impl ChatUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            ChatUpdate::FullReload { rev, .. } => *rev,
            ChatUpdate::MessageAppended { rev, .. } => *rev,
            ChatUpdate::MessageUpdated { rev, .. } => *rev,
            ChatUpdate::MessageRemoved { rev, .. } => *rev,
            ChatUpdate::OperationFailed { rev, .. } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum EngineMsg {
    Action(ChatAction),
    Internal(Box<InternalEvent>),
}

#[derive(Debug)]
pub enum InternalEvent {
    // Transport receive path
    Feed(ChangeEvent),
    SnapshotLoaded {
        records: Vec<Record>,
    },

    // Async results
    BroadcastFinished {
        /// The payment-request message this settles, if the flow was an
        /// approval rather than a direct send.
        request_id: Option<RecordId>,
        value_wei: U256,
        result: Result<String, crate::error::PaymentError>,
    },
    AppendFailed {
        error: String,
    },
    SnapshotLoadFailed {
        error: String,
    },
}
