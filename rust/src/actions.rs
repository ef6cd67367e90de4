use primitive_types::U256;

use crate::buttons::Button;
use crate::transport::RecordId;

/// User-initiated operations, dispatched from the UI layer and handled on
/// the engine thread. All conversation state changes go through these.
#[derive(Clone, Debug)]
pub enum ChatAction {
    /// Re-read the full transport snapshot (initial load, foregrounding).
    Refresh,

    // Sending
    SendMessage {
        body: String,
    },
    TapButton {
        button: Button,
    },

    // Payments
    SendPayment {
        value_wei: U256,
        to_address: String,
    },
    ApprovePaymentRequest {
        message_id: RecordId,
    },
    RejectPaymentRequest {
        message_id: RecordId,
    },
}

impl ChatAction {
    /// Log-safe action tag (never includes message bodies or addresses).
    pub fn tag(&self) -> &'static str {
        match self {
            ChatAction::Refresh => "Refresh",
            ChatAction::SendMessage { .. } => "SendMessage",
            ChatAction::TapButton { .. } => "TapButton",
            ChatAction::SendPayment { .. } => "SendPayment",
            ChatAction::ApprovePaymentRequest { .. } => "ApprovePaymentRequest",
            ChatAction::RejectPaymentRequest { .. } => "RejectPaymentRequest",
        }
    }
}
