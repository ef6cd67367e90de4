use thiserror::Error;

/// Local approval/settlement progress for a payment or payment-request
/// message. This is UI/business metadata owned by the engine; it is never
/// part of the encrypted payload.
///
/// Transitions only move forward: `None` is the sole initial state,
/// `Approved`, `Rejected` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PaymentState {
    #[default]
    None,
    PendingConfirmation,
    Approved,
    Rejected,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid payment state transition: {event} from {from:?}")]
pub struct InvalidTransition {
    pub from: PaymentState,
    pub event: &'static str,
}

impl PaymentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentState::Approved | PaymentState::Rejected | PaymentState::Failed
        )
    }

    /// Short status label for payment cells.
    pub fn state_text(self) -> &'static str {
        match self {
            PaymentState::None => "",
            PaymentState::PendingConfirmation => "Requested",
            PaymentState::Approved => "Approved",
            PaymentState::Rejected => "Rejected",
            PaymentState::Failed => "Failed",
        }
    }

    /// User accepted the request; the broadcast is about to start.
    pub fn approve(self) -> Result<PaymentState, InvalidTransition> {
        match self {
            PaymentState::None => Ok(PaymentState::PendingConfirmation),
            from => Err(InvalidTransition {
                from,
                event: "approve",
            }),
        }
    }

    /// User declined the request.
    pub fn reject(self) -> Result<PaymentState, InvalidTransition> {
        match self {
            PaymentState::None => Ok(PaymentState::Rejected),
            from => Err(InvalidTransition {
                from,
                event: "reject",
            }),
        }
    }

    /// Settle a pending payment. A duplicate notification that matches the
    /// terminal state already reached is dropped (returned unchanged), so
    /// repeated "confirmed" callbacks are harmless.
    pub fn on_broadcast_result(self, success: bool) -> Result<PaymentState, InvalidTransition> {
        match (self, success) {
            (PaymentState::PendingConfirmation, true) => Ok(PaymentState::Approved),
            (PaymentState::PendingConfirmation, false) => Ok(PaymentState::Failed),
            (PaymentState::Approved, true) => Ok(PaymentState::Approved),
            (PaymentState::Failed, false) => Ok(PaymentState::Failed),
            (from, _) => Err(InvalidTransition {
                from,
                event: "broadcast_result",
            }),
        }
    }
}
