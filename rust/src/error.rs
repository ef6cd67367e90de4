use thiserror::Error;

use crate::payment::InvalidTransition;

/// Failures of the build/sign/broadcast pipeline, keyed by stage so the UI
/// can word the message sensibly.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("transaction build failed: {0}")]
    TransactionBuild(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("broadcast failed: {0}")]
    Broadcast(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("a payment operation is already in flight for this conversation")]
    ConcurrentOperationInProgress,
    #[error("unknown message id: {0}")]
    UnknownMessage(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Stable, clonable classification for UI-facing error surfacing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatErrorKind {
    TransactionBuild,
    Signing,
    Broadcast,
    InvalidTransition,
    ConcurrentOperationInProgress,
    UnknownMessage,
    Transport,
}

impl EngineError {
    pub fn kind(&self) -> ChatErrorKind {
        match self {
            EngineError::Payment(PaymentError::TransactionBuild(_)) => {
                ChatErrorKind::TransactionBuild
            }
            EngineError::Payment(PaymentError::Signing(_)) => ChatErrorKind::Signing,
            EngineError::Payment(PaymentError::Broadcast(_)) => ChatErrorKind::Broadcast,
            EngineError::InvalidTransition(_) => ChatErrorKind::InvalidTransition,
            EngineError::ConcurrentOperationInProgress => {
                ChatErrorKind::ConcurrentOperationInProgress
            }
            EngineError::UnknownMessage(_) => ChatErrorKind::UnknownMessage,
            EngineError::Transport(_) => ChatErrorKind::Transport,
        }
    }
}
