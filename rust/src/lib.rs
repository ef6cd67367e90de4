mod actions;
mod buttons;
mod engine;
mod error;
mod logging;
mod payment;
mod sofa;
mod state;
mod transport;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::ChatAction;
pub use buttons::{Button, ButtonKind};
pub use engine::{Collaborators, LANGUAGE_KEY, PAYMENT_ADDRESS_KEY};
pub use error::{ChatErrorKind, EngineError, PaymentError};
pub use payment::{InvalidTransition, PaymentState};
pub use sofa::{Envelope, EnvelopeParseError};
pub use state::{now_millis, ConversationState, Message};
pub use transport::*;
pub use updates::{ChatUpdate, EngineMsg, InternalEvent};

/// Ethereum-style address check: `0x` followed by 40 hex digits. Applied to
/// payment-request destinations before a transaction is built.
pub fn is_valid_payment_address(input: &str) -> bool {
    let Some(hex) = input.strip_prefix("0x") else {
        return false;
    };
    hex.len() == 40 && hex.chars().all(|ch| ch.is_ascii_hexdigit())
}

/// UI-side callback for receiving conversation updates.
pub trait ChatReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: ChatUpdate);
}

/// Handle to one conversation's engine. Owns the actor thread and the
/// transport feed pump; cheap to clone via `Arc`.
pub struct ChatSession {
    engine_tx: Sender<EngineMsg>,
    update_rx: Receiver<ChatUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<ConversationState>>,
}

impl ChatSession {
    pub fn new(
        conversation_id: String,
        data_dir: String,
        collaborators: Collaborators,
        peer_is_automated: bool,
    ) -> Arc<Self> {
        logging::init_logging();
        tracing::info!(conversation_id = %conversation_id, peer_is_automated, "ChatSession::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (engine_tx, engine_rx) = flume::unbounded::<EngineMsg>();
        let shared_state = Arc::new(RwLock::new(ConversationState::default()));

        // Actor loop thread (single threaded conversation actor).
        let engine_tx_for_engine = engine_tx.clone();
        let shared_for_engine = shared_state.clone();
        let collaborators_for_engine = collaborators.clone();
        let conversation_for_engine = conversation_id.clone();
        thread::spawn(move || {
            let mut engine = engine::ChatEngine::new(
                conversation_for_engine,
                data_dir,
                peer_is_automated,
                collaborators_for_engine,
                update_tx,
                engine_tx_for_engine,
                shared_for_engine,
            );
            while let Ok(msg) = engine_rx.recv() {
                engine.handle_message(msg);
            }
        });

        // Feed pump thread: forwards transport change events into the actor
        // in arrival order.
        let engine_tx_for_feed = engine_tx.clone();
        let transport = collaborators.transport;
        thread::spawn(move || {
            let feed = transport.subscribe(&conversation_id);
            while let Ok(event) = feed.recv() {
                let forwarded = engine_tx_for_feed.send(EngineMsg::Internal(Box::new(
                    InternalEvent::Feed(event),
                )));
                if forwarded.is_err() {
                    break;
                }
            }
        });

        let session = Arc::new(Self {
            engine_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
        });
        session.dispatch(ChatAction::Refresh);
        session
    }

    pub fn state(&self) -> ConversationState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: ChatAction) {
        // Contract: never block caller.
        let _ = self.engine_tx.send(EngineMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn ChatReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}
