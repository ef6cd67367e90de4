use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

use flume::Sender;
use primitive_types::U256;

use crate::actions::ChatAction;
use crate::error::{EngineError, PaymentError};
use crate::sofa::{self, Envelope};
use crate::state::{ConversationState, Message};
use crate::transport::{
    ChangeEvent, Direction, IdentityProvider, Record, RecordId, TransactionClient,
    TransactionParams, TransportLog,
};
use crate::updates::{ChatUpdate, EngineMsg, InternalEvent};

/// The two capability keys a peer may request during the connection
/// bootstrap handshake. Everything else in a request is ignored.
pub const PAYMENT_ADDRESS_KEY: &str = "paymentAddress";
pub const LANGUAGE_KEY: &str = "language";

/// External collaborators the engine drives but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn TransportLog>,
    pub transactions: Arc<dyn TransactionClient>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// Per-conversation synchronization engine. Single-writer: all mutation
/// happens on the engine thread via `handle_message`; everything async
/// (transport reads/appends, the payment pipeline) is spawned onto the
/// internal runtime and returns as an `InternalEvent`.
pub struct ChatEngine {
    pub state: ConversationState,
    rev: u64,

    conversation_id: String,
    peer_is_automated: bool,
    config: ChatConfig,

    update_sender: Sender<ChatUpdate>,
    core_sender: Sender<EngineMsg>,
    shared_state: Arc<RwLock<ConversationState>>,
    runtime: tokio::runtime::Runtime,

    collaborators: Collaborators,

    // Record ids currently present in the list; dedupe + diff basis.
    known_ids: BTreeSet<RecordId>,
    // Ids the UI has already been shown, for append-vs-reload diffing.
    last_rendered: BTreeSet<RecordId>,

    // At most one build/sign/broadcast flow per conversation. The guard is
    // cleared when the late callback arrives, even if the caller abandoned
    // the flow; a broadcast cannot be recalled once submitted.
    payment_in_flight: bool,
    greeting_probe_sent: bool,
}

impl ChatEngine {
    pub fn new(
        conversation_id: String,
        data_dir: String,
        peer_is_automated: bool,
        collaborators: Collaborators,
        update_sender: Sender<ChatUpdate>,
        core_sender: Sender<EngineMsg>,
        shared_state: Arc<RwLock<ConversationState>>,
    ) -> Self {
        let config = load_chat_config(&data_dir);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state: ConversationState::default(),
            rev: 0,
            conversation_id,
            peer_is_automated,
            config,
            update_sender,
            core_sender,
            shared_state,
            runtime,
            collaborators,
            known_ids: BTreeSet::new(),
            last_rendered: BTreeSet::new(),
            payment_in_flight: false,
            greeting_probe_sent: false,
        };

        // Ensure ChatSession::state() has an immediately-available snapshot.
        this.commit_state();
        this
    }

    pub fn handle_message(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::Action(ref action) => {
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            EngineMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: ChatAction) {
        match action {
            ChatAction::Refresh => {
                let transport = self.collaborators.transport.clone();
                let conversation_id = self.conversation_id.clone();
                let core = self.core_sender.clone();
                self.runtime.spawn(async move {
                    let event = match transport.read_all(&conversation_id).await {
                        Ok(records) => InternalEvent::SnapshotLoaded { records },
                        Err(e) => InternalEvent::SnapshotLoadFailed {
                            error: format!("{e:#}"),
                        },
                    };
                    let _ = core.send(EngineMsg::Internal(Box::new(event)));
                });
            }
            ChatAction::SendMessage { body } => {
                self.append_envelope(Envelope::text(body));
            }
            ChatAction::TapButton { button } => match button.build_command() {
                Some(command) => self.append_envelope(command),
                // Groups drill into subcontrols in the UI; nothing is sent.
                None => tracing::debug!(label = %button.label, "button tap produced no command"),
            },
            ChatAction::SendPayment {
                value_wei,
                to_address,
            } => {
                if !crate::is_valid_payment_address(&to_address) {
                    self.fail(EngineError::Payment(PaymentError::TransactionBuild(
                        format!("invalid destination address: {to_address}"),
                    )));
                } else if let Err(e) = self.start_payment_flow(None, to_address, value_wei) {
                    self.fail(e);
                }
            }
            ChatAction::ApprovePaymentRequest { message_id } => {
                self.approve_payment_request(&message_id);
            }
            ChatAction::RejectPaymentRequest { message_id } => {
                self.reject_payment_request(&message_id);
            }
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::SnapshotLoaded { records } => self.apply_snapshot(records),
            InternalEvent::SnapshotLoadFailed { error } => {
                self.fail(EngineError::Transport(error));
            }
            InternalEvent::Feed(event) => self.handle_feed(event),
            InternalEvent::AppendFailed { error } => {
                self.fail(EngineError::Transport(error));
            }
            InternalEvent::BroadcastFinished {
                request_id,
                value_wei,
                result,
            } => self.finish_payment_flow(request_id, value_wei, result),
        }
    }

    // Snapshot load (initial load, history backfill, foregrounding).

    fn apply_snapshot(&mut self, records: Vec<Record>) {
        let mut next: Vec<Message> = records.iter().map(Message::from_record).collect();

        // Reloads must not lose local approval progress.
        for message in &mut next {
            if let Some(previous) = self.find(&message.id) {
                message.set_payment_state(previous.payment_state);
            }
        }
        next.sort_by_key(|m| m.sort_key());

        self.known_ids = next.iter().map(|m| m.id.clone()).collect();
        self.state.messages = next;

        let newly = diff_newly_visible(&self.last_rendered, &self.state.messages);
        self.last_rendered = self.known_ids.clone();

        tracing::debug!(
            total = self.state.messages.len(),
            newly_visible = newly.len(),
            "snapshot applied"
        );

        if newly.len() == 1 {
            let rev = self.next_rev();
            let message = newly.into_iter().next().expect("len checked");
            self.emit(ChatUpdate::MessageAppended { rev, message });
        } else {
            let rev = self.next_rev();
            self.emit(ChatUpdate::FullReload {
                rev,
                messages: self.state.messages.clone(),
            });
        }

        self.maybe_send_greeting_probe();
    }

    /// Most automated peers stay silent until spoken to. An empty text
    /// envelope is invisible in the UI but makes them send their greeting.
    fn maybe_send_greeting_probe(&mut self) {
        if !self.peer_is_automated || self.greeting_probe_sent {
            return;
        }
        if self.config.disable_auto_greeting.unwrap_or(false) {
            return;
        }
        if !self.state.messages.is_empty() {
            return;
        }
        tracing::info!("empty conversation with automated peer, sending greeting probe");
        self.greeting_probe_sent = true;
        self.append_envelope(Envelope::text(""));
    }

    // Change feed.

    fn handle_feed(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::Inserted(record) => self.on_insert(record),
            ChangeEvent::Updated(record) => self.on_update(record),
            ChangeEvent::Removed(id) => self.on_remove(&id),
        }
    }

    fn on_insert(&mut self, record: Record) {
        if self.known_ids.contains(&record.id) {
            // Feed replays an id we already hold; fold into an update.
            self.on_update(record);
            return;
        }

        let message = Message::from_record(&record);
        tracing::debug!(record_id = %message.id, tag = message.envelope.tag(), "log insert");

        // The connection-bootstrap handshake fires on receipt, before the
        // record joins the visible list.
        if message.direction == Direction::Incoming {
            if let Some(reply) = auto_reply(
                &message.envelope,
                &self.collaborators.identity.payment_address(),
                &self.language(),
            ) {
                tracing::info!("answering capability request");
                self.append_envelope(reply);
            }
        }

        let pos = self
            .state
            .messages
            .partition_point(|m| m.sort_key() <= message.sort_key());
        self.known_ids.insert(message.id.clone());
        self.last_rendered.insert(message.id.clone());
        self.state.messages.insert(pos, message.clone());

        if message.is_displayable {
            let rev = self.next_rev();
            self.emit(ChatUpdate::MessageAppended { rev, message });
        } else {
            self.commit_state();
        }
    }

    fn on_update(&mut self, record: Record) {
        let Some(pos) = self.position(&record.id) else {
            tracing::warn!(record_id = %record.id, "update for unknown record, treating as insert");
            self.on_insert(record);
            return;
        };

        let was_displayable = self.state.messages[pos].is_displayable;
        self.state.messages[pos].apply_update(&record);

        // Timestamps can move on redelivery; keep the list sorted.
        let message = self.state.messages.remove(pos);
        let pos = self
            .state
            .messages
            .partition_point(|m| m.sort_key() <= message.sort_key());
        self.state.messages.insert(pos, message.clone());

        if message.is_displayable || was_displayable {
            let rev = self.next_rev();
            self.emit(ChatUpdate::MessageUpdated { rev, message });
        } else {
            self.commit_state();
        }
    }

    fn on_remove(&mut self, id: &RecordId) {
        let Some(pos) = self.position(id) else {
            return;
        };
        self.state.messages.remove(pos);
        self.known_ids.remove(id);
        self.last_rendered.remove(id);
        let rev = self.next_rev();
        self.emit(ChatUpdate::MessageRemoved {
            rev,
            id: id.clone(),
        });
    }

    // Payment flows.

    fn approve_payment_request(&mut self, message_id: &RecordId) {
        let Some(pos) = self.position(message_id) else {
            self.fail(EngineError::UnknownMessage(message_id.clone()));
            return;
        };
        let (destination, value_wei) = match &self.state.messages[pos].envelope {
            Envelope::PaymentRequest {
                destination_address,
                value_wei,
                ..
            } if self.state.messages[pos].direction == Direction::Incoming => {
                (destination_address.clone(), *value_wei)
            }
            _ => {
                self.fail(EngineError::UnknownMessage(format!(
                    "{message_id} is not an incoming payment request"
                )));
                return;
            }
        };

        // Guard before the state transition so a rejected second call
        // leaves the first flow's PendingConfirmation untouched.
        if self.payment_in_flight {
            self.fail(EngineError::ConcurrentOperationInProgress);
            return;
        }
        if !crate::is_valid_payment_address(&destination) {
            self.fail(EngineError::Payment(PaymentError::TransactionBuild(
                format!("invalid destination address: {destination}"),
            )));
            return;
        }

        match self.state.messages[pos].payment_state.approve() {
            Ok(next) => {
                self.state.messages[pos].set_payment_state(next);
                let message = self.state.messages[pos].clone();
                let rev = self.next_rev();
                self.emit(ChatUpdate::MessageUpdated { rev, message });
            }
            Err(e) => {
                self.fail(e.into());
                return;
            }
        }

        if let Err(e) = self.start_payment_flow(Some(message_id.clone()), destination, value_wei) {
            self.fail(e);
        }
    }

    fn reject_payment_request(&mut self, message_id: &RecordId) {
        let Some(pos) = self.position(message_id) else {
            self.fail(EngineError::UnknownMessage(message_id.clone()));
            return;
        };
        if !self.state.messages[pos].envelope.is_payment_related() {
            self.fail(EngineError::UnknownMessage(format!(
                "{message_id} is not a payment message"
            )));
            return;
        }
        match self.state.messages[pos].payment_state.reject() {
            Ok(next) => {
                self.state.messages[pos].set_payment_state(next);
                let message = self.state.messages[pos].clone();
                let rev = self.next_rev();
                self.emit(ChatUpdate::MessageUpdated { rev, message });
            }
            Err(e) => self.fail(e.into()),
        }
    }

    fn start_payment_flow(
        &mut self,
        request_id: Option<RecordId>,
        to_address: String,
        value_wei: U256,
    ) -> Result<(), EngineError> {
        if self.payment_in_flight {
            return Err(EngineError::ConcurrentOperationInProgress);
        }
        self.payment_in_flight = true;

        let params = TransactionParams {
            from: self.collaborators.identity.payment_address(),
            to: to_address,
            value: value_wei,
        };
        let transactions = self.collaborators.transactions.clone();
        let core = self.core_sender.clone();
        tracing::info!(value = %sofa::wei_to_hex(value_wei), "starting payment flow");

        // Fire-and-forget with a late callback: once broadcast, the
        // transaction cannot be cancelled, so the result always comes back
        // through the actor even if the initiating UI is gone.
        self.runtime.spawn(async move {
            let result = run_payment_pipeline(transactions, params).await;
            let _ = core.send(EngineMsg::Internal(Box::new(
                InternalEvent::BroadcastFinished {
                    request_id,
                    value_wei,
                    result,
                },
            )));
        });
        Ok(())
    }

    fn finish_payment_flow(
        &mut self,
        request_id: Option<RecordId>,
        value_wei: U256,
        result: Result<String, PaymentError>,
    ) {
        self.payment_in_flight = false;
        let success = result.is_ok();

        if let Some(id) = &request_id {
            if let Some(pos) = self.position(id) {
                let current = self.state.messages[pos].payment_state;
                match current.on_broadcast_result(success) {
                    Ok(next) if next != current => {
                        tracing::info!(record_id = %id, state = next.state_text(), "payment request settled");
                        self.state.messages[pos].set_payment_state(next);
                        let message = self.state.messages[pos].clone();
                        let rev = self.next_rev();
                        self.emit(ChatUpdate::MessageUpdated { rev, message });
                    }
                    Ok(_) => {
                        tracing::debug!(record_id = %id, "duplicate broadcast result dropped");
                    }
                    Err(e) => {
                        tracing::warn!(record_id = %id, %e, "broadcast result hit an illegal state");
                        self.fail(e.into());
                    }
                }
            }
        }

        match result {
            Ok(tx_hash) => {
                tracing::info!(%tx_hash, "payment broadcast confirmed");
                self.append_envelope(Envelope::Payment { tx_hash, value_wei });
            }
            Err(e) => {
                tracing::warn!(%e, "payment flow failed");
                self.fail(e.into());
            }
        }
    }

    // Sending.

    fn append_envelope(&mut self, envelope: Envelope) {
        let body = sofa::serialize(&envelope);
        if body.is_empty() {
            tracing::warn!("refusing to send an untyped envelope");
            return;
        }
        let transport = self.collaborators.transport.clone();
        let conversation_id = self.conversation_id.clone();
        let core = self.core_sender.clone();
        self.runtime.spawn(async move {
            if let Err(e) = transport.append(&conversation_id, body).await {
                let _ = core.send(EngineMsg::Internal(Box::new(InternalEvent::AppendFailed {
                    error: format!("{e:#}"),
                })));
            }
            // Success needs no event: the appended record comes back
            // through the change feed like any other mutation.
        });
    }

    // Bookkeeping.

    fn language(&self) -> String {
        self.config
            .language
            .clone()
            .unwrap_or_else(|| self.collaborators.identity.language())
    }

    fn position(&self, id: &RecordId) -> Option<usize> {
        self.state.messages.iter().position(|m| &m.id == id)
    }

    fn find(&self, id: &RecordId) -> Option<&Message> {
        self.position(id).map(|pos| &self.state.messages[pos])
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn emit(&mut self, update: ChatUpdate) {
        self.commit_state();
        let _ = self.update_sender.send(update);
    }

    fn commit_state(&self) {
        let snapshot = self.state.clone();
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot,
            Err(poison) => *poison.into_inner() = snapshot,
        }
    }

    fn fail(&mut self, error: EngineError) {
        tracing::warn!(%error, "operation failed");
        let rev = self.next_rev();
        self.emit(ChatUpdate::OperationFailed {
            rev,
            kind: error.kind(),
            error: error.to_string(),
        });
    }
}

async fn run_payment_pipeline(
    transactions: Arc<dyn TransactionClient>,
    params: TransactionParams,
) -> Result<String, PaymentError> {
    let unsigned = transactions
        .build_unsigned(&params)
        .await
        .map_err(|e| PaymentError::TransactionBuild(format!("{e:#}")))?;
    let signature = transactions
        .sign(&unsigned)
        .await
        .map_err(|e| PaymentError::Signing(format!("{e:#}")))?;
    transactions
        .broadcast(&unsigned, &signature)
        .await
        .map_err(|e| PaymentError::Broadcast(format!("{e:#}")))
}

/// Protocol auto-responses, kept pure for testability: a capability
/// request yields a response carrying the recognized keys; everything else
/// yields nothing.
pub(crate) fn auto_reply(
    envelope: &Envelope,
    payment_address: &str,
    language: &str,
) -> Option<Envelope> {
    let Envelope::CapabilityRequest { requested_keys } = envelope else {
        return None;
    };
    let mut values = std::collections::BTreeMap::new();
    for key in requested_keys {
        match key.as_str() {
            PAYMENT_ADDRESS_KEY => {
                values.insert(key.clone(), payment_address.to_string());
            }
            LANGUAGE_KEY => {
                values.insert(key.clone(), language.to_string());
            }
            _ => {}
        }
    }
    Some(Envelope::CapabilityResponse { values })
}

/// Set-difference by id, keeping only displayable messages, in list
/// (ascending timestamp) order. One result means the UI can animate an
/// incremental append; more means a full reload.
fn diff_newly_visible(previous: &BTreeSet<RecordId>, current: &[Message]) -> Vec<Message> {
    current
        .iter()
        .filter(|m| m.is_displayable && !previous.contains(&m.id))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default)]
struct ChatConfig {
    disable_auto_greeting: Option<bool>,
    language: Option<String>,
}

fn load_chat_config(data_dir: &str) -> ChatConfig {
    let path = Path::new(data_dir).join("sofa_config.json");
    let Ok(bytes) = std::fs::read(&path) else {
        return ChatConfig::default();
    };

    let Ok(v) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return ChatConfig::default();
    };
    let Some(obj) = v.as_object() else {
        return ChatConfig::default();
    };

    ChatConfig {
        disable_auto_greeting: obj.get("disable_auto_greeting").and_then(|v| v.as_bool()),
        language: obj
            .get("language")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    }
}
