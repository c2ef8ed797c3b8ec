//! Conversation Session State Machine
//!
//! `Session` owns one conversation's state, store and outgoing draft. It performs
//! no I/O: channel events and host commands go in, [`Effect`]s come out, and a
//! runtime executes them (open or close the channel, transmit a frame, arm a
//! reconnect timer, publish a notice).
//!
//! Handshake: `Connecting` → (channel open, `auth` sent) → `Authenticating` →
//! (server `auth` ack, `fetch` sent) → `Ready`. History replaces the store once
//! per connection; live messages that overtake it are queued and appended after.

use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::errors::Result;
use crate::message::{Message, MessageId, MessageKind};
use crate::protocol::{AuthStatus, ClientEvent, ServerEvent, UpdateAction};
use crate::reconnect::ReconnectPolicy;
use crate::state::{
    AuthenticatingState, CloseReason, ClosedState, ConnectingState, ConnectionState, FailedState,
    HistoryPhase, ReadyState, SessionState,
};
use crate::store::MessageStore;
use crate::types::{
    ConversationId, Credential, Generation, GenerationCounter, SystemTimeSource, TimeSource,
    Timestamp,
};

// ----------------------------------------------------------------------------
// Inputs and Outputs
// ----------------------------------------------------------------------------

/// What a transport channel reports, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Connection established
    Opened,
    /// One inbound text frame
    Frame(String),
    /// Peer closed the connection or it dropped mid-session
    Closed { reason: Option<String> },
    /// Connection could not be established or broke with an error
    Failed { reason: String },
}

impl ChannelEvent {
    fn name(&self) -> &'static str {
        match self {
            ChannelEvent::Opened => "Opened",
            ChannelEvent::Frame(_) => "Frame",
            ChannelEvent::Closed { .. } => "Closed",
            ChannelEvent::Failed { .. } => "Failed",
        }
    }
}

/// Side effects requested by the session
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a channel tagged with `generation`
    OpenChannel { generation: Generation, attempt: u32 },
    /// Send one event on the current channel
    Transmit(ClientEvent),
    /// Release the current channel, if any
    CloseChannel,
    /// Call [`Session::reconnect_due`] after `delay`
    ScheduleReconnect { attempt: u32, delay: Duration },
    /// Drop any armed reconnect timer
    CancelReconnect,
    /// Tell the host something happened
    Notify(SessionNotice),
}

/// Host-facing notifications
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Channel open but no credential to authenticate with
    CredentialMissing,
    AuthRejected,
    HistoryLoaded { count: usize, has_more: bool },
    MessageAppended { index: usize },
    LocalEchoConfirmed { index: usize },
    DuplicateDropped { id: MessageId },
    UpdateAcknowledged { status: Option<String> },
    ServerError { reason: String },
    FrameDropped { reason: String },
    ConnectionLost {
        reason: String,
        retry_in: Option<Duration>,
    },
}

/// Audit trail entry for one processed input
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub generation: Option<Generation>,
    pub from_state: ConnectionState,
    pub to_state: ConnectionState,
    pub event: String,
    /// False when the input did not apply to the state it arrived in
    pub accepted: bool,
    pub effects_count: usize,
}

/// Result of feeding one input to the session
#[derive(Debug, Clone, Default)]
pub struct Step {
    pub effects: Vec<Effect>,
    pub audit: Option<AuditEntry>,
}

impl Step {
    /// Events this step asks to transmit, in order
    pub fn transmitted(&self) -> impl Iterator<Item = &ClientEvent> {
        self.effects.iter().filter_map(|effect| match effect {
            Effect::Transmit(event) => Some(event),
            _ => None,
        })
    }

    /// Notices this step publishes, in order
    pub fn notices(&self) -> impl Iterator<Item = &SessionNotice> {
        self.effects.iter().filter_map(|effect| match effect {
            Effect::Notify(notice) => Some(notice),
            _ => None,
        })
    }
}

/// Why an outgoing request was not transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Empty or whitespace-only content
    EmptyContent,
    /// No open channel (connecting, failed or closed)
    ChannelUnavailable,
    /// Channel open but handshake incomplete and `require_ready_for_send` set
    NotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Transmitted,
    Skipped(SkipReason),
}

/// Result of a host send request
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub outcome: SendOutcome,
    pub effects: Vec<Effect>,
}

impl Outgoing {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            outcome: SendOutcome::Skipped(reason),
            effects: Vec::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// One conversation's session controller
pub struct Session {
    session_id: Uuid,
    conversation: ConversationId,
    credential: Option<Credential>,
    generations: GenerationCounter,
    state: SessionState,
    store: MessageStore,
    config: SessionConfig,
    reconnect: Box<dyn ReconnectPolicy>,
    time: Box<dyn TimeSource>,
    audit: VecDeque<AuditEntry>,
    draft: String,
    /// Consecutive losses since the last time `Ready` was reached
    losses: u32,
    started: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("conversation", &self.conversation)
            .field("state", &self.state.state_name())
            .field("messages", &self.store.len())
            .finish()
    }
}

impl Session {
    /// Create a session in `Connecting`; call [`Session::start`] to open the channel
    pub fn new(
        conversation: ConversationId,
        credential: Option<Credential>,
        config: SessionConfig,
        generations: GenerationCounter,
    ) -> Result<Self> {
        config.validate()?;
        let time: Box<dyn TimeSource> = Box::new(SystemTimeSource);
        let generation = generations.next();

        Ok(Self {
            session_id: Uuid::new_v4(),
            conversation,
            credential,
            state: SessionState::Connecting(ConnectingState {
                generation,
                attempt: 0,
                started: time.now(),
            }),
            store: MessageStore::with_dedup(config.dedup_by_id),
            reconnect: config.reconnect.build(),
            config,
            generations,
            time,
            audit: VecDeque::new(),
            draft: String::new(),
            losses: 0,
            started: false,
        })
    }

    /// Replace the reconnect policy derived from the configuration
    pub fn with_reconnect_policy(mut self, policy: Box<dyn ReconnectPolicy>) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_time_source(mut self, time: Box<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.connection_state()
    }

    /// Generation of the channel events are currently accepted from
    pub fn current_generation(&self) -> Option<Generation> {
        self.state.generation()
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    pub fn audit_trail(&self) -> impl Iterator<Item = &AuditEntry> {
        self.audit.iter()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Request the initial channel; only the first call has an effect
    pub fn start(&mut self) -> Step {
        let from = self.connection_state();
        let effects = match (&self.state, self.started) {
            (SessionState::Connecting(state), false) => {
                self.started = true;
                info!(
                    conversation = %self.conversation,
                    generation = %state.generation,
                    "Opening conversation channel"
                );
                vec![Effect::OpenChannel {
                    generation: state.generation,
                    attempt: state.attempt,
                }]
            }
            _ => return Step::default(),
        };
        self.record(from, "Start".to_string(), true, effects)
    }

    /// Feed one event from the channel tagged `generation`
    pub fn on_channel_event(&mut self, generation: Generation, event: ChannelEvent) -> Step {
        let from = self.connection_state();
        let event_name = event.name().to_string();

        if self.state.generation() != Some(generation) {
            debug!(
                conversation = %self.conversation,
                %generation,
                state = self.state.state_name(),
                event = %event_name,
                "Discarding event from stale channel"
            );
            return self.record(from, event_name, false, Vec::new());
        }

        let (accepted, effects) = match event {
            ChannelEvent::Opened => self.on_opened(),
            ChannelEvent::Frame(text) => (true, self.on_frame(&text)),
            ChannelEvent::Closed { reason } => (
                true,
                self.on_channel_lost(reason.unwrap_or_else(|| "closed by server".to_string())),
            ),
            ChannelEvent::Failed { reason } => (true, self.on_channel_lost(reason)),
        };

        self.record(from, event_name, accepted, effects)
    }

    /// Supply a credential when none was available at creation
    ///
    /// A session that is stalled in `Authenticating` sends `auth` immediately. A
    /// credential given at creation is never replaced.
    pub fn provide_credential(&mut self, credential: Credential) -> Step {
        if self.credential.is_some() {
            debug!(conversation = %self.conversation, "Credential already present; ignoring");
            return Step::default();
        }
        self.credential = Some(credential);

        let from = self.connection_state();
        let waiting = matches!(
            self.state,
            SessionState::Authenticating(AuthenticatingState {
                auth_sent: false,
                ..
            })
        );
        if !waiting {
            return Step::default();
        }
        let effects = self.send_auth();
        self.record(from, "CredentialProvided".to_string(), true, effects)
    }

    /// Timer armed by [`Effect::ScheduleReconnect`] fired
    pub fn reconnect_due(&mut self) -> Step {
        let from = self.connection_state();
        let attempt = match &self.state {
            SessionState::Failed(FailedState {
                retry: Some(attempt),
                ..
            }) => *attempt,
            _ => return self.record(from, "ReconnectDue".to_string(), false, Vec::new()),
        };

        let generation = self.generations.next();
        info!(
            conversation = %self.conversation,
            attempt,
            %generation,
            "Reconnecting conversation channel"
        );
        self.state = SessionState::Connecting(ConnectingState {
            generation,
            attempt,
            started: self.time.now(),
        });
        let effects = vec![Effect::OpenChannel {
            generation,
            attempt,
        }];
        self.record(from, "ReconnectDue".to_string(), true, effects)
    }

    /// Close the session; repeated calls are no-ops
    pub fn teardown(&mut self, reason: CloseReason) -> Step {
        let from = self.connection_state();
        if self.state.is_terminal() {
            return Step::default();
        }

        info!(conversation = %self.conversation, ?reason, "Tearing down session");
        self.store.clear();
        self.draft.clear();
        self.state = SessionState::Closed(ClosedState {
            at: self.time.now(),
            reason,
        });
        let effects = vec![Effect::CancelReconnect, Effect::CloseChannel];
        self.record(from, format!("Teardown({:?})", reason), true, effects)
    }

    // ------------------------------------------------------------------------
    // Outgoing
    // ------------------------------------------------------------------------

    /// Send a text message
    pub fn send_message(&mut self, content: &str) -> Outgoing {
        self.send_kind(MessageKind::Text, content)
    }

    /// Send a message of any kind
    ///
    /// Nothing is appended to the store unless `local_echo` is enabled; the
    /// message otherwise shows up once the server echoes it back.
    pub fn send_kind(&mut self, kind: MessageKind, content: &str) -> Outgoing {
        if let Some(reason) = self.check_send(content) {
            return Outgoing::skipped(reason);
        }

        let mut effects = vec![Effect::Transmit(ClientEvent::Message {
            content: content.to_string(),
            kind,
        })];
        if self.config.local_echo {
            self.store.push_local(Message::local(kind, content));
            effects.push(Effect::Notify(SessionNotice::MessageAppended {
                index: self.store.len() - 1,
            }));
        }

        Outgoing {
            outcome: SendOutcome::Transmitted,
            effects,
        }
    }

    /// Send the current draft as a text message, clearing it once transmitted
    pub fn submit_draft(&mut self) -> Outgoing {
        let content = self.draft.clone();
        let outgoing = self.send_message(&content);
        if outgoing.outcome == SendOutcome::Transmitted {
            self.draft.clear();
        }
        outgoing
    }

    /// Ask the server to sign the document with `document_id`
    pub fn sign_document(&mut self, document_id: &str) -> Outgoing {
        if let Some(reason) = self.check_send(document_id) {
            return Outgoing::skipped(reason);
        }
        Outgoing {
            outcome: SendOutcome::Transmitted,
            effects: vec![Effect::Transmit(ClientEvent::Update {
                action: UpdateAction::Sign,
                content: document_id.trim().to_string(),
            })],
        }
    }

    fn check_send(&self, content: &str) -> Option<SkipReason> {
        if content.trim().is_empty() {
            return Some(SkipReason::EmptyContent);
        }
        if !self.state.channel_open() {
            debug!(
                conversation = %self.conversation,
                state = self.state.state_name(),
                "Dropping send without an open channel"
            );
            return Some(SkipReason::ChannelUnavailable);
        }
        if self.config.require_ready_for_send && !self.state.is_ready() {
            return Some(SkipReason::NotReady);
        }
        None
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn on_opened(&mut self) -> (bool, Vec<Effect>) {
        let generation = match &self.state {
            SessionState::Connecting(state) => state.generation,
            other => {
                warn!(state = other.state_name(), "Channel reported open twice");
                return (false, Vec::new());
            }
        };

        self.state = SessionState::Authenticating(AuthenticatingState {
            generation,
            since: self.time.now(),
            auth_sent: false,
        });
        (true, self.send_auth())
    }

    fn send_auth(&mut self) -> Vec<Effect> {
        let token = match &self.credential {
            Some(credential) => credential.token().to_string(),
            None => {
                warn!(
                    conversation = %self.conversation,
                    "No credential available; waiting in Authenticating"
                );
                return vec![Effect::Notify(SessionNotice::CredentialMissing)];
            }
        };

        if let SessionState::Authenticating(state) = &mut self.state {
            state.auth_sent = true;
        }
        vec![Effect::Transmit(ClientEvent::Auth { token })]
    }

    fn on_frame(&mut self, text: &str) -> Vec<Effect> {
        match ServerEvent::parse(text) {
            Ok(event) => {
                debug!(
                    conversation = %self.conversation,
                    event = event.kind(),
                    "Inbound event"
                );
                self.on_server_event(event)
            }
            Err(err) => {
                warn!(conversation = %self.conversation, error = %err, "Dropping malformed frame");
                vec![Effect::Notify(SessionNotice::FrameDropped {
                    reason: err.to_string(),
                })]
            }
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) -> Vec<Effect> {
        match event {
            ServerEvent::Auth { status } => self.on_auth(status),
            ServerEvent::Fetch { messages, has_more } => self.on_history(messages, has_more),
            ServerEvent::Message(message) => self.on_live(message),
            ServerEvent::Update { status } => {
                vec![Effect::Notify(SessionNotice::UpdateAcknowledged { status })]
            }
            ServerEvent::Error { reason } => {
                warn!(conversation = %self.conversation, %reason, "Server reported an error");
                vec![Effect::Notify(SessionNotice::ServerError { reason })]
            }
        }
    }

    fn on_auth(&mut self, status: AuthStatus) -> Vec<Effect> {
        let generation = match &self.state {
            SessionState::Authenticating(state) => state.generation,
            other => {
                debug!(state = other.state_name(), "Ignoring auth acknowledgement");
                return Vec::new();
            }
        };

        match status {
            AuthStatus::Ok => {
                self.losses = 0;
                let request = self.config.fetch_request();
                self.state = SessionState::Ready(ReadyState {
                    generation,
                    since: self.time.now(),
                    history: HistoryPhase::Pending {
                        queued: Vec::new(),
                        newest_first: request.newest_first(),
                    },
                });
                vec![Effect::Transmit(ClientEvent::Fetch(request))]
            }
            AuthStatus::Failed => {
                warn!(conversation = %self.conversation, "Server rejected the credential");
                self.state = SessionState::Failed(FailedState {
                    at: self.time.now(),
                    reason: "authentication rejected".to_string(),
                    retry: None,
                });
                vec![
                    Effect::CloseChannel,
                    Effect::Notify(SessionNotice::AuthRejected),
                ]
            }
        }
    }

    fn on_history(&mut self, mut messages: Vec<Message>, has_more: bool) -> Vec<Effect> {
        let (queued, newest_first) = match &mut self.state {
            SessionState::Ready(ReadyState { history, .. }) => {
                match std::mem::replace(history, HistoryPhase::Loaded) {
                    HistoryPhase::Pending {
                        queued,
                        newest_first,
                    } => (queued, newest_first),
                    HistoryPhase::Loaded => {
                        debug!("Ignoring unsolicited history frame");
                        return Vec::new();
                    }
                }
            }
            other => {
                debug!(state = other.state_name(), "Ignoring history before Ready");
                return Vec::new();
            }
        };

        // Store order is oldest-first.
        if newest_first {
            messages.reverse();
        }
        self.store.replace_all(messages, has_more);

        let mut effects = vec![Effect::Notify(SessionNotice::HistoryLoaded {
            count: self.store.len(),
            has_more,
        })];
        for message in queued {
            effects.extend(self.append_live(message));
        }
        effects
    }

    fn on_live(&mut self, message: Message) -> Vec<Effect> {
        if !self.state.is_ready() {
            debug!(
                state = self.state.state_name(),
                "Ignoring live message before Ready"
            );
            return Vec::new();
        }

        if let SessionState::Ready(ReadyState {
            history: HistoryPhase::Pending { queued, .. },
            ..
        }) = &mut self.state
        {
            queued.push(message);
            return Vec::new();
        }

        self.append_live(message)
    }

    fn append_live(&mut self, message: Message) -> Vec<Effect> {
        let message = if self.config.local_echo {
            match self.store.reconcile_local(message) {
                Ok(index) => {
                    return vec![Effect::Notify(SessionNotice::LocalEchoConfirmed { index })]
                }
                Err(message) => message,
            }
        } else {
            message
        };

        let id = message.id.clone();
        if self.store.append(message) {
            vec![Effect::Notify(SessionNotice::MessageAppended {
                index: self.store.len() - 1,
            })]
        } else {
            match id {
                Some(id) => vec![Effect::Notify(SessionNotice::DuplicateDropped { id })],
                None => Vec::new(),
            }
        }
    }

    fn on_channel_lost(&mut self, reason: String) -> Vec<Effect> {
        self.losses += 1;
        let delay = self.reconnect.next_delay(self.losses);

        warn!(
            conversation = %self.conversation,
            %reason,
            retry_in = ?delay,
            "Conversation channel lost"
        );

        self.state = SessionState::Failed(FailedState {
            at: self.time.now(),
            reason: reason.clone(),
            retry: delay.map(|_| self.losses),
        });

        let mut effects = vec![
            Effect::CloseChannel,
            Effect::Notify(SessionNotice::ConnectionLost {
                reason,
                retry_in: delay,
            }),
        ];
        if let Some(delay) = delay {
            effects.push(Effect::ScheduleReconnect {
                attempt: self.losses,
                delay,
            });
        }
        effects
    }

    fn record(
        &mut self,
        from: ConnectionState,
        event: String,
        accepted: bool,
        mut effects: Vec<Effect>,
    ) -> Step {
        let to = self.connection_state();
        if from != to {
            effects.insert(0, Effect::Notify(SessionNotice::StateChanged { from, to }));
        }

        let entry = AuditEntry {
            timestamp: self.time.now(),
            generation: self.state.generation(),
            from_state: from,
            to_state: to,
            event,
            accepted,
            effects_count: effects.len(),
        };
        self.audit.push_back(entry.clone());
        while self.audit.len() > self.config.max_audit_entries {
            self.audit.pop_front();
        }

        Step {
            effects,
            audit: Some(entry),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
