//! Session controller task
//!
//! Each conversation runs as one tokio task that owns the [`Session`], its
//! current channel and the reconnect timer. Channel events, host commands and
//! timer expiry are multiplexed with `select!` in that task, so the session and
//! its store are never shared. Hosts talk to the task through a cloneable
//! [`SessionHandle`], observe it through a `watch` view and a `broadcast`
//! notice stream.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use townchat_core::{
    CloseReason, ConnectionState, ConversationId, Credential, Effect, Generation, Message,
    MessageKind, SendOutcome, Session, SessionNotice, SkipReason,
};

use crate::channel::{ChannelHandle, Connector, EventReceiver, EventSender};
use crate::error::{TransportError, TransportResult};

// ----------------------------------------------------------------------------
// View
// ----------------------------------------------------------------------------

/// Snapshot of a session for rendering
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub session_id: Uuid,
    pub conversation: ConversationId,
    pub connection_state: ConnectionState,
    pub generation: Option<Generation>,
    pub messages: Vec<Message>,
    pub history_loaded: bool,
    pub has_more: bool,
    pub draft: String,
    /// Failed, but a reconnect is scheduled
    pub reconnecting: bool,
}

impl SessionView {
    fn capture(session: &Session) -> Self {
        Self {
            session_id: session.session_id(),
            conversation: session.conversation().clone(),
            connection_state: session.connection_state(),
            generation: session.current_generation(),
            messages: session.messages().to_vec(),
            history_loaded: session.state().history_loaded(),
            has_more: session.store().has_more(),
            draft: session.draft().to_string(),
            reconnecting: session.state().retry_pending(),
        }
    }
}

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) enum SessionCommand {
    Send {
        kind: MessageKind,
        content: String,
        reply: oneshot::Sender<SendOutcome>,
    },
    SetDraft(String),
    SubmitDraft {
        reply: oneshot::Sender<SendOutcome>,
    },
    SignDocument {
        document_id: String,
        reply: oneshot::Sender<SendOutcome>,
    },
    ProvideCredential(Credential),
    Close {
        reason: CloseReason,
        done: oneshot::Sender<()>,
    },
}

// ----------------------------------------------------------------------------
// Controller Task
// ----------------------------------------------------------------------------

pub(crate) struct SessionController {
    session: Session,
    connector: Arc<dyn Connector>,
    endpoint: Url,
    channel: Option<ChannelHandle>,
    events_tx: EventSender,
    events_rx: EventReceiver,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    view: watch::Sender<SessionView>,
    notices: broadcast::Sender<SessionNotice>,
    reconnect_at: Option<Instant>,
}

impl SessionController {
    /// Build the task state and the handle that drives it
    pub(crate) fn new(
        session: Session,
        connector: Arc<dyn Connector>,
        endpoint: Url,
        notice_capacity: usize,
    ) -> (Self, SessionHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (view, view_rx) = watch::channel(SessionView::capture(&session));
        let (notices, _) = broadcast::channel(notice_capacity.max(1));

        let handle = SessionHandle {
            session_id: session.session_id(),
            conversation: session.conversation().clone(),
            commands: command_tx,
            view: view_rx,
            notices: notices.clone(),
        };

        let controller = Self {
            session,
            connector,
            endpoint,
            channel: None,
            events_tx,
            events_rx,
            commands,
            view,
            notices,
            reconnect_at: None,
        };
        (controller, handle)
    }

    pub(crate) async fn run(mut self) {
        info!(
            session_id = %self.session.session_id(),
            conversation = %self.session.conversation(),
            endpoint = %self.endpoint,
            "Session task starting"
        );

        let step = self.session.start();
        self.apply(step.effects);
        self.publish();

        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                Some(tagged) = self.events_rx.recv() => {
                    let step = self.session.on_channel_event(tagged.generation, tagged.event);
                    self.apply(step.effects);
                }

                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        debug!("All session handles dropped");
                        let step = self.session.teardown(CloseReason::Teardown);
                        self.apply(step.effects);
                        break;
                    }
                },

                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    let step = self.session.reconnect_due();
                    self.apply(step.effects);
                }
            }
            self.publish();
        }

        self.publish();
        info!(
            session_id = %self.session.session_id(),
            conversation = %self.session.conversation(),
            "Session task stopped"
        );
    }

    /// Returns false once the session is closed
    fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Send {
                kind,
                content,
                reply,
            } => {
                let outgoing = self.session.send_kind(kind, &content);
                self.apply(outgoing.effects);
                let _ = reply.send(outgoing.outcome);
            }
            SessionCommand::SetDraft(draft) => self.session.set_draft(draft),
            SessionCommand::SubmitDraft { reply } => {
                let outgoing = self.session.submit_draft();
                self.apply(outgoing.effects);
                let _ = reply.send(outgoing.outcome);
            }
            SessionCommand::SignDocument { document_id, reply } => {
                let outgoing = self.session.sign_document(&document_id);
                self.apply(outgoing.effects);
                let _ = reply.send(outgoing.outcome);
            }
            SessionCommand::ProvideCredential(credential) => {
                let step = self.session.provide_credential(credential);
                self.apply(step.effects);
            }
            SessionCommand::Close { reason, done } => {
                let step = self.session.teardown(reason);
                self.apply(step.effects);
                self.publish();
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::OpenChannel {
                    generation,
                    attempt,
                } => {
                    self.close_channel();
                    debug!(%generation, attempt, "Opening channel");
                    self.channel = Some(ChannelHandle::open(
                        self.connector.clone(),
                        self.endpoint.clone(),
                        generation,
                        self.events_tx.clone(),
                    ));
                }
                Effect::Transmit(event) => match &self.channel {
                    Some(channel) => {
                        if let Err(err) = channel.send(&event) {
                            warn!(event = event.kind(), error = %err, "Failed to queue outgoing event");
                        }
                    }
                    None => debug!(event = event.kind(), "No channel to transmit on"),
                },
                Effect::CloseChannel => self.close_channel(),
                Effect::ScheduleReconnect { attempt, delay } => {
                    info!(attempt, ?delay, "Reconnect scheduled");
                    self.reconnect_at = Some(Instant::now() + delay);
                }
                Effect::CancelReconnect => self.reconnect_at = None,
                Effect::Notify(notice) => {
                    // No subscribers is fine
                    let _ = self.notices.send(notice);
                }
            }
        }
    }

    fn close_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    fn publish(&self) {
        let view = SessionView::capture(&self.session);
        self.view.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

// ----------------------------------------------------------------------------
// Session Handle
// ----------------------------------------------------------------------------

/// Host-side handle to a running session
///
/// Cloning is cheap. The session ends on [`SessionHandle::close`] or once every
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    conversation: ConversationId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    view: watch::Receiver<SessionView>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Send a text message
    ///
    /// Sends that cannot be transmitted resolve to `Skipped`, never to an error,
    /// including after the session ended.
    pub async fn send_message(&self, content: impl Into<String>) -> SendOutcome {
        self.send_kind(MessageKind::Text, content).await
    }

    pub async fn send_kind(&self, kind: MessageKind, content: impl Into<String>) -> SendOutcome {
        let (reply, outcome) = oneshot::channel();
        self.request(
            SessionCommand::Send {
                kind,
                content: content.into(),
                reply,
            },
            outcome,
        )
        .await
    }

    pub fn set_draft(&self, draft: impl Into<String>) -> TransportResult<()> {
        self.commands
            .send(SessionCommand::SetDraft(draft.into()))
            .map_err(|_| TransportError::SessionStopped)
    }

    /// Send the current draft; it is cleared only if transmitted
    pub async fn submit_draft(&self) -> SendOutcome {
        let (reply, outcome) = oneshot::channel();
        self.request(SessionCommand::SubmitDraft { reply }, outcome)
            .await
    }

    pub async fn sign_document(&self, document_id: impl Into<String>) -> SendOutcome {
        let (reply, outcome) = oneshot::channel();
        self.request(
            SessionCommand::SignDocument {
                document_id: document_id.into(),
                reply,
            },
            outcome,
        )
        .await
    }

    /// Supply a credential to a session that started without one
    pub fn provide_credential(&self, credential: Credential) -> TransportResult<()> {
        self.commands
            .send(SessionCommand::ProvideCredential(credential))
            .map_err(|_| TransportError::SessionStopped)
    }

    /// Tear the session down and wait for the task to release its channel
    ///
    /// Closing an already closed session is a no-op.
    pub async fn close(&self, reason: CloseReason) {
        let (done, finished) = oneshot::channel();
        if self
            .commands
            .send(SessionCommand::Close { reason, done })
            .is_ok()
        {
            let _ = finished.await;
        }
    }

    pub async fn teardown(&self) {
        self.close(CloseReason::Teardown).await
    }

    /// Latest published view
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// False once the session was closed, failed for good or its task ended
    ///
    /// A session waiting out a reconnect delay still counts as running.
    pub fn is_running(&self) -> bool {
        if self.commands.is_closed() {
            return false;
        }
        let view = self.view.borrow();
        match view.connection_state {
            ConnectionState::Closed => false,
            ConnectionState::Failed => view.reconnecting,
            _ => true,
        }
    }

    /// Wait until the view satisfies `predicate`
    pub async fn wait_for<F>(&self, mut predicate: F) -> TransportResult<SessionView>
    where
        F: FnMut(&SessionView) -> bool,
    {
        let mut view = self.view.clone();
        loop {
            {
                let current = view.borrow_and_update();
                if predicate(&current) {
                    return Ok(current.clone());
                }
            }
            if view.changed().await.is_err() {
                let last = view.borrow().clone();
                return if predicate(&last) {
                    Ok(last)
                } else {
                    Err(TransportError::SessionStopped)
                };
            }
        }
    }

    pub async fn wait_for_state(&self, state: ConnectionState) -> TransportResult<SessionView> {
        self.wait_for(|view| view.connection_state == state).await
    }

    async fn request(
        &self,
        command: SessionCommand,
        outcome: oneshot::Receiver<SendOutcome>,
    ) -> SendOutcome {
        if self.commands.send(command).is_err() {
            return SendOutcome::Skipped(SkipReason::ChannelUnavailable);
        }
        outcome
            .await
            .unwrap_or(SendOutcome::Skipped(SkipReason::ChannelUnavailable))
    }
}
