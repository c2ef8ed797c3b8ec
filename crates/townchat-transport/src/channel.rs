//! Conversation channels
//!
//! A channel is one connection to the chat endpoint. [`ChannelHandle::open`]
//! spawns a pump task that connects through a [`Connector`], forwards inbound
//! frames to the controller as [`TaggedEvent`]s and writes outgoing frames in
//! the order they were queued. The pump never retries; a failed connection is
//! reported once and the task ends.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use townchat_core::{ChannelEvent, ClientEvent, Generation};

use crate::error::TransportResult;

// ----------------------------------------------------------------------------
// Connector Seam
// ----------------------------------------------------------------------------

/// What a connection yields when read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(String),
    /// Orderly close, with the peer's reason if it gave one
    Closed(Option<String>),
}

/// Establishes connections to an endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Url) -> TransportResult<Box<dyn Connection>>;
}

/// One established, bidirectional text connection
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: String) -> TransportResult<()>;

    /// Next inbound frame or close; must be cancel safe
    async fn recv(&mut self) -> TransportResult<Inbound>;

    async fn close(&mut self);
}

// ----------------------------------------------------------------------------
// Tagged Events
// ----------------------------------------------------------------------------

/// A channel event stamped with the generation of the channel that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub generation: Generation,
    pub event: ChannelEvent,
}

pub type EventSender = mpsc::UnboundedSender<TaggedEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TaggedEvent>;

enum ChannelCommand {
    Send(String),
    Close,
}

// ----------------------------------------------------------------------------
// Channel Handle
// ----------------------------------------------------------------------------

/// Owner side of an open (or opening) channel
///
/// Dropping the handle closes the channel.
#[derive(Debug)]
pub struct ChannelHandle {
    generation: Generation,
    commands: Option<mpsc::UnboundedSender<ChannelCommand>>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    /// Start connecting to `endpoint`; outcome arrives on `events`
    pub fn open(
        connector: Arc<dyn Connector>,
        endpoint: Url,
        generation: Generation,
        events: EventSender,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_channel(
            connector, endpoint, generation, events, command_rx,
        ));

        Self {
            generation,
            commands: Some(commands),
            task,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Queue one event for transmission
    ///
    /// Sending on a closed channel is a no-op.
    pub fn send(&self, event: &ClientEvent) -> TransportResult<()> {
        let frame = event.to_frame()?;
        match &self.commands {
            Some(commands) if commands.send(ChannelCommand::Send(frame)).is_ok() => Ok(()),
            _ => {
                debug!(generation = %self.generation, event = event.kind(), "Dropping send on closed channel");
                Ok(())
            }
        }
    }

    /// Close the channel; repeated calls are no-ops
    pub fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(ChannelCommand::Close);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_none() || self.task.is_finished()
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------------
// Channel Pump
// ----------------------------------------------------------------------------

async fn run_channel(
    connector: Arc<dyn Connector>,
    endpoint: Url,
    generation: Generation,
    events: EventSender,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
) {
    let emit = |event: ChannelEvent| {
        let _ = events.send(TaggedEvent { generation, event });
    };

    debug!(%generation, %endpoint, "Connecting channel");
    let mut pending = Vec::new();
    let mut connect = connector.connect(&endpoint);

    let mut connection = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(connection) => break connection,
                Err(err) => {
                    warn!(%generation, %endpoint, error = %err, "Channel failed to connect");
                    emit(ChannelEvent::Failed { reason: err.to_string() });
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(ChannelCommand::Send(frame)) => pending.push(frame),
                Some(ChannelCommand::Close) | None => {
                    debug!(%generation, "Channel closed while connecting");
                    return;
                }
            },
        }
    };
    drop(connect);

    emit(ChannelEvent::Opened);
    for frame in pending {
        if let Err(err) = connection.send(frame).await {
            emit(ChannelEvent::Failed { reason: err.to_string() });
            return;
        }
    }

    loop {
        tokio::select! {
            inbound = connection.recv() => match inbound {
                Ok(Inbound::Frame(text)) => {
                    trace!(%generation, bytes = text.len(), "Inbound frame");
                    emit(ChannelEvent::Frame(text));
                }
                Ok(Inbound::Closed(reason)) => {
                    debug!(%generation, ?reason, "Channel closed by peer");
                    emit(ChannelEvent::Closed { reason });
                    return;
                }
                Err(err) => {
                    warn!(%generation, error = %err, "Channel read failed");
                    emit(ChannelEvent::Failed { reason: err.to_string() });
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(ChannelCommand::Send(frame)) => {
                    if let Err(err) = connection.send(frame).await {
                        warn!(%generation, error = %err, "Channel write failed");
                        emit(ChannelEvent::Failed { reason: err.to_string() });
                        return;
                    }
                }
                Some(ChannelCommand::Close) | None => {
                    debug!(%generation, "Closing channel");
                    connection.close().await;
                    return;
                }
            },
        }
    }
}
