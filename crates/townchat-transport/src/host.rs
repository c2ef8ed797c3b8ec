//! Conversation host
//!
//! Owns at most one session at a time. Switching conversations tears the
//! current session down completely (channel released, store cleared) before
//! the next one is created, and every session draws its channel generations
//! from the host's shared counter.

use std::sync::Arc;
use tracing::info;

use townchat_core::{CloseReason, ConversationId, CredentialSource, GenerationCounter, SessionConfig};

use crate::builder::SessionBuilder;
use crate::channel::Connector;
use crate::controller::SessionHandle;
use crate::endpoint::EndpointTemplate;
use crate::error::TransportResult;
use crate::ws::WsConnector;

pub struct ConversationHost {
    endpoint: EndpointTemplate,
    credentials: Arc<dyn CredentialSource>,
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    generations: GenerationCounter,
    current: Option<SessionHandle>,
}

impl ConversationHost {
    pub fn new(endpoint: EndpointTemplate, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            endpoint,
            credentials,
            connector: Arc::new(WsConnector::new()),
            config: SessionConfig::default(),
            generations: GenerationCounter::new(),
            current: None,
        }
    }

    pub fn with_connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Session currently shown, if any
    pub fn current(&self) -> Option<&SessionHandle> {
        self.current.as_ref()
    }

    /// Show `conversation`, replacing whatever session was active
    ///
    /// Selecting the conversation that is already active and running returns
    /// its existing handle. A session that failed without a scheduled retry is
    /// replaced by a fresh one.
    pub async fn switch_to(&mut self, conversation: ConversationId) -> TransportResult<SessionHandle> {
        if let Some(current) = &self.current {
            if current.conversation() == &conversation && current.is_running() {
                return Ok(current.clone());
            }
        }

        if let Some(previous) = self.current.take() {
            info!(
                from = %previous.conversation(),
                to = %conversation,
                "Switching conversation"
            );
            previous.close(CloseReason::Switched).await;
        }

        let handle = SessionBuilder::new(conversation)
            .with_credential_source(self.credentials.as_ref())?
            .with_config(self.config.clone())
            .with_endpoint(self.endpoint.clone())
            .with_shared_connector(self.connector.clone())
            .with_generations(self.generations.clone())
            .spawn()?;

        self.current = Some(handle.clone());
        Ok(handle)
    }

    /// Tear down the active session, if any
    pub async fn close(&mut self) {
        if let Some(current) = self.current.take() {
            current.teardown().await;
        }
    }
}
