//! Session Builder API
//!
//! Builder-style construction of a running conversation session: pick the
//! conversation, credential, endpoint and connector, then spawn the controller
//! task and get a [`SessionHandle`] back.

use std::sync::Arc;
use tracing::info;

use townchat_core::{
    ConversationId, Credential, CredentialSource, GenerationCounter, ReconnectPolicy, Session,
    SessionConfig,
};

use crate::channel::Connector;
use crate::controller::{SessionController, SessionHandle};
use crate::endpoint::{EndpointConfig, EndpointTemplate};
use crate::error::{TransportError, TransportResult};
use crate::ws::WsConnector;

const DEFAULT_NOTICE_CAPACITY: usize = 256;

// ----------------------------------------------------------------------------
// Session Builder
// ----------------------------------------------------------------------------

/// Builder for one conversation session
pub struct SessionBuilder {
    conversation: ConversationId,
    credential: Option<Credential>,
    config: SessionConfig,
    endpoint: Option<EndpointTemplate>,
    connector: Arc<dyn Connector>,
    reconnect_policy: Option<Box<dyn ReconnectPolicy>>,
    generations: GenerationCounter,
    notice_capacity: usize,
}

impl SessionBuilder {
    /// Create a builder for `conversation` using the WebSocket connector
    pub fn new(conversation: ConversationId) -> Self {
        Self {
            conversation,
            credential: None,
            config: SessionConfig::default(),
            endpoint: None,
            connector: Arc::new(WsConnector::new()),
            reconnect_policy: None,
            generations: GenerationCounter::new(),
            notice_capacity: DEFAULT_NOTICE_CAPACITY,
        }
    }

    /// Set the access token presented during the handshake
    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    /// Read the access token from `source` now; later changes are not observed
    pub fn with_credential_source(mut self, source: &dyn CredentialSource) -> TransportResult<Self> {
        self.credential = source
            .access_token()
            .map_err(|err| TransportError::Session(err.into()))?;
        Ok(self)
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_endpoint(mut self, endpoint: EndpointTemplate) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Use a different connector (e.g. the in-memory one in tests)
    pub fn with_connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    pub fn with_shared_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Override the reconnect policy described by the configuration
    pub fn with_reconnect_policy(mut self, policy: Box<dyn ReconnectPolicy>) -> Self {
        self.reconnect_policy = Some(policy);
        self
    }

    /// Share a generation counter with other sessions of the same host
    pub fn with_generations(mut self, generations: GenerationCounter) -> Self {
        self.generations = generations;
        self
    }

    /// Set how many notices a slow subscriber may lag behind
    pub fn notice_capacity(mut self, capacity: usize) -> Self {
        self.notice_capacity = capacity;
        self
    }

    /// Spawn the session task; must be called within a tokio runtime
    pub fn spawn(self) -> TransportResult<SessionHandle> {
        let endpoint = match &self.endpoint {
            Some(template) => template.resolve(&self.conversation)?,
            None => EndpointTemplate::from_config(&EndpointConfig::default())?
                .resolve(&self.conversation)?,
        };

        let mut session = Session::new(
            self.conversation,
            self.credential,
            self.config,
            self.generations,
        )?;
        if let Some(policy) = self.reconnect_policy {
            session = session.with_reconnect_policy(policy);
        }

        info!(
            conversation = %session.conversation(),
            %endpoint,
            credential = session.has_credential(),
            "Spawning conversation session"
        );

        let (controller, handle) =
            SessionController::new(session, self.connector, endpoint, self.notice_capacity);
        tokio::spawn(controller.run());
        Ok(handle)
    }
}
