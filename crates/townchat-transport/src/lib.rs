//! townchat Transport and Session Runtime
//!
//! Runs [`townchat_core::Session`] state machines against real connections:
//! per-generation channel pumps over WebSocket (or an in-memory network for
//! tests), the single-task session controller, and a host that switches
//! between conversations.

pub mod builder;
pub mod channel;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod host;
pub mod memory;
pub mod ws;

pub use builder::SessionBuilder;
pub use channel::{
    ChannelHandle, Connection, Connector, EventReceiver, EventSender, Inbound, TaggedEvent,
};
pub use controller::{SessionHandle, SessionView};
pub use endpoint::{EndpointConfig, EndpointTemplate, DEFAULT_PATH_TEMPLATE};
pub use error::{TransportError, TransportResult};
pub use host::ConversationHost;
pub use memory::{memory_network, MemoryConnector, MemoryServer, ServerConnection};
pub use ws::WsConnector;
