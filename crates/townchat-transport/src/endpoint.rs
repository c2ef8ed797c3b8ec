//! Endpoint addressing
//!
//! The chat endpoint is derived from the platform's HTTP base URL: `http`
//! becomes `ws`, `https` becomes `wss`, and the conversation id is placed into
//! a path template. The credential never appears in the URL.

use serde::{Deserialize, Serialize};
use url::Url;

use townchat_core::ConversationId;

use crate::error::{TransportError, TransportResult};

pub const CONVERSATION_PLACEHOLDER: &str = "{conversation}";
pub const DEFAULT_PATH_TEMPLATE: &str = "/town/ws/chat/{conversation}/";

/// Serializable endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Platform base URL (`http`, `https`, `ws` or `wss`)
    pub base_url: String,
    pub path_template: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            path_template: DEFAULT_PATH_TEMPLATE.to_string(),
        }
    }
}

/// Resolves conversation ids to channel URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTemplate {
    base: Url,
    path_template: String,
}

impl EndpointTemplate {
    /// Template with the default path for `base_url`
    pub fn new(base_url: &str) -> TransportResult<Self> {
        let mut base = Url::parse(base_url)?;
        let scheme = match base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(TransportError::UnsupportedScheme {
                    scheme: other.to_string(),
                })
            }
        };
        base.set_scheme(scheme)
            .map_err(|_| TransportError::UnsupportedScheme {
                scheme: base.scheme().to_string(),
            })?;
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self {
            base,
            path_template: DEFAULT_PATH_TEMPLATE.to_string(),
        })
    }

    pub fn from_config(config: &EndpointConfig) -> TransportResult<Self> {
        Self::new(&config.base_url)?.with_path_template(&config.path_template)
    }

    /// Replace the path template; it must contain `{conversation}` exactly once
    pub fn with_path_template(mut self, template: &str) -> TransportResult<Self> {
        let occurrences = template.matches(CONVERSATION_PLACEHOLDER).count();
        if occurrences != 1 {
            return Err(TransportError::InvalidTemplate {
                template: template.to_string(),
                reason: format!(
                    "expected exactly one {} placeholder, found {}",
                    CONVERSATION_PLACEHOLDER, occurrences
                ),
            });
        }
        self.path_template = template.to_string();
        Ok(self)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Channel URL for `conversation`
    pub fn resolve(&self, conversation: &ConversationId) -> TransportResult<Url> {
        let mut url = self.base.clone();
        {
            let mut segments =
                url.path_segments_mut()
                    .map_err(|_| TransportError::InvalidTemplate {
                        template: self.path_template.clone(),
                        reason: format!("base URL {} cannot carry a path", self.base),
                    })?;
            segments.pop_if_empty();
            for segment in self.path_template.trim_start_matches('/').split('/') {
                if segment == CONVERSATION_PLACEHOLDER {
                    segments.push(conversation.as_str());
                } else {
                    segments.push(segment);
                }
            }
        }
        Ok(url)
    }
}
