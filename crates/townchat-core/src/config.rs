//! Session configuration
//!
//! Defaults match the plain web client: no local echo, no dedup, sends allowed
//! before authentication completes, no reconnect. Each switch opts into the
//! stricter variant.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::protocol::{FetchDirection, FetchRequest};
use crate::reconnect::{ExponentialBackoff, NoReconnect, ReconnectPolicy};

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Tunables for one conversation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Append sent messages to the store before the server echoes them
    pub local_echo: bool,
    /// Drop messages whose id the store already holds
    pub dedup_by_id: bool,
    /// Refuse to transmit messages until the handshake completed
    pub require_ready_for_send: bool,
    /// Page size for the history request; `None` lets the server decide
    pub history_page_size: Option<u32>,
    /// Direction of the history page; `None` lets the server decide
    pub history_direction: Option<FetchDirection>,
    /// Number of state transitions kept in the audit trail
    pub max_audit_entries: usize,
    /// Reconnection behaviour after an unexpected channel loss
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_echo: false,
            dedup_by_id: false,
            require_ready_for_send: false,
            history_page_size: None,
            history_direction: None,
            max_audit_entries: 256,
            reconnect: ReconnectConfig::Disabled,
        }
    }
}

impl SessionConfig {
    /// Check values that cannot be expressed in the types
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(0) = self.history_page_size {
            return Err(ConfigError::invalid(
                "history_page_size",
                "must be greater than zero when set",
            ));
        }
        if self.max_audit_entries == 0 {
            return Err(ConfigError::invalid(
                "max_audit_entries",
                "must be greater than zero",
            ));
        }
        self.reconnect.validate()
    }

    /// History request built from the paging settings
    pub fn fetch_request(&self) -> FetchRequest {
        FetchRequest {
            size: self.history_page_size,
            direction: self.history_direction,
            ..FetchRequest::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Reconnect Configuration
// ----------------------------------------------------------------------------

/// Serializable description of a [`ReconnectPolicy`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ReconnectConfig {
    /// Leave the session failed after a loss
    Disabled,
    /// Retry with exponentially growing delays
    Exponential {
        base_ms: u64,
        max_delay_ms: u64,
        max_retries: u32,
        #[serde(default)]
        jitter: f64,
    },
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig::Disabled
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ReconnectConfig::Disabled => Ok(()),
            ReconnectConfig::Exponential {
                base_ms,
                max_delay_ms,
                jitter,
                ..
            } => {
                if *base_ms == 0 {
                    return Err(ConfigError::invalid("reconnect.base_ms", "must be non-zero"));
                }
                if max_delay_ms < base_ms {
                    return Err(ConfigError::invalid(
                        "reconnect.max_delay_ms",
                        format!("must be at least base_ms ({})", base_ms),
                    ));
                }
                if !(0.0..=1.0).contains(jitter) {
                    return Err(ConfigError::invalid(
                        "reconnect.jitter",
                        "must lie between 0.0 and 1.0",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Build the policy this configuration describes
    pub fn build(&self) -> Box<dyn ReconnectPolicy> {
        match self {
            ReconnectConfig::Disabled => Box::new(NoReconnect),
            ReconnectConfig::Exponential {
                base_ms,
                max_delay_ms,
                max_retries,
                jitter,
            } => Box::new(
                ExponentialBackoff::new(
                    Duration::from_millis(*base_ms),
                    Duration::from_millis(*max_delay_ms),
                    *max_retries,
                )
                .with_jitter(*jitter),
            ),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
