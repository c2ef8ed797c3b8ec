//! townchat CLI library
//!
//! Terminal front end for townchat conversation sessions.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;

pub use app::{format_message, ChatApp, ViewRenderer};
pub use cli::{Cli, Commands};
pub use config::CliAppConfig;
pub use error::{CliError, Result};
