//! Terminal chat application
//!
//! Joins one conversation, prints the session view as it changes and sends
//! each stdin line as a message. Lines starting with `/` are commands.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use townchat_core::{
    ConnectionState, ConversationId, Generation, Message, SendOutcome, SessionNotice, SkipReason,
};
use townchat_transport::{SessionBuilder, SessionHandle, SessionView, TransportError};

use crate::config::CliAppConfig;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Application
// ----------------------------------------------------------------------------

pub struct ChatApp {
    config: CliAppConfig,
}

impl ChatApp {
    pub fn new(config: CliAppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CliAppConfig {
        &self.config
    }

    fn spawn_session(&self, conversation: &str) -> Result<SessionHandle> {
        let conversation = ConversationId::new(conversation)?;
        let credential = self.config.resolve_credential()?;
        if credential.is_none() {
            warn!("No access token configured; the server will not authenticate this session");
        }

        Ok(SessionBuilder::new(conversation)
            .with_credential(credential)
            .with_config(self.config.session.clone())
            .with_endpoint(self.config.endpoint()?)
            .spawn()?)
    }

    /// Interactive session over stdin/stdout until EOF, `/quit` or Ctrl-C
    pub async fn run_chat(&self, conversation: &str) -> Result<()> {
        let handle = self.spawn_session(conversation)?;
        let mut view = handle.subscribe_view();
        let mut notices = handle.subscribe_notices();
        let mut renderer = ViewRenderer::new(self.config.cli.show_timestamps);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        println!("Joining conversation {} (/help for commands)", handle.conversation());

        loop {
            tokio::select! {
                changed = view.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = view.borrow_and_update().clone();
                    for line in renderer.render(&current) {
                        println!("{}", line);
                    }
                }

                notice = notices.recv() => match notice {
                    Ok(notice) => {
                        if let Some(line) = describe_notice(&notice) {
                            println!("{}", line);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "Notice stream lagged"),
                    Err(RecvError::Closed) => break,
                },

                line = lines.next_line() => match line? {
                    Some(line) => {
                        if !self.handle_input(&handle, line.trim_end()).await {
                            break;
                        }
                    }
                    None => break,
                },

                _ = tokio::signal::ctrl_c() => break,
            }
        }

        info!("Leaving conversation");
        handle.teardown().await;
        Ok(())
    }

    /// Returns false when the user asked to quit
    async fn handle_input(&self, handle: &SessionHandle, line: &str) -> bool {
        match parse_input(line) {
            Input::Quit => return false,
            Input::Help => println!("{}", HELP),
            Input::Empty => {}
            Input::Sign(document_id) => {
                let outcome = handle.sign_document(document_id).await;
                report_outcome(outcome);
            }
            Input::Message(content) => {
                let outcome = handle.send_message(content).await;
                report_outcome(outcome);
            }
        }
        true
    }

    /// Print the conversation history once it arrives, then leave
    pub async fn run_history(&self, conversation: &str, json: bool, wait: Duration) -> Result<()> {
        let handle = self.spawn_session(conversation)?;

        let waited = tokio::time::timeout(
            wait,
            handle.wait_for(|view| {
                view.history_loaded || view.connection_state == ConnectionState::Failed
            }),
        )
        .await;

        let view = match waited {
            Ok(view) => view?,
            Err(_) => {
                handle.teardown().await;
                return Err(CliError::Timeout(format!(
                    "no history for {} within {:?}",
                    conversation, wait
                )));
            }
        };
        handle.teardown().await;

        if !view.history_loaded {
            return Err(TransportError::ConnectionClosed.into());
        }

        for message in &view.messages {
            if json {
                println!("{}", serde_json::to_string(message)?);
            } else {
                println!("{}", format_message(message, self.config.cli.show_timestamps));
            }
        }
        if view.has_more {
            println!("(older messages available)");
        }
        Ok(())
    }
}

const HELP: &str = "Commands:\n  /sign <document id>  sign a shared document\n  /quit                leave the conversation\n  /help                show this help";

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Quit,
    Help,
    Sign(&'a str),
    Message(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    match trimmed.split_once(' ') {
        Some(("/sign", rest)) => Input::Sign(rest.trim()),
        _ => match trimmed {
            "/quit" | "/exit" => Input::Quit,
            "/help" => Input::Help,
            _ => Input::Message(line),
        },
    }
}

fn report_outcome(outcome: SendOutcome) {
    match outcome {
        SendOutcome::Transmitted => {}
        SendOutcome::Skipped(SkipReason::EmptyContent) => {}
        SendOutcome::Skipped(SkipReason::ChannelUnavailable) => {
            println!("! not connected; message not sent")
        }
        SendOutcome::Skipped(SkipReason::NotReady) => {
            println!("! still authenticating; message not sent")
        }
    }
}

fn describe_notice(notice: &SessionNotice) -> Option<String> {
    match notice {
        SessionNotice::CredentialMissing => {
            Some("! no access token; waiting to authenticate".to_string())
        }
        SessionNotice::AuthRejected => Some("! access token rejected".to_string()),
        SessionNotice::ServerError { reason } => Some(format!("! server error: {}", reason)),
        SessionNotice::UpdateAcknowledged { status } => Some(format!(
            "* document update: {}",
            status.as_deref().unwrap_or("ok")
        )),
        SessionNotice::ConnectionLost { reason, retry_in } => Some(match retry_in {
            Some(delay) => format!("! connection lost ({}); retrying in {:?}", reason, delay),
            None => format!("! connection lost ({})", reason),
        }),
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Rendering
// ----------------------------------------------------------------------------

/// Turns successive views into the lines that still need printing
#[derive(Debug)]
pub struct ViewRenderer {
    show_timestamps: bool,
    state: Option<ConnectionState>,
    /// Generation whose history has been printed
    history_generation: Option<Generation>,
    printed: usize,
    /// Printed entries still shown as "(sending)"
    pending_echoes: Vec<usize>,
}

impl ViewRenderer {
    pub fn new(show_timestamps: bool) -> Self {
        Self {
            show_timestamps,
            state: None,
            history_generation: None,
            printed: 0,
            pending_echoes: Vec::new(),
        }
    }

    pub fn render(&mut self, view: &SessionView) -> Vec<String> {
        let mut lines = Vec::new();

        if self.state != Some(view.connection_state) {
            lines.push(format!("-- {} --", view.connection_state));
            self.state = Some(view.connection_state);
        }

        let fresh_history = view.history_loaded && self.history_generation != view.generation;
        if fresh_history {
            self.history_generation = view.generation;
            lines.push(format!("-- history ({} messages) --", view.messages.len()));
        }

        if fresh_history || view.messages.len() < self.printed {
            self.printed = 0;
            self.pending_echoes.clear();
        }

        let show_timestamps = self.show_timestamps;
        self.pending_echoes.retain(|&index| match view.messages.get(index) {
            Some(message) if !message.is_local() => {
                lines.push(format!("{} (sent)", format_message(message, show_timestamps)));
                false
            }
            Some(_) => true,
            None => false,
        });

        for (index, message) in view.messages.iter().enumerate().skip(self.printed) {
            if message.is_local() {
                self.pending_echoes.push(index);
            }
            lines.push(format_message(message, self.show_timestamps));
        }
        self.printed = view.messages.len();

        lines
    }
}

pub fn format_message(message: &Message, show_timestamps: bool) -> String {
    let author = if message.author_is_self {
        "me".to_string()
    } else {
        message.sender.clone().unwrap_or_else(|| "them".to_string())
    };

    let mut line = String::new();
    if show_timestamps {
        if let Some(created_at) = &message.created_at {
            line.push_str(&format!("[{}] ", created_at));
        }
    }
    line.push_str(&author);
    line.push_str(": ");
    if message.kind != townchat_core::MessageKind::Text {
        line.push_str(&format!("[{}] ", message.kind));
    }
    line.push_str(&message.content);
    if message.is_local() {
        line.push_str(" (sending)");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use townchat_core::{MessageId, MessageKind};

    fn view(
        state: ConnectionState,
        generation: u64,
        history_loaded: bool,
        messages: Vec<Message>,
    ) -> SessionView {
        SessionView {
            session_id: Default::default(),
            conversation: ConversationId::new("abc").unwrap(),
            connection_state: state,
            generation: Some(Generation::new(generation)),
            messages,
            history_loaded,
            has_more: false,
            draft: String::new(),
            reconnecting: false,
        }
    }

    fn message(id: &str, content: &str) -> Message {
        Message {
            id: Some(MessageId::new(id)),
            sender: Some("alice".to_string()),
            author_is_self: false,
            ..Message::local(MessageKind::Text, content)
        }
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("  "), Input::Empty);
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/sign doc-1 "), Input::Sign("doc-1"));
        assert_eq!(parse_input("hello /quit"), Input::Message("hello /quit"));
    }

    #[test]
    fn test_format_message() {
        let mut msg = message("1", "hi");
        msg.created_at = Some("2024-01-01T10:00:00Z".to_string());
        assert_eq!(format_message(&msg, true), "[2024-01-01T10:00:00Z] alice: hi");
        assert_eq!(format_message(&msg, false), "alice: hi");

        let local = Message::local(MessageKind::Announcement, "news");
        assert_eq!(format_message(&local, false), "me: [announcement] news (sending)");
    }

    #[test]
    fn test_renderer_prints_only_new_lines() {
        let mut renderer = ViewRenderer::new(false);

        let lines = renderer.render(&view(ConnectionState::Ready, 1, false, vec![]));
        assert_eq!(lines, vec!["-- Ready --"]);

        let history = vec![message("1", "a"), message("2", "b")];
        let lines = renderer.render(&view(ConnectionState::Ready, 1, true, history.clone()));
        assert_eq!(lines, vec!["-- history (2 messages) --", "alice: a", "alice: b"]);

        let mut grown = history;
        grown.push(message("3", "c"));
        let lines = renderer.render(&view(ConnectionState::Ready, 1, true, grown.clone()));
        assert_eq!(lines, vec!["alice: c"]);

        // Reconnect replaces the history under a new generation
        let lines = renderer.render(&view(ConnectionState::Ready, 2, true, grown));
        assert_eq!(lines[0], "-- history (3 messages) --");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_renderer_reports_confirmed_local_echo() {
        let mut renderer = ViewRenderer::new(false);
        renderer.render(&view(ConnectionState::Ready, 1, true, vec![message("1", "a")]));

        let pending = vec![message("1", "a"), Message::local(MessageKind::Text, "hello")];
        let lines = renderer.render(&view(ConnectionState::Ready, 1, true, pending));
        assert_eq!(lines, vec!["me: hello (sending)"]);

        let mut echo = Message::local(MessageKind::Text, "hello");
        echo.id = Some(MessageId::new("2"));
        let confirmed = vec![message("1", "a"), echo];
        let lines = renderer.render(&view(ConnectionState::Ready, 1, true, confirmed.clone()));
        assert_eq!(lines, vec!["me: hello (sent)"]);

        // Reported once
        let lines = renderer.render(&view(ConnectionState::Ready, 1, true, confirmed));
        assert!(lines.is_empty());
    }
}
