/// Operator conversations
///
/// Each operator (session key) walks through a small state machine that collects
/// the inputs of one flow before committing it against the account store.

pub mod machine;
pub mod session;

pub use machine::Provisioner;
pub use session::{InMemorySessionStore, SessionStore};

use crate::{db::account::Protocol, error::VeilResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Scopes one operator's conversation (one chat identity)
pub type SessionKey = String;

/// Where a conversation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationStep {
    #[default]
    Idle,
    AwaitingProtocol,
    AwaitingUsername,
    AwaitingDuration,
    AwaitingDeleteUsername,
    AwaitingExtendUsername,
    AwaitingExtendDays,
    AwaitingDeviceLimitUsername,
}

/// Per-session state plus the scratch fields of the flow in progress
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    pub step: ConversationStep,
    pub draft_protocol: Option<Protocol>,
    pub draft_username: Option<String>,
    pub draft_duration: Option<i64>,
    pub draft_target_username: Option<String>,
}

impl ConversationState {
    /// Fresh state positioned at `step` with no drafts
    pub fn at(step: ConversationStep) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.step == ConversationStep::Idle
    }
}

/// Commands the transport dispatches from its menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Create,
    Delete,
    Extend,
    DeviceLimit,
    UserSummary,
    Cancel,
}

impl Command {
    /// Parse a command name. Case-insensitive, leading `/` optional.
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw.trim();
        let name = name.strip_prefix('/').unwrap_or(name).to_lowercase();
        match name.as_str() {
            "start" | "menu" => Some(Command::Start),
            "create" => Some(Command::Create),
            "delete" => Some(Command::Delete),
            "extend" => Some(Command::Extend),
            "device-limit" | "device_limit" => Some(Command::DeviceLimit),
            "users" | "user-summary" | "user_summary" => Some(Command::UserSummary),
            "cancel" => Some(Command::Cancel),
            _ => None,
        }
    }

    /// Commands that open a multi-step flow
    pub fn starts_flow(&self) -> bool {
        matches!(
            self,
            Command::Create | Command::Delete | Command::Extend | Command::DeviceLimit
        )
    }
}

/// Payload of an inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventInput {
    /// Raw command name as received; unknown names are ignored
    Command(String),
    Text(String),
}

/// One event delivered by the transport
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Transport identity of the caller
    pub sender: i64,
    pub session: SessionKey,
    pub input: EventInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    /// New message
    Send,
    /// Replaces the last message (menu callbacks)
    Edit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub kind: ReplyKind,
    pub text: String,
}

/// Outbound side of the chat transport
#[async_trait]
pub trait Transport: Send + Sync {
    async fn reply(&self, session: &str, text: &str) -> VeilResult<()>;
    async fn edit_last_message(&self, session: &str, text: &str) -> VeilResult<()>;
}

/// Transport that collects replies, drained by the HTTP adapter into its response
#[derive(Debug, Default)]
pub struct CollectingTransport {
    replies: Mutex<Vec<Reply>>,
}

impl CollectingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, kind: ReplyKind, text: &str) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push(Reply {
                kind,
                text: text.to_string(),
            });
        }
    }

    /// Take everything collected so far
    pub fn drain(&self) -> Vec<Reply> {
        self.replies
            .lock()
            .map(|mut replies| std::mem::take(&mut *replies))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for CollectingTransport {
    async fn reply(&self, _session: &str, text: &str) -> VeilResult<()> {
        self.push(ReplyKind::Send, text);
        Ok(())
    }

    async fn edit_last_message(&self, _session: &str, text: &str) -> VeilResult<()> {
        self.push(ReplyKind::Edit, text);
        Ok(())
    }
}
