/// Provisioning state machine
///
/// Turns commands and free text from an operator into account mutations. Every
/// completed flow returns the session to idle; a validation failure keeps the
/// session at the same step so the operator can retry.
use super::{
    Command, ConversationState, ConversationStep, EventInput, InboundEvent, SessionStore,
    Transport,
};
use crate::{
    account::AccountStore,
    auth::{report_auth_failure, Authorizer, SharedAuditSink},
    clock::SharedClock,
    credentials::CredentialFactory,
    db::account::{NewAccount, Protocol, ProtocolFamily},
    error::{VeilError, VeilResult},
    metrics,
    publish::ConfigSync,
    synthesis::render_share_link,
};
use chrono::TimeDelta;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Longest accepted username
pub const MAX_USERNAME_LEN: usize = 32;

/// Upper bound for durations and extensions (100 years)
pub const MAX_DAYS: i64 = 36_500;

pub const ACCESS_DENIED: &str = "Access denied.";
pub const PROMPT_PROTOCOL: &str = "Select protocol (vmess/vless/trojan/hysteria2):";
pub const PROMPT_USERNAME: &str = "Enter username:";
pub const PROMPT_DURATION: &str = "Enter duration in days:";
pub const PROMPT_DELETE_USERNAME: &str = "Send username to delete:";
pub const PROMPT_EXTEND_USERNAME: &str = "Send username to extend:";
pub const PROMPT_EXTEND_DAYS: &str = "Enter additional days:";
pub const PROMPT_DEVICE_LIMIT_USERNAME: &str = "Send username to check the device limit for:";
pub const INVALID_DURATION: &str = "Invalid duration. Enter a number of days.";
pub const INVALID_DAYS: &str = "Invalid days.";
pub const DEVICE_LIMIT_NOTE: &str = "Device limit enforcement requires log parsing integration.";

const MENU_TEXT: &str = "Veilgate admin menu\n\
    /create - create a user\n\
    /delete - delete a user\n\
    /extend - extend a user\n\
    /device_limit - show a user's device limit\n\
    /users - user summary\n\
    /cancel - abort the current step";

/// How far a committed change got
#[derive(Debug)]
pub enum CommitOutcome {
    /// Stored and reflected in the family's config document
    Published,
    /// Stored, but the family's config document could not be refreshed
    StoredButUnpublished(VeilError),
}

impl CommitOutcome {
    fn annotate(&self, text: String) -> String {
        match self {
            CommitOutcome::Published => text,
            CommitOutcome::StoredButUnpublished(e) => format!(
                "{}\n\nWarning: the change is stored but the proxy config was not updated ({}). \
                 It will be reconciled on the next change or sweep.",
                text, e
            ),
        }
    }
}

/// A create flow with every draft filled in
#[derive(Debug, Clone, PartialEq, Eq)]
struct CreateRequest {
    protocol: Protocol,
    username: String,
    days: i64,
}

impl CreateRequest {
    fn from_draft(state: &ConversationState) -> VeilResult<Self> {
        match (
            state.draft_protocol,
            state.draft_username.as_ref(),
            state.draft_duration,
        ) {
            (Some(protocol), Some(username), Some(days)) => Ok(Self {
                protocol,
                username: username.clone(),
                days,
            }),
            _ => Err(VeilError::Internal(
                "create flow is missing its drafts".to_string(),
            )),
        }
    }
}

/// Drives operator conversations against the account store
pub struct Provisioner {
    store: Arc<AccountStore>,
    sync: Arc<ConfigSync>,
    sessions: Arc<dyn SessionStore>,
    credentials: CredentialFactory,
    authorizer: Authorizer,
    audit: SharedAuditSink,
    clock: SharedClock,
    domain: String,
}

impl Provisioner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<AccountStore>,
        sync: Arc<ConfigSync>,
        sessions: Arc<dyn SessionStore>,
        credentials: CredentialFactory,
        authorizer: Authorizer,
        audit: SharedAuditSink,
        clock: SharedClock,
        domain: String,
    ) -> Self {
        Self {
            store,
            sync,
            sessions,
            credentials,
            authorizer,
            audit,
            clock,
            domain,
        }
    }

    /// Process one inbound event, writing replies to `transport`
    pub async fn handle(&self, event: &InboundEvent, transport: &dyn Transport) -> VeilResult<()> {
        if !self.authorizer.is_authorized(event.sender) {
            let message = format!(
                "unauthorized event from {} on session {}",
                event.sender, event.session
            );
            report_auth_failure(self.audit.as_ref(), &message).await;
            return transport.reply(&event.session, ACCESS_DENIED).await;
        }

        match &event.input {
            EventInput::Command(raw) => match Command::parse(raw) {
                Some(command) => self.handle_command(&event.session, command, transport).await,
                None => {
                    debug!(session = %event.session, command = %raw, "Ignoring unrecognized command");
                    Ok(())
                }
            },
            EventInput::Text(text) => self.handle_text(&event.session, text, transport).await,
        }
    }

    async fn handle_command(
        &self,
        session: &str,
        command: Command,
        transport: &dyn Transport,
    ) -> VeilResult<()> {
        let (text, next_step) = match command {
            Command::Start => (MENU_TEXT.to_string(), None),
            Command::Create => (
                PROMPT_PROTOCOL.to_string(),
                Some(ConversationStep::AwaitingProtocol),
            ),
            Command::Delete => (
                PROMPT_DELETE_USERNAME.to_string(),
                Some(ConversationStep::AwaitingDeleteUsername),
            ),
            Command::Extend => (
                PROMPT_EXTEND_USERNAME.to_string(),
                Some(ConversationStep::AwaitingExtendUsername),
            ),
            Command::DeviceLimit => (
                PROMPT_DEVICE_LIMIT_USERNAME.to_string(),
                Some(ConversationStep::AwaitingDeviceLimitUsername),
            ),
            Command::UserSummary => (self.user_summary().await, None),
            Command::Cancel => {
                self.sessions.clear(session).await;
                ("Cancelled.".to_string(), None)
            }
        };

        // A flow command always starts from clean drafts, abandoning any flow in progress
        if let Some(step) = next_step {
            if command.starts_flow() {
                debug!(session = %session, ?command, "Starting flow");
            }
            self.sessions.set(session, ConversationState::at(step)).await;
        }

        transport.edit_last_message(session, &text).await
    }

    async fn handle_text(
        &self,
        session: &str,
        text: &str,
        transport: &dyn Transport,
    ) -> VeilResult<()> {
        let state = self.sessions.get_or_create(session).await;
        if state.is_idle() {
            debug!(session = %session, "Ignoring text while idle");
            return Ok(());
        }

        let (reply, next) = self.advance(state, text.trim()).await;
        self.sessions.set(session, next).await;
        transport.reply(session, &reply).await
    }

    /// Apply one text input to `state`, returning the reply and the next state
    async fn advance(&self, state: ConversationState, text: &str) -> (String, ConversationState) {
        match state.step {
            ConversationStep::Idle => (String::new(), state),

            ConversationStep::AwaitingProtocol => match Protocol::from_str(text) {
                Ok(protocol) => (
                    PROMPT_USERNAME.to_string(),
                    ConversationState {
                        step: ConversationStep::AwaitingUsername,
                        draft_protocol: Some(protocol),
                        ..state
                    },
                ),
                Err(e) => (failure_text(&e), state),
            },

            ConversationStep::AwaitingUsername => match validate_username(text) {
                Ok(username) => (
                    PROMPT_DURATION.to_string(),
                    ConversationState {
                        step: ConversationStep::AwaitingDuration,
                        draft_username: Some(username),
                        ..state
                    },
                ),
                Err(e) => (failure_text(&e), state),
            },

            ConversationStep::AwaitingDuration => match parse_days(text, INVALID_DURATION) {
                Ok(days) => {
                    let draft = ConversationState {
                        draft_duration: Some(days),
                        ..state
                    };
                    let reply = match CreateRequest::from_draft(&draft) {
                        Ok(request) => self.commit_create(request).await,
                        Err(e) => failure_text(&e),
                    };
                    (reply, ConversationState::default())
                }
                Err(e) => (failure_text(&e), state),
            },

            ConversationStep::AwaitingDeleteUsername => match validate_username(text) {
                Ok(username) => (
                    self.commit_delete(&username).await,
                    ConversationState::default(),
                ),
                Err(e) => (failure_text(&e), state),
            },

            ConversationStep::AwaitingExtendUsername => match validate_username(text) {
                Ok(username) => (
                    PROMPT_EXTEND_DAYS.to_string(),
                    ConversationState {
                        step: ConversationStep::AwaitingExtendDays,
                        draft_target_username: Some(username),
                        ..state
                    },
                ),
                Err(e) => (failure_text(&e), state),
            },

            ConversationStep::AwaitingExtendDays => match parse_days(text, INVALID_DAYS) {
                Ok(days) => {
                    let reply = match state.draft_target_username.as_deref() {
                        Some(username) => self.commit_extend(username, days).await,
                        None => failure_text(&VeilError::Internal(
                            "extend flow is missing its target".to_string(),
                        )),
                    };
                    (reply, ConversationState::default())
                }
                Err(e) => (failure_text(&e), state),
            },

            ConversationStep::AwaitingDeviceLimitUsername => match validate_username(text) {
                Ok(username) => (
                    self.device_limit_note(&username).await,
                    ConversationState::default(),
                ),
                Err(e) => (failure_text(&e), state),
            },
        }
    }

    async fn commit_create(&self, request: CreateRequest) -> String {
        let CreateRequest {
            protocol,
            username,
            days,
        } = request;
        let now = self.clock.utc();
        let credentials = self.credentials.generate(protocol);
        let new = NewAccount {
            username,
            protocol,
            identifier: credentials.identifier,
            secret: credentials.secret,
            expires_at: now + TimeDelta::days(days),
        };

        let account = match self.store.insert(new, now).await {
            Ok(account) => account,
            Err(e) => return failure_text(&e),
        };

        metrics::record_account_created(protocol.as_str());
        info!(
            username = %account.username,
            protocol = %protocol,
            expires_at = %account.expires_at,
            "Account created"
        );

        let outcome = self.publish(protocol.family()).await;
        let link = render_share_link(&account, &self.domain);
        outcome.annotate(format!("User created. Config:\n{}", link))
    }

    async fn commit_delete(&self, username: &str) -> String {
        let account = match self.store.delete_by_username(username).await {
            Ok(account) => account,
            Err(e) => return failure_text(&e),
        };

        metrics::record_account_removed("delete");
        info!(username = %account.username, family = %account.protocol.family(), "Account deleted");

        self.publish(account.protocol.family())
            .await
            .annotate("User deleted.".to_string())
    }

    async fn commit_extend(&self, username: &str, days: i64) -> String {
        let account = match self.store.extend(username, days, self.clock.utc()).await {
            Ok(account) => account,
            Err(e) => return failure_text(&e),
        };

        metrics::record_account_extended();
        info!(
            username = %account.username,
            days,
            expires_at = %account.expires_at,
            "Account extended"
        );

        self.publish(account.protocol.family()).await.annotate(format!(
            "User extended.\nExpires: {}",
            account.expires_at.to_rfc3339()
        ))
    }

    async fn device_limit_note(&self, username: &str) -> String {
        match self.store.find_by_username(username).await {
            Ok(account) => {
                let limit = match account.device_limit {
                    0 => "unlimited".to_string(),
                    n => n.to_string(),
                };
                format!(
                    "Device limit for {}: {}\n{}",
                    account.username, limit, DEVICE_LIMIT_NOTE
                )
            }
            Err(e) => failure_text(&e),
        }
    }

    async fn user_summary(&self) -> String {
        match self.store.summary(self.clock.utc()).await {
            Ok(summary) => format!(
                "Active users: {}\nExpired users: {}",
                summary.active, summary.expired
            ),
            Err(e) => failure_text(&e),
        }
    }

    async fn publish(&self, family: ProtocolFamily) -> CommitOutcome {
        match self.sync.on_accounts_changed(family).await {
            Ok(_) => CommitOutcome::Published,
            Err(e) => {
                warn!(family = %family, "Change stored but config not published: {}", e);
                CommitOutcome::StoredButUnpublished(e)
            }
        }
    }
}

/// Operator-facing text for a failed step
fn failure_text(err: &VeilError) -> String {
    match err {
        VeilError::Validation(msg) | VeilError::NotFound(msg) | VeilError::Duplicate(msg) => {
            msg.clone()
        }
        VeilError::Timeout(_) => "Operation timed out. Please try again.".to_string(),
        other => {
            error!("Provisioning step failed: {}", other);
            "Operation failed. Check the service logs.".to_string()
        }
    }
}

/// Trimmed username of 1..=32 characters from `[A-Za-z0-9_.-]`
pub fn validate_username(text: &str) -> VeilResult<String> {
    let username = text.trim();
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if username.is_empty() || username.len() > MAX_USERNAME_LEN || !valid_chars {
        return Err(VeilError::Validation(format!(
            "Invalid username. Use 1-{} letters, digits, '_', '.' or '-'.",
            MAX_USERNAME_LEN
        )));
    }
    Ok(username.to_string())
}

/// Positive day count, rejected with `message` otherwise
pub fn parse_days(text: &str, message: &str) -> VeilResult<i64> {
    text.trim()
        .parse::<i64>()
        .ok()
        .filter(|days| (1..=MAX_DAYS).contains(days))
        .ok_or_else(|| VeilError::Validation(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::MemoryAuditSink,
        clock::testing::ManualClock,
        conversation::{CollectingTransport, InMemorySessionStore, Reply, ReplyKind},
        db::test_pool,
        publish::ConfigPublisher,
    };
    use chrono::DateTime;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const ADMIN: i64 = 42;
    const SESSION: &str = "chat-42";

    struct Harness {
        provisioner: Provisioner,
        store: Arc<AccountStore>,
        sync: Arc<ConfigSync>,
        sessions: Arc<InMemorySessionStore>,
        audit: Arc<MemoryAuditSink>,
        clock: Arc<ManualClock>,
        dir: TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = tempdir().unwrap();
            let xray = dir.path().join("xray/config.json");
            Self::with_xray_path(dir, xray).await
        }

        async fn with_xray_path(dir: TempDir, xray_path: PathBuf) -> Self {
            let store = Arc::new(AccountStore::new(test_pool().await, Duration::from_secs(5)));
            let clock = Arc::new(ManualClock::new(
                DateTime::from_timestamp(1_760_000_000, 0).unwrap(),
            ));
            let sync = Arc::new(ConfigSync::new(
                store.clone(),
                ConfigPublisher::new(xray_path, dir.path().join("hysteria/config.yaml")),
                clock.clone(),
                "vpn.example.com".to_string(),
                Duration::from_secs(5),
            ));
            let sessions = Arc::new(InMemorySessionStore::new());
            let audit = Arc::new(MemoryAuditSink::default());

            let provisioner = Provisioner::new(
                store.clone(),
                sync.clone(),
                sessions.clone(),
                CredentialFactory,
                Authorizer::new(ADMIN),
                audit.clone(),
                clock.clone(),
                "vpn.example.com".to_string(),
            );

            Self {
                provisioner,
                store,
                sync,
                sessions,
                audit,
                clock,
                dir,
            }
        }

        async fn send_as(&self, sender: i64, input: EventInput) -> Vec<Reply> {
            let transport = CollectingTransport::new();
            let event = InboundEvent {
                sender,
                session: SESSION.to_string(),
                input,
            };
            self.provisioner.handle(&event, &transport).await.unwrap();
            transport.drain()
        }

        async fn command(&self, name: &str) -> Vec<Reply> {
            self.send_as(ADMIN, EventInput::Command(name.to_string())).await
        }

        async fn text(&self, text: &str) -> Vec<Reply> {
            self.send_as(ADMIN, EventInput::Text(text.to_string())).await
        }

        async fn state(&self) -> ConversationState {
            self.sessions.get_or_create(SESSION).await
        }

        async fn create(&self, protocol: &str, username: &str, days: &str) -> Vec<Reply> {
            self.command("create").await;
            self.text(protocol).await;
            self.text(username).await;
            self.text(days).await
        }

        fn xray_document(&self) -> serde_json::Value {
            let body = std::fs::read(self.dir.path().join("xray/config.json")).unwrap();
            serde_json::from_slice(&body).unwrap()
        }

        async fn account_count(&self) -> i64 {
            let summary = self.store.summary(self.clock.utc()).await.unwrap();
            summary.active + summary.expired
        }
    }

    #[tokio::test]
    async fn test_create_flow_stores_account_and_publishes() {
        let h = Harness::new().await;
        let now = h.clock.utc();

        let replies = h.command("create").await;
        assert_eq!(replies[0].kind, ReplyKind::Edit);
        assert_eq!(replies[0].text, PROMPT_PROTOCOL);
        assert_eq!(h.state().await.step, ConversationStep::AwaitingProtocol);

        assert_eq!(h.text("VLESS").await[0].text, PROMPT_USERNAME);
        assert_eq!(h.text("alice").await[0].text, PROMPT_DURATION);

        let replies = h.text("30").await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind, ReplyKind::Send);
        assert!(replies[0].text.starts_with("User created. Config:\nvless://"));
        assert!(!replies[0].text.contains("Warning"));

        let account = h.store.find_by_username("alice").await.unwrap();
        assert_eq!(account.protocol, Protocol::Vless);
        assert_eq!(account.expires_at, now + TimeDelta::days(30));
        assert!(h.state().await.is_idle());

        let doc = h.xray_document();
        let clients = doc["inbounds"][1]["settings"]["clients"].as_array().unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0]["email"], "alice");
        assert_eq!(clients[0]["id"], account.identifier);
    }

    #[tokio::test]
    async fn test_invalid_duration_keeps_step() {
        let h = Harness::new().await;
        h.command("create").await;
        h.text("trojan").await;
        h.text("bob").await;

        let replies = h.text("abc").await;
        assert_eq!(replies[0].text, INVALID_DURATION);
        assert_eq!(h.account_count().await, 0);

        let state = h.state().await;
        assert_eq!(state.step, ConversationStep::AwaitingDuration);
        assert_eq!(state.draft_username.as_deref(), Some("bob"));

        h.text("-3").await;
        assert_eq!(h.state().await.step, ConversationStep::AwaitingDuration);

        let replies = h.text("7").await;
        assert!(replies[0].text.contains("trojan://"));
        let account = h.store.find_by_username("bob").await.unwrap();
        assert_eq!(account.expires_at, h.clock.utc() + TimeDelta::days(7));
    }

    #[tokio::test]
    async fn test_unknown_protocol_is_retried() {
        let h = Harness::new().await;
        h.command("create").await;

        let replies = h.text("shadowsocks").await;
        assert!(replies[0].text.contains("Unknown protocol"));
        assert_eq!(h.state().await.step, ConversationStep::AwaitingProtocol);

        h.text("hysteria").await;
        let state = h.state().await;
        assert_eq!(state.step, ConversationStep::AwaitingUsername);
        assert_eq!(state.draft_protocol, Some(Protocol::Hysteria2));
    }

    #[tokio::test]
    async fn test_invalid_username_is_retried() {
        let h = Harness::new().await;
        h.command("create").await;
        h.text("vmess").await;

        h.text("bad name!").await;
        assert_eq!(h.state().await.step, ConversationStep::AwaitingUsername);
        h.text(&"x".repeat(33)).await;
        assert_eq!(h.state().await.step, ConversationStep::AwaitingUsername);
    }

    #[tokio::test]
    async fn test_duplicate_username_aborts_create() {
        let h = Harness::new().await;
        h.create("vless", "alice", "30").await;

        let replies = h.create("trojan", "alice", "5").await;
        assert!(replies[0].text.contains("already exists"));
        assert!(h.state().await.is_idle());
        assert_eq!(h.account_count().await, 1);
        assert_eq!(
            h.store.find_by_username("alice").await.unwrap().protocol,
            Protocol::Vless
        );
    }

    #[tokio::test]
    async fn test_delete_unknown_user() {
        let h = Harness::new().await;
        h.create("vless", "alice", "30").await;
        let before = std::fs::read(h.dir.path().join("xray/config.json")).unwrap();

        h.command("delete").await;
        let replies = h.text("ghost").await;

        assert!(replies[0].text.contains("not found"));
        assert!(h.state().await.is_idle());
        assert_eq!(h.account_count().await, 1);
        let after = std::fs::read(h.dir.path().join("xray/config.json")).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_delete_removes_client_from_document() {
        let h = Harness::new().await;
        h.create("vmess", "bob", "10").await;
        h.create("vless", "alice", "10").await;

        h.command("delete").await;
        let replies = h.text("bob").await;
        assert_eq!(replies[0].text, "User deleted.");

        assert!(h.store.find_by_username("bob").await.is_err());
        let doc = h.xray_document();
        assert!(doc["inbounds"][0]["settings"]["clients"]
            .as_array()
            .unwrap()
            .is_empty());
        assert_eq!(doc["inbounds"][1]["settings"]["clients"][0]["email"], "alice");
    }

    #[tokio::test]
    async fn test_extend_flow() {
        let h = Harness::new().await;
        h.create("hysteria2", "dan", "1").await;
        let before = h.store.find_by_username("dan").await.unwrap().expires_at;

        h.command("extend").await;
        assert_eq!(h.text("dan").await[0].text, PROMPT_EXTEND_DAYS);

        assert_eq!(h.text("0").await[0].text, INVALID_DAYS);
        assert_eq!(h.state().await.step, ConversationStep::AwaitingExtendDays);

        let replies = h.text("5").await;
        assert!(replies[0].text.starts_with("User extended."));
        assert!(h.state().await.is_idle());

        let after = h.store.find_by_username("dan").await.unwrap().expires_at;
        assert_eq!(after, before + TimeDelta::days(5));
    }

    #[tokio::test]
    async fn test_extend_unknown_user() {
        let h = Harness::new().await;
        h.command("extend").await;
        h.text("ghost").await;

        let replies = h.text("3").await;
        assert!(replies[0].text.contains("not found"));
        assert!(h.state().await.is_idle());
    }

    #[tokio::test]
    async fn test_device_limit_note() {
        let h = Harness::new().await;
        h.create("trojan", "carol", "3").await;

        h.command("device_limit").await;
        let replies = h.text("carol").await;
        assert!(replies[0].text.contains("Device limit for carol: unlimited"));
        assert!(replies[0].text.contains(DEVICE_LIMIT_NOTE));
        assert!(h.state().await.is_idle());

        h.command("device-limit").await;
        let replies = h.text("ghost").await;
        assert!(replies[0].text.contains("not found"));
    }

    #[tokio::test]
    async fn test_user_summary() {
        let h = Harness::new().await;
        h.create("vless", "alice", "1").await;
        h.create("vmess", "bob", "10").await;

        h.clock.advance(TimeDelta::days(2));
        let replies = h.command("/users").await;

        assert_eq!(replies[0].kind, ReplyKind::Edit);
        assert_eq!(replies[0].text, "Active users: 1\nExpired users: 1");
    }

    #[tokio::test]
    async fn test_text_while_idle_is_ignored() {
        let h = Harness::new().await;

        let replies = h.text("alice").await;

        assert!(replies.is_empty());
        assert!(h.state().await.is_idle());
        assert_eq!(h.account_count().await, 0);
    }

    #[tokio::test]
    async fn test_unrecognized_command_is_ignored_mid_flow() {
        let h = Harness::new().await;
        h.command("create").await;
        h.text("vless").await;

        let replies = h.command("backup").await;

        assert!(replies.is_empty());
        let state = h.state().await;
        assert_eq!(state.step, ConversationStep::AwaitingUsername);
        assert_eq!(state.draft_protocol, Some(Protocol::Vless));
    }

    #[tokio::test]
    async fn test_flow_command_restarts_flow() {
        let h = Harness::new().await;
        h.command("create").await;
        h.text("vless").await;

        h.command("delete").await;
        let state = h.state().await;
        assert_eq!(state, ConversationState::at(ConversationStep::AwaitingDeleteUsername));

        h.command("cancel").await;
        assert!(h.state().await.is_idle());
    }

    #[tokio::test]
    async fn test_unauthorized_sender_is_rejected_and_audited() {
        let h = Harness::new().await;

        let replies = h.send_as(7, EventInput::Command("create".to_string())).await;

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].text, ACCESS_DENIED);
        assert!(h.state().await.is_idle());

        let records = h.audit.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].contains("7"));
    }

    #[tokio::test]
    async fn test_publish_failure_after_insert_keeps_account() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let h = Harness::with_xray_path(dir, blocker.join("config.json")).await;

        let replies = h.create("vless", "alice", "30").await;

        assert!(replies[0].text.starts_with("User created. Config:\nvless://"));
        assert!(replies[0].text.contains("Warning"));
        assert!(h.store.find_by_username("alice").await.is_ok());
        assert!(h.state().await.is_idle());
    }

    #[tokio::test]
    async fn test_refresh_after_failed_publish_heals_document() {
        let h = Harness::new().await;
        h.create("vless", "alice", "30").await;
        std::fs::remove_file(h.dir.path().join("xray/config.json")).unwrap();

        h.sync.on_accounts_changed(ProtocolFamily::Xray).await.unwrap();

        let doc = h.xray_document();
        assert_eq!(doc["inbounds"][1]["settings"]["clients"][0]["email"], "alice");
    }

    #[test]
    fn test_create_request_needs_every_draft() {
        let mut state = ConversationState::at(ConversationStep::AwaitingDuration);
        state.draft_protocol = Some(Protocol::Trojan);
        state.draft_username = Some("dana".to_string());
        assert!(matches!(
            CreateRequest::from_draft(&state),
            Err(VeilError::Internal(_))
        ));

        state.draft_duration = Some(14);
        assert_eq!(
            CreateRequest::from_draft(&state).unwrap(),
            CreateRequest {
                protocol: Protocol::Trojan,
                username: "dana".to_string(),
                days: 14,
            }
        );
    }

    #[test]
    fn test_parse_days() {
        assert_eq!(parse_days(" 7 ", INVALID_DAYS).unwrap(), 7);
        assert!(parse_days("0", INVALID_DAYS).is_err());
        assert!(parse_days("abc", INVALID_DAYS).is_err());
        assert!(parse_days("99999999999", INVALID_DAYS).is_err());
    }

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username(" alice.b-1_ ").unwrap(), "alice.b-1_");
        assert!(validate_username("").is_err());
        assert!(validate_username("a b").is_err());
        assert!(validate_username("émile").is_err());
    }
}
