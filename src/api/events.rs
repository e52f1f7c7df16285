/// Transport adapter: chat events in, replies out
///
/// A bot front-end posts every update it receives here and relays the
/// returned replies to the chat. Family refresh is exposed for operators
/// who edit a document by hand and want it rebuilt from the store.
use crate::{
    auth::OperatorAuth,
    context::AppContext,
    conversation::{CollectingTransport, EventInput, InboundEvent, Reply},
    db::account::ProtocolFamily,
    error::{VeilError, VeilResult},
    publish::FamilyRefresh,
};
use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/v1/events", post(post_event))
        .route("/v1/families/:family/refresh", post(refresh_family))
}

/// One chat update: exactly one of `command` or `text`
#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub sender: i64,
    /// Defaults to the sender's id
    pub session: Option<String>,
    pub command: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventResponse {
    pub replies: Vec<Reply>,
}

impl EventRequest {
    fn into_event(self) -> VeilResult<InboundEvent> {
        let input = match (self.command, self.text) {
            (Some(command), None) => EventInput::Command(command),
            (None, Some(text)) => EventInput::Text(text),
            _ => {
                return Err(VeilError::Validation(
                    "Exactly one of command or text is required".to_string(),
                ))
            }
        };

        Ok(InboundEvent {
            session: self.session.unwrap_or_else(|| self.sender.to_string()),
            sender: self.sender,
            input,
        })
    }
}

/// Feed one event through the provisioning state machine
pub async fn post_event(
    State(ctx): State<AppContext>,
    Json(req): Json<EventRequest>,
) -> VeilResult<Json<EventResponse>> {
    let event = req.into_event()?;
    let transport = CollectingTransport::new();

    ctx.provisioner.handle(&event, &transport).await?;

    Ok(Json(EventResponse {
        replies: transport.drain(),
    }))
}

/// Rebuild and republish one family's document from the store
pub async fn refresh_family(
    State(ctx): State<AppContext>,
    auth: OperatorAuth,
    Path(family): Path<String>,
) -> VeilResult<Json<FamilyRefresh>> {
    let family = ProtocolFamily::from_str(&family)?;
    tracing::info!("Operator {} requested refresh of {}", auth.sender, family);

    let refresh = ctx.config_sync.on_accounts_changed(family).await?;
    Ok(Json(refresh))
}
