use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::form_urlencoded;

use crate::domain::mail::ActionKind;
use crate::error::{SessionError, SessionResult};
use crate::feed::transport::MailboxTransport;

static ACTION_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"var GM_ACTION_TOKEN="([\w-]+)";"#).expect("action token pattern is valid")
});

pub fn extract_action_token(page: &str) -> Option<String> {
    ACTION_TOKEN_RE
        .captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Lazily fetches and caches the token that signs mutating mail commands.
///
/// The cache lock is held across the fetch, so concurrent first actions
/// wait for a single request instead of racing their own.
pub struct ActionAuthorizer {
    transport: Arc<dyn MailboxTransport>,
    token: Mutex<Option<String>>,
}

impl ActionAuthorizer {
    pub fn new(transport: Arc<dyn MailboxTransport>) -> Self {
        Self {
            transport,
            token: Mutex::new(None),
        }
    }

    pub async fn token(&self) -> SessionResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let reply = self.transport.get("").await?;
        if !reply.is_success() {
            return Err(SessionError::Status(reply.status));
        }
        let token = extract_action_token(&reply.body).ok_or(SessionError::MissingToken)?;
        *cached = Some(token.clone());
        Ok(token)
    }

    pub async fn is_cached(&self) -> bool {
        self.token.lock().await.is_some()
    }

    pub async fn invalidate(&self) {
        self.token.lock().await.take();
    }

    pub fn action_path(message_id: &str, token: &str, kind: ActionKind) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("t", message_id)
            .append_pair("at", token)
            .append_pair("act", kind.code())
            .finish();
        format!("?{query}")
    }

    pub async fn perform(&self, message_id: &str, kind: ActionKind) -> SessionResult<()> {
        let token = self.token().await?;
        let reply = self
            .transport
            .get(&Self::action_path(message_id, &token, kind))
            .await?;

        match reply.status {
            s if (200..300).contains(&s) => Ok(()),
            401 | 403 => {
                // next action fetches a fresh token
                self.invalidate().await;
                Err(SessionError::Status(reply.status))
            }
            s => Err(SessionError::Status(s)),
        }
    }
}
