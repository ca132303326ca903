use crate::domain::mail::AccountId;

/// Failures surfaced by session plumbing. Most of them are logged and
/// swallowed by the poller; only lookups and actions report them to callers.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("account not found: {0}")]
    NotFound(AccountId),

    #[error("account already exists: {0}")]
    DuplicateAccount(AccountId),

    #[error("action token is missing")]
    MissingToken,

    #[error("feed error: {0}")]
    Feed(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected http status {0}")]
    Status(u16),

    #[error("view host error: {0}")]
    Host(String),
}

impl From<quick_xml::DeError> for SessionError {
    fn from(e: quick_xml::DeError) -> Self {
        SessionError::Feed(e.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
