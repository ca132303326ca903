use anyhow::{Result, anyhow};
use keyring::{Entry, Error as KeyringError};

const SERVICE: &str = "multimail";

fn cookie_key(account_id: &str) -> String {
    format!("session-cookie:{account_id}")
}

/// Save the mailbox session cookie of an account into the OS keyring
pub fn save_session_cookie(account_id: &str, cookie: &str) -> Result<()> {
    let entry = Entry::new(SERVICE, &cookie_key(account_id));
    entry?
        .set_password(cookie)
        .map_err(|e| anyhow!(e.to_string()))?;
    Ok(())
}

/// Load the session cookie of an account; `None` when nothing is stored
pub fn load_session_cookie(account_id: &str) -> Result<Option<String>> {
    let entry = Entry::new(SERVICE, &cookie_key(account_id));
    match entry?.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(KeyringError::NoEntry) => Ok(None),
        Err(e) => Err(anyhow!(e.to_string())),
    }
}

/// Forget the stored cookie of a removed account
pub fn delete_session_cookie(account_id: &str) -> Result<()> {
    let entry = Entry::new(SERVICE, &cookie_key(account_id));
    match entry?.delete_credential() {
        Ok(()) | Err(KeyringError::NoEntry) => Ok(()),
        Err(e) => Err(anyhow!(e.to_string())),
    }
}

/// Per-account credentials the daemon reads at session start and forgets
/// when an account is removed.
pub trait SessionCredentials: Send + Sync {
    fn load(&self, account_id: &str) -> Result<Option<String>>;
    fn forget(&self, account_id: &str) -> Result<()>;
}

/// Credentials kept in the OS keyring.
pub struct KeyringCredentials;

impl SessionCredentials for KeyringCredentials {
    fn load(&self, account_id: &str) -> Result<Option<String>> {
        load_session_cookie(account_id)
    }

    fn forget(&self, account_id: &str) -> Result<()> {
        delete_session_cookie(account_id)
    }
}
