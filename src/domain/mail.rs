use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AccountId = String;

/// The account that shares the application's default storage instead of
/// getting its own partition.
pub const DEFAULT_ACCOUNT_ID: &str = "default";

pub fn is_default_account(account_id: &str) -> bool {
    account_id == DEFAULT_ACCOUNT_ID
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailSender {
    pub name: String,
    pub email: String,
}

/// One `<entry>` of the mailbox feed. Produced per poll, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailFeedEntry {
    pub message_id: String,
    pub link: String,
    pub subject: String,
    pub summary: String,
    pub sender: MailSender,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Archive,
    MarkRead,
    Delete,
    MarkSpam,
}

impl ActionKind {
    /// Order in which actions are attached to a notification.
    pub const ALL: [ActionKind; 4] = [
        ActionKind::Archive,
        ActionKind::MarkRead,
        ActionKind::Delete,
        ActionKind::MarkSpam,
    ];

    /// Value of the `act` query parameter.
    pub fn code(self) -> &'static str {
        match self {
            ActionKind::Archive => "rc_^i",
            ActionKind::MarkRead => "rd",
            ActionKind::Delete => "tr",
            ActionKind::MarkSpam => "sp",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ActionKind::Archive => "Archive",
            ActionKind::MarkRead => "Mark As Read",
            ActionKind::Delete => "Delete",
            ActionKind::MarkSpam => "Mark As Spam",
        }
    }

    /// Identifier used for notification action buttons.
    pub fn key(self) -> &'static str {
        match self {
            ActionKind::Archive => "archive",
            ActionKind::MarkRead => "mark_read",
            ActionKind::Delete => "delete",
            ActionKind::MarkSpam => "mark_spam",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }
}

/// Mailbox sections a session can be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Inbox,
    Starred,
    Snoozed,
    Sent,
    Drafts,
    Important,
    Scheduled,
    All,
    Settings,
}

impl Destination {
    pub fn fragment(self) -> &'static str {
        match self {
            Destination::Inbox => "#inbox",
            Destination::Starred => "#starred",
            Destination::Snoozed => "#snoozed",
            Destination::Sent => "#sent",
            Destination::Drafts => "#drafts",
            Destination::Important => "#imp",
            Destination::Scheduled => "#scheduled",
            Destination::All => "#all",
            Destination::Settings => "#settings",
        }
    }
}

impl FromStr for Destination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inbox" => Ok(Destination::Inbox),
            "starred" => Ok(Destination::Starred),
            "snoozed" => Ok(Destination::Snoozed),
            "sent" => Ok(Destination::Sent),
            "drafts" => Ok(Destination::Drafts),
            "imp" | "important" => Ok(Destination::Important),
            "scheduled" => Ok(Destination::Scheduled),
            "all" => Ok(Destination::All),
            "settings" => Ok(Destination::Settings),
            other => Err(format!("unknown destination: {other}")),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fragment().trim_start_matches('#'))
    }
}
