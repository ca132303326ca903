use crate::config::NotificationSettings;
use crate::domain::mail::{ActionKind, MailFeedEntry};

/// What the desktop notification service on this platform can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCaps {
    pub notifications_supported: bool,
    /// Subject goes in a subtitle line and the summary in the body.
    pub subtitle_body_split: bool,
    pub has_do_not_disturb: bool,
}

impl PlatformCaps {
    pub fn current() -> Self {
        let macos = cfg!(target_os = "macos");
        Self {
            notifications_supported: cfg!(any(unix, target_os = "windows")),
            subtitle_body_split: macos,
            has_do_not_disturb: macos,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub title: String,
    pub subtitle: Option<String>,
    pub body: Option<String>,
    pub silent: bool,
    pub actions: Vec<(ActionKind, &'static str)>,
}

pub fn is_eligible(settings: &NotificationSettings, caps: PlatformCaps, dnd_active: bool) -> bool {
    settings.enabled && caps.notifications_supported && !(caps.has_do_not_disturb && dnd_active)
}

pub fn compose(
    entry: &MailFeedEntry,
    account_label: &str,
    settings: &NotificationSettings,
    caps: PlatformCaps,
) -> NotificationPayload {
    let title = if settings.show_sender && !entry.sender.name.is_empty() {
        entry.sender.name.clone()
    } else {
        account_label.to_string()
    };

    let subject = settings.show_subject.then(|| entry.subject.clone());
    let (subtitle, body) = if caps.subtitle_body_split {
        (subject, settings.show_summary.then(|| entry.summary.clone()))
    } else {
        (None, subject)
    };

    NotificationPayload {
        title,
        subtitle,
        body: body.filter(|b| !b.is_empty()),
        silent: !settings.play_sound,
        actions: ActionKind::ALL.iter().map(|k| (*k, k.label())).collect(),
    }
}
