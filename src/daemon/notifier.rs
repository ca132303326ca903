use anyhow::Result;
use notify_rust::Notification;
use tokio::sync::mpsc;

use crate::daemon::compose::NotificationPayload;
use crate::domain::mail::{AccountId, ActionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Action(ActionKind),
    Clicked,
    Dismissed,
}

/// What the user did with a shown notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationInteraction {
    pub account_id: AccountId,
    pub message_id: String,
    pub kind: InteractionKind,
}

/// Maps the action identifier a notification server reports back.
/// Unknown identifiers fall back to the first action (archive).
pub fn interaction_for(action: &str) -> InteractionKind {
    match action {
        "default" | "clicked" => InteractionKind::Clicked,
        "__closed" => InteractionKind::Dismissed,
        key => InteractionKind::Action(ActionKind::from_key(key).unwrap_or(ActionKind::Archive)),
    }
}

pub trait Notifier: Send + Sync {
    /// Shows one notification. `account_id` and `message_id` ride along so
    /// the interaction can be routed back without a lookup at click time.
    fn notify(&self, account_id: &str, message_id: &str, payload: &NotificationPayload) -> Result<()>;
}

pub struct DesktopNotifier {
    app_name: String,
    interactions: mpsc::UnboundedSender<NotificationInteraction>,
}

impl DesktopNotifier {
    pub fn new(interactions: mpsc::UnboundedSender<NotificationInteraction>) -> Self {
        Self {
            app_name: "multimail".to_string(),
            interactions,
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, account_id: &str, message_id: &str, payload: &NotificationPayload) -> Result<()> {
        let mut n = Notification::new();
        n.appname(&self.app_name)
            .summary(&payload.title)
            .icon("mail-unread")
            // "default" is what servers report when the body is clicked
            .action("default", "Open");
        if let Some(body) = &payload.body {
            n.body(body);
        }
        #[cfg(target_os = "macos")]
        if let Some(subtitle) = &payload.subtitle {
            n.subtitle(subtitle);
        }
        if !payload.silent {
            n.sound_name("message-new-email");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        n.hint(notify_rust::Hint::Category("email.arrived".to_string()));
        for (kind, label) in &payload.actions {
            n.action(kind.key(), label);
        }

        let handle = match n.show() {
            Ok(h) => h,
            Err(e) => {
                log::warn!("[{account_id}] notification error: {e}");
                return Ok(());
            }
        };

        #[cfg(all(unix, not(target_os = "macos")))]
        {
            let tx = self.interactions.clone();
            let account_id = account_id.to_string();
            let message_id = message_id.to_string();
            std::thread::spawn(move || {
                handle.wait_for_action(|action| {
                    let interaction = NotificationInteraction {
                        account_id,
                        message_id,
                        kind: interaction_for(action),
                    };
                    if tx.send(interaction).is_err() {
                        log::debug!("coordinator gone, interaction dropped");
                    }
                });
            });
        }
        #[cfg(not(all(unix, not(target_os = "macos"))))]
        {
            let _ = (handle, message_id);
            log::debug!("[{account_id}] notification actions are not reported on this platform");
        }

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_actions_map_to_interactions() {
        assert_eq!(interaction_for("default"), InteractionKind::Clicked);
        assert_eq!(interaction_for("__closed"), InteractionKind::Dismissed);
        assert_eq!(
            interaction_for("mark_spam"),
            InteractionKind::Action(ActionKind::MarkSpam)
        );
        assert_eq!(interaction_for("7"), InteractionKind::Action(ActionKind::Archive));
    }
}
