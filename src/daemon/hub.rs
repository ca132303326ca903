use std::collections::BTreeMap;
use std::process::Command;
use std::sync::Arc;

use crate::config::NotificationSettings;
use crate::daemon::compose::{PlatformCaps, compose, is_eligible};
use crate::daemon::notifier::Notifier;
use crate::domain::mail::{AccountId, MailFeedEntry};

/// Last reported unread count per account.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregateUnreadState {
    counts: BTreeMap<AccountId, u32>,
}

impl AggregateUnreadState {
    pub fn update(&mut self, account_id: &str, count: u32) {
        self.counts.insert(account_id.to_string(), count);
    }

    pub fn remove(&mut self, account_id: &str) {
        self.counts.remove(account_id);
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn get(&self, account_id: &str) -> Option<u32> {
        self.counts.get(account_id).copied()
    }

    pub fn counts(&self) -> &BTreeMap<AccountId, u32> {
        &self.counts
    }

    /// Text for the dock/tray badge; `None` clears it.
    pub fn badge(&self) -> Option<String> {
        match self.total() {
            0 => None,
            n => Some(n.to_string()),
        }
    }
}

/// Where the aggregate unread state is shown (dock badge, tray icon).
pub trait UnreadIndicator: Send + Sync {
    fn publish(&self, badge: Option<&str>, counts: &BTreeMap<AccountId, u32>);
}

pub struct LogIndicator;

impl UnreadIndicator for LogIndicator {
    fn publish(&self, badge: Option<&str>, counts: &BTreeMap<AccountId, u32>) {
        log::info!("unread badge {:?} {:?}", badge.unwrap_or(""), counts);
    }
}

pub trait DoNotDisturb: Send + Sync {
    fn is_active(&self) -> bool;
}

/// Reads the system focus/do-not-disturb switch where there is one.
pub struct SystemDoNotDisturb;

impl DoNotDisturb for SystemDoNotDisturb {
    fn is_active(&self) -> bool {
        if !cfg!(target_os = "macos") {
            return false;
        }
        match Command::new("defaults")
            .args([
                "-currentHost",
                "read",
                "com.apple.notificationcenterui",
                "doNotDisturb",
            ])
            .output()
        {
            Ok(out) => String::from_utf8_lossy(&out.stdout).trim() == "1",
            Err(e) => {
                log::debug!("could not read do-not-disturb state: {e}");
                false
            }
        }
    }
}

/// Aggregates unread counts and turns new mail into desktop notifications.
pub struct NotificationHub {
    unread: AggregateUnreadState,
    settings: NotificationSettings,
    caps: PlatformCaps,
    notifier: Arc<dyn Notifier>,
    indicator: Arc<dyn UnreadIndicator>,
    dnd: Arc<dyn DoNotDisturb>,
}

impl NotificationHub {
    pub fn new(
        settings: NotificationSettings,
        caps: PlatformCaps,
        notifier: Arc<dyn Notifier>,
        indicator: Arc<dyn UnreadIndicator>,
        dnd: Arc<dyn DoNotDisturb>,
    ) -> Self {
        Self {
            unread: AggregateUnreadState::default(),
            settings,
            caps,
            notifier,
            indicator,
            dnd,
        }
    }

    pub fn unread(&self) -> &AggregateUnreadState {
        &self.unread
    }

    pub fn on_unread_count(&mut self, account_id: &str, count: u32) {
        self.unread.update(account_id, count);
        self.publish();
    }

    pub fn on_account_removed(&mut self, account_id: &str) {
        self.unread.remove(account_id);
        self.publish();
    }

    fn publish(&self) {
        self.indicator
            .publish(self.unread.badge().as_deref(), self.unread.counts());
    }

    /// One notification per entry. Returns how many were handed to the
    /// notifier.
    pub fn on_new_mail(&self, account_id: &str, account_label: &str, entries: &[MailFeedEntry]) -> usize {
        let dnd_active = self.caps.has_do_not_disturb && self.dnd.is_active();
        if !is_eligible(&self.settings, self.caps, dnd_active) {
            log::debug!(
                "[{account_id}] notifications not shown ({} new mail(s))",
                entries.len()
            );
            return 0;
        }

        let mut shown = 0;
        for entry in entries {
            let payload = compose(entry, account_label, &self.settings, self.caps);
            match self.notifier.notify(account_id, &entry.message_id, &payload) {
                Ok(()) => shown += 1,
                Err(e) => log::warn!("[{account_id}] notification for {} failed: {e}", entry.message_id),
            }
        }
        shown
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::daemon::notifier::testing::RecordingNotifier;
    use crate::domain::mail::MailSender;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingIndicator {
        pub published: Mutex<Vec<Option<String>>>,
    }

    impl UnreadIndicator for RecordingIndicator {
        fn publish(&self, badge: Option<&str>, _counts: &BTreeMap<AccountId, u32>) {
            self.published.lock().unwrap().push(badge.map(str::to_string));
        }
    }

    pub(crate) struct FixedDnd(pub bool);

    impl DoNotDisturb for FixedDnd {
        fn is_active(&self) -> bool {
            self.0
        }
    }

    pub(crate) fn mail(id: &str) -> MailFeedEntry {
        MailFeedEntry {
            message_id: id.into(),
            link: format!("https://mail.google.com/mail?message_id={id}"),
            subject: format!("Subject {id}"),
            summary: String::new(),
            sender: MailSender {
                name: "Bob".into(),
                email: "bob@example.com".into(),
            },
            issued_at: Utc::now(),
        }
    }

    const CAPS: PlatformCaps = PlatformCaps {
        notifications_supported: true,
        subtitle_body_split: false,
        has_do_not_disturb: true,
    };

    fn hub(
        settings: NotificationSettings,
        dnd: bool,
    ) -> (NotificationHub, Arc<RecordingNotifier>, Arc<RecordingIndicator>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let indicator = Arc::new(RecordingIndicator::default());
        let hub = NotificationHub::new(
            settings,
            CAPS,
            notifier.clone(),
            indicator.clone(),
            Arc::new(FixedDnd(dnd)),
        );
        (hub, notifier, indicator)
    }

    #[test]
    fn aggregate_sums_and_clears_badge() {
        let mut state = AggregateUnreadState::default();
        assert_eq!(state.badge(), None);
        state.update("a", 3);
        state.update("b", 5);
        assert_eq!(state.total(), 8);
        assert_eq!(state.badge().as_deref(), Some("8"));
        state.update("a", 0);
        assert_eq!(state.total(), 5);
        state.remove("b");
        assert_eq!(state.badge(), None);
    }

    #[test]
    fn counts_are_published() {
        let (mut hub, _, indicator) = hub(NotificationSettings::default(), false);
        hub.on_unread_count("a", 3);
        hub.on_unread_count("b", 5);
        hub.on_account_removed("b");
        assert_eq!(
            *indicator.published.lock().unwrap(),
            vec![Some("3".to_string()), Some("8".to_string()), Some("3".to_string())]
        );
    }

    #[test]
    fn one_notification_per_entry() {
        let (hub, notifier, _) = hub(NotificationSettings::default(), false);
        assert_eq!(hub.on_new_mail("a", "A", &[mail("1"), mail("2")]), 2);
        let shown = notifier.shown();
        assert_eq!(shown.len(), 2);
        assert_eq!(shown[1].message_id, "2");
        assert_eq!(shown[0].payload.title, "Bob");
    }

    #[test]
    fn disabled_notifications_are_never_shown() {
        let settings = NotificationSettings {
            enabled: false,
            ..NotificationSettings::default()
        };
        let (hub, notifier, _) = hub(settings, false);
        assert_eq!(hub.on_new_mail("a", "A", &[mail("1")]), 0);
        assert!(notifier.shown().is_empty());
    }

    #[test]
    fn do_not_disturb_suppresses() {
        let (hub, notifier, _) = hub(NotificationSettings::default(), true);
        assert_eq!(hub.on_new_mail("a", "A", &[mail("1")]), 0);
        assert!(notifier.shown().is_empty());
    }
}
