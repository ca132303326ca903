use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, TitleBarStyle};
use crate::domain::mail::{AccountId, is_default_account};
use crate::error::{SessionError, SessionResult};
use crate::feed::transport::MailboxTransport;
use crate::session::bounds::{BoundsInput, Platform, compute_bounds};
use crate::session::host::{PermissionHandler, ViewHandle, ViewHost, ViewSpec};
use crate::session::poller::{PollState, PollerConfig, SessionCommand, SessionEvent, SessionPoller};
use crate::session::policy::{
    ContentFilter, NavigationDecision, NavigationPolicy, SignInRejected, SignInRemedy,
    is_sign_in_rejected, permission_allowed, sign_in_rejected_offer,
};

/// Builds the HTTP side of a session: `(account_id, partition)`.
pub type TransportFactory =
    Arc<dyn Fn(&str, Option<&str>) -> SessionResult<Arc<dyn MailboxTransport>> + Send + Sync>;

pub fn partition_key(account_id: &str) -> Option<String> {
    if is_default_account(account_id) {
        None
    } else {
        Some(format!("persist:{account_id}"))
    }
}

/// One live account: its view, its poller task and what it last reported.
pub struct AccountSession {
    pub account_id: AccountId,
    pub label: String,
    pub selected: bool,
    pub partition_key: Option<String>,
    pub view: ViewHandle,
    pub unread_count: u32,
    commands: mpsc::UnboundedSender<SessionCommand>,
    poll_state: watch::Receiver<PollState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl AccountSession {
    pub fn poll_state(&self) -> PollState {
        self.poll_state.borrow().clone()
    }

    pub fn send(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            log::debug!("[{}] session task gone, command dropped", self.account_id);
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub mailbox_url: String,
    pub accounts_url: String,
    pub title_bar_style: TitleBarStyle,
    pub platform: Platform,
    pub poller: PollerConfig,
    pub content_filter: ContentFilter,
    pub help_url: Option<String>,
}

impl RegistryOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            mailbox_url: cfg.mailbox_url.clone(),
            accounts_url: cfg.accounts_url.clone(),
            title_bar_style: cfg.title_bar_style,
            platform: Platform::current(),
            poller: PollerConfig {
                poll_interval: std::time::Duration::from_secs(cfg.poll_interval_secs.max(1)),
                dedup_clear_interval: std::time::Duration::from_secs(cfg.dedup_clear_secs.max(1)),
            },
            content_filter: ContentFilter::default(),
            help_url: cfg.help_url.clone(),
        }
    }
}

/// Owns every account session. Only the coordinator mutates it.
pub struct SessionRegistry {
    sessions: Vec<AccountSession>,
    host: Arc<dyn ViewHost>,
    transports: TransportFactory,
    events: mpsc::UnboundedSender<SessionEvent>,
    root_cancel: CancellationToken,
    navigation: NavigationPolicy,
    options: RegistryOptions,
    update_available: bool,
}

impl SessionRegistry {
    pub fn new(
        host: Arc<dyn ViewHost>,
        transports: TransportFactory,
        events: mpsc::UnboundedSender<SessionEvent>,
        root_cancel: CancellationToken,
        options: RegistryOptions,
    ) -> Self {
        Self {
            sessions: Vec::new(),
            host,
            transports,
            events,
            root_cancel,
            navigation: NavigationPolicy::new(&options.mailbox_url, &options.accounts_url),
            options,
            update_available: false,
        }
    }

    /// Must be called from inside a tokio runtime: spawns the poller.
    pub fn create(&mut self, account_id: &str, label: &str, is_top: bool) -> SessionResult<ViewHandle> {
        if self.position(account_id).is_some() {
            return Err(SessionError::DuplicateAccount(account_id.to_string()));
        }

        let partition = partition_key(account_id);
        let handler: PermissionHandler = Arc::new(permission_allowed);
        self.host
            .install_permission_handler(partition.as_deref(), handler);
        self.host
            .install_content_filter(partition.as_deref(), self.options.content_filter.clone());

        let transport = (self.transports)(account_id, partition.as_deref())?;
        let (view, signals) = self.host.create_view(&ViewSpec {
            account_id: account_id.to_string(),
            partition: partition.clone(),
        })?;
        if let Err(e) = self.host.load_url(view, &self.options.mailbox_url) {
            self.host.destroy(view);
            return Err(e);
        }

        let poller = SessionPoller::new(
            account_id.to_string(),
            view,
            self.host.clone(),
            transport,
            signals,
            self.events.clone(),
            self.options.poller,
        );
        let poll_state = poller.state();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel = self.root_cancel.child_token();
        let task = tokio::spawn(poller.run(commands_rx, cancel.clone()));

        self.sessions.push(AccountSession {
            account_id: account_id.to_string(),
            label: label.to_string(),
            selected: false,
            partition_key: partition,
            view,
            unread_count: 0,
            commands: commands_tx,
            poll_state,
            cancel,
            task,
        });
        log::info!("[{account_id}] session created ({view:?})");

        if is_top {
            self.select(account_id)?;
        }
        self.update_all_bounds();
        Ok(view)
    }

    /// Tears the session down: its timers and observer stop, the view is
    /// destroyed and its partition purged.
    pub fn remove(&mut self, account_id: &str) -> SessionResult<()> {
        let idx = self
            .position(account_id)
            .ok_or_else(|| SessionError::NotFound(account_id.to_string()))?;
        let session = self.sessions.remove(idx);
        let was_selected = session.selected;
        // the task ends on its own once cancelled
        drop(self.teardown(session, true));

        let next = self.sessions.first().map(|s| s.account_id.clone());
        if was_selected && let Some(next) = next {
            self.select(&next)?;
        }
        self.update_all_bounds();
        Ok(())
    }

    fn teardown(&self, session: AccountSession, purge: bool) -> JoinHandle<()> {
        session.cancel.cancel();
        self.host.detach(session.view);
        self.host.destroy(session.view);
        if purge
            && let Some(partition) = &session.partition_key
            && let Err(e) = self.host.purge_partition(partition)
        {
            log::warn!("[{}] could not purge storage: {e}", session.account_id);
        }
        log::info!("[{}] session removed", session.account_id);
        session.task
    }

    pub fn select(&mut self, account_id: &str) -> SessionResult<()> {
        let idx = self
            .position(account_id)
            .ok_or_else(|| SessionError::NotFound(account_id.to_string()))?;
        for (i, s) in self.sessions.iter_mut().enumerate() {
            s.selected = i == idx;
        }
        let session = &self.sessions[idx];
        self.host.set_top(session.view);
        self.host.focus(session.view);
        session.send(SessionCommand::Selected);
        Ok(())
    }

    pub fn lookup_by_account(&self, account_id: &str) -> SessionResult<&AccountSession> {
        self.sessions
            .iter()
            .find(|s| s.account_id == account_id)
            .ok_or_else(|| SessionError::NotFound(account_id.to_string()))
    }

    /// Reverse lookup for inbound events; unknown views are not an error.
    pub fn lookup_by_view(&self, view: ViewHandle) -> Option<&AccountSession> {
        self.sessions.iter().find(|s| s.view == view)
    }

    pub fn set_label(&mut self, account_id: &str, label: &str) -> SessionResult<()> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.account_id == account_id)
            .ok_or_else(|| SessionError::NotFound(account_id.to_string()))?;
        session.label = label.to_string();
        Ok(())
    }

    pub fn set_unread_count(&mut self, account_id: &str, count: u32) {
        if let Some(s) = self.sessions.iter_mut().find(|s| s.account_id == account_id) {
            s.unread_count = count;
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_multiple(&self) -> bool {
        self.sessions.len() > 1
    }

    pub fn selected(&self) -> Option<&AccountSession> {
        self.sessions.iter().find(|s| s.selected)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &AccountSession> {
        self.sessions.iter()
    }

    pub fn set_update_available(&mut self, available: bool) {
        if self.update_available != available {
            self.update_available = available;
            self.update_all_bounds();
        }
    }

    /// Call on every window resize.
    pub fn update_all_bounds(&self) {
        let (width, height) = self.host.window_size();
        let bounds = compute_bounds(
            BoundsInput {
                platform: self.options.platform,
                title_bar_style: self.options.title_bar_style,
                has_multiple: self.has_multiple(),
                update_available: self.update_available,
            },
            width,
            height,
        );
        for s in &self.sessions {
            self.host.set_bounds(s.view, bounds);
        }
    }

    /// Guard for navigations started inside a view. Foreign URLs are opened
    /// in the user's browser and cancelled in the view.
    pub fn on_navigation(&self, view: ViewHandle, url: &str) -> NavigationDecision {
        let decision = self.navigation.on_navigate(url);
        if let NavigationDecision::OpenExternal(target) = &decision {
            log::debug!("{view:?}: opening {target} externally");
            self.host.open_external(target);
        }
        decision
    }

    pub fn on_redirect(&self, view: ViewHandle, url: &str) -> NavigationDecision {
        let decision = self.navigation.on_redirect(url);
        if let NavigationDecision::Redirect(target) = &decision {
            if let Err(e) = self.host.load_url(view, target) {
                log::warn!("{view:?}: redirect to {target} failed: {e}");
            }
        }
        decision
    }

    /// Returns the remediation offer when the page landed on the
    /// sign-in-rejected screen. Nothing is applied until the user picks a
    /// remedy through [`apply_remedy`](Self::apply_remedy).
    pub fn on_page_loaded(&self, view: ViewHandle) -> Option<SignInRejected> {
        let url = self.host.current_url(view)?;
        if !is_sign_in_rejected(&url) {
            return None;
        }
        let account = self
            .lookup_by_view(view)
            .map(|s| s.account_id.as_str())
            .unwrap_or("?");
        log::warn!("[{account}] sign-in rejected at {url}");
        Some(sign_in_rejected_offer(self.options.help_url.as_deref()))
    }

    pub fn apply_remedy(&self, view: ViewHandle, remedy: &SignInRemedy) -> SessionResult<()> {
        match remedy {
            SignInRemedy::SwapUserAgent { user_agent } => {
                self.host.set_user_agent(user_agent);
                self.host.load_url(view, &self.options.mailbox_url)
            }
            SignInRemedy::OpenHelp { url } => {
                self.host.open_external(url);
                Ok(())
            }
        }
    }

    /// Stops every session without purging storage; used at process exit.
    pub async fn shutdown(&mut self) {
        let sessions: Vec<_> = self.sessions.drain(..).collect();
        let tasks: Vec<_> = sessions
            .into_iter()
            .map(|session| self.teardown(session, false))
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                log::warn!("session task ended abnormally: {e}");
            }
        }
    }

    fn position(&self, account_id: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.account_id == account_id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::feed::transport::testing::ScriptedTransport;
    use crate::session::bounds::Bounds;
    use crate::session::host::{HeadlessHost, ViewCommand};

    pub(crate) struct Fixture {
        pub registry: SessionRegistry,
        pub host: Arc<HeadlessHost>,
        pub events: mpsc::UnboundedReceiver<SessionEvent>,
        pub transports: Arc<std::sync::Mutex<Vec<(String, Arc<ScriptedTransport>)>>>,
        pub _dir: tempfile::TempDir,
    }

    impl Fixture {
        pub fn transport(&self, account_id: &str) -> Arc<ScriptedTransport> {
            self.transports
                .lock()
                .unwrap()
                .iter()
                .find(|(id, _)| id == account_id)
                .map(|(_, t)| t.clone())
                .unwrap()
        }
    }

    pub(crate) fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(HeadlessHost::new(dir.path()).with_window_size(1000, 700));
        let (tx, rx) = mpsc::unbounded_channel();
        let transports: Arc<std::sync::Mutex<Vec<(String, Arc<ScriptedTransport>)>>> =
            Arc::default();
        let made = transports.clone();
        let factory: TransportFactory = Arc::new(move |account_id, _partition| {
            let t = Arc::new(ScriptedTransport::default());
            made.lock().unwrap().push((account_id.to_string(), t.clone()));
            Ok(t as Arc<dyn MailboxTransport>)
        });
        let options = RegistryOptions {
            platform: Platform::Linux,
            ..RegistryOptions::from_config(&Config::default())
        };
        let registry = SessionRegistry::new(host.clone(), factory, tx, CancellationToken::new(), options);
        Fixture {
            registry,
            host,
            events: rx,
            transports,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn lookups_follow_create_and_remove() {
        let mut f = fixture();
        let a = f.registry.create("a", "A", true).unwrap();
        let b = f.registry.create("b", "B", false).unwrap();

        assert!(f.registry.lookup_by_account("a").is_ok());
        assert_eq!(f.registry.lookup_by_view(b).map(|s| s.account_id.as_str()), Some("b"));
        assert_eq!(f.registry.count(), 2);
        assert!(f.registry.has_multiple());

        f.registry.remove("a").unwrap();
        assert!(matches!(
            f.registry.lookup_by_account("a"),
            Err(SessionError::NotFound(_))
        ));
        assert!(f.registry.lookup_by_view(a).is_none());
        assert!(f.registry.lookup_by_view(ViewHandle(999)).is_none());
        assert!(matches!(f.registry.remove("a"), Err(SessionError::NotFound(_))));
        assert!(!f.registry.has_multiple());
    }

    #[tokio::test]
    async fn duplicate_account_is_rejected() {
        let mut f = fixture();
        f.registry.create("a", "A", true).unwrap();
        assert!(matches!(
            f.registry.create("a", "Again", false),
            Err(SessionError::DuplicateAccount(_))
        ));
        assert_eq!(f.registry.count(), 1);
    }

    #[tokio::test]
    async fn default_account_shares_storage() {
        let mut f = fixture();
        f.registry.create("default", "Default", true).unwrap();
        f.registry.create("work", "Work", false).unwrap();

        assert_eq!(f.registry.lookup_by_account("default").unwrap().partition_key, None);
        assert_eq!(
            f.registry.lookup_by_account("work").unwrap().partition_key.as_deref(),
            Some("persist:work")
        );
        assert!(f.host.partition_path("persist:work").exists());
        assert_eq!(f.host.permission_allowed(Some("persist:work"), "notifications"), Some(false));
        assert_eq!(f.host.permission_allowed(None, "notifications"), Some(false));
        assert!(f.host.has_content_filter(Some("persist:work")));
    }

    #[tokio::test]
    async fn remove_purges_and_destroys() {
        let mut f = fixture();
        f.registry.create("a", "A", true).unwrap();
        let b = f.registry.create("b", "B", false).unwrap();
        let path = f.host.partition_path("persist:b");
        assert!(path.exists());

        f.registry.remove("b").unwrap();
        assert!(f.host.is_destroyed(b));
        assert!(!path.exists());
        assert_eq!(f.host.live_views(), 1);
    }

    #[tokio::test]
    async fn removing_selected_session_selects_another() {
        let mut f = fixture();
        f.registry.create("a", "A", true).unwrap();
        let b = f.registry.create("b", "B", false).unwrap();
        let c = f.registry.create("c", "C", false).unwrap();

        f.registry.remove("a").unwrap();
        assert_eq!(f.registry.selected().map(|s| s.account_id.as_str()), Some("b"));
        assert_eq!(f.host.top(), Some(b));
        assert_eq!(f.registry.sessions().filter(|s| s.selected).count(), 1);

        // removing an unselected session leaves the selection alone
        f.registry.remove("c").unwrap();
        assert!(f.host.is_destroyed(c));
        assert_eq!(f.registry.selected().map(|s| s.account_id.as_str()), Some("b"));

        f.registry.remove("b").unwrap();
        assert!(f.registry.selected().is_none());
        assert_eq!(f.host.top(), None);
    }

    #[tokio::test]
    async fn label_can_be_edited() {
        let mut f = fixture();
        f.registry.create("a", "A", true).unwrap();
        f.registry.set_label("a", "Personal").unwrap();
        assert_eq!(f.registry.lookup_by_account("a").unwrap().label, "Personal");
        assert!(matches!(
            f.registry.set_label("zzz", "x"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn select_promotes_exactly_one() {
        let mut f = fixture();
        let a = f.registry.create("a", "A", true).unwrap();
        let b = f.registry.create("b", "B", false).unwrap();
        assert_eq!(f.host.top(), Some(a));

        f.registry.select("b").unwrap();
        assert_eq!(f.host.top(), Some(b));
        assert_eq!(f.host.focused(), Some(b));
        let selected: Vec<_> = f.registry.sessions().filter(|s| s.selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].account_id, "b");

        assert!(matches!(f.registry.select("zzz"), Err(SessionError::NotFound(_))));

        // the session task forwards Selected into its view
        for _ in 0..50 {
            if f.host.commands(b).contains(&ViewCommand::Selected) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(f.host.commands(b).contains(&ViewCommand::Selected));
    }

    #[tokio::test]
    async fn bounds_follow_account_count_and_update_flag() {
        let mut f = fixture();
        let a = f.registry.create("a", "A", true).unwrap();
        assert_eq!(f.host.bounds(a), Some(Bounds { offset_y: 30, width: 1000, height: 670 }));

        f.registry.create("b", "B", false).unwrap();
        assert_eq!(f.host.bounds(a).unwrap().offset_y, 70);

        f.registry.set_update_available(true);
        assert_eq!(f.host.bounds(a).unwrap().offset_y, 110);

        f.registry.remove("b").unwrap();
        assert_eq!(f.host.bounds(a).unwrap().offset_y, 70);
    }

    #[tokio::test]
    async fn foreign_links_open_externally() {
        let mut f = fixture();
        let a = f.registry.create("a", "A", true).unwrap();

        assert_eq!(
            f.registry.on_navigation(a, "https://mail.google.com/mail/u/0/#sent"),
            NavigationDecision::Allow
        );
        assert_eq!(
            f.registry.on_navigation(a, "https://example.org/"),
            NavigationDecision::OpenExternal("https://example.org/".into())
        );
        assert_eq!(f.host.opened_external(), vec!["https://example.org/".to_string()]);
    }

    #[tokio::test]
    async fn landing_redirect_loads_service_login() {
        let mut f = fixture();
        let a = f.registry.create("a", "A", true).unwrap();

        let decision = f.registry.on_redirect(a, "https://www.google.com/gmail/about/");
        assert!(matches!(decision, NavigationDecision::Redirect(_)));
        assert_eq!(
            f.host.current_url(a).as_deref(),
            Some("https://accounts.google.com/ServiceLogin?service=mail&color_scheme=dark")
        );
    }

    #[tokio::test]
    async fn rejected_sign_in_is_offered_not_applied() {
        let mut f = fixture();
        let a = f.registry.create("a", "A", true).unwrap();
        assert!(f.registry.on_page_loaded(a).is_none());

        f.host
            .set_page_url(a, "https://accounts.google.com/v3/signin/rejected?continue=x");
        let offer = f.registry.on_page_loaded(a).unwrap();
        assert_eq!(f.host.user_agent(), None);

        f.registry.apply_remedy(a, &offer.remedies[0]).unwrap();
        assert!(f.host.user_agent().is_some());
        assert_eq!(
            f.host.current_url(a).as_deref(),
            Some("https://mail.google.com/mail/u/0/")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn removed_session_stops_polling() {
        let mut f = fixture();
        f.registry.create("a", "A", true).unwrap();
        f.registry.create("b", "B", false).unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(15)).await;
        let b_requests = f.transport("b").requested().len();
        assert_eq!(b_requests, 2);

        f.registry.remove("b").unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        assert_eq!(f.transport("b").requested().len(), b_requests);
        assert!(f.transport("a").requested().len() > b_requests);

        f.registry.shutdown().await;
        assert_eq!(f.registry.count(), 0);
    }
}
