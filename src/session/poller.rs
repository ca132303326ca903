use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::auth::action_token::ActionAuthorizer;
use crate::domain::mail::{AccountId, ActionKind, Destination, MailFeedEntry};
use crate::error::SessionResult;
use crate::feed::FeedClient;
use crate::feed::dedup::{CLEAR_INTERVAL_SECS, Deduplicator};
use crate::feed::transport::MailboxTransport;
use crate::session::host::{PageSignals, ViewCommand, ViewHandle, ViewHost};

/// Commands the coordinator sends into one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    MailAction { message_id: String, kind: ActionKind },
    OpenMail { message_id: String },
    GoTo(Destination),
    ComposeMail { to: Option<String> },
    Selected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    UnreadCountChanged(u32),
    NewMail(Vec<MailFeedEntry>),
}

/// Event leaving a session. The coordinator resolves `view` to an account.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub view: ViewHandle,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    /// Last poll failed; the next tick retries.
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTrigger {
    Timer,
    /// Out-of-cycle poll after the page's unread indicator moved.
    IndicatorChanged,
}

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub dedup_clear_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            dedup_clear_interval: Duration::from_secs(CLEAR_INTERVAL_SECS),
        }
    }
}

/// Feed polling for one account, run as that session's own task.
pub struct SessionPoller {
    account_id: AccountId,
    view: ViewHandle,
    host: Arc<dyn ViewHost>,
    feed: FeedClient,
    dedup: Deduplicator,
    authorizer: Arc<ActionAuthorizer>,
    signals: PageSignals,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Sender<PollState>,
    config: PollerConfig,
    /// `None` until a feed was received; then the last `<modified>` seen.
    previous_modified: Option<Option<DateTime<Utc>>>,
    initial_fetch: bool,
    last_indicator: Option<u32>,
}

impl SessionPoller {
    pub fn new(
        account_id: AccountId,
        view: ViewHandle,
        host: Arc<dyn ViewHost>,
        transport: Arc<dyn MailboxTransport>,
        signals: PageSignals,
        events: mpsc::UnboundedSender<SessionEvent>,
        config: PollerConfig,
    ) -> Self {
        let (state, _) = watch::channel(PollState::Idle);
        Self {
            account_id,
            view,
            host,
            feed: FeedClient::new(transport.clone()),
            dedup: Deduplicator::new(),
            authorizer: Arc::new(ActionAuthorizer::new(transport)),
            signals,
            events,
            state,
            config,
            previous_modified: None,
            initial_fetch: true,
            last_indicator: None,
        }
    }

    pub fn state(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        cancel: CancellationToken,
    ) {
        log::info!("[{}] session poller started", self.account_id);

        let mut poll_tick = time::interval(self.config.poll_interval);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let clear_every = self.config.dedup_clear_interval;
        let mut clear_tick = time::interval_at(Instant::now() + clear_every, clear_every);
        let mut observing = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = poll_tick.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.poll(PollTrigger::Timer) => {}
                    }
                }
                _ = clear_tick.tick() => self.dedup.clear(),
                changed = self.signals.unread_indicator.changed(), if observing => {
                    if changed.is_err() {
                        // the page is gone; keep polling the feed
                        observing = false;
                        continue;
                    }
                    // None: inbox link not rendered yet, nothing to read
                    let observed = *self.signals.unread_indicator.borrow_and_update();
                    if let Some(count) = observed.filter(|c| Some(*c) != self.last_indicator) {
                        self.last_indicator = Some(count);
                        self.emit(SessionEventKind::UnreadCountChanged(count));
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = self.poll(PollTrigger::IndicatorChanged) => {}
                        }
                    }
                }
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd, &cancel),
                    None => break,
                },
            }
        }

        log::info!("[{}] session poller stopped", self.account_id);
    }

    pub(crate) async fn poll(&mut self, trigger: PollTrigger) {
        self.state.send_replace(PollState::Polling);
        match self.poll_once(trigger).await {
            Ok(()) => {
                self.state.send_replace(PollState::Idle);
            }
            Err(e) => {
                log::warn!("[{}] feed poll failed: {}", self.account_id, e);
                self.state.send_replace(PollState::Error(e.to_string()));
            }
        }
    }

    async fn poll_once(&mut self, trigger: PollTrigger) -> SessionResult<()> {
        let variant = *self.signals.inbox_variant.borrow();
        log::debug!("[{}] checking feed ({:?})", self.account_id, variant);
        let doc = self.feed.fetch(variant).await?;

        let modified = match self.previous_modified {
            None => true,
            Some(previous) => doc.modified.is_none() || previous != doc.modified,
        };
        self.previous_modified = Some(doc.modified);

        if !modified {
            log::debug!("[{}] feed unchanged", self.account_id);
            return Ok(());
        }

        if trigger == PollTrigger::Timer {
            log::debug!("[{}] unread count {}", self.account_id, doc.unread_count);
            self.emit(SessionEventKind::UnreadCountChanged(doc.unread_count));
        }

        let fresh = self.dedup.filter(doc.entries, Utc::now());

        if self.initial_fetch {
            // mail that was already there at startup is not news
            self.initial_fetch = false;
            log::debug!(
                "[{}] initial fetch, suppressing {} new mail(s)",
                self.account_id,
                fresh.len()
            );
        } else if !fresh.is_empty() {
            log::info!("[{}] {} new mail(s)", self.account_id, fresh.len());
            self.emit(SessionEventKind::NewMail(fresh));
        }

        Ok(())
    }

    fn emit(&self, kind: SessionEventKind) {
        let event = SessionEvent {
            view: self.view,
            kind,
        };
        if self.events.send(event).is_err() {
            log::debug!("[{}] coordinator gone, dropping event", self.account_id);
        }
    }

    fn handle_command(&self, cmd: SessionCommand, cancel: &CancellationToken) {
        match cmd {
            SessionCommand::MailAction { message_id, kind } => {
                let account_id = self.account_id.clone();
                let authorizer = self.authorizer.clone();
                let host = self.host.clone();
                let view = self.view;
                let cancel = cancel.child_token();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        result = authorizer.perform(&message_id, kind) => match result {
                            Ok(()) => {
                                log::info!("[{account_id}] {kind:?} applied to {message_id}");
                                let on_inbox = host
                                    .current_url(view)
                                    .is_some_and(|url| showing_inbox(&url));
                                if on_inbox {
                                    host.send(view, ViewCommand::RefreshInbox);
                                }
                            }
                            Err(e) => {
                                log::warn!("[{account_id}] {kind:?} on {message_id} failed: {e}");
                            }
                        }
                    }
                });
            }
            SessionCommand::OpenMail { message_id } => {
                self.host
                    .send(self.view, ViewCommand::Navigate(format!("#inbox/{message_id}")));
            }
            SessionCommand::GoTo(destination) => {
                self.host
                    .send(self.view, ViewCommand::Navigate(destination.fragment().to_string()));
            }
            SessionCommand::ComposeMail { to } => {
                self.host.send(self.view, ViewCommand::Compose { to });
            }
            SessionCommand::Selected => {
                self.host.send(self.view, ViewCommand::Selected);
            }
        }
    }
}

fn showing_inbox(url: &str) -> bool {
    url.split_once('#')
        .is_some_and(|(_, fragment)| fragment.starts_with("inbox"))
}
