pub mod compose;
pub mod hub;
pub mod notifier;

use anyhow::{Result, anyhow};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::auth::token_store::{KeyringCredentials, SessionCredentials};
use crate::config::{AccountEntry, Config, resolve_data_dir};
use crate::daemon::compose::PlatformCaps;
use crate::daemon::hub::{LogIndicator, NotificationHub, SystemDoNotDisturb};
use crate::daemon::notifier::{DesktopNotifier, InteractionKind, NotificationInteraction};
use crate::error::SessionResult;
use crate::feed::transport::{HttpTransport, MailboxTransport};
use crate::ipc::{self, Request, Response};
use crate::session::host::{HeadlessHost, ViewHost};
use crate::session::poller::{SessionCommand, SessionEvent, SessionEventKind};
use crate::session::registry::{RegistryOptions, SessionRegistry, TransportFactory};

/// A control request waiting for its answer.
pub struct ControlRequest {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

/// Owns the registry and the hub. Every inbound message is handled to
/// completion before the next one is looked at.
pub struct Coordinator {
    registry: SessionRegistry,
    hub: NotificationHub,
    host: Arc<dyn ViewHost>,
    credentials: Arc<dyn SessionCredentials>,
}

impl Coordinator {
    pub fn new(
        registry: SessionRegistry,
        hub: NotificationHub,
        host: Arc<dyn ViewHost>,
        credentials: Arc<dyn SessionCredentials>,
    ) -> Self {
        Self {
            registry,
            hub,
            host,
            credentials,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    /// Creates a session per account; the selected one ends up on top.
    pub fn start_accounts(&mut self, accounts: &[AccountEntry]) -> SessionResult<()> {
        for account in accounts {
            self.registry
                .create(&account.id, &account.label, account.selected)?;
        }
        Ok(())
    }

    pub fn add_account(&mut self, account_id: &str, label: &str, select: bool) -> SessionResult<()> {
        // the first account is always the selected one
        let select = select || self.registry.count() == 0;
        self.registry.create(account_id, label, select)?;
        Ok(())
    }

    /// Tears the session down and forgets its stored credentials.
    pub fn remove_account(&mut self, account_id: &str) -> SessionResult<()> {
        self.registry.remove(account_id)?;
        self.hub.on_account_removed(account_id);
        if let Err(e) = self.credentials.forget(account_id) {
            log::warn!("[{account_id}] could not delete stored session cookie: {e}");
        }
        Ok(())
    }

    pub fn handle_session_event(&mut self, event: SessionEvent) {
        let Some(session) = self.registry.lookup_by_view(event.view) else {
            log::debug!("dropping event from unknown view {:?}", event.view);
            return;
        };
        let account_id = session.account_id.clone();
        let label = session.label.clone();

        match event.kind {
            SessionEventKind::UnreadCountChanged(count) => {
                self.registry.set_unread_count(&account_id, count);
                self.hub.on_unread_count(&account_id, count);
            }
            SessionEventKind::NewMail(entries) => {
                self.hub.on_new_mail(&account_id, &label, &entries);
            }
        }
    }

    pub fn handle_interaction(&mut self, interaction: NotificationInteraction) {
        let NotificationInteraction {
            account_id,
            message_id,
            kind,
        } = interaction;
        let Ok(session) = self.registry.lookup_by_account(&account_id) else {
            log::warn!("[{account_id}] interaction for a removed account ignored");
            return;
        };

        match kind {
            InteractionKind::Action(kind) => {
                session.send(SessionCommand::MailAction { message_id, kind });
            }
            InteractionKind::Clicked => {
                self.host.show_main_window();
                if let Err(e) = self.registry.select(&account_id) {
                    log::warn!("[{account_id}] could not select: {e}");
                    return;
                }
                if let Ok(session) = self.registry.lookup_by_account(&account_id) {
                    session.send(SessionCommand::OpenMail { message_id });
                }
            }
            InteractionKind::Dismissed => {
                log::debug!("[{account_id}] notification for {message_id} dismissed");
            }
        }
    }

    pub fn handle_request(&mut self, request: Request) -> Response {
        let result = match request {
            Request::Ping => Ok(Some("pong".to_string())),
            Request::Status => Ok(Some(self.status_text())),
            Request::Select { account } => self.registry.select(&account).map(|_| None),
            Request::GoTo {
                account,
                destination,
            } => self.registry.lookup_by_account(&account).map(|s| {
                s.send(SessionCommand::GoTo(destination));
                None
            }),
            Request::Compose { account, to } => self.registry.lookup_by_account(&account).map(|s| {
                s.send(SessionCommand::ComposeMail { to });
                None
            }),
            Request::Add {
                account,
                label,
                select,
            } => self.add_account(&account, &label, select).map(|_| None),
            Request::Edit { account, label } => self.registry.set_label(&account, &label).map(|_| None),
            Request::Remove { account } => self.remove_account(&account).map(|_| None),
        };

        match result {
            Ok(message) => Response {
                ok: true,
                message,
                unread: Some(self.hub.unread().total()),
            },
            Err(e) => Response {
                ok: false,
                message: Some(e.to_string()),
                unread: None,
            },
        }
    }

    fn status_text(&self) -> String {
        let mut out = String::new();
        for s in self.registry.sessions() {
            let marker = if s.selected { "*" } else { " " };
            let _ = writeln!(
                out,
                "{marker} {} ({}): {} unread, {:?}",
                s.account_id,
                s.label,
                s.unread_count,
                s.poll_state()
            );
        }
        out
    }

    /// Runs until `cancel` fires or every inbound channel closes, then
    /// stops all sessions.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        mut interactions: mpsc::UnboundedReceiver<NotificationInteraction>,
        mut control: mpsc::UnboundedReceiver<ControlRequest>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(event) = events.recv() => self.handle_session_event(event),
                Some(interaction) = interactions.recv() => self.handle_interaction(interaction),
                Some(ControlRequest { request, reply }) = control.recv() => {
                    let response = self.handle_request(request);
                    if reply.send(response).is_err() {
                        log::debug!("control client went away before the reply");
                    }
                }
                else => break,
            }
        }

        log::info!("Shutting down {} session(s)", self.registry.count());
        self.registry.shutdown().await;
    }
}

fn http_transports(cfg: &Config, credentials: Arc<dyn SessionCredentials>) -> TransportFactory {
    let mailbox_url = cfg.mailbox_url.clone();
    let user_agent = cfg.effective_user_agent();
    Arc::new(move |account_id, partition| {
        let cookie = match credentials.load(account_id) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("[{account_id}] session cookie unavailable: {e}");
                None
            }
        };
        log::debug!(
            "[{account_id}] transport for {} (cookie: {})",
            partition.unwrap_or("default storage"),
            cookie.is_some()
        );
        let transport = HttpTransport::new(&mailbox_url, user_agent.as_deref(), cookie.as_deref())?;
        Ok(Arc::new(transport) as Arc<dyn MailboxTransport>)
    })
}

pub async fn run_daemon(cfg: Config) -> Result<()> {
    if cfg.accounts.is_empty() {
        return Err(anyhow!("no accounts configured"));
    }

    let cancel = CancellationToken::new();
    let c2 = cancel.clone();
    ctrlc::set_handler(move || {
        c2.cancel();
    })?;

    let data_dir = resolve_data_dir(&cfg)?;
    let host: Arc<dyn ViewHost> = Arc::new(HeadlessHost::new(data_dir).with_browser());
    if let Some(ua) = cfg.effective_user_agent() {
        host.set_user_agent(&ua);
    }

    let (interactions_tx, interactions_rx) = mpsc::unbounded_channel();
    let hub = NotificationHub::new(
        cfg.notifications.clone(),
        PlatformCaps::current(),
        Arc::new(DesktopNotifier::new(interactions_tx)),
        Arc::new(LogIndicator),
        Arc::new(SystemDoNotDisturb),
    );

    let credentials: Arc<dyn SessionCredentials> = Arc::new(KeyringCredentials);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let registry = SessionRegistry::new(
        host.clone(),
        http_transports(&cfg, credentials.clone()),
        events_tx,
        cancel.clone(),
        RegistryOptions::from_config(&cfg),
    );

    let mut coordinator = Coordinator::new(registry, hub, host, credentials);
    coordinator.start_accounts(&cfg.accounts)?;
    log::info!("Daemon started with {} account(s)", cfg.accounts.len());

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let server = tokio::spawn(ipc::serve(ipc::socket_path()?, control_tx, cancel.clone()));

    coordinator
        .run(events_rx, interactions_rx, control_rx, cancel.clone())
        .await;

    cancel.cancel();
    server.await??;
    Ok(())
}
