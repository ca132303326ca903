//! The embedding runtime that renders account views.
//!
//! Window chrome, page rendering and rule installation live outside this
//! crate; sessions only talk to them through [`ViewHost`].

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::{SessionError, SessionResult};
use crate::feed::FeedVariant;
use crate::session::bounds::Bounds;
use crate::session::policy::ContentFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewHandle(pub u64);

pub type PermissionHandler = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSpec {
    pub account_id: String,
    /// `None` shares the application's default storage.
    pub partition: Option<String>,
}

/// Live page state the runtime observes inside a view.
pub struct PageSignals {
    /// Layout the page reports for the inbox.
    pub inbox_variant: watch::Receiver<FeedVariant>,
    /// Count shown next to the inbox link, read with [`indicator_count`].
    /// `None` only while the inbox link itself is missing from the page.
    pub unread_indicator: watch::Receiver<Option<u32>>,
}

/// Parses the unread indicator's text. The page leaves it empty when
/// nothing is unread, so empty or unreadable text counts as 0.
pub fn indicator_count(text: &str) -> u32 {
    let digits: String = text.chars().filter(|c| !matches!(c, ',' | '.' | ' ')).collect();
    digits.parse().unwrap_or(0)
}

/// Messages delivered into a view's page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    /// Replace the location fragment, e.g. `#inbox/123`.
    Navigate(String),
    /// Re-render the message list.
    RefreshInbox,
    /// Open the compose form, prefilling the recipient when given.
    Compose { to: Option<String> },
    /// The view became the visible one.
    Selected,
}

pub trait ViewHost: Send + Sync {
    fn create_view(&self, spec: &ViewSpec) -> SessionResult<(ViewHandle, PageSignals)>;
    fn install_permission_handler(&self, partition: Option<&str>, handler: PermissionHandler);
    fn install_content_filter(&self, partition: Option<&str>, filter: ContentFilter);
    fn load_url(&self, view: ViewHandle, url: &str) -> SessionResult<()>;
    fn current_url(&self, view: ViewHandle) -> Option<String>;
    fn set_top(&self, view: ViewHandle);
    fn focus(&self, view: ViewHandle);
    fn set_bounds(&self, view: ViewHandle, bounds: Bounds);
    fn send(&self, view: ViewHandle, command: ViewCommand);
    fn detach(&self, view: ViewHandle);
    fn destroy(&self, view: ViewHandle);
    fn purge_partition(&self, partition: &str) -> SessionResult<()>;
    fn set_user_agent(&self, user_agent: &str);
    fn open_external(&self, url: &str);
    fn show_main_window(&self);
    fn window_size(&self) -> (u32, u32);
}

struct HeadlessView {
    partition: Option<String>,
    url: String,
    bounds: Bounds,
    attached: bool,
    commands: Vec<ViewCommand>,
    inbox_variant: watch::Sender<FeedVariant>,
    unread_indicator: watch::Sender<Option<u32>>,
}

#[derive(Default)]
struct HeadlessState {
    next_id: u64,
    views: BTreeMap<ViewHandle, HeadlessView>,
    destroyed: Vec<ViewHandle>,
    top: Option<ViewHandle>,
    focused: Option<ViewHandle>,
    permission_handlers: HashMap<Option<String>, PermissionHandler>,
    content_filters: HashMap<Option<String>, ContentFilter>,
    user_agent: Option<String>,
    opened_external: Vec<String>,
    main_window_shows: u32,
}

/// Host without a window: keeps view state in memory and partitions as
/// directories under `root/Partitions`. Page state is driven through the
/// `set_*` methods.
pub struct HeadlessHost {
    root: PathBuf,
    window: (u32, u32),
    launch_browser: bool,
    state: Mutex<HeadlessState>,
}

impl HeadlessHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            window: (860, 600),
            launch_browser: false,
            state: Mutex::new(HeadlessState::default()),
        }
    }

    /// Open external links with the system browser instead of only recording them.
    pub fn with_browser(mut self) -> Self {
        self.launch_browser = true;
        self
    }

    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window = (width, height);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        // poisoned state is still consistent: every write is a single assignment
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn partition_path(&self, partition: &str) -> PathBuf {
        let name = partition.strip_prefix("persist:").unwrap_or(partition);
        self.root.join("Partitions").join(name)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn set_unread_indicator(&self, view: ViewHandle, count: Option<u32>) {
        if let Some(v) = self.lock().views.get(&view) {
            v.unread_indicator.send_replace(count);
        }
    }

    /// Simulates the page's inbox link: `None` when the link is missing,
    /// otherwise the indicator text next to it.
    pub fn set_unread_indicator_text(&self, view: ViewHandle, text: Option<&str>) {
        self.set_unread_indicator(view, text.map(indicator_count));
    }

    pub fn set_inbox_variant(&self, view: ViewHandle, variant: FeedVariant) {
        if let Some(v) = self.lock().views.get(&view) {
            v.inbox_variant.send_replace(variant);
        }
    }

    /// Simulates the page moving to `url` on its own.
    pub fn set_page_url(&self, view: ViewHandle, url: &str) {
        if let Some(v) = self.lock().views.get_mut(&view) {
            v.url = url.to_string();
        }
    }

    pub fn commands(&self, view: ViewHandle) -> Vec<ViewCommand> {
        self.lock()
            .views
            .get(&view)
            .map(|v| v.commands.clone())
            .unwrap_or_default()
    }

    pub fn bounds(&self, view: ViewHandle) -> Option<Bounds> {
        self.lock().views.get(&view).map(|v| v.bounds)
    }

    pub fn top(&self) -> Option<ViewHandle> {
        self.lock().top
    }

    pub fn focused(&self) -> Option<ViewHandle> {
        self.lock().focused
    }

    pub fn is_attached(&self, view: ViewHandle) -> bool {
        self.lock().views.get(&view).is_some_and(|v| v.attached)
    }

    pub fn is_destroyed(&self, view: ViewHandle) -> bool {
        self.lock().destroyed.contains(&view)
    }

    pub fn live_views(&self) -> usize {
        self.lock().views.len()
    }

    pub fn permission_allowed(&self, partition: Option<&str>, permission: &str) -> Option<bool> {
        self.lock()
            .permission_handlers
            .get(&partition.map(str::to_string))
            .map(|h| h(permission))
    }

    pub fn has_content_filter(&self, partition: Option<&str>) -> bool {
        self.lock()
            .content_filters
            .contains_key(&partition.map(str::to_string))
    }

    pub fn user_agent(&self) -> Option<String> {
        self.lock().user_agent.clone()
    }

    pub fn opened_external(&self) -> Vec<String> {
        self.lock().opened_external.clone()
    }

    pub fn main_window_shows(&self) -> u32 {
        self.lock().main_window_shows
    }
}

impl ViewHost for HeadlessHost {
    fn create_view(&self, spec: &ViewSpec) -> SessionResult<(ViewHandle, PageSignals)> {
        if let Some(partition) = &spec.partition {
            fs::create_dir_all(self.partition_path(partition))
                .map_err(|e| SessionError::Host(format!("create partition {partition}: {e}")))?;
        }

        let (variant_tx, variant_rx) = watch::channel(FeedVariant::Classic);
        let (unread_tx, unread_rx) = watch::channel(None);

        let mut state = self.lock();
        state.next_id += 1;
        let handle = ViewHandle(state.next_id);
        state.views.insert(
            handle,
            HeadlessView {
                partition: spec.partition.clone(),
                url: String::new(),
                bounds: Bounds::default(),
                attached: true,
                commands: Vec::new(),
                inbox_variant: variant_tx,
                unread_indicator: unread_tx,
            },
        );
        log::debug!("Created view {:?} for {}", handle, spec.account_id);

        Ok((
            handle,
            PageSignals {
                inbox_variant: variant_rx,
                unread_indicator: unread_rx,
            },
        ))
    }

    fn install_permission_handler(&self, partition: Option<&str>, handler: PermissionHandler) {
        self.lock()
            .permission_handlers
            .insert(partition.map(str::to_string), handler);
    }

    fn install_content_filter(&self, partition: Option<&str>, filter: ContentFilter) {
        self.lock()
            .content_filters
            .insert(partition.map(str::to_string), filter);
    }

    fn load_url(&self, view: ViewHandle, url: &str) -> SessionResult<()> {
        let mut state = self.lock();
        let v = state
            .views
            .get_mut(&view)
            .ok_or_else(|| SessionError::Host(format!("unknown view {view:?}")))?;
        v.url = url.to_string();
        Ok(())
    }

    fn current_url(&self, view: ViewHandle) -> Option<String> {
        self.lock().views.get(&view).map(|v| v.url.clone())
    }

    fn set_top(&self, view: ViewHandle) {
        let mut state = self.lock();
        if state.views.contains_key(&view) {
            state.top = Some(view);
        }
    }

    fn focus(&self, view: ViewHandle) {
        let mut state = self.lock();
        if state.views.contains_key(&view) {
            state.focused = Some(view);
        }
    }

    fn set_bounds(&self, view: ViewHandle, bounds: Bounds) {
        if let Some(v) = self.lock().views.get_mut(&view) {
            v.bounds = bounds;
        }
    }

    fn send(&self, view: ViewHandle, command: ViewCommand) {
        let mut state = self.lock();
        let Some(v) = state.views.get_mut(&view) else {
            log::debug!("Dropping {command:?} for unknown view {view:?}");
            return;
        };
        if let ViewCommand::Navigate(fragment) = &command {
            let base = v.url.split('#').next().unwrap_or_default().to_string();
            v.url = format!("{base}{fragment}");
        }
        v.commands.push(command);
    }

    fn detach(&self, view: ViewHandle) {
        let mut state = self.lock();
        if let Some(v) = state.views.get_mut(&view) {
            v.attached = false;
        }
        if state.top == Some(view) {
            state.top = None;
        }
        if state.focused == Some(view) {
            state.focused = None;
        }
    }

    fn destroy(&self, view: ViewHandle) {
        let mut state = self.lock();
        if let Some(v) = state.views.remove(&view) {
            log::debug!("Destroyed view {:?} ({:?})", view, v.partition);
            state.destroyed.push(view);
        }
    }

    fn purge_partition(&self, partition: &str) -> SessionResult<()> {
        let path = self.partition_path(partition);
        if path.exists() {
            fs::remove_dir_all(&path)
                .map_err(|e| SessionError::Host(format!("purge {}: {e}", path.display())))?;
        }
        Ok(())
    }

    fn set_user_agent(&self, user_agent: &str) {
        self.lock().user_agent = Some(user_agent.to_string());
    }

    fn open_external(&self, url: &str) {
        self.lock().opened_external.push(url.to_string());
        if self.launch_browser {
            if let Err(e) = open::that(url) {
                log::warn!("Could not open {url} in the browser: {e}");
            }
        }
    }

    fn show_main_window(&self) {
        self.lock().main_window_shows += 1;
    }

    fn window_size(&self) -> (u32, u32) {
        self.window
    }
}
