use url::Url;

/// Runtime permissions an embedded page may ask for. Notifications are
/// always refused: new-mail notifications come from the hub, not the page.
pub fn permission_allowed(permission: &str) -> bool {
    permission != "notifications"
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    Allow,
    /// Cancel in the view and hand the URL to the user's browser.
    OpenExternal(String),
    /// Cancel and load this URL in the view instead.
    Redirect(String),
}

/// Keeps each account view on the mailbox and sign-in origins.
#[derive(Debug, Clone)]
pub struct NavigationPolicy {
    mailbox_url: String,
    accounts_url: String,
}

impl NavigationPolicy {
    pub fn new(mailbox_url: impl Into<String>, accounts_url: impl Into<String>) -> Self {
        Self {
            mailbox_url: mailbox_url.into(),
            accounts_url: accounts_url.into(),
        }
    }

    pub fn is_in_domain(&self, url: &str) -> bool {
        url.starts_with(&self.mailbox_url) || url.starts_with(&self.accounts_url)
    }

    /// Decision for a user or page initiated navigation (links, new windows).
    pub fn on_navigate(&self, url: &str) -> NavigationDecision {
        if self.is_in_domain(url) {
            NavigationDecision::Allow
        } else {
            NavigationDecision::OpenExternal(url.to_string())
        }
    }

    /// Decision for a server redirect. The landing page is swapped for the
    /// service login and the legacy sign-in flow for the current one.
    pub fn on_redirect(&self, url: &str) -> NavigationDecision {
        if url.starts_with("https://www.google.com") {
            return NavigationDecision::Redirect(format!(
                "{}/ServiceLogin?service=mail&color_scheme=dark",
                self.accounts_url.trim_end_matches('/')
            ));
        }
        if url.starts_with(&self.accounts_url) && url.contains("WebLiteSignIn") {
            return NavigationDecision::Redirect(url.replace("WebLiteSignIn", "GlifWebSignIn"));
        }
        NavigationDecision::Allow
    }
}

pub fn is_sign_in_rejected(url: &str) -> bool {
    url.contains("signin/rejected")
}

/// Ways out of a rejected sign-in; the user picks one explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInRemedy {
    /// Switch the outgoing user agent and reload the view.
    SwapUserAgent { user_agent: String },
    /// Show the troubleshooting page in the browser.
    OpenHelp { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInRejected {
    pub message: String,
    pub remedies: Vec<SignInRemedy>,
}

pub fn sign_in_rejected_offer(help_url: Option<&str>) -> SignInRejected {
    let mut remedies = vec![SignInRemedy::SwapUserAgent {
        user_agent: platform_user_agent_fix().to_string(),
    }];
    if let Some(url) = help_url {
        remedies.push(SignInRemedy::OpenHelp {
            url: url.to_string(),
        });
    }
    SignInRejected {
        message: "It looks like you are unable to sign-in, because the mail provider is blocking the user agent in use.".to_string(),
        remedies,
    }
}

pub fn platform_user_agent_fix() -> &'static str {
    if cfg!(target_os = "macos") {
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15"
    } else if cfg!(target_os = "windows") {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0"
    } else {
        "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0"
    }
}

/// Host suffixes whose requests are dropped inside account views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFilter {
    blocked_hosts: Vec<String>,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new([
            "doubleclick.net",
            "google-analytics.com",
            "googletagmanager.com",
            "googlesyndication.com",
            "mailtrack.io",
            "mixmax.com",
            "yesware.com",
        ])
    }
}

impl ContentFilter {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blocked_hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_blocked(&self, url: &str) -> bool {
        let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) else {
            return false;
        };
        self.blocked_hosts
            .iter()
            .any(|b| host == *b || host.ends_with(&format!(".{b}")))
    }
}
