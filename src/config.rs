use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::mail::{AccountId, DEFAULT_ACCOUNT_ID};

const APP_DIR: &str = "multimail";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_mailbox_url")]
    pub mailbox_url: String,
    #[serde(default = "default_accounts_url")]
    pub accounts_url: String,
    #[serde(default)]
    pub title_bar_style: TitleBarStyle,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_dedup_clear")]
    pub dedup_clear_secs: u64,
    #[serde(default)]
    pub accounts: Vec<AccountEntry>,
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub user_agent: UserAgentSettings,
    /// Where isolated session partitions live; defaults to the data dir.
    pub data_dir: Option<String>,
    /// Troubleshooting page offered when sign-in is rejected.
    pub help_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AccountEntry {
    pub id: AccountId,
    pub label: String,
    #[serde(default)]
    pub selected: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TitleBarStyle {
    #[default]
    App,
    System,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub show_sender: bool,
    pub show_subject: bool,
    pub show_summary: bool,
    pub play_sound: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            show_sender: true,
            show_subject: true,
            show_summary: true,
            play_sound: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserAgentSettings {
    /// Overrides the outgoing user agent when non-empty.
    #[serde(default)]
    pub custom: String,
    /// Use the platform fix string instead of the runtime default.
    #[serde(default = "default_true")]
    pub auto_fix: bool,
}

impl Default for UserAgentSettings {
    fn default() -> Self {
        Self {
            custom: String::new(),
            auto_fix: true,
        }
    }
}

fn default_mailbox_url() -> String {
    "https://mail.google.com/mail/u/0/".to_string()
}

fn default_accounts_url() -> String {
    "https://accounts.google.com".to_string()
}

fn default_poll_interval() -> u64 {
    10
}

fn default_dedup_clear() -> u64 {
    30 * 60
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mailbox_url: default_mailbox_url(),
            accounts_url: default_accounts_url(),
            title_bar_style: TitleBarStyle::default(),
            poll_interval_secs: default_poll_interval(),
            dedup_clear_secs: default_dedup_clear(),
            accounts: vec![AccountEntry {
                id: DEFAULT_ACCOUNT_ID.to_string(),
                label: "Default".to_string(),
                selected: true,
            }],
            notifications: NotificationSettings::default(),
            user_agent: UserAgentSettings::default(),
            data_dir: None,
            help_url: None,
        }
    }
}

impl Config {
    /// Drops duplicate account ids (first wins) and makes sure exactly one
    /// account is selected when any exist.
    pub fn normalize(&mut self) {
        let mut seen = HashSet::new();
        self.accounts.retain(|a| {
            let fresh = seen.insert(a.id.clone());
            if !fresh {
                log::warn!("Ignoring duplicate account id {}", a.id);
            }
            fresh
        });

        let first_selected = self.accounts.iter().position(|a| a.selected);
        let keep = first_selected.unwrap_or(0);
        for (idx, account) in self.accounts.iter_mut().enumerate() {
            account.selected = idx == keep;
        }
    }

    pub fn selected_account(&self) -> Option<&AccountEntry> {
        self.accounts.iter().find(|a| a.selected)
    }

    /// The user agent sessions should send, if any override applies.
    /// The platform fix wins over a custom value while `auto_fix` is on.
    pub fn effective_user_agent(&self) -> Option<String> {
        if self.user_agent.auto_fix {
            return Some(crate::session::policy::platform_user_agent_fix().to_string());
        }
        if !self.user_agent.custom.is_empty() {
            return Some(self.user_agent.custom.clone());
        }
        None
    }
}

pub fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow!("no config dir available"))?
        .join(APP_DIR))
}

pub fn config_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("config.toml");
    Ok(p)
}

pub fn default_data_dir() -> Result<PathBuf> {
    let p = dirs::data_dir()
        .ok_or_else(|| anyhow!("no data dir available"))?
        .join(APP_DIR);
    fs::create_dir_all(&p)?;
    Ok(p)
}

pub fn resolve_data_dir(cfg: &Config) -> Result<PathBuf> {
    if let Some(p) = &cfg.data_dir {
        Ok(PathBuf::from(p))
    } else {
        default_data_dir()
    }
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        // create a template config for users to edit
        let tom = toml::to_string_pretty(&Config::default())?;
        fs::write(path, tom)?;
        return Err(anyhow!(
            "Created template config at {}; edit it and run again",
            path.display()
        ));
    }
    let s = fs::read_to_string(path)?;
    let mut cfg: Config = toml::from_str(&s)?;
    cfg.normalize();
    Ok(cfg)
}
