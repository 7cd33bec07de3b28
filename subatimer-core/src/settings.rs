//! Immutable settings snapshots.
//!
//! Components receive an `Arc<Settings>` at construction and never read a
//! mutable global. The daemon distributes new snapshots over a watch
//! channel when the configuration file is reloaded.

use crate::catalog::{CommandKind, EventKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Role/whitelist gate for one operator command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRule {
    /// The chat name the command is registered under, without the prefix.
    pub name: String,
    pub command: CommandKind,
    #[serde(default)]
    pub moderators: bool,
    #[serde(default)]
    pub vips: bool,
    /// Comma-separated usernames allowed regardless of role.
    #[serde(default)]
    pub whitelist: String,
}

impl CommandRule {
    pub fn new(name: impl Into<String>, command: CommandKind) -> Self {
        Self {
            name: name.into(),
            command,
            moderators: false,
            vips: false,
            whitelist: String::new(),
        }
    }

    /// Case-insensitive whitelist membership.
    pub fn whitelisted(&self, user: &str) -> bool {
        self.whitelist
            .split(',')
            .map(str::trim)
            .any(|entry| !entry.is_empty() && entry.eq_ignore_ascii_case(user))
    }
}

/// Currency normalizer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencySettings {
    /// The operator-chosen base currency everything normalizes into.
    pub base: String,
    /// Daily exchange-rate feed endpoint.
    pub feed_url: String,
    /// On-disk cache; its mtime decides staleness.
    pub cache_path: PathBuf,
}

/// Outbound webhook notifier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Absent disables the notifier entirely.
    pub url: Option<String>,
    #[serde(default = "default_webhook_username")]
    pub username: String,
    /// Event kinds forwarded to the sink; everything else is dropped.
    #[serde(default)]
    pub allowed_kinds: Vec<EventKind>,
    /// Whether simulated-source events are forwarded too.
    #[serde(default)]
    pub include_simulated: bool,
}

fn default_webhook_username() -> String {
    "subatimer".to_string()
}

/// One immutable configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_prefix")]
    pub command_prefix: char,
    #[serde(default = "default_command_rules")]
    pub commands: Vec<CommandRule>,
    pub currency: CurrencySettings,
    pub webhook: WebhookSettings,
}

fn default_prefix() -> char {
    '!'
}

/// The out-of-the-box command registration table.
pub fn default_command_rules() -> Vec<CommandRule> {
    [
        ("addtime", CommandKind::AddTime),
        ("removetime", CommandKind::RemoveTime),
        ("settime", CommandKind::SetTime),
        ("addpoints", CommandKind::AddPoints),
        ("removepoints", CommandKind::RemovePoints),
        ("setpoints", CommandKind::SetPoints),
        ("pause", CommandKind::Pause),
        ("resume", CommandKind::Resume),
        ("lock", CommandKind::Lock),
        ("unlock", CommandKind::Unlock),
        ("multiplier", CommandKind::SetMultiplier),
        ("stopmultiplier", CommandKind::StopMultiplier),
        ("refreshoverlays", CommandKind::RefreshOverlays),
    ]
    .into_iter()
    .map(|(name, command)| CommandRule::new(name, command))
    .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            command_prefix: default_prefix(),
            commands: default_command_rules(),
            currency: CurrencySettings {
                base: "USD".to_string(),
                feed_url: "https://open.er-api.com/v6/latest/USD".to_string(),
                cache_path: PathBuf::from("./rates-cache.json"),
            },
            webhook: WebhookSettings {
                url: None,
                username: default_webhook_username(),
                allowed_kinds: Vec::new(),
                include_simulated: false,
            },
        }
    }
}

/// Handle for distributing settings snapshots.
pub type SettingsSender = watch::Sender<Arc<Settings>>;
/// Handle for observing settings snapshots.
pub type SettingsReceiver = watch::Receiver<Arc<Settings>>;

/// Create the snapshot channel seeded with an initial configuration.
pub fn settings_channel(initial: Settings) -> (SettingsSender, SettingsReceiver) {
    watch::channel(Arc::new(initial))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_is_case_insensitive_and_comma_separated() {
        let mut rule = CommandRule::new("addtime", CommandKind::AddTime);
        rule.whitelist = "Alice, bob ,CAROL".to_string();
        assert!(rule.whitelisted("alice"));
        assert!(rule.whitelisted("BOB"));
        assert!(rule.whitelisted("carol"));
        assert!(!rule.whitelisted("mallory"));
        assert!(!rule.whitelisted(""));
    }

    #[test]
    fn default_rules_cover_every_command_kind_once() {
        let rules = default_command_rules();
        assert_eq!(rules.len(), 13);
        for rule in &rules {
            assert_eq!(
                rules.iter().filter(|r| r.command == rule.command).count(),
                1
            );
        }
    }
}
