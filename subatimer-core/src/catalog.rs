//! The closed catalog of support event kinds and their derived facts.
//!
//! Every fact that used to require a membership check (is this kind a gift?
//! which platform produces it?) lives in a single [`EventFacts`] record,
//! computed once per variant and looked up through [`EventKind::facts`].

use serde::{Deserialize, Serialize};

/// Where an event came from.
///
/// `Manual` marks operator chat commands; `Simulated` marks events injected
/// by the test/simulation surface so the notifier can filter them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "platform", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Twitch,
    Youtube,
    StreamElements,
    KoFi,
    Streamlabs,
    Manual,
    Simulated,
    Unknown,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Platform::Twitch => "twitch",
            Platform::Youtube => "youtube",
            Platform::StreamElements => "streamelements",
            Platform::KoFi => "kofi",
            Platform::Streamlabs => "streamlabs",
            Platform::Manual => "manual",
            Platform::Simulated => "simulated",
            Platform::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// The closed enumeration of everything the pipeline can accrue from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Subscription,
    Resubscription,
    GiftedSub,
    GiftBomb,
    Cheer,
    Raid,
    HypeTrain,
    Membership,
    MembershipGift,
    SuperChat,
    SuperSticker,
    Tip,
    Donation,
    KofiSubscription,
    ShopOrder,
    StreamlabsDonation,
    ChatCommand,
    Unknown,
}

/// Derived facts for one [`EventKind`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFacts {
    /// The platform this kind of event originates from. Source is a pure
    /// function of kind; value-config patches are validated against it.
    pub platform: Platform,
    /// Whether the event represents gifted memberships/subs.
    pub is_gift: bool,
    /// Whether the amount is denominated in bits rather than units.
    pub is_cheer: bool,
    /// Whether the raw value is a money amount in some currency.
    pub is_monetary: bool,
    /// Human-readable label used in notifier summaries.
    pub label: &'static str,
}

impl EventKind {
    /// Look up the derived facts for this variant.
    pub const fn facts(self) -> &'static EventFacts {
        macro_rules! facts {
            ($platform:ident, $gift:expr, $cheer:expr, $money:expr, $label:expr) => {
                &EventFacts {
                    platform: Platform::$platform,
                    is_gift: $gift,
                    is_cheer: $cheer,
                    is_monetary: $money,
                    label: $label,
                }
            };
        }
        match self {
            EventKind::Subscription => facts!(Twitch, false, false, false, "Subscription"),
            EventKind::Resubscription => facts!(Twitch, false, false, false, "Resubscription"),
            EventKind::GiftedSub => facts!(Twitch, true, false, false, "Gifted Sub"),
            EventKind::GiftBomb => facts!(Twitch, true, false, false, "Gift Bomb"),
            EventKind::Cheer => facts!(Twitch, false, true, false, "Cheer"),
            EventKind::Raid => facts!(Twitch, false, false, false, "Raid"),
            EventKind::HypeTrain => facts!(Twitch, false, false, false, "Hype Train"),
            EventKind::Membership => facts!(Youtube, false, false, false, "Membership"),
            EventKind::MembershipGift => facts!(Youtube, true, false, false, "Membership Gift"),
            EventKind::SuperChat => facts!(Youtube, false, false, true, "Super Chat"),
            EventKind::SuperSticker => facts!(Youtube, false, false, true, "Super Sticker"),
            EventKind::Tip => facts!(StreamElements, false, false, true, "Tip"),
            EventKind::Donation => facts!(KoFi, false, false, true, "Donation"),
            EventKind::KofiSubscription => {
                facts!(KoFi, false, false, true, "Ko-fi Subscription")
            }
            EventKind::ShopOrder => facts!(KoFi, false, false, true, "Shop Order"),
            EventKind::StreamlabsDonation => {
                facts!(Streamlabs, false, false, true, "Streamlabs Donation")
            }
            EventKind::ChatCommand => facts!(Manual, false, false, false, "Command"),
            EventKind::Unknown => facts!(Unknown, false, false, false, "Unknown"),
        }
    }

    /// All variants, in catalog order. Used for seeding value configuration.
    pub const ALL: [EventKind; 18] = [
        EventKind::Subscription,
        EventKind::Resubscription,
        EventKind::GiftedSub,
        EventKind::GiftBomb,
        EventKind::Cheer,
        EventKind::Raid,
        EventKind::HypeTrain,
        EventKind::Membership,
        EventKind::MembershipGift,
        EventKind::SuperChat,
        EventKind::SuperSticker,
        EventKind::Tip,
        EventKind::Donation,
        EventKind::KofiSubscription,
        EventKind::ShopOrder,
        EventKind::StreamlabsDonation,
        EventKind::ChatCommand,
        EventKind::Unknown,
    ];
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.facts().label)
    }
}

/// The typed operator command set.
///
/// Command names are bound to variants through an explicit registration
/// table built from settings at startup, never by reflective enum parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "command_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    AddTime,
    RemoveTime,
    SetTime,
    AddPoints,
    RemovePoints,
    SetPoints,
    Pause,
    Resume,
    Lock,
    Unlock,
    SetMultiplier,
    StopMultiplier,
    RefreshOverlays,
}

impl CommandKind {
    /// Whether the command takes no parameter at all.
    pub const fn is_bare(self) -> bool {
        matches!(
            self,
            CommandKind::Pause
                | CommandKind::Resume
                | CommandKind::Lock
                | CommandKind::Unlock
                | CommandKind::StopMultiplier
                | CommandKind::RefreshOverlays
        )
    }

    /// Whether the command takes an integer point parameter.
    pub const fn is_points(self) -> bool {
        matches!(
            self,
            CommandKind::AddPoints | CommandKind::RemovePoints | CommandKind::SetPoints
        )
    }

    /// Whether the command takes a duration parameter.
    pub const fn is_duration(self) -> bool {
        matches!(
            self,
            CommandKind::AddTime | CommandKind::RemoveTime | CommandKind::SetTime
        )
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommandKind::AddTime => "addtime",
            CommandKind::RemoveTime => "removetime",
            CommandKind::SetTime => "settime",
            CommandKind::AddPoints => "addpoints",
            CommandKind::RemovePoints => "removepoints",
            CommandKind::SetPoints => "setpoints",
            CommandKind::Pause => "pause",
            CommandKind::Resume => "resume",
            CommandKind::Lock => "lock",
            CommandKind::Unlock => "unlock",
            CommandKind::SetMultiplier => "multiplier",
            CommandKind::StopMultiplier => "stopmultiplier",
            CommandKind::RefreshOverlays => "refreshoverlays",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_is_a_pure_function_of_kind() {
        assert_eq!(EventKind::GiftBomb.facts().platform, Platform::Twitch);
        assert_eq!(EventKind::SuperChat.facts().platform, Platform::Youtube);
        assert_eq!(EventKind::ShopOrder.facts().platform, Platform::KoFi);
        assert_eq!(EventKind::ChatCommand.facts().platform, Platform::Manual);
    }

    #[test]
    fn monetary_kinds_are_flagged() {
        for kind in [
            EventKind::SuperChat,
            EventKind::SuperSticker,
            EventKind::Tip,
            EventKind::Donation,
            EventKind::ShopOrder,
            EventKind::StreamlabsDonation,
        ] {
            assert!(kind.facts().is_monetary, "{kind} should be monetary");
        }
        assert!(!EventKind::Cheer.facts().is_monetary);
        assert!(EventKind::Cheer.facts().is_cheer);
    }
}
