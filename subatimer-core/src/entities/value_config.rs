//! Per-(kind, meta) value configuration.

use crate::catalog::{EventKind, Platform};
use compact_str::CompactString;

/// Meta used when an event carries no tier/variant information.
pub const DEFAULT_META: &str = "DEFAULT";

/// One configured mapping from an event occurrence to accrual values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub kind: EventKind,
    /// Tier code ("1000", "2000", "Prime", ...) or [`DEFAULT_META`].
    pub meta: CompactString,
    /// Seconds granted per unit.
    pub seconds: i64,
    /// Points granted per unit.
    pub points: i64,
}

impl ValueEntry {
    pub fn new(kind: EventKind, meta: impl Into<CompactString>, seconds: i64, points: i64) -> Self {
        Self {
            kind,
            meta: meta.into(),
            seconds,
            points,
        }
    }
}

/// A proposed update to a single [`ValueEntry`].
///
/// The platform is redundant (source derives from kind) and exists so a
/// patch produced against a stale catalog can be rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuePatch {
    pub kind: EventKind,
    pub meta: CompactString,
    pub platform: Platform,
    pub seconds: Option<i64>,
    pub points: Option<i64>,
}

/// The configuration seeded into an empty store on first run.
///
/// Twitch tiers use the native tier codes; monetary kinds grant per unit
/// of the base currency; cheers grant per 100 bits.
pub fn seed_entries() -> Vec<ValueEntry> {
    let mut entries = Vec::new();

    for kind in [
        EventKind::Subscription,
        EventKind::Resubscription,
        EventKind::GiftedSub,
        EventKind::GiftBomb,
    ] {
        entries.push(ValueEntry::new(kind, "1000", 300, 1));
        entries.push(ValueEntry::new(kind, "2000", 600, 2));
        entries.push(ValueEntry::new(kind, "3000", 1500, 5));
        entries.push(ValueEntry::new(kind, "Prime", 300, 1));
        entries.push(ValueEntry::new(kind, DEFAULT_META, 300, 1));
    }

    entries.push(ValueEntry::new(EventKind::Cheer, DEFAULT_META, 30, 1));
    entries.push(ValueEntry::new(EventKind::Raid, DEFAULT_META, 0, 0));
    entries.push(ValueEntry::new(EventKind::HypeTrain, DEFAULT_META, 0, 0));

    entries.push(ValueEntry::new(EventKind::Membership, DEFAULT_META, 300, 1));
    entries.push(ValueEntry::new(EventKind::MembershipGift, DEFAULT_META, 300, 1));
    entries.push(ValueEntry::new(EventKind::SuperChat, DEFAULT_META, 60, 1));
    entries.push(ValueEntry::new(EventKind::SuperSticker, DEFAULT_META, 60, 1));

    entries.push(ValueEntry::new(EventKind::Tip, DEFAULT_META, 60, 1));
    entries.push(ValueEntry::new(EventKind::Donation, DEFAULT_META, 60, 1));
    entries.push(ValueEntry::new(EventKind::KofiSubscription, DEFAULT_META, 60, 1));
    entries.push(ValueEntry::new(EventKind::ShopOrder, DEFAULT_META, 60, 1));
    entries.push(ValueEntry::new(EventKind::StreamlabsDonation, DEFAULT_META, 60, 1));

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_covers_every_accruing_kind_with_a_default() {
        let entries = seed_entries();
        for kind in EventKind::ALL {
            if matches!(kind, EventKind::ChatCommand | EventKind::Unknown) {
                continue;
            }
            assert!(
                entries
                    .iter()
                    .any(|e| e.kind == kind && e.meta == DEFAULT_META),
                "missing default entry for {kind}"
            );
        }
    }

    #[test]
    fn seed_has_no_duplicate_keys() {
        let entries = seed_entries();
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                assert!(
                    !(a.kind == b.kind && a.meta == b.meta),
                    "duplicate seed key {:?}/{}",
                    a.kind,
                    a.meta
                );
            }
        }
    }
}
