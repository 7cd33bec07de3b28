//! Operator command parsing.
//!
//! Raw chat text comes in, a typed [`SupportEvent`] comes out — or nothing,
//! when the command is unknown, the user lacks permission, or a parameter
//! does not validate. Rejections are reported on the error surface, never
//! raised.

use crate::catalog::{CommandKind, EventKind, Platform};
use crate::entities::{EventId, SupportEvent};
use crate::events::{ErrorSink, OverlayRefreshSender};
use crate::settings::{CommandRule, Settings};
use compact_str::CompactString;
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};
use tracing::debug;

/// Who sent the message and with which roles.
#[derive(Debug, Clone, Copy)]
pub struct ChatContext<'a> {
    pub platform: Platform,
    pub user: &'a str,
    pub is_broadcaster: bool,
    pub is_moderator: bool,
    pub is_vip: bool,
    /// Platform timestamp; absent falls back to now.
    pub sent_at: Option<OffsetDateTime>,
}

/// An accepted command.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCommand {
    /// Queue this event for the accrual pipeline.
    Queue(SupportEvent),
    /// Broadcast an overlay refresh directly; never queued.
    RefreshOverlays,
}

/// Parses chat messages against a registration table built once from a
/// settings snapshot. Rebuilt by the composition root on reload.
pub struct CommandParser {
    prefix: char,
    registry: HashMap<String, CommandRule>,
    overlay_tx: OverlayRefreshSender,
    errors: ErrorSink,
}

impl CommandParser {
    pub fn new(settings: &Settings, overlay_tx: OverlayRefreshSender, errors: ErrorSink) -> Self {
        let registry = settings
            .commands
            .iter()
            .map(|rule| (rule.name.to_lowercase(), rule.clone()))
            .collect();
        Self {
            prefix: settings.command_prefix,
            registry,
            overlay_tx,
            errors,
        }
    }

    /// Parse one chat message. `None` means rejected or not a command.
    pub fn parse(&self, ctx: &ChatContext<'_>, raw: &str) -> Option<ParsedCommand> {
        let mut tokens = raw.split_whitespace();
        let first = tokens.next()?;
        let name = first.strip_prefix(self.prefix)?;
        let rule = self.registry.get(&name.to_lowercase())?;

        if !self.permitted(ctx, rule) {
            self.errors.rejected(
                "command",
                format!("{} may not use {}{}", ctx.user, self.prefix, rule.name),
            );
            return None;
        }

        let rest: Vec<&str> = tokens.collect();
        let payload = rest.join(" ");

        let (value, seconds_value, points_value): (CompactString, Option<i64>, Option<i64>) =
            if rule.command.is_bare() {
                if rule.command == CommandKind::RefreshOverlays {
                    debug!(user = ctx.user, "Overlay refresh requested");
                    // No subscribers is fine; overlays may not be open.
                    let _ = self.overlay_tx.send(());
                    return Some(ParsedCommand::RefreshOverlays);
                }
                (CompactString::from(rule.name.as_str()), None, None)
            } else if rule.command.is_points() {
                let points = self.parse_points(rule, &rest)?;
                (CompactString::from(payload.as_str()), None, Some(points))
            } else if rule.command.is_duration() {
                let seconds = self.parse_time(rule, &rest)?;
                (CompactString::from(payload.as_str()), Some(seconds), None)
            } else {
                // SetMultiplier: the payload grammar never rejects (it falls
                // back to "stop"), so it is validated at apply time.
                (CompactString::from(payload.as_str()), None, None)
            };

        let sent_at = ctx.sent_at.unwrap_or_else(OffsetDateTime::now_utc);
        let id = EventId::derived(
            Platform::Manual,
            &[
                &ctx.platform.to_string(),
                ctx.user,
                &rule.name,
                &payload,
                &sent_at.unix_timestamp().to_string(),
            ],
        );

        let mut event = SupportEvent::new(id, EventKind::ChatCommand, sent_at);
        event.command = Some(rule.command);
        event.value = value;
        event.seconds_value = seconds_value;
        event.points_value = points_value;
        debug!(user = ctx.user, command = %rule.command, "Accepted operator command");
        Some(ParsedCommand::Queue(event))
    }

    /// Broadcasters always pass; moderators/VIPs pass when the rule allows
    /// their role; everyone else must be whitelisted.
    fn permitted(&self, ctx: &ChatContext<'_>, rule: &CommandRule) -> bool {
        ctx.is_broadcaster
            || (ctx.is_moderator && rule.moderators)
            || (ctx.is_vip && rule.vips)
            || rule.whitelisted(ctx.user)
    }

    fn parse_points(&self, rule: &CommandRule, rest: &[&str]) -> Option<i64> {
        let parsed = rest.first().and_then(|token| token.parse::<i64>().ok());
        let Some(points) = parsed else {
            self.errors.rejected(
                "command",
                format!("{}{} needs an integer parameter", self.prefix, rule.name),
            );
            return None;
        };
        if rule.command != CommandKind::SetPoints && points <= 0 {
            self.errors.rejected(
                "command",
                format!("{}{} needs a positive amount", self.prefix, rule.name),
            );
            return None;
        }
        if rule.command == CommandKind::RemovePoints {
            Some(-points)
        } else {
            Some(points)
        }
    }

    fn parse_time(&self, rule: &CommandRule, rest: &[&str]) -> Option<i64> {
        let duration = parse_duration(&rest.concat());
        if duration.is_zero() {
            self.errors.rejected(
                "command",
                format!("{}{} needs a non-zero duration", self.prefix, rule.name),
            );
            return None;
        }
        let seconds = duration.whole_seconds();
        if rule.command == CommandKind::RemoveTime {
            Some(-seconds)
        } else {
            Some(seconds)
        }
    }
}

/// Parse the operator duration grammar into a [`Duration`].
///
/// Three forms, tried in order:
/// 1. Anything containing `:` is split on `.`/`:` into up to four numeric
///    fields, right-aligned to days:hours:minutes:seconds. Fields that do
///    not parse count as 0.
/// 2. A string of digits is a bare second count.
/// 3. Otherwise `<digits><d|h|m|s>` tokens (case-insensitive) are summed;
///    anything that does not match is ignored.
///
/// Empty or whitespace input is zero.
pub fn parse_duration(input: &str) -> Duration {
    let input = input.trim();
    if input.is_empty() {
        return Duration::ZERO;
    }

    if input.contains(':') {
        let fields: Vec<i64> = input
            .split(['.', ':'])
            .take(4)
            .map(|field| field.parse::<i64>().unwrap_or(0))
            .collect();
        // Right-align to (days, hours, minutes, seconds).
        let mut dhms = [0i64; 4];
        let offset = 4 - fields.len();
        for (slot, value) in dhms.iter_mut().skip(offset).zip(fields) {
            *slot = value;
        }
        return Duration::days(dhms[0])
            + Duration::hours(dhms[1])
            + Duration::minutes(dhms[2])
            + Duration::seconds(dhms[3]);
    }

    if input.chars().all(|c| c.is_ascii_digit()) {
        return Duration::seconds(input.parse::<i64>().unwrap_or(0));
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if !digits.is_empty() {
            let value = digits.parse::<i64>().unwrap_or(0);
            match c.to_ascii_lowercase() {
                'd' => total += Duration::days(value),
                'h' => total += Duration::hours(value),
                'm' => total += Duration::minutes(value),
                's' => total += Duration::seconds(value),
                _ => {}
            }
        }
        digits.clear();
    }
    total
}
