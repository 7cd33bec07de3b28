//! Power-hour multiplier engine.
//!
//! Holds the current multiplier and answers the effective factor per
//! dimension. Also owns the textual grammar of the `multiplier` operator
//! command (`2.5xt 10m` style).

use crate::command::parse_duration;
use crate::entities::Multiplier;
use std::sync::RwLock;
use time::OffsetDateTime;
use tracing::{debug, info};

/// The two independently multipliable dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Time,
    Points,
}

/// Outcome of parsing a multiplier command payload.
///
/// Payloads that parse to nothing useful deliberately become `Stop`
/// rather than an error.
#[derive(Debug, Clone, PartialEq)]
pub enum MultiplierCommand {
    Start(Multiplier),
    Stop,
}

/// Parse the payload of a multiplier command.
///
/// The first whitespace token containing `x` and parseable as `<number>x`
/// supplies the magnitude; `p`/`t` inside that same token toggle the
/// points/time dimensions. Every other token containing a digit (and not
/// starting with `prefix`) is concatenated and parsed as a duration.
pub fn parse_multiplier_command(payload: &str, prefix: char, from_automatic: bool) -> MultiplierCommand {
    let mut magnitude: Option<f64> = None;
    let mut applies_to_time = false;
    let mut applies_to_points = false;
    let mut duration_text = String::new();

    for token in payload.split_whitespace() {
        // The x must terminate the number: "2x5t" is not a magnitude.
        if magnitude.is_none()
            && let Some(pos) = token.find(['x', 'X'])
        {
            let (number, rest) = token.split_at(pos);
            let flags = &rest[1..];
            if !number.is_empty()
                && flags.chars().all(|c| matches!(c, 'p' | 'P' | 't' | 'T'))
                && let Ok(parsed) = number.parse::<f64>()
            {
                magnitude = Some(parsed);
                applies_to_points = flags.contains(['p', 'P']);
                applies_to_time = flags.contains(['t', 'T']);
                continue;
            }
        }
        if token.chars().any(|c| c.is_ascii_digit()) && !token.starts_with(prefix) {
            duration_text.push_str(token);
        }
    }

    let Some(magnitude) = magnitude else {
        return MultiplierCommand::Stop;
    };
    if !applies_to_time && !applies_to_points {
        return MultiplierCommand::Stop;
    }
    if magnitude <= 0.0 || (magnitude - 1.0).abs() <= 0.001 {
        return MultiplierCommand::Stop;
    }

    let duration = parse_duration(&duration_text);
    MultiplierCommand::Start(Multiplier {
        magnitude,
        duration: (!duration.is_zero()).then_some(duration),
        started_at: None,
        applies_to_time,
        applies_to_points,
        from_automatic_source: from_automatic,
    })
}

/// The live multiplier state shared by resolution and command handling.
pub struct MultiplierEngine {
    state: RwLock<Multiplier>,
}

impl MultiplierEngine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Multiplier::NEUTRAL),
        }
    }

    /// Start from a persisted multiplier (daemon restart).
    pub fn with_state(multiplier: Multiplier) -> Self {
        Self {
            state: RwLock::new(multiplier),
        }
    }

    /// The effective factor for one dimension right now: 1.0 unless a
    /// running multiplier applies to that dimension.
    pub fn effective(&self, dimension: Dimension) -> f64 {
        let now = OffsetDateTime::now_utc();
        let Ok(state) = self.state.read() else {
            return 1.0;
        };
        if !state.is_running(now) {
            return 1.0;
        }
        let applies = match dimension {
            Dimension::Time => state.applies_to_time,
            Dimension::Points => state.applies_to_points,
        };
        if applies { state.magnitude } else { 1.0 }
    }

    /// Both snapshots at once, for stamping onto an event at resolution.
    pub fn snapshot(&self) -> (f64, f64) {
        (
            self.effective(Dimension::Time),
            self.effective(Dimension::Points),
        )
    }

    /// Install a new multiplier.
    ///
    /// An automatic trigger (hype train) never overrides a running
    /// operator multiplier; operator commands override anything.
    /// Returns whether the multiplier was installed.
    pub fn set(&self, mut multiplier: Multiplier) -> bool {
        let now = OffsetDateTime::now_utc();
        let Ok(mut state) = self.state.write() else {
            return false;
        };
        if multiplier.from_automatic_source
            && state.is_running(now)
            && !state.from_automatic_source
        {
            debug!("Ignoring automatic multiplier while an operator multiplier runs");
            return false;
        }
        if multiplier.started_at.is_none() {
            multiplier.started_at = Some(now);
        }
        info!(
            magnitude = multiplier.magnitude,
            time = multiplier.applies_to_time,
            points = multiplier.applies_to_points,
            "Multiplier set"
        );
        *state = multiplier;
        true
    }

    /// Reset to neutral. Returns whether anything was running.
    pub fn clear(&self) -> bool {
        let now = OffsetDateTime::now_utc();
        let Ok(mut state) = self.state.write() else {
            return false;
        };
        let was_running = state.is_running(now);
        *state = Multiplier::NEUTRAL;
        if was_running {
            info!("Multiplier cleared");
        }
        was_running
    }

    /// The stored multiplier, for persistence.
    pub fn current(&self) -> Multiplier {
        self.state
            .read()
            .map(|state| state.clone())
            .unwrap_or(Multiplier::NEUTRAL)
    }
}

impl Default for MultiplierEngine {
    fn default() -> Self {
        Self::new()
    }
}
