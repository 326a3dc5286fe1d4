//! Look-away tracking over time

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{GazeConfig, GazeLabel};

/// Flagging state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagState {
    #[default]
    Centered,
    /// Looking away, below the threshold
    Away { since: Instant },
    /// Looking away for at least the threshold
    Flagged { since: Instant },
}

/// Per-frame result of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagStatus {
    Centered,
    /// Away but not yet flagged, carrying the raw label
    Away(GazeLabel),
    Flagged,
}

impl FlagStatus {
    pub fn is_flagged(&self) -> bool {
        matches!(self, FlagStatus::Flagged)
    }
}

/// Current uninterrupted away streak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AwayStreak {
    /// Set while the subject has looked away continuously since this instant
    pub started_at: Option<Instant>,
    /// Evidence images attempted during this streak
    pub evidence_captured: u32,
}

/// Flag state machine for a single session
#[derive(Debug, Clone)]
pub struct FlagTracker {
    threshold: Duration,
    evidence_cap: u32,
    state: FlagState,
    streak: AwayStreak,
}

impl FlagTracker {
    pub fn new(config: &GazeConfig) -> Self {
        Self {
            threshold: config.away_threshold(),
            evidence_cap: config.evidence_cap,
            state: FlagState::Centered,
            streak: AwayStreak::default(),
        }
    }

    /// Feed one frame's label observed at `now`
    pub fn update(&mut self, label: GazeLabel, now: Instant) -> FlagStatus {
        if label.is_center() {
            if self.streak.started_at.is_some() {
                debug!(
                    "Away streak ended after {:?} ({} evidence images)",
                    self.away_for(now).unwrap_or_default(),
                    self.streak.evidence_captured
                );
            }
            self.reset();
            return FlagStatus::Centered;
        }

        let since = match self.state {
            FlagState::Centered => {
                self.streak = AwayStreak {
                    started_at: Some(now),
                    evidence_captured: 0,
                };
                now
            }
            FlagState::Away { since } | FlagState::Flagged { since } => since,
        };

        // A frame stamped before the streak start counts as zero elapsed
        let elapsed = now.saturating_duration_since(since);
        if elapsed >= self.threshold {
            if matches!(self.state, FlagState::Away { .. } | FlagState::Centered) {
                info!("Subject looking away for {:?}, flagging", elapsed);
            }
            self.state = FlagState::Flagged { since };
            FlagStatus::Flagged
        } else {
            self.state = FlagState::Away { since };
            FlagStatus::Away(label)
        }
    }

    /// Whether another evidence image may be taken in this streak
    pub fn can_capture(&self) -> bool {
        matches!(self.state, FlagState::Flagged { .. })
            && self.streak.evidence_captured < self.evidence_cap
    }

    /// Count an evidence attempt against the streak, successful or not
    pub fn record_capture(&mut self) {
        self.streak.evidence_captured += 1;
    }

    /// Time spent looking away in the current streak
    pub fn away_for(&self, now: Instant) -> Option<Duration> {
        self.streak
            .started_at
            .map(|since| now.saturating_duration_since(since))
    }

    pub fn state(&self) -> FlagState {
        self.state
    }

    pub fn streak(&self) -> AwayStreak {
        self.streak
    }

    /// Back to centered, dropping the streak and its evidence count
    pub fn reset(&mut self) {
        self.state = FlagState::Centered;
        self.streak = AwayStreak::default();
    }
}

impl Default for FlagTracker {
    fn default() -> Self {
        Self::new(&GazeConfig::default())
    }
}
