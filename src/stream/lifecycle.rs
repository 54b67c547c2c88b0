//! Player lifecycle state machine.
//!
//! ```text
//! Idle -> Loading -> Ready -> Playing
//!            |         |        |
//!            +---------+--------+--> Error | TimedOut
//!                                          |
//!          Loading <--- retry -------------+
//! ```
//!
//! Pure and synchronous: callers pass the current instant and drive the
//! watchdog themselves, which keeps every transition testable without a
//! runtime. Phases only move forward within an attempt; the one way back is
//! [`Lifecycle::retry`], which starts the next attempt.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::config::LifecycleConfig;
use crate::error::FaultKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    Ready,
    Playing,
    Error,
    TimedOut,
}

impl Phase {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Loading => 1,
            Self::Ready => 2,
            Self::Playing => 3,
            Self::Error | Self::TimedOut => 4,
        }
    }

    /// Error and timeout end an attempt.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Error | Self::TimedOut)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Playing => "playing",
            Self::Error => "error",
            Self::TimedOut => "timedOut",
        })
    }
}

/// State of one playback attempt chain for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub phase: Phase,
    pub retry_count: u32,
    pub last_fault: Option<FaultKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot move from {from} to {to}")]
    Illegal { from: Phase, to: Phase },

    #[error("retry limit of {limit} reached")]
    RetriesExhausted { limit: u32 },
}

/// What should happen after an attempt settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Retry automatically.
    AutoRetry,
    /// Leave it to the viewer: the stream may still come up on its own.
    AwaitUser,
    /// Show a terminal error. `exhausted` when the retry budget ran out.
    Terminal { exhausted: bool },
}

pub struct Lifecycle {
    state: PlayerState,
    max_retries: u32,
    watchdog: Duration,
    deadline: Option<Instant>,
}

impl Lifecycle {
    #[must_use]
    pub fn new(config: &LifecycleConfig) -> Self {
        Self {
            state: PlayerState::default(),
            max_retries: config.max_retries,
            watchdog: config.watchdog(),
            deadline: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> PlayerState {
        self.state
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// When the watchdog fires, if armed.
    #[must_use]
    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Start the first attempt and arm the watchdog.
    pub fn begin(&mut self, now: Instant) -> Result<(), TransitionError> {
        self.advance(&[Phase::Idle], Phase::Loading)?;
        self.deadline = Some(now + self.watchdog);
        Ok(())
    }

    pub fn ready(&mut self) -> Result<(), TransitionError> {
        self.advance(&[Phase::Loading], Phase::Ready)?;
        self.deadline = None;
        Ok(())
    }

    /// Media is flowing. Accepted straight from loading as well, for engines
    /// that only learn they are ready by playing.
    pub fn playing(&mut self) -> Result<(), TransitionError> {
        self.advance(&[Phase::Loading, Phase::Ready], Phase::Playing)?;
        self.deadline = None;
        Ok(())
    }

    pub fn fault(&mut self, kind: FaultKind) -> Result<(), TransitionError> {
        self.advance(&[Phase::Loading, Phase::Ready, Phase::Playing], Phase::Error)?;
        self.state.last_fault = Some(kind);
        self.deadline = None;
        Ok(())
    }

    /// The engine gave up waiting for its surface.
    pub fn timed_out(&mut self) -> Result<(), TransitionError> {
        self.advance(&[Phase::Loading, Phase::Ready], Phase::TimedOut)?;
        self.state.last_fault = Some(FaultKind::Timeout);
        self.deadline = None;
        Ok(())
    }

    /// Fire the watchdog if its deadline has passed. Returns true when the
    /// phase moved to timed out.
    pub fn watchdog_fired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline && self.state.phase == Phase::Loading => {
                self.deadline = None;
                self.state.phase = Phase::TimedOut;
                self.state.last_fault = Some(FaultKind::Timeout);
                debug!("Watchdog fired");
                true
            }
            _ => false,
        }
    }

    /// Start the next attempt.
    pub fn retry(&mut self, now: Instant) -> Result<(), TransitionError> {
        if !self.state.phase.is_settled() {
            return Err(TransitionError::Illegal {
                from: self.state.phase,
                to: Phase::Loading,
            });
        }
        if self.state.retry_count >= self.max_retries {
            return Err(TransitionError::RetriesExhausted {
                limit: self.max_retries,
            });
        }

        self.state.phase = Phase::Loading;
        self.state.retry_count += 1;
        self.state.last_fault = None;
        self.deadline = Some(now + self.watchdog);
        debug!(retry = self.state.retry_count, "Retrying");
        Ok(())
    }

    /// Whether a viewer-initiated retry would be accepted: the attempt has
    /// settled, budget is left and the fault is not one a retry cannot fix.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.state.phase.is_settled()
            && self.state.retry_count < self.max_retries
            && self.state.last_fault != Some(FaultKind::Unsupported)
    }

    /// Back to idle with a fresh retry budget.
    pub fn reset(&mut self) {
        self.state = PlayerState::default();
        self.deadline = None;
    }

    /// Decision for a settled attempt. `None` while an attempt is running.
    #[must_use]
    pub fn verdict(&self) -> Option<Verdict> {
        match self.state.phase {
            Phase::TimedOut => Some(Verdict::AwaitUser),
            Phase::Error => {
                let kind = self.state.last_fault.unwrap_or(FaultKind::Unknown);
                let retries = self.state.retry_count;
                Some(if !kind.is_retriable(retries) {
                    Verdict::Terminal { exhausted: false }
                } else if retries >= self.max_retries {
                    Verdict::Terminal { exhausted: true }
                } else {
                    Verdict::AutoRetry
                })
            }
            _ => None,
        }
    }

    fn advance(&mut self, from: &[Phase], to: Phase) -> Result<(), TransitionError> {
        let current = self.state.phase;
        if !from.contains(&current) || current.rank() >= to.rank() {
            return Err(TransitionError::Illegal { from: current, to });
        }
        debug!(from = %current, to = %to, "Phase change");
        self.state.phase = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> Lifecycle {
        Lifecycle::new(&LifecycleConfig::default())
    }

    #[test]
    fn happy_path() {
        let now = Instant::now();
        let mut lc = lifecycle();
        lc.begin(now).unwrap();
        assert_eq!(lc.watchdog_deadline(), Some(now + Duration::from_secs(15)));
        lc.ready().unwrap();
        assert_eq!(lc.watchdog_deadline(), None);
        lc.playing().unwrap();
        assert_eq!(lc.phase(), Phase::Playing);
        assert_eq!(lc.verdict(), None);
    }

    #[test]
    fn illegal_transition_leaves_state() {
        let mut lc = lifecycle();
        assert_eq!(
            lc.ready(),
            Err(TransitionError::Illegal {
                from: Phase::Idle,
                to: Phase::Ready
            })
        );
        assert_eq!(lc.state(), PlayerState::default());

        lc.begin(Instant::now()).unwrap();
        lc.playing().unwrap();
        assert!(lc.ready().is_err());
        assert_eq!(lc.phase(), Phase::Playing);
    }

    #[test]
    fn watchdog_times_out_loading_only() {
        let now = Instant::now();
        let mut lc = lifecycle();
        lc.begin(now).unwrap();

        assert!(!lc.watchdog_fired(now + Duration::from_secs(14)));
        assert_eq!(lc.phase(), Phase::Loading);
        assert!(lc.watchdog_fired(now + Duration::from_secs(15)));
        assert_eq!(lc.phase(), Phase::TimedOut);
        assert_eq!(lc.state().last_fault, Some(FaultKind::Timeout));
        assert_eq!(lc.verdict(), Some(Verdict::AwaitUser));
    }

    #[test]
    fn watchdog_disarmed_by_ready() {
        let now = Instant::now();
        let mut lc = lifecycle();
        lc.begin(now).unwrap();
        lc.ready().unwrap();
        assert!(!lc.watchdog_fired(now + Duration::from_secs(60)));
        assert_eq!(lc.phase(), Phase::Ready);
    }

    #[test]
    fn retry_increments_and_clears_fault() {
        let now = Instant::now();
        let mut lc = lifecycle();
        lc.begin(now).unwrap();
        lc.fault(FaultKind::Network).unwrap();
        assert_eq!(lc.verdict(), Some(Verdict::AutoRetry));

        lc.retry(now).unwrap();
        let state = lc.state();
        assert_eq!(state.phase, Phase::Loading);
        assert_eq!(state.retry_count, 1);
        assert_eq!(state.last_fault, None);
        assert!(lc.watchdog_deadline().is_some());
    }

    #[test]
    fn media_faults_exhaust_after_three_attempts() {
        let now = Instant::now();
        let mut lc = lifecycle();
        lc.begin(now).unwrap();

        for attempt in 0..3 {
            lc.fault(FaultKind::Media).unwrap();
            if attempt < 2 {
                assert_eq!(lc.verdict(), Some(Verdict::AutoRetry));
                lc.retry(now).unwrap();
            }
        }

        assert_eq!(lc.phase(), Phase::Error);
        assert_eq!(lc.verdict(), Some(Verdict::Terminal { exhausted: true }));
        assert_eq!(
            lc.retry(now),
            Err(TransitionError::RetriesExhausted { limit: 2 })
        );
    }

    #[test]
    fn unsupported_is_terminal_at_once() {
        let mut lc = lifecycle();
        lc.begin(Instant::now()).unwrap();
        lc.fault(FaultKind::Unsupported).unwrap();
        assert_eq!(lc.verdict(), Some(Verdict::Terminal { exhausted: false }));
    }

    #[test]
    fn unknown_is_retried_once() {
        let now = Instant::now();
        let mut lc = lifecycle();
        lc.begin(now).unwrap();
        lc.fault(FaultKind::Unknown).unwrap();
        assert_eq!(lc.verdict(), Some(Verdict::AutoRetry));
        lc.retry(now).unwrap();
        lc.fault(FaultKind::Unknown).unwrap();
        assert_eq!(lc.verdict(), Some(Verdict::Terminal { exhausted: false }));
    }

    #[test]
    fn engine_timeout_awaits_user() {
        let mut lc = lifecycle();
        lc.begin(Instant::now()).unwrap();
        lc.timed_out().unwrap();
        assert_eq!(lc.phase(), Phase::TimedOut);
        assert_eq!(lc.verdict(), Some(Verdict::AwaitUser));
        assert!(lc.ready().is_err());
    }

    #[test]
    fn can_retry_tracks_budget_and_fault() {
        let now = Instant::now();
        let mut lc = lifecycle();
        lc.begin(now).unwrap();
        assert!(!lc.can_retry());

        assert!(lc.watchdog_fired(now + Duration::from_secs(15)));
        assert!(lc.can_retry());
        lc.retry(now).unwrap();
        lc.timed_out().unwrap();
        assert!(lc.can_retry());
        lc.retry(now).unwrap();
        lc.timed_out().unwrap();
        assert_eq!(lc.state().retry_count, 2);
        assert!(!lc.can_retry());

        let mut lc = lifecycle();
        lc.begin(now).unwrap();
        lc.fault(FaultKind::Unsupported).unwrap();
        assert!(!lc.can_retry());
    }

    #[test]
    fn reset_restores_budget() {
        let now = Instant::now();
        let mut lc = lifecycle();
        lc.begin(now).unwrap();
        lc.fault(FaultKind::Network).unwrap();
        lc.retry(now).unwrap();
        lc.reset();
        assert_eq!(lc.state(), PlayerState::default());
        assert_eq!(lc.watchdog_deadline(), None);
        lc.begin(now).unwrap();
    }
}
