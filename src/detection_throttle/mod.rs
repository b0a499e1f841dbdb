//! DetectionThrottle - raw decode stream to accepted detections
//!
//! ## Rules
//!
//! An event is accepted only when all of these hold:
//!
//! - payload is non-empty and at least `min_len` characters long
//! - payload differs from the last accepted one, or `cooldown` has elapsed
//!   since that acceptance
//! - the owning session is `Active` when the event arrives
//!
//! `burst_interval` (disabled by default) additionally rejects any payload
//! arriving sooner than that after the last acceptance.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Default minimum payload length
pub const DEFAULT_MIN_PAYLOAD_LEN: usize = 8;
/// Default repeat cooldown (800ms)
pub const DEFAULT_COOLDOWN_MS: u64 = 800;

/// Throttle policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub min_len: usize,
    pub cooldown: Duration,
    /// Zero disables the burst guard
    pub burst_interval: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            min_len: DEFAULT_MIN_PAYLOAD_LEN,
            cooldown: Duration::from_millis(DEFAULT_COOLDOWN_MS),
            burst_interval: Duration::ZERO,
        }
    }
}

/// Raw detection from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionEvent {
    pub payload: String,
    pub at: Instant,
}

impl DetectionEvent {
    pub fn new(payload: impl Into<String>, at: Instant) -> Self {
        Self {
            payload: payload.into(),
            at,
        }
    }
}

/// Rejection reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    Empty,
    TooShort,
    Duplicate,
    Burst,
    SessionInactive,
}

/// Throttle verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// DetectionThrottle instance
#[derive(Debug, Clone)]
pub struct DetectionThrottle {
    policy: ThrottlePolicy,
    last_accepted: Option<(String, Instant)>,
}

impl DetectionThrottle {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            last_accepted: None,
        }
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    /// Evaluate an event; acceptance records it as the last accepted
    pub fn evaluate(&mut self, event: &DetectionEvent, session_active: bool) -> Verdict {
        let verdict = self.check(event, session_active);

        if verdict.is_accepted() {
            self.last_accepted = Some((event.payload.clone(), event.at));
        } else {
            tracing::trace!(payload = %event.payload, verdict = ?verdict, "Detection rejected");
        }

        verdict
    }

    fn check(&self, event: &DetectionEvent, session_active: bool) -> Verdict {
        if !session_active {
            return Verdict::Rejected(RejectReason::SessionInactive);
        }

        if event.payload.is_empty() {
            return Verdict::Rejected(RejectReason::Empty);
        }

        if event.payload.chars().count() < self.policy.min_len {
            return Verdict::Rejected(RejectReason::TooShort);
        }

        if let Some((last_payload, last_at)) = &self.last_accepted {
            let elapsed = event.at.saturating_duration_since(*last_at);

            if !self.policy.burst_interval.is_zero() && elapsed < self.policy.burst_interval {
                return Verdict::Rejected(RejectReason::Burst);
            }

            if *last_payload == event.payload && elapsed < self.policy.cooldown {
                return Verdict::Rejected(RejectReason::Duplicate);
            }
        }

        Verdict::Accepted
    }

    /// Last accepted payload
    pub fn last_payload(&self) -> Option<&str> {
        self.last_accepted.as_ref().map(|(p, _)| p.as_str())
    }

    /// Forget the last acceptance
    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}

impl Default for DetectionThrottle {
    fn default() -> Self {
        Self::new(ThrottlePolicy::default())
    }
}
