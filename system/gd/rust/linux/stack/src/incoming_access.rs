//! Access control for remote-initiated profile connections.
//!
//! Each bonded device carries a trust verdict and a reject window. While a device is denied and
//! its window is open, incoming connections are refused without asking the user. Every silent
//! refusal stretches the window, every accept shrinks it back to the minimum.

use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::config::ProfileStateConfig;

/// Stored verdict on incoming connections from a device. The discriminants are the persisted
/// values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(i32)]
pub enum Trust {
    Unknown = -1,
    Allowed = 1,
    Denied = 2,
}

/// Interval during which a denied device is refused silently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RejectWindow {
    /// Epoch milliseconds at which the window opened.
    pub start_ms: i64,
    pub duration_ms: i64,
}

impl RejectWindow {
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.duration_ms > 0 && now_ms < self.start_ms.saturating_add(self.duration_ms)
    }
}

/// Persisted as `<timestamp>-<durationMillis>`.
impl Display for RejectWindow {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}-{}", self.start_ms, self.duration_ms)
    }
}

impl FromStr for RejectWindow {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let splits: Vec<&str> = s.split('-').collect();
        if splits.len() != 2 {
            return Err(());
        }
        let start_ms = splits[0].parse::<i64>().map_err(|_| ())?;
        let duration_ms = splits[1].parse::<i64>().map_err(|_| ())?;
        Ok(RejectWindow { start_ms, duration_ms })
    }
}

/// Trust verdict and reject window, persisted together per device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IncomingAccessRecord {
    pub trust: Trust,
    pub window: RejectWindow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Accept,
    Reject,
    Prompt,
}

/// Decides how incoming connections from one device are handled and tracks the backoff.
pub struct IncomingAccessPolicy {
    record: IncomingAccessRecord,
    init_window_ms: i64,
    max_window_ms: i64,
    growth: i64,
}

impl IncomingAccessPolicy {
    /// Starts from the persisted record, or from an unknown device whose window already elapsed.
    pub fn new(record: Option<IncomingAccessRecord>, config: &ProfileStateConfig) -> Self {
        let record = record.unwrap_or(IncomingAccessRecord {
            trust: Trust::Unknown,
            window: RejectWindow { start_ms: 0, duration_ms: config.init_reject_window_ms },
        });
        IncomingAccessPolicy {
            record,
            init_window_ms: config.init_reject_window_ms,
            max_window_ms: config.max_reject_window_ms,
            growth: config.reject_window_growth,
        }
    }

    pub fn record(&self) -> &IncomingAccessRecord {
        &self.record
    }

    pub fn trust(&self) -> Trust {
        self.record.trust
    }

    pub fn window(&self) -> RejectWindow {
        self.record.window
    }

    /// Pure function of the stored record.
    pub fn decide(&self, now_ms: i64) -> AccessDecision {
        match self.record.trust {
            Trust::Allowed => AccessDecision::Accept,
            Trust::Denied if self.record.window.is_active(now_ms) => AccessDecision::Reject,
            _ => AccessDecision::Prompt,
        }
    }

    pub fn set_trust(&mut self, trust: Trust) {
        self.record.trust = trust;
    }

    /// Accounts for an incoming connection having been accepted or rejected.
    ///
    /// An accept trusts the device and shrinks the window to the minimum. A reject while the
    /// window is still open multiplies it, up to the ceiling. A reject after the window elapsed
    /// (a prompted one) reopens it without growth.
    pub fn record_outcome(&mut self, accepted: bool, now_ms: i64) {
        let current = self.record.window.duration_ms.max(self.init_window_ms);
        let duration_ms = if accepted {
            self.record.trust = Trust::Allowed;
            self.init_window_ms
        } else if self.record.window.is_active(now_ms) {
            current.saturating_mul(self.growth).min(self.max_window_ms)
        } else {
            current.min(self.max_window_ms)
        };
        self.record.window = RejectWindow { start_ms: now_ms, duration_ms };
    }

    /// Forgets everything learned about the device.
    pub fn reset(&mut self, now_ms: i64) {
        self.record = IncomingAccessRecord {
            trust: Trust::Unknown,
            window: RejectWindow { start_ms: now_ms, duration_ms: self.init_window_ms },
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const D: i64 = 1000;

    fn policy(trust: Trust, start_ms: i64, duration_ms: i64) -> IncomingAccessPolicy {
        IncomingAccessPolicy::new(
            Some(IncomingAccessRecord { trust, window: RejectWindow { start_ms, duration_ms } }),
            &ProfileStateConfig::default(),
        )
    }

    #[test]
    fn test_window_string_round_trip() {
        let window = RejectWindow { start_ms: 1700000000123, duration_ms: 5000 };
        assert_eq!(window.to_string(), "1700000000123-5000");
        assert_eq!("1700000000123-5000".parse::<RejectWindow>(), Ok(window));
    }

    #[test]
    fn test_window_string_malformed() {
        assert!("".parse::<RejectWindow>().is_err());
        assert!("123".parse::<RejectWindow>().is_err());
        assert!("1-2-3".parse::<RejectWindow>().is_err());
        assert!("abc-5".parse::<RejectWindow>().is_err());
    }

    #[test]
    fn test_window_activity() {
        let window = RejectWindow { start_ms: 100, duration_ms: 50 };
        assert!(window.is_active(100));
        assert!(window.is_active(149));
        assert!(!window.is_active(150));
        assert!(!RejectWindow { start_ms: 100, duration_ms: 0 }.is_active(100));
    }

    #[test]
    fn test_unknown_device_prompts() {
        let policy = IncomingAccessPolicy::new(None, &ProfileStateConfig::default());
        assert_eq!(policy.trust(), Trust::Unknown);
        assert_eq!(policy.decide(10_000), AccessDecision::Prompt);
    }

    #[test]
    fn test_allowed_device_accepts() {
        assert_eq!(policy(Trust::Allowed, 10_000, D).decide(10_001), AccessDecision::Accept);
    }

    #[test]
    fn test_denied_inside_window_rejects() {
        let policy = policy(Trust::Denied, 10_000, 5 * D);
        assert_eq!(policy.decide(10_000 + 4 * D), AccessDecision::Reject);
        // Once the window elapsed the user is asked again.
        assert_eq!(policy.decide(10_000 + 5 * D), AccessDecision::Prompt);
    }

    #[test]
    fn test_silent_rejects_grow_geometrically() {
        let mut policy = policy(Trust::Denied, 0, D);
        let mut now = 10;
        let mut seen = vec![];
        for _ in 0..3 {
            assert_eq!(policy.decide(now), AccessDecision::Reject);
            seen.push(policy.window().duration_ms);
            policy.record_outcome(false, now);
            now += 10;
        }
        assert_eq!(seen, vec![D, 5 * D, 25 * D]);
        assert_eq!(policy.window().duration_ms, 125 * D);

        policy.record_outcome(true, now);
        assert_eq!(policy.window(), RejectWindow { start_ms: now, duration_ms: D });
        assert_eq!(policy.trust(), Trust::Allowed);
    }

    #[test]
    fn test_growth_capped() {
        let max = ProfileStateConfig::default().max_reject_window_ms;
        let mut policy = policy(Trust::Denied, 0, max / 2);
        policy.record_outcome(false, 1);
        assert_eq!(policy.window().duration_ms, max);
        policy.record_outcome(false, 2);
        assert_eq!(policy.window().duration_ms, max);
    }

    #[test]
    fn test_prompted_reject_reopens_without_growth() {
        let mut policy = policy(Trust::Unknown, 0, D);
        policy.set_trust(Trust::Denied);
        policy.record_outcome(false, 50_000);
        assert_eq!(policy.window(), RejectWindow { start_ms: 50_000, duration_ms: D });
        assert_eq!(policy.decide(50_500), AccessDecision::Reject);
    }

    #[test]
    fn test_zero_duration_treated_as_minimum() {
        let mut policy = policy(Trust::Denied, 0, 0);
        assert_eq!(policy.decide(1), AccessDecision::Prompt);
        policy.record_outcome(false, 1);
        assert_eq!(policy.window().duration_ms, D);
    }

    #[test]
    fn test_reset() {
        let mut policy = policy(Trust::Allowed, 0, 25 * D);
        policy.reset(77);
        assert_eq!(policy.trust(), Trust::Unknown);
        assert_eq!(policy.window(), RejectWindow { start_ms: 77, duration_ms: D });
    }
}
