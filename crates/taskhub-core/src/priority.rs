use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task priority tier.
///
/// The underlying transport offers FIFO delivery plus an optional per-message
/// delay, not true priority queuing, so priority is approximated by delaying
/// lower tiers. This is best-effort only: a low item enqueued long before a
/// high item can still be delivered first once its delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Parse a priority string, rejecting anything outside the enum.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(Error::InvalidPriority(other.to_string())),
        }
    }

    /// Enqueue delay used to approximate priority on the FIFO transport.
    pub fn delay_seconds(&self) -> u32 {
        match self {
            Priority::High => 0,
            Priority::Medium => 10,
            Priority::Low => 30,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_to_delay_mapping() {
        assert_eq!(Priority::High.delay_seconds(), 0);
        assert_eq!(Priority::Medium.delay_seconds(), 10);
        assert_eq!(Priority::Low.delay_seconds(), 30);
    }

    #[test]
    fn parse_round_trips() {
        for p in [Priority::Low, Priority::Medium, Priority::High] {
            assert_eq!(Priority::parse(p.as_str()).unwrap(), p);
        }
    }

    #[test]
    fn unrecognized_priority_is_rejected() {
        let err = Priority::parse("urgent").unwrap_err();
        assert!(matches!(err, Error::InvalidPriority(s) if s == "urgent"));
    }
}
