//! Array health derivation
//!
//! Health is a pure function of the level's minimum device count and the
//! number of members currently online. It is recomputed on every status
//! read, never cached, so it can never lag behind heartbeat staleness.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayHealth {
    /// Enough members online to satisfy the level's minimum.
    Healthy,
    /// Below the minimum; reads may need reconstruction and writes may
    /// under-place.
    Degraded,
}

impl ArrayHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrayHealth::Healthy => "healthy",
            ArrayHealth::Degraded => "degraded",
        }
    }
}

pub struct HealthEvaluator;

impl HealthEvaluator {
    pub fn evaluate(minimum_devices: usize, online: usize) -> ArrayHealth {
        if online >= minimum_devices {
            ArrayHealth::Healthy
        } else {
            ArrayHealth::Degraded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_minimum_is_healthy() {
        assert_eq!(HealthEvaluator::evaluate(3, 3), ArrayHealth::Healthy);
        assert_eq!(HealthEvaluator::evaluate(3, 4), ArrayHealth::Healthy);
    }

    #[test]
    fn test_below_minimum_is_degraded() {
        assert_eq!(HealthEvaluator::evaluate(3, 2), ArrayHealth::Degraded);
        assert_eq!(HealthEvaluator::evaluate(2, 0), ArrayHealth::Degraded);
    }

    #[test]
    fn test_serializes_lowercase() {
        let json = serde_json::to_string(&ArrayHealth::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }
}
