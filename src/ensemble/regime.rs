//! Market regime classification from per-sample volatility, momentum and
//! volume signals.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse market-state label used to bias ensemble weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    HighVolatility,
    BullTrend,
    BearTrend,
    HighVolumeSideways,
    Normal,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::HighVolatility => write!(f, "High Volatility"),
            Regime::BullTrend => write!(f, "Bull Trend"),
            Regime::BearTrend => write!(f, "Bear Trend"),
            Regime::HighVolumeSideways => write!(f, "High Volume Sideways"),
            Regime::Normal => write!(f, "Normal"),
        }
    }
}

/// Signals the detector reads, extracted from the feature vector through the
/// schema.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeSignals {
    /// Short-window return standard deviation
    pub volatility: f64,
    /// Rate of change over the short momentum window
    pub momentum: f64,
    /// Volume relative to the series mean
    pub volume_ratio: f64,
}

/// Classification thresholds, checked in priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeThresholds {
    /// Volatility strictly above this is High Volatility regardless of the
    /// other signals
    pub volatility: f64,
    /// Momentum at or above this is Bull Trend
    pub bull_momentum: f64,
    /// Momentum at or below this is Bear Trend
    pub bear_momentum: f64,
    /// Volume ratio strictly above this is High Volume Sideways
    pub volume: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            volatility: 0.03,
            bull_momentum: 0.02,
            bear_momentum: -0.02,
            volume: 1.5,
        }
    }
}

/// Threshold-priority regime detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeDetector {
    thresholds: RegimeThresholds,
}

impl RegimeDetector {
    pub fn new(thresholds: RegimeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn classify(&self, signals: &RegimeSignals) -> Regime {
        let t = &self.thresholds;
        if signals.volatility > t.volatility {
            Regime::HighVolatility
        } else if signals.momentum >= t.bull_momentum {
            Regime::BullTrend
        } else if signals.momentum <= t.bear_momentum {
            Regime::BearTrend
        } else if signals.volume_ratio > t.volume {
            Regime::HighVolumeSideways
        } else {
            Regime::Normal
        }
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new(RegimeThresholds::default())
    }
}
