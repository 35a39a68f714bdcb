use crate::constants::{DEFAULT_LOOKBACK, DEFAULT_VOLUME_MULTIPLIER};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_lookback() -> usize {
    DEFAULT_LOOKBACK
}

fn default_multiplier() -> f64 {
    DEFAULT_VOLUME_MULTIPLIER
}

fn default_enabled() -> bool {
    true
}

/// Condition checked by an alert rule
///
/// Serialized with a `kind` tag so a rule reads as a flat JSON object:
/// `{"id": "vnm-low", "ticker": "VNM", "kind": "price_below", "threshold": 80000}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertCondition {
    /// Close crosses below the threshold
    PriceBelow { threshold: f64 },

    /// Close crosses above the threshold
    PriceAbove { threshold: f64 },

    /// Volume exceeds `multiplier` times the trailing average volume
    VolumeSpike {
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        #[serde(default = "default_lookback")]
        lookback: usize,
    },

    /// Price breaks out on a volume spike in the same interval
    ///
    /// The price part is `close > price_level` when a level is given, otherwise
    /// `close` above the highest high of the lookback window.
    Breakout {
        #[serde(default = "default_lookback")]
        lookback: usize,
        #[serde(default = "default_multiplier")]
        volume_multiplier: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        price_level: Option<f64>,
    },
}

impl AlertCondition {
    /// Storage/display name of the rule kind
    pub fn kind_name(&self) -> &'static str {
        match self {
            AlertCondition::PriceBelow { .. } => "price_below",
            AlertCondition::PriceAbove { .. } => "price_above",
            AlertCondition::VolumeSpike { .. } => "volume_spike",
            AlertCondition::Breakout { .. } => "breakout",
        }
    }

    /// Price rules fire on the transition into the condition only
    pub fn is_edge_triggered(&self) -> bool {
        matches!(
            self,
            AlertCondition::PriceBelow { .. } | AlertCondition::PriceAbove { .. }
        )
    }

    /// Number of previous points the condition needs
    pub fn lookback(&self) -> usize {
        match self {
            AlertCondition::PriceBelow { .. } | AlertCondition::PriceAbove { .. } => 1,
            AlertCondition::VolumeSpike { lookback, .. } => *lookback,
            AlertCondition::Breakout { lookback, .. } => *lookback,
        }
    }

    fn validate(&self) -> Result<(), String> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(format!("{} must be a positive number, got {}", name, value))
            }
        };

        match self {
            AlertCondition::PriceBelow { threshold } | AlertCondition::PriceAbove { threshold } => {
                positive("threshold", *threshold)
            }
            AlertCondition::VolumeSpike { multiplier, lookback } => {
                positive("multiplier", *multiplier)?;
                if *lookback == 0 {
                    return Err("lookback must be at least 1".to_string());
                }
                Ok(())
            }
            AlertCondition::Breakout {
                lookback,
                volume_multiplier,
                price_level,
            } => {
                positive("volume_multiplier", *volume_multiplier)?;
                if let Some(level) = price_level {
                    positive("price_level", *level)?;
                }
                if *lookback == 0 {
                    return Err("lookback must be at least 1".to_string());
                }
                Ok(())
            }
        }
    }
}

/// A user-configured condition over price/volume that may trigger a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule identity; keys the evaluator state
    pub id: String,

    pub ticker: String,

    #[serde(flatten)]
    pub condition: AlertCondition,

    /// Minimum minutes between two firings; falls back to the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_minutes: Option<i64>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl AlertRule {
    pub fn new(id: &str, ticker: &str, condition: AlertCondition) -> Self {
        Self {
            id: id.to_string(),
            ticker: ticker.to_uppercase(),
            condition,
            cooldown_minutes: None,
            enabled: true,
        }
    }

    pub fn with_cooldown_minutes(mut self, minutes: i64) -> Self {
        self.cooldown_minutes = Some(minutes);
        self
    }

    /// Effective cooldown for this rule
    pub fn cooldown(&self, default: Duration) -> Duration {
        self.cooldown_minutes
            .map(Duration::minutes)
            .unwrap_or(default)
    }

    /// Check the rule is usable; errors are configuration errors for this rule only
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("rule id is empty".to_string());
        }
        if self.ticker.trim().is_empty() {
            return Err(format!("rule {} has no ticker", self.id));
        }
        if let Some(minutes) = self.cooldown_minutes {
            if minutes < 0 {
                return Err(format!("rule {}: cooldown_minutes must not be negative", self.id));
            }
        }
        self.condition
            .validate()
            .map_err(|e| format!("rule {}: {}", self.id, e))
    }
}

/// Per-rule memory carried between evaluations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleState {
    /// Close of the last evaluated point
    pub last_close: Option<f64>,

    /// Volume of the last evaluated point
    pub last_volume: Option<u64>,

    /// Whether the condition held on the last evaluation
    pub last_condition: bool,

    /// The rule fired and its condition has held on every evaluation since
    pub latched: bool,

    /// While latched, an evaluation was suppressed by the cooldown
    pub held_in_cooldown: bool,

    /// When the rule last fired
    pub last_fired_at: Option<DateTime<Utc>>,

    /// Time of the last evaluated price point
    pub last_point_time: Option<DateTime<Utc>>,
}

impl RuleState {
    /// Whether `point` was already evaluated with the same close and volume
    ///
    /// A point at the last evaluated time with a different close or volume is a
    /// revision of an open bar and is evaluated again.
    pub fn has_seen(&self, time: DateTime<Utc>, close: f64, volume: u64) -> bool {
        match self.last_point_time {
            Some(last) if last > time => true,
            Some(last) if last == time => {
                self.last_close == Some(close) && self.last_volume == Some(volume)
            }
            _ => false,
        }
    }
}

/// Evaluator state keyed by rule id
pub type AlertStateMap = HashMap<String, RuleState>;

/// Record of one rule firing; append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Store row id, set once recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    pub rule_id: String,
    pub ticker: String,
    pub kind: String,

    pub fired_at: DateTime<Utc>,

    /// Time of the price point that triggered the rule
    pub point_time: DateTime<Utc>,

    pub close: f64,
    pub volume: u64,

    /// Notification text
    pub message: String,

    pub delivered: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_error: Option<String>,
}
