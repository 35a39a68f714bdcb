//! Alert rule evaluation
//!
//! Pure functions: given a rule, the newest price point, the points before it
//! and the rule's [`RuleState`], decide whether the rule fires and return the
//! next state. Nothing here touches the store or the network; the alert
//! monitor threads the state map through these calls and performs the side
//! effects.
//!
//! Firing semantics:
//! - A point already evaluated with the same close and volume is `Stale` and
//!   changes nothing, so re-running a cycle over the same data never fires
//!   twice. A revised snapshot of the same bar (the open daily bar during the
//!   session) is evaluated again.
//! - After a firing the rule stays quiet until its cooldown has elapsed,
//!   counted from that firing. Suppressed evaluations do not extend it.
//! - Price rules are edge-triggered. A firing latches the rule until the
//!   condition goes false. A latched rule fires again without a new crossing
//!   only when the cooldown held back at least one evaluation and has since
//!   run out; with a cooldown shorter than the evaluation cadence it stays
//!   silent until the next crossing.

use crate::models::{AlertCondition, AlertEvent, AlertRule, AlertStateMap, PricePoint, RuleState};
use crate::utils::{format_thousands, format_vnd};
use chrono::{DateTime, Duration, Utc};

/// Why an evaluation did or did not fire
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Fired(AlertEvent),
    /// Condition does not hold
    Idle,
    /// Condition holds but the rule fired less than a cooldown ago
    Cooldown { remaining: Duration },
    /// Price rule is latched by an earlier firing and the condition never cleared
    NoNewCrossing,
    /// Point already evaluated
    Stale,
    Disabled,
    InsufficientHistory { needed: usize, available: usize },
}

impl Outcome {
    pub fn fired(&self) -> bool {
        matches!(self, Outcome::Fired(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Fired(_) => "fired",
            Outcome::Idle => "idle",
            Outcome::Cooldown { .. } => "cooldown",
            Outcome::NoNewCrossing => "no_new_crossing",
            Outcome::Stale => "stale",
            Outcome::Disabled => "disabled",
            Outcome::InsufficientHistory { .. } => "insufficient_history",
        }
    }
}

/// Outcome plus the state to carry into the next evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub outcome: Outcome,
    pub state: RuleState,
}

/// Mean volume of the points, None when empty
fn average_volume(points: &[PricePoint]) -> Option<f64> {
    if points.is_empty() {
        return None;
    }
    let total: f64 = points.iter().map(|p| p.volume as f64).sum();
    Some(total / points.len() as f64)
}

fn volume_exceeds(point: &PricePoint, window: &[PricePoint], multiplier: f64) -> bool {
    match average_volume(window) {
        Some(avg) if avg > 0.0 => point.volume as f64 > multiplier * avg,
        _ => false,
    }
}

/// Evaluate the condition for `point` over the trailing `window`
fn condition_holds(condition: &AlertCondition, point: &PricePoint, window: &[PricePoint]) -> bool {
    match condition {
        AlertCondition::PriceAbove { threshold } => point.close > *threshold,
        AlertCondition::PriceBelow { threshold } => point.close < *threshold,
        AlertCondition::VolumeSpike { multiplier, .. } => volume_exceeds(point, window, *multiplier),
        AlertCondition::Breakout {
            volume_multiplier,
            price_level,
            ..
        } => {
            let price_ok = match price_level {
                Some(level) => point.close > *level,
                None => {
                    let resistance = window.iter().map(|p| p.high).fold(f64::NEG_INFINITY, f64::max);
                    point.close > resistance
                }
            };
            price_ok && volume_exceeds(point, window, *volume_multiplier)
        }
    }
}

/// Evaluate one rule against the newest point
///
/// `history` holds earlier points of the same ticker, oldest first; points at
/// or after `point.time` are ignored.
pub fn evaluate(
    rule: &AlertRule,
    point: &PricePoint,
    history: &[PricePoint],
    state: &RuleState,
    now: DateTime<Utc>,
    default_cooldown: Duration,
) -> Evaluation {
    let unchanged = |outcome| Evaluation {
        outcome,
        state: state.clone(),
    };

    if !rule.enabled {
        return unchanged(Outcome::Disabled);
    }
    if state.has_seen(point.time, point.close, point.volume) {
        return unchanged(Outcome::Stale);
    }

    let needed = rule.condition.lookback();
    let mut window: Vec<PricePoint> = history
        .iter()
        .filter(|p| p.time < point.time)
        .rev()
        .take(needed)
        .cloned()
        .collect();
    window.reverse();

    let edge_triggered = rule.condition.is_edge_triggered();
    if !edge_triggered && window.len() < needed {
        return unchanged(Outcome::InsufficientHistory {
            needed,
            available: window.len(),
        });
    }

    let holds = condition_holds(&rule.condition, point, &window);

    let mut next = RuleState {
        last_close: Some(point.close),
        last_volume: Some(point.volume),
        last_condition: holds,
        latched: holds && state.latched,
        held_in_cooldown: holds && state.held_in_cooldown,
        last_fired_at: state.last_fired_at,
        last_point_time: Some(point.time),
    };

    if !holds {
        return Evaluation {
            outcome: Outcome::Idle,
            state: next,
        };
    }

    let cooldown = rule.cooldown(default_cooldown);
    if let Some(fired_at) = state.last_fired_at {
        let elapsed = now - fired_at;
        if elapsed < cooldown {
            next.held_in_cooldown = true;
            return Evaluation {
                outcome: Outcome::Cooldown {
                    remaining: cooldown - elapsed,
                },
                state: next,
            };
        }
    }

    if edge_triggered && state.latched && !state.held_in_cooldown {
        return Evaluation {
            outcome: Outcome::NoNewCrossing,
            state: next,
        };
    }

    next.latched = true;
    next.held_in_cooldown = false;
    next.last_fired_at = Some(now);

    let event = AlertEvent {
        id: None,
        rule_id: rule.id.clone(),
        ticker: point.ticker.clone(),
        kind: rule.condition.kind_name().to_string(),
        fired_at: now,
        point_time: point.time,
        close: point.close,
        volume: point.volume,
        message: format_message(rule, point, &window),
        delivered: false,
        delivery_error: None,
    };

    Evaluation {
        outcome: Outcome::Fired(event),
        state: next,
    }
}

/// Evaluate every rule of the point's ticker, updating `states` in place
///
/// Returns `(rule id, outcome)` in rule order.
pub fn evaluate_rules<'a>(
    rules: impl IntoIterator<Item = &'a AlertRule>,
    point: &PricePoint,
    history: &[PricePoint],
    states: &mut AlertStateMap,
    now: DateTime<Utc>,
    default_cooldown: Duration,
) -> Vec<(String, Outcome)> {
    let mut outcomes = Vec::new();
    for rule in rules.into_iter().filter(|r| r.ticker == point.ticker) {
        let state = states.get(&rule.id).cloned().unwrap_or_default();
        let evaluation = evaluate(rule, point, history, &state, now, default_cooldown);
        states.insert(rule.id.clone(), evaluation.state);
        outcomes.push((rule.id.clone(), evaluation.outcome));
    }
    outcomes
}

/// Prices below 1000 (index points, test fixtures) keep two decimals
fn format_price(value: f64) -> String {
    if value.abs() >= 1000.0 {
        format_vnd(value)
    } else {
        format!("{:.2}", value)
    }
}

fn percent_diff(value: f64, reference: f64) -> String {
    if reference == 0.0 {
        return "N/A".to_string();
    }
    format!("{:+.2}%", (value - reference) / reference * 100.0)
}

/// Notification text (Telegram HTML)
pub fn format_message(rule: &AlertRule, point: &PricePoint, window: &[PricePoint]) -> String {
    let date = point.time.format("%Y-%m-%d %H:%M");
    let ticker = &point.ticker;

    match &rule.condition {
        AlertCondition::PriceAbove { threshold } | AlertCondition::PriceBelow { threshold } => {
            let (icon, direction) = if matches!(rule.condition, AlertCondition::PriceAbove { .. }) {
                ("📈", "above")
            } else {
                ("📉", "below")
            };
            format!(
                "🔔 <b>Price Alert: {ticker}</b>\n\
                 {icon} Price crossed <b>{direction}</b> threshold\n\
                 Current: <b>{}</b>\n\
                 Threshold: {}\n\
                 Difference: {}\n\
                 Time: {date}",
                format_price(point.close),
                format_price(*threshold),
                percent_diff(point.close, *threshold),
            )
        }
        AlertCondition::VolumeSpike { multiplier, lookback } => {
            let avg = average_volume(window).unwrap_or(0.0);
            let ratio = if avg > 0.0 { point.volume as f64 / avg } else { 0.0 };
            format!(
                "🔔 <b>Volume Spike: {ticker}</b>\n\
                 📊 Volume <b>{}</b> is {:.1}x the {lookback}-period average ({})\n\
                 Trigger: {multiplier}x\n\
                 Close: {}\n\
                 Time: {date}",
                format_thousands(point.volume),
                ratio,
                format_thousands(avg.round() as u64),
                format_price(point.close),
            )
        }
        AlertCondition::Breakout {
            lookback,
            volume_multiplier,
            price_level,
        } => {
            let level = price_level.unwrap_or_else(|| {
                window.iter().map(|p| p.high).fold(f64::NEG_INFINITY, f64::max)
            });
            let avg = average_volume(window).unwrap_or(0.0);
            format!(
                "🚀 <b>Breakout: {ticker}</b>\n\
                 Close <b>{}</b> broke {} ({})\n\
                 Volume {} vs {lookback}-period average {} (trigger {volume_multiplier}x)\n\
                 Time: {date}",
                format_price(point.close),
                format_price(level),
                percent_diff(point.close, level),
                format_thousands(point.volume),
                format_thousands(avg.round() as u64),
            )
        }
    }
}
