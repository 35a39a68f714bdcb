use crate::error::Result;
use crate::models::{AlertRule, AlertStateMap, Interval, Watchlist};
use crate::services::alert_evaluator::{evaluate, Outcome};
use crate::services::database::SqliteStore;
use crate::services::notifier::{deliver_with_retry, Notifier};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::time::Duration as StdDuration;
use tracing::{debug, error, info, warn};

/// Summary of one alert pass
#[derive(Debug, Default)]
pub struct MonitorReport {
    pub rules_evaluated: usize,
    pub fired: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
    /// Firings already recorded for the same price point
    pub duplicates: usize,
    /// Rules rejected as misconfigured: (rule id, reason)
    pub invalid_rules: Vec<(String, String)>,
    /// Tickers whose pipeline failed: (ticker, error)
    pub ticker_errors: Vec<(String, String)>,
    /// Per-rule outcome labels in evaluation order
    pub outcomes: Vec<(String, &'static str)>,
}

/// Runs the evaluator over stored prices, records events and sends notifications
pub struct AlertMonitor<'a, N: Notifier> {
    store: &'a SqliteStore,
    notifier: &'a N,
    default_cooldown: Duration,
    notify_max_attempts: u32,
    notify_backoff: StdDuration,
}

impl<'a, N: Notifier> AlertMonitor<'a, N> {
    pub fn new(
        store: &'a SqliteStore,
        notifier: &'a N,
        default_cooldown: Duration,
        notify_max_attempts: u32,
    ) -> Self {
        Self {
            store,
            notifier,
            default_cooldown,
            notify_max_attempts,
            notify_backoff: StdDuration::from_secs(1),
        }
    }

    pub fn with_notify_backoff(mut self, backoff: StdDuration) -> Self {
        self.notify_backoff = backoff;
        self
    }

    /// Evaluate every valid rule of the watchlist against the newest stored point
    ///
    /// Misconfigured rules and failing tickers are reported and skipped.
    pub async fn run(&self, watchlist: &Watchlist, now: DateTime<Utc>) -> Result<MonitorReport> {
        let mut report = MonitorReport::default();
        let (rules, invalid) = watchlist.partition_rules();
        for (rule_id, reason) in &invalid {
            error!(rule = %rule_id, %reason, "Skipping misconfigured alert rule");
        }
        report.invalid_rules = invalid;

        let mut by_ticker: BTreeMap<&str, Vec<&AlertRule>> = BTreeMap::new();
        for rule in rules {
            by_ticker.entry(rule.ticker.as_str()).or_default().push(rule);
        }

        let mut states = self.store.load_rule_states().await?;

        for (ticker, rules) in by_ticker {
            if let Err(e) = self
                .process_ticker(ticker, &rules, watchlist.interval, &mut states, now, &mut report)
                .await
            {
                warn!(ticker, error = %e, "Alert pass failed for ticker");
                report.ticker_errors.push((ticker.to_string(), e.to_string()));
            }
        }

        info!(
            rules = report.rules_evaluated,
            fired = report.fired,
            delivered = report.delivered,
            delivery_failures = report.delivery_failures,
            invalid_rules = report.invalid_rules.len(),
            "Alert pass complete"
        );
        Ok(report)
    }

    async fn process_ticker(
        &self,
        ticker: &str,
        rules: &[&AlertRule],
        interval: Interval,
        states: &mut AlertStateMap,
        now: DateTime<Utc>,
        report: &mut MonitorReport,
    ) -> Result<()> {
        let lookback = rules.iter().map(|r| r.condition.lookback()).max().unwrap_or(1);
        let mut points = self.store.latest_points(ticker, interval, lookback + 1).await?;
        let Some(point) = points.pop() else {
            debug!(ticker, "No stored prices, skipping alert rules");
            return Ok(());
        };
        let history = points;

        for rule in rules {
            let previous = states.get(&rule.id).cloned().unwrap_or_default();
            let evaluation = evaluate(rule, &point, &history, &previous, now, self.default_cooldown);
            report.rules_evaluated += 1;
            report.outcomes.push((rule.id.clone(), evaluation.outcome.label()));

            match evaluation.outcome {
                Outcome::Fired(mut event) => {
                    // Event first: a crash after this point never loses the firing
                    let event_id = self.store.record_alert_event(&event).await?;
                    self.store.save_rule_state(&rule.id, &evaluation.state).await?;
                    states.insert(rule.id.clone(), evaluation.state);

                    let Some(event_id) = event_id else {
                        debug!(rule = %rule.id, ticker, "Firing already recorded for this point");
                        report.duplicates += 1;
                        continue;
                    };
                    event.id = Some(event_id);
                    report.fired += 1;
                    info!(rule = %rule.id, ticker, kind = %event.kind, close = event.close, "Alert fired");

                    let delivery = deliver_with_retry(
                        self.notifier,
                        &event.message,
                        self.notify_max_attempts,
                        self.notify_backoff,
                    )
                    .await;

                    if delivery.delivered {
                        report.delivered += 1;
                    } else {
                        report.delivery_failures += 1;
                        error!(
                            rule = %rule.id,
                            ticker,
                            attempts = delivery.attempts,
                            error = ?delivery.error,
                            "Alert recorded but notification was not delivered"
                        );
                    }
                    self.store
                        .mark_delivery(event_id, delivery.delivered, delivery.error.as_deref())
                        .await?;
                }
                outcome => {
                    debug!(rule = %rule.id, ticker, outcome = outcome.label(), "Rule evaluated");
                    if evaluation.state != previous {
                        self.store.save_rule_state(&rule.id, &evaluation.state).await?;
                        states.insert(rule.id.clone(), evaluation.state);
                    }
                }
            }
        }

        Ok(())
    }
}
