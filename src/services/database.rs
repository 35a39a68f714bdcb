use crate::constants::DB_SCHEMA_VERSION;
use crate::error::{AppError, Result};
use crate::models::{
    AggregateBar, AggregatePeriod, AlertEvent, AlertStateMap, FlowSnapshot, Fundamentals, Interval,
    PricePoint, RuleState, Sector, SectorFlow, Valuation,
};
use crate::services::ticker_fetcher::TickerFailure;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// SQLite row store for prices, alerts, aggregate bars, money flow and fetch failures
///
/// Timestamps are stored as unix seconds.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    database_path: Option<PathBuf>,
}

fn timestamp_to_utc(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .ok_or_else(|| AppError::Database(format!("Invalid timestamp in store: {}", seconds)))
}

fn row_to_price_point(row: &SqliteRow) -> Result<PricePoint> {
    let interval: String = row.try_get("interval")?;
    let interval = Interval::from_str(&interval).map_err(AppError::Database)?;
    Ok(PricePoint {
        ticker: row.try_get("ticker")?,
        interval,
        time: timestamp_to_utc(row.try_get("time")?)?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get::<i64, _>("volume")? as u64,
    })
}

fn row_to_aggregate_bar(row: &SqliteRow) -> Result<AggregateBar> {
    let period: String = row.try_get("period")?;
    let period = AggregatePeriod::from_str(&period)
        .ok_or_else(|| AppError::Database(format!("Unknown aggregate period: {}", period)))?;
    Ok(AggregateBar {
        ticker: row.try_get("ticker")?,
        period,
        period_start: timestamp_to_utc(row.try_get("period_start")?)?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get::<i64, _>("volume")? as u64,
        point_count: row.try_get::<i64, _>("point_count")? as u32,
    })
}

fn row_to_flow_snapshot(row: &SqliteRow) -> Result<FlowSnapshot> {
    let sector: String = row.try_get("sector")?;
    Ok(FlowSnapshot {
        ticker: row.try_get("ticker")?,
        sector: Sector::from_key(&sector).unwrap_or(Sector::Other),
        taken_at: timestamp_to_utc(row.try_get("taken_at")?)?,
        bar_time: timestamp_to_utc(row.try_get("bar_time")?)?,
        open: row.try_get("open")?,
        close: row.try_get("close")?,
        volume: row.try_get::<i64, _>("volume")? as u64,
        price_change_pct: row.try_get("price_change_pct")?,
        money_flow: row.try_get("money_flow")?,
        valuation: Valuation {
            pe: row.try_get("pe")?,
            pb: row.try_get("pb")?,
            ps: row.try_get("ps")?,
            market_cap_bn: row.try_get("market_cap_bn")?,
        },
    })
}

fn row_to_sector_flow(row: &SqliteRow) -> Result<SectorFlow> {
    let date: String = row.try_get("date")?;
    let sector: String = row.try_get("sector")?;
    Ok(SectorFlow {
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| AppError::Database(format!("Invalid sector flow date {}: {}", date, e)))?,
        sector: Sector::from_key(&sector).unwrap_or(Sector::Other),
        total_flow_bn: row.try_get("total_flow_bn")?,
        avg_price_change_pct: row.try_get("avg_price_change_pct")?,
        avg_pe: row.try_get("avg_pe")?,
        avg_pb: row.try_get("avg_pb")?,
        stock_count: row.try_get::<i64, _>("stock_count")? as u32,
    })
}

fn row_to_alert_event(row: &SqliteRow) -> Result<AlertEvent> {
    Ok(AlertEvent {
        id: Some(row.try_get("id")?),
        rule_id: row.try_get("rule_id")?,
        ticker: row.try_get("ticker")?,
        kind: row.try_get("kind")?,
        fired_at: timestamp_to_utc(row.try_get("fired_at")?)?,
        point_time: timestamp_to_utc(row.try_get("point_time")?)?,
        close: row.try_get("close")?,
        volume: row.try_get::<i64, _>("volume")? as u64,
        message: row.try_get("message")?,
        delivered: row.try_get::<i64, _>("delivered")? != 0,
        delivery_error: row.try_get("delivery_error")?,
    })
}

impl SqliteStore {
    /// Open (or create) the database file
    pub async fn open<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let database_path = database_path.as_ref().to_path_buf();
        info!(path = %database_path.display(), "Opening SQLite store");

        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&database_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(connect_options)
            .await?;

        let store = Self {
            pool,
            database_path: Some(database_path),
        };
        store.initialize().await?;
        Ok(store)
    }

    /// Private in-memory database; a single connection keeps it alive
    pub async fn in_memory() -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await?;

        let store = Self {
            pool,
            database_path: None,
        };
        store.initialize().await?;
        Ok(store)
    }

    pub fn database_path(&self) -> Option<&Path> {
        self.database_path.as_deref()
    }

    async fn initialize(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS price_points (
                ticker TEXT NOT NULL,
                interval TEXT NOT NULL,
                time INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (ticker, interval, time)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS alert_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id TEXT NOT NULL,
                ticker TEXT NOT NULL,
                kind TEXT NOT NULL,
                fired_at INTEGER NOT NULL,
                point_time INTEGER NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                message TEXT NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0,
                delivery_error TEXT,
                UNIQUE (rule_id, point_time, close, volume)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS alert_state (
                rule_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS aggregate_bars (
                ticker TEXT NOT NULL,
                period TEXT NOT NULL,
                period_start INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                point_count INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (ticker, period, period_start)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fetch_failures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                error TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fundamentals (
                ticker TEXT PRIMARY KEY,
                eps REAL,
                revenue REAL,
                equity REAL,
                shares_outstanding REAL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS flow_snapshots (
                ticker TEXT NOT NULL,
                taken_at INTEGER NOT NULL,
                bar_time INTEGER NOT NULL,
                sector TEXT NOT NULL,
                open REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                price_change_pct REAL NOT NULL,
                money_flow REAL NOT NULL,
                pe REAL,
                pb REAL,
                ps REAL,
                market_cap_bn REAL,
                PRIMARY KEY (ticker, taken_at)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sector_flows (
                date TEXT NOT NULL,
                sector TEXT NOT NULL,
                total_flow_bn REAL NOT NULL,
                avg_price_change_pct REAL NOT NULL,
                avg_pe REAL,
                avg_pb REAL,
                stock_count INTEGER NOT NULL,
                PRIMARY KEY (date, sector)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_price_points_time ON price_points(ticker, interval, time DESC)",
            "CREATE INDEX IF NOT EXISTS idx_alert_events_rule ON alert_events(rule_id, fired_at DESC)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        self.set_metadata("schema_version", DB_SCHEMA_VERSION).await?;
        debug!("SQLite schema initialized");
        Ok(())
    }

    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar("SELECT value FROM metadata WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    /// Store fetched price points
    ///
    /// New (ticker, interval, time) rows are inserted. The newest stored row of
    /// each (ticker, interval) may be revised in place: the provider returns the
    /// current bar while its session is still open. Older rows are immutable
    /// and a conflicting point for them is ignored.
    pub async fn insert_price_points(&self, points: &[PricePoint]) -> Result<PriceWrite> {
        let mut write = PriceWrite::default();
        if points.is_empty() {
            return Ok(write);
        }

        let created_at = Utc::now().timestamp();
        let mut transaction = self.pool.begin().await?;
        let mut newest: HashMap<(String, Interval), Option<i64>> = HashMap::new();

        for point in points {
            let key = (point.ticker.clone(), point.interval);
            let latest = match newest.get(&key) {
                Some(latest) => *latest,
                None => {
                    let latest: Option<i64> = sqlx::query_scalar(
                        "SELECT MAX(time) FROM price_points WHERE ticker = ?1 AND interval = ?2",
                    )
                    .bind(&point.ticker)
                    .bind(point.interval.to_string())
                    .fetch_one(&mut *transaction)
                    .await?;
                    latest
                }
            };
            let time = point.time.timestamp();

            if latest == Some(time) {
                let result = sqlx::query(
                    r#"
                    UPDATE price_points
                    SET open = ?4, high = ?5, low = ?6, close = ?7, volume = ?8, created_at = ?9
                    WHERE ticker = ?1 AND interval = ?2 AND time = ?3
                      AND (open != ?4 OR high != ?5 OR low != ?6 OR close != ?7 OR volume != ?8)
                    "#,
                )
                .bind(&point.ticker)
                .bind(point.interval.to_string())
                .bind(time)
                .bind(point.open)
                .bind(point.high)
                .bind(point.low)
                .bind(point.close)
                .bind(point.volume as i64)
                .bind(created_at)
                .execute(&mut *transaction)
                .await?;

                if result.rows_affected() > 0 {
                    debug!(ticker = %point.ticker, time, close = point.close, "Revised open bar");
                    write.revised += 1;
                }
            } else {
                let result = sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO price_points
                    (ticker, interval, time, open, high, low, close, volume, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                )
                .bind(&point.ticker)
                .bind(point.interval.to_string())
                .bind(time)
                .bind(point.open)
                .bind(point.high)
                .bind(point.low)
                .bind(point.close)
                .bind(point.volume as i64)
                .bind(created_at)
                .execute(&mut *transaction)
                .await?;

                write.inserted += result.rows_affected() as usize;
            }

            newest.insert(key, latest.max(Some(time)));
        }

        transaction.commit().await?;
        Ok(write)
    }

    /// Most recent `limit` points of a ticker, oldest first
    pub async fn latest_points(
        &self,
        ticker: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<PricePoint>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, interval, time, open, high, low, close, volume
            FROM price_points
            WHERE ticker = ?1 AND interval = ?2
            ORDER BY time DESC
            LIMIT ?3
            "#,
        )
        .bind(ticker)
        .bind(interval.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut points = rows.iter().map(row_to_price_point).collect::<Result<Vec<_>>>()?;
        points.reverse();
        Ok(points)
    }

    /// Points of a ticker within `[start, end)`, oldest first
    pub async fn points_between(
        &self,
        ticker: &str,
        interval: Interval,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<PricePoint>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, interval, time, open, high, low, close, volume
            FROM price_points
            WHERE ticker = ?1 AND interval = ?2 AND time >= ?3 AND time < ?4
            ORDER BY time ASC
            "#,
        )
        .bind(ticker)
        .bind(interval.to_string())
        .bind(start.map(|t| t.timestamp()).unwrap_or(i64::MIN))
        .bind(end.map(|t| t.timestamp()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_price_point).collect()
    }

    /// Tickers with at least one stored point at the interval
    pub async fn tickers(&self, interval: Interval) -> Result<Vec<String>> {
        let tickers = sqlx::query_scalar(
            "SELECT DISTINCT ticker FROM price_points WHERE interval = ?1 ORDER BY ticker",
        )
        .bind(interval.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(tickers)
    }

    pub async fn load_rule_states(&self) -> Result<AlertStateMap> {
        let rows = sqlx::query("SELECT rule_id, state FROM alert_state")
            .fetch_all(&self.pool)
            .await?;

        let mut states = AlertStateMap::new();
        for row in rows {
            let rule_id: String = row.try_get("rule_id")?;
            let raw: String = row.try_get("state")?;
            let state: RuleState = serde_json::from_str(&raw)?;
            states.insert(rule_id, state);
        }
        Ok(states)
    }

    pub async fn save_rule_state(&self, rule_id: &str, state: &RuleState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_state (rule_id, state, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (rule_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at
            "#,
        )
        .bind(rule_id)
        .bind(serde_json::to_string(state)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append an alert event
    ///
    /// Returns the new row id, or None when the rule already has an event for
    /// the same price point snapshot (time, close and volume).
    pub async fn record_alert_event(&self, event: &AlertEvent) -> Result<Option<i64>> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO alert_events
            (rule_id, ticker, kind, fired_at, point_time, close, volume, message, delivered, delivery_error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&event.rule_id)
        .bind(&event.ticker)
        .bind(&event.kind)
        .bind(event.fired_at.timestamp())
        .bind(event.point_time.timestamp())
        .bind(event.close)
        .bind(event.volume as i64)
        .bind(&event.message)
        .bind(event.delivered as i64)
        .bind(&event.delivery_error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    /// Record the delivery result of an event
    pub async fn mark_delivery(&self, event_id: i64, delivered: bool, error: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE alert_events SET delivered = ?1, delivery_error = ?2 WHERE id = ?3")
            .bind(delivered as i64)
            .bind(error)
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Most recent events, newest first; optionally for one rule
    pub async fn recent_alert_events(&self, rule_id: Option<&str>, limit: usize) -> Result<Vec<AlertEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, rule_id, ticker, kind, fired_at, point_time, close, volume,
                   message, delivered, delivery_error
            FROM alert_events
            WHERE ?1 IS NULL OR rule_id = ?1
            ORDER BY fired_at DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(rule_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_alert_event).collect()
    }

    /// Insert or replace bars keyed by (ticker, period, period_start)
    pub async fn upsert_aggregate_bars(&self, bars: &[AggregateBar]) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let updated_at = Utc::now().timestamp();
        let mut transaction = self.pool.begin().await?;

        for bar in bars {
            sqlx::query(
                r#"
                INSERT INTO aggregate_bars
                (ticker, period, period_start, open, high, low, close, volume, point_count, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT (ticker, period, period_start) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    point_count = excluded.point_count,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&bar.ticker)
            .bind(bar.period.as_str())
            .bind(bar.period_start.timestamp())
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume as i64)
            .bind(bar.point_count as i64)
            .bind(updated_at)
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;
        Ok(bars.len())
    }

    /// Bars of one period, ordered by ticker then period start
    pub async fn load_aggregate_bars(
        &self,
        ticker: Option<&str>,
        period: AggregatePeriod,
    ) -> Result<Vec<AggregateBar>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, period, period_start, open, high, low, close, volume, point_count
            FROM aggregate_bars
            WHERE period = ?1 AND (?2 IS NULL OR ticker = ?2)
            ORDER BY ticker ASC, period_start ASC
            "#,
        )
        .bind(period.as_str())
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_aggregate_bar).collect()
    }

    pub async fn record_fetch_failure(&self, failure: &TickerFailure) -> Result<()> {
        sqlx::query("INSERT INTO fetch_failures (ticker, error, attempts, at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&failure.ticker)
            .bind(&failure.error)
            .bind(failure.attempts as i64)
            .bind(failure.at.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Most recent fetch failures, newest first
    pub async fn recent_fetch_failures(&self, limit: usize) -> Result<Vec<TickerFailure>> {
        let rows = sqlx::query(
            "SELECT ticker, error, attempts, at FROM fetch_failures ORDER BY at DESC, id DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<TickerFailure> {
                Ok(TickerFailure {
                    ticker: row.try_get("ticker")?,
                    error: row.try_get("error")?,
                    attempts: row.try_get::<i64, _>("attempts")? as u32,
                    at: timestamp_to_utc(row.try_get("at")?)?,
                })
            })
            .collect()
    }

    /// Insert or replace the financials of each ticker
    pub async fn upsert_fundamentals(&self, rows: &[Fundamentals]) -> Result<usize> {
        let updated_at = Utc::now().timestamp();
        let mut transaction = self.pool.begin().await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO fundamentals
                (ticker, eps, revenue, equity, shares_outstanding, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&row.ticker)
            .bind(row.eps)
            .bind(row.revenue)
            .bind(row.equity)
            .bind(row.shares_outstanding)
            .bind(updated_at)
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;
        Ok(rows.len())
    }

    /// Financials keyed by ticker
    pub async fn load_fundamentals(&self) -> Result<HashMap<String, Fundamentals>> {
        let rows = sqlx::query("SELECT ticker, eps, revenue, equity, shares_outstanding FROM fundamentals")
            .fetch_all(&self.pool)
            .await?;

        let mut fundamentals = HashMap::with_capacity(rows.len());
        for row in rows {
            let entry = Fundamentals {
                ticker: row.try_get("ticker")?,
                eps: row.try_get("eps")?,
                revenue: row.try_get("revenue")?,
                equity: row.try_get("equity")?,
                shares_outstanding: row.try_get("shares_outstanding")?,
            };
            fundamentals.insert(entry.ticker.clone(), entry);
        }
        Ok(fundamentals)
    }

    /// Append flow snapshots; a second snapshot of a ticker at the same instant replaces the first
    pub async fn record_flow_snapshots(&self, snapshots: &[FlowSnapshot]) -> Result<usize> {
        let mut transaction = self.pool.begin().await?;

        for snapshot in snapshots {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO flow_snapshots
                (ticker, taken_at, bar_time, sector, open, close, volume, price_change_pct,
                 money_flow, pe, pb, ps, market_cap_bn)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )
            .bind(&snapshot.ticker)
            .bind(snapshot.taken_at.timestamp())
            .bind(snapshot.bar_time.timestamp())
            .bind(snapshot.sector.key())
            .bind(snapshot.open)
            .bind(snapshot.close)
            .bind(snapshot.volume as i64)
            .bind(snapshot.price_change_pct)
            .bind(snapshot.money_flow)
            .bind(snapshot.valuation.pe)
            .bind(snapshot.valuation.pb)
            .bind(snapshot.valuation.ps)
            .bind(snapshot.valuation.market_cap_bn)
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;
        Ok(snapshots.len())
    }

    /// Snapshots taken within `[start, end)`, oldest first
    pub async fn flow_snapshots_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FlowSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, taken_at, bar_time, sector, open, close, volume, price_change_pct,
                   money_flow, pe, pb, ps, market_cap_bn
            FROM flow_snapshots
            WHERE taken_at >= ?1 AND taken_at < ?2
            ORDER BY taken_at ASC, ticker ASC
            "#,
        )
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_flow_snapshot).collect()
    }

    /// Delete snapshots taken before `before`; returns the number removed
    pub async fn prune_flow_snapshots(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM flow_snapshots WHERE taken_at < ?1")
            .bind(before.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Replace the sector summary of one date
    pub async fn replace_sector_flows(&self, date: NaiveDate, flows: &[SectorFlow]) -> Result<()> {
        let date_key = date.format("%Y-%m-%d").to_string();
        let mut transaction = self.pool.begin().await?;

        sqlx::query("DELETE FROM sector_flows WHERE date = ?1")
            .bind(&date_key)
            .execute(&mut *transaction)
            .await?;

        for flow in flows {
            sqlx::query(
                r#"
                INSERT INTO sector_flows
                (date, sector, total_flow_bn, avg_price_change_pct, avg_pe, avg_pb, stock_count)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&date_key)
            .bind(flow.sector.key())
            .bind(flow.total_flow_bn)
            .bind(flow.avg_price_change_pct)
            .bind(flow.avg_pe)
            .bind(flow.avg_pb)
            .bind(flow.stock_count as i64)
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;
        Ok(())
    }

    /// Sector summary of one date, largest inflow first
    pub async fn load_sector_flows(&self, date: NaiveDate) -> Result<Vec<SectorFlow>> {
        let rows = sqlx::query(
            r#"
            SELECT date, sector, total_flow_bn, avg_price_change_pct, avg_pe, avg_pb, stock_count
            FROM sector_flows
            WHERE date = ?1
            ORDER BY total_flow_bn DESC, sector ASC
            "#,
        )
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_sector_flow).collect()
    }

    pub async fn get_stats(&self) -> Result<StoreStats> {
        let total_points: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_points")
            .fetch_one(&self.pool)
            .await?;
        let unique_tickers: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT ticker) FROM price_points")
            .fetch_one(&self.pool)
            .await?;

        let range = sqlx::query("SELECT MIN(time) AS first, MAX(time) AS last FROM price_points")
            .fetch_one(&self.pool)
            .await?;
        let first: Option<i64> = range.try_get("first")?;
        let last: Option<i64> = range.try_get("last")?;
        let date_range = match (first, last) {
            (Some(first), Some(last)) => Some((timestamp_to_utc(first)?, timestamp_to_utc(last)?)),
            _ => None,
        };

        let alert_events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alert_events")
            .fetch_one(&self.pool)
            .await?;
        let undelivered_events: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM alert_events WHERE delivered = 0")
                .fetch_one(&self.pool)
                .await?;
        let aggregate_bars: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM aggregate_bars")
            .fetch_one(&self.pool)
            .await?;
        let fetch_failures: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fetch_failures")
            .fetch_one(&self.pool)
            .await?;
        let flow_snapshots: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flow_snapshots")
            .fetch_one(&self.pool)
            .await?;
        let fundamentals: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fundamentals")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            total_points,
            unique_tickers,
            date_range,
            alert_events,
            undelivered_events,
            aggregate_bars,
            fetch_failures,
            flow_snapshots,
            fundamentals,
        })
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("SQLite store closed");
    }
}

/// Rows changed by [`SqliteStore::insert_price_points`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceWrite {
    /// New rows
    pub inserted: usize,
    /// Newest rows updated with a later snapshot
    pub revised: usize,
}

/// Row counts for the status command
#[derive(Debug)]
pub struct StoreStats {
    pub total_points: i64,
    pub unique_tickers: i64,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub alert_events: i64,
    pub undelivered_events: i64,
    pub aggregate_bars: i64,
    pub fetch_failures: i64,
    pub flow_snapshots: i64,
    pub fundamentals: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn point(day: u32, close: f64) -> PricePoint {
        let time = Utc.with_ymd_and_hms(2025, 11, day, 0, 0, 0).unwrap();
        PricePoint::new("VCB", time, close, close + 100.0, close - 100.0, close, 1_000_000)
    }

    fn event(rule_id: &str, day: u32) -> AlertEvent {
        let time = Utc.with_ymd_and_hms(2025, 11, day, 0, 0, 0).unwrap();
        AlertEvent {
            id: None,
            rule_id: rule_id.to_string(),
            ticker: "VCB".to_string(),
            kind: "price_above".to_string(),
            fired_at: time,
            point_time: time,
            close: 23400.0,
            volume: 1_000_000,
            message: "test".to_string(),
            delivered: false,
            delivery_error: None,
        }
    }

    #[tokio::test]
    async fn test_file_database_creation() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");

        let store = SqliteStore::open(&db_path).await.unwrap();
        assert!(db_path.exists());
        assert_eq!(store.get_metadata("schema_version").await.unwrap().as_deref(), Some("1"));
        store.close().await;
    }

    #[tokio::test]
    async fn test_only_newest_point_is_revised() {
        let store = SqliteStore::in_memory().await.unwrap();

        let write = store.insert_price_points(&[point(3, 23200.0), point(4, 23400.0)]).await.unwrap();
        assert_eq!(write, PriceWrite { inserted: 2, revised: 0 });

        // older row: ignored
        let write = store.insert_price_points(&[point(3, 99999.0)]).await.unwrap();
        assert_eq!(write, PriceWrite::default());

        // newest row: revised, identical snapshot counts as nothing
        let write = store.insert_price_points(&[point(4, 23500.0)]).await.unwrap();
        assert_eq!(write, PriceWrite { inserted: 0, revised: 1 });
        let write = store.insert_price_points(&[point(4, 23500.0)]).await.unwrap();
        assert_eq!(write, PriceWrite::default());

        // a new day: day 4 becomes immutable
        let write = store
            .insert_price_points(&[point(4, 1.0), point(5, 23600.0)])
            .await
            .unwrap();
        assert_eq!(write, PriceWrite { inserted: 1, revised: 0 });
        let write = store.insert_price_points(&[point(4, 2.0)]).await.unwrap();
        assert_eq!(write, PriceWrite::default());

        let points = store.latest_points("VCB", Interval::Daily, 10).await.unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].close, 23200.0);
        assert_eq!(points[1].close, 23500.0);
        assert!(points[0].time < points[2].time);

        let latest_two = store.latest_points("VCB", Interval::Daily, 2).await.unwrap();
        assert_eq!(latest_two[0], points[1]);
    }

    #[tokio::test]
    async fn test_points_between_is_half_open() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_price_points(&[point(3, 1.0), point(4, 2.0), point(5, 3.0)])
            .await
            .unwrap();

        let start = Utc.with_ymd_and_hms(2025, 11, 4, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 11, 5, 0, 0, 0).unwrap();
        let points = store
            .points_between("VCB", Interval::Daily, Some(start), Some(end))
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].close, 2.0);

        let all = store.points_between("VCB", Interval::Daily, None, None).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_alert_event_unique_per_rule_and_point() {
        let store = SqliteStore::in_memory().await.unwrap();

        let id = store.record_alert_event(&event("r1", 3)).await.unwrap();
        assert!(id.is_some());
        assert_eq!(store.record_alert_event(&event("r1", 3)).await.unwrap(), None);
        assert!(store.record_alert_event(&event("r2", 3)).await.unwrap().is_some());

        // later snapshot of the same open bar is a distinct firing
        let mut revised = event("r1", 3);
        revised.close = 23800.0;
        assert!(store.record_alert_event(&revised).await.unwrap().is_some());

        store.mark_delivery(id.unwrap(), false, Some("timeout")).await.unwrap();
        let events = store.recent_alert_events(Some("r1"), 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].id, id);
        assert_eq!(events[1].delivery_error.as_deref(), Some("timeout"));
        assert_eq!(store.recent_alert_events(None, 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rule_state_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let state = RuleState {
            last_close: Some(10.6),
            last_volume: Some(1_000_000),
            last_condition: true,
            latched: true,
            held_in_cooldown: false,
            last_fired_at: Some(Utc.with_ymd_and_hms(2025, 11, 3, 2, 0, 0).unwrap()),
            last_point_time: Some(Utc.with_ymd_and_hms(2025, 11, 3, 2, 0, 0).unwrap()),
        };

        store.save_rule_state("abc-up", &RuleState::default()).await.unwrap();
        store.save_rule_state("abc-up", &state).await.unwrap();

        let states = store.load_rule_states().await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states["abc-up"], state);
    }

    #[tokio::test]
    async fn test_stats_and_failures() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_price_points(&[point(3, 1.0), point(4, 2.0)]).await.unwrap();
        store
            .record_fetch_failure(&TickerFailure {
                ticker: "XYZ".to_string(),
                error: "Request timed out".to_string(),
                attempts: 3,
                at: Utc::now(),
            })
            .await
            .unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_points, 2);
        assert_eq!(stats.unique_tickers, 1);
        assert_eq!(stats.fetch_failures, 1);
        assert!(stats.date_range.is_some());

        let failures = store.recent_fetch_failures(5).await.unwrap();
        assert_eq!(failures[0].ticker, "XYZ");
        assert_eq!(failures[0].attempts, 3);
        assert_eq!(store.tickers(Interval::Daily).await.unwrap(), vec!["VCB"]);
    }

    #[tokio::test]
    async fn test_fundamentals_and_sector_flows() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut vcb = Fundamentals {
            ticker: "VCB".to_string(),
            eps: Some(5000.0),
            revenue: None,
            equity: Some(2.0e14),
            shares_outstanding: Some(8.0e9),
        };
        store.upsert_fundamentals(&[vcb.clone()]).await.unwrap();
        vcb.eps = Some(5200.0);
        store.upsert_fundamentals(&[vcb.clone()]).await.unwrap();

        let loaded = store.load_fundamentals().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["VCB"], vcb);

        let date = NaiveDate::from_ymd_opt(2025, 11, 4).unwrap();
        let flow = |sector, total_flow_bn| SectorFlow {
            date,
            sector,
            total_flow_bn,
            avg_price_change_pct: 1.5,
            avg_pe: None,
            avg_pb: Some(2.4),
            stock_count: 2,
        };
        store
            .replace_sector_flows(date, &[flow(Sector::Steel, -3.0), flow(Sector::Banking, 4.0)])
            .await
            .unwrap();
        let flows = store.load_sector_flows(date).await.unwrap();
        assert_eq!(flows[0], flow(Sector::Banking, 4.0));
        assert_eq!(flows[1].sector, Sector::Steel);

        store.replace_sector_flows(date, &[flow(Sector::Power, 1.0)]).await.unwrap();
        let flows = store.load_sector_flows(date).await.unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].sector, Sector::Power);
        let other_day = NaiveDate::from_ymd_opt(2025, 11, 5).unwrap();
        assert!(store.load_sector_flows(other_day).await.unwrap().is_empty());
    }
}
