use super::Sector;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Latest reported financials of a ticker, in VND
///
/// Loaded from a CSV with the columns `ticker,eps,revenue,equity,shares_outstanding`;
/// empty cells are missing values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    pub ticker: String,
    pub eps: Option<f64>,
    pub revenue: Option<f64>,
    pub equity: Option<f64>,
    pub shares_outstanding: Option<f64>,
}

/// Price multiples at a given price; None when the input is missing or not positive
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub pe: Option<f64>,
    pub pb: Option<f64>,
    pub ps: Option<f64>,
    /// Market capitalisation in billion VND
    pub market_cap_bn: Option<f64>,
}

/// Money flow of one ticker's newest bar at the time it was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub ticker: String,
    pub sector: Sector,
    pub taken_at: DateTime<Utc>,
    /// Time of the bar the flow was computed from
    pub bar_time: DateTime<Utc>,
    pub open: f64,
    pub close: f64,
    pub volume: u64,
    pub price_change_pct: f64,
    /// (close - open) × volume, in VND
    pub money_flow: f64,
    pub valuation: Valuation,
}

impl FlowSnapshot {
    /// Money flow in billion VND
    pub fn money_flow_bn(&self) -> f64 {
        self.money_flow / 1e9
    }
}

/// Money flow of one sector on one trading date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorFlow {
    pub date: NaiveDate,
    pub sector: Sector,
    /// Sum of member flows, billion VND
    pub total_flow_bn: f64,
    pub avg_price_change_pct: f64,
    /// Mean over members with a P/E
    pub avg_pe: Option<f64>,
    pub avg_pb: Option<f64>,
    pub stock_count: u32,
}
