use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::time::Duration;

/// Fixed-date public holidays (month, day)
const FIXED_HOLIDAYS: &[(u32, u32)] = &[(1, 1), (4, 30), (5, 1), (9, 2)];

/// Lunar New Year market closures, inclusive ranges per year
const LUNAR_NEW_YEAR: &[(i32, (u32, u32), (u32, u32))] = &[
    (2024, (2, 8), (2, 14)),
    (2025, (1, 27), (2, 4)),
    (2026, (2, 15), (2, 21)),
    (2027, (2, 5), (2, 11)),
];

/// Hung Kings Commemoration (10th day of the 3rd lunar month)
const HUNG_KINGS: &[(i32, u32, u32)] = &[(2024, 4, 18), (2025, 4, 7), (2026, 4, 26), (2027, 4, 16)];

/// Trading hours configuration for Vietnam stock market
pub struct TradingHours {
    /// Sessions as (start_hour, start_minute, end_hour, end_minute), both ends inclusive
    pub sessions: Vec<(u32, u32, u32, u32)>,
    pub timezone: &'static str, // "Asia/Ho_Chi_Minh"
}

impl Default for TradingHours {
    fn default() -> Self {
        Self {
            // Morning 9:00-11:30, afternoon 13:00-15:00
            sessions: vec![(9, 0, 11, 30), (13, 0, 15, 0)],
            timezone: "Asia/Ho_Chi_Minh",
        }
    }
}

impl TradingHours {
    fn tz(&self) -> Tz {
        match self.timezone.parse() {
            Ok(tz) => tz,
            Err(e) => {
                tracing::warn!("Failed to parse timezone '{}': {}, using Asia/Ho_Chi_Minh", self.timezone, e);
                chrono_tz::Asia::Ho_Chi_Minh
            }
        }
    }

    /// Whether a local wall-clock time falls inside a session
    pub fn in_session(&self, time: NaiveTime) -> bool {
        let current = (time.hour(), time.minute());
        self.sessions
            .iter()
            .any(|&(sh, sm, eh, em)| current >= (sh, sm) && current <= (eh, em))
    }

    /// Whether the market is open at the given instant
    pub fn is_open_at(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&self.tz());
        is_trading_day(local.date_naive()) && self.in_session(local.time())
    }

    /// Today's date on the exchange calendar
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz()).date_naive()
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Public holiday on which the exchange is closed
///
/// Lunar dates are only known for the years in the tables; other years fall
/// back to the fixed holidays.
pub fn is_holiday(date: NaiveDate) -> bool {
    let (year, month, day) = (date.year(), date.month(), date.day());

    if FIXED_HOLIDAYS.contains(&(month, day)) {
        return true;
    }
    if LUNAR_NEW_YEAR
        .iter()
        .any(|&(y, from, to)| y == year && (month, day) >= from && (month, day) <= to)
    {
        return true;
    }
    HUNG_KINGS
        .iter()
        .any(|&(y, m, d)| y == year && m == month && d == day)
}

pub fn is_trading_day(date: NaiveDate) -> bool {
    !is_weekend(date) && !is_holiday(date)
}

/// Check if current time is within trading hours
pub fn is_trading_hours() -> bool {
    TradingHours::default().is_open_at(Utc::now())
}

/// Whether today (exchange time) is a trading day
pub fn is_trading_day_today() -> bool {
    let hours = TradingHours::default();
    is_trading_day(hours.local_date(Utc::now()))
}

/// Get appropriate sync interval based on trading hours
pub fn get_sync_interval(trading_interval: Duration, non_trading_interval: Duration) -> Duration {
    if is_trading_hours() {
        trading_interval
    } else {
        non_trading_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_trading_hours_config() {
        let config = TradingHours::default();
        assert_eq!(config.sessions.len(), 2);
        assert_eq!(config.timezone, "Asia/Ho_Chi_Minh");
        assert_eq!(config.sessions[0], (9, 0, 11, 30));
    }

    #[test]
    fn test_holidays() {
        assert!(is_holiday(date(2025, 9, 2)));
        assert!(is_holiday(date(2025, 4, 30)));
        assert!(is_holiday(date(2025, 1, 31)));
        assert!(is_holiday(date(2025, 2, 4)));
        assert!(!is_holiday(date(2025, 2, 5)));
        assert!(is_holiday(date(2026, 4, 26)));
        assert!(!is_holiday(date(2025, 11, 4)));
    }

    #[test]
    fn test_trading_day() {
        // Tuesday
        assert!(is_trading_day(date(2025, 11, 4)));
        // Saturday
        assert!(!is_trading_day(date(2025, 11, 8)));
        // Tet, a Wednesday
        assert!(!is_trading_day(date(2025, 1, 29)));
    }

    #[test]
    fn test_sessions() {
        let hours = TradingHours::default();
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert!(hours.in_session(t(9, 0)));
        assert!(hours.in_session(t(11, 30)));
        assert!(!hours.in_session(t(12, 0)));
        assert!(hours.in_session(t(14, 59)));
        assert!(!hours.in_session(t(15, 1)));
        assert!(!hours.in_session(t(8, 59)));
    }

    #[test]
    fn test_open_at_uses_vietnam_time() {
        let hours = TradingHours::default();
        // 03:00 UTC = 10:00 ICT on Tuesday
        let open = Utc.with_ymd_and_hms(2025, 11, 4, 3, 0, 0).unwrap();
        assert!(hours.is_open_at(open));
        // 05:30 UTC = 12:30 ICT lunch break
        let lunch = Utc.with_ymd_and_hms(2025, 11, 4, 5, 30, 0).unwrap();
        assert!(!hours.is_open_at(lunch));
        // 10:00 ICT on National Day
        let holiday = Utc.with_ymd_and_hms(2025, 9, 2, 3, 0, 0).unwrap();
        assert!(!hours.is_open_at(holiday));
        // 10:00 ICT on a Saturday
        let saturday = Utc.with_ymd_and_hms(2025, 11, 8, 3, 0, 0).unwrap();
        assert!(!hours.is_open_at(saturday));
    }
}
