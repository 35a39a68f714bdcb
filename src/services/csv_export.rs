use crate::constants::{AGGREGATE_CSV_HEADER, PRICE_CSV_HEADER};
use crate::error::Result;
use crate::models::{AggregateBar, PricePoint};
use crate::utils::format_date;
use std::io::Write;

fn format_number(value: f64) -> String {
    // Whole VND prices print without a trailing ".0"
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Write aggregate bars as CSV with a header row
pub fn write_aggregate_csv<W: Write>(writer: W, bars: &[AggregateBar]) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(AGGREGATE_CSV_HEADER)?;

    for bar in bars {
        csv_writer.write_record(&[
            bar.ticker.clone(),
            bar.period.as_str().to_string(),
            bar.period_start.format("%Y-%m-%d").to_string(),
            format_number(bar.open),
            format_number(bar.high),
            format_number(bar.low),
            format_number(bar.close),
            bar.volume.to_string(),
            bar.point_count.to_string(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(bars.len())
}

/// Write price points as CSV with a header row
pub fn write_price_csv<W: Write>(writer: W, points: &[PricePoint]) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(PRICE_CSV_HEADER)?;

    for point in points {
        csv_writer.write_record(&[
            point.ticker.clone(),
            format_date(&point.time),
            format_number(point.open),
            format_number(point.high),
            format_number(point.low),
            format_number(point.close),
            point.volume.to_string(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(points.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AggregatePeriod;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_aggregate_csv_layout() {
        let bars = vec![AggregateBar {
            ticker: "VCB".to_string(),
            period: AggregatePeriod::Week,
            period_start: Utc.with_ymd_and_hms(2025, 11, 3, 0, 0, 0).unwrap(),
            open: 23000.0,
            high: 23600.0,
            low: 22800.0,
            close: 23450.5,
            volume: 5_000_000,
            point_count: 5,
        }];

        let mut buffer = Vec::new();
        assert_eq!(write_aggregate_csv(&mut buffer, &bars).unwrap(), 1);

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ticker,period,period_start,open,high,low,close,volume,points");
        assert_eq!(lines[1], "VCB,week,2025-11-03,23000,23600,22800,23450.5,5000000,5");
    }

    #[test]
    fn test_price_csv_layout() {
        let time = Utc.with_ymd_and_hms(2025, 11, 3, 0, 0, 0).unwrap();
        let points = vec![PricePoint::new("FPT", time, 100.0, 101.0, 99.0, 100.5, 1234)];

        let mut buffer = Vec::new();
        write_price_csv(&mut buffer, &points).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(
            text,
            "ticker,time,open,high,low,close,volume\nFPT,2025-11-03 00:00:00,100,101,99,100.5,1234\n"
        );
    }
}
