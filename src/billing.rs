use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;

/// Rates are quoted per 45-minute unit; sessions of any length bill
/// proportionally, rounded to cents.
pub fn session_cost(rate_per_45: f64, duration_min: i64) -> f64 {
    round_to_cents(rate_per_45 * (duration_min as f64) / 45.0)
}

/// Half-up rounding to 2 decimals.
pub fn round_to_cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Inclusive start / exclusive end ISO dates covering one calendar month.
/// ISO strings compare lexicographically, so these bound SQL range scans.
pub fn month_bounds(year: i64, month: i64) -> Option<(String, String)> {
    let year = i32::try_from(year).ok()?;
    let month = u32::try_from(month).ok()?;
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((
        start.format("%Y-%m-%d").to_string(),
        end.format("%Y-%m-%d").to_string(),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

#[derive(Debug)]
pub struct MonthBucket<T> {
    pub key: MonthKey,
    pub items: Vec<T>,
}

/// Buckets items by calendar month, newest month first. Items keep their
/// incoming order inside a bucket; items without a parseable date are
/// dropped (dates are validated before they reach storage).
pub fn group_by_month<T, F>(items: Vec<T>, date_of: F) -> Vec<MonthBucket<T>>
where
    F: Fn(&T) -> Option<NaiveDate>,
{
    let mut buckets: BTreeMap<MonthKey, Vec<T>> = BTreeMap::new();
    for item in items {
        let Some(date) = date_of(&item) else { continue };
        buckets.entry(MonthKey::of(date)).or_default().push(item);
    }
    buckets
        .into_iter()
        .rev()
        .map(|(key, items)| MonthBucket { key, items })
        .collect()
}
