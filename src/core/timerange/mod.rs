//! Symbolic time range codes and their resolution into concrete half-open windows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::core::config::EnvMap;
use crate::core::error::{CalcError, Result};

/// Every supported code, current periods first.
pub const ALL_RANGES: &[&str] = &[
    "7d", "30d", "q", "ty", "y", "2y", "a", "7dp", "30dp", "qp", "typ", "yp", "2yp",
];

/// Current-period codes only.
pub const ALL_CURRENT_RANGES: &[&str] = &["7d", "30d", "q", "ty", "y", "2y", "a"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeFamily {
    Week,
    Month,
    Quarter,
    YearToDate,
    Year,
    TwoYears,
    AllTime,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub family: RangeFamily,
    /// Shift the window one further period into the past.
    pub previous: bool,
}

impl TimeRange {
    pub fn as_code(&self) -> &'static str {
        match (self.family, self.previous) {
            (RangeFamily::Week, false) => "7d",
            (RangeFamily::Week, true) => "7dp",
            (RangeFamily::Month, false) => "30d",
            (RangeFamily::Month, true) => "30dp",
            (RangeFamily::Quarter, false) => "q",
            (RangeFamily::Quarter, true) => "qp",
            (RangeFamily::YearToDate, false) => "ty",
            (RangeFamily::YearToDate, true) => "typ",
            (RangeFamily::Year, false) => "y",
            (RangeFamily::Year, true) => "yp",
            (RangeFamily::TwoYears, false) => "2y",
            (RangeFamily::TwoYears, true) => "2yp",
            (RangeFamily::AllTime, _) => "a",
            (RangeFamily::Custom, _) => "c",
        }
    }

    pub fn is_custom(&self) -> bool {
        self.family == RangeFamily::Custom
    }
}

impl FromStr for TimeRange {
    type Err = CalcError;

    fn from_str(code: &str) -> Result<Self> {
        let (family, previous) = match code.trim() {
            "7d" => (RangeFamily::Week, false),
            "7dp" => (RangeFamily::Week, true),
            "30d" => (RangeFamily::Month, false),
            "30dp" => (RangeFamily::Month, true),
            "q" => (RangeFamily::Quarter, false),
            "qp" => (RangeFamily::Quarter, true),
            "ty" => (RangeFamily::YearToDate, false),
            "typ" => (RangeFamily::YearToDate, true),
            "y" => (RangeFamily::Year, false),
            "yp" => (RangeFamily::Year, true),
            "2y" => (RangeFamily::TwoYears, false),
            "2yp" => (RangeFamily::TwoYears, true),
            "a" => (RangeFamily::AllTime, false),
            "c" => (RangeFamily::Custom, false),
            other => {
                return Err(CalcError::config(format!(
                    "unknown time range: '{}'",
                    other
                )));
            }
        };
        Ok(TimeRange { family, previous })
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Alignment flags and custom bounds that influence resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeOptions {
    pub week_daily: bool,
    pub month_daily: bool,
    pub quarter_daily: bool,
    pub year_daily: bool,
    pub year2_daily: bool,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

impl RangeOptions {
    pub fn from_env(env: &EnvMap) -> Self {
        Self {
            week_daily: env.flag("CALC_WEEK_DAILY"),
            month_daily: env.flag("CALC_MONTH_DAILY"),
            quarter_daily: env.flag("CALC_QUARTER_DAILY"),
            year_daily: env.flag("CALC_YEAR_DAILY"),
            year2_daily: env.flag("CALC_YEAR2_DAILY"),
            date_from: env.non_empty("DATE_FROM").map(str::to_string),
            date_to: env.non_empty("DATE_TO").map(str::to_string),
        }
    }
}

/// Half-open interval `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn date_from(&self) -> NaiveDate {
        self.from.date_naive()
    }

    pub fn date_to(&self) -> NaiveDate {
        self.to.date_naive()
    }

    /// Bounds as store-native date literals: `'YYYY-MM-DD'`.
    pub fn quoted(&self) -> (String, String) {
        (
            format!("'{}'", self.date_from().format("%Y-%m-%d")),
            format!("'{}'", self.date_to().format("%Y-%m-%d")),
        )
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.from.format("%Y-%m-%d %H:%M:%S"),
            self.to.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

enum Width {
    Days(u64),
    Months(u32),
}

pub fn resolve(range: TimeRange, now: DateTime<Utc>, opts: &RangeOptions) -> Result<TimeWindow> {
    let today = day_start(now);
    let (end, width) = match range.family {
        RangeFamily::Week => {
            let end = if opts.week_daily { today } else { week_start(now) };
            (end, Width::Days(7))
        }
        RangeFamily::Month => {
            if opts.month_daily {
                (today, Width::Days(30))
            } else {
                (month_start(now), Width::Months(1))
            }
        }
        RangeFamily::Quarter => {
            let end = if opts.quarter_daily { today } else { quarter_start(now)? };
            (end, Width::Months(3))
        }
        RangeFamily::Year => {
            let end = if opts.year_daily { today } else { year_start(now) };
            (end, Width::Months(12))
        }
        RangeFamily::TwoYears => {
            let end = if opts.year2_daily {
                today
            } else if now.year() % 2 != 0 {
                // 2-year windows stay on even-year boundaries
                sub(year_start(now), &Width::Months(12))?
            } else {
                year_start(now)
            };
            (end, Width::Months(24))
        }
        RangeFamily::YearToDate => return year_to_date(now, range.previous),
        RangeFamily::AllTime => {
            return Ok(TimeWindow {
                from: ymd(1970, 1, 1)?,
                to: ymd(2100, 1, 1)?,
            });
        }
        RangeFamily::Custom => return custom(opts),
    };

    let mut from = sub(end, &width)?;
    let mut to = end;
    if range.previous {
        from = sub(from, &width)?;
        to = sub(to, &width)?;
    }
    Ok(TimeWindow { from, to })
}

fn year_to_date(now: DateTime<Utc>, previous: bool) -> Result<TimeWindow> {
    let mut to = day_start(now);
    let mut from = year_start(now);
    if from == to {
        // January 1st: the year to date is the year that just ended
        from = sub(from, &Width::Months(12))?;
        to = year_start(now);
    }
    if previous {
        let diff = to - from;
        from -= diff;
        to -= diff;
    }
    Ok(TimeWindow { from, to })
}

fn custom(opts: &RangeOptions) -> Result<TimeWindow> {
    let raw_from = opts.date_from.as_deref().ok_or_else(|| {
        CalcError::config("you must specify V3_DATE_FROM when using V3_TIME_RANGE=c")
    })?;
    let raw_to = opts.date_to.as_deref().ok_or_else(|| {
        CalcError::config("you must specify V3_DATE_TO when using V3_TIME_RANGE=c")
    })?;
    let from = parse_any(raw_from)?;
    let to = parse_any(raw_to)?;
    if from > to {
        return Err(CalcError::config(format!(
            "custom range starts after it ends: '{}' > '{}'",
            raw_from, raw_to
        )));
    }
    Ok(TimeWindow { from, to })
}

/// Parses a timestamp, dropping precision from the right until only the year is left.
pub fn parse_any(raw: &str) -> Result<DateTime<Utc>> {
    const DATETIME_FORMATS: &[(&str, &str)] = &[
        ("%Y-%m-%dT%H:%M:%SZ", ""),
        ("%Y-%m-%d %H:%M:%S", ""),
        ("%Y-%m-%d %H:%M", ""),
        ("%Y-%m-%d %H:%M", ":00"),
    ];
    const DATE_FORMATS: &[(&str, &str)] = &[("%Y-%m-%d", ""), ("%Y-%m-%d", "-01"), ("%Y-%m-%d", "-01-01")];

    let raw = raw.trim();
    for (format, pad) in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&format!("{}{}", raw, pad), format) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }
    for (format, pad) in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{}{}", raw, pad), format) {
            return Ok(date_start(date));
        }
    }
    Err(CalcError::config(format!("cannot parse date: '{}'", raw)))
}

fn date_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn ymd(year: i32, month: u32, day: u32) -> Result<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, day)
        .map(date_start)
        .ok_or_else(|| CalcError::config(format!("invalid date {}-{}-{}", year, month, day)))
}

fn sub(dt: DateTime<Utc>, width: &Width) -> Result<DateTime<Utc>> {
    let shifted = match width {
        Width::Days(n) => dt.checked_sub_days(Days::new(*n)),
        Width::Months(n) => dt.checked_sub_months(Months::new(*n)),
    };
    shifted.ok_or_else(|| CalcError::config(format!("time range out of bounds at {}", dt)))
}

pub fn day_start(dt: DateTime<Utc>) -> DateTime<Utc> {
    date_start(dt.date_naive())
}

/// Weeks start on Monday.
pub fn week_start(dt: DateTime<Utc>) -> DateTime<Utc> {
    let date = dt.date_naive();
    date_start(date - Days::new(date.weekday().num_days_from_monday() as u64))
}

pub fn month_start(dt: DateTime<Utc>) -> DateTime<Utc> {
    let date = dt.date_naive();
    date_start(date - Days::new(date.day0() as u64))
}

pub fn quarter_start(dt: DateTime<Utc>) -> Result<DateTime<Utc>> {
    ymd(dt.year(), dt.month0() / 3 * 3 + 1, 1)
}

pub fn year_start(dt: DateTime<Utc>) -> DateTime<Utc> {
    let date = dt.date_naive();
    date_start(date - Days::new(date.ordinal0() as u64))
}
