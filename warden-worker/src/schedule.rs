//! Recurrence expressions
//!
//! Two notations are understood, both evaluated in UTC:
//!
//! - cron: `min hour dom month dow`, or six fields with leading seconds.
//!   Fields take `*`, `?`, lists, ranges, steps and month/weekday names.
//!   When both day fields are restricted a day matches either of them.
//! - text: `every 10 minutes`, `every hour`, `every day at 17:30`,
//!   `at 09:00`. `every` may be left out for the singular forms.
//!
//! An expression is read as cron unless it contains letters other than
//! month and weekday names.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use std::str::FromStr;

/// Schedule value that marks a one-off job
pub const ONCE: &str = "once";

/// How far ahead an occurrence is searched for. Covers the leap-year and
/// weekday cycle, so an expression without a match here never matches.
const SEARCH_DAYS: u32 = 366 * 28;

/// `NaiveDate::num_days_from_ce` of 1970-01-04, the first Sunday after the epoch
const EPOCH_SUNDAY: i32 = 719_166;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// Unparsable expression, or one that never fires
    #[error("Invalid schedule provided: {0}")]
    Invalid(String),
}

/// Allowed values of one field, bit `n` standing for value `n`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bits(u64);

impl Bits {
    fn stepped(min: u32, max: u32, step: u32) -> Self {
        let mut bits = 0;
        for value in (min..=max).step_by(step.max(1) as usize) {
            bits |= 1 << value;
        }
        Bits(bits)
    }

    fn all(min: u32, max: u32) -> Self {
        Self::stepped(min, max, 1)
    }

    fn single(value: u32) -> Self {
        Bits(1 << value)
    }

    fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }
}

/// A parsed recurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    source: String,
    seconds: Bits,
    minutes: Bits,
    hours: Bits,
    days_of_month: Bits,
    months: Bits,
    days_of_week: Bits,
    dom_restricted: bool,
    dow_restricted: bool,
    /// Fires only in every n-th week counted from the epoch
    week_step: u32,
}

impl Schedule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let source = expression.trim();
        let parsed = if source.is_empty() {
            None
        } else if is_cron(source) {
            parse_cron(source)
        } else {
            parse_text(&source.to_lowercase())
        };

        let mut schedule = parsed.ok_or_else(|| ScheduleError::Invalid(expression.to_string()))?;
        schedule.source = source.to_string();
        Ok(schedule)
    }

    /// The expression as it was given, trimmed
    pub fn source(&self) -> &str {
        &self.source
    }

    /// First occurrence strictly after `after`, on a whole second
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let start = Utc
            .timestamp_opt(after.timestamp() + 1, 0)
            .single()
            .ok_or_else(|| self.invalid())?;

        let mut date = start.date_naive();
        let mut from = (start.hour(), start.minute(), start.second());

        for _ in 0..SEARCH_DAYS {
            if self.matches_date(date) {
                if let Some((hour, minute, second)) = self.first_time_from(from) {
                    let naive = date.and_hms_opt(hour, minute, second).ok_or_else(|| self.invalid())?;
                    return Ok(Utc.from_utc_datetime(&naive));
                }
            }
            date = date.succ_opt().ok_or_else(|| self.invalid())?;
            from = (0, 0, 0);
        }

        Err(self.invalid())
    }

    fn invalid(&self) -> ScheduleError {
        ScheduleError::Invalid(self.source.clone())
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.months.contains(date.month()) {
            return false;
        }

        let dom = self.days_of_month.contains(date.day());
        let dow = self.days_of_week.contains(date.weekday().num_days_from_sunday());
        let day = if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        };

        let week = (date.num_days_from_ce() - EPOCH_SUNDAY).div_euclid(7);
        day && (self.week_step <= 1 || week.rem_euclid(self.week_step as i32) == 0)
    }

    fn first_time_from(&self, (from_hour, from_minute, from_second): (u32, u32, u32)) -> Option<(u32, u32, u32)> {
        for hour in (from_hour..24).filter(|h| self.hours.contains(*h)) {
            let first_minute = if hour == from_hour { from_minute } else { 0 };
            for minute in (first_minute..60).filter(|m| self.minutes.contains(*m)) {
                let first_second = if hour == from_hour && minute == from_minute {
                    from_second
                } else {
                    0
                };
                if let Some(second) = (first_second..60).find(|s| self.seconds.contains(*s)) {
                    return Some((hour, minute, second));
                }
            }
        }
        None
    }

    /// Midnight every day; the text forms narrow it down
    fn daily() -> Self {
        Self {
            source: String::new(),
            seconds: Bits::single(0),
            minutes: Bits::single(0),
            hours: Bits::single(0),
            days_of_month: Bits::all(1, 31),
            months: Bits::all(1, 12),
            days_of_week: Bits::all(0, 6),
            dom_restricted: false,
            dow_restricted: false,
            week_step: 1,
        }
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// True when `schedule` marks a one-off job
pub fn is_once(schedule: &str) -> bool {
    schedule.trim().eq_ignore_ascii_case(ONCE)
}

fn is_cron(source: &str) -> bool {
    source
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|word| !word.is_empty())
        .all(|word| name_value(word, &MONTH_NAMES).is_some() || name_value(word, &WEEKDAY_NAMES).is_some())
}

fn name_value(word: &str, names: &[&str]) -> Option<u32> {
    names
        .iter()
        .position(|name| name.eq_ignore_ascii_case(word))
        .map(|index| index as u32)
}

fn parse_cron(source: &str) -> Option<Schedule> {
    let fields: Vec<&str> = source.split_whitespace().collect();
    let (seconds, rest) = match fields.len() {
        5 => ("0", &fields[..]),
        6 => (fields[0], &fields[1..]),
        _ => return None,
    };

    let days_of_week = parse_field(rest[4], 0, 7, Some((&WEEKDAY_NAMES[..], 0)))?;
    // 7 is another spelling of Sunday
    let days_of_week = if days_of_week.contains(7) {
        Bits((days_of_week.0 | 1) & !(1 << 7))
    } else {
        days_of_week
    };

    Some(Schedule {
        source: String::new(),
        seconds: parse_field(seconds, 0, 59, None)?,
        minutes: parse_field(rest[0], 0, 59, None)?,
        hours: parse_field(rest[1], 0, 23, None)?,
        days_of_month: parse_field(rest[2], 1, 31, None)?,
        months: parse_field(rest[3], 1, 12, Some((&MONTH_NAMES[..], 1)))?,
        days_of_week,
        dom_restricted: !is_wildcard(rest[2]),
        dow_restricted: !is_wildcard(rest[4]),
        week_step: 1,
    })
}

fn is_wildcard(field: &str) -> bool {
    field.starts_with('*') || field == "?"
}

fn parse_field(field: &str, min: u32, max: u32, names: Option<(&[&str], u32)>) -> Option<Bits> {
    let value = |token: &str| -> Option<u32> {
        token.parse::<u32>().ok().or_else(|| {
            let (names, offset) = names?;
            name_value(token, names).map(|index| index + offset)
        })
    };

    let mut bits = 0;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step.parse::<u32>().ok().filter(|step| *step > 0)?)),
            None => (part, None),
        };

        let (start, end) = if range == "*" || range == "?" {
            (min, max)
        } else if let Some((start, end)) = range.split_once('-') {
            (value(start)?, value(end)?)
        } else {
            let start = value(range)?;
            (start, if step.is_some() { max } else { start })
        };

        if start < min || end > max || start > end {
            return None;
        }
        bits |= Bits::stepped(start, end, step.unwrap_or(1)).0;
    }

    Some(Bits(bits))
}

fn parse_text(text: &str) -> Option<Schedule> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let (every, words) = match words.split_first() {
        Some((&"every", rest)) => (true, rest),
        _ => (false, &words[..]),
    };

    match words {
        ["at", time] => at_time(time),
        ["day", "at", time] if every => at_time(time),
        [unit] if !unit.ends_with('s') => interval(1, unit),
        [count, unit] if every => interval(count.parse().ok()?, unit),
        _ => None,
    }
}

fn at_time(time: &str) -> Option<Schedule> {
    let (hour, minute) = time.split_once(':')?;
    let (hour, minute) = (hour.parse::<u32>().ok()?, minute.parse::<u32>().ok()?);
    if hour > 23 || minute > 59 {
        return None;
    }

    Some(Schedule {
        hours: Bits::single(hour),
        minutes: Bits::single(minute),
        ..Schedule::daily()
    })
}

fn interval(count: u32, unit: &str) -> Option<Schedule> {
    if count == 0 {
        return None;
    }

    let daily = Schedule::daily();
    let schedule = match unit.strip_suffix('s').unwrap_or(unit) {
        "second" => Schedule {
            seconds: Bits::stepped(0, 59, count),
            minutes: Bits::all(0, 59),
            hours: Bits::all(0, 23),
            ..daily
        },
        "minute" => Schedule {
            minutes: Bits::stepped(0, 59, count),
            hours: Bits::all(0, 23),
            ..daily
        },
        "hour" => Schedule {
            hours: Bits::stepped(0, 23, count),
            ..daily
        },
        "day" => Schedule {
            days_of_month: Bits::stepped(1, 31, count),
            ..daily
        },
        "week" => Schedule {
            days_of_week: Bits::single(0),
            week_step: count,
            ..daily
        },
        _ => return None,
    };

    Some(schedule)
}
