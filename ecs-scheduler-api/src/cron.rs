//! Schedule expression parsing and firing rule computation.
//!
//! A job schedule is up to eight whitespace-separated tokens assigned in
//! order to `second minute hour day_of_week week day month year`. Day
//! expressions that contain spaces (`2nd wed`, `last fri`) are written with
//! underscores in the raw schedule and converted during parsing. A `?` in
//! one of the first three positions is replaced with a random value at parse
//! time and written back into the schedule string so the job keeps firing at
//! the same moment across restarts.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use rand::Rng;

use ecs_scheduler_common::ParsedSchedule;

const FIELD_NAMES: [&str; 8] = [
    "second",
    "minute",
    "hour",
    "day_of_week",
    "week",
    "day",
    "month",
    "year",
];

const WILDCARD: &str = "?";

const DOW_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Parse a raw schedule expression into named cron fields.
///
/// Returns the rewritten schedule (with any `?` wildcards substituted) and
/// the parsed field set. Field expressions are not semantically validated
/// here; that happens when a [`CronRule`] is constructed.
pub fn parse_schedule(schedule: &str) -> Result<(String, ParsedSchedule), String> {
    let tokens: Vec<&str> = schedule.split_whitespace().collect();
    if tokens.is_empty() {
        return Err("schedule must contain at least one field".to_string());
    }
    if tokens.len() > FIELD_NAMES.len() {
        return Err(format!(
            "schedule contains {} fields; at most {} are allowed",
            tokens.len(),
            FIELD_NAMES.len()
        ));
    }

    let mut fields: Vec<Option<String>> = vec![None; FIELD_NAMES.len()];
    for (slot, token) in fields.iter_mut().zip(&tokens) {
        *slot = Some(token.to_string());
    }

    // Day expressions use underscores in place of spaces ('last_fri').
    if let Some(day) = &fields[5] {
        fields[5] = Some(day.replace('_', " "));
    }

    let mut rewritten = schedule.trim().to_string();
    let mut rng = rand::thread_rng();
    for (i, upper) in [(0usize, 60u32), (1, 60), (2, 24)] {
        if fields[i].as_deref() == Some(WILDCARD) {
            let value = rng.gen_range(0..upper).to_string();
            rewritten = rewritten.replacen(WILDCARD, &value, 1);
            fields[i] = Some(value);
        }
    }

    let mut fields = fields.into_iter();
    let parsed = ParsedSchedule {
        second: fields.next().flatten(),
        minute: fields.next().flatten(),
        hour: fields.next().flatten(),
        day_of_week: fields.next().flatten(),
        week: fields.next().flatten(),
        day: fields.next().flatten(),
        month: fields.next().flatten(),
        year: fields.next().flatten(),
    };
    Ok((rewritten, parsed))
}

/// A single cron field constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CronField {
    /// Unconstrained (`*` or omitted).
    Any,
    /// Expanded sorted set of allowed values.
    Values(Vec<u32>),
    /// Last day of the month.
    Last,
    /// Last occurrence of a weekday in the month.
    LastWeekday(u32),
    /// Nth occurrence of a weekday in the month (1-based).
    NthWeekday(u32, u32),
}

impl CronField {
    fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Values(values) => values.binary_search(&value).is_ok(),
            _ => false,
        }
    }
}

/// A compiled firing rule: the eight field constraints plus optional date
/// bounds and a timezone for local-time evaluation.
#[derive(Debug, Clone)]
pub struct CronRule {
    second: CronField,
    minute: CronField,
    hour: CronField,
    day_of_week: CronField,
    week: CronField,
    day: CronField,
    month: CronField,
    year: CronField,
    timezone: Tz,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl CronRule {
    /// Compile the parsed schedule fields into a firing rule.
    ///
    /// Returns all field syntax errors at once so they can be reported as
    /// validation errors together.
    pub fn new(schedule: &ParsedSchedule, timezone: Tz) -> Result<Self, Vec<String>> {
        let mut errors = Vec::new();
        let mut field = |name: &str, expr: &Option<String>, kind: FieldKind| {
            match parse_field(expr.as_deref(), kind) {
                Ok(f) => f,
                Err(e) => {
                    errors.push(format!("Invalid schedule syntax: {name}: {e}"));
                    CronField::Any
                }
            }
        };

        let rule = Self {
            second: field("second", &schedule.second, FieldKind::Range(0, 59)),
            minute: field("minute", &schedule.minute, FieldKind::Range(0, 59)),
            hour: field("hour", &schedule.hour, FieldKind::Range(0, 23)),
            day_of_week: field("day_of_week", &schedule.day_of_week, FieldKind::DayOfWeek),
            week: field("week", &schedule.week, FieldKind::Range(1, 53)),
            day: field("day", &schedule.day, FieldKind::Day),
            month: field("month", &schedule.month, FieldKind::Month),
            year: field("year", &schedule.year, FieldKind::Range(1970, 9999)),
            timezone,
            start: None,
            end: None,
        };

        if errors.is_empty() {
            Ok(rule)
        } else {
            Err(errors)
        }
    }

    /// Constrain the rule to fire only within the given bounds.
    pub fn with_bounds(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Compute the next firing instant strictly after `after`.
    ///
    /// Returns `None` when the rule has no further firings (past its end
    /// bound or outside its year set).
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut floor = after + Duration::seconds(1);
        if let Some(start) = self.start {
            if floor < start {
                floor = start;
            }
        }

        let local = floor.with_timezone(&self.timezone);
        let mut date = local.date_naive();
        let mut after_time = Some(local.time());

        // Year constraints bound the search; four years of days covers the
        // sparsest rule (week + weekday + nth-day combinations).
        for _ in 0..(366 * 4) {
            if self.date_matches(date) {
                if let Some(time) = self.next_time_of_day(after_time) {
                    if let Some(fire) = self
                        .timezone
                        .from_local_datetime(&date.and_time(time))
                        .earliest()
                    {
                        let fire = fire.with_timezone(&Utc);
                        if fire >= floor {
                            if let Some(end) = self.end {
                                if fire > end {
                                    return None;
                                }
                            }
                            return Some(fire);
                        }
                    }
                }
            }
            date = date.succ_opt()?;
            after_time = None;
        }
        None
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        if !self.year.matches(date.year() as u32)
            || !self.month.matches(date.month())
            || !self.week.matches(date.iso_week().week())
            || !self
                .day_of_week
                .matches(date.weekday().num_days_from_monday())
        {
            return false;
        }
        match &self.day {
            CronField::Last => date.day() == days_in_month(date),
            CronField::LastWeekday(weekday) => {
                date.weekday().num_days_from_monday() == *weekday
                    && date.day() + 7 > days_in_month(date)
            }
            CronField::NthWeekday(n, weekday) => {
                date.weekday().num_days_from_monday() == *weekday && (date.day() - 1) / 7 + 1 == *n
            }
            field => field.matches(date.day()),
        }
    }

    /// Find the earliest time of day allowed by the hour/minute/second
    /// fields that is at or after `floor` (or the earliest overall).
    fn next_time_of_day(&self, floor: Option<NaiveTime>) -> Option<NaiveTime> {
        let hours = expand(&self.hour, 0, 23);
        let minutes = expand(&self.minute, 0, 59);
        let seconds = expand(&self.second, 0, 59);
        let (fh, fm, fs) = match floor {
            Some(t) => (t.hour(), t.minute(), t.second()),
            None => return NaiveTime::from_hms_opt(hours[0], minutes[0], seconds[0]),
        };

        for &h in &hours {
            if h < fh {
                continue;
            }
            for &m in &minutes {
                if h == fh && m < fm {
                    continue;
                }
                for &s in &seconds {
                    if h == fh && m == fm && s < fs {
                        continue;
                    }
                    return NaiveTime::from_hms_opt(h, m, s);
                }
            }
        }
        None
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    let first_of_next = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    first_of_next.pred_opt().unwrap().day()
}

fn expand(field: &CronField, min: u32, max: u32) -> Vec<u32> {
    match field {
        CronField::Values(values) => values.clone(),
        _ => (min..=max).collect(),
    }
}

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Range(u32, u32),
    DayOfWeek,
    Month,
    Day,
}

impl FieldKind {
    fn bounds(self) -> (u32, u32) {
        match self {
            FieldKind::Range(min, max) => (min, max),
            FieldKind::DayOfWeek => (0, 6),
            FieldKind::Month => (1, 12),
            FieldKind::Day => (1, 31),
        }
    }

    fn names(self) -> Option<(&'static [&'static str], u32)> {
        match self {
            FieldKind::DayOfWeek => Some((&DOW_NAMES, 0)),
            FieldKind::Month => Some((&MONTH_NAMES, 1)),
            _ => None,
        }
    }
}

fn parse_field(expr: Option<&str>, kind: FieldKind) -> Result<CronField, String> {
    let expr = match expr {
        None => return Ok(CronField::Any),
        Some(e) => e.trim(),
    };
    if expr == "*" {
        return Ok(CronField::Any);
    }

    if matches!(kind, FieldKind::Day) {
        if let Some(field) = parse_day_expression(expr)? {
            return Ok(field);
        }
    }

    let (min, max) = kind.bounds();
    let mut values = Vec::new();
    for part in expr.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => (
                r,
                s.parse::<u32>()
                    .map_err(|_| format!("invalid step value '{s}'"))?,
            ),
            None => (part, 1),
        };
        if step == 0 {
            return Err("step value cannot be zero".to_string());
        }

        let (start, end) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            (parse_value(a, kind)?, parse_value(b, kind)?)
        } else {
            let v = parse_value(range_part, kind)?;
            (v, v)
        };
        if start > end || start < min || end > max {
            return Err(format!(
                "range {start}-{end} out of bounds (must be {min}-{max})"
            ));
        }
        values.extend((start..=end).step_by(step as usize));
    }

    values.sort_unstable();
    values.dedup();
    if values.is_empty() {
        return Err(format!("no values in expression '{expr}'"));
    }
    Ok(CronField::Values(values))
}

fn parse_value(token: &str, kind: FieldKind) -> Result<u32, String> {
    let token = token.trim();
    if let Ok(v) = token.parse::<u32>() {
        return Ok(v);
    }
    if let Some((names, offset)) = kind.names() {
        if let Some(idx) = names.iter().position(|n| n.eq_ignore_ascii_case(token)) {
            return Ok(idx as u32 + offset);
        }
    }
    Err(format!("invalid value '{token}'"))
}

/// Day-of-month special forms: `last`, `last <weekday>`, `<n>th <weekday>`.
fn parse_day_expression(expr: &str) -> Result<Option<CronField>, String> {
    if expr.eq_ignore_ascii_case("last") {
        return Ok(Some(CronField::Last));
    }
    let Some((head, tail)) = expr.split_once(' ') else {
        return Ok(None);
    };
    let weekday = parse_value(tail, FieldKind::DayOfWeek)?;
    if weekday > 6 {
        return Err(format!("invalid weekday '{tail}'"));
    }
    if head.eq_ignore_ascii_case("last") {
        return Ok(Some(CronField::LastWeekday(weekday)));
    }
    let digits: String = head.chars().take_while(|c| c.is_ascii_digit()).collect();
    let ordinal = &head[digits.len()..];
    let n: u32 = digits
        .parse()
        .map_err(|_| format!("invalid day expression '{expr}'"))?;
    if !matches!(ordinal, "st" | "nd" | "rd" | "th") || !(1..=5).contains(&n) {
        return Err(format!("invalid day expression '{expr}'"));
    }
    Ok(Some(CronField::NthWeekday(n, weekday)))
}
