use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatConfig {
    pub every: i64,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub repeat: Option<RepeatConfig>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl ScheduleConfig {
    /// Parses and sanity-checks a schedule config from jsonb. Rejects
    /// configs whose start date/time or timezone cannot be interpreted.
    pub fn parse(value: &serde_json::Value) -> Result<Self, String> {
        let config: ScheduleConfig =
            serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        if parse_timezone(&config.timezone).is_none() {
            return Err(format!("unknown timezone `{}`", config.timezone));
        }
        if parse_start_naive(&config).is_none() {
            return Err("invalid startDate/startTime".to_string());
        }
        if let Some(repeat) = &config.repeat {
            if repeat.every <= 0 || RepeatUnit::from_str(&repeat.unit).is_none() {
                return Err(format!("invalid repeat: every {} {}", repeat.every, repeat.unit));
            }
        }
        Ok(config)
    }
}

fn parse_timezone(tz: &str) -> Option<Tz> {
    if tz.trim().is_empty() {
        return Some(chrono_tz::UTC);
    }
    tz.parse::<Tz>().ok()
}

fn parse_start_naive(config: &ScheduleConfig) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(config.start_date.trim(), "%Y-%m-%d").ok()?;
    let time_str = if config.start_time.trim().is_empty() {
        "00:00"
    } else {
        config.start_time.trim()
    };
    let time = NaiveTime::parse_from_str(time_str, "%H:%M").ok()?;
    Some(NaiveDateTime::new(date, time))
}

pub fn parse_start_datetime(config: &ScheduleConfig) -> Option<DateTime<Utc>> {
    let naive = parse_start_naive(config)?;
    let tz = parse_timezone(&config.timezone)?;
    resolve_local(tz, naive)
}

/// Ambiguous local times (DST fall-back) resolve to the earliest
/// instant. Local times that do not exist (DST spring-forward gap)
/// advance minute by minute to the first instant after the gap.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    let mut candidate = naive;
    // Offset jumps larger than two days do not occur.
    for _ in 0..=(48 * 60) {
        if let Some(local) = tz.from_local_datetime(&candidate).earliest() {
            return Some(local.with_timezone(&Utc));
        }
        candidate = candidate.checked_add_signed(Duration::minutes(1))?;
    }
    None
}

fn normalize_repeat(config: &ScheduleConfig) -> Option<(i64, RepeatUnit)> {
    let repeat = config.repeat.as_ref()?;
    if repeat.every <= 0 {
        return None;
    }
    let unit = RepeatUnit::from_str(&repeat.unit)?;
    Some((repeat.every, unit))
}

#[derive(Debug, Clone, Copy)]
enum RepeatUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl RepeatUnit {
    fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "minute" | "minutes" => Some(Self::Minutes),
            "hour" | "hours" => Some(Self::Hours),
            "day" | "days" => Some(Self::Days),
            "week" | "weeks" => Some(Self::Weeks),
            _ => None,
        }
    }

    fn to_duration(self, every: i64) -> Option<Duration> {
        let every = every.max(1);
        Some(match self {
            Self::Minutes => Duration::minutes(every),
            Self::Hours => Duration::hours(every),
            Self::Days => Duration::days(every),
            Self::Weeks => Duration::weeks(every),
        })
    }
}

fn add_interval(dt: DateTime<Utc>, every: i64, unit: RepeatUnit) -> Option<DateTime<Utc>> {
    let duration = unit.to_duration(every)?;
    dt.checked_add_signed(duration)
}

/// Next firing after `now`. One-shot schedules return `None` once fired.
pub fn compute_next_run(
    config: &ScheduleConfig,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let start = parse_start_datetime(config)?;
    if let Some(last) = last_run {
        if let Some((every, unit)) = normalize_repeat(config) {
            let mut candidate = add_interval(last, every, unit)?;
            if candidate < start {
                candidate = start;
            }
            while candidate < now {
                candidate = add_interval(candidate, every, unit)?;
            }
            Some(candidate)
        } else {
            None
        }
    } else if start >= now {
        Some(start)
    } else if let Some((every, unit)) = normalize_repeat(config) {
        let mut candidate = start;
        while candidate < now {
            candidate = add_interval(candidate, every, unit)?;
        }
        Some(candidate)
    } else {
        Some(start)
    }
}

pub fn offset_to_utc(dt: OffsetDateTime) -> Option<DateTime<Utc>> {
    let out = DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond())?;
    Some(out)
}

pub fn utc_to_offset(dt: DateTime<Utc>) -> Option<OffsetDateTime> {
    let seconds = dt.timestamp();
    let nanos = dt.timestamp_subsec_nanos();
    let base = OffsetDateTime::from_unix_timestamp(seconds).ok()?;
    base.replace_nanosecond(nanos).ok()
}
