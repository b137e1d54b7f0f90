//! 时间窗口分区
//!
//! 日、周、月分区边界以本地时间（墙上时间）按日历规则推进，再通过 `chrono-tz` 解析为具体时刻：
//!
//! - 夏令时回拨导致的歧义时间取较早的时刻
//! - 夏令时前拨导致的不存在时间顺延到间隙之后的第一个有效时刻
//! - 解析后时刻相同的边界只保留一个
//!
//! 小时分区按绝对时间推进，回拨当天重复出现的那一小时会得到两个窗口；
//! cron 分区在小时字段为 `*` 时同样保留重复小时内的每个触发点，否则只取较早的一次。
//! 因此跨越夏令时切换时既不会重复也不会跳过任何一个窗口。

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, Duration, LocalResult, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::{Schedule, TimeUnitSpec};
use serde::{Deserialize, Serialize};

use partition_core::{PartitionError, PartitionResult};

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_HOURLY_FORMAT: &str = "%Y-%m-%d-%H:%M";
/// Keeps the two wall-clock copies of a repeated hour apart.
pub const DEFAULT_HOURLY_FORMAT_WITH_OFFSET: &str = "%Y-%m-%d-%H:%M%z";
const DEFAULT_TIMEZONE: &str = "UTC";
/// Upper bound on enumerated boundaries; guards against a runaway cron expression.
const MAX_BOUNDARIES: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSchedule {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    /// Six-field cron expression (seconds first); each tick starts a window.
    Cron(String),
}

impl WindowSchedule {
    fn default_format(&self, timezone: &str) -> &'static str {
        match self {
            WindowSchedule::Hourly | WindowSchedule::Cron(_) if timezone == DEFAULT_TIMEZONE => {
                DEFAULT_HOURLY_FORMAT
            }
            WindowSchedule::Hourly | WindowSchedule::Cron(_) => DEFAULT_HOURLY_FORMAT_WITH_OFFSET,
            WindowSchedule::Daily | WindowSchedule::Weekly | WindowSchedule::Monthly => {
                DEFAULT_DATE_FORMAT
            }
        }
    }

    /// Local start of the `index`-th calendar window counted from `start`.
    /// Hourly and cron schedules advance in absolute time instead.
    fn advance(&self, start: NaiveDateTime, index: u32) -> Option<NaiveDateTime> {
        match self {
            WindowSchedule::Hourly | WindowSchedule::Cron(_) => None,
            WindowSchedule::Daily => start.checked_add_days(Days::new(u64::from(index))),
            WindowSchedule::Weekly => start.checked_add_days(Days::new(7 * u64::from(index))),
            WindowSchedule::Monthly => start.checked_add_months(Months::new(index)),
        }
    }
}

impl fmt::Display for WindowSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSchedule::Hourly => f.write_str("Hourly"),
            WindowSchedule::Daily => f.write_str("Daily"),
            WindowSchedule::Weekly => f.write_str("Weekly"),
            WindowSchedule::Monthly => f.write_str("Monthly"),
            WindowSchedule::Cron(expr) => write!(f, "Cron '{expr}'"),
        }
    }
}

/// One enumerated window. `start` is inclusive, `end` exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindowPartitions {
    /// Local wall-clock time in `timezone`.
    #[serde(with = "local_datetime")]
    pub start: NaiveDateTime,
    /// Exclusive local end; `None` means "up to the clock's now".
    #[serde(default, with = "optional_local_datetime")]
    pub end: Option<NaiveDateTime>,
    pub schedule: WindowSchedule,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// strftime pattern used to render keys.
    #[serde(default)]
    pub fmt: Option<String>,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

impl TimeWindowPartitions {
    pub fn new(start: NaiveDateTime, schedule: WindowSchedule, timezone: impl Into<String>) -> Self {
        Self {
            start,
            end: None,
            schedule,
            timezone: timezone.into(),
            fmt: None,
        }
    }

    pub fn daily(start: NaiveDate, timezone: impl Into<String>) -> Self {
        Self::new(start.and_time(chrono::NaiveTime::MIN), WindowSchedule::Daily, timezone)
    }

    pub fn hourly(start: NaiveDateTime, timezone: impl Into<String>) -> Self {
        Self::new(start, WindowSchedule::Hourly, timezone)
    }

    pub fn with_end(mut self, end: NaiveDateTime) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_end_date(self, end: NaiveDate) -> Self {
        self.with_end(end.and_time(chrono::NaiveTime::MIN))
    }

    pub fn with_format(mut self, fmt: impl Into<String>) -> Self {
        self.fmt = Some(fmt.into());
        self
    }

    pub fn key_format(&self) -> &str {
        self.fmt
            .as_deref()
            .unwrap_or_else(|| self.schedule.default_format(&self.timezone))
    }

    pub fn tz(&self, label: &str) -> PartitionResult<Tz> {
        Tz::from_str(&self.timezone).map_err(|e| {
            PartitionError::invalid_definition(label, format!("无效的时区 '{}': {e}", self.timezone))
        })
    }

    pub fn validate(&self, label: &str) -> PartitionResult<()> {
        self.tz(label)?;
        if self.key_format().trim().is_empty() {
            return Err(PartitionError::invalid_definition(label, "分区键格式不能为空"));
        }
        if let Some(end) = self.end {
            if end <= self.start {
                return Err(PartitionError::invalid_definition(
                    label,
                    format!("结束时间 {end} 必须晚于开始时间 {}", self.start),
                ));
            }
        }
        if let WindowSchedule::Cron(expr) = &self.schedule {
            parse_cron(label, expr)?;
        }
        Ok(())
    }

    pub fn description(&self) -> String {
        let mut text = format!(
            "{}, starting {} {}.",
            self.schedule,
            self.format_local(self.start),
            self.timezone
        );
        if let Some(end) = self.end {
            text.push_str(&format!(" Ending {}.", self.format_local(end)));
        }
        text
    }

    /// Offset-bearing formats need a resolved instant; a naive time cannot render `%z`.
    fn format_local(&self, local: NaiveDateTime) -> String {
        match Tz::from_str(&self.timezone).ok().and_then(|tz| resolve_local(&tz, local)) {
            Some(instant) => instant.format(self.key_format()).to_string(),
            None => local.format("%Y-%m-%d %H:%M").to_string(),
        }
    }

    /// Every complete window whose end is at or before the limit: `end` if set, else `now`.
    pub fn windows(&self, label: &str, now: DateTime<Utc>) -> PartitionResult<Vec<TimeWindow>> {
        let tz = self.tz(label)?;
        let limit = match self.end {
            Some(end) => resolve_local(&tz, end)
                .ok_or_else(|| unresolvable(label, end))?
                .with_timezone(&Utc),
            None => now,
        };

        let boundaries = match &self.schedule {
            WindowSchedule::Cron(expr) => self.cron_boundaries(label, expr, &tz, limit)?,
            WindowSchedule::Hourly => self.hourly_boundaries(label, &tz, limit)?,
            schedule => self.calendar_boundaries(label, schedule, &tz, limit)?,
        };

        Ok(boundaries
            .windows(2)
            .filter(|pair| pair[1].with_timezone(&Utc) <= limit)
            .map(|pair| TimeWindow {
                start: pair[0],
                end: pair[1],
            })
            .collect())
    }

    pub fn keys(&self, label: &str, now: DateTime<Utc>) -> PartitionResult<Vec<String>> {
        let fmt = self.key_format();
        let keys: Vec<String> = self
            .windows(label, now)?
            .into_iter()
            .map(|window| window.start.format(fmt).to_string())
            .collect();
        let mut seen = HashSet::with_capacity(keys.len());
        if let Some(duplicate) = keys.iter().find(|key| !seen.insert(key.as_str())) {
            return Err(PartitionError::invalid_definition(
                label,
                format!("分区键格式 '{fmt}' 生成了重复的分区键 '{duplicate}'"),
            ));
        }
        Ok(keys)
    }

    fn hourly_boundaries(
        &self,
        label: &str,
        tz: &Tz,
        limit: DateTime<Utc>,
    ) -> PartitionResult<Vec<DateTime<Tz>>> {
        let start = resolve_local(tz, self.start).ok_or_else(|| unresolvable(label, self.start))?;
        let mut boundaries: Vec<DateTime<Tz>> = Vec::new();
        let mut instant = start;
        while push_boundary(&mut boundaries, instant, limit) {
            if boundaries.len() >= MAX_BOUNDARIES {
                return Err(too_many(label));
            }
            instant += Duration::hours(1);
        }
        Ok(boundaries)
    }

    fn calendar_boundaries(
        &self,
        label: &str,
        schedule: &WindowSchedule,
        tz: &Tz,
        limit: DateTime<Utc>,
    ) -> PartitionResult<Vec<DateTime<Tz>>> {
        let mut boundaries: Vec<DateTime<Tz>> = Vec::new();
        for index in 0.. {
            let Some(local) = schedule.advance(self.start, index) else {
                break;
            };
            let instant = resolve_local(tz, local).ok_or_else(|| unresolvable(label, local))?;
            if !push_boundary(&mut boundaries, instant, limit) {
                break;
            }
            if boundaries.len() >= MAX_BOUNDARIES {
                return Err(too_many(label));
            }
        }
        Ok(boundaries)
    }

    fn cron_boundaries(
        &self,
        label: &str,
        expr: &str,
        tz: &Tz,
        limit: DateTime<Utc>,
    ) -> PartitionResult<Vec<DateTime<Tz>>> {
        let schedule = parse_cron(label, expr)?;
        let start = resolve_local(tz, self.start).ok_or_else(|| unresolvable(label, self.start))?;
        // `after` is exclusive; step back one second so a tick exactly at `start` counts.
        let anchor = start - Duration::seconds(1);
        // A repeated wall-clock hour fires twice only for schedules that run every hour.
        let keep_repeated = schedule.hours().is_all();

        // The iterator yields both copies of a repeated local time, not always in order,
        // so read past `limit` by more than any DST shift before sorting.
        let horizon = limit + Duration::hours(2);
        let mut ticks: Vec<DateTime<Tz>> = Vec::new();
        for tick in schedule.after(&anchor) {
            let reached = tick.with_timezone(&Utc) >= horizon;
            if keep_repeated || !is_repeated_copy(tz, &tick) {
                ticks.push(tick);
            }
            if reached {
                break;
            }
            if ticks.len() >= MAX_BOUNDARIES {
                return Err(too_many(label));
            }
        }
        ticks.sort();
        ticks.dedup();

        let mut boundaries: Vec<DateTime<Tz>> = Vec::with_capacity(ticks.len());
        for tick in ticks {
            if !push_boundary(&mut boundaries, tick, limit) {
                break;
            }
        }
        Ok(boundaries)
    }
}

/// Appends `instant` unless it repeats the previous boundary. Returns `false` once the
/// boundary that closes the last window before `limit` has been recorded.
fn push_boundary(boundaries: &mut Vec<DateTime<Tz>>, instant: DateTime<Tz>, limit: DateTime<Utc>) -> bool {
    if boundaries.last().is_some_and(|last| *last >= instant) {
        return true;
    }
    let reached = instant.with_timezone(&Utc) >= limit;
    boundaries.push(instant);
    !reached
}

/// Whether `tick` is the second instant of a wall-clock time that occurs twice.
fn is_repeated_copy(tz: &Tz, tick: &DateTime<Tz>) -> bool {
    matches!(
        tz.from_local_datetime(&tick.naive_local()),
        LocalResult::Ambiguous(_, latest) if latest == *tick
    )
}

/// Resolves a wall-clock time in `tz`. Ambiguous times take the earlier instant;
/// times inside a DST gap move to the first valid instant after it.
pub fn resolve_local(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(instant) => Some(instant),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => {
            let mut candidate = local;
            // DST gaps never exceed a day; step in quarter hours.
            for _ in 0..96 {
                candidate += Duration::minutes(15);
                if let Some(instant) = tz.from_local_datetime(&candidate).earliest() {
                    return Some(instant);
                }
            }
            None
        }
    }
}

fn parse_cron(label: &str, expr: &str) -> PartitionResult<Schedule> {
    Schedule::from_str(expr).map_err(|e| {
        PartitionError::invalid_definition(label, format!("无效的cron表达式 '{expr}': {e}"))
    })
}

fn unresolvable(label: &str, local: NaiveDateTime) -> PartitionError {
    PartitionError::invalid_definition(label, format!("无法在时区中解析本地时间 {local}"))
}

fn too_many(label: &str) -> PartitionError {
    PartitionError::invalid_definition(label, format!("时间窗口数量超过上限 {MAX_BOUNDARIES}"))
}

/// Accepts `2024-03-01`, `2024-03-01T06:00:00` or `2024-03-01 06:00:00`.
pub fn parse_local_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|date| date.and_time(chrono::NaiveTime::MIN))
        })
}

mod local_datetime {
    use chrono::NaiveDateTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format("%Y-%m-%dT%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_local_datetime(&text)
            .ok_or_else(|| D::Error::custom(format!("无法解析本地时间: {text}")))
    }
}

mod optional_local_datetime {
    use chrono::NaiveDateTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => super::local_datetime::serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => super::parse_local_datetime(&text)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("无法解析本地时间: {text}"))),
            None => Ok(None),
        }
    }
}
