//! Recurring capture triggers.
//!
//! Grammar: comma-separated `env::agency::days::HH:MM[::depth]`, where `days`
//! is a day name (`Sun` … `Sat`) or an inclusive range such as `Mon-Fri`.
//! Times are local wall-clock.

use std::time::Duration;

use chrono::{Datelike, Local, NaiveDateTime, Timelike, Weekday};
use tracing::{debug, info};

use intranet_archive_common::{ArchiveError, Result};

use crate::paths::PathResolver;

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const WEEKDAYS: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub environment: String,
    pub agency: String,
    pub days: Vec<Weekday>,
    pub hour: u32,
    pub min: u32,
    pub depth: Option<u32>,
}

impl ScheduleEntry {
    pub fn matches(&self, now: &NaiveDateTime) -> bool {
        self.days.contains(&now.weekday()) && now.hour() == self.hour && now.minute() == self.min
    }
}

pub fn parse_schedule(raw: &str, resolver: &PathResolver) -> Result<Vec<ScheduleEntry>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| parse_entry(entry, resolver))
        .collect()
}

fn parse_entry(entry: &str, resolver: &PathResolver) -> Result<ScheduleEntry> {
    let invalid = |reason: &str| ArchiveError::Config(format!("Invalid schedule entry {entry:?}: {reason}"));

    let parts: Vec<&str> = entry.split("::").collect();
    let (env, agency, days, time, depth) = match parts.as_slice() {
        [env, agency, days, time] => (*env, *agency, *days, *time, None),
        [env, agency, days, time, depth] => (*env, *agency, *days, *time, Some(*depth)),
        _ => return Err(invalid("expected env::agency::days::HH:MM[::depth]")),
    };

    // Rejects unknown environments and agencies.
    resolver.agency_path(env, agency)?;

    let days = parse_days(days).ok_or_else(|| invalid("invalid day of the week"))?;

    let (hour, min) = time
        .split_once(':')
        .and_then(|(h, m)| Some((h.parse::<u32>().ok()?, m.parse::<u32>().ok()?)))
        .filter(|(h, m)| *h <= 23 && *m <= 59)
        .ok_or_else(|| invalid("invalid time"))?;

    let depth = depth
        .map(|d| d.parse::<u32>().map_err(|_| invalid("invalid depth")))
        .transpose()?;

    Ok(ScheduleEntry {
        environment: env.to_string(),
        agency: agency.to_string(),
        days,
        hour,
        min,
        depth,
    })
}

fn day_index(name: &str) -> Option<usize> {
    DAY_NAMES.iter().position(|d| *d == name)
}

/// A single day, or an inclusive range that may wrap past Saturday.
fn parse_days(raw: &str) -> Option<Vec<Weekday>> {
    let (start, end) = match raw.split_once('-') {
        Some((start, end)) => (day_index(start)?, day_index(end)?),
        None => {
            let day = day_index(raw)?;
            (day, day)
        }
    };
    let mut days = vec![WEEKDAYS[start]];
    let mut i = start;
    while i != end {
        i = (i + 1) % 7;
        days.push(WEEKDAYS[i]);
    }
    Some(days)
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Checks the entries a few times a minute and fires each matching entry at
/// most once per minute.
pub struct Scheduler {
    entries: Vec<ScheduleEntry>,
    last_fired: Vec<Option<NaiveDateTime>>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(entries: Vec<ScheduleEntry>) -> Self {
        let last_fired = vec![None; entries.len()];
        Self {
            entries,
            last_fired,
            tick: Duration::from_secs(15),
        }
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Entries due at `now` that have not fired during this minute yet.
    pub fn due(&mut self, now: NaiveDateTime) -> Vec<ScheduleEntry> {
        let minute = now.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(now);
        let mut due = Vec::new();
        for (entry, last) in self.entries.iter().zip(self.last_fired.iter_mut()) {
            if entry.matches(&now) && *last != Some(minute) {
                *last = Some(minute);
                due.push(entry.clone());
            }
        }
        due
    }

    /// Runs forever, handing every due entry to `on_fire`.
    pub async fn run<F>(mut self, mut on_fire: F)
    where
        F: FnMut(ScheduleEntry) + Send,
    {
        info!(entries = self.entries.len(), "Scheduler started");
        let mut interval = tokio::time::interval(self.tick);
        loop {
            interval.tick().await;
            for entry in self.due(Local::now().naive_local()) {
                debug!(env = %entry.environment, agency = %entry.agency, "Schedule entry due");
                on_fire(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use intranet_archive_common::{Environment, EnvironmentSet};
    use url::Url;

    fn resolver() -> PathResolver {
        let envs = EnvironmentSet::new(vec![
            Environment::new("production", Url::parse("https://intranet.example/").unwrap(), None),
            Environment::new("dev", Url::parse("https://dev.intranet.example/").unwrap(), None),
        ]);
        PathResolver::new(envs, vec!["hq".into(), "hmcts".into()], "/tmp/snapshots")
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, s).unwrap()
    }

    #[test]
    fn parses_entries_with_and_without_depth() {
        let entries = parse_schedule("dev::hq::Mon::17:30::1, production::hmcts::Mon-Fri::02:05", &resolver()).unwrap();
        assert_eq!(
            entries[0],
            ScheduleEntry {
                environment: "dev".into(),
                agency: "hq".into(),
                days: vec![Weekday::Mon],
                hour: 17,
                min: 30,
                depth: Some(1),
            }
        );
        assert_eq!(
            entries[1].days,
            vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
        );
        assert_eq!(entries[1].depth, None);
    }

    #[test]
    fn empty_schedule_is_empty() {
        assert!(parse_schedule("", &resolver()).unwrap().is_empty());
        assert!(parse_schedule(" , ", &resolver()).unwrap().is_empty());
    }

    #[test]
    fn ranges_wrap_over_the_weekend() {
        assert_eq!(
            parse_days("Fri-Mon").unwrap(),
            vec![Weekday::Fri, Weekday::Sat, Weekday::Sun, Weekday::Mon]
        );
    }

    #[test]
    fn rejects_bad_entries() {
        let r = resolver();
        for raw in [
            "dev::hq::Monday::17:30",
            "dev::hq::Mon::24:00",
            "dev::hq::Mon::17:60",
            "dev::hq::Mon::1730",
            "dev::hq::Mon::17:30::deep",
            "dev::hq::Mon",
        ] {
            assert!(matches!(parse_schedule(raw, &r), Err(ArchiveError::Config(_))), "{raw}");
        }
        assert!(matches!(
            parse_schedule("preprod::hq::Mon::17:30", &r),
            Err(ArchiveError::Validation(_))
        ));
        assert!(matches!(
            parse_schedule("dev::laa::Mon::17:30", &r),
            Err(ArchiveError::Validation(_))
        ));
    }

    #[test]
    fn fires_once_per_matching_minute() {
        let entries = parse_schedule("dev::hq::Wed::17:30", &resolver()).unwrap();
        let mut scheduler = Scheduler::new(entries);

        // 2024-01-17 is a Wednesday
        assert_eq!(scheduler.due(at(2024, 1, 17, 17, 29, 59)).len(), 0);
        assert_eq!(scheduler.due(at(2024, 1, 17, 17, 30, 0)).len(), 1);
        assert_eq!(scheduler.due(at(2024, 1, 17, 17, 30, 15)).len(), 0);
        assert_eq!(scheduler.due(at(2024, 1, 17, 17, 30, 45)).len(), 0);
        assert_eq!(scheduler.due(at(2024, 1, 18, 17, 30, 0)).len(), 0);
        assert_eq!(scheduler.due(at(2024, 1, 24, 17, 30, 5)).len(), 1);
    }
}
