//! Monitor lifecycle and schedule computation
//!
//! A monitor is a (scraper, url) pair with a refresh schedule. The gateway
//! upserts monitors as scrapes come in; the scheduler fires the due ones.
//! Schedules are either a minute interval or a cron expression.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;
use serde::Serialize;
use std::str::FromStr;
use tracing::warn;

use crate::models::{Monitor, ScheduleInfo, ScheduleSpec, ScheduleType};
use crate::state::{ns, State};
use crate::utils::hash::generate_monitor_id;

/// Fallback when a schedule cannot be evaluated
const FALLBACK_MINUTES: i64 = 60;

/// Parse a user-supplied schedule into its structured form
pub fn parse_schedule(spec: &ScheduleSpec) -> ScheduleInfo {
    match spec {
        ScheduleSpec::Minutes(minutes) => ScheduleInfo {
            schedule_type: ScheduleType::Interval,
            interval_minutes: Some(*minutes),
            cron: None,
        },
        ScheduleSpec::Cron(expr) => ScheduleInfo {
            schedule_type: ScheduleType::Cron,
            interval_minutes: None,
            cron: Some(expr.clone()),
        },
    }
}

/// Whether a cron expression parses
pub fn cron_is_valid(expr: &str) -> bool {
    CronSchedule::from_str(&normalize_cron(expr)).is_ok()
}

/// Accept standard 5-field cron by prepending a seconds field
fn normalize_cron(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    }
}

/// Next run time after `now` for a schedule
///
/// Intervals add their minutes; cron takes the next fire time. Anything
/// that fails to evaluate falls back to one hour out.
pub fn calculate_next_run(info: &ScheduleInfo, now: DateTime<Utc>) -> DateTime<Utc> {
    match info.schedule_type {
        ScheduleType::Interval => {
            let minutes = info.interval_minutes.unwrap_or(FALLBACK_MINUTES as u64);
            now + Duration::minutes(minutes as i64)
        }
        ScheduleType::Cron => {
            let Some(expr) = info.cron.as_deref() else {
                return now + Duration::minutes(FALLBACK_MINUTES);
            };
            match CronSchedule::from_str(&normalize_cron(expr)) {
                Ok(schedule) => schedule
                    .after(&now)
                    .next()
                    .unwrap_or_else(|| now + Duration::minutes(FALLBACK_MINUTES)),
                Err(e) => {
                    warn!(cron = expr, error = %e, "Unparsable cron, falling back to 60 minutes");
                    now + Duration::minutes(FALLBACK_MINUTES)
                }
            }
        }
    }
}

/// Build a monitor row, preserving history from an existing one
pub fn build_monitor(
    scraper_id: &str,
    url: &str,
    info: &ScheduleInfo,
    existing: Option<&Monitor>,
    now: DateTime<Utc>,
) -> Monitor {
    Monitor {
        monitor_id: generate_monitor_id(scraper_id, url),
        scraper_id: scraper_id.to_string(),
        url: url.to_string(),
        schedule_type: info.schedule_type,
        interval_minutes: info.interval_minutes,
        cron: info.cron.clone(),
        active: true,
        last_run: existing.and_then(|m| m.last_run),
        next_run: Some(calculate_next_run(info, now)),
        run_count: existing.map(|m| m.run_count).unwrap_or(0),
        last_job_id: existing.and_then(|m| m.last_job_id.clone()),
        created_at: existing.map(|m| m.created_at).unwrap_or(now),
        updated_at: now,
    }
}

/// Result of a monitor upsert, reported back to the client
#[derive(Debug, Clone, Serialize)]
pub struct MonitorInfo {
    pub monitoring: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
}

impl MonitorInfo {
    pub fn none() -> Self {
        Self {
            monitoring: false,
            monitor_id: None,
            next_run: None,
        }
    }
}

/// Upsert the monitor for a (scraper, url) pair after a scrape
///
/// Preserves `created_at` and `run_count` from an existing monitor and
/// stamps `last_run = now` since a run is happening right now.
pub async fn auto_add_to_monitoring(
    state: &State,
    scraper_id: &str,
    url: &str,
    info: Option<&ScheduleInfo>,
) -> MonitorInfo {
    let Some(info) = info else {
        return MonitorInfo::none();
    };

    let monitor_id = generate_monitor_id(scraper_id, url);
    let now = Utc::now();

    let existing: Option<Monitor> = state.get(ns::MONITORS, &monitor_id).await.ok().flatten();

    let mut monitor = build_monitor(scraper_id, url, info, existing.as_ref(), now);
    monitor.last_run = Some(now);

    if let Err(e) = state.set(ns::MONITORS, &monitor_id, &monitor).await {
        warn!(%monitor_id, error = %e, "Failed to upsert monitor");
        return MonitorInfo::none();
    }

    MonitorInfo {
        monitoring: true,
        monitor_id: Some(monitor_id),
        next_run: monitor.next_run,
    }
}

/// Create monitors for a batch of URLs at scraper-creation time
pub async fn create_monitors_for_urls(
    state: &State,
    scraper_id: &str,
    urls: &[String],
    info: &ScheduleInfo,
) -> Result<usize> {
    let now = Utc::now();

    let writes = urls
        .iter()
        .map(|url| url.trim())
        .filter(|url| !url.is_empty())
        .map(|url| async move {
            let monitor = build_monitor(scraper_id, url, info, None, now);
            match state.set(ns::MONITORS, &monitor.monitor_id, &monitor).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(url, error = %e, "Failed to create monitor");
                    false
                }
            }
        });

    let results = futures::future::join_all(writes).await;
    Ok(results.into_iter().filter(|ok| *ok).count())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(minutes: u64) -> ScheduleInfo {
        ScheduleInfo {
            schedule_type: ScheduleType::Interval,
            interval_minutes: Some(minutes),
            cron: None,
        }
    }

    fn cron(expr: &str) -> ScheduleInfo {
        ScheduleInfo {
            schedule_type: ScheduleType::Cron,
            interval_minutes: None,
            cron: Some(expr.to_string()),
        }
    }

    #[test]
    fn test_parse_schedule() {
        let info = parse_schedule(&ScheduleSpec::Minutes(15));
        assert_eq!(info.schedule_type, ScheduleType::Interval);
        assert_eq!(info.interval_minutes, Some(15));

        let info = parse_schedule(&ScheduleSpec::Cron("0 */2 * * *".to_string()));
        assert_eq!(info.schedule_type, ScheduleType::Cron);
        assert_eq!(info.cron.as_deref(), Some("0 */2 * * *"));
    }

    #[test]
    fn test_interval_next_run() {
        let now = Utc::now();
        let next = calculate_next_run(&interval(30), now);
        assert_eq!(next, now + Duration::minutes(30));
    }

    #[test]
    fn test_five_field_cron_accepted() {
        // Standard cron without a seconds field
        assert!(cron_is_valid("*/10 * * * *"));
        assert!(cron_is_valid("0 0 * * *"));
        // Crate-native six field form too
        assert!(cron_is_valid("0 */10 * * * *"));
        assert!(!cron_is_valid("not a cron"));
    }

    #[test]
    fn test_cron_next_run_is_strictly_future() {
        let now = Utc::now();
        let next = calculate_next_run(&cron("*/10 * * * *"), now);
        assert!(next > now);
        assert!(next <= now + Duration::minutes(10) + Duration::seconds(1));
    }

    #[test]
    fn test_bad_cron_falls_back_to_an_hour() {
        let now = Utc::now();
        let next = calculate_next_run(&cron("definitely broken"), now);
        assert_eq!(next, now + Duration::minutes(60));
    }

    #[test]
    fn test_build_monitor_fresh() {
        let now = Utc::now();
        let monitor = build_monitor("scr_1", "https://x/a", &interval(10), None, now);

        assert_eq!(monitor.monitor_id, generate_monitor_id("scr_1", "https://x/a"));
        assert!(monitor.active);
        assert_eq!(monitor.run_count, 0);
        assert!(monitor.last_run.is_none());
        assert_eq!(monitor.created_at, now);
        assert!(monitor.next_run.unwrap() > now);
    }

    #[test]
    fn test_build_monitor_preserves_history() {
        let created = Utc::now() - Duration::days(3);
        let existing = build_monitor("scr_1", "https://x/a", &interval(10), None, created);
        let existing = Monitor {
            run_count: 7,
            last_job_id: Some("job_old".to_string()),
            ..existing
        };

        let now = Utc::now();
        let updated = build_monitor("scr_1", "https://x/a", &interval(10), Some(&existing), now);

        assert_eq!(updated.run_count, 7);
        assert_eq!(updated.created_at, created);
        assert_eq!(updated.last_job_id.as_deref(), Some("job_old"));
        assert_eq!(updated.updated_at, now);
    }

    #[tokio::test]
    async fn test_auto_add_upserts() {
        let state = State::in_memory();

        let first = auto_add_to_monitoring(&state, "scr_1", "https://x/a", Some(&interval(10))).await;
        assert!(first.monitoring);
        let monitor_id = first.monitor_id.clone().unwrap();

        let stored: Monitor = state.get(ns::MONITORS, &monitor_id).await.unwrap().unwrap();
        assert!(stored.last_run.is_some());
        let created_at = stored.created_at;

        let second = auto_add_to_monitoring(&state, "scr_1", "https://x/a", Some(&interval(10))).await;
        assert_eq!(second.monitor_id, first.monitor_id);

        let stored: Monitor = state.get(ns::MONITORS, &monitor_id).await.unwrap().unwrap();
        assert_eq!(stored.created_at, created_at);
    }

    #[tokio::test]
    async fn test_auto_add_without_schedule_is_noop() {
        let state = State::in_memory();
        let info = auto_add_to_monitoring(&state, "scr_1", "https://x/a", None).await;
        assert!(!info.monitoring);
        assert!(info.monitor_id.is_none());
    }

    #[tokio::test]
    async fn test_create_monitors_for_urls_skips_blank() {
        let state = State::in_memory();
        let urls = vec![
            "https://x/a".to_string(),
            "   ".to_string(),
            "https://x/b".to_string(),
        ];

        let created = create_monitors_for_urls(&state, "scr_1", &urls, &interval(10))
            .await
            .unwrap();
        assert_eq!(created, 2);

        let monitors: Vec<Monitor> = state.list(ns::MONITORS).await.unwrap();
        assert_eq!(monitors.len(), 2);
    }
}
