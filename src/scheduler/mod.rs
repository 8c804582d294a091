//! Monitor scheduler
//!
//! A periodic tick scans every monitor, fires the due ones into the
//! pipeline, and recomputes their next run. Scheduled runs always bypass
//! the caches (`use_cache = false`) so they actually refresh content, and
//! they enter the bus grouped by `hash_url(url)` — scheduled refreshes of
//! one URL are serialized, unlike interactive requests which get a lane
//! per job. If a tick overruns the period, the per-url grouping keeps the
//! overlap harmless.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, ExtractionRequested};
use crate::job;
use crate::models::{JobPayload, Monitor, ScheduleInfo, Scraper};
use crate::monitor::calculate_next_run;
use crate::state::{ns, State};
use crate::utils::hash::{generate_job_id, hash_url};

/// Default tick period
pub const TICK_PERIOD: Duration = Duration::from_secs(300);

/// What one tick did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub triggered: usize,
    pub skipped: usize,
}

/// Scan all monitors and fire the due ones
pub async fn tick(state: &State, bus: &Arc<EventBus>, now: DateTime<Utc>) -> TickReport {
    debug!(check_time = %now, "Checking scheduled monitors");

    let monitors: Vec<Monitor> = match state.list(ns::MONITORS).await {
        Ok(monitors) => monitors,
        Err(e) => {
            warn!(error = %e, "Failed to list monitors");
            return TickReport::default();
        }
    };

    if monitors.is_empty() {
        debug!("No monitors found");
        return TickReport::default();
    }

    let mut report = TickReport::default();

    for monitor in monitors {
        if !monitor.active {
            report.skipped += 1;
            continue;
        }

        let Some(next_run) = monitor.next_run else {
            report.skipped += 1;
            continue;
        };
        if next_run > now {
            report.skipped += 1;
            continue;
        }

        match fire_monitor(state, bus, monitor, now).await {
            Ok(()) => report.triggered += 1,
            Err(e) => {
                warn!(error = %e, "Failed to fire monitor");
                report.skipped += 1;
            }
        }
    }

    info!(triggered = report.triggered, skipped = report.skipped, "Monitor check completed");
    report
}

/// Mint a job for a due monitor and advance its schedule
async fn fire_monitor(
    state: &State,
    bus: &Arc<EventBus>,
    mut monitor: Monitor,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let scraper: Option<Scraper> = state.get(ns::SCRAPERS, &monitor.scraper_id).await?;
    let Some(scraper) = scraper else {
        warn!(scraper_id = %monitor.scraper_id, "Scraper not found, skipping monitor");
        anyhow::bail!("scraper {} not found", monitor.scraper_id);
    };

    let job_id = generate_job_id();

    // Scheduled runs refresh: never serve them from cache
    let mut options = scraper.options.clone();
    options.use_cache = false;

    let job = job::new_job(&job_id, &monitor.scraper_id, &monitor.url, options.clone());
    state.set(ns::JOBS, &job_id, &job).await?;

    let payload = JobPayload {
        schema: scraper.schema.clone(),
        scraper_id: monitor.scraper_id.clone(),
    };
    state.set(ns::JOB_PAYLOADS, &job_id, &payload).await?;

    // Per-url group: same-url refreshes must not race each other
    let group = hash_url(&monitor.url);
    let envelope = ExtractionRequested {
        job_id: job_id.clone(),
        url: monitor.url.clone(),
        scraper_id: monitor.scraper_id.clone(),
        options,
    };
    bus.publish(&envelope, &group).await?;

    let schedule_info = scraper.schedule_info.unwrap_or(ScheduleInfo {
        schedule_type: monitor.schedule_type,
        interval_minutes: monitor.interval_minutes,
        cron: monitor.cron.clone(),
    });

    monitor.last_run = Some(now);
    monitor.next_run = Some(calculate_next_run(&schedule_info, now));
    monitor.run_count += 1;
    monitor.last_job_id = Some(job_id.clone());
    monitor.updated_at = now;

    let monitor_id = monitor.monitor_id.clone();
    state.set(ns::MONITORS, &monitor_id, &monitor).await?;

    info!(%monitor_id, %job_id, "Triggered monitor");
    Ok(())
}

/// Run the tick loop until the task is aborted
pub fn spawn(state: State, bus: Arc<EventBus>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            tick(&state, &bus, Utc::now()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Schema, ScheduleType, ScrapeOptions};
    use crate::monitor::build_monitor;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn interval_info(minutes: u64) -> ScheduleInfo {
        ScheduleInfo {
            schedule_type: ScheduleType::Interval,
            interval_minutes: Some(minutes),
            cron: None,
        }
    }

    async fn seed_scraper(state: &State, scraper_id: &str) {
        let scraper = Scraper {
            scraper_id: scraper_id.to_string(),
            name: "test".to_string(),
            description: None,
            schema: Schema::Structured(json!({"type": "object"})),
            example_url: None,
            webhook_url: None,
            schedule: None,
            schedule_info: Some(interval_info(10)),
            options: ScrapeOptions::default(),
            created_at: Utc::now(),
        };
        state.set(ns::SCRAPERS, scraper_id, &scraper).await.unwrap();
    }

    async fn seed_due_monitor(state: &State, scraper_id: &str, url: &str) -> Monitor {
        let mut monitor = build_monitor(scraper_id, url, &interval_info(10), None, Utc::now());
        monitor.next_run = Some(Utc::now() - ChronoDuration::minutes(5));
        state
            .set(ns::MONITORS, &monitor.monitor_id.clone(), &monitor)
            .await
            .unwrap();
        monitor
    }

    #[tokio::test]
    async fn test_due_monitor_fires() {
        let state = State::in_memory();
        let bus = EventBus::new();
        seed_scraper(&state, "scr_1").await;
        let before = seed_due_monitor(&state, "scr_1", "https://x/a").await;

        let report = tick(&state, &bus, Utc::now()).await;
        assert_eq!(report.triggered, 1);
        assert_eq!(bus.emitted(), 1);

        let after: Monitor = state
            .get(ns::MONITORS, &before.monitor_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.run_count, before.run_count + 1);
        assert!(after.next_run.unwrap() > before.next_run.unwrap());
        assert!(after.next_run.unwrap() > after.last_run.unwrap());
        assert!(after.last_job_id.is_some());

        // The minted job exists with use_cache disabled
        let job_id = after.last_job_id.unwrap();
        let job: crate::models::Job = state.get(ns::JOBS, &job_id).await.unwrap().unwrap();
        assert!(!job.options.use_cache);

        let payload: Option<JobPayload> =
            state.get(ns::JOB_PAYLOADS, &job_id).await.unwrap();
        assert!(payload.is_some());
    }

    #[tokio::test]
    async fn test_future_monitor_skipped() {
        let state = State::in_memory();
        let bus = EventBus::new();
        seed_scraper(&state, "scr_1").await;

        let mut monitor =
            build_monitor("scr_1", "https://x/a", &interval_info(10), None, Utc::now());
        monitor.next_run = Some(Utc::now() + ChronoDuration::minutes(5));
        state
            .set(ns::MONITORS, &monitor.monitor_id.clone(), &monitor)
            .await
            .unwrap();

        let report = tick(&state, &bus, Utc::now()).await;
        assert_eq!(report.triggered, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(bus.emitted(), 0);
    }

    #[tokio::test]
    async fn test_inactive_and_malformed_monitors_skipped() {
        let state = State::in_memory();
        let bus = EventBus::new();
        seed_scraper(&state, "scr_1").await;

        let mut inactive = seed_due_monitor(&state, "scr_1", "https://x/a").await;
        inactive.active = false;
        state
            .set(ns::MONITORS, &inactive.monitor_id.clone(), &inactive)
            .await
            .unwrap();

        let mut no_next_run = seed_due_monitor(&state, "scr_1", "https://x/b").await;
        no_next_run.next_run = None;
        state
            .set(ns::MONITORS, &no_next_run.monitor_id.clone(), &no_next_run)
            .await
            .unwrap();

        let report = tick(&state, &bus, Utc::now()).await;
        assert_eq!(report.triggered, 0);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_missing_scraper_skips_monitor() {
        let state = State::in_memory();
        let bus = EventBus::new();
        seed_due_monitor(&state, "scr_gone", "https://x/a").await;

        let report = tick(&state, &bus, Utc::now()).await;
        assert_eq!(report.triggered, 0);
        assert_eq!(bus.emitted(), 0);
    }

    #[tokio::test]
    async fn test_empty_monitor_list() {
        let state = State::in_memory();
        let bus = EventBus::new();
        let report = tick(&state, &bus, Utc::now()).await;
        assert_eq!(report, TickReport::default());
    }
}
