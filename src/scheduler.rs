//! Scan scheduling — fixed daily times, at-most-one running scan.
//!
//! Scan times ("HH:MM" in a fixed-offset timezone) are compiled to cron
//! schedules. A ticker task checks for due slots; a trigger arriving while a
//! run is active is coalesced into a logged no-op, never queued. Completed
//! slots are idempotent: after a restart, a slot whose run is already
//! persisted does not fire again. Missed slots are not backfilled.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::error::ConfigError;
use crate::pipeline::ScanPipeline;
use crate::store::Store;

pub struct ScanScheduler {
    pipeline: Arc<ScanPipeline>,
    store: Arc<dyn Store>,
    schedules: Vec<Schedule>,
    timezone: FixedOffset,
    config: SchedulerConfig,
    running: AtomicBool,
    cancel: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl ScanScheduler {
    pub fn new(
        config: SchedulerConfig,
        pipeline: Arc<ScanPipeline>,
        store: Arc<dyn Store>,
    ) -> Result<Self, ConfigError> {
        let timezone = parse_timezone(&config.timezone)?;
        let schedules = config
            .scan_times
            .iter()
            .map(|t| {
                let expr = scan_time_to_cron(t)?;
                Schedule::from_str(&expr).map_err(|e| ConfigError::InvalidValue {
                    key: "SCHEDULER_SCAN_TIMES".into(),
                    message: format!("'{t}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            pipeline,
            store,
            schedules,
            timezone,
            config,
            running: AtomicBool::new(false),
            cancel: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Spawn the ticker task. Returns a handle the caller can await on
    /// shutdown.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scheduler = self;
        tokio::spawn(async move {
            info!(
                scan_times = ?scheduler.config.scan_times,
                timezone = %scheduler.config.timezone,
                "Scheduler started"
            );

            // Next fire per schedule, computed from startup time: slots that
            // passed while the process was down are not backfilled.
            let mut next_fires: Vec<Option<DateTime<FixedOffset>>> = {
                let now = Utc::now().with_timezone(&scheduler.timezone);
                scheduler
                    .schedules
                    .iter()
                    .map(|s| s.after(&now).next())
                    .collect()
            };

            let mut tick = tokio::time::interval(scheduler.config.tick_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tick.tick().await;
                if scheduler.shutdown.load(Ordering::Relaxed) {
                    info!("Scheduler shutting down");
                    return;
                }

                let now = Utc::now().with_timezone(&scheduler.timezone);
                let mut ran = false;
                for (i, schedule) in scheduler.schedules.iter().enumerate() {
                    let Some(due) = next_fires[i] else { continue };
                    if now < due {
                        continue;
                    }
                    // Advance past now before running so a long scan does
                    // not cause a make-up fire on the next tick.
                    next_fires[i] = schedule.after(&now).next();
                    scheduler.trigger(&slot_key(due), true).await;
                    ran = true;
                }
                if ran {
                    // Runs execute inline, so slots on other schedules may
                    // have come due while one was in flight. Those are
                    // coalesced, never run late.
                    let now = Utc::now().with_timezone(&scheduler.timezone);
                    coalesce_due_slots(&scheduler.schedules, &mut next_fires, now);
                }
            }
        })
    }

    /// Force an immediate run, bypassing slot idempotency.
    pub async fn trigger_now(&self) {
        self.trigger("manual", false).await;
    }

    /// Request cooperative shutdown: stop the ticker and ask any in-flight
    /// run to cancel at its next stage boundary.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.cancel.store(true, Ordering::Relaxed);
    }

    async fn trigger(&self, slot: &str, enforce_slot: bool) {
        // At most one running scan; concurrent triggers coalesce.
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(slot, "Scan already running, trigger coalesced");
            return;
        }

        if enforce_slot {
            match self.store.load_last_scan_run().await {
                Ok(Some(last)) if last.slot == slot => {
                    info!(slot, "Slot already ran, skipping");
                    self.running.store(false, Ordering::SeqCst);
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    // Run anyway: a read failure must not suppress scans.
                    warn!(error = %e, "Could not check last run slot");
                }
            }
        }

        let run = self.pipeline.run(slot, &self.cancel).await;
        info!(slot, status = run.status.as_str(), "Triggered scan finished");
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Parse a fixed-offset timezone: "UTC", "+05:30", "-08:00".
pub fn parse_timezone(tz: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "SCHEDULER_TIMEZONE".into(),
        message,
    };

    if tz.eq_ignore_ascii_case("utc") || tz == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(|| invalid("offset out of range".into()));
    }

    let (sign, rest) = match tz.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(invalid(format!("'{tz}' is not UTC or +HH:MM/-HH:MM"))),
    };
    let (hours, minutes) = rest
        .split_once(':')
        .ok_or_else(|| invalid(format!("'{tz}' is missing ':'")))?;
    let hours: i32 = hours
        .parse()
        .map_err(|_| invalid(format!("bad hours in '{tz}'")))?;
    let minutes: i32 = minutes
        .parse()
        .map_err(|_| invalid(format!("bad minutes in '{tz}'")))?;
    if hours > 23 || minutes > 59 {
        return Err(invalid(format!("offset '{tz}' out of range")));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| invalid(format!("offset '{tz}' out of range")))
}

/// Convert "HH:MM" to a daily cron expression.
fn scan_time_to_cron(time: &str) -> Result<String, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "SCHEDULER_SCAN_TIMES".into(),
        message,
    };

    let (hours, minutes) = time
        .split_once(':')
        .ok_or_else(|| invalid(format!("'{time}' is not HH:MM")))?;
    let hours: u32 = hours
        .parse()
        .map_err(|_| invalid(format!("bad hour in '{time}'")))?;
    let minutes: u32 = minutes
        .parse()
        .map_err(|_| invalid(format!("bad minute in '{time}'")))?;
    if hours > 23 || minutes > 59 {
        return Err(invalid(format!("'{time}' out of range")));
    }

    Ok(format!("0 {minutes} {hours} * * *"))
}

/// Stable key for one scheduling slot: local fire time with offset.
fn slot_key(fire_time: DateTime<FixedOffset>) -> String {
    fire_time.format("%Y-%m-%dT%H:%M%:z").to_string()
}

/// Skip every slot that is due at `now`, advancing it to its next fire.
/// Used after an inline run so dueness that accrued while the run was in
/// flight is dropped rather than executed late.
fn coalesce_due_slots(
    schedules: &[Schedule],
    next_fires: &mut [Option<DateTime<FixedOffset>>],
    now: DateTime<FixedOffset>,
) {
    for (i, schedule) in schedules.iter().enumerate() {
        if let Some(due) = next_fires[i] {
            if now >= due {
                warn!(slot = %slot_key(due), "Slot came due during an active run, coalesced");
                next_fires[i] = schedule.after(&now).next();
            }
        }
    }
}
