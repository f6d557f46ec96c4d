//! Scheduler driver: the per-tick loop that checks and fires triggers.
//!
//! A trigger fires when its next occurrence is no further away than the
//! time elapsed since the previous tick, i.e. it falls inside the last tick
//! window. Precision is therefore bounded by the tick interval.

use std::collections::HashMap;
use std::sync::Arc;

use chatmacro_core::config::SchedulerConfig;
use chatmacro_core::macros::Macro;
use chatmacro_exec::{MacroExecutor, MessageFormat, SharedExecutionLock};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::trigger::CronTrigger;

/// Path prefix of the ad-hoc macros built for fired triggers.
pub const SCHEDULER_PATH: &str = "scheduler";

/// One trigger that fired during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredTrigger {
    pub scheduler: String,
    pub command: String,
    pub occurrence: DateTime<Utc>,
}

struct Entry {
    scheduler: String,
    trigger: CronTrigger,
    last_fired: Option<DateTime<Utc>>,
}

/// Evaluates every enabled trigger once per tick.
pub struct SchedulerDriver {
    entries: Vec<Entry>,
    executor: MacroExecutor,
}

impl SchedulerDriver {
    pub fn new(schedulers: &[SchedulerConfig], executor: MacroExecutor) -> Self {
        let mut driver = Self {
            entries: Vec::new(),
            executor,
        };
        driver.load(schedulers);
        driver
    }

    /// Replace the trigger set (e.g. after a config edit).
    ///
    /// Disabled schedulers, blank commands and invalid triggers are skipped;
    /// invalid ones are logged here, once.
    pub fn load(&mut self, schedulers: &[SchedulerConfig]) {
        let previous: HashMap<(String, String, String), DateTime<Utc>> = self
            .entries
            .drain(..)
            .filter_map(|e| {
                let key = (e.scheduler, e.trigger.expression().to_string(), e.trigger.command().to_string());
                e.last_fired.map(|at| (key, at))
            })
            .collect();

        for scheduler in schedulers.iter().filter(|s| s.enabled) {
            for config in &scheduler.triggers {
                if config.command.trim().is_empty() {
                    continue;
                }
                match CronTrigger::compile(config) {
                    Ok(trigger) => {
                        let key = (
                            scheduler.name.clone(),
                            config.time_expression.clone(),
                            config.command.clone(),
                        );
                        self.entries.push(Entry {
                            scheduler: scheduler.name.clone(),
                            trigger,
                            last_fired: previous.get(&key).copied(),
                        });
                    }
                    Err(e) => tracing::warn!("⚠️ Scheduler '{}' trigger skipped: {e}", scheduler.name),
                }
            }
        }
        tracing::info!("📅 Scheduler loaded {} trigger(s)", self.entries.len());
    }

    pub fn trigger_count(&self) -> usize {
        self.entries.len()
    }

    /// Decide which triggers fall inside the window that just elapsed.
    pub fn due(&mut self, now: DateTime<Utc>, elapsed: Duration) -> Vec<FiredTrigger> {
        let mut fired = Vec::new();
        for entry in &mut self.entries {
            let Some(next) = entry.trigger.next_occurrence(now) else {
                continue;
            };
            if next - now > elapsed || entry.last_fired == Some(next) {
                continue;
            }
            entry.last_fired = Some(next);
            fired.push(FiredTrigger {
                scheduler: entry.scheduler.clone(),
                command: entry.trigger.command().to_string(),
                occurrence: next,
            });
        }
        fired
    }

    /// Fire due triggers through the executor, exactly like a direct invocation.
    pub fn tick(&mut self, now: DateTime<Utc>, elapsed: Duration) -> Vec<FiredTrigger> {
        let fired = self.due(now, elapsed);
        for f in &fired {
            tracing::info!("🔔 Trigger fired: [{}] {}", f.scheduler, f.command);
            let m = Macro::new(&format!("{SCHEDULER_PATH}/{}", f.scheduler)).with_content(&f.command);
            self.executor.execute(&m, MessageFormat::Plain, Vec::new());
        }
        fired
    }
}

/// Spawn the tick loop: reconcile the execution lock, then run the scheduler.
pub fn spawn_ticker(
    driver: Arc<Mutex<SchedulerDriver>>,
    lock: Arc<SharedExecutionLock>,
    period: std::time::Duration,
) -> JoinHandle<()> {
    tracing::info!("⏰ Scheduler started (tick every {}ms)", period.as_millis());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        let mut last = Utc::now();
        loop {
            interval.tick().await;
            let now = Utc::now();
            let elapsed = now - last;
            last = now;

            lock.reconcile();
            let fired = driver.lock().await.tick(now, elapsed);
            if !fired.is_empty() {
                tracing::debug!("📣 {} trigger(s) fired this tick", fired.len());
            }
        }
    })
}
