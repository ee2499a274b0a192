//! Batch/cron driver (spec §4.7): named batches, each with a standard
//! five-field cron expression, a per-run task cap, a maximum wall-clock
//! duration, and a completion-notification flag.
//!
//! No teacher analog; `cron` is grounded on its use across the wider
//! retrieval pack. A one-minute ticker evaluates each batch.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::task::TaskId;
use crate::{Error, Result};

const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// The configured contract is a standard five-field cron expression
/// (minute hour day-of-month month day-of-week); the `cron` crate
/// requires a leading seconds field, so a literal `0` is prefixed before
/// parsing. Expressions that already carry six or seven fields (seconds
/// and/or year) are passed through unchanged.
fn seconds_prefixed(expr: &str) -> String {
    match expr.split_whitespace().count() {
        5 => format!("0 {}", expr),
        _ => expr.to_string(),
    }
}

/// Static configuration for one named batch.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub name: String,
    pub cron_expr: String,
    pub max_tasks: usize,
    pub max_duration: Duration,
    pub notify_on_completion: bool,
}

/// Runtime state tracked per batch between ticks.
#[derive(Debug, Clone)]
struct BatchState {
    config: BatchConfig,
    schedule: Schedule,
    last_run: Option<DateTime<Utc>>,
    running: bool,
    dispatch_started_at: Option<DateTime<Utc>>,
    dispatched: Vec<TaskId>,
}

/// A batch is due and the driver has dispatched (at most) `max_tasks`
/// ready task IDs to the supervisor.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub batch_name: String,
    pub task_ids: Vec<TaskId>,
}

/// Holds named batch configurations and their cron state; evaluated on a
/// one-minute tick by the caller (typically a `tokio::time::interval`
/// loop owned by the CLI's `serve`/daemon surface).
pub struct BatchDriver {
    batches: HashMap<String, BatchState>,
}

impl BatchDriver {
    pub fn new() -> Self {
        Self {
            batches: HashMap::new(),
        }
    }

    pub fn add_batch(&mut self, config: BatchConfig) -> Result<()> {
        let schedule = Schedule::from_str(&seconds_prefixed(&config.cron_expr))
            .map_err(|e| Error::Config(format!("invalid cron expression for batch {}: {}", config.name, e)))?;
        self.batches.insert(
            config.name.clone(),
            BatchState {
                config,
                schedule,
                last_run: None,
                running: false,
                dispatch_started_at: None,
                dispatched: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn remove_batch(&mut self, name: &str) {
        self.batches.remove(name);
    }

    pub fn tick_interval() -> Duration {
        TICK_INTERVAL
    }

    /// Whether `name`'s cron's next-after-last-run is in the past and it
    /// is not already marked running. A batch cannot overlap itself.
    fn is_due(state: &BatchState, now: DateTime<Utc>) -> bool {
        if state.running {
            return false;
        }
        let after = state.last_run.unwrap_or_else(|| now - chrono::Duration::days(3650));
        match state.schedule.after(&after).next() {
            Some(next) => next <= now,
            None => false,
        }
    }

    /// Evaluate every configured batch at `now`. For each due batch,
    /// dispatch up to `max_tasks` of `ready_tasks` (caller-supplied, e.g.
    /// from the scheduler) and mark it running. Returns one `DispatchPlan`
    /// per batch dispatched this tick.
    pub fn evaluate(&mut self, now: DateTime<Utc>, ready_tasks: &[TaskId]) -> Vec<DispatchPlan> {
        let mut plans = Vec::new();

        for state in self.batches.values_mut() {
            if state.running && Self::duration_elapsed(state, now) {
                state.running = false;
                state.dispatched.clear();
                state.dispatch_started_at = None;
            }

            if Self::is_due(state, now) {
                let cap = state.config.max_tasks.min(ready_tasks.len());
                let task_ids: Vec<TaskId> = ready_tasks.iter().take(cap).cloned().collect();

                state.last_run = Some(now);
                state.running = true;
                state.dispatch_started_at = Some(now);
                state.dispatched = task_ids.clone();

                plans.push(DispatchPlan {
                    batch_name: state.config.name.clone(),
                    task_ids,
                });
            }
        }

        plans
    }

    fn duration_elapsed(state: &BatchState, now: DateTime<Utc>) -> bool {
        match state.dispatch_started_at {
            Some(started) => {
                let elapsed = now.signed_duration_since(started);
                elapsed.to_std().unwrap_or_default() >= state.config.max_duration
            }
            None => false,
        }
    }

    /// Mark a batch's dispatched set as drained (all tasks the batch
    /// handed to the supervisor have reached a terminal state). Tasks
    /// still running are left to the supervisor; this just clears the
    /// batch's own overlap guard.
    pub fn mark_drained(&mut self, name: &str) {
        if let Some(state) = self.batches.get_mut(name) {
            state.running = false;
            state.dispatched.clear();
            state.dispatch_started_at = None;
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.batches.get(name).map(|s| s.running).unwrap_or(false)
    }
}

impl Default for BatchDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_minute_config(name: &str) -> BatchConfig {
        BatchConfig {
            name: name.to_string(),
            cron_expr: "* * * * *".to_string(),
            max_tasks: 2,
            max_duration: Duration::from_secs(3600),
            notify_on_completion: false,
        }
    }

    #[test]
    fn rejects_invalid_cron_expression() {
        let mut driver = BatchDriver::new();
        let mut config = every_minute_config("bad");
        config.cron_expr = "not a cron expr".to_string();
        let err = driver.add_batch(config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn dispatches_up_to_max_tasks_when_due() {
        let mut driver = BatchDriver::new();
        driver.add_batch(every_minute_config("nightly")).unwrap();

        let now = Utc::now();
        let ready = vec![TaskId::new("m", 0), TaskId::new("m", 1), TaskId::new("m", 2)];
        let plans = driver.evaluate(now, &ready);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].task_ids.len(), 2);
        assert!(driver.is_running("nightly"));
    }

    #[test]
    fn batch_cannot_overlap_itself() {
        let mut driver = BatchDriver::new();
        driver.add_batch(every_minute_config("nightly")).unwrap();

        let now = Utc::now();
        let ready = vec![TaskId::new("m", 0)];
        let first = driver.evaluate(now, &ready);
        assert_eq!(first.len(), 1);

        let second = driver.evaluate(now, &ready);
        assert!(second.is_empty(), "running batch must not dispatch again");
    }

    #[test]
    fn max_duration_releases_the_overlap_guard() {
        let mut driver = BatchDriver::new();
        let mut config = every_minute_config("quick");
        config.max_duration = Duration::from_secs(1);
        driver.add_batch(config).unwrap();

        let now = Utc::now();
        driver.evaluate(now, &[TaskId::new("m", 0)]);
        assert!(driver.is_running("quick"));

        let later = now + chrono::Duration::seconds(2);
        driver.evaluate(later, &[]);
        assert!(!driver.is_running("quick"));
    }

    #[test]
    fn mark_drained_clears_running_state() {
        let mut driver = BatchDriver::new();
        driver.add_batch(every_minute_config("nightly")).unwrap();
        driver.evaluate(Utc::now(), &[TaskId::new("m", 0)]);
        assert!(driver.is_running("nightly"));
        driver.mark_drained("nightly");
        assert!(!driver.is_running("nightly"));
    }
}
