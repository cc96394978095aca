//! Recurring runs on a fixed schedule.
//!
//! The cron dialect is deliberately narrow: five whitespace-separated fields,
//! each either `*` or an integer literal. No ranges, steps, or lists; an
//! expression using them is rejected at creation time rather than silently
//! reinterpreted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::error::{RalphError, Result};
use crate::events::{payloads, EventKind, Journal};
use crate::queue::RunQueue;
use crate::storage::{Automation, Database, Run};

pub const TICK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CronField {
    Any,
    Literal(u32),
}

impl CronField {
    fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Literal(literal) => *literal == value,
        }
    }
}

/// A parsed five-field cron expression: minute, hour, day-of-month, month,
/// day-of-week (0 = Sunday).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    pub fn parse(raw: &str) -> Result<Self> {
        let fields: Vec<&str> = raw.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(RalphError::Input(format!(
                "cron expression must have exactly 5 fields, got {}",
                fields.len()
            )));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 6)?,
        })
    }

    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && self.day_of_week.matches(at.weekday().num_days_from_sunday())
    }
}

fn parse_field(raw: &str, min: u32, max: u32) -> Result<CronField> {
    if raw == "*" {
        return Ok(CronField::Any);
    }
    let value: u32 = raw
        .parse()
        .map_err(|_| RalphError::Input(format!("invalid cron field `{raw}`: expected `*` or an integer")))?;
    if value < min || value > max {
        return Err(RalphError::Input(format!(
            "cron field `{raw}` out of range {min}..={max}"
        )));
    }
    Ok(CronField::Literal(value))
}

/// Minute-granularity bucket used for trigger dedup: two ticks inside the
/// same wall-clock minute fire at most once per automation.
pub fn minute_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M").to_string()
}

pub struct AutomationScheduler {
    db: Database,
    journal: Journal,
    queue: Arc<RunQueue>,
}

impl AutomationScheduler {
    pub fn new(db: Database, journal: Journal, queue: Arc<RunQueue>) -> Self {
        Self { db, journal, queue }
    }

    /// Tick every 30 seconds until cancelled.
    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {
                    if let Err(e) = self.tick_once(Utc::now()) {
                        tracing::error!("automation tick failed: {e}");
                    }
                }
            }
        }
    }

    /// Evaluate every enabled automation against `now`.
    pub fn tick_once(&self, now: DateTime<Utc>) -> Result<()> {
        for automation in self.db.list_enabled_automations()? {
            let expr = match CronExpr::parse(&automation.cron) {
                Ok(expr) => expr,
                Err(e) => {
                    tracing::warn!("automation {} has a bad cron: {e}", automation.id);
                    continue;
                }
            };
            if !expr.matches(now) {
                continue;
            }
            let bucket = minute_bucket(now);
            if automation.last_triggered.map(minute_bucket) == Some(bucket) {
                continue;
            }
            self.trigger(&automation, now)?;
        }
        Ok(())
    }

    /// Fire an automation immediately, ignoring the cron match and the
    /// minute-bucket dedup. Returns the created run.
    pub fn trigger_now(&self, automation_id: &str) -> Result<Run> {
        let automation = self
            .db
            .get_automation(automation_id)?
            .ok_or_else(|| RalphError::NotFound(format!("automation {automation_id}")))?;
        self.trigger(&automation, Utc::now())
    }

    fn trigger(&self, automation: &Automation, now: DateTime<Utc>) -> Result<Run> {
        let thread = self
            .db
            .get_thread(&automation.thread_id)?
            .ok_or_else(|| RalphError::NotFound(format!("thread {}", automation.thread_id)))?;

        let run = Run::new(&thread.id, automation.max_iterations);
        self.db.insert_run(&run)?;
        self.journal.emit_best_effort(
            &thread.id,
            Some(&run.id),
            EventKind::AutomationTriggered,
            &payloads::AutomationTriggered {
                automation_id: automation.id.clone(),
                name: automation.name.clone(),
                run_id: run.id.clone(),
            },
        );
        self.journal.emit_best_effort(
            &thread.id,
            Some(&run.id),
            EventKind::RunQueued,
            &payloads::RunLifecycle::default(),
        );
        self.db.set_automation_last_triggered(&automation.id, now)?;
        tracing::info!(
            "automation {} triggered run {} on thread {}",
            automation.name,
            run.id,
            thread.id
        );
        self.queue.enqueue(&run.id);
        Ok(run)
    }
}
