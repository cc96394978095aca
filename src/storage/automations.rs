//! Automation records: recurring cron-style triggers bound to a thread.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::threads::parse_ts;
use super::Database;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Automation {
    pub id: String,
    pub name: String,
    pub cron: String,
    pub thread_id: String,
    pub max_iterations: u32,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
}

impl Automation {
    pub fn new(name: String, cron: String, thread_id: String, max_iterations: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            cron,
            thread_id,
            max_iterations,
            enabled: true,
            last_triggered: None,
        }
    }
}

fn automation_from_row(row: &Row<'_>) -> rusqlite::Result<Automation> {
    Ok(Automation {
        id: row.get("id")?,
        name: row.get("name")?,
        cron: row.get("cron")?,
        thread_id: row.get("thread_id")?,
        max_iterations: row.get("max_iterations")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        last_triggered: row
            .get::<_, Option<String>>("last_triggered")?
            .map(|ts| parse_ts(&ts)),
    })
}

impl Database {
    pub fn insert_automation(&self, automation: &Automation) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO automations (id, name, cron, thread_id, max_iterations, enabled, last_triggered)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                automation.id,
                automation.name,
                automation.cron,
                automation.thread_id,
                automation.max_iterations,
                automation.enabled as i64,
                automation.last_triggered.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_automation(&self, id: &str) -> Result<Option<Automation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM automations WHERE id = ?1")?;
        let mut rows = stmt.query_map([id], automation_from_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_automations(&self) -> Result<Vec<Automation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM automations ORDER BY name ASC")?;
        let automations = stmt
            .query_map([], automation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(automations)
    }

    pub fn list_enabled_automations(&self) -> Result<Vec<Automation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM automations WHERE enabled = 1")?;
        let automations = stmt
            .query_map([], automation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(automations)
    }

    pub fn set_automation_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE automations SET enabled = ?2 WHERE id = ?1",
            rusqlite::params![id, enabled as i64],
        )?;
        Ok(())
    }

    pub fn set_automation_last_triggered(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE automations SET last_triggered = ?2 WHERE id = ?1",
            rusqlite::params![id, at.to_rfc3339()],
        )?;
        Ok(())
    }
}
