//! Typed payload builders for each event kind.
//!
//! Payloads serialize to JSON at emit time; the journal stores and returns
//! them as raw values, so fields a newer build adds survive replay through
//! older readers untouched.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadCreated {
    pub name: String,
    pub agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeCreated {
    pub worktree_path: String,
    pub branch_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentCreated {
    pub comment_id: String,
    pub file_path: String,
    pub line_number: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerunQueued {
    pub new_run_id: String,
    pub comment_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationCreated {
    pub automation_id: String,
    pub name: String,
    pub cron: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationTriggered {
    pub automation_id: String,
    pub name: String,
    pub run_id: String,
}

/// Shared by the plain run lifecycle kinds (`run.queued`, `run.started`,
/// `run.paused`, `run.resumed`, `run.cancelled`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLifecycle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCompleted {
    pub iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailed {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationStarted {
    pub iteration: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpawned {
    pub iteration: u32,
    pub agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentExited {
    pub iteration: u32,
    pub exit_code: i32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationCompleted {
    pub iteration: u32,
    pub pass_count: usize,
    pub total_count: usize,
    pub all_passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionReverted {
    pub iteration: u32,
    pub score: usize,
    pub best_score: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointCommitted {
    pub iteration: u32,
    pub score: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_field_names_are_camel_case() {
        let payload = ValidationCompleted {
            iteration: 1,
            pass_count: 2,
            total_count: 3,
            all_passed: false,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["passCount"], 2);
        assert_eq!(value["totalCount"], 3);
        assert_eq!(value["allPassed"], false);
    }

    #[test]
    fn test_unknown_fields_round_trip_opaquely() {
        // A payload written by a newer build keeps its extra fields when it
        // is stored and re-read as a raw value.
        let raw = serde_json::json!({
            "iteration": 4,
            "exitCode": 0,
            "elapsedMs": 1200,
            "futureField": "kept"
        });
        let stored = serde_json::to_string(&raw).unwrap();
        let reread: serde_json::Value = serde_json::from_str(&stored).unwrap();
        assert_eq!(reread["futureField"], "kept");
        // And still parses into the typed struct ignoring the extras.
        let typed: AgentExited = serde_json::from_value(reread).unwrap();
        assert_eq!(typed.iteration, 4);
    }
}
