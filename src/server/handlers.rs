//! Request handlers for the control surface.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::control::{ControlPlane, RunAction};
use crate::error::{RalphError, Result};
use crate::storage::events::DEFAULT_EVENT_LIMIT;
use crate::storage::{Automation, EventRecord, ReviewComment, Run, Thread};

type App = State<Arc<ControlPlane>>;

/// JSON extractor that reports malformed bodies through the crate error
/// type, so schema violations render as `400 {"error": ...}` like every
/// other input error.
pub struct Body<T>(pub T);

impl<S, T> FromRequest<S> for Body<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = RalphError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Body(value)),
            Err(rejection) => Err(RalphError::Input(rejection.body_text())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ThreadWithRuns {
    #[serde(flatten)]
    pub thread: Thread,
    pub runs: Vec<Run>,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn list_threads(State(control): App) -> Result<Json<Vec<ThreadWithRuns>>> {
    let mut out = Vec::new();
    for thread in control.db.list_threads()? {
        let runs = control.db.list_runs_for_thread(&thread.id)?;
        out.push(ThreadWithRuns { thread, runs });
    }
    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadRequest {
    pub name: String,
    pub task: String,
    pub repo_path: String,
    pub agent: Option<String>,
    pub validate: Option<Vec<String>>,
}

pub async fn create_thread(
    State(control): App,
    Body(req): Body<CreateThreadRequest>,
) -> Result<(StatusCode, Json<Thread>)> {
    let thread = control
        .create_thread(&req.name, &req.task, &req.repo_path, req.agent, req.validate)
        .await?;
    Ok((StatusCode::CREATED, Json(thread)))
}

pub async fn get_thread(
    State(control): App,
    Path(id): Path<String>,
) -> Result<Json<ThreadWithRuns>> {
    let thread = control.get_thread(&id)?;
    let runs = control.db.list_runs_for_thread(&thread.id)?;
    Ok(Json(ThreadWithRuns { thread, runs }))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

pub async fn thread_events(
    State(control): App,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<EventRecord>>> {
    // 404 for an unknown thread, not an empty list.
    control.get_thread(&id)?;
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    Ok(Json(control.db.events_for_thread(&id, limit)?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunRequest {
    pub max_iterations: Option<u32>,
    pub task_override: Option<String>,
    pub source_run_id: Option<String>,
}

pub async fn create_run(
    State(control): App,
    Path(id): Path<String>,
    Body(req): Body<CreateRunRequest>,
) -> Result<(StatusCode, Json<Run>)> {
    let run = control.create_run(&id, req.max_iterations, req.task_override, req.source_run_id)?;
    Ok((StatusCode::CREATED, Json(run)))
}

pub async fn thread_diff(State(control): App, Path(id): Path<String>) -> Result<String> {
    control.thread_diff(&id).await
}

pub async fn list_comments(
    State(control): App,
    Path(id): Path<String>,
) -> Result<Json<Vec<ReviewComment>>> {
    control.get_thread(&id)?;
    Ok(Json(control.db.comments_for_thread(&id)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub run_id: Option<String>,
    pub file_path: String,
    pub line_number: u32,
    pub body: String,
}

pub async fn create_comment(
    State(control): App,
    Path(id): Path<String>,
    Body(req): Body<CreateCommentRequest>,
) -> Result<(StatusCode, Json<ReviewComment>)> {
    let comment =
        control.create_comment(&id, req.run_id, req.file_path, req.line_number, req.body)?;
    Ok((StatusCode::CREATED, Json(comment)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerunFromCommentsRequest {
    pub comment_ids: Vec<String>,
}

pub async fn rerun_from_comments(
    State(control): App,
    Path(id): Path<String>,
    Body(req): Body<RerunFromCommentsRequest>,
) -> Result<(StatusCode, Json<Run>)> {
    let run = control.rerun_from_comments(&id, &req.comment_ids)?;
    Ok((StatusCode::CREATED, Json(run)))
}

pub async fn get_run(State(control): App, Path(id): Path<String>) -> Result<Json<Run>> {
    Ok(Json(control.get_run(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct ControlRunRequest {
    pub action: RunAction,
}

pub async fn control_run(
    State(control): App,
    Path(id): Path<String>,
    Body(req): Body<ControlRunRequest>,
) -> Result<Json<Run>> {
    Ok(Json(control.control_run(&id, req.action)?))
}

pub async fn list_automations(State(control): App) -> Result<Json<Vec<Automation>>> {
    Ok(Json(control.db.list_automations()?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAutomationRequest {
    pub name: String,
    pub cron: String,
    pub thread_id: String,
    pub max_iterations: Option<u32>,
}

pub async fn create_automation(
    State(control): App,
    Body(req): Body<CreateAutomationRequest>,
) -> Result<(StatusCode, Json<Automation>)> {
    let automation =
        control.create_automation(&req.name, &req.cron, &req.thread_id, req.max_iterations)?;
    Ok((StatusCode::CREATED, Json(automation)))
}

#[derive(Debug, Deserialize)]
pub struct ToggleAutomationRequest {
    pub enabled: bool,
}

pub async fn toggle_automation(
    State(control): App,
    Path(id): Path<String>,
    Body(req): Body<ToggleAutomationRequest>,
) -> Result<Json<Automation>> {
    control
        .db
        .get_automation(&id)?
        .ok_or_else(|| RalphError::NotFound(format!("automation {id}")))?;
    control.db.set_automation_enabled(&id, req.enabled)?;
    let automation = control
        .db
        .get_automation(&id)?
        .ok_or_else(|| RalphError::NotFound(format!("automation {id}")))?;
    Ok(Json(automation))
}

pub async fn run_automation_now(
    State(control): App,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Run>)> {
    let run = control.scheduler().trigger_now(&id)?;
    Ok((StatusCode::CREATED, Json(run)))
}
