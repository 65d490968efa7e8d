use chrono::{DateTime, Utc};
use http_body::LengthLimitError;
use hyper::header::HeaderValue;
use hyper::{Body, Response, StatusCode};
use serde_json::json;
use std::str::FromStr;

use super::error::ApiError;
use super::response::{json, DataResponse, HealthResponse, TaskListResponse, TaskResponse};
use super::{AppState, RequestBody};
use crate::datastore::{Filter, TaskStorage};
use crate::model::{NewTask, TaskStatus, TaskUpdate};

pub const VERSION: &str = env!("SIMPLE_VERSION");

const DEFAULT_PAGE_LIMIT: usize = 10;
const MAX_PAGE_LIMIT: usize = 100;

type ApiResult = Result<Response<Body>, ApiError>;

pub fn index() -> ApiResult {
    Ok(json(
        StatusCode::OK,
        &json!({
            "message": "Task API",
            "version": VERSION,
            "endpoints": {
                "health": "/health or /api/v1/health",
                "stats": "/api/v1/stats",
                "usage": "/api/v1/usage",
                "metrics": "/metrics",
                "tasks": {
                    "list": "GET /api/v1/tasks",
                    "create": "POST /api/v1/tasks",
                    "get": "GET /api/v1/tasks/{id}",
                    "update": "PUT /api/v1/tasks/{id}",
                    "delete": "DELETE /api/v1/tasks/{id}",
                    "by_status": "GET /api/v1/tasks/status/{status}",
                    "paginated": "GET /api/v1/tasks/paginated",
                },
            },
        }),
    ))
}

pub async fn health<S: TaskStorage>(state: &AppState<S>) -> ApiResult {
    state.storage.health_check().await?;
    Ok(json(StatusCode::OK, &HealthResponse::healthy(VERSION)))
}

pub async fn stats<S: TaskStorage>(state: &AppState<S>) -> ApiResult {
    let stats = state.storage.stats().await;
    Ok(json(StatusCode::OK, &DataResponse::new(stats)))
}

pub async fn usage<S: TaskStorage>(state: &AppState<S>) -> ApiResult {
    let usage = state.storage.usage().await;
    Ok(json(StatusCode::OK, &DataResponse::new(usage)))
}

pub async fn metrics<S: TaskStorage>(state: &AppState<S>) -> ApiResult {
    let uptime = std::time::Duration::from_secs(state.started_at.elapsed().as_secs());
    let total_tasks = state.storage.count().await;
    let stats = state.storage.stats().await;
    Ok(json(
        StatusCode::OK,
        &json!({
            "metrics": {
                "total_tasks": total_tasks,
                "uptime": humantime::format_duration(uptime).to_string(),
                "uptime_seconds": uptime.as_secs(),
                "version": VERSION,
                "storage_stats": stats,
            }
        }),
    ))
}

pub async fn list_tasks<S: TaskStorage>(state: &AppState<S>, query: Option<&str>) -> ApiResult {
    let mut filter = Filter::default();
    for (key, value) in query_pairs(query) {
        match key.as_str() {
            "status" if !value.is_empty() => {
                filter.status = Some(parse_status(&value)?);
            }
            "created_after" if !value.is_empty() => {
                let after = DateTime::parse_from_rfc3339(&value).map_err(|err| {
                    ApiError::BadRequest(format!("invalid created_after '{}': {}", value, err))
                })?;
                filter.created_after = Some(after.with_timezone(&Utc));
            }
            _ => {}
        }
    }

    let tasks = state.storage.items(&filter).await;
    Ok(json(StatusCode::OK, &TaskListResponse::from(tasks)))
}

pub async fn create_task<S: TaskStorage>(state: &AppState<S>, body: RequestBody) -> ApiResult {
    let bytes = read_body(body, state.config.listen.max_body_bytes).await?;
    let new_task: NewTask =
        serde_json::from_slice(&bytes).map_err(|err| ApiError::InvalidBody(err.to_string()))?;

    let task = state.storage.create(new_task).await?;
    Ok(json(
        StatusCode::CREATED,
        &TaskResponse::new(task, "Task created successfully"),
    ))
}

pub async fn get_task<S: TaskStorage>(state: &AppState<S>, id: &str) -> ApiResult {
    let task = state.storage.get_by_id(id).await?;
    Ok(json(
        StatusCode::OK,
        &TaskResponse::new(task, "Task retrieved successfully"),
    ))
}

pub async fn update_task<S: TaskStorage>(
    state: &AppState<S>,
    id: &str,
    body: RequestBody,
) -> ApiResult {
    let bytes = read_body(body, state.config.listen.max_body_bytes).await?;
    let update: TaskUpdate =
        serde_json::from_slice(&bytes).map_err(|err| ApiError::InvalidBody(err.to_string()))?;

    let task = state.storage.update(id, update).await?;
    Ok(json(
        StatusCode::OK,
        &TaskResponse::new(task, "Task updated successfully"),
    ))
}

pub async fn delete_task<S: TaskStorage>(state: &AppState<S>, id: &str) -> ApiResult {
    state.storage.delete(id).await?;
    Ok(json(
        StatusCode::OK,
        &TaskResponse::message("Task deleted successfully"),
    ))
}

pub async fn clear_tasks<S: TaskStorage>(state: &AppState<S>) -> ApiResult {
    state.storage.clear().await;
    Ok(json(
        StatusCode::OK,
        &TaskResponse::message("All tasks cleared"),
    ))
}

pub async fn tasks_by_status<S: TaskStorage>(state: &AppState<S>, status: &str) -> ApiResult {
    let status = parse_status(status)?;
    let tasks = state.storage.tasks_by_status(status).await;
    Ok(json(StatusCode::OK, &TaskListResponse::from(tasks)))
}

pub async fn tasks_paginated<S: TaskStorage>(
    state: &AppState<S>,
    query: Option<&str>,
) -> ApiResult {
    let mut offset = 0;
    let mut limit = DEFAULT_PAGE_LIMIT;
    for (key, value) in query_pairs(query) {
        match key.as_str() {
            "offset" => {
                offset = value
                    .parse::<usize>()
                    .map_err(|_| ApiError::BadRequest("Invalid offset parameter".into()))?;
            }
            "limit" => {
                limit = value
                    .parse::<usize>()
                    .ok()
                    .filter(|l| (1..=MAX_PAGE_LIMIT).contains(l))
                    .ok_or_else(|| {
                        ApiError::BadRequest(
                            "Invalid limit parameter (must be between 1 and 100)".into(),
                        )
                    })?;
            }
            _ => {}
        }
    }

    let page = state.storage.tasks_paginated(offset, limit).await;
    let mut response = json(StatusCode::OK, &TaskListResponse::from(page.tasks));
    let headers = response.headers_mut();
    headers.insert("x-total-count", HeaderValue::from(page.total));
    headers.insert("x-offset", HeaderValue::from(page.offset));
    headers.insert("x-limit", HeaderValue::from(page.limit));
    Ok(response)
}

fn parse_status(raw: &str) -> Result<TaskStatus, ApiError> {
    TaskStatus::from_str(raw).map_err(|_| {
        ApiError::BadRequest(
            "Invalid status value. Must be 0 (incomplete) or 1 (completed)".into(),
        )
    })
}

fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

/// Collect the body. The limit itself is enforced by the body wrapper.
async fn read_body(body: RequestBody, limit: usize) -> Result<hyper::body::Bytes, ApiError> {
    hyper::body::to_bytes(body).await.map_err(|err| {
        if err.downcast_ref::<LengthLimitError>().is_some() {
            ApiError::PayloadTooLarge(limit)
        } else {
            ApiError::InvalidBody(err.to_string())
        }
    })
}
