use hyper::{Body, Method, Request, Response};

use super::error::ApiError;
use super::handlers;
use super::{AppState, RequestBody};
use crate::datastore::TaskStorage;

pub async fn route<S: TaskStorage>(
    state: &AppState<S>,
    req: Request<RequestBody>,
) -> Response<Body> {
    dispatch(state, req)
        .await
        .unwrap_or_else(ApiError::into_response)
}

async fn dispatch<S: TaskStorage>(
    state: &AppState<S>,
    req: Request<RequestBody>,
) -> Result<Response<Body>, ApiError> {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path();
    let query = parts.uri.query();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (&parts.method, segments.as_slice()) {
        (&Method::GET, []) => handlers::index(),
        (&Method::GET, ["health"]) | (&Method::GET, ["api", "v1", "health"]) => {
            handlers::health(state).await
        }
        (&Method::GET, ["metrics"]) => handlers::metrics(state).await,
        (&Method::GET, ["api", "v1", "stats"]) => handlers::stats(state).await,
        (&Method::GET, ["api", "v1", "usage"]) => handlers::usage(state).await,

        (&Method::GET, ["api", "v1", "tasks"]) => handlers::list_tasks(state, query).await,
        (&Method::POST, ["api", "v1", "tasks"]) => handlers::create_task(state, body).await,
        (&Method::DELETE, ["api", "v1", "tasks"]) if state.config.is_development() => {
            handlers::clear_tasks(state).await
        }
        (&Method::GET, ["api", "v1", "tasks", "paginated"]) => {
            handlers::tasks_paginated(state, query).await
        }
        (&Method::GET, ["api", "v1", "tasks", "status", status]) => {
            handlers::tasks_by_status(state, status).await
        }
        (&Method::GET, ["api", "v1", "tasks", id]) => handlers::get_task(state, id).await,
        (&Method::PUT, ["api", "v1", "tasks", id]) => {
            handlers::update_task(state, id, body).await
        }
        (&Method::DELETE, ["api", "v1", "tasks", id]) => handlers::delete_task(state, id).await,

        (method, segments) if is_known(segments) => {
            Err(ApiError::MethodNotAllowed(method.to_string()))
        }
        _ => Err(ApiError::RouteNotFound(path.to_string())),
    }
}

fn is_known(segments: &[&str]) -> bool {
    matches!(
        segments,
        [] | ["health"]
            | ["metrics"]
            | ["api", "v1", "health" | "stats" | "usage" | "tasks"]
            | ["api", "v1", "tasks", _]
            | ["api", "v1", "tasks", "status", _]
    )
}
