use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use todo_contracts::{Task, Timestamp, validate_title};
use todo_store::TaskRecord;
use tracing::Instrument;

use super::{ApiError, AppState, extract_identity, extract_request_id, json_error, store_error_response};

/// GET /todos — every task owned by the caller, newest-created
/// first. Zero owned tasks is an empty array, not an error.
pub(super) async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Task>>, ApiError> {
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let result = async {
        let identity = extract_identity(&state, &headers).await?;

        let span = tracing::info_span!(
            "todos.list",
            request_id = %request_id,
            user_id = %identity.user_id,
            count = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async {
            let records = state
                .store
                .list_by_owner(&identity.user_id)
                .await
                .map_err(|err| store_error_response("list", &err))?;

            tracing::Span::current().record("count", records.len());
            tracing::Span::current().record("outcome", "ok");

            Ok(Json(
                records.into_iter().map(TaskRecord::into_task).collect(),
            ))
        }
        .instrument(span)
        .await
    }
    .await;

    observe("/todos", "GET", &result, started);
    result
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateTodoRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    completed: Option<bool>,
}

/// POST /todos — creates a task owned by the caller. The owner is
/// always the authenticated identity; request input never names it.
pub(super) async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<CreateTodoRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let result = async {
        let identity = extract_identity(&state, &headers).await?;

        let Json(req) = req.map_err(|_| invalid_body())?;

        let title = req
            .title
            .as_deref()
            .map(validate_title)
            .transpose()
            .map_err(|_| missing_title())?
            .ok_or_else(missing_title)?;
        let completed = req.completed.unwrap_or(false);

        let span = tracing::info_span!(
            "todos.create",
            request_id = %request_id,
            user_id = %identity.user_id,
            task_id = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async {
            let record = state
                .store
                .create(&identity.user_id, &title, completed)
                .await
                .map_err(|err| store_error_response("create", &err))?;

            tracing::Span::current().record("task_id", record.task_id.as_str());
            tracing::Span::current().record("outcome", "ok");

            Ok((StatusCode::CREATED, Json(record.into_task())))
        }
        .instrument(span)
        .await
    }
    .await;

    observe("/todos", "POST", &result, started);
    result
}

/// GET /todos/{id} — the record, if the caller owns it.
pub(super) async fn fetch(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Task>, ApiError> {
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let result = async {
        let identity = extract_identity(&state, &headers).await?;

        let span = tracing::info_span!(
            "todos.get",
            request_id = %request_id,
            user_id = %identity.user_id,
            task_id = %task_id,
            outcome = tracing::field::Empty,
        );

        async {
            let record = load_owned(
                &state,
                &task_id,
                &identity.user_id,
                "You do not have permission to access this todo.",
            )
            .await?;

            tracing::Span::current().record("outcome", "ok");
            Ok(Json(record.into_task()))
        }
        .instrument(span)
        .await
    }
    .await;

    observe("/todos/{id}", "GET", &result, started);
    result
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateTodoRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    completed: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UpdateTodoResponse {
    message: &'static str,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed: Option<bool>,
    updated_at: Timestamp,
}

/// PUT /todos/{id} — partial update of title and/or completed.
/// Validation and ownership both pass before any mutation, and a
/// fresh update timestamp is stamped on success.
pub(super) async fn update(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    req: Result<Json<UpdateTodoRequest>, JsonRejection>,
) -> Result<Json<UpdateTodoResponse>, ApiError> {
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let result = async {
        let identity = extract_identity(&state, &headers).await?;

        let Json(req) = req.map_err(|_| invalid_body())?;

        if req.title.is_none() && req.completed.is_none() {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                "ERR_INVALID_PARAMS",
                "No update data provided. Requires \"title\" or \"completed\".",
            ));
        }

        let title = req
            .title
            .as_deref()
            .map(validate_title)
            .transpose()
            .map_err(|_| {
                json_error(
                    StatusCode::BAD_REQUEST,
                    "ERR_INVALID_PARAMS",
                    "Title must be a non-empty string.",
                )
            })?;

        let span = tracing::info_span!(
            "todos.update",
            request_id = %request_id,
            user_id = %identity.user_id,
            task_id = %task_id,
            outcome = tracing::field::Empty,
        );

        async {
            load_owned(
                &state,
                &task_id,
                &identity.user_id,
                "You do not have permission to update this todo.",
            )
            .await?;

            let updated_at_epoch_ms = state
                .store
                .update(&task_id, title.as_deref(), req.completed)
                .await
                .map_err(|err| store_error_response("update", &err))?
                .ok_or_else(not_found)?;

            tracing::Span::current().record("outcome", "ok");

            Ok(Json(UpdateTodoResponse {
                message: "Todo updated successfully.",
                id: task_id.clone(),
                title,
                completed: req.completed,
                updated_at: Timestamp::from_epoch_ms(updated_at_epoch_ms),
            }))
        }
        .instrument(span)
        .await
    }
    .await;

    observe("/todos/{id}", "PUT", &result, started);
    result
}

/// DELETE /todos/{id} — permanent removal; a repeat delete is a 404.
pub(super) async fn remove(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let result = async {
        let identity = extract_identity(&state, &headers).await?;

        let span = tracing::info_span!(
            "todos.delete",
            request_id = %request_id,
            user_id = %identity.user_id,
            task_id = %task_id,
            outcome = tracing::field::Empty,
        );

        async {
            load_owned(
                &state,
                &task_id,
                &identity.user_id,
                "You do not have permission to delete this todo.",
            )
            .await?;

            let deleted = state
                .store
                .delete(&task_id)
                .await
                .map_err(|err| store_error_response("delete", &err))?;
            if !deleted {
                return Err(not_found());
            }

            tracing::Span::current().record("outcome", "ok");
            Ok(StatusCode::NO_CONTENT)
        }
        .instrument(span)
        .await
    }
    .await;

    observe("/todos/{id}", "DELETE", &result, started);
    result
}

/// Existence then ownership: a missing record is a 404; a record
/// owned by someone else is a 403, deliberately distinguishable.
async fn load_owned(
    state: &AppState,
    task_id: &str,
    user_id: &str,
    denied_message: &'static str,
) -> Result<TaskRecord, ApiError> {
    let record = state
        .store
        .get(task_id)
        .await
        .map_err(|err| store_error_response("get", &err))?
        .ok_or_else(not_found)?;

    if record.owner_id != user_id {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "ERR_FORBIDDEN",
            denied_message,
        ));
    }

    Ok(record)
}

fn not_found() -> ApiError {
    json_error(StatusCode::NOT_FOUND, "ERR_NOT_FOUND", "Todo not found.")
}

fn missing_title() -> ApiError {
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_PARAMS",
        "Todo title is required and must be a non-empty string.",
    )
}

fn invalid_body() -> ApiError {
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_PARAMS",
        "Request body must be a JSON object with optional title and completed fields.",
    )
}

fn observe<T>(route: &str, method: &str, result: &Result<T, ApiError>, started: Instant) {
    let status = match result {
        Ok(_) => default_success_status(method),
        Err((status, _)) => *status,
    };
    crate::metrics::observe_http_request(route, method, status.as_u16(), started.elapsed());
}

fn default_success_status(method: &str) -> StatusCode {
    match method {
        "POST" => StatusCode::CREATED,
        "DELETE" => StatusCode::NO_CONTENT,
        _ => StatusCode::OK,
    }
}
