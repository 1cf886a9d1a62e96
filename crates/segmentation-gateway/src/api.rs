use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use segmentation_common::{Error, UserId};
use segmentation_db::{NewSegment, SegmentAddition};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct UserIdRequest {
    pub user_id: UserId,
}

#[derive(Deserialize)]
pub struct CreateSegmentRequest {
    pub slug: String,
    #[serde(default)]
    pub random_percentage: f64,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct DeleteSegmentRequest {
    pub slug: String,
}

#[derive(Deserialize)]
pub struct UpdateSegmentsRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub add: Vec<SegmentAddition>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Deserialize)]
pub struct ReportQuery {
    pub user_id: UserId,
    #[serde(alias = "yearMonth")]
    pub year_month: String,
}

#[derive(Serialize)]
pub struct UserSegmentsResponse {
    pub user_id: UserId,
    pub segments: Vec<String>,
}

/// POST /user: Create a user.
pub async fn create_user(
    State(state): State<SharedState>,
    Json(body): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = state.engine.create_user(body.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User created successfully", "user_id": user_id })),
    ))
}

/// DELETE /user: Delete a user and their assignments.
pub async fn delete_user(
    State(state): State<SharedState>,
    Json(body): Json<UserIdRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = state.engine.delete_user(body.user_id).await?;
    Ok(Json(
        json!({ "message": "User deleted successfully", "user_id": user_id }),
    ))
}

/// POST /segment: Create a segment and enroll a random share of users.
pub async fn create_segment(
    State(state): State<SharedState>,
    Json(body): Json<CreateSegmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !(0.0..=100.0).contains(&body.random_percentage) {
        return Err(ApiError::bad_request(
            "random percentage should be between 0 and 100",
        ));
    }

    let created = state
        .engine
        .create_segment(NewSegment {
            slug: body.slug,
            random_percentage: body.random_percentage,
            expiration_date: body.expiration_date,
        })
        .await?;

    Ok(Json(json!({
        "message": "Segment and user assignments created successfully",
        "segment_id": created.id,
        "assigned_users": created.assigned_users,
    })))
}

/// DELETE /segment: Delete a segment and its assignments.
pub async fn delete_segment(
    State(state): State<SharedState>,
    Json(body): Json<DeleteSegmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let segment_id = state.engine.delete_segment(body.slug).await?;
    Ok(Json(
        json!({ "message": "Segment deleted successfully", "segment_id": segment_id }),
    ))
}

/// POST /user/segments: Add and remove segments for one user.
pub async fn update_user_segments(
    State(state): State<SharedState>,
    Json(body): Json<UpdateSegmentsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = state
        .engine
        .update_user_segments(body.user_id, body.add, body.remove)
        .await?;
    Ok(Json(
        json!({ "message": "User segments updated successfully", "user_id": user_id }),
    ))
}

/// GET /user/segments?user_id=: List a user's segments.
pub async fn get_user_segments(
    State(state): State<SharedState>,
    Query(query): Query<UserIdRequest>,
) -> Result<Json<UserSegmentsResponse>, ApiError> {
    let found = state.engine.get_user_segments(query.user_id).await?;
    Ok(Json(UserSegmentsResponse {
        user_id: found.user_id,
        segments: found.segments,
    }))
}

/// GET /user/report?user_id=&year_month=: Generate a monthly history report.
pub async fn get_user_report(
    State(state): State<SharedState>,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let file_name = state
        .engine
        .get_user_report(query.user_id, &query.year_month)
        .await?;

    Ok(Json(json!({
        "message": "Report generated successfully",
        "download_link": state.download_link(&file_name),
    })))
}

/// GET /user/report/{file_name}: Download a generated report.
pub async fn download_report(
    State(state): State<SharedState>,
    Path(file_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || ApiError(Error::NotFound(format!("report '{file_name}' not found")));

    let path = state
        .engine
        .reports()
        .resolve(&file_name)
        .ok_or_else(not_found)?;

    let contents = match tokio::fs::read(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(ApiError(Error::Io(e))),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        contents,
    ))
}
