//! HTTP handlers for the upload flow: key allocation, grants, finalization
//! and file reference checks. All storage concerns live in `BrokerService`.

use crate::{
    errors::{AppError, BrokerError},
    services::{
        broker_service::{BrokerService, GrantRequest, KeyRequest},
        file_access::{ANONYMOUS, FileReference},
        upload_finalizer::UploadReport,
    },
};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Header carrying the id of the CMS user on whose behalf a call is made.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Deserialize)]
pub struct ReferencesRequest {
    pub files: Vec<FileReference>,
}

#[derive(Debug, Serialize)]
pub struct ReferencesResponse {
    pub fids: Vec<i64>,
}

/// `POST /uploads/key`
pub async fn allocate_key(
    State(service): State<BrokerService>,
    Json(request): Json<KeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = service.allocate_key(&request).await?;
    Ok(Json(response))
}

/// `POST /uploads/grant`
pub async fn issue_grant(
    State(service): State<BrokerService>,
    Json(request): Json<GrantRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = service.issue_grant(&request).await?;
    Ok(Json(response))
}

/// `POST /uploads/finalize`
///
/// Validation failures answer 422 with the messages under `errmsg`, which
/// the upload widget shows next to the field.
pub async fn finalize_upload(
    State(service): State<BrokerService>,
    headers: HeaderMap,
    Json(report): Json<UploadReport>,
) -> Result<Response, AppError> {
    let owner_id = user_id(&headers)?;
    match service.finalize_upload(&report, owner_id).await {
        Ok(finalized) => Ok((StatusCode::CREATED, Json(finalized)).into_response()),
        Err(err @ BrokerError::Validation(_)) => {
            let status = StatusCode::UNPROCESSABLE_ENTITY;
            let body = Json(json!({
                "errmsg": err.to_string(),
                "error": err.to_string(),
                "status": status.as_u16()
            }));
            Ok((status, body).into_response())
        }
        Err(err) => Err(err.into()),
    }
}

/// `POST /files/references`
pub async fn check_references(
    State(service): State<BrokerService>,
    headers: HeaderMap,
    Json(request): Json<ReferencesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let submitter = user_id(&headers)?;
    let fids = service.allowed_files(submitter, &request.files).await?;
    Ok(Json(ReferencesResponse { fids }))
}

/// Submitting user from the `x-user-id` header; absent means anonymous.
fn user_id(headers: &HeaderMap) -> Result<i64, AppError> {
    let Some(value) = headers.get(USER_ID_HEADER) else {
        return Ok(ANONYMOUS);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|id| *id >= 0)
        .ok_or_else(|| AppError::bad_request(format!("invalid {} header", USER_ID_HEADER)))
}
