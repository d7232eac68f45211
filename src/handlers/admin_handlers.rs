//! Operator endpoints: broker settings and maintenance tasks.

use crate::{
    errors::AppError, models::settings::BrokerSettings,
    services::broker_service::BrokerService,
};
use axum::{Json, extract::State, response::IntoResponse};

/// `GET /admin/settings`
pub async fn get_settings(
    State(service): State<BrokerService>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.settings().await?))
}

/// `PUT /admin/settings`
///
/// Saves the settings, then replaces (or removes, for an empty origin) the
/// bucket CORS configuration.
pub async fn put_settings(
    State(service): State<BrokerService>,
    Json(settings): Json<BrokerSettings>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.save_settings(settings).await?))
}

/// `POST /admin/migrate-file-paths`
pub async fn migrate_file_paths(
    State(service): State<BrokerService>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.migrate_file_paths().await?))
}
