//! Defines routes for the upload broker.
//!
//! ## Structure
//! - **Probes**
//!   - `GET  /healthz`, `GET /readyz`
//!
//! - **Upload flow** (called by the CMS widget)
//!   - `POST /uploads/key`      — allocate a collision-free object key
//!   - `POST /uploads/grant`    — signed form fields for a direct upload
//!   - `POST /uploads/finalize` — record a completed upload
//!   - `POST /files/references` — filter submitted file ids
//!
//! - **Admin**
//!   - `GET|PUT /admin/settings`        — settings; PUT also syncs bucket CORS
//!   - `POST    /admin/migrate-file-paths`

use crate::{
    handlers::{
        admin_handlers::{get_settings, migrate_file_paths, put_settings},
        health_handlers::{healthz, readyz},
        upload_handlers::{allocate_key, check_references, finalize_upload, issue_grant},
    },
    services::broker_service::BrokerService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router; handlers share `BrokerService` as state.
pub fn routes() -> Router<BrokerService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload flow
        .route("/uploads/key", post(allocate_key))
        .route("/uploads/grant", post(issue_grant))
        .route("/uploads/finalize", post(finalize_upload))
        .route("/files/references", post(check_references))
        // admin
        .route("/admin/settings", get(get_settings).put(put_settings))
        .route("/admin/migrate-file-paths", post(migrate_file_paths))
}
