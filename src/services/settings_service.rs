//! Persistence for [`BrokerSettings`] as name/value rows.

use crate::{errors::BrokerResult, models::settings::BrokerSettings};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

const CORS_ORIGIN: &str = "cors_origin";
const UPLOAD_SCHEME: &str = "upload_scheme";
const ACCESS_CONTROL: &str = "access_control";

#[derive(Clone)]
pub struct SettingsStore {
    db: Arc<SqlitePool>,
}

impl SettingsStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Stored settings; missing rows fall back to the defaults.
    pub async fn get(&self) -> BrokerResult<BrokerSettings> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT name, value FROM broker_settings")
            .fetch_all(&*self.db)
            .await?;

        let mut settings = BrokerSettings::default();
        for (name, value) in rows {
            match name.as_str() {
                CORS_ORIGIN => settings.cors_origin = value,
                UPLOAD_SCHEME => settings.upload_scheme = value.parse()?,
                ACCESS_CONTROL => settings.access_control = value.parse()?,
                other => debug!("ignoring unknown setting {}", other),
            }
        }
        Ok(settings)
    }

    pub async fn save(&self, settings: &BrokerSettings) -> BrokerResult<()> {
        let values = [
            (CORS_ORIGIN, settings.cors_origin.trim()),
            (UPLOAD_SCHEME, settings.upload_scheme.as_str()),
            (ACCESS_CONTROL, settings.access_control.as_str()),
        ];

        let mut tx = self.db.begin().await?;
        for (name, value) in values {
            sqlx::query(
                "INSERT INTO broker_settings (name, value) VALUES (?, ?)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            )
            .bind(name)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
