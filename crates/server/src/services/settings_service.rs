//! Application settings service.

use crate::models::errors::BackupError;
use crate::models::settings::{SETTINGS_PARTITION, SETTINGS_ROW};
use crate::models::AppSettings;
use crate::storage::TableStore;
use crate::utils::now_utc;

pub struct SettingsService {
    store: TableStore,
}

impl SettingsService {
    pub fn new(store: TableStore) -> Self {
        Self { store }
    }

    /// Current settings; defaults when none were saved yet.
    pub async fn get(&self) -> Result<AppSettings, BackupError> {
        match self.store.get(SETTINGS_PARTITION, SETTINGS_ROW).await? {
            Some(entity) => AppSettings::from_entity(&entity),
            None => Ok(AppSettings::default()),
        }
    }

    pub async fn save(&self, mut settings: AppSettings) -> Result<AppSettings, BackupError> {
        settings.updated_at = now_utc();
        self.store.upsert(&settings.to_entity()?).await?;
        tracing::info!("Saved application settings");
        Ok(settings)
    }

    /// First-start seeding: persist a settings row carrying the configured
    /// fallback policy, leaving any existing row untouched.
    pub async fn ensure_seeded(&self, default_policy_id: &str) -> Result<(), BackupError> {
        if self.store.get(SETTINGS_PARTITION, SETTINGS_ROW).await?.is_none() {
            let mut settings = AppSettings::default();
            settings.default_policy_id = default_policy_id.to_string();
            self.save(settings).await?;
        }
        Ok(())
    }
}
