use std::time::Duration;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, IntoActiveModel, ModelTrait, Set};

use db::models::attendance_config::{self, Model as AttendanceConfig};

use crate::cache::TtlCache;
use crate::classify::CheckinWindows;
use crate::error::{AttendanceError, Result};

/// Well-known configuration keys.
pub mod keys {
    pub const QRCODE_EXPIRE_MINUTES: &str = "attendance.qrcode.expire_minutes";
    pub const EARLY_CHECKIN_MINUTES: &str = "attendance.early_checkin_minutes";
    pub const LATE_THRESHOLD_MINUTES: &str = "attendance.late_threshold_minutes";
    pub const MAX_LATE_MINUTES: &str = "attendance.max_late_minutes";
    pub const GEOFENCE_RADIUS: &str = "attendance.location.geofence_radius";
    pub const ABSENT_THRESHOLD: &str = "attendance.warning.absent_threshold";
    pub const ABSENT_RATE_THRESHOLD: &str = "attendance.warning.absent_rate_threshold";
    pub const LOW_ATTENDANCE_RATE: &str = "attendance.warning.low_attendance_rate";
    pub const TEACHER_NO_ATTENDANCE_DAYS: &str = "attendance.warning.teacher_no_attendance_days";
    pub const MANUAL_ENABLED: &str = "attendance.method.manual.enabled";
    pub const QRCODE_ENABLED: &str = "attendance.method.qrcode.enabled";
    pub const LOCATION_ENABLED: &str = "attendance.method.location.enabled";
    pub const STATS_CACHE_EXPIRE_MINUTES: &str = "attendance.cache.expire_minutes";
}

/// (key, value, type tag, description) seeded at bootstrap, all
/// system-protected.
const DEFAULT_CONFIGS: &[(&str, &str, &str, &str)] = &[
    (
        keys::QRCODE_EXPIRE_MINUTES,
        "5",
        "INTEGER",
        "QR check-in token lifetime (minutes)",
    ),
    (
        keys::EARLY_CHECKIN_MINUTES,
        "5",
        "INTEGER",
        "How early before start a check-in is accepted (minutes)",
    ),
    (
        keys::LATE_THRESHOLD_MINUTES,
        "5",
        "INTEGER",
        "Grace period after start before a check-in counts as late (minutes)",
    ),
    (
        keys::MAX_LATE_MINUTES,
        "15",
        "INTEGER",
        "Hard check-in cutoff after start (minutes)",
    ),
    (
        keys::GEOFENCE_RADIUS,
        "100",
        "INTEGER",
        "Default geofence radius (meters)",
    ),
    (
        keys::ABSENT_THRESHOLD,
        "3",
        "INTEGER",
        "Absence count that raises a moderate warning",
    ),
    (
        keys::ABSENT_RATE_THRESHOLD,
        "0.33",
        "DOUBLE",
        "Absence share of all classes that raises a severe warning",
    ),
    (
        keys::LOW_ATTENDANCE_RATE,
        "0.70",
        "DOUBLE",
        "Course average attendance rate below which a warning is raised",
    ),
    (
        keys::TEACHER_NO_ATTENDANCE_DAYS,
        "7",
        "INTEGER",
        "Days without a submitted session before a teacher is flagged",
    ),
    (keys::MANUAL_ENABLED, "true", "BOOLEAN", "Enable manual roll call"),
    (keys::QRCODE_ENABLED, "true", "BOOLEAN", "Enable QR check-in"),
    (
        keys::LOCATION_ENABLED,
        "true",
        "BOOLEAN",
        "Enable location check-in",
    ),
    (
        keys::STATS_CACHE_EXPIRE_MINUTES,
        "30",
        "INTEGER",
        "Statistics cache lifetime (minutes)",
    ),
];

const CONFIG_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Versioned key/value thresholds behind a refreshable read-mostly cache.
pub struct AttendanceConfigService {
    db: DatabaseConnection,
    cache: TtlCache<String, String>,
}

impl AttendanceConfigService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            cache: TtlCache::new(CONFIG_CACHE_TTL),
        }
    }

    /// Seeds the default entries that are not present yet. Idempotent.
    pub async fn initialize_defaults(&self) -> Result<()> {
        for &(key, value, config_type, description) in DEFAULT_CONFIGS {
            if AttendanceConfig::exists_by_key(&self.db, key).await? {
                continue;
            }
            self.create(key, value, config_type, Some(description), true)
                .await?;
            log::info!("default config created: key={key}, value={value}");
        }
        Ok(())
    }

    pub async fn value(&self, key: &str) -> Result<Option<String>> {
        if let Some(cached) = self.cache.get(&key.to_owned()).await {
            return Ok(Some(cached));
        }

        match AttendanceConfig::find_by_key(&self.db, key).await? {
            Some(config) => {
                self.cache
                    .insert(key.to_owned(), config.config_value.clone())
                    .await;
                Ok(Some(config.config_value))
            }
            None => Ok(None),
        }
    }

    pub async fn int(&self, key: &str, default: i64) -> Result<i64> {
        match self.value(key).await? {
            Some(raw) => Ok(raw.parse().unwrap_or_else(|_| {
                log::warn!("config value is not an integer: key={key}, value={raw}");
                default
            })),
            None => Ok(default),
        }
    }

    pub async fn float(&self, key: &str, default: f64) -> Result<f64> {
        match self.value(key).await? {
            Some(raw) => Ok(raw.parse().unwrap_or_else(|_| {
                log::warn!("config value is not a number: key={key}, value={raw}");
                default
            })),
            None => Ok(default),
        }
    }

    pub async fn bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.value(key).await? {
            Some(raw) => Ok(raw.parse().unwrap_or(default)),
            None => Ok(default),
        }
    }

    /// The classification windows currently configured.
    pub async fn checkin_windows(&self) -> Result<CheckinWindows> {
        let defaults = CheckinWindows::default();
        Ok(CheckinWindows {
            early_checkin_minutes: self
                .int(keys::EARLY_CHECKIN_MINUTES, defaults.early_checkin_minutes)
                .await?,
            late_threshold_minutes: self
                .int(keys::LATE_THRESHOLD_MINUTES, defaults.late_threshold_minutes)
                .await?,
            max_late_minutes: self.int(keys::MAX_LATE_MINUTES, defaults.max_late_minutes).await?,
        })
    }

    pub async fn all(&self) -> Result<Vec<AttendanceConfig>> {
        Ok(AttendanceConfig::find_all(&self.db).await?)
    }

    pub async fn create(
        &self,
        key: &str,
        value: &str,
        config_type: &str,
        description: Option<&str>,
        is_system: bool,
    ) -> Result<AttendanceConfig> {
        if AttendanceConfig::exists_by_key(&self.db, key).await? {
            return Err(AttendanceError::DataAlreadyExists(format!(
                "config key {key} already exists"
            )));
        }

        let now = Utc::now();
        let config = attendance_config::ActiveModel {
            config_key: Set(key.to_owned()),
            config_value: Set(value.to_owned()),
            config_type: Set(config_type.to_owned()),
            description: Set(description.map(str::to_owned)),
            is_system: Set(is_system),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        self.cache.insert(key.to_owned(), value.to_owned()).await;
        Ok(config)
    }

    pub async fn update(&self, key: &str, value: &str) -> Result<AttendanceConfig> {
        let config = AttendanceConfig::find_by_key(&self.db, key)
            .await?
            .ok_or_else(|| AttendanceError::ConfigNotFound(key.to_owned()))?;

        let mut active = config.into_active_model();
        active.config_value = Set(value.to_owned());
        active.updated_at = Set(Utc::now());
        let config = active.update(&self.db).await?;

        self.cache.insert(key.to_owned(), value.to_owned()).await;
        log::info!("config updated: key={key}");
        Ok(config)
    }

    /// Deletes a non-system entry; system-protected entries refuse.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let config = AttendanceConfig::find_by_key(&self.db, key)
            .await?
            .ok_or_else(|| AttendanceError::ConfigNotFound(key.to_owned()))?;

        if config.is_system {
            return Err(AttendanceError::InvalidOperation(
                "system config entries cannot be deleted".into(),
            ));
        }

        config.delete(&self.db).await?;
        self.cache.invalidate(&key.to_owned()).await;
        Ok(())
    }

    /// Drops every cached value so the next read hits the store.
    pub async fn refresh_cache(&self) {
        self.cache.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::test_utils::setup_test_db;

    #[tokio::test]
    async fn defaults_are_seeded_idempotently() {
        let db = setup_test_db().await;
        let service = AttendanceConfigService::new(db);

        service.initialize_defaults().await.unwrap();
        service.initialize_defaults().await.unwrap();

        let all = service.all().await.unwrap();
        assert_eq!(all.len(), DEFAULT_CONFIGS.len());
        assert!(all.iter().all(|c| c.is_system));
    }

    #[tokio::test]
    async fn typed_getters_fall_back_on_missing_and_garbled_values() {
        let db = setup_test_db().await;
        let service = AttendanceConfigService::new(db);

        assert_eq!(service.int("nope", 42).await.unwrap(), 42);

        service
            .create("attendance.test.broken", "not-a-number", "INTEGER", None, false)
            .await
            .unwrap();
        assert_eq!(service.int("attendance.test.broken", 9).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn update_refreshes_reads() {
        let db = setup_test_db().await;
        let service = AttendanceConfigService::new(db);
        service.initialize_defaults().await.unwrap();

        service.update(keys::MAX_LATE_MINUTES, "20").await.unwrap();
        assert_eq!(service.int(keys::MAX_LATE_MINUTES, 15).await.unwrap(), 20);

        let windows = service.checkin_windows().await.unwrap();
        assert_eq!(windows.max_late_minutes, 20);
    }

    #[tokio::test]
    async fn system_entries_cannot_be_deleted() {
        let db = setup_test_db().await;
        let service = AttendanceConfigService::new(db);
        service.initialize_defaults().await.unwrap();

        let result = service.delete(keys::QRCODE_EXPIRE_MINUTES).await;
        assert!(matches!(result, Err(AttendanceError::InvalidOperation(_))));

        service
            .create("attendance.test.disposable", "1", "INTEGER", None, false)
            .await
            .unwrap();
        service.delete("attendance.test.disposable").await.unwrap();
        assert_eq!(service.value("attendance.test.disposable").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_key_update_fails() {
        let db = setup_test_db().await;
        let service = AttendanceConfigService::new(db);
        let result = service.update("attendance.test.ghost", "1").await;
        assert!(matches!(result, Err(AttendanceError::ConfigNotFound(_))));
    }
}
