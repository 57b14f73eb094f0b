//! Backup policies: tiered schedule plus retention.
//!
//! A policy bundles five tier configurations (hourly through yearly). Each
//! tier carries its own schedule parameters and a keep count enforced by the
//! retention pass.

use crate::models::errors::BackupError;
use crate::storage::TableEntity;
use crate::utils::now_utc;
use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub const POLICY_PARTITION: &str = "backup_policy";

/// Retention tiers, in scheduler evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupTier {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl BackupTier {
    /// Fixed evaluation order: the first tier that fires wins the tick.
    pub const ALL: [BackupTier; 5] = [
        BackupTier::Hourly,
        BackupTier::Daily,
        BackupTier::Weekly,
        BackupTier::Monthly,
        BackupTier::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackupTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_interval_hours() -> u32 {
    1
}

fn default_time() -> String {
    "02:00".to_string()
}

fn default_day_of_month() -> u8 {
    1
}

fn default_month() -> u8 {
    1
}

/// Schedule + retention for a single tier. Which fields matter depends on the
/// tier: hourly uses `interval_hours`; daily uses `time`; weekly adds
/// `day_of_week` (0 = Sunday); monthly adds `day_of_month` (capped at 28 to
/// avoid February ambiguity); yearly adds `month`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub keep_count: u32,
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u32,
    #[serde(default = "default_time")]
    pub time: String,
    #[serde(default)]
    pub day_of_week: u8,
    #[serde(default = "default_day_of_month")]
    pub day_of_month: u8,
    #[serde(default = "default_month")]
    pub month: u8,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            keep_count: 0,
            interval_hours: 1,
            time: default_time(),
            day_of_week: 0,
            day_of_month: 1,
            month: 1,
        }
    }
}

impl TierConfig {
    pub fn enabled(keep_count: u32) -> Self {
        Self {
            enabled: true,
            keep_count,
            ..Self::default()
        }
    }

    /// Parse the "HH:MM" schedule time.
    pub fn scheduled_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.time, "%H:%M").ok()
    }

    fn validate(&self, tier: BackupTier) -> Result<(), BackupError> {
        let field = |name: &str| format!("{}.{}", tier.as_str(), name);
        match tier {
            BackupTier::Hourly => {
                if !(1..=12).contains(&self.interval_hours) {
                    return Err(BackupError::validation(
                        field("interval_hours"),
                        "must be between 1 and 12",
                    ));
                }
            }
            BackupTier::Daily => {}
            BackupTier::Weekly => {
                if self.day_of_week > 6 {
                    return Err(BackupError::validation(
                        field("day_of_week"),
                        "must be between 0 (Sunday) and 6",
                    ));
                }
            }
            BackupTier::Monthly => {
                if !(1..=28).contains(&self.day_of_month) {
                    return Err(BackupError::validation(
                        field("day_of_month"),
                        "must be between 1 and 28",
                    ));
                }
            }
            BackupTier::Yearly => {
                if !(1..=12).contains(&self.month) {
                    return Err(BackupError::validation(field("month"), "must be between 1 and 12"));
                }
                if !(1..=28).contains(&self.day_of_month) {
                    return Err(BackupError::validation(
                        field("day_of_month"),
                        "must be between 1 and 28",
                    ));
                }
            }
        }
        if tier != BackupTier::Hourly && self.scheduled_time().is_none() {
            return Err(BackupError::validation(field("time"), "must be HH:MM"));
        }
        Ok(())
    }
}

/// A named bundle of five tier configurations.
///
/// Persisted under partition `backup_policy`, row key = id. System policies
/// are seeded at startup and cannot be deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPolicy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub hourly: TierConfig,
    #[serde(default)]
    pub daily: TierConfig,
    #[serde(default)]
    pub weekly: TierConfig,
    #[serde(default)]
    pub monthly: TierConfig,
    #[serde(default)]
    pub yearly: TierConfig,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl BackupPolicy {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_utc();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            is_system: false,
            hourly: TierConfig::default(),
            daily: TierConfig::default(),
            weekly: TierConfig::default(),
            monthly: TierConfig::default(),
            yearly: TierConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn tier(&self, tier: BackupTier) -> &TierConfig {
        match tier {
            BackupTier::Hourly => &self.hourly,
            BackupTier::Daily => &self.daily,
            BackupTier::Weekly => &self.weekly,
            BackupTier::Monthly => &self.monthly,
            BackupTier::Yearly => &self.yearly,
        }
    }

    pub fn validate(&self) -> Result<(), BackupError> {
        if self.name.trim().is_empty() {
            return Err(BackupError::validation("name", "must not be empty"));
        }
        for tier in BackupTier::ALL {
            self.tier(tier).validate(tier)?;
        }
        Ok(())
    }

    /// Compact retention summary like "24h/15d/8w/4m/2y".
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for (tier, suffix) in [
            (BackupTier::Hourly, "h"),
            (BackupTier::Daily, "d"),
            (BackupTier::Weekly, "w"),
            (BackupTier::Monthly, "m"),
            (BackupTier::Yearly, "y"),
        ] {
            let cfg = self.tier(tier);
            if cfg.enabled && cfg.keep_count > 0 {
                parts.push(format!("{}{}", cfg.keep_count, suffix));
            }
        }
        if parts.is_empty() {
            "No retention".to_string()
        } else {
            parts.join("/")
        }
    }

    pub fn to_entity(&self) -> Result<TableEntity, BackupError> {
        Ok(TableEntity {
            partition_key: POLICY_PARTITION.to_string(),
            row_key: self.id.clone(),
            body: serde_json::to_value(self)?,
        })
    }

    pub fn from_entity(entity: &TableEntity) -> Result<Self, BackupError> {
        let mut policy: Self = serde_json::from_value(entity.body.clone())?;
        policy.id = entity.row_key.clone();
        Ok(policy)
    }
}

/// The system policies seeded on first start.
pub fn default_policies() -> Vec<BackupPolicy> {
    let mut critical = BackupPolicy::new("production-critical", "Production Critical");
    critical.description = Some("Aggressive retention for critical production databases".into());
    critical.is_system = true;
    critical.hourly = TierConfig {
        interval_hours: 1,
        ..TierConfig::enabled(24)
    };
    critical.daily = TierConfig {
        time: "02:00".into(),
        ..TierConfig::enabled(15)
    };
    critical.weekly = TierConfig {
        day_of_week: 0,
        time: "03:00".into(),
        ..TierConfig::enabled(8)
    };
    critical.monthly = TierConfig {
        day_of_month: 1,
        time: "04:00".into(),
        ..TierConfig::enabled(4)
    };
    critical.yearly = TierConfig {
        month: 1,
        day_of_month: 1,
        time: "05:00".into(),
        ..TierConfig::enabled(2)
    };

    let mut standard = BackupPolicy::new("production-standard", "Production Standard");
    standard.description = Some("Default retention for production databases".into());
    standard.is_system = true;
    standard.hourly = TierConfig {
        interval_hours: 2,
        ..TierConfig::enabled(12)
    };
    standard.daily = TierConfig {
        time: "02:00".into(),
        ..TierConfig::enabled(7)
    };
    standard.weekly = TierConfig {
        day_of_week: 0,
        time: "03:00".into(),
        ..TierConfig::enabled(4)
    };
    standard.monthly = TierConfig {
        day_of_month: 1,
        time: "04:00".into(),
        ..TierConfig::enabled(2)
    };
    standard.yearly = TierConfig {
        month: 1,
        day_of_month: 1,
        time: "05:00".into(),
        ..TierConfig::enabled(1)
    };

    let mut development = BackupPolicy::new("development", "Development");
    development.description = Some("Light retention for development databases".into());
    development.is_system = true;
    development.daily = TierConfig {
        time: "02:00".into(),
        ..TierConfig::enabled(7)
    };
    development.weekly = TierConfig {
        day_of_week: 0,
        time: "03:00".into(),
        ..TierConfig::enabled(2)
    };

    vec![critical, standard, development]
}
