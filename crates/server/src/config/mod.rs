//! Application configuration loaded from environment variables.

use std::env;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool_or(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

/// All runtime configuration. Built once at startup and shared behind an Arc;
/// services receive it explicitly instead of reading the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub blob_root: String,
    pub backup_container_name: String,
    pub backup_queue_name: String,

    // Table-store table names
    pub config_table_name: String,
    pub history_table_name: String,
    pub policies_table_name: String,
    pub audit_table_name: String,
    pub users_table_name: String,
    pub settings_table_name: String,
    pub access_requests_table_name: String,

    // Worker pool
    pub worker_count: usize,
    pub poison_threshold: u32,
    pub visibility_timeout_secs: u64,
    pub queue_poll_interval_secs: u64,

    // Pipeline
    pub dump_timeout_secs: u64,
    pub connection_test_timeout_secs: u64,
    pub compression_default: bool,

    // Schedules
    pub scheduler_cron: String,
    pub retention_cron: String,

    // Policy fallback when a database resolves no policy
    pub default_policy_id: String,

    /// Explicit development toggle; when false, incoming plaintext passwords
    /// are moved into the encrypted secret store and never persisted in the
    /// catalog.
    pub allow_plaintext_passwords: bool,

    pub api_host: String,
    pub api_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env_or("DATABASE_URL", "sqlite://data/dbvault.db"),
            blob_root: env_or("BLOB_ROOT", "data/blobs"),
            backup_container_name: env_or("BACKUP_CONTAINER_NAME", "backups"),
            backup_queue_name: env_or("BACKUP_QUEUE_NAME", "backup-jobs"),
            config_table_name: env_or("CONFIG_TABLE_NAME", "databaseconfigs"),
            history_table_name: env_or("HISTORY_TABLE_NAME", "backuphistory"),
            policies_table_name: env_or("POLICIES_TABLE_NAME", "backuppolicies"),
            audit_table_name: env_or("AUDIT_TABLE_NAME", "auditlogs"),
            users_table_name: env_or("USERS_TABLE_NAME", "users"),
            settings_table_name: env_or("SETTINGS_TABLE_NAME", "settings"),
            access_requests_table_name: env_or("ACCESS_REQUESTS_TABLE_NAME", "accessrequests"),
            worker_count: env_parse_or("WORKER_COUNT", 5),
            poison_threshold: env_parse_or("POISON_THRESHOLD", 5),
            visibility_timeout_secs: env_parse_or("VISIBILITY_TIMEOUT_SECS", 900),
            queue_poll_interval_secs: env_parse_or("QUEUE_POLL_INTERVAL_SECS", 5),
            dump_timeout_secs: env_parse_or("DUMP_TIMEOUT_SECS", 3600),
            connection_test_timeout_secs: env_parse_or("CONNECTION_TEST_TIMEOUT_SECS", 30),
            compression_default: env_bool_or("COMPRESSION_DEFAULT", true),
            scheduler_cron: env_or("SCHEDULER_CRON", "0 */15 * * * *"),
            retention_cron: env_or("RETENTION_CRON", "0 0 2 * * *"),
            default_policy_id: env_or("DEFAULT_POLICY_ID", "production-standard"),
            allow_plaintext_passwords: env_bool_or("ALLOW_PLAINTEXT_PASSWORDS", false),
            api_host: env_or("API_HOST", "0.0.0.0"),
            api_port: env_parse_or("API_PORT", 8080),
        }
    }

    /// Defaults without touching the environment. Used by tests.
    pub fn defaults() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            blob_root: "data/blobs".to_string(),
            backup_container_name: "backups".to_string(),
            backup_queue_name: "backup-jobs".to_string(),
            config_table_name: "databaseconfigs".to_string(),
            history_table_name: "backuphistory".to_string(),
            policies_table_name: "backuppolicies".to_string(),
            audit_table_name: "auditlogs".to_string(),
            users_table_name: "users".to_string(),
            settings_table_name: "settings".to_string(),
            access_requests_table_name: "accessrequests".to_string(),
            worker_count: 5,
            poison_threshold: 5,
            visibility_timeout_secs: 900,
            queue_poll_interval_secs: 5,
            dump_timeout_secs: 3600,
            connection_test_timeout_secs: 30,
            compression_default: true,
            scheduler_cron: "0 */15 * * * *".to_string(),
            retention_cron: "0 0 2 * * *".to_string(),
            default_policy_id: "production-standard".to_string(),
            allow_plaintext_passwords: false,
            api_host: "127.0.0.1".to_string(),
            api_port: 8080,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_defaults() {
        let config = AppConfig::defaults();
        assert_eq!(config.backup_queue_name, "backup-jobs");
        assert_eq!(config.history_table_name, "backuphistory");
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.poison_threshold, 5);
        assert_eq!(config.dump_timeout_secs, 3600);
        assert_eq!(config.default_policy_id, "production-standard");
        assert!(!config.allow_plaintext_passwords);
    }
}
