//! Input validation for catalog entities.
//!
//! Catalog rows are long-lived and feed straight into subprocess argv and
//! blob paths, so names and hosts are validated on the way in rather than
//! sanitized on the way out.

use crate::models::errors::BackupError;
use crate::models::EngineType;
use regex::Regex;
use std::sync::OnceLock;

fn database_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]*$").expect("valid regex"))
}

fn ip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,3}\.){3}\d{1,3}$").expect("valid regex"))
}

fn hostname_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
        )
        .expect("valid regex")
    })
}

/// Names that shadow server-internal databases and must not be configured.
const RESERVED_DATABASE_NAMES: [&str; 6] = [
    "master",
    "tempdb",
    "model",
    "msdb",
    "mysql",
    "information_schema",
];

/// Validate the on-server database name.
pub fn validate_database_name(name: &str) -> Result<(), BackupError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BackupError::validation(
            "database_name",
            "must not be empty",
        ));
    }
    if name.len() > 128 {
        return Err(BackupError::validation(
            "database_name",
            "must not exceed 128 characters",
        ));
    }
    if !database_name_re().is_match(name) {
        return Err(BackupError::validation(
            "database_name",
            "must start with a letter and contain only letters, numbers, underscores, and hyphens",
        ));
    }
    if RESERVED_DATABASE_NAMES.contains(&name.to_lowercase().as_str()) {
        return Err(BackupError::validation(
            "database_name",
            format!("'{}' is a reserved database name", name),
        ));
    }
    Ok(())
}

/// Validate a hostname or IPv4 address.
pub fn validate_hostname(hostname: &str) -> Result<(), BackupError> {
    let hostname = hostname.trim();
    if hostname.is_empty() {
        return Err(BackupError::validation("host", "must not be empty"));
    }
    if hostname.len() > 255 {
        return Err(BackupError::validation(
            "host",
            "must not exceed 255 characters",
        ));
    }

    if ip_re().is_match(hostname) {
        let valid_octets = hostname
            .split('.')
            .all(|octet| octet.parse::<u32>().map(|v| v <= 255).unwrap_or(false));
        if !valid_octets {
            return Err(BackupError::validation("host", "invalid IP address"));
        }
        return Ok(());
    }

    if hostname_re().is_match(hostname) {
        return Ok(());
    }
    Err(BackupError::validation("host", "invalid hostname format"))
}

/// Validate a key=value;key=value connection string for the engine type.
pub fn validate_connection_string(
    connection_string: &str,
    engine_type: EngineType,
) -> Result<(), BackupError> {
    if connection_string.trim().is_empty() {
        return Err(BackupError::validation(
            "connection_string",
            "must not be empty",
        ));
    }

    let required: &[&str] = match engine_type {
        EngineType::Mysql => &["Server", "Database", "Uid"],
        EngineType::Postgresql => &["Host", "Database", "Username"],
        EngineType::Sqlserver => &["Server", "Database", "User Id"],
    };

    let keys: Vec<&str> = connection_string
        .split(';')
        .filter_map(|part| part.split_once('=').map(|(key, _)| key.trim()))
        .collect();

    let missing: Vec<&str> = required
        .iter()
        .filter(|key| !keys.contains(*key))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(BackupError::validation(
            "connection_string",
            format!("missing required parts: {}", missing.join(", ")),
        ));
    }
    Ok(())
}
