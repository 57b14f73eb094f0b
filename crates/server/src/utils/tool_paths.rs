//! Resolution of database client tool binaries.
//!
//! Each tool can be overridden with an environment variable (e.g.
//! `MYSQLDUMP_PATH=/opt/mysql/bin/mysqldump`); otherwise the bare name is
//! used and resolved through PATH.

use std::env;

/// Resolve the path for a client tool, honoring `<TOOL>_PATH` overrides.
pub fn tool_path(tool: &str) -> String {
    let var = format!("{}_PATH", tool.to_uppercase().replace('-', "_"));
    env::var(var).unwrap_or_else(|_| tool.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_bare_tool_name() {
        assert_eq!(tool_path("mysqldump"), "mysqldump");
        assert_eq!(tool_path("pg_dump"), "pg_dump");
    }
}
