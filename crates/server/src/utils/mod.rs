// Shared helpers used across services and handlers

pub mod time;
pub mod tool_paths;

pub use time::{ensure_naive_utc, format_bytes, now_utc};
pub use tool_paths::tool_path;
