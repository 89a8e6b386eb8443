//! Data-directory resolution.
//!
//! Everything the engine persists outside SQLite (token files, the legacy
//! credential slot) lives under one data directory:
//! 1. `DAYBOOK_DATA_DIR` env override (tests, portable installs)
//! 2. `~/.daybook` otherwise

use std::path::PathBuf;

/// Resolve the data directory.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DAYBOOK_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir().unwrap_or_default().join(".daybook")
}

/// Default database path: `<data_dir>/daybook.db`.
pub fn db_path() -> PathBuf {
    data_dir().join("daybook.db")
}

/// Directory holding per-account token files.
pub fn tokens_dir() -> PathBuf {
    data_dir().join("tokens")
}
