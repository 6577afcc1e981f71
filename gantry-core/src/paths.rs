//! Centralized path configuration for Gantry.
//!
//! All data paths should go through this module so every component agrees
//! on where state lives, whether running as a user or a system service.

use std::path::PathBuf;

/// Get the Gantry data directory.
///
/// Resolution order:
/// 1. `GANTRY_DATA_DIR` environment variable
/// 2. `/var/lib/gantry` if it exists (system install)
/// 3. `~/.gantry` for user-only installs
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("GANTRY_DATA_DIR") {
        return PathBuf::from(dir);
    }

    let system_dir = PathBuf::from("/var/lib/gantry");
    if system_dir.exists() {
        return system_dir;
    }

    dirs::home_dir().map(|h| h.join(".gantry")).unwrap_or(system_dir)
}

/// Get the database path.
pub fn db_path() -> PathBuf {
    data_dir().join("gantry.db")
}

/// Get the stack storage root.
pub fn stacks_dir() -> PathBuf {
    data_dir().join("stacks")
}

/// Get the configuration directory.
pub fn config_dir() -> PathBuf {
    data_dir().join("config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_consistency() {
        let base = data_dir();
        assert!(db_path().starts_with(&base));
        assert!(stacks_dir().starts_with(&base));
        assert!(config_dir().starts_with(&base));
    }
}
