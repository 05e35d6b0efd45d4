//! Path resolution for mailpilot config and state files.
//!
//! Resolution order for the config directory:
//!   1. MAILPILOT_CONFIG environment variable
//!   2. OS-native config dir ({user_config_dir}/mailpilot)
//!   3. ~/.config/mailpilot

use std::path::PathBuf;

/// Return the config directory path.
pub fn config_dir() -> PathBuf {
    if let Ok(env) = std::env::var("MAILPILOT_CONFIG") {
        if !env.is_empty() {
            return PathBuf::from(env);
        }
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "mailpilot") {
        return proj_dirs.config_dir().to_path_buf();
    }
    home_dir().join(".config").join("mailpilot")
}

// --- Derived helpers: config and state paths ---

/// Resolve .mailpilot.toml path: check .mailpilot.toml then mailpilot.toml.
pub fn settings_toml() -> PathBuf {
    let dir = config_dir();
    let dotfile = dir.join(".mailpilot.toml");
    if dotfile.exists() {
        return dotfile;
    }
    let plain = dir.join("mailpilot.toml");
    if plain.exists() {
        return plain;
    }
    // Default to .mailpilot.toml (for creation)
    dotfile
}

pub fn autopilot_yaml() -> PathBuf {
    config_dir().join("autopilot.yaml")
}

pub fn database_file() -> PathBuf {
    config_dir().join("autopilot.db")
}

/// Get the user's home directory.
pub fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Expand ~ to home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        home_dir().join(rest)
    } else if path == "~" {
        home_dir()
    } else {
        PathBuf::from(path)
    }
}
