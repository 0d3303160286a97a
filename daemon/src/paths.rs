/// Location of the daemon's configuration file.
///
/// The default is `<config dir>/Presence/config.toml`, where the config dir is
/// `~/.config` on Linux, `~/Library/Application Support` on macOS and
/// `%APPDATA%` on Windows. `PRESENCE_CONFIG` overrides the whole path.
use std::path::PathBuf;

const APP_DIR_NAME: &str = "Presence";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "PRESENCE_CONFIG";

/// Returns the per-user application directory, or the working directory if
/// the platform has no config dir.
pub fn app_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Returns the config file path, honouring `PRESENCE_CONFIG`.
pub fn config_file_path() -> PathBuf {
    config_file_path_from(std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
}

fn config_file_path_from(override_path: Option<PathBuf>) -> PathBuf {
    match override_path {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => app_config_dir().join(CONFIG_FILE_NAME),
    }
}
