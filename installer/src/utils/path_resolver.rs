use anyhow::Result;
use std::path::PathBuf;

const APP_DIR: &str = "syspass";

/// Resolve the working folder (absolute path)
pub fn resolve_working_folder() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Resolve log folder (absolute path)
pub fn resolve_log_folder() -> Result<PathBuf> {
    // Prefer the per-user data dir; fall back to `./logs` when the platform has none
    // (minimal containers, service accounts without a home).
    let base = dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(resolve_working_folder);
    let log_dir = base.join("logs");
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log folder {:?}: {}", log_dir, e))?;
    Ok(log_dir)
}

/// Resolve the default application config document path.
///
/// The file itself is not created here; the installer writes it atomically.
pub fn resolve_config_file() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| resolve_working_folder().join("config"));
    Ok(base.join("config.toml"))
}
