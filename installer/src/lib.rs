// sysPass installer
// Main library entry point

pub mod config;
pub mod database;
pub mod error;
pub mod installation;
pub mod models;
pub mod security;
pub mod utils;

use anyhow::{Context, Result};
use log::{error, info};
use std::path::Path;
use std::sync::Arc;

pub use crate::config::settings::InstallerSettings;
pub use crate::config::store::ConfigPersister;
pub use crate::config::ConfigData;
pub use crate::error::{ErrorKind, InstallError};
pub use crate::installation::Installer;
pub use crate::models::install::InstallParameters;
pub use crate::models::state::InstallPhase;
pub use crate::security::master_key::MasterKeyService;

use crate::database::connection::MySqlConnector;
use crate::security::crypto::{EntropySource, SystemEntropy};

/// Initialize logging system with dual format (JSON + human-readable)
pub fn init_logging(log_dir: &Path, with_stdout: bool) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");

    // JSON log file for structured parsing
    let json_log_file = log_dir.join(format!("installer-{}.log", timestamp));

    // Human-readable log file (.txt)
    let txt_log_file = log_dir.join(format!("installer-{}.txt", timestamp));

    let mut dispatch = fern::Dispatch::new()
        .level(log::LevelFilter::Debug)
        // sqlx logs every statement at info; statements carry generated credentials.
        .level_for("sqlx", log::LevelFilter::Warn);

    if with_stdout {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Info)
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", txt_line));
                })
                .chain(std::io::stdout()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let json_line = utils::logging::format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                        None,
                    );
                    out.finish(format_args!("{}\n", json_line));
                })
                .chain(fern::log_file(&json_log_file).with_context(|| {
                    format!("Failed to open log file {:?}", json_log_file)
                })?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", txt_line));
                })
                .chain(fern::log_file(&txt_log_file).with_context(|| {
                    format!("Failed to open log file {:?}", txt_log_file)
                })?),
        );

    dispatch.apply().context("Logger already initialized")?;

    info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(())
}

/// Production wiring: MySQL connector, OS entropy, config store from settings.
pub fn mysql_installer(settings: &InstallerSettings) -> Installer {
    let entropy: Arc<dyn EntropySource> = Arc::new(SystemEntropy::new());
    let store = Arc::new(ConfigPersister::new(settings.config_file.clone()));
    let master_keys = Arc::new(MasterKeyService::new(
        Arc::clone(&entropy),
        Arc::clone(&store),
        settings.kdf_iterations(),
    ));
    let connector = Arc::new(MySqlConnector::new(settings.connect_timeout()));
    Installer::new(connector, master_keys, store, entropy)
}

/// Read install parameters from a TOML file.
pub fn load_parameters(path: &Path, settings: &InstallerSettings) -> Result<InstallParameters> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read parameters file {:?}", path))?;
    let mut params: InstallParameters = toml::from_str(&raw)
        .with_context(|| format!("Failed to parse parameters file {:?}", path))?;
    if params.site_lang.trim().is_empty() {
        params.site_lang = settings.default_site_lang.clone();
    }
    Ok(params)
}

/// Non-interactive install: one run, result on stdout, exit code 0/1.
pub fn run_cli(params_path: &Path, settings_path: Option<&Path>, quiet: bool) -> i32 {
    let settings = match InstallerSettings::load(settings_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Installer error: {:#}", e);
            return 1;
        }
    };

    match settings.log_dir() {
        Ok(dir) => {
            if let Err(e) = init_logging(&dir, !quiet) {
                eprintln!("Failed to initialize logging: {:#}", e);
            }
        }
        Err(e) => eprintln!("Failed to resolve log folder: {:#}", e),
    }

    info!(
        "[PHASE: initialization] Installer starting at {} (config_file={:?})",
        chrono::Utc::now(),
        settings.config_file
    );

    let params = match load_parameters(params_path, &settings) {
        Ok(p) => p,
        Err(e) => {
            error!("[PHASE: initialization] [STEP: parameters] {:#}", e);
            eprintln!("Installer error: {:#}", e);
            return 1;
        }
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build();
    let rt = match rt {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            return 1;
        }
    };

    let installer = mysql_installer(&settings);
    match rt.block_on(installer.run(&params)) {
        Ok(config) => {
            let summary = serde_json::json!({
                "status": "installed",
                "configFile": settings.config_file,
                "dbHost": config.db_host,
                "dbPort": config.db_port,
                "dbName": config.db_name,
                "dbUser": config.db_user,
                "hostingMode": config.hosting_mode,
            });
            println!("{}", summary);
            0
        }
        Err(e) => {
            let summary = serde_json::json!({
                "status": "failed",
                "code": e.code(),
                "kind": e.kind(),
                "message": e.to_string(),
            });
            eprintln!("{}", summary);
            1
        }
    }
}
