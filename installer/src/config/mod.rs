// Application configuration produced by an installation.
//
// ConfigData is what the running application reads at startup to reach its database.

pub mod settings;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::security::master_key::MasterKeyRecord;

/// Version of the config document layout.
pub const CONFIG_VERSION: &str = "300.18010101";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigData {
    pub db_host: String,
    pub db_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_socket: Option<String>,
    pub db_name: String,
    pub db_user: String,
    pub db_pass: String,
    pub site_lang: String,
    #[serde(default)]
    pub hosting_mode: bool,
    #[serde(default)]
    pub installed: bool,
    pub password_salt: String,
    pub config_version: String,
    pub database_version: String,
    pub config_date: DateTime<Utc>,
}

impl std::fmt::Debug for ConfigData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigData")
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_socket", &self.db_socket)
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_pass", &"***")
            .field("site_lang", &self.site_lang)
            .field("hosting_mode", &self.hosting_mode)
            .field("installed", &self.installed)
            .field("config_version", &self.config_version)
            .field("database_version", &self.database_version)
            .field("config_date", &self.config_date)
            .finish_non_exhaustive()
    }
}

/// On-disk document: ConfigData and the master key record always travel together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub config: ConfigData,
    pub master_key: MasterKeyRecord,
}
