// Database provisioning: create the application database, its scoped account and schema
//
// Key design decisions:
// - Identifiers are backtick-quoted, literals single-quoted with escaping; values for
//   seed rows are always bound parameters
// - The application account is created once per allowed client host, never with '%'
// - Every object created during a session is recorded so a failed installation can
//   remove exactly what it added and nothing that pre-existed

use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::time::timeout;

use crate::database::connection::{ConnectTarget, DbConnector, DbEndpoint, DbError, DbSession};
use crate::database::schema::{SeedRow, TableDef, TABLES};
use crate::error::{InstallError, CODE_DATABASE_EXISTS, CODE_USER_EXISTS};
use crate::security::crypto::{self, CryptoError, EntropySource, LOWER_ALNUM, PASSWORD_ALPHABET};

pub const DB_USER_PREFIX: &str = "sp_";
const DB_USER_SUFFIX_LEN: usize = 13;
const DB_PASSWORD_LEN: usize = 32;
const MAX_DB_NAME_LEN: usize = 64;
const SYSTEM_SCHEMAS: [&str; 4] = ["mysql", "information_schema", "performance_schema", "sys"];
/// MySQL `ER_NO_SUCH_TABLE`.
const CODE_NO_SUCH_TABLE: u32 = 1146;

// =============================================================================
// Validation
// =============================================================================

/// Validate database name (letters, numbers, underscore only; 1-64 chars)
pub fn validate_db_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Database name is required.".to_string());
    }
    if name.len() > MAX_DB_NAME_LEN {
        return Err(format!(
            "Database name must be {} characters or fewer.",
            MAX_DB_NAME_LEN
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(
            "Database name must contain only letters, numbers, and underscores.".to_string(),
        );
    }
    if SYSTEM_SCHEMAS.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return Err(format!("'{}' is a reserved database name.", name));
    }
    Ok(())
}

// =============================================================================
// MySQL SQL generation (safe, backtick-quoted)
// =============================================================================

/// Backtick-quote a MySQL identifier
fn backtick_quote(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Single-quote a MySQL string literal
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

fn account(user: &str, host: &str) -> String {
    format!("{}@{}", quote_literal(user), quote_literal(host))
}

pub fn create_database_stmt(db_name: &str) -> String {
    format!(
        "CREATE DATABASE {} DEFAULT CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
        backtick_quote(db_name)
    )
}

pub fn drop_database_stmt(db_name: &str) -> String {
    format!("DROP DATABASE IF EXISTS {}", backtick_quote(db_name))
}

pub fn create_user_stmt(user: &str, host: &str, password: &str) -> String {
    format!(
        "CREATE USER {} IDENTIFIED BY {}",
        account(user, host),
        quote_literal(password)
    )
}

/// Privileges on the application database only; never global.
pub fn grant_stmt(db_name: &str, user: &str, host: &str) -> String {
    format!(
        "GRANT ALL PRIVILEGES ON {}.* TO {}",
        backtick_quote(db_name),
        account(user, host)
    )
}

pub fn drop_user_stmt(user: &str, host: &str) -> String {
    format!("DROP USER IF EXISTS {}", account(user, host))
}

pub fn create_table_stmt(db_name: &str, table: &TableDef) -> String {
    format!(
        "CREATE TABLE {}.{} (\n  {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        backtick_quote(db_name),
        backtick_quote(table.name),
        table.body
    )
}

pub fn drop_table_stmt(db_name: &str, table: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {}.{}",
        backtick_quote(db_name),
        backtick_quote(table)
    )
}

/// Parameterized INSERT; values are bound in column order.
pub fn insert_stmt(db_name: &str, row: &SeedRow) -> String {
    let columns: Vec<String> = row.columns.iter().map(|(c, _)| backtick_quote(c)).collect();
    let placeholders = vec!["?"; row.columns.len()].join(", ");
    format!(
        "INSERT INTO {}.{} ({}) VALUES ({})",
        backtick_quote(db_name),
        backtick_quote(row.table),
        columns.join(", "),
        placeholders
    )
}

// =============================================================================
// Generated credentials
// =============================================================================

pub fn generate_db_user(entropy: &dyn EntropySource) -> Result<String, CryptoError> {
    let suffix = crypto::random_string(entropy, DB_USER_SUFFIX_LEN, LOWER_ALNUM)?;
    Ok(format!("{}{}", DB_USER_PREFIX, suffix))
}

pub fn generate_db_password(entropy: &dyn EntropySource) -> Result<String, CryptoError> {
    crypto::random_string(entropy, DB_PASSWORD_LEN, PASSWORD_ALPHABET)
}

// =============================================================================
// Provisioner
// =============================================================================

/// Something this session created and a rollback must remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Database(String),
    User { name: String, host: String },
    Table { database: String, name: String },
}

pub struct DatabaseProvisioner {
    connector: Arc<dyn DbConnector>,
}

impl DatabaseProvisioner {
    pub fn new(connector: Arc<dyn DbConnector>) -> Self {
        Self { connector }
    }

    /// Authenticate against the server. Bounded by the connector's timeout.
    pub async fn connect(
        &self,
        admin_user: &str,
        admin_pass: &str,
        endpoint: &DbEndpoint,
    ) -> Result<ProvisionSession, InstallError> {
        let target = ConnectTarget {
            endpoint: endpoint.clone(),
            user: admin_user.to_string(),
            password: admin_pass.to_string(),
        };
        let limit = self.connector.timeout_duration();

        let session = match timeout(limit, self.connector.connect(&target)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(
                    "[PHASE: install] [STEP: connect] connection to {} failed: {}",
                    target.masked_dsn(),
                    e
                );
                return Err(InstallError::from_db(
                    "authenticate",
                    &endpoint.to_string(),
                    e,
                ));
            }
            Err(_) => {
                warn!(
                    "[PHASE: install] [STEP: connect] connection to {} timed out after {:?}",
                    endpoint, limit
                );
                return Err(InstallError::HostUnreachable {
                    host: endpoint.to_string(),
                    details: format!("connection attempt timed out after {:?}", limit),
                });
            }
        };

        info!(
            "[PHASE: install] [STEP: connect] authenticated as {} on {}",
            admin_user, endpoint
        );
        Ok(ProvisionSession {
            session,
            endpoint: endpoint.clone(),
            artifacts: Vec::new(),
        })
    }
}

pub struct ProvisionSession {
    session: Box<dyn DbSession>,
    endpoint: DbEndpoint,
    artifacts: Vec<Artifact>,
}

impl ProvisionSession {
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    fn engine_error(&self, action: &str, err: DbError) -> InstallError {
        InstallError::from_db(action, &self.endpoint.to_string(), err)
    }

    pub async fn check_database_exists(&self, name: &str) -> Result<bool, InstallError> {
        self.session
            .database_exists(name)
            .await
            .map_err(|e| self.engine_error("check database", e))
    }

    /// Fails with `AlreadyExists` when the database is present; it is then left untouched.
    pub async fn create_database(&mut self, name: &str) -> Result<(), InstallError> {
        if self.check_database_exists(name).await? {
            return Err(InstallError::AlreadyExists {
                object: format!("database '{}'", name),
                native_code: CODE_DATABASE_EXISTS,
            });
        }
        self.session
            .create_database(name)
            .await
            .map_err(|e| self.engine_error("create database", e))?;
        self.artifacts.push(Artifact::Database(name.to_string()));
        info!(
            "[PHASE: install] [STEP: provision] database '{}' created",
            name
        );
        Ok(())
    }

    /// Hosts the application account must be bound to.
    pub async fn allowed_client_hosts(&self) -> Result<BTreeSet<String>, InstallError> {
        if self.endpoint.is_local() {
            return Ok(BTreeSet::from(["localhost".to_string()]));
        }
        let hosts = self
            .session
            .client_hosts()
            .await
            .map_err(|e| self.engine_error("resolve client hosts", e))?;
        debug!(
            "[PHASE: install] [STEP: provision] allowed client hosts: {:?}",
            hosts
        );
        Ok(hosts)
    }

    pub async fn create_scoped_user(
        &mut self,
        name: &str,
        password: &str,
        database: &str,
        allowed_hosts: &BTreeSet<String>,
    ) -> Result<(), InstallError> {
        if allowed_hosts.is_empty() {
            return Err(InstallError::InvalidParameter {
                field: "allowedHosts",
                reason: "no client host could be determined for the application account"
                    .to_string(),
            });
        }
        if let Some(host) = allowed_hosts.iter().find(|h| h.contains('%') || h.is_empty()) {
            return Err(InstallError::InvalidParameter {
                field: "allowedHosts",
                reason: format!("wildcard host '{}' is not allowed", host),
            });
        }

        for host in allowed_hosts {
            let exists = self
                .session
                .user_exists(name, host)
                .await
                .map_err(|e| self.engine_error("check user", e))?;
            if exists {
                return Err(InstallError::AlreadyExists {
                    object: format!("user '{}'@'{}'", name, host),
                    native_code: CODE_USER_EXISTS,
                });
            }

            self.session
                .create_user(name, host, password)
                .await
                .map_err(|e| self.engine_error("create user", e))?;
            self.artifacts.push(Artifact::User {
                name: name.to_string(),
                host: host.clone(),
            });

            self.session
                .grant_database(database, name, host)
                .await
                .map_err(|e| self.engine_error("grant privileges", e))?;
            info!(
                "[PHASE: install] [STEP: provision] account {}@{} granted on '{}'",
                name, host, database
            );
        }
        Ok(())
    }

    pub async fn create_schema(&mut self, database: &str) -> Result<(), InstallError> {
        for table in TABLES {
            self.session
                .create_table(database, table)
                .await
                .map_err(|e| self.engine_error(&format!("create table {}", table.name), e))?;
            self.artifacts.push(Artifact::Table {
                database: database.to_string(),
                name: table.name.to_string(),
            });
        }
        info!(
            "[PHASE: install] [STEP: schema] {} tables created in '{}'",
            TABLES.len(),
            database
        );
        Ok(())
    }

    pub async fn seed(&self, database: &str, rows: &[SeedRow]) -> Result<(), InstallError> {
        let mut ids: HashMap<&'static str, u64> = HashMap::new();
        for row in rows {
            let id = self
                .session
                .insert_row(database, row, &ids)
                .await
                .map_err(|e| self.engine_error(&format!("insert into {}", row.table), e))?;
            if let Some(key) = row.id_key {
                ids.insert(key, id);
            }
        }
        debug!(
            "[PHASE: install] [STEP: seed] {} rows inserted",
            rows.len()
        );
        Ok(())
    }

    /// Every schema table must be present.
    pub async fn verify_schema(&self, database: &str) -> Result<(), InstallError> {
        let present: HashSet<String> = self
            .session
            .list_tables(database)
            .await
            .map_err(|e| self.engine_error("verify schema", e))?
            .into_iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();
        let missing: Vec<&str> = TABLES
            .iter()
            .map(|t| t.name)
            .filter(|name| !present.contains(&name.to_ascii_lowercase()))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(InstallError::Database {
                action: "verify schema".to_string(),
                native_code: CODE_NO_SUCH_TABLE,
                message: format!("missing tables: {}", missing.join(", ")),
            })
        }
    }

    /// Best-effort removal of everything this session created, newest first.
    /// Failures are logged and do not stop the remaining steps.
    pub async fn rollback(&mut self) {
        let artifacts = std::mem::take(&mut self.artifacts);
        let dropped_databases: HashSet<&str> = artifacts
            .iter()
            .filter_map(|a| match a {
                Artifact::Database(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();

        for artifact in artifacts.iter().rev() {
            let result = match artifact {
                Artifact::Table { database, name } => {
                    if dropped_databases.contains(database.as_str()) {
                        continue;
                    }
                    self.session.drop_table(database, name).await
                }
                Artifact::User { name, host } => self.session.drop_user(name, host).await,
                Artifact::Database(name) => self.session.drop_database(name).await,
            };
            match result {
                Ok(()) => debug!(
                    "[PHASE: rollback] [STEP: cleanup] removed {:?}",
                    artifact
                ),
                Err(e) => warn!(
                    "[PHASE: rollback] [STEP: cleanup] failed to remove {:?}: {}",
                    artifact, e
                ),
            }
        }
    }

    pub async fn close(self) {
        self.session.close().await;
    }
}
