// Database connection management
//
// DbConnector/DbSession are the seam between provisioning logic and the engine:
// production uses the sqlx MySQL implementation below, tests use the in-memory engine
// in `database::testing`.

use async_trait::async_trait;
use log::debug;
use sqlx::mysql::{MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use crate::database::provisioning::{
    create_database_stmt, create_table_stmt, create_user_stmt, drop_database_stmt, drop_table_stmt,
    drop_user_stmt, grant_stmt, insert_stmt,
};
use crate::database::schema::{SeedRow, SqlValue, TableDef};
use crate::utils::logging::mask_dsn;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Where the database server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbEndpoint {
    Tcp { host: String, port: u16 },
    Socket { path: String },
}

impl DbEndpoint {
    /// Host part as persisted in ConfigData.
    pub fn host(&self) -> &str {
        match self {
            Self::Tcp { host, .. } => host,
            Self::Socket { .. } => "localhost",
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Tcp { port, .. } => *port,
            Self::Socket { .. } => crate::installation::host::DEFAULT_DB_PORT,
        }
    }

    pub fn socket(&self) -> Option<&str> {
        match self {
            Self::Socket { path } => Some(path),
            Self::Tcp { .. } => None,
        }
    }

    /// Local endpoints only ever see the client as `localhost`.
    pub fn is_local(&self) -> bool {
        match self {
            Self::Socket { .. } => true,
            Self::Tcp { host, .. } => host.eq_ignore_ascii_case("localhost"),
        }
    }
}

impl std::fmt::Display for DbEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Self::Socket { path } => write!(f, "unix:{}", path),
        }
    }
}

#[derive(Clone)]
pub struct ConnectTarget {
    pub endpoint: DbEndpoint,
    pub user: String,
    pub password: String,
}

impl ConnectTarget {
    /// DSN with credentials masked, for logs.
    pub fn masked_dsn(&self) -> String {
        mask_dsn(&format!(
            "mysql://{}:{}@{}",
            self.user, self.password, self.endpoint
        ))
    }
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DbError {
    /// Connection could not be established or was lost.
    #[error("{0}")]
    Unreachable(String),
    /// The server answered with an error; `code` is the native MySQL error number.
    #[error("engine error {code}: {message}")]
    Engine { code: u32, message: String },
}

/// Opens admin sessions against a database server.
#[async_trait]
pub trait DbConnector: Send + Sync {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn DbSession>, DbError>;

    /// Upper bound for a single connection attempt.
    fn timeout_duration(&self) -> Duration {
        DEFAULT_CONNECT_TIMEOUT
    }
}

/// Operations the provisioner needs from an authenticated admin session.
#[async_trait]
pub trait DbSession: Send + Sync {
    async fn database_exists(&self, db: &str) -> Result<bool, DbError>;
    async fn create_database(&self, db: &str) -> Result<(), DbError>;
    async fn drop_database(&self, db: &str) -> Result<(), DbError>;
    async fn user_exists(&self, user: &str, host: &str) -> Result<bool, DbError>;
    async fn create_user(&self, user: &str, host: &str, password: &str) -> Result<(), DbError>;
    /// Grant all privileges on `db` only, then flush privileges.
    async fn grant_database(&self, db: &str, user: &str, host: &str) -> Result<(), DbError>;
    async fn drop_user(&self, user: &str, host: &str) -> Result<(), DbError>;
    async fn create_table(&self, db: &str, table: &TableDef) -> Result<(), DbError>;
    async fn drop_table(&self, db: &str, table: &str) -> Result<(), DbError>;
    async fn list_tables(&self, db: &str) -> Result<Vec<String>, DbError>;
    /// Insert one row, resolving `SqlValue::Ref` through `ids`. Returns the new row id.
    async fn insert_row(
        &self,
        db: &str,
        row: &SeedRow,
        ids: &HashMap<&'static str, u64>,
    ) -> Result<u64, DbError>;
    /// Addresses this client is known by: its own IP and what the server reports.
    async fn client_hosts(&self) -> Result<BTreeSet<String>, DbError>;
    async fn close(&self);
}

// =============================================================================
// MySQL (sqlx)
// =============================================================================

pub struct MySqlConnector {
    timeout: Duration,
}

impl MySqlConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for MySqlConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl DbConnector for MySqlConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn DbSession>, DbError> {
        debug!(
            "[PHASE: install] [STEP: connect] connecting to {}",
            target.masked_dsn()
        );

        let mut options = MySqlConnectOptions::new()
            .username(&target.user)
            .password(&target.password);
        options = match &target.endpoint {
            DbEndpoint::Tcp { host, port } => options.host(host).port(*port),
            DbEndpoint::Socket { path } => options.socket(path),
        };

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(self.timeout)
            .connect_with(options);

        match timeout(self.timeout, pool).await {
            Ok(Ok(pool)) => Ok(Box::new(MySqlSession {
                pool,
                endpoint: target.endpoint.clone(),
            })),
            Ok(Err(e)) => Err(map_sqlx_error(e)),
            Err(_) => Err(DbError::Unreachable(format!(
                "connection attempt timed out after {:?}",
                self.timeout
            ))),
        }
    }

    fn timeout_duration(&self) -> Duration {
        self.timeout
    }
}

fn map_sqlx_error(err: sqlx::Error) -> DbError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| u32::from(e.number()))
                .unwrap_or(0);
            DbError::Engine {
                code,
                message: db_err.message().to_string(),
            }
        }
        e @ (sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Configuration(_)) => DbError::Unreachable(e.to_string()),
        other => DbError::Engine {
            code: 0,
            message: other.to_string(),
        },
    }
}

struct MySqlSession {
    pool: MySqlPool,
    endpoint: DbEndpoint,
}

impl MySqlSession {
    async fn exec(&self, sql: &str) -> Result<(), DbError> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }

    /// IP of the interface used to reach the server. No packet is sent.
    async fn local_ip(&self) -> Option<String> {
        let DbEndpoint::Tcp { host, port } = &self.endpoint else {
            return None;
        };
        let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await.ok()?;
        socket.connect((host.as_str(), *port)).await.ok()?;
        socket.local_addr().ok().map(|addr| addr.ip().to_string())
    }
}

#[async_trait]
impl DbSession for MySqlSession {
    async fn database_exists(&self, db: &str) -> Result<bool, DbError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
        )
        .bind(db)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(count > 0)
    }

    async fn create_database(&self, db: &str) -> Result<(), DbError> {
        self.exec(&create_database_stmt(db)).await
    }

    async fn drop_database(&self, db: &str) -> Result<(), DbError> {
        self.exec(&drop_database_stmt(db)).await
    }

    async fn user_exists(&self, user: &str, host: &str) -> Result<bool, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM mysql.user WHERE User = ? AND Host = ?")
                .bind(user)
                .bind(host)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(count > 0)
    }

    async fn create_user(&self, user: &str, host: &str, password: &str) -> Result<(), DbError> {
        self.exec(&create_user_stmt(user, host, password)).await
    }

    async fn grant_database(&self, db: &str, user: &str, host: &str) -> Result<(), DbError> {
        self.exec(&grant_stmt(db, user, host)).await?;
        self.exec("FLUSH PRIVILEGES").await
    }

    async fn drop_user(&self, user: &str, host: &str) -> Result<(), DbError> {
        self.exec(&drop_user_stmt(user, host)).await
    }

    async fn create_table(&self, db: &str, table: &TableDef) -> Result<(), DbError> {
        self.exec(&create_table_stmt(db, table)).await
    }

    async fn drop_table(&self, db: &str, table: &str) -> Result<(), DbError> {
        self.exec(&drop_table_stmt(db, table)).await
    }

    async fn list_tables(&self, db: &str) -> Result<Vec<String>, DbError> {
        // CAST: MySQL 8 reports information_schema names as binary strings
        sqlx::query_scalar(
            "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES WHERE TABLE_SCHEMA = ?",
        )
        .bind(db)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn insert_row(
        &self,
        db: &str,
        row: &SeedRow,
        ids: &HashMap<&'static str, u64>,
    ) -> Result<u64, DbError> {
        let sql = insert_stmt(db, row);
        let mut query = sqlx::query(&sql);
        for (column, value) in &row.columns {
            query = match value {
                SqlValue::Text(s) => query.bind(s.as_str()),
                SqlValue::Int(i) => query.bind(*i),
                SqlValue::Bool(b) => query.bind(*b),
                SqlValue::Bytes(bytes) => query.bind(bytes.as_slice()),
                SqlValue::Ref(key) => {
                    let id = ids.get(key).copied().ok_or_else(|| DbError::Engine {
                        code: 0,
                        message: format!("unresolved reference '{}' for column {}", key, column),
                    })?;
                    query.bind(id)
                }
            };
        }
        let result = query.execute(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(result.last_insert_id())
    }

    async fn client_hosts(&self) -> Result<BTreeSet<String>, DbError> {
        let mut hosts = BTreeSet::new();
        if let Some(ip) = self.local_ip().await {
            hosts.insert(ip);
        }
        let seen: Option<String> =
            sqlx::query_scalar("SELECT CAST(SUBSTRING_INDEX(USER(), '@', -1) AS CHAR)")
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        if let Some(host) = seen.filter(|h| !h.is_empty()) {
            hosts.insert(host);
        }
        Ok(hosts)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
