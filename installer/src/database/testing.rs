// In-memory MySQL stand-in for deterministic tests
//
// Models just enough of the server for provisioning: accounts with an admin flag,
// databases, tables, rows, users and grants. Failures and hangs are injected per
// operation; every operation is counted.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::database::connection::{ConnectTarget, DbConnector, DbError, DbSession};
use crate::database::schema::{SeedRow, SqlValue, TableDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Connect,
    DatabaseExists,
    CreateDatabase,
    DropDatabase,
    UserExists,
    CreateUser,
    Grant,
    DropUser,
    CreateTable,
    DropTable,
    ListTables,
    Insert,
    ClientHosts,
}

type Row = Vec<(String, SqlValue)>;

struct Account {
    password: String,
    admin: bool,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    unreachable_hosts: HashSet<String>,
    hang: bool,
    client_hosts: BTreeSet<String>,
    databases: BTreeMap<String, BTreeMap<String, Vec<Row>>>,
    users: BTreeMap<(String, String), String>,
    grants: BTreeSet<(String, String, String)>,
    failures: HashMap<Op, u32>,
    calls: HashMap<Op, u32>,
}

pub struct MemoryEngine {
    state: Mutex<State>,
}

impl MemoryEngine {
    fn new() -> Self {
        let mut state = State::default();
        state.accounts.insert(
            "root".to_string(),
            Account {
                password: "syspass".to_string(),
                admin: true,
            },
        );
        state.unreachable_hosts.insert("fail".to_string());
        state.client_hosts = BTreeSet::from(["172.18.0.5".to_string(), "installer.local".to_string()]);
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Count the call and return the injected failure for `op`, if any.
    fn enter(&self, op: Op) -> Result<(), DbError> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        match state.failures.get(&op) {
            Some(&code) => Err(DbError::Engine {
                code,
                message: format!("injected failure for {:?}", op),
            }),
            None => Ok(()),
        }
    }

    pub fn add_account(&self, user: &str, password: &str, admin: bool) {
        self.lock().accounts.insert(
            user.to_string(),
            Account {
                password: password.to_string(),
                admin,
            },
        );
    }

    pub fn add_database(&self, name: &str) {
        self.lock()
            .databases
            .entry(name.to_string())
            .or_default();
    }

    pub fn add_user(&self, user: &str, host: &str) {
        self.lock()
            .users
            .insert((user.to_string(), host.to_string()), String::new());
    }

    pub fn fail_on(&self, op: Op, code: u32) {
        self.lock().failures.insert(op, code);
    }

    pub fn hang_connects(&self) {
        self.lock().hang = true;
    }

    pub fn calls(&self, op: Op) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.lock().databases.contains_key(name)
    }

    pub fn has_user(&self, user: &str, host: &str) -> bool {
        self.lock()
            .users
            .contains_key(&(user.to_string(), host.to_string()))
    }

    pub fn user_password(&self, user: &str, host: &str) -> Option<String> {
        self.lock()
            .users
            .get(&(user.to_string(), host.to_string()))
            .cloned()
    }

    pub fn users(&self) -> Vec<(String, String)> {
        self.lock().users.keys().cloned().collect()
    }

    pub fn has_grant(&self, db: &str, user: &str, host: &str) -> bool {
        self.lock()
            .grants
            .contains(&(db.to_string(), user.to_string(), host.to_string()))
    }

    pub fn tables(&self, db: &str) -> Vec<String> {
        self.lock()
            .databases
            .get(db)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn rows(&self, db: &str, table: &str) -> Vec<Row> {
        self.lock()
            .databases
            .get(db)
            .and_then(|t| t.get(table))
            .cloned()
            .unwrap_or_default()
    }

    /// Every database, user and table currently present.
    pub fn snapshot(&self) -> (Vec<String>, Vec<(String, String)>, usize) {
        let state = self.lock();
        let tables = state.databases.values().map(|t| t.len()).sum();
        (
            state.databases.keys().cloned().collect(),
            state.users.keys().cloned().collect(),
            tables,
        )
    }
}

pub struct MemoryConnector {
    engine: Arc<MemoryEngine>,
    timeout: Duration,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(MemoryEngine::new()),
            timeout: Duration::from_millis(200),
        }
    }

    pub fn engine(&self) -> Arc<MemoryEngine> {
        Arc::clone(&self.engine)
    }
}

#[async_trait]
impl DbConnector for MemoryConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn DbSession>, DbError> {
        self.engine.enter(Op::Connect)?;
        let hang = self.engine.lock().hang;
        if hang {
            std::future::pending::<()>().await;
        }

        let state = self.engine.lock();
        if state.unreachable_hosts.contains(target.endpoint.host()) {
            return Err(DbError::Unreachable(format!(
                "Can't connect to MySQL server on '{}'",
                target.endpoint
            )));
        }
        let admin = match state.accounts.get(&target.user) {
            Some(account) if account.password == target.password => account.admin,
            _ => {
                return Err(DbError::Engine {
                    code: 1045,
                    message: format!(
                        "Access denied for user '{}'@'172.18.0.5' (using password: YES)",
                        target.user
                    ),
                })
            }
        };
        drop(state);

        Ok(Box::new(MemorySession {
            engine: Arc::clone(&self.engine),
            user: target.user.clone(),
            admin,
        }))
    }

    fn timeout_duration(&self) -> Duration {
        self.timeout
    }
}

struct MemorySession {
    engine: Arc<MemoryEngine>,
    user: String,
    admin: bool,
}

impl MemorySession {
    fn require_admin(&self, code: u32) -> Result<(), DbError> {
        if self.admin {
            Ok(())
        } else {
            Err(DbError::Engine {
                code,
                message: format!("Access denied for user '{}'", self.user),
            })
        }
    }
}

#[async_trait]
impl DbSession for MemorySession {
    async fn database_exists(&self, db: &str) -> Result<bool, DbError> {
        self.engine.enter(Op::DatabaseExists)?;
        Ok(self.engine.has_database(db))
    }

    async fn create_database(&self, db: &str) -> Result<(), DbError> {
        self.engine.enter(Op::CreateDatabase)?;
        self.require_admin(1044)?;
        let mut state = self.engine.lock();
        if state.databases.contains_key(db) {
            return Err(DbError::Engine {
                code: 1007,
                message: format!("Can't create database '{}'; database exists", db),
            });
        }
        state.databases.insert(db.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn drop_database(&self, db: &str) -> Result<(), DbError> {
        self.engine.enter(Op::DropDatabase)?;
        self.require_admin(1044)?;
        let mut state = self.engine.lock();
        state.databases.remove(db);
        state.grants.retain(|(d, _, _)| d != db);
        Ok(())
    }

    async fn user_exists(&self, user: &str, host: &str) -> Result<bool, DbError> {
        self.engine.enter(Op::UserExists)?;
        Ok(self.engine.has_user(user, host))
    }

    async fn create_user(&self, user: &str, host: &str, password: &str) -> Result<(), DbError> {
        self.engine.enter(Op::CreateUser)?;
        self.require_admin(1227)?;
        let mut state = self.engine.lock();
        let key = (user.to_string(), host.to_string());
        if state.users.contains_key(&key) {
            return Err(DbError::Engine {
                code: 1396,
                message: format!("Operation CREATE USER failed for '{}'@'{}'", user, host),
            });
        }
        state.users.insert(key, password.to_string());
        Ok(())
    }

    async fn grant_database(&self, db: &str, user: &str, host: &str) -> Result<(), DbError> {
        self.engine.enter(Op::Grant)?;
        self.require_admin(1142)?;
        self.engine
            .lock()
            .grants
            .insert((db.to_string(), user.to_string(), host.to_string()));
        Ok(())
    }

    async fn drop_user(&self, user: &str, host: &str) -> Result<(), DbError> {
        self.engine.enter(Op::DropUser)?;
        self.require_admin(1227)?;
        let mut state = self.engine.lock();
        state.users.remove(&(user.to_string(), host.to_string()));
        state.grants.retain(|(_, u, h)| !(u == user && h == host));
        Ok(())
    }

    async fn create_table(&self, db: &str, table: &TableDef) -> Result<(), DbError> {
        self.engine.enter(Op::CreateTable)?;
        let mut state = self.engine.lock();
        let tables = state.databases.get_mut(db).ok_or_else(|| DbError::Engine {
            code: 1049,
            message: format!("Unknown database '{}'", db),
        })?;
        if tables.contains_key(table.name) {
            return Err(DbError::Engine {
                code: 1050,
                message: format!("Table '{}' already exists", table.name),
            });
        }
        tables.insert(table.name.to_string(), Vec::new());
        Ok(())
    }

    async fn drop_table(&self, db: &str, table: &str) -> Result<(), DbError> {
        self.engine.enter(Op::DropTable)?;
        if let Some(tables) = self.engine.lock().databases.get_mut(db) {
            tables.remove(table);
        }
        Ok(())
    }

    async fn list_tables(&self, db: &str) -> Result<Vec<String>, DbError> {
        self.engine.enter(Op::ListTables)?;
        Ok(self.engine.tables(db))
    }

    async fn insert_row(
        &self,
        db: &str,
        row: &SeedRow,
        ids: &HashMap<&'static str, u64>,
    ) -> Result<u64, DbError> {
        self.engine.enter(Op::Insert)?;
        let mut resolved = Vec::with_capacity(row.columns.len());
        for (column, value) in &row.columns {
            let value = match value {
                SqlValue::Ref(key) => match ids.get(key) {
                    Some(id) => SqlValue::Int(*id as i64),
                    None => {
                        return Err(DbError::Engine {
                            code: 1452,
                            message: format!("unresolved reference '{}'", key),
                        })
                    }
                },
                other => other.clone(),
            };
            resolved.push((column.to_string(), value));
        }

        let mut state = self.engine.lock();
        let rows = state
            .databases
            .get_mut(db)
            .and_then(|t| t.get_mut(row.table))
            .ok_or_else(|| DbError::Engine {
                code: 1146,
                message: format!("Table '{}.{}' doesn't exist", db, row.table),
            })?;
        rows.push(resolved);
        Ok(rows.len() as u64)
    }

    async fn client_hosts(&self) -> Result<BTreeSet<String>, DbError> {
        self.engine.enter(Op::ClientHosts)?;
        Ok(self.engine.lock().client_hosts.clone())
    }

    async fn close(&self) {}
}
