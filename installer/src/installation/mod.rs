// Installation orchestration
//
// One `run` drives a full install: validate -> authenticate -> provision -> derive key
// -> persist config. Any failure after authentication rolls back what this run created,
// drops the staged master key and removes the config file.
//
// IMPORTANT:
// - Never log secrets (admin/DB/master passwords, generated credentials).
// - Exactly one error reaches the caller; cleanup failures are only logged.

pub mod host;

use chrono::Utc;
use log::{debug, error, info, warn};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

use crate::config::store::ConfigPersister;
use crate::config::{ConfigData, CONFIG_VERSION};
use crate::database::connection::DbConnector;
use crate::database::provisioning::{
    generate_db_password, generate_db_user, DatabaseProvisioner, ProvisionSession,
};
use crate::database::schema::{admin_seed_rows, AdminSeed, DATABASE_VERSION};
use crate::error::InstallError;
use crate::models::install::InstallParameters;
use crate::models::state::{InstallPhase, ProgressEmitter};
use crate::security::crypto::{self, CryptoError, EntropySource, SALT_BYTES};
use crate::security::master_key::{MasterKeyRecord, MasterKeyService};

pub struct Installer {
    provisioner: DatabaseProvisioner,
    master_keys: Arc<MasterKeyService>,
    config: Arc<ConfigPersister>,
    entropy: Arc<dyn EntropySource>,
    progress: Option<ProgressEmitter>,
    phase: Mutex<InstallPhase>,
}

impl Installer {
    pub fn new(
        connector: Arc<dyn DbConnector>,
        master_keys: Arc<MasterKeyService>,
        config: Arc<ConfigPersister>,
        entropy: Arc<dyn EntropySource>,
    ) -> Self {
        Self {
            provisioner: DatabaseProvisioner::new(connector),
            master_keys,
            config,
            entropy,
            progress: None,
            phase: Mutex::new(InstallPhase::Idle),
        }
    }

    pub fn with_progress(mut self, progress: ProgressEmitter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Last phase entered; `Idle` until the first run starts.
    pub fn phase(&self) -> InstallPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn check_master_password(&self, candidate: &str) -> bool {
        self.master_keys.check_master_password(candidate).await
    }

    fn emit(&self, phase: InstallPhase) {
        debug!(
            "[PHASE: install] [STEP: {}] entering {:?}",
            phase.label(),
            phase
        );
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
        if let Some(progress) = &self.progress {
            progress(phase);
        }
    }

    pub async fn run(&self, params: &InstallParameters) -> Result<ConfigData, InstallError> {
        let install_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            "[PHASE: install] [STEP: start] install {} for database '{}' on '{}' (hosting_mode={})",
            install_id, params.db_name, params.db_host, params.hosting_mode
        );

        let mut session: Option<ProvisionSession> = None;
        let result = self.run_steps(params, &mut session).await;

        match result {
            Ok(config) => {
                if let Some(session) = session.take() {
                    session.close().await;
                }
                self.emit(InstallPhase::Done);
                info!(
                    "[PHASE: install] [STEP: done] install {} completed in {} ms (db_user={}, db_pass_fp={})",
                    install_id,
                    started.elapsed().as_millis(),
                    config.db_user,
                    crypto::secret_fingerprint(&config.db_pass)
                );
                Ok(config)
            }
            Err(err) => {
                error!(
                    "[PHASE: install] [STEP: failed] install {} failed (code={}, kind={:?}): {}",
                    install_id,
                    err.code(),
                    err.kind(),
                    err
                );
                if let Some(mut session) = session.take() {
                    session.rollback().await;
                    session.close().await;
                }
                self.master_keys.discard().await;
                if let Err(e) = self.config.remove().await {
                    warn!(
                        "[PHASE: rollback] [STEP: config] unable to remove config file: {}",
                        e
                    );
                }
                self.emit(InstallPhase::Failed {
                    code: err.code(),
                    kind: err.kind(),
                });
                Err(err)
            }
        }
    }

    async fn run_steps(
        &self,
        params: &InstallParameters,
        session: &mut Option<ProvisionSession>,
    ) -> Result<ConfigData, InstallError> {
        self.emit(InstallPhase::ValidatingInput);
        params.validate()?;
        let endpoint = host::parse_db_host(&params.db_host)?;

        self.emit(InstallPhase::Authenticating);
        let db = session.insert(
            self.provisioner
                .connect(&params.db_admin_user, &params.db_admin_pass, &endpoint)
                .await?,
        );

        self.emit(InstallPhase::Provisioning);
        let (db_user, db_pass) = if params.hosting_mode {
            if !db.check_database_exists(&params.db_name).await? {
                return Err(InstallError::DatabaseMissing {
                    name: params.db_name.clone(),
                });
            }
            (params.db_admin_user.clone(), params.db_admin_pass.clone())
        } else {
            let db_user = generate_db_user(self.entropy.as_ref())?;
            let db_pass = generate_db_password(self.entropy.as_ref())?;
            db.create_database(&params.db_name).await?;
            let hosts = db.allowed_client_hosts().await?;
            db.create_scoped_user(&db_user, &db_pass, &params.db_name, &hosts)
                .await?;
            (db_user, db_pass)
        };
        db.create_schema(&params.db_name).await?;

        self.emit(InstallPhase::DerivingKey);
        let record = self
            .master_keys
            .derive_and_store(&params.master_password)
            .await?;
        let password_salt =
            crypto::b64_encode(&crypto::random_bytes::<SALT_BYTES>(self.entropy.as_ref())?);
        let seed = self.admin_seed(params, &record, &password_salt).await?;
        db.seed(&params.db_name, &admin_seed_rows(&seed)).await?;
        db.verify_schema(&params.db_name).await?;

        self.emit(InstallPhase::PersistingConfig);
        let config = ConfigData {
            db_host: endpoint.host().to_string(),
            db_port: endpoint.port(),
            db_socket: endpoint.socket().map(str::to_string),
            db_name: params.db_name.clone(),
            db_user,
            db_pass,
            site_lang: params.site_lang.clone(),
            hosting_mode: params.hosting_mode,
            installed: true,
            password_salt,
            config_version: CONFIG_VERSION.to_string(),
            database_version: DATABASE_VERSION.to_string(),
            config_date: Utc::now(),
        };
        let guard = self.config.lock().await;
        guard.write(&config, &record).await?;
        drop(guard);

        Ok(config)
    }

    /// Hash the admin password and seal the master password under the admin's credentials.
    async fn admin_seed(
        &self,
        params: &InstallParameters,
        record: &MasterKeyRecord,
        password_salt: &str,
    ) -> Result<AdminSeed, InstallError> {
        let entropy = Arc::clone(&self.entropy);
        let iterations = self.master_keys.iterations();
        let login = params.admin_login.clone();
        let admin_pass = params.admin_pass.clone();
        let master_password = params.master_password.clone();
        let master_pwd_hash = record.verification_hash();
        let password_salt = password_salt.to_string();

        let seed = tokio::task::spawn_blocking(move || {
            build_admin_seed(
                entropy.as_ref(),
                iterations,
                login,
                &admin_pass,
                &master_password,
                &password_salt,
                master_pwd_hash,
            )
        })
        .await
        .map_err(|e| {
            InstallError::CryptoEnvironmentBroken(format!("admin key task failed: {}", e))
        })??;
        Ok(seed)
    }
}

/// Key that seals the admin's copy of the master password.
pub fn admin_master_key(
    admin_pass: &str,
    login: &str,
    password_salt: &str,
    key_salt: &[u8],
    iterations: NonZeroU32,
) -> [u8; crypto::KEY_BYTES] {
    let secret = format!("{}{}{}", admin_pass, login, password_salt);
    crypto::derive_key(secret.as_bytes(), key_salt, iterations)
}

fn build_admin_seed(
    entropy: &dyn EntropySource,
    iterations: NonZeroU32,
    login: String,
    admin_pass: &str,
    master_password: &str,
    password_salt: &str,
    master_pwd_hash: String,
) -> Result<AdminSeed, CryptoError> {
    let pass_hash = crypto::hash_password(entropy, admin_pass, iterations)?;
    let key_salt = crypto::random_bytes::<SALT_BYTES>(entropy)?;
    let key = admin_master_key(admin_pass, &login, password_salt, &key_salt, iterations);
    let sealed_master_pass = crypto::seal(entropy, &key, master_password.as_bytes())?;

    Ok(AdminSeed {
        login,
        pass_hash,
        sealed_master_pass,
        master_key_salt: key_salt.to_vec(),
        master_pwd_hash,
        updated_at: Utc::now().timestamp(),
    })
}
