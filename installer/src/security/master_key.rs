// Master password key service
//
// The master password never leaves this module in clear. What is kept is:
// - a PBKDF2 verifier (constant-time check of candidate passwords)
// - a random 256-bit data key sealed under a second, independently salted PBKDF2 key
//
// `derive_and_store` stages the record for the running installation; the installer
// persists it next to ConfigData in one atomic write. `check_master_password` falls
// back to the persisted copy when nothing is staged (e.g. a fresh process).

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::store::ConfigPersister;
use crate::error::InstallError;
use crate::security::crypto::{self, CryptoError, EntropySource, KEY_BYTES, SALT_BYTES};

pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
const ALGORITHM: &str = "pbkdf2-sha256";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKeyRecord {
    pub algorithm: String,
    pub iterations: u32,
    pub verifier_salt: String,
    pub verifier: String,
    pub key_salt: String,
    pub sealed_key: String,
    pub created_at: DateTime<Utc>,
}

impl MasterKeyRecord {
    pub fn derive(
        entropy: &dyn EntropySource,
        passphrase: &str,
        iterations: NonZeroU32,
    ) -> Result<Self, CryptoError> {
        let verifier_salt = crypto::random_bytes::<SALT_BYTES>(entropy)?;
        let key_salt = crypto::random_bytes::<SALT_BYTES>(entropy)?;
        let data_key = crypto::random_bytes::<KEY_BYTES>(entropy)?;

        let verifier = crypto::derive_key(passphrase.as_bytes(), &verifier_salt, iterations);
        let kek = crypto::derive_key(passphrase.as_bytes(), &key_salt, iterations);
        let sealed = crypto::seal(entropy, &kek, &data_key)?;

        Ok(Self {
            algorithm: ALGORITHM.to_string(),
            iterations: iterations.get(),
            verifier_salt: crypto::b64_encode(&verifier_salt),
            verifier: crypto::b64_encode(&verifier),
            key_salt: crypto::b64_encode(&key_salt),
            sealed_key: crypto::b64_encode(&sealed),
            created_at: Utc::now(),
        })
    }

    /// True iff `candidate` derives to the stored verifier.
    pub fn check(&self, candidate: &str) -> bool {
        if self.algorithm != ALGORITHM {
            return false;
        }
        let Some(iterations) = NonZeroU32::new(self.iterations) else {
            return false;
        };
        match (
            crypto::b64_decode(&self.verifier_salt),
            crypto::b64_decode(&self.verifier),
        ) {
            (Ok(salt), Ok(verifier)) => {
                crypto::verify_key(candidate.as_bytes(), &salt, iterations, &verifier)
            }
            _ => false,
        }
    }

    /// Unseal the data encryption key with the master password.
    pub fn open_data_key(&self, passphrase: &str) -> Result<[u8; KEY_BYTES], CryptoError> {
        let iterations = NonZeroU32::new(self.iterations)
            .ok_or_else(|| CryptoError::Malformed("iteration count is zero".to_string()))?;
        let key_salt = crypto::b64_decode(&self.key_salt)?;
        let sealed = crypto::b64_decode(&self.sealed_key)?;

        let kek = crypto::derive_key(passphrase.as_bytes(), &key_salt, iterations);
        let plain = crypto::open(&kek, &sealed)?;
        plain
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::Malformed("data key has invalid length".to_string()))
    }

    /// Verifier in the self-describing hash format stored in the `Config` table.
    pub fn verification_hash(&self) -> String {
        format!(
            "{}${}${}${}",
            self.algorithm, self.iterations, self.verifier_salt, self.verifier
        )
    }
}

pub struct MasterKeyService {
    entropy: Arc<dyn EntropySource>,
    iterations: NonZeroU32,
    store: Arc<ConfigPersister>,
    staged: RwLock<Option<MasterKeyRecord>>,
}

impl MasterKeyService {
    pub fn new(
        entropy: Arc<dyn EntropySource>,
        store: Arc<ConfigPersister>,
        iterations: NonZeroU32,
    ) -> Self {
        Self {
            entropy,
            iterations,
            store,
            staged: RwLock::new(None),
        }
    }

    pub fn iterations(&self) -> NonZeroU32 {
        self.iterations
    }

    /// Derive a fresh record from `passphrase` and stage it.
    ///
    /// A failing random source or cipher surfaces as `CryptoEnvironmentBroken`.
    pub async fn derive_and_store(&self, passphrase: &str) -> Result<MasterKeyRecord, InstallError> {
        debug!(
            "[PHASE: install] [STEP: master_key] deriving master key (iterations={})",
            self.iterations
        );

        let entropy = Arc::clone(&self.entropy);
        let passphrase = passphrase.to_string();
        let iterations = self.iterations;
        let record = tokio::task::spawn_blocking(move || {
            MasterKeyRecord::derive(entropy.as_ref(), &passphrase, iterations)
        })
        .await
        .map_err(|e| {
            InstallError::CryptoEnvironmentBroken(format!("key derivation task failed: {}", e))
        })??;

        *self.staged.write().await = Some(record.clone());
        info!("[PHASE: install] [STEP: master_key] master key derived and staged");
        Ok(record)
    }

    pub async fn check_master_password(&self, candidate: &str) -> bool {
        if let Some(record) = self.staged.read().await.as_ref() {
            return record.check(candidate);
        }

        match self.store.read().await {
            Ok(Some(doc)) => doc.master_key.check(candidate),
            Ok(None) => false,
            Err(e) => {
                warn!(
                    "[PHASE: runtime] [STEP: master_key] unable to read persisted master key: {}",
                    e
                );
                false
            }
        }
    }

    /// Drop the staged record after a failed installation.
    pub async fn discard(&self) {
        self.staged.write().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::crypto::test_support::BrokenEntropy;
    use crate::security::crypto::SystemEntropy;

    fn iters() -> NonZeroU32 {
        NonZeroU32::new(1_000).unwrap()
    }

    fn service(dir: &tempfile::TempDir, entropy: Arc<dyn EntropySource>) -> MasterKeyService {
        let store = Arc::new(ConfigPersister::new(dir.path().join("config.toml")));
        MasterKeyService::new(entropy, store, iters())
    }

    #[test]
    fn record_checks_only_the_original_passphrase() {
        let record = MasterKeyRecord::derive(&SystemEntropy::new(), "00123456789", iters()).unwrap();
        assert!(record.check("00123456789"));
        assert!(!record.check("0012345678"));
        assert!(!record.check(""));
        assert!(!format!("{:?}", record).contains("00123456789"));
    }

    #[test]
    fn data_key_opens_with_master_password_only() {
        let entropy = SystemEntropy::new();
        let record = MasterKeyRecord::derive(&entropy, "00123456789", iters()).unwrap();
        let key = record.open_data_key("00123456789").unwrap();
        assert_eq!(key, record.open_data_key("00123456789").unwrap());
        assert!(record.open_data_key("wrong").is_err());
    }

    #[test]
    fn tampered_record_never_verifies() {
        let mut record =
            MasterKeyRecord::derive(&SystemEntropy::new(), "00123456789", iters()).unwrap();
        record.iterations = 0;
        assert!(!record.check("00123456789"));
        record.iterations = 1_000;
        record.algorithm = "md5".to_string();
        assert!(!record.check("00123456789"));
    }

    #[test]
    fn verification_hash_is_checkable() {
        let record = MasterKeyRecord::derive(&SystemEntropy::new(), "00123456789", iters()).unwrap();
        let hash = record.verification_hash();
        assert!(crypto::check_password_hash("00123456789", &hash));
    }

    #[tokio::test]
    async fn staged_record_answers_checks() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, Arc::new(SystemEntropy::new()));

        assert!(!svc.check_master_password("00123456789").await);
        svc.derive_and_store("00123456789").await.unwrap();
        assert!(svc.check_master_password("00123456789").await);
        assert!(!svc.check_master_password("nope").await);

        svc.discard().await;
        assert!(!svc.check_master_password("00123456789").await);
    }

    #[tokio::test]
    async fn broken_entropy_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, Arc::new(BrokenEntropy));

        let err = svc.derive_and_store("00123456789").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CryptoEnvironmentBroken);
        assert!(!svc.check_master_password("00123456789").await);
    }
}
