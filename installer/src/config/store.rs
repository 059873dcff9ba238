// Durable config store.
//
// Writes are atomic from a reader's point of view: the document is written to a
// sibling temp file, synced, then renamed over the target. A reader sees either the
// previous document or the complete new one.

use log::{debug, info, warn};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use uuid::Uuid;

use crate::config::{ConfigData, ConfigDocument};
use crate::error::InstallError;
use crate::security::master_key::MasterKeyRecord;

#[derive(Debug)]
pub struct ConfigPersister {
    path: PathBuf,
    lock: RwLock<()>,
}

/// Exclusive hold on the config store. Released when dropped.
pub struct ConfigWriteGuard<'a> {
    store: &'a ConfigPersister,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl ConfigPersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn lock(&self) -> ConfigWriteGuard<'_> {
        ConfigWriteGuard {
            store: self,
            _guard: self.lock.write().await,
        }
    }

    pub async fn write(
        &self,
        config: &ConfigData,
        master_key: &MasterKeyRecord,
    ) -> Result<(), InstallError> {
        self.lock().await.write(config, master_key).await
    }

    pub async fn remove(&self) -> Result<(), InstallError> {
        self.lock().await.remove().await
    }

    pub async fn exists(&self) -> bool {
        let _guard = self.lock.read().await;
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Read the full document. `None` when nothing has been persisted.
    pub async fn read(&self) -> Result<Option<ConfigDocument>, InstallError> {
        let _guard = self.lock.read().await;
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(InstallError::io(&self.path, e)),
        };

        let doc: ConfigDocument = toml::from_str(&raw).map_err(|e| {
            InstallError::io(
                &self.path,
                std::io::Error::new(IoErrorKind::InvalidData, e.to_string()),
            )
        })?;
        Ok(Some(doc))
    }

    pub async fn read_config(&self) -> Result<Option<ConfigData>, InstallError> {
        Ok(self.read().await?.map(|doc| doc.config))
    }
}

impl ConfigWriteGuard<'_> {
    pub async fn write(
        &self,
        config: &ConfigData,
        master_key: &MasterKeyRecord,
    ) -> Result<(), InstallError> {
        let started = Instant::now();
        let path = &self.store.path;

        let doc = ConfigDocument {
            config: config.clone(),
            master_key: master_key.clone(),
        };
        let body = toml::to_string_pretty(&doc).map_err(|e| {
            InstallError::io(
                path,
                std::io::Error::new(IoErrorKind::InvalidData, e.to_string()),
            )
        })?;

        let retry_strategy = ExponentialBackoff::from_millis(50)
            .factor(2)
            .max_delay(std::time::Duration::from_millis(750))
            .take(3)
            .map(jitter);

        RetryIf::spawn(
            retry_strategy,
            || write_atomic(path, body.as_bytes()),
            |e: &std::io::Error| is_transient_io_error(e),
        )
        .await
        .map_err(|e| InstallError::io(path, e))?;

        info!(
            "[PHASE: install] [STEP: persist_config] config written (path={:?}, bytes={}, duration_ms={})",
            path,
            body.len(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Delete the store. Missing file is not an error.
    pub async fn remove(&self) -> Result<(), InstallError> {
        let path = &self.store.path;
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!("[PHASE: config] [STEP: remove] config removed (path={:?})", path);
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(InstallError::io(path, e)),
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let result = async {
        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        opts.mode(0o600);
        let mut file = opts.open(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = &result {
        debug!(
            "[PHASE: install] [STEP: persist_config] atomic write failed, removing temp file (tmp={:?}, error={})",
            tmp, e
        );
        if let Err(rm) = tokio::fs::remove_file(&tmp).await {
            if rm.kind() != IoErrorKind::NotFound {
                warn!(
                    "[PHASE: install] [STEP: persist_config] unable to remove temp file {:?}: {}",
                    tmp, rm
                );
            }
        }
    }
    result
}

fn is_transient_io_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        IoErrorKind::Interrupted | IoErrorKind::WouldBlock | IoErrorKind::TimedOut
    ) || {
        let msg = err.to_string().to_ascii_lowercase();
        msg.contains("used by another process")
            || msg.contains("sharing violation")
            || msg.contains("resource busy")
    }
}
