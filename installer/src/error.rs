// Installer error taxonomy
//
// Every failure surfaced by `Installer::run` is one of these variants. The numeric
// code is part of the public contract: callers (setup UI, tests) assert on it.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::database::connection::DbError;
use crate::security::crypto::CryptoError;

/// Code reported when the database host is rejected or cannot be reached
/// (MySQL client error `CR_CONNECTION_ERROR`).
pub const CODE_HOST: u32 = 2002;
/// MySQL `ER_ACCESS_DENIED_ERROR`.
pub const CODE_ACCESS_DENIED: u32 = 1045;
/// MySQL `ER_BAD_DB_ERROR`.
pub const CODE_UNKNOWN_DATABASE: u32 = 1049;
/// MySQL `ER_DB_CREATE_EXISTS`.
pub const CODE_DATABASE_EXISTS: u32 = 1007;
/// MySQL `ER_CANNOT_USER` (raised by CREATE USER on an existing account).
pub const CODE_USER_EXISTS: u32 = 1396;
/// MySQL `ER_DBACCESS_DENIED_ERROR`.
pub const CODE_DB_ACCESS_DENIED: u32 = 1044;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidArgument,
    InvalidHost,
    HostUnreachable,
    AuthFailed,
    AlreadyExists,
    DatabaseMissing,
    PermissionDenied,
    Database,
    CryptoEnvironmentBroken,
    Io,
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{field} is required")]
    MissingParameter { field: &'static str },

    #[error("invalid {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("invalid database host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("unable to connect to database host '{host}': {details}")]
    HostUnreachable { host: String, details: String },

    #[error("database rejected the admin credentials (code {native_code}): {message}")]
    AuthFailed { native_code: u32, message: String },

    #[error("{object} already exists")]
    AlreadyExists { object: String, native_code: u32 },

    #[error("database '{name}' does not exist")]
    DatabaseMissing { name: String },

    #[error("permission denied while trying to {action} (code {native_code}): {message}")]
    PermissionDenied {
        action: String,
        native_code: u32,
        message: String,
    },

    #[error("database error while trying to {action} (code {native_code}): {message}")]
    Database {
        action: String,
        native_code: u32,
        message: String,
    },

    #[error("cryptographic environment is broken: {0}")]
    CryptoEnvironmentBroken(String),

    #[error("config store failure at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl InstallError {
    /// Stable numeric code. Engine-originated failures pass the native code through.
    pub fn code(&self) -> u32 {
        match self {
            Self::MissingParameter { .. } | Self::InvalidParameter { .. } => 0,
            Self::InvalidHost { .. } | Self::HostUnreachable { .. } => CODE_HOST,
            Self::AuthFailed { native_code, .. }
            | Self::AlreadyExists { native_code, .. }
            | Self::PermissionDenied { native_code, .. }
            | Self::Database { native_code, .. } => *native_code,
            Self::DatabaseMissing { .. } => CODE_UNKNOWN_DATABASE,
            Self::CryptoEnvironmentBroken(_) | Self::Io { .. } => 0,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingParameter { .. } | Self::InvalidParameter { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::InvalidHost { .. } => ErrorKind::InvalidHost,
            Self::HostUnreachable { .. } => ErrorKind::HostUnreachable,
            Self::AuthFailed { .. } => ErrorKind::AuthFailed,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::DatabaseMissing { .. } => ErrorKind::DatabaseMissing,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Database { .. } => ErrorKind::Database,
            Self::CryptoEnvironmentBroken(_) => ErrorKind::CryptoEnvironmentBroken,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Map an engine error raised while performing `action` (e.g. "create database").
    ///
    /// Connection-level failures are handled by the provisioner before this is reached;
    /// an `Unreachable` error here means the session dropped mid-run.
    pub(crate) fn from_db(action: &str, host: &str, err: DbError) -> Self {
        match err {
            DbError::Unreachable(details) => Self::HostUnreachable {
                host: host.to_string(),
                details,
            },
            DbError::Engine { code, message } => match code {
                CODE_ACCESS_DENIED | 1698 => Self::AuthFailed {
                    native_code: code,
                    message,
                },
                CODE_DB_ACCESS_DENIED | 1142 | 1227 | 1410 => Self::PermissionDenied {
                    action: action.to_string(),
                    native_code: code,
                    message,
                },
                CODE_DATABASE_EXISTS | CODE_USER_EXISTS => Self::AlreadyExists {
                    object: message,
                    native_code: code,
                },
                CODE_UNKNOWN_DATABASE => Self::DatabaseMissing { name: message },
                _ => Self::Database {
                    action: action.to_string(),
                    native_code: code,
                    message,
                },
            },
        }
    }
}

impl From<CryptoError> for InstallError {
    fn from(err: CryptoError) -> Self {
        Self::CryptoEnvironmentBroken(err.to_string())
    }
}
