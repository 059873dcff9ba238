// Installation progress (in-memory)
//
// NOTE: This is NOT persisted; phases are reported to an optional observer while a run
// is in flight.

use serde::Serialize;
use std::sync::Arc;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum InstallPhase {
    Idle,
    ValidatingInput,
    Authenticating,
    Provisioning,
    DerivingKey,
    PersistingConfig,
    Done,
    /// Terminal. Cleanup has run and no config file is left behind.
    Failed { code: u32, kind: ErrorKind },
}

impl InstallPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }

    /// Label used in `[STEP: ...]` log tags.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ValidatingInput => "validate",
            Self::Authenticating => "authenticate",
            Self::Provisioning => "provision",
            Self::DerivingKey => "derive_key",
            Self::PersistingConfig => "persist_config",
            Self::Done => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Observer for phase transitions.
pub type ProgressEmitter = Arc<dyn Fn(InstallPhase) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_done_and_failed_are_terminal() {
        assert!(InstallPhase::Done.is_terminal());
        assert!(InstallPhase::Failed {
            code: 2002,
            kind: ErrorKind::InvalidHost
        }
        .is_terminal());
        assert!(!InstallPhase::Provisioning.is_terminal());
        assert!(!InstallPhase::Idle.is_terminal());
    }

    #[test]
    fn failed_phase_serializes_code_and_kind() {
        let json = serde_json::to_value(InstallPhase::Failed {
            code: 1045,
            kind: ErrorKind::AuthFailed,
        })
        .unwrap();
        assert_eq!(json["phase"], "failed");
        assert_eq!(json["code"], 1045);
        assert_eq!(json["kind"], "authFailed");
    }
}
