use strum_macros::Display;

use super::{ConflictReport, LockId, SourcePosition};

/// Why a check refused a lock or unlock.
///
/// Nothing is retried internally. Backing off, retrying or aborting is up to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuditError {
    /// the lock was first used with another kind family or reentrancy
    #[error("check kind doesn't match the first use of {lock} ({at})")]
    ContractMismatch { lock: LockId, at: SourcePosition },

    /// the calling thread would wait on itself
    #[error("self-deadlock: {0}")]
    SelfDeadlock(Box<ConflictReport>),

    /// lock order inverted against another thread
    #[error("lock order conflict: {0}")]
    OrderingConflict(Box<ConflictReport>),

    #[error("unlock of {lock} which this thread doesn't hold ({at})")]
    InvalidUnlock { lock: LockId, at: SourcePosition },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AuditErrorKind {
    ContractMismatch,
    SelfDeadlock,
    OrderingConflict,
    InvalidUnlock,
}

impl AuditError {
    pub fn kind(&self) -> AuditErrorKind {
        match self {
            AuditError::ContractMismatch { .. } => AuditErrorKind::ContractMismatch,
            AuditError::SelfDeadlock(_) => AuditErrorKind::SelfDeadlock,
            AuditError::OrderingConflict(_) => AuditErrorKind::OrderingConflict,
            AuditError::InvalidUnlock { .. } => AuditErrorKind::InvalidUnlock,
        }
    }

    pub fn lock(&self) -> LockId {
        match self {
            AuditError::ContractMismatch { lock, .. } | AuditError::InvalidUnlock { lock, .. } => *lock,
            AuditError::SelfDeadlock(report) | AuditError::OrderingConflict(report) => report.lock,
        }
    }

    pub fn report(&self) -> Option<&ConflictReport> {
        match self {
            AuditError::SelfDeadlock(report) | AuditError::OrderingConflict(report) => Some(&**report),
            _ => None,
        }
    }
}
