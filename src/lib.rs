pub mod audit;
pub mod audited;
pub mod spin;
pub mod thread_token;

pub use audit::{AuditError, AuditErrorKind, Auditor, AuditorConfig, LockId, LockKind, SourcePosition};
pub use audited::{AuditedMutex, AuditedReentrantMutex, AuditedReentrantRwLock, AuditedRwLock};
