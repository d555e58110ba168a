//! Append-only per-subject record index over a plain get/put ledger.
//!
//! A subject is stored under its own identifier and carries the ordered list
//! of record keys appended to it. Each record lives under a composite key made
//! of the subject identifier and a fixed-width minute timestamp, so the
//! history can be replayed without any range scan on the underlying store.

mod append;
mod clock;
mod dispatch;
mod history;
mod key_codec;
mod store;
mod subject;

pub use append::append_record;
pub use clock::{Clock, FixedClock, SystemClock};
pub use dispatch::{CommandOutput, LedgerCommand};
pub use history::{load_history, reconstruct_history, HistoryEntry, HistoryReport};
pub use key_codec::{
    extract_timestamp_suffix, make_record_key, KeyCodecError, RECORD_KEY_TIMESTAMP_WIDTH,
};
pub use store::{LedgerStore, MemoryLedger, StoreError};
pub use subject::{load_subject, register_subject, Subject};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("subject not found: {0}")]
    SubjectNotFound(String),
    #[error("subject already registered: {0}")]
    SubjectAlreadyExists(String),
    #[error("record not found: {0}")]
    RecordNotFound(String),
    #[error("corrupt subject {subject_id}: {reason}")]
    CorruptSubject { subject_id: String, reason: String },
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl LedgerError {
    /// Stable snake-case tag for machine-readable error envelopes.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::SubjectNotFound(_) => "subject_not_found",
            Self::SubjectAlreadyExists(_) => "subject_already_exists",
            Self::RecordNotFound(_) => "record_not_found",
            Self::CorruptSubject { .. } => "corrupt_subject",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

pub(crate) fn require_subject_id(subject_id: &str) -> Result<(), LedgerError> {
    if subject_id.trim().is_empty() {
        return Err(LedgerError::InvalidArgument("subject id MUST be non-empty".to_string()));
    }
    Ok(())
}
