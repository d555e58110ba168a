use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{require_subject_id, LedgerError, LedgerStore};

/// Subject entity stored under its own identifier.
///
/// `record_keys` holds every record key ever appended, in append order. It is
/// only ever pushed to.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Subject {
    pub id: String,
    #[serde(default)]
    pub profile: Value,
    pub record_keys: Vec<String>,
}

impl Subject {
    #[must_use]
    pub fn new(id: impl Into<String>, profile: Value) -> Self {
        Self { id: id.into(), profile, record_keys: Vec::new() }
    }

    /// Interpret registration bytes as a profile.
    ///
    /// JSON input is kept structurally; any other text is kept verbatim as a
    /// JSON string so nothing the caller supplied is dropped.
    #[must_use]
    pub fn profile_from_bytes(bytes: &[u8]) -> Value {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Value::Null;
        }
        serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
    }

    /// Decode a stored subject, checking that it belongs to `subject_id`.
    ///
    /// # Errors
    /// Returns [`LedgerError::CorruptSubject`] when the bytes are not a subject
    /// document or name a different subject.
    pub fn from_bytes(subject_id: &str, bytes: &[u8]) -> Result<Self, LedgerError> {
        let subject: Self =
            serde_json::from_slice(bytes).map_err(|err| LedgerError::CorruptSubject {
                subject_id: subject_id.to_string(),
                reason: err.to_string(),
            })?;
        if subject.id != subject_id {
            return Err(LedgerError::CorruptSubject {
                subject_id: subject_id.to_string(),
                reason: format!("stored document belongs to subject `{}`", subject.id),
            });
        }
        Ok(subject)
    }

    /// Encode the subject for storage under its own identifier.
    ///
    /// # Errors
    /// Returns [`LedgerError::CorruptSubject`] when JSON encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        serde_json::to_vec(self).map_err(|err| LedgerError::CorruptSubject {
            subject_id: self.id.clone(),
            reason: format!("failed to encode subject: {err}"),
        })
    }
}

/// Register a new subject with an empty history.
///
/// # Errors
/// Returns [`LedgerError::InvalidArgument`] for an empty identifier,
/// [`LedgerError::SubjectAlreadyExists`] when anything is already stored under
/// `subject_id`, and [`LedgerError::StoreUnavailable`] on backend failure.
pub fn register_subject<S>(
    store: &mut S,
    subject_id: &str,
    profile: &[u8],
) -> Result<Subject, LedgerError>
where
    S: LedgerStore + ?Sized,
{
    require_subject_id(subject_id)?;

    if store.get(subject_id)?.is_some() {
        return Err(LedgerError::SubjectAlreadyExists(subject_id.to_string()));
    }

    let subject = Subject::new(subject_id, Subject::profile_from_bytes(profile));
    store.put(subject_id, &subject.to_bytes()?)?;
    tracing::info!(subject_id, "registered subject");
    Ok(subject)
}

/// Load and decode the subject stored under `subject_id`.
///
/// # Errors
/// Returns [`LedgerError::SubjectNotFound`] when nothing is stored,
/// [`LedgerError::CorruptSubject`] when the stored bytes do not decode, and
/// [`LedgerError::StoreUnavailable`] on backend failure.
pub fn load_subject<S>(store: &S, subject_id: &str) -> Result<Subject, LedgerError>
where
    S: LedgerStore + ?Sized,
{
    require_subject_id(subject_id)?;

    let Some(bytes) = store.get(subject_id)? else {
        return Err(LedgerError::SubjectNotFound(subject_id.to_string()));
    };
    tracing::debug!(subject_id, bytes = bytes.len(), "loaded subject document");

    Subject::from_bytes(subject_id, &bytes).inspect_err(|err| {
        tracing::warn!(subject_id, error = %err, "stored subject failed to decode");
    })
}
