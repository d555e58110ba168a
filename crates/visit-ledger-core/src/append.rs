use crate::{load_subject, make_record_key, Clock, LedgerError, LedgerStore, Subject};

/// Append one record to a registered subject's history and return its key.
///
/// The updated subject is written before the record payload. If the payload
/// write fails, the subject lists a key that does not resolve and a later
/// [`crate::reconstruct_history`] fails with [`LedgerError::RecordNotFound`]
/// rather than silently omitting the record.
///
/// A second append to the same subject within the same UTC minute reuses the
/// key: the payload is overwritten and the key is listed twice. Record keys
/// share one namespace with subject ids, so a subject registered as
/// `p1202610160930` loses its document to an append to `p1` in that minute.
///
/// # Errors
/// Returns [`LedgerError::SubjectNotFound`] before anything is written when the
/// subject is not registered, [`LedgerError::CorruptSubject`] when the stored
/// subject does not decode, and [`LedgerError::StoreUnavailable`] on backend
/// failure.
pub fn append_record<S, C>(
    store: &mut S,
    clock: &C,
    subject_id: &str,
    payload: &[u8],
) -> Result<String, LedgerError>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    let record_key = make_record_key(subject_id, clock.now())
        .map_err(|err| LedgerError::InvalidArgument(err.to_string()))?;

    let mut subject = load_subject(&*store, subject_id)?;
    if subject.record_keys.contains(&record_key) {
        tracing::warn!(subject_id, record_key = %record_key, "record key collides with an earlier append");
    }
    subject.record_keys.push(record_key.clone());

    let shadows_subject = store
        .get(&record_key)?
        .is_some_and(|existing| Subject::from_bytes(&record_key, &existing).is_ok());
    if shadows_subject {
        tracing::warn!(
            subject_id,
            record_key = %record_key,
            "record key overwrites the document of a registered subject"
        );
    }

    store.put(subject_id, &subject.to_bytes()?)?;
    store.put(&record_key, payload).inspect_err(|err| {
        tracing::warn!(subject_id, record_key = %record_key, error = %err, "record write failed after subject update");
    })?;

    tracing::info!(
        subject_id,
        record_key = %record_key,
        records = subject.record_keys.len(),
        "appended record"
    );
    Ok(record_key)
}
