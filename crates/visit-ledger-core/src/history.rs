use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{extract_timestamp_suffix, load_subject, LedgerError, LedgerStore};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct HistoryEntry {
    pub record_key: String,
    pub timestamp: String,
    pub payload: String,
}

/// Every record of one subject, in append order.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct HistoryReport {
    pub subject_id: String,
    pub entries: Vec<HistoryEntry>,
}

impl HistoryReport {
    /// Render one `<timestamp>: <payload>` line per entry.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl Display for HistoryReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, entry) in self.entries.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", entry.timestamp, entry.payload)?;
        }
        Ok(())
    }
}

/// Fetch every record listed by the subject, in stored order.
///
/// Either every listed key resolves and the full report is returned, or the
/// call fails; no partial report is produced.
///
/// # Errors
/// Returns [`LedgerError::SubjectNotFound`] or [`LedgerError::CorruptSubject`]
/// from loading the subject, [`LedgerError::CorruptSubject`] when a listed key
/// carries no timestamp suffix, [`LedgerError::RecordNotFound`] for the first
/// listed key that does not resolve, and [`LedgerError::StoreUnavailable`] on
/// backend failure.
pub fn load_history<S>(store: &S, subject_id: &str) -> Result<HistoryReport, LedgerError>
where
    S: LedgerStore + ?Sized,
{
    let subject = load_subject(store, subject_id)?;

    let mut entries = Vec::with_capacity(subject.record_keys.len());
    for record_key in subject.record_keys {
        let timestamp = extract_timestamp_suffix(&record_key)
            .map_err(|err| LedgerError::CorruptSubject {
                subject_id: subject_id.to_string(),
                reason: err.to_string(),
            })?
            .to_string();

        let Some(payload) = store.get(&record_key)? else {
            tracing::warn!(subject_id, record_key = %record_key, "listed record does not resolve");
            return Err(LedgerError::RecordNotFound(record_key));
        };

        entries.push(HistoryEntry {
            record_key,
            timestamp,
            payload: String::from_utf8_lossy(&payload).into_owned(),
        });
    }

    tracing::debug!(subject_id, records = entries.len(), "reconstructed history");
    Ok(HistoryReport { subject_id: subject.id, entries })
}

/// Reconstruct the subject's history as a newline-separated text report.
///
/// # Errors
/// Fails exactly when [`load_history`] fails.
pub fn reconstruct_history<S>(store: &S, subject_id: &str) -> Result<String, LedgerError>
where
    S: LedgerStore + ?Sized,
{
    load_history(store, subject_id).map(|report| report.render())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{append_record, register_subject, FixedClock, MemoryLedger, Subject};
    use proptest::prelude::*;
    use serde_json::Value;
    use time::macros::datetime;
    use time::Duration;

    fn registered(subject_id: &str) -> Result<MemoryLedger, LedgerError> {
        let mut ledger = MemoryLedger::new();
        register_subject(&mut ledger, subject_id, br#"{"name":"Li Lei"}"#)?;
        Ok(ledger)
    }

    #[test]
    fn two_visits_reconstruct_in_append_order() -> Result<(), LedgerError> {
        let mut ledger = registered("p1")?;
        append_record(
            &mut ledger,
            &FixedClock(datetime!(2026-10-16 09:30 UTC)),
            "p1",
            b"flu, mild",
        )?;
        append_record(
            &mut ledger,
            &FixedClock(datetime!(2026-10-23 14:05 UTC)),
            "p1",
            b"flu, resolved",
        )?;

        let report = reconstruct_history(&ledger, "p1")?;
        assert_eq!(report, "202610160930: flu, mild\n202610231405: flu, resolved");
        Ok(())
    }

    #[test]
    fn empty_history_renders_empty_report() -> Result<(), LedgerError> {
        let ledger = registered("p1")?;
        let report = load_history(&ledger, "p1")?;
        assert!(report.entries.is_empty());
        assert_eq!(report.render(), "");
        Ok(())
    }

    #[test]
    fn unregistered_subject_has_no_history() {
        let ledger = MemoryLedger::new();
        assert_eq!(
            reconstruct_history(&ledger, "ghost"),
            Err(LedgerError::SubjectNotFound("ghost".to_string()))
        );
    }

    #[test]
    fn dangling_key_fails_whole_reconstruction() -> Result<(), LedgerError> {
        let mut ledger = registered("p1")?;
        append_record(
            &mut ledger,
            &FixedClock(datetime!(2026-10-16 09:30 UTC)),
            "p1",
            b"flu, mild",
        )?;

        let mut subject = load_subject(&ledger, "p1")?;
        subject.record_keys.push("p1202610170800".to_string());
        ledger.put("p1", &subject.to_bytes()?)?;

        assert_eq!(
            reconstruct_history(&ledger, "p1"),
            Err(LedgerError::RecordNotFound("p1202610170800".to_string()))
        );
        Ok(())
    }

    #[test]
    fn listed_key_without_timestamp_is_corrupt() -> Result<(), LedgerError> {
        let mut ledger = MemoryLedger::new();
        let mut subject = Subject::new("p1", Value::Null);
        subject.record_keys.push("p1".to_string());
        ledger.put("p1", &subject.to_bytes()?)?;

        assert!(matches!(
            load_history(&ledger, "p1"),
            Err(LedgerError::CorruptSubject { .. })
        ));
        Ok(())
    }

    // Same-minute appends share one key. The second payload overwrites the
    // first while the key is still listed twice, so both entries show the
    // newer payload.
    #[test]
    fn same_minute_appends_collide_and_double_count() -> Result<(), LedgerError> {
        let mut ledger = registered("p1")?;
        append_record(
            &mut ledger,
            &FixedClock(datetime!(2026-10-16 09:30:05 UTC)),
            "p1",
            b"flu, mild",
        )?;
        append_record(
            &mut ledger,
            &FixedClock(datetime!(2026-10-16 09:30:40 UTC)),
            "p1",
            b"flu, resolved",
        )?;

        let subject = load_subject(&ledger, "p1")?;
        assert_eq!(
            subject.record_keys,
            vec!["p1202610160930".to_string(), "p1202610160930".to_string()]
        );

        let report = load_history(&ledger, "p1")?;
        assert_eq!(report.entries.len(), 2);
        assert!(report.entries.iter().all(|entry| entry.payload == "flu, resolved"));
        Ok(())
    }

    #[test]
    fn non_utf8_payload_is_rendered_lossily() -> Result<(), LedgerError> {
        let mut ledger = registered("p1")?;
        append_record(
            &mut ledger,
            &FixedClock(datetime!(2026-10-16 09:30 UTC)),
            "p1",
            &[0x66, 0x6c, 0x75, 0xff],
        )?;

        let report = load_history(&ledger, "p1")?;
        assert_eq!(report.entries[0].payload, "flu\u{fffd}");
        Ok(())
    }

    proptest! {
        #[test]
        fn history_preserves_every_append_in_order(
            payloads in proptest::collection::vec("[a-z ,]{1,24}", 0..24)
        ) {
            let mut ledger = match registered("p1") {
                Ok(ledger) => ledger,
                Err(err) => panic!("registration should succeed: {err}"),
            };
            let start = datetime!(2026-10-16 00:00 UTC);
            for (minute, payload) in (0_i64..).zip(&payloads) {
                let clock = FixedClock(start + Duration::minutes(minute));
                if let Err(err) = append_record(&mut ledger, &clock, "p1", payload.as_bytes()) {
                    panic!("append should succeed: {err}");
                }
            }

            let report = match load_history(&ledger, "p1") {
                Ok(report) => report,
                Err(err) => panic!("history should load: {err}"),
            };
            let replayed: Vec<&str> =
                report.entries.iter().map(|entry| entry.payload.as_str()).collect();
            let appended: Vec<&str> = payloads.iter().map(String::as_str).collect();
            prop_assert_eq!(replayed, appended);

            if let Some(last) = payloads.last() {
                let rendered = report.render();
                let expected_suffix = format!(": {last}");
                prop_assert!(rendered.ends_with(&expected_suffix));
            }
        }
    }
}
