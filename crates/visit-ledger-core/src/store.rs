use std::collections::BTreeMap;

/// Failure reported by a ledger backend. The message is surfaced to callers
/// unchanged as [`crate::LedgerError::StoreUnavailable`].
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("{0}")]
pub struct StoreError(pub String);

impl StoreError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Single-key get/put capability of the underlying ledger.
///
/// Implementations are expected to be linearizable per key. Nothing here
/// assumes transactions spanning more than one `put`.
pub trait LedgerStore {
    /// Fetch the value stored under `key`, or `None` when the key was never written.
    ///
    /// # Errors
    /// Returns [`StoreError`] on transport or backend failure.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns [`StoreError`] on transport, validation, or backend failure.
    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

impl<S: LedgerStore + ?Sized> LedgerStore for &mut S {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).put(key, value)
    }
}

/// In-process ledger used by tests and embedding hosts that bring their own durability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryLedger {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl LedgerStore for MemoryLedger {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_ledger_put_replaces_previous_value() -> Result<(), StoreError> {
        let mut ledger = MemoryLedger::new();
        ledger.put("k", b"first")?;
        ledger.put("k", b"second")?;

        assert_eq!(ledger.get("k")?, Some(b"second".to_vec()));
        assert_eq!(ledger.len(), 1);
        Ok(())
    }

    #[test]
    fn memory_ledger_reports_missing_keys_as_none() -> Result<(), StoreError> {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.get("absent")?, None);
        assert!(ledger.is_empty());
        Ok(())
    }
}
