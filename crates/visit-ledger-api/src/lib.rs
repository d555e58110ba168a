use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use visit_ledger_core::{
    append_record, load_history, load_subject, register_subject, Clock, CommandOutput,
    HistoryEntry, LedgerCommand, LedgerError, Subject, SystemClock,
};
use visit_ledger_store_sqlite::{IntegrityReport, SchemaStatus, SqliteStore};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterSubjectRequest {
    pub subject_id: String,
    #[serde(default)]
    pub profile: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppendRecordRequest {
    pub subject_id: String,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppendRecordResult {
    pub subject_id: String,
    pub record_key: String,
    pub record_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryResult {
    pub subject_id: String,
    pub record_count: usize,
    pub entries: Vec<HistoryEntry>,
    pub report: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvokeRequest {
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Facade over the SQLite-backed ledger. Each call opens the database,
/// applies pending migrations, and runs one logical operation.
///
/// Operations that read and rewrite a subject document run under the store's
/// write lock, so any number of facades (or processes) may share one file.
#[derive(Clone)]
pub struct VisitLedgerApi {
    db_path: PathBuf,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl Debug for VisitLedgerApi {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisitLedgerApi").field("db_path", &self.db_path).finish_non_exhaustive()
    }
}

impl VisitLedgerApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self::with_clock(db_path, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(db_path: PathBuf, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { db_path, clock }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Register a subject with an empty history.
    ///
    /// # Errors
    /// Returns an error wrapping [`visit_ledger_core::LedgerError`] when the
    /// identifier is empty or already registered, or when persistence fails.
    pub fn register_subject(&self, input: RegisterSubjectRequest) -> Result<Subject> {
        let profile = serde_json::to_vec(&input.profile).context("failed to encode profile")?;
        let mut store = self.open_migrated_store()?;
        store.exclusive_write(|store| register_subject(store, &input.subject_id, &profile))
    }

    /// Append one record to a registered subject.
    ///
    /// # Errors
    /// Returns an error wrapping [`visit_ledger_core::LedgerError`] when the
    /// subject is missing or corrupt, or when persistence fails.
    pub fn append_record(&self, input: AppendRecordRequest) -> Result<AppendRecordResult> {
        let mut store = self.open_migrated_store()?;
        let (record_key, record_count) = store.exclusive_write(|store| {
            let record_key = append_record(
                store,
                self.clock.as_ref(),
                &input.subject_id,
                input.payload.as_bytes(),
            )?;
            let record_count = load_subject(&*store, &input.subject_id)?.record_keys.len();
            Ok::<_, LedgerError>((record_key, record_count))
        })?;
        Ok(AppendRecordResult { subject_id: input.subject_id, record_key, record_count })
    }

    /// Reconstruct a subject's full history, structured and rendered.
    ///
    /// # Errors
    /// Returns an error wrapping [`visit_ledger_core::LedgerError`] when the
    /// subject is missing or corrupt or any listed record does not resolve.
    pub fn history(&self, subject_id: &str) -> Result<HistoryResult> {
        let store = self.open_migrated_store()?;
        let report = load_history(&store, subject_id)?;
        let rendered = report.render();
        Ok(HistoryResult {
            subject_id: report.subject_id,
            record_count: report.entries.len(),
            entries: report.entries,
            report: rendered,
        })
    }

    /// Load a subject's profile and record keys without fetching records.
    ///
    /// # Errors
    /// Returns an error wrapping [`visit_ledger_core::LedgerError`] when the
    /// subject is missing or corrupt.
    pub fn show_subject(&self, subject_id: &str) -> Result<Subject> {
        let store = self.open_migrated_store()?;
        Ok(load_subject(&store, subject_id)?)
    }

    /// Route a raw function invocation through the command dispatcher.
    ///
    /// # Errors
    /// Returns an error wrapping [`visit_ledger_core::LedgerError`] for unknown
    /// functions, bad arity, or any failure of the routed operation.
    pub fn invoke(&self, input: &InvokeRequest) -> Result<CommandOutput> {
        let command = LedgerCommand::parse(&input.function, &input.args)?;
        let mut store = self.open_migrated_store()?;
        tracing::debug!(function = %input.function, "invoking routed command");
        store.exclusive_write(|store| command.execute(store, self.clock.as_ref()))
    }

    /// Run the store's integrity probes.
    ///
    /// # Errors
    /// Returns an error when any probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = self.open_migrated_store()?;
        store.integrity_check()
    }
}
