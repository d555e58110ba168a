use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use visit_ledger_core::{LedgerStore, StoreError, Subject};

const LATEST_SCHEMA_VERSION: i64 = 1;
const SNAPSHOT_UNITS_FILE: &str = "ledger_units.ndjson";
const MANIFEST_FILE: &str = "manifest.json";

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS ledger_state (
  state_key TEXT PRIMARY KEY CHECK (length(state_key) > 0),
  state_value BLOB NOT NULL,
  value_sha256 TEXT NOT NULL,
  first_written_at TEXT NOT NULL,
  last_written_at TEXT NOT NULL,
  write_count INTEGER NOT NULL CHECK (write_count >= 1)
);

CREATE TABLE IF NOT EXISTS ledger_writes (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  state_key TEXT NOT NULL,
  value_sha256 TEXT NOT NULL,
  written_at TEXT NOT NULL,
  FOREIGN KEY (state_key) REFERENCES ledger_state(state_key)
);

CREATE INDEX IF NOT EXISTS idx_ledger_writes_key ON ledger_writes(state_key);
";

/// Durable get/put ledger backed by a single `SQLite` database.
///
/// Every `put` upserts the current value and appends a row to the
/// `ledger_writes` journal in the same transaction.
pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

/// One exported ledger entry; the value travels hex-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateEntry {
    pub key: String,
    pub value_hex: String,
    pub value_sha256: String,
    pub first_written_at: String,
    pub last_written_at: String,
    pub write_count: i64,
}

/// A subject document followed by the records it lists, or one entry that no
/// subject lists. Snapshots are imported, skipped, and rejected unit by unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotUnit {
    pub subject_id: Option<String>,
    pub entries: Vec<StateEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportFileDigest {
    pub path: String,
    pub sha256: String,
    pub units: usize,
    pub entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub schema_version: i64,
    pub exported_at: String,
    pub files: Vec<ExportFileDigest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported_units: usize,
    pub imported_entries: usize,
    pub skipped_units: usize,
    pub skipped_entries: usize,
    pub skipped_subjects: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupSummary {
    pub backup_path: String,
    pub entries: usize,
    pub journal_writes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored_from: String,
    pub entries: usize,
    pub digest_mismatches: Vec<String>,
    pub schema_status: SchemaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub digest_mismatches: Vec<String>,
    pub entries: usize,
    pub journal_writes: usize,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed ledger and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA busy_timeout = 5000;
             PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to configure sqlite pragmas")?;

        tracing::debug!(path = %path.display(), "opened sqlite ledger");
        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails,
    /// or when the database was written by a newer schema.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            let tx = self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("failed to start migration v1 transaction")?;
            // Another connection may have migrated while this one waited for the lock.
            if current_schema_version(&tx)? < 1 {
                tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
                record_schema_version(&tx, 1)?;
                tracing::info!(version = 1, "applied ledger schema migration");
            }
            tx.commit().context("failed to commit migration v1")?;
        }

        Ok(())
    }

    /// Read the current value stored under `key`.
    ///
    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn read_state(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.conn
            .query_row(
                "SELECT state_value FROM ledger_state WHERE state_key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .with_context(|| format!("failed to read ledger state for key {key}"))
    }

    /// Upsert `value` under `key` and journal the write as one savepoint, so the
    /// pair also nests inside [`SqliteStore::exclusive_write`].
    ///
    /// # Errors
    /// Returns an error when the key is empty or any write in the transaction fails.
    pub fn write_state(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(anyhow!("ledger key MUST be non-empty"));
        }

        let digest = sha256_hex(value);
        let now = now_rfc3339()?;
        let tx = self.conn.savepoint().context("failed to start write savepoint")?;

        tx.execute(
            "INSERT INTO ledger_state(
                state_key, state_value, value_sha256, first_written_at, last_written_at, write_count
            ) VALUES (?1, ?2, ?3, ?4, ?4, 1)
            ON CONFLICT(state_key) DO UPDATE SET
                state_value = excluded.state_value,
                value_sha256 = excluded.value_sha256,
                last_written_at = excluded.last_written_at,
                write_count = ledger_state.write_count + 1",
            params![key, value, digest, now],
        )
        .with_context(|| format!("failed to upsert ledger state for key {key}"))?;

        tx.execute(
            "INSERT INTO ledger_writes(state_key, value_sha256, written_at) VALUES (?1, ?2, ?3)",
            params![key, digest, now],
        )
        .with_context(|| format!("failed to journal ledger write for key {key}"))?;

        tx.commit().context("failed to release write savepoint")?;
        tracing::debug!(key, bytes = value.len(), "wrote ledger state");
        Ok(())
    }

    /// Load every ledger entry, ordered by key.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read from `SQLite`.
    pub fn list_entries(&self) -> Result<Vec<StateEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT state_key, state_value, value_sha256, first_written_at, last_written_at, write_count
             FROM ledger_state
             ORDER BY state_key ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            let value: Vec<u8> = row.get(1)?;
            Ok(StateEntry {
                key: row.get(0)?,
                value_hex: hex::encode(value),
                value_sha256: row.get(2)?,
                first_written_at: row.get(3)?,
                last_written_at: row.get(4)?,
                write_count: row.get(5)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.context("failed to decode ledger_state row")?);
        }
        Ok(entries)
    }

    /// Number of writes recorded in the journal for `key`.
    ///
    /// # Errors
    /// Returns an error when the count query fails.
    pub fn journal_write_count(&self, key: &str) -> Result<usize> {
        let count = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM ledger_writes WHERE state_key = ?1",
                params![key],
                |row| row.get::<_, i64>(0),
            )
            .with_context(|| format!("failed to count journal writes for key {key}"))?;
        usize::try_from(count).context("journal write count is negative")
    }

    /// Run `op` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken before `op` reads anything, so concurrent
    /// read-modify-write sequences against the same database file (from this
    /// process or another) are applied one after the other. Everything `op`
    /// wrote is rolled back when it fails.
    ///
    /// # Errors
    /// Returns an error when the lock cannot be acquired within the busy
    /// timeout, when `op` fails (its error is preserved for downcasting), or
    /// when the commit fails.
    pub fn exclusive_write<T, E>(&mut self, op: impl FnOnce(&mut Self) -> Result<T, E>) -> Result<T>
    where
        E: Into<anyhow::Error>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE").context("failed to acquire ledger write lock")?;

        match op(self) {
            Ok(value) => {
                if let Err(err) = self.conn.execute_batch("COMMIT") {
                    self.rollback_quietly();
                    return Err(anyhow::Error::new(err).context("failed to commit ledger write"));
                }
                Ok(value)
            }
            Err(err) => {
                self.rollback_quietly();
                Err(err.into())
            }
        }
    }

    fn rollback_quietly(&self) {
        if self.conn.is_autocommit() {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            tracing::warn!(error = %err, "failed to roll back ledger write");
        }
    }

    /// Export the ledger as NDJSON snapshot units plus a digest manifest.
    ///
    /// Each subject is exported as one unit holding its document followed by
    /// every record it lists; entries no subject lists become single-entry
    /// units.
    ///
    /// # Errors
    /// Returns an error when export files cannot be created, written, or serialized.
    pub fn export_snapshot(&self, out_dir: &Path) -> Result<ExportManifest> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;

        let units = group_snapshot_units(self.list_entries()?)?;
        let digest = write_snapshot_units(&out_dir.join(SNAPSHOT_UNITS_FILE), &units)?;
        tracing::info!(
            out_dir = %out_dir.display(),
            units = digest.units,
            entries = digest.entries,
            "exported ledger snapshot"
        );

        let manifest = ExportManifest {
            schema_version: LATEST_SCHEMA_VERSION,
            exported_at: now_rfc3339()?,
            files: vec![digest],
        };

        let manifest_path = out_dir.join(MANIFEST_FILE);
        let manifest_json =
            serde_json::to_vec_pretty(&manifest).context("failed to serialize export manifest")?;
        fs::write(&manifest_path, manifest_json).with_context(|| {
            format!("failed to write manifest file {}", manifest_path.display())
        })?;
        Ok(manifest)
    }

    /// Import a snapshot produced by [`SqliteStore::export_snapshot`].
    ///
    /// The whole snapshot is verified before anything is written, and the
    /// writes happen in a single transaction. A unit touching any key that
    /// already exists is skipped as a whole with `skip_existing`, so a subject
    /// already present never gains records it does not list. Without
    /// `skip_existing` such a unit aborts the import and nothing is written.
    ///
    /// # Errors
    /// Returns an error when the manifest does not match the snapshot file, a
    /// value does not match its digest, a unit is malformed, or a unit
    /// conflicts with existing keys while `skip_existing` is disabled.
    pub fn import_snapshot(&mut self, in_dir: &Path, skip_existing: bool) -> Result<ImportSummary> {
        self.migrate()?;
        let manifest = read_export_manifest(in_dir)?;
        let expected = validate_import_manifest(&manifest)?;
        let units = read_snapshot_units(&in_dir.join(SNAPSHOT_UNITS_FILE), expected)?;

        let summary = self.exclusive_write(|store| {
            let mut summary = ImportSummary::default();
            for unit in &units {
                let mut conflicts = Vec::new();
                for entry in &unit.entries {
                    if store.read_state(&entry.key)?.is_some() {
                        conflicts.push(entry.key.as_str());
                    }
                }

                if !conflicts.is_empty() {
                    if !skip_existing {
                        return Err(anyhow!(
                            "snapshot unit {} conflicts with existing ledger keys: {}",
                            unit.label(),
                            conflicts.join(", ")
                        ));
                    }
                    tracing::debug!(unit = unit.label(), "skipping snapshot unit with existing keys");
                    summary.skipped_units += 1;
                    summary.skipped_entries += unit.entries.len();
                    summary.skipped_subjects.extend(unit.subject_id.clone());
                    continue;
                }

                for entry in &unit.entries {
                    store.write_state(&entry.key, &entry.decoded_value()?)?;
                }
                summary.imported_units += 1;
                summary.imported_entries += unit.entries.len();
            }
            Ok::<_, anyhow::Error>(summary)
        })?;

        tracing::info!(
            in_dir = %in_dir.display(),
            imported = summary.imported_entries,
            skipped = summary.skipped_entries,
            "imported ledger snapshot"
        );
        Ok(summary)
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created, the backup
    /// fails, or the ledger tables cannot be counted.
    pub fn backup_database(&self, out_file: &Path) -> Result<BackupSummary> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))?;

        let summary = BackupSummary {
            backup_path: out_file.display().to_string(),
            entries: self.count_rows("ledger_state")?,
            journal_writes: self.count_rows("ledger_writes")?,
        };
        tracing::info!(path = %out_file.display(), entries = summary.entries, "backed up ledger");
        Ok(summary)
    }

    /// Replace this database with a `SQLite` backup file, migrate it, and
    /// re-verify every stored value against its digest.
    ///
    /// # Errors
    /// Returns an error when the backup file is missing, the restore fails, the
    /// backup was written by a newer schema, or the integrity probes fail.
    pub fn restore_database(&mut self, in_file: &Path) -> Result<RestoreSummary> {
        if !in_file.exists() {
            return Err(anyhow!("backup file does not exist: {}", in_file.display()));
        }

        self.conn
            .restore(DatabaseName::Main, in_file, None::<fn(rusqlite::backup::Progress)>)
            .with_context(|| {
                format!("failed to restore sqlite backup from {}", in_file.display())
            })?;
        self.migrate()?;

        let report = self.integrity_check()?;
        tracing::info!(path = %in_file.display(), entries = report.entries, "restored ledger");
        Ok(RestoreSummary {
            restored_from: in_file.display().to_string(),
            entries: report.entries,
            digest_mismatches: report.digest_mismatches,
            schema_status: report.schema_status,
        })
    }

    fn count_rows(&self, table: &'static str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .with_context(|| format!("failed to count rows in {table}"))?;
        usize::try_from(count).with_context(|| format!("row count for {table} is negative"))
    }

    /// Run quick-check, foreign-key-check, value digest, and schema status probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        let (digest_mismatches, entries, journal_writes) = if schema_status.current_version >= 1 {
            let entries = self.list_entries()?;
            let mut mismatches = Vec::new();
            for entry in &entries {
                let value = hex::decode(&entry.value_hex)
                    .with_context(|| format!("invalid stored value for key {}", entry.key))?;
                if sha256_hex(&value) != entry.value_sha256 {
                    mismatches.push(entry.key.clone());
                }
            }
            (mismatches, entries.len(), self.count_rows("ledger_writes")?)
        } else {
            (Vec::new(), 0, 0)
        };

        if !digest_mismatches.is_empty() {
            tracing::warn!(count = digest_mismatches.len(), "ledger values do not match digests");
        }

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            digest_mismatches,
            entries,
            journal_writes,
            schema_status,
        })
    }
}

impl LedgerStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read_state(key).map_err(|err| StoreError::new(format!("{err:#}")))
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.write_state(key, value).map_err(|err| StoreError::new(format!("{err:#}")))
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl StateEntry {
    /// Decode the hex value and check it against the recorded digest.
    ///
    /// # Errors
    /// Returns an error when the value is not hex or its digest does not match.
    pub fn decoded_value(&self) -> Result<Vec<u8>> {
        let value = hex::decode(&self.value_hex)
            .with_context(|| format!("invalid hex value for key {}", self.key))?;
        if sha256_hex(&value) != self.value_sha256 {
            return Err(anyhow!("value digest mismatch for key {}", self.key));
        }
        Ok(value)
    }
}

impl SnapshotUnit {
    fn label(&self) -> &str {
        match (&self.subject_id, self.entries.first()) {
            (Some(subject_id), _) => subject_id,
            (None, Some(entry)) => &entry.key,
            (None, None) => "<empty>",
        }
    }

    fn validate(&self) -> Result<()> {
        let Some(first) = self.entries.first() else {
            return Err(anyhow!("snapshot unit has no entries"));
        };
        match &self.subject_id {
            Some(subject_id) => {
                if &first.key != subject_id {
                    return Err(anyhow!(
                        "snapshot unit for subject {subject_id} does not start with its document"
                    ));
                }
                Subject::from_bytes(subject_id, &first.decoded_value()?)
                    .with_context(|| format!("snapshot unit for subject {subject_id} is corrupt"))?;
            }
            None if self.entries.len() != 1 => {
                return Err(anyhow!("unindexed snapshot unit {} holds more than one entry", first.key));
            }
            None => {}
        }
        for entry in &self.entries {
            entry.decoded_value()?;
        }
        Ok(())
    }
}

/// Group entries so each subject travels with the records it lists.
fn group_snapshot_units(entries: Vec<StateEntry>) -> Result<Vec<SnapshotUnit>> {
    let mut by_key: BTreeMap<String, StateEntry> =
        entries.into_iter().map(|entry| (entry.key.clone(), entry)).collect();

    let mut subjects = Vec::new();
    for entry in by_key.values() {
        if let Ok(subject) = Subject::from_bytes(&entry.key, &entry.decoded_value()?) {
            subjects.push(subject);
        }
    }

    let mut units = Vec::with_capacity(by_key.len());
    for subject in subjects {
        let Some(document) = by_key.remove(&subject.id) else {
            continue;
        };
        let mut unit_entries = vec![document];
        for record_key in &subject.record_keys {
            if let Some(record) = by_key.remove(record_key) {
                unit_entries.push(record);
            }
        }
        units.push(SnapshotUnit { subject_id: Some(subject.id), entries: unit_entries });
    }

    if !by_key.is_empty() {
        tracing::warn!(count = by_key.len(), "exporting entries no subject lists");
    }
    units.extend(
        by_key.into_values().map(|entry| SnapshotUnit { subject_id: None, entries: vec![entry] }),
    );
    Ok(units)
}

fn write_snapshot_units(path: &Path, units: &[SnapshotUnit]) -> Result<ExportFileDigest> {
    let mut body = String::new();
    for unit in units {
        let line = serde_json::to_string(unit)
            .with_context(|| format!("failed to serialize snapshot unit {}", unit.label()))?;
        body.push_str(&line);
        body.push('\n');
    }
    fs::write(path, &body)
        .with_context(|| format!("failed to write snapshot file {}", path.display()))?;

    Ok(ExportFileDigest {
        path: SNAPSHOT_UNITS_FILE.to_string(),
        sha256: sha256_hex(body.as_bytes()),
        units: units.len(),
        entries: units.iter().map(|unit| unit.entries.len()).sum(),
    })
}

/// Read and fully verify the snapshot file against its manifest entry.
fn read_snapshot_units(path: &Path, expected: &ExportFileDigest) -> Result<Vec<SnapshotUnit>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot file {}", path.display()))?;

    let actual_sha256 = sha256_hex(body.as_bytes());
    if actual_sha256 != expected.sha256 {
        return Err(anyhow!(
            "manifest digest mismatch for {SNAPSHOT_UNITS_FILE}: expected {}, got {actual_sha256}",
            expected.sha256
        ));
    }

    let mut units = Vec::new();
    for (index, line) in body.lines().enumerate().filter(|(_, line)| !line.trim().is_empty()) {
        let unit: SnapshotUnit = serde_json::from_str(line).with_context(|| {
            format!("failed to parse snapshot unit on line {} of {}", index + 1, path.display())
        })?;
        unit.validate()?;
        units.push(unit);
    }

    let entries: usize = units.iter().map(|unit| unit.entries.len()).sum();
    if units.len() != expected.units || entries != expected.entries {
        return Err(anyhow!(
            "manifest count mismatch for {SNAPSHOT_UNITS_FILE}: expected {} units / {} entries, got {} / {entries}",
            expected.units,
            expected.entries,
            units.len()
        ));
    }
    Ok(units)
}

fn read_export_manifest(in_dir: &Path) -> Result<ExportManifest> {
    let path = in_dir.join(MANIFEST_FILE);
    let bytes = fs::read(&path).with_context(|| {
        format!("snapshot at {} has no readable {MANIFEST_FILE}", in_dir.display())
    })?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("snapshot manifest {} is not valid JSON", path.display()))
}

fn validate_import_manifest(manifest: &ExportManifest) -> Result<&ExportFileDigest> {
    if manifest.schema_version <= 0 || manifest.schema_version > LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "snapshot was exported at schema version {}; this ledger reads 1..={}",
            manifest.schema_version,
            LATEST_SCHEMA_VERSION
        ));
    }

    match manifest.files.as_slice() {
        [file] if file.path == SNAPSHOT_UNITS_FILE => Ok(file),
        _ => Err(anyhow!("manifest MUST list exactly one file entry: {SNAPSHOT_UNITS_FILE}")),
    }
}
