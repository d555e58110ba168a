use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use visit_ledger_core::{
    append_record, load_history, load_subject, register_subject, LedgerCommand, SystemClock,
};
use visit_ledger_store_sqlite::SqliteStore;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "vl")]
#[command(about = "Visit Ledger CLI")]
struct Cli {
    #[arg(long, default_value = "./visit_ledger.sqlite3")]
    db: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Subject {
        #[command(subcommand)]
        command: SubjectCommand,
    },
    Record {
        #[command(subcommand)]
        command: RecordCommand,
    },
    History(HistoryArgs),
    /// Route a raw function call: registerSubject, appendRecord, reconstructHistory.
    Invoke(InvokeArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Export(DbExportArgs),
    Import(DbImportArgs),
    Backup(DbBackupArgs),
    Restore(DbRestoreArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbExportArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
    /// Fail the whole import when a subject or record already exists,
    /// instead of skipping that subject with its records.
    #[arg(long, default_value_t = false)]
    strict: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbRestoreArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum SubjectCommand {
    Register(RegisterArgs),
    Show(SubjectArgs),
}

#[derive(Debug, Args)]
struct SubjectArgs {
    #[arg(long)]
    subject: String,
}

#[derive(Debug, Args)]
struct RegisterArgs {
    #[arg(long)]
    subject: String,
    /// Opaque profile; JSON is stored structured, anything else as a string.
    #[arg(long, default_value = "")]
    profile: String,
}

#[derive(Debug, Subcommand)]
enum RecordCommand {
    Append(AppendArgs),
}

#[derive(Debug, Args)]
struct AppendArgs {
    #[arg(long)]
    subject: String,
    #[arg(long)]
    payload: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HistoryFormat {
    Json,
    Text,
}

#[derive(Debug, Args)]
struct HistoryArgs {
    #[arg(long)]
    subject: String,
    #[arg(long, value_enum, default_value_t = HistoryFormat::Json)]
    format: HistoryFormat,
}

#[derive(Debug, Args)]
struct InvokeArgs {
    function: String,
    args: Vec<String>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    tracing::debug!(db = %cli.db.display(), command = ?cli.command, "dispatching command");
    let mut store = SqliteStore::open(&cli.db)?;
    match cli.command {
        Command::Db { command } => run_db(command, &mut store),
        Command::Subject { command } => run_subject(command, &mut store),
        Command::Record { command } => run_record(command, &mut store),
        Command::History(args) => run_history(&args, &mut store),
        Command::Invoke(args) => run_invoke(&args, &mut store),
    }
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(store),
        DbCommand::Migrate(args) => run_db_migrate(&args, store),
        DbCommand::Export(args) => run_db_export(&args, store),
        DbCommand::Import(args) => run_db_import(&args, store),
        DbCommand::Backup(args) => run_db_backup(&args, store),
        DbCommand::Restore(args) => run_db_restore(&args, store),
        DbCommand::IntegrityCheck => run_db_integrity_check(store),
    }
}

fn run_db_schema_version(store: &SqliteStore) -> Result<()> {
    let status = store.schema_status()?;
    emit_json(serde_json::json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty()
    }))
}

fn run_db_migrate(args: &DbMigrateArgs, store: &mut SqliteStore) -> Result<()> {
    let before = store.schema_status()?;
    if args.dry_run {
        return emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions
        }));
    }

    store.migrate()?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "target_version": after.target_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

fn run_db_export(args: &DbExportArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let manifest = store.export_snapshot(&args.out)?;
    emit_json(serde_json::json!({
        "out_dir": args.out,
        "manifest": manifest
    }))
}

fn run_db_import(args: &DbImportArgs, store: &mut SqliteStore) -> Result<()> {
    let summary = store.import_snapshot(&args.input, !args.strict)?;
    emit_json(serde_json::json!({
        "in_dir": args.input,
        "strict": args.strict,
        "summary": summary
    }))
}

fn run_db_backup(args: &DbBackupArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let summary = store.backup_database(&args.out)?;
    emit_json(serde_json::to_value(&summary).context("failed to serialize backup summary")?)
}

fn run_db_restore(args: &DbRestoreArgs, store: &mut SqliteStore) -> Result<()> {
    let summary = store.restore_database(&args.input)?;
    if !summary.digest_mismatches.is_empty() {
        tracing::warn!(
            mismatches = summary.digest_mismatches.len(),
            "restored database holds values that do not match their digests"
        );
    }
    emit_json(serde_json::to_value(&summary).context("failed to serialize restore summary")?)
}

fn run_db_integrity_check(store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let report = store.integrity_check()?;
    emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
}

fn run_subject(command: SubjectCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    match command {
        SubjectCommand::Register(args) => {
            let subject = store.exclusive_write(|store| {
                register_subject(store, &args.subject, args.profile.as_bytes())
            })?;
            emit_json(serde_json::to_value(&subject).context("failed to serialize subject")?)
        }
        SubjectCommand::Show(args) => {
            let subject = load_subject(&*store, &args.subject)?;
            let mut value = serde_json::to_value(&subject).context("failed to serialize subject")?;
            if let Value::Object(object) = &mut value {
                object.insert("record_count".to_string(), subject.record_keys.len().into());
            }
            emit_json(value)
        }
    }
}

fn run_record(command: RecordCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    match command {
        RecordCommand::Append(args) => {
            let record_key = store.exclusive_write(|store| {
                append_record(store, &SystemClock, &args.subject, args.payload.as_bytes())
            })?;
            emit_json(serde_json::json!({
                "subject_id": args.subject,
                "record_key": record_key
            }))
        }
    }
}

fn run_history(args: &HistoryArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let report = load_history(&*store, &args.subject)?;
    let rendered = report.render();
    match args.format {
        HistoryFormat::Text => {
            println!("{rendered}");
            Ok(())
        }
        HistoryFormat::Json => emit_json(serde_json::json!({
            "subject_id": report.subject_id,
            "record_count": report.entries.len(),
            "report": rendered,
            "entries": report.entries
        })),
    }
}

fn run_invoke(args: &InvokeArgs, store: &mut SqliteStore) -> Result<()> {
    let command = LedgerCommand::parse(&args.function, &args.args)?;
    store.migrate()?;
    let output = store.exclusive_write(|store| command.execute(store, &SystemClock))?;
    emit_json(serde_json::to_value(&output).context("failed to serialize command output")?)
}
