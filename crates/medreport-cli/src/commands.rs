//! Command implementations. Each returns `anyhow::Result` and prints to stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use log::{info, warn};

use medreport::ai::GeminiGenerator;
use medreport::config::{default_config_path, validate_config, Config};
use medreport::db::Database;
use medreport::email::DisabledMailer;
use medreport::export::{default_file_name, export_records, ExportFormat};
use medreport::pipeline::{
    BatchConfig, BatchController, BatchError, BatchRun, CancelHandle, LogProgress, Pipeline,
};
use medreport::records::{validate_import, PatientImport, PatientRecord, ReportStatus};
use medreport::render::PdfRenderer;
use medreport::store::{RecordStore, SqliteRecordStore};

pub struct SendOptions {
    pub ids: Vec<String>,
    pub all_pending: bool,
    pub concurrency: Option<usize>,
    pub halt_on_failure: bool,
    pub summary: Option<PathBuf>,
}

/// Loads the given config file, the default one when it exists, or built-in defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().filter(|p| p.exists()),
    };

    match path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            medreport::load_config(&path)
                .with_context(|| format!("failed to load config {}", path.display()))
        }
        None => {
            let config = Config::default();
            validate_config(&config)?;
            Ok(config)
        }
    }
}

pub fn open_store(config: &Config, db: Option<&Path>) -> anyhow::Result<Arc<dyn RecordStore>> {
    let path = db
        .map(Path::to_path_buf)
        .or_else(|| config.database.resolved_path())
        .context("no database path configured and no home directory found")?;

    let database = Database::open(&path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    Ok(Arc::new(SqliteRecordStore::new(database)))
}

pub fn import(store: &dyn RecordStore, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let rows: Vec<PatientImport> =
        serde_json::from_str(&content).context("import file must be a JSON array of patients")?;

    let (records, errors) = validate_import(rows);
    for error in &errors {
        warn!("Skipping {}", error);
    }
    for record in &records {
        store.upsert(record)?;
    }

    println!(
        "Imported {} patient(s), skipped {} row(s)",
        records.len(),
        errors.len()
    );
    Ok(())
}

pub fn list(store: &dyn RecordStore, search: Option<&str>, pending: bool) -> anyhow::Result<()> {
    let records: Vec<PatientRecord> = match (search, pending) {
        (Some(term), _) => store
            .search(term)?
            .into_iter()
            .filter(|r| !pending || r.report_status == ReportStatus::Pending)
            .collect(),
        (None, true) => store.list_pending()?,
        (None, false) => store.list()?,
    };

    if records.is_empty() {
        println!("No patients found.");
        return Ok(());
    }

    for record in records {
        let sent = record
            .last_sent_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<28} {:>3}  {:<32} {:<8} {}",
            record.id,
            record.name,
            record.age,
            record.email,
            record.report_status.as_str(),
            sent
        );
    }
    Ok(())
}

pub fn delete(store: &dyn RecordStore, id: &str) -> anyhow::Result<()> {
    if store.delete(id)? {
        println!("Deleted patient {}", id);
    } else {
        bail!("patient {} not found", id);
    }
    Ok(())
}

pub async fn preview(
    config: &Config,
    store: &dyn RecordStore,
    id: &str,
    out: &Path,
    print: bool,
) -> anyhow::Result<()> {
    let patient = store
        .get(id)?
        .with_context(|| format!("patient {} not found", id))?;

    let pipeline = Pipeline::new(
        Arc::new(GeminiGenerator::from_config(&config.generation)?),
        Arc::new(PdfRenderer::new()),
        Arc::new(DisabledMailer),
        Arc::new(config.rate_limits.limiter()),
        &BatchConfig::from_config(config),
    );

    let artifact = pipeline.preview(&patient).await?;
    let pdf = artifact.pdf.as_deref().context("renderer produced no PDF")?;
    std::fs::write(out, pdf).with_context(|| format!("failed to write {}", out.display()))?;

    if print {
        println!("{}\n", artifact.report_text);
    }
    println!("Wrote {} ({} bytes)", out.display(), pdf.len());
    Ok(())
}

pub async fn send(
    config: &Config,
    store: Arc<dyn RecordStore>,
    options: SendOptions,
) -> anyhow::Result<()> {
    let ids: Vec<String> = if options.all_pending {
        store.list_pending()?.into_iter().map(|r| r.id).collect()
    } else {
        options.ids
    };
    if ids.is_empty() {
        bail!("nothing to send: pass patient ids or --all-pending");
    }

    let mut batch = BatchConfig::from_config(config);
    if let Some(concurrency) = options.concurrency {
        batch.concurrency = concurrency;
    }
    if options.halt_on_failure {
        batch.halt_on_first_failure = true;
    }

    let pipeline = Arc::new(Pipeline::from_config(config)?);
    let controller = BatchController::new(pipeline, store, batch);

    let cancel = CancelHandle::new();
    let handler_cancel = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("Cancelling: in-flight steps will finish, nothing new starts");
        handler_cancel.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    match controller.run_batch(&ids, &LogProgress, &cancel).await {
        Ok(run) => report(&run, options.summary.as_deref()),
        Err(BatchError::DeliveryAuth { message, run }) => {
            report(&run, options.summary.as_deref())?;
            bail!("batch aborted, mail server rejected the credentials: {}", message)
        }
        Err(e) => Err(e.into()),
    }
}

fn report(run: &BatchRun, summary_path: Option<&Path>) -> anyhow::Result<()> {
    let summary = run.summary();
    println!("{}", summary);

    if let Some(path) = summary_path {
        std::fs::write(path, summary.to_json()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Summary written to {}", path.display());
    }
    Ok(())
}

pub fn history(store: &dyn RecordStore, id: &str) -> anyhow::Result<()> {
    let entries = store.history(id)?;
    if entries.is_empty() {
        println!("No deliveries recorded for {}.", id);
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}  {:<7} {:<9} {}",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            entry.outcome,
            entry.stage.as_deref().unwrap_or("-"),
            entry.detail.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub fn stats(store: &dyn RecordStore) -> anyhow::Result<()> {
    let counts = store.stats()?;
    println!("Total:   {}", counts.total);
    println!("Pending: {}", counts.pending);
    println!("Sent:    {}", counts.sent);
    println!("Failed:  {}", counts.failed);
    Ok(())
}

pub fn export(store: &dyn RecordStore, out: Option<PathBuf>) -> anyhow::Result<()> {
    let (path, format) = match out {
        Some(path) => {
            let format = ExportFormat::from_path(&path).unwrap_or(ExportFormat::Csv);
            (path, format)
        }
        None => {
            let format = ExportFormat::Csv;
            (PathBuf::from(default_file_name(format, chrono::Utc::now())), format)
        }
    };

    let file = std::fs::File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let count = export_records(store, format, std::io::BufWriter::new(file))?;
    if count == 0 {
        warn!("No patients to export");
    }
    println!("Exported {} patient(s) to {}", count, path.display());
    Ok(())
}
