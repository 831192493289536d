use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "medreport")]
#[command(about = "Generate, render and email patient health reports in bulk")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.medreport/config.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import patient records from a JSON array
    Import {
        /// File containing `[{"id", "name", "age", "email", "medicalHistory", "symptoms"}]`
        file: PathBuf,
    },
    /// List patients
    List {
        /// Match on patient id or name
        #[arg(long)]
        search: Option<String>,
        /// Only patients whose report is still pending
        #[arg(long)]
        pending: bool,
    },
    /// Delete a patient
    Delete {
        /// Patient id
        id: String,
    },
    /// Generate and render a report without sending it
    Preview {
        /// Patient id
        id: String,
        /// Where to write the PDF
        #[arg(long)]
        out: PathBuf,
        /// Also print the report text
        #[arg(long)]
        print: bool,
    },
    /// Generate, render and email reports
    Send {
        /// Patient ids to process
        ids: Vec<String>,
        /// Process every patient whose report is still pending
        #[arg(long, conflicts_with = "ids")]
        all_pending: bool,
        /// Worker pool width (1-32)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Stop after the first failed item
        #[arg(long)]
        halt_on_failure: bool,
        /// Write the batch summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Delivery history of one patient
    History {
        /// Patient id
        id: String,
    },
    /// Report status counts
    Stats,
    /// Write every patient record, with report status, to a CSV or JSON file
    Export {
        /// Output file; `.json` selects JSON, anything else CSV
        /// (defaults to patients_export_<timestamp>.csv)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    medreport::logging::init_logging("info")?;

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;
    let store = commands::open_store(&config, cli.db.as_deref())?;

    match cli.command {
        Commands::Import { file } => commands::import(store.as_ref(), &file),
        Commands::List { search, pending } => {
            commands::list(store.as_ref(), search.as_deref(), pending)
        }
        Commands::Delete { id } => commands::delete(store.as_ref(), &id),
        Commands::Preview { id, out, print } => {
            commands::preview(&config, store.as_ref(), &id, &out, print).await
        }
        Commands::Send {
            ids,
            all_pending,
            concurrency,
            halt_on_failure,
            summary,
        } => {
            let options = commands::SendOptions {
                ids,
                all_pending,
                concurrency,
                halt_on_failure,
                summary,
            };
            commands::send(&config, store, options).await
        }
        Commands::History { id } => commands::history(store.as_ref(), &id),
        Commands::Stats => commands::stats(store.as_ref()),
        Commands::Export { out } => commands::export(store.as_ref(), out),
    }
}
