use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use purchase_reconciler::application::engine::ReconciliationEngine;
use purchase_reconciler::config::EngineConfig;
use purchase_reconciler::domain::ports::Collaborators;
use purchase_reconciler::infrastructure::in_memory::{ALL_OPERATIONS, FaultMode, InMemorySystems};
use purchase_reconciler::interfaces::csv::catalog_reader::CatalogReader;
use purchase_reconciler::interfaces::csv::outcome_writer::{OutcomeRow, OutcomeWriter};
use purchase_reconciler::interfaces::csv::payment_reader::PaymentReader;
use purchase_reconciler::interfaces::csv::purchase_reader::PurchaseReader;
use purchase_reconciler::telemetry;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Outage {
    Identity,
    Commerce,
    Learning,
    Content,
}

/// Replays purchase confirmations through the reconciliation engine.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Purchase confirmations CSV (buyer,item,amount,currency,reference)
    input: PathBuf,

    /// Content catalog CSV (kind,id,title,policy,price,currency,product)
    #[arg(long)]
    catalog: PathBuf,

    /// Payment processor export CSV (reference,status)
    #[arg(long)]
    payments: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB for local stores.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level or filter directive; overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Make every call to the named remote system fail
    #[arg(long, value_enum)]
    simulate_outage: Option<Outage>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref()).into_diagnostic()?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    telemetry::init_tracing(&config.log_level).into_diagnostic()?;

    let systems = InMemorySystems::new();
    seed_catalog(&systems, &cli.catalog).await?;
    seed_payments(&systems, &cli.payments).await?;

    if let Some(outage) = cli.simulate_outage {
        warn!(?outage, "Simulating remote outage");
        match outage {
            Outage::Identity => systems.accounts.faults(),
            Outage::Commerce => systems.commerce.faults(),
            Outage::Learning => systems.learning.faults(),
            Outage::Content => systems.content.faults(),
        }
        .fail(ALL_OPERATIONS, FaultMode::Always);
    }

    let mut collaborators = systems.collaborators();
    if let Some(db_path) = cli.db_path.as_deref() {
        attach_local_stores(&mut collaborators, db_path)?;
    }
    let engine = ReconciliationEngine::new(collaborators, &config);

    let file = File::open(&cli.input).into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = OutcomeWriter::new(stdout.lock());
    for purchase in PurchaseReader::new(file).purchases() {
        match purchase {
            Ok(intent) => {
                let result = engine.reconcile(&intent).await;
                let access = match &result {
                    Ok(outcome) => {
                        engine
                            .check_access(Some(outcome.account), intent.item())
                            .await
                    }
                    Err(e) => {
                        warn!(reference = %intent.reference(), error = %e, "Reconciliation failed");
                        false
                    }
                };
                writer
                    .write(&OutcomeRow::new(&intent, &result, access))
                    .into_diagnostic()?;
            }
            Err(e) => {
                eprintln!("Error reading purchase: {}", e);
            }
        }
    }
    writer.flush().into_diagnostic()?;

    Ok(())
}

async fn seed_catalog(systems: &InMemorySystems, path: &Path) -> Result<()> {
    let file = File::open(path).into_diagnostic()?;
    let mut published = 0usize;
    for entry in CatalogReader::new(file).entries() {
        match entry {
            Ok(entry) => {
                let product = entry.product.as_ref().map(|p| p.0.as_str());
                systems
                    .publish(entry.item, product)
                    .await
                    .into_diagnostic()?;
                published += 1;
            }
            Err(e) => eprintln!("Error reading catalog item: {}", e),
        }
    }
    info!(published, "Catalog loaded");
    Ok(())
}

async fn seed_payments(systems: &InMemorySystems, path: &Path) -> Result<()> {
    let file = File::open(path).into_diagnostic()?;
    for row in PaymentReader::new(file).payments() {
        match row {
            Ok(row) => {
                systems
                    .payments
                    .set_status(row.reference.as_str(), &row.status)
                    .await
            }
            Err(e) => eprintln!("Error reading payment: {}", e),
        }
    }
    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn attach_local_stores(collaborators: &mut Collaborators, db_path: &Path) -> Result<()> {
    use purchase_reconciler::infrastructure::rocksdb::RocksDBStore;
    use std::sync::Arc;

    let store = RocksDBStore::open(db_path).into_diagnostic()?;
    collaborators.mappings = Arc::new(store.clone());
    collaborators.fallback = Arc::new(store.clone());
    collaborators.revocations = Arc::new(store);
    info!(path = %db_path.display(), "Local stores persisted in RocksDB");
    Ok(())
}

#[cfg(not(feature = "storage-rocksdb"))]
fn attach_local_stores(_collaborators: &mut Collaborators, _db_path: &Path) -> Result<()> {
    eprintln!(
        "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
    );
    Ok(())
}
