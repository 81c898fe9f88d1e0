use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;

use cashbook::{
    observability, upload, ImportOptions, Ledger, LedgerConfig, LedgerSnapshot, NewTransaction,
    TransactionKind,
};

#[derive(Parser)]
#[command(name = "cashbook")]
#[command(about = "Personal ledger with balance-checked entries and CSV import")]
#[command(version)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "LEDGER_DATABASE_PATH")]
    database: Option<PathBuf>,

    /// Directory where imports are staged
    #[arg(long, global = true, env = "LEDGER_UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every transaction with the current balance
    List,

    /// Show income, outcome and total
    Balance,

    /// Record one transaction
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        value: Decimal,
        /// income or outcome
        #[arg(long = "type")]
        kind: TransactionKind,
        #[arg(long)]
        category: String,
    },

    /// Delete a transaction by id
    Delete { id: String },

    /// Import a CSV file (the file itself is left untouched; a staged copy is consumed)
    Import {
        file: PathBuf,
        /// Media type override; inferred from the extension by default
        #[arg(long)]
        media_type: Option<String>,
        /// Resolve all categories in one batch before importing rows
        #[arg(long)]
        prefetch_categories: bool,
    },

    /// List categories
    Categories,

    /// Audit trail of a transaction, category or import
    History {
        id: String,
        #[arg(long, default_value = "transaction")]
        entity: String,
    },
}

fn main() -> Result<()> {
    observability::init_logging();

    let cli = Cli::parse();
    let mut config = LedgerConfig::from_env();
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if let Some(upload_dir) = cli.upload_dir {
        config.upload_dir = upload_dir;
    }

    let ledger = Ledger::open(&config.database_path)
        .with_context(|| format!("Failed to open ledger at {}", config.database_path.display()))?;

    match cli.command {
        Command::List => {
            let snapshot = ledger.list_all()?;
            print_snapshot(&snapshot);
        }
        Command::Balance => {
            let balance = ledger.balance()?;
            println!("Income:  {}", balance.income);
            println!("Outcome: {}", balance.outcome);
            println!("Total:   {}", balance.total);
        }
        Command::Create {
            title,
            value,
            kind,
            category,
        } => {
            let tx = ledger.create_one(&NewTransaction::new(&title, value, kind, &category))?;
            println!("✓ Created {} ({} {} in {})", tx.id, tx.kind, tx.value, tx.category.title);
        }
        Command::Delete { id } => {
            ledger.delete_one(&id)?;
            println!("✓ Deleted {}", id);
        }
        Command::Import {
            file,
            media_type,
            prefetch_categories,
        } => run_import(&ledger, &config, file, media_type, prefetch_categories)?,
        Command::Categories => {
            for category in ledger.categories()? {
                println!("{}  {}", category.id, category.title);
            }
        }
        Command::History { id, entity } => {
            for event in ledger.history(&entity, &id)? {
                println!(
                    "{}  {:<20} {}  {}",
                    event.timestamp.to_rfc3339(),
                    event.event_type,
                    event.actor,
                    event.data
                );
            }
        }
    }

    Ok(())
}

fn run_import(
    ledger: &Ledger,
    config: &LedgerConfig,
    file: PathBuf,
    media_type: Option<String>,
    prefetch_categories: bool,
) -> Result<()> {
    let media_type =
        media_type.unwrap_or_else(|| upload::media_type_for_path(&file).to_string());

    println!("📂 Importing {} ({})", file.display(), media_type);

    // Reject unsupported formats before copying anything
    cashbook::SourceFormat::from_media_type(&media_type)?;

    let staged = upload::stage_file(&config.upload_dir, &file)
        .with_context(|| format!("Failed to stage {}", file.display()))?;

    let options = ImportOptions {
        prefetch_categories,
    };
    let report = ledger.import_file_with(&staged, &media_type, &options)?;

    println!("✓ Created: {} transactions", report.created.len());
    println!("✓ Skipped (missing fields): {}", report.skipped);
    if !report.rejected.is_empty() {
        println!("⚠ Rejected: {}", report.rejected.len());
        for row in &report.rejected {
            println!("   line {}: {}", row.line, row.reason);
        }
    }

    let balance = ledger.balance()?;
    println!("\nBalance: {} (income {}, outcome {})", balance.total, balance.income, balance.outcome);

    Ok(())
}

fn print_snapshot(snapshot: &LedgerSnapshot) {
    for tx in &snapshot.transactions {
        println!(
            "{}  {:<8} {:>12}  {:<24} {}",
            tx.created_at.format("%Y-%m-%d %H:%M"),
            tx.kind,
            tx.value,
            tx.title,
            tx.category.title
        );
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "Income: {}  Outcome: {}  Total: {}",
        snapshot.balance.income, snapshot.balance.outcome, snapshot.balance.total
    );
}
