use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use shorthand_ledger::config::Config;
use shorthand_ledger::import::{entries_from_rows, load_rows};
use shorthand_ledger::money::format_amount;
use shorthand_ledger::{
    parse, partition, validate, BatchManifest, Entry, EntryType, Ledger, LedgerError, ParseError, RowFilter,
};

#[derive(Parser, Debug)]
#[command(name = "shorthand-ledger")]
#[command(version, about = "Shorthand transaction entry: parse, check, apply and undo batches")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse, validate and duplicate-check a shorthand file without writing
    Check {
        file: PathBuf,
        /// Context date for lines without one (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Commit a shorthand file as one batch
    Apply {
        file: PathBuf,
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Lines whose duplicate payment should be committed anyway
        #[arg(long = "allow-duplicate", num_args = 1..)]
        allow_duplicate: Vec<usize>,
        /// Write the batch manifest here so it can be undone later
        #[arg(long)]
        manifest_out: Option<PathBuf>,
    },

    /// Reverse a batch from its saved manifest
    Undo { manifest: PathBuf },

    /// Commit rows from a CSV file (text column or structured columns)
    Import {
        file: PathBuf,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long = "allow-duplicate", num_args = 1..)]
        allow_duplicate: Vec<usize>,
        #[arg(long)]
        manifest_out: Option<PathBuf>,
    },

    /// List rows sharing a date and amount
    Clusters {
        #[arg(long = "type")]
        entry_type: Option<EntryType>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Keep one row of a cluster and delete the rest
    Resolve {
        keep: String,
        #[arg(required = true)]
        delete: Vec<String>,
    },

    /// Party balances and staff advances
    Balances,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.config.init_logging()?;
    let mut ledger = cli.config.open_ledger()?;

    match cli.command {
        Command::Check { file, date } => run_check(&ledger, &file, context_date(date)),
        Command::Apply {
            file,
            date,
            allow_duplicate,
            manifest_out,
        } => {
            let (entries, errors) = partition(parse(&read_text(&file)?, context_date(date)));
            commit(&mut ledger, entries, errors, &allow_duplicate, manifest_out.as_deref())
        }
        Command::Undo { manifest } => run_undo(&mut ledger, &manifest),
        Command::Import {
            file,
            date,
            allow_duplicate,
            manifest_out,
        } => {
            println!("📂 Loading CSV...");
            let rows = load_rows(&file)?;
            println!("✓ Loaded {} rows", rows.len());
            let (entries, errors) = partition(entries_from_rows(&rows, context_date(date)));
            commit(&mut ledger, entries, errors, &allow_duplicate, manifest_out.as_deref())
        }
        Command::Clusters { entry_type, from, to } => {
            let filter = RowFilter {
                entry_type,
                from,
                to,
                party_id: None,
            };
            run_clusters(&ledger, &filter)
        }
        Command::Resolve { keep, delete } => {
            let deleted = ledger.resolve_cluster(&keep, &delete)?;
            println!("✅ Kept {keep}, deleted {} row(s)", deleted.len());
            Ok(())
        }
        Command::Balances => run_balances(&ledger),
    }
}

fn context_date(date: Option<NaiveDate>) -> NaiveDate {
    date.unwrap_or_else(|| chrono::Local::now().date_naive())
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_parse_errors(errors: &[ParseError]) {
    for error in errors {
        println!("   ❌ Line {}: {} → {:?}", error.line, error.reason, error.text);
    }
}

fn run_check(ledger: &Ledger, file: &Path, date: NaiveDate) -> Result<()> {
    let (entries, errors) = partition(parse(&read_text(file)?, date));
    println!("🔍 Parsed {} entries, {} unparseable line(s)", entries.len(), errors.len());
    print_parse_errors(&errors);

    let problems = validate(&entries);
    for problem in &problems {
        println!("   ❌ {problem}");
    }

    let reports = ledger.check_duplicates(&entries)?;
    for report in &reports {
        let marker = if report.is_blocking() { "⛔" } else { "⚠️ " };
        println!(
            "   {marker} Line {}: duplicate {} ({:?}) of {}",
            report.line,
            report.entry_type,
            report.policy,
            report.duplicate_of.describe()
        );
    }

    if !errors.is_empty() || !problems.is_empty() || reports.iter().any(|r| r.is_blocking()) {
        bail!("batch is not ready to apply");
    }
    println!("✅ Batch is ready to apply");
    Ok(())
}

fn commit(
    ledger: &mut Ledger,
    mut entries: Vec<Entry>,
    errors: Vec<ParseError>,
    allow_duplicate: &[usize],
    manifest_out: Option<&Path>,
) -> Result<()> {
    if !errors.is_empty() {
        println!("❌ {} line(s) could not be parsed:", errors.len());
        print_parse_errors(&errors);
        bail!("fix the unparseable lines before applying");
    }

    let allowed: BTreeSet<usize> = allow_duplicate.iter().copied().collect();
    for entry in entries.iter_mut().filter(|e| allowed.contains(&e.line)) {
        entry.overrides.duplicate = true;
    }

    let result = match ledger.apply(&entries) {
        Ok(result) => result,
        Err(LedgerError::Validation(problems)) => {
            for problem in &problems {
                println!("   ❌ {problem}");
            }
            bail!("{} validation error(s), nothing written", problems.len());
        }
        Err(e) => return Err(e.into()),
    };

    let Some(manifest) = &result.manifest else {
        println!("❌ Batch rolled back:");
        for failure in &result.failures {
            println!("   Line {}: {}", failure.line, failure.reason);
        }
        bail!("{} entry failure(s), nothing written", result.failures.len());
    };

    println!("💾 Committed {} row(s) as batch {}", result.committed_rows.len(), manifest.batch_id);
    for warning in &result.warnings {
        println!("   ⚠️  {warning}");
    }

    if let Some(path) = manifest_out {
        let json = serde_json::to_string_pretty(manifest)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write manifest {}", path.display()))?;
        println!("✓ Manifest written to {}", path.display());
    }

    Ok(())
}

fn run_undo(ledger: &mut Ledger, path: &Path) -> Result<()> {
    let manifest: BatchManifest =
        serde_json::from_str(&read_text(path)?).with_context(|| format!("Invalid manifest {}", path.display()))?;
    let batch_id = manifest.batch_id.clone();
    let rows = manifest.entries.len();

    ledger.undo(manifest)?;
    println!("↩️  Undid batch {batch_id} ({rows} row(s))");
    Ok(())
}

fn run_clusters(ledger: &Ledger, filter: &RowFilter) -> Result<()> {
    let clusters = ledger.duplicate_clusters(filter)?;
    if clusters.is_empty() {
        println!("✅ No duplicate clusters");
        return Ok(());
    }

    for (date, groups) in &clusters {
        println!("📅 {date}");
        for group in groups {
            println!("   {} × {}", format_amount(group.amount), group.rows.len());
            for row in &group.rows {
                println!(
                    "      {}  {}  {}",
                    row.id,
                    row.entry_type,
                    row.description.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

fn run_balances(ledger: &Ledger) -> Result<()> {
    println!("🤝 Parties");
    for party in ledger.parties()? {
        let flag = if party.is_over_limit() { "  ⚠️ over limit" } else { "" };
        println!("   {:<30} {:>14}{flag}", party.name, format_amount(party.current_balance));
    }

    println!("👷 Staff advances");
    for staff in ledger.staff()? {
        println!("   {:<30} {:>14}", staff.name, format_amount(staff.current_advance));
    }
    Ok(())
}
