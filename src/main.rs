use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use bank_categorizer::{
    classify_all, load_config, load_transactions, suggest_keyword, write_classified, Config,
    ImportReport, LegacySource, RuleStore,
};

#[derive(Parser, Debug)]
#[command(name = "bank-categorizer", version, about = "Keyword rules for bank transactions")]
struct Cli {
    /// Config file (default: ./bank-categorizer.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage categories
    Categories {
        #[command(subcommand)]
        command: CategoryCommand,
    },

    /// Manage keywords inside a category
    Keywords {
        #[command(subcommand)]
        command: KeywordCommand,
    },

    /// Merge the legacy JSON rule file (only ever runs once per store)
    ImportLegacy {
        /// Legacy file (default: storage.legacy_path from config)
        path: Option<PathBuf>,
    },

    /// Classify a single description
    Match { description: String },

    /// Propose a keyword for a description
    Suggest { description: String },

    /// File a description under a category and learn its suggested keyword
    Learn { category: String, description: String },

    /// Classify every row of a bank CSV export
    Classify {
        csv: PathBuf,

        /// Write the rows back out with Category and Matched_Keyword columns
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show the change log of a category
    History { category: String },

    /// List keywords present in more than one category
    Conflicts,
}

#[derive(Subcommand, Debug)]
enum CategoryCommand {
    /// List categories in match priority order
    List,
    Add { name: String },
    Rename { old_name: String, new_name: String },
    Delete { name: String },
    /// Move a category to a 0-based position
    Move { name: String, index: usize },
}

#[derive(Subcommand, Debug)]
enum KeywordCommand {
    Add { category: String, keyword: String },
    Remove { category: String, keyword: String },
    Enable { category: String, keyword: String },
    Disable { category: String, keyword: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    init_tracing(&config);

    let store = RuleStore::open(&config.storage.db_path)
        .with_context(|| format!("open rule store {}", config.storage.db_path.display()))?
        .with_actor("cli");

    // Explicit import reports its own outcome
    if !matches!(cli.command, Command::ImportLegacy { .. }) {
        if let Some(report) = auto_import_legacy(&store, &config.storage.legacy_path) {
            if !report.already_imported {
                println!("📦 {}", report.summary());
            }
        }
    }

    match cli.command {
        Command::Categories { command } => run_category_command(&store, command)?,
        Command::Keywords { command } => run_keyword_command(&store, command)?,
        Command::ImportLegacy { path } => {
            let path = path.unwrap_or_else(|| config.storage.legacy_path.clone());
            import_legacy(&store, &path)?;
        }
        Command::Match { description } => {
            let result = store.snapshot()?.classify(&description);
            match &result.matched_keyword {
                Some(keyword) => println!("{} (keyword: {})", result.category_name(), keyword),
                None => println!("{}", result.category_name()),
            }
        }
        Command::Suggest { description } => match suggest_keyword(&description) {
            Some(keyword) => println!("{}", keyword),
            None => println!("No keyword suggestion for {:?}", description),
        },
        Command::Learn {
            category,
            description,
        } => match store.learn_keyword(&category, &description)? {
            Some(keyword) => println!("✓ Learned {:?} for {}", keyword, category),
            None => println!("Nothing new to learn for {} from {:?}", category, description),
        },
        Command::Classify { csv, output } => classify_file(&store, &csv, output.as_deref())?,
        Command::History { category } => {
            for event in store.history(&category)? {
                println!(
                    "{}  {:<20} {:<16} {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.event_type,
                    event.actor,
                    event.data
                );
            }
        }
        Command::Conflicts => {
            let conflicts = store.snapshot()?.keyword_conflicts();
            if conflicts.is_empty() {
                println!("✓ No keyword appears in more than one category");
            }
            for conflict in conflicts {
                println!(
                    "⚠️  {:?} in {} → {} wins",
                    conflict.keyword,
                    conflict.categories.join(", "),
                    conflict.winner().unwrap_or(bank_categorizer::UNCATEGORIZED)
                );
            }
        }
    }

    Ok(())
}

/// Startup import; a bad legacy file is logged and left for `import-legacy`
fn auto_import_legacy(store: &RuleStore, path: &Path) -> Option<ImportReport> {
    match store.import_legacy_if_present(path) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "automatic legacy import failed");
            None
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_category_command(store: &RuleStore, command: CategoryCommand) -> Result<()> {
    match command {
        CategoryCommand::List => {
            let categories = store.list_categories()?;
            if categories.is_empty() {
                println!("No categories yet");
            }
            for (i, category) in categories.iter().enumerate() {
                let keywords: Vec<String> = category
                    .keywords
                    .iter()
                    .map(|k| {
                        if k.enabled {
                            k.pattern.clone()
                        } else {
                            format!("{} (disabled)", k.pattern)
                        }
                    })
                    .collect();
                println!("{:>3}. {:<24} {}", i, category.name, keywords.join(", "));
            }
        }
        CategoryCommand::Add { name } => {
            let category = store.add_category(&name)?;
            println!("✓ Added category {}", category.name);
        }
        CategoryCommand::Rename { old_name, new_name } => {
            store.rename_category(&old_name, &new_name)?;
            println!("✓ Renamed {} → {}", old_name, new_name.trim());
        }
        CategoryCommand::Delete { name } => {
            store.delete_category(&name)?;
            println!("✓ Deleted category {}", name);
        }
        CategoryCommand::Move { name, index } => {
            store.move_category(&name, index)?;
            println!("✓ Moved {} to position {}", name, index);
        }
    }

    Ok(())
}

fn run_keyword_command(store: &RuleStore, command: KeywordCommand) -> Result<()> {
    match command {
        KeywordCommand::Add { category, keyword } => {
            if store.add_keyword(&category, &keyword)? {
                println!("✓ Added {:?} to {}", keyword.trim(), category);
            } else {
                println!("{:?} is already in {}", keyword.trim(), category);
            }
        }
        KeywordCommand::Remove { category, keyword } => {
            store.remove_keyword(&category, &keyword)?;
            println!("✓ Removed {:?} from {}", keyword, category);
        }
        KeywordCommand::Enable { category, keyword } => {
            store.set_keyword_enabled(&category, &keyword, true)?;
            println!("✓ Enabled {:?} in {}", keyword, category);
        }
        KeywordCommand::Disable { category, keyword } => {
            store.set_keyword_enabled(&category, &keyword, false)?;
            println!("✓ Disabled {:?} in {}", keyword, category);
        }
    }

    Ok(())
}

fn import_legacy(store: &RuleStore, path: &Path) -> Result<()> {
    if let Some(status) = store.legacy_import_status()? {
        println!(
            "Legacy rules already imported from {} on {}",
            status.origin.as_deref().unwrap_or("unknown source"),
            status.completed_at
        );
        return Ok(());
    }

    let source = LegacySource::from_path(path)?;
    let report = store.import_legacy(&source)?;
    println!("📦 {}", report.summary());

    Ok(())
}

fn classify_file(store: &RuleStore, csv: &Path, output: Option<&Path>) -> Result<()> {
    println!("📂 Loading {}...", csv.display());
    let file = load_transactions(csv)?;
    println!("✓ Loaded {} transactions", file.len());

    let headers = file.headers.clone();
    let outcome = classify_all(file.records, &store.snapshot()?);
    let summary = &outcome.summary;

    println!("\n📊 {}", summary.summary());
    for tally in &summary.per_category {
        println!(
            "   {:<24} {:>6} {:>14.2}",
            tally.category, tally.count, tally.total_amount
        );
    }
    println!(
        "   {:<24} {:>6} {:>14.2}",
        bank_categorizer::UNCATEGORIZED,
        summary.uncategorized_count,
        summary.uncategorized_amount
    );
    println!(
        "\n   Debits {:.2}   Credits {:.2}   Balance {:.2}",
        summary.debit_total, summary.credit_total, summary.balance
    );

    if let Some(output) = output {
        write_classified(output, &headers, &outcome)?;
        println!("\n💾 Wrote {}", output.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_corrupt_legacy_file_does_not_block_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("categories.json");
        fs::write(&path, "{ not json").unwrap();
        let store = RuleStore::open_in_memory().unwrap();
        store.add_category("Food").unwrap();

        assert_eq!(auto_import_legacy(&store, &path), None);

        assert_eq!(store.list_categories().unwrap().len(), 1);
        assert!(!store.legacy_import_completed().unwrap());
        assert!(import_legacy(&store, &path).is_err());
    }

    #[test]
    fn test_auto_import_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("categories.json");
        fs::write(&path, r#"{"Food": ["coffee"]}"#).unwrap();
        let store = RuleStore::open_in_memory().unwrap();

        let first = auto_import_legacy(&store, &path).unwrap();
        let second = auto_import_legacy(&store, &path).unwrap();

        assert_eq!(first.keywords_added, 1);
        assert!(second.already_imported);
        assert_eq!(auto_import_legacy(&store, &dir.path().join("missing.json")), None);
    }
}
