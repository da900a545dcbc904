use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use vault_sync::config::{self, FlowConfig, Settings, SourceConfig};
use vault_sync::db::{self, TableLayout};
use vault_sync::pipeline::{self, FlowReport};
use vault_sync::source::{Document, Source};
use vault_sync::{Extractor, HeadingConvention};

#[derive(Parser)]
#[command(name = "vault_sync", about = "Sync markdown note sections into SQLite tables")]
struct Cli {
    /// Settings file (JSON); VAULT_SYNC_* variables override it
    #[arg(short, long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Database file, overriding store.path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured flows
    Run {
        /// Only the flow writing this table (repeatable)
        #[arg(short, long = "flow")]
        flows: Vec<String>,
        /// Exit with an error if any record or flow failed
        #[arg(long)]
        strict: bool,
    },
    /// Sync one local folder into one table
    Sync {
        #[arg(short, long)]
        table: String,
        #[arg(short, long)]
        dir: PathBuf,
        /// Use `1. Title` headings instead of the configured convention
        #[arg(long)]
        numbered: bool,
        #[arg(long)]
        strict: bool,
    },
    /// Print the sections of one note without writing anything
    Extract {
        file: PathBuf,
        #[arg(long)]
        numbered: bool,
        /// Emit JSON records instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List the documents each flow would read
    Ls {
        #[arg(short, long = "flow")]
        flows: Vec<String>,
    },
    /// Row counts per configured table
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;
    if let Some(db) = cli.db {
        settings.store.path = db;
    }

    let result = match cli.command {
        Commands::Run { flows, strict } => {
            if settings.flows.is_empty() {
                bail!(
                    "No flows configured. Add some to {} or use 'sync'.",
                    cli.config.display()
                );
            }
            ensure_db_dir(&settings.store.path)?;
            let report = pipeline::run(&settings, &flows, true).await?;
            for flow in &report.flows {
                print_flow(flow);
            }
            println!(
                "\n{} flows, {} sections written.",
                report.flows.len(),
                report.written()
            );
            if strict && !report.success() {
                bail!("Some flows or records failed");
            }
            Ok(())
        }
        Commands::Sync {
            table,
            dir,
            numbered,
            strict,
        } => {
            ensure_db_dir(&settings.store.path)?;
            let flow = FlowConfig {
                table,
                source: SourceConfig::directory(dir),
                convention: numbered.then(HeadingConvention::numbered),
            };
            let report = pipeline::run_flow(&settings, &flow, true).await;
            print_flow(&report);
            let clean = report.success();
            match report.outcome {
                Err(err) => Err(err.into()),
                Ok(_) if strict && !clean => bail!("Some records failed"),
                Ok(_) => Ok(()),
            }
        }
        Commands::Extract {
            file,
            numbered,
            json,
        } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());
            let doc = Document::new(name, bytes);
            let convention = if numbered {
                HeadingConvention::numbered()
            } else {
                settings.convention.clone()
            };
            let extractor = Extractor::new(convention)?;
            let records = extractor.extract(doc.text()?, &doc.name);

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            if records.is_empty() {
                println!("No sections found in {}.", doc.name);
                return Ok(());
            }
            println!("{:>3} | {:<32} | {:>6} | {:<40}", "#", "Section", "Chars", "Preview");
            println!("{}", "-".repeat(90));
            for (i, r) in records.iter().enumerate() {
                let preview = r.content.replace('\n', " ");
                println!(
                    "{:>3} | {:<32} | {:>6} | {:<40}",
                    i + 1,
                    truncate(&r.section_title, 32),
                    r.content.chars().count(),
                    truncate(&preview, 40)
                );
            }
            println!(
                "\n{} sections | {} headings | source: {}",
                records.len(),
                extractor.convention().name(),
                doc.name
            );
            Ok(())
        }
        Commands::Ls { flows } => {
            for flow in settings.select_flows(&flows)? {
                let source = Source::from_config(&flow.source)?;
                println!("{} <- {}", flow.table, source.describe());
                let listing = source.list().await?;
                for doc in &listing.documents {
                    println!("  {:<48} {:>8} bytes", truncate(&doc.name, 48), doc.bytes.len());
                }
                for (name, err) in &listing.failures {
                    println!("  {:<48} ERROR: {}", truncate(name, 48), err);
                }
                println!(
                    "  {} documents, {} unreadable\n",
                    listing.documents.len(),
                    listing.failures.len()
                );
            }
            Ok(())
        }
        Commands::Stats => {
            ensure_db_dir(&settings.store.path)?;
            let conn = db::connect(&settings.store)?;
            println!(
                "{:<24} | {:>7} | {:>7} | {:<24}",
                "Table", "Rows", "Notes", "Last updated"
            );
            println!("{}", "-".repeat(72));
            for flow in &settings.flows {
                let layout = TableLayout::new(&settings.store, &flow.table);
                match db::table_stats(&conn, &layout)? {
                    Some(s) => println!(
                        "{:<24} | {:>7} | {:>7} | {:<24}",
                        truncate(&flow.table, 24),
                        s.rows,
                        s.sources,
                        s.last_updated.as_deref().unwrap_or("-")
                    ),
                    None => println!("{:<24} | (not created yet)", truncate(&flow.table, 24)),
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_flow(report: &FlowReport) {
    println!("{}", report);
    for name in &report.skipped {
        println!("  skipped {}", name);
    }
    if let Ok(sync) = &report.outcome {
        for failure in &sync.failures {
            println!("  {}", failure);
        }
    }
}

fn ensure_db_dir(path: &Path) -> anyhow::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display())),
        _ => Ok(()),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
