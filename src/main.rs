//! Vigil CLI - drive the probe library and scan engine from a terminal

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tabled::builder::Builder;
use tabled::settings::Style;
use tracing_subscriber::EnvFilter;

use vigil::api::App;
use vigil::models::{JobState, ScanOptions};

/// Vigil - probe library manager and HTTP vulnerability scan engine
#[derive(Parser)]
#[command(name = "vigil", version, about, long_about = None)]
struct Cli {
    /// Probe library directory (defaults to the configured templates dir)
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List probes in the library
    List {
        /// Filter by category
        #[arg(short, long)]
        category: Option<String>,
    },

    /// List categories with probe counts
    Categories,

    /// Import a probe file or a folder of probes
    Import {
        /// File or directory to import
        path: PathBuf,

        /// Target category (single-file import only)
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Validate a probe file without storing it
    Validate {
        /// Probe file to check
        path: PathBuf,
    },

    /// Run selected probes against targets and print findings
    Scan {
        /// Targets (host or URL), comma-separated
        #[arg(short, long, value_delimiter = ',')]
        targets: Vec<String>,

        /// Probe ids, comma-separated; all probes when omitted
        #[arg(short, long, value_delimiter = ',')]
        probes: Option<Vec<String>>,

        /// Concurrent workers
        #[arg(long, default_value_t = 10)]
        concurrency: usize,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Max requests per second (0 disables limiting)
        #[arg(long, default_value_t = 100)]
        rate_limit: u32,

        /// HTTP/HTTPS proxy URL
        #[arg(long)]
        proxy: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let settings = vigil::settings::load()?;
    let library_dir = cli.library.unwrap_or_else(|| settings.templates_dir.clone());
    std::fs::create_dir_all(&library_dir)?;

    let app = App::new(
        vigil::probe::Library::open_eager(&library_dir)?,
        vigil::scan::Orchestrator::new(),
    );

    match cli.command {
        Commands::List { category } => {
            let probes = match category {
                Some(cat) => app.list_by_category(&cat),
                None => app.list_all(),
            };

            let mut builder = Builder::default();
            builder.push_record(["ID", "Name", "Severity", "Category"]);
            for probe in &probes {
                builder.push_record([
                    probe.id.as_str(),
                    probe.name.as_str(),
                    probe.severity.as_str(),
                    probe.display_category(),
                ]);
            }
            let mut table = builder.build();
            table.with(Style::rounded());
            println!("{table}");
            println!("{} probes", probes.len());
        }

        Commands::Categories => {
            let mut counts: Vec<(String, usize)> =
                app.categories_with_counts().into_iter().collect();
            counts.sort();

            let mut builder = Builder::default();
            builder.push_record(["Category", "Probes"]);
            for (category, count) in counts {
                builder.push_record([category, count.to_string()]);
            }
            let mut table = builder.build();
            table.with(Style::rounded());
            println!("{table}");
        }

        Commands::Import { path, category } => {
            if path.is_dir() {
                let report = app.import_folder(&path)?;
                println!(
                    "{} imported, {} failed",
                    report.success.to_string().green(),
                    report.failed.to_string().red()
                );
                for error in &report.errors {
                    eprintln!("  {}", error.as_str().red());
                }
            } else {
                let content = std::fs::read_to_string(&path)?;
                let probe = app.import(&content, category.as_deref())?;
                println!(
                    "imported {} as {} ({})",
                    probe.name.as_str().bold(),
                    probe.id,
                    probe.display_category()
                );
            }
        }

        Commands::Validate { path } => {
            let content = std::fs::read_to_string(&path)?;
            match app.validate(&content) {
                Ok(()) => println!("{}", "valid".green().bold()),
                Err(e) => {
                    println!("{} {e}", "invalid:".red().bold());
                    std::process::exit(1);
                }
            }
        }

        Commands::Scan {
            targets,
            probes,
            concurrency,
            timeout,
            rate_limit,
            proxy,
        } => {
            if targets.is_empty() {
                eprintln!("{}", "no targets given".red());
                std::process::exit(2);
            }

            let probe_ids: Vec<String> = match probes {
                Some(ids) => ids,
                None => app.list_all().into_iter().map(|p| p.id).collect(),
            };

            let options = ScanOptions {
                concurrency,
                timeout,
                rate_limit,
                bulk_size: settings.bulk_size,
                proxy_url: proxy.or_else(|| {
                    if settings.proxy_url.is_empty() {
                        None
                    } else {
                        Some(settings.proxy_url.clone())
                    }
                }),
            };

            let job_id = app.start_scan(targets, &probe_ids, options)?;
            println!("job {job_id} running");

            loop {
                tokio::time::sleep(Duration::from_millis(250)).await;
                let status = app.scan_status(&job_id)?;
                print!(
                    "\r{}/{} pairs, {} findings",
                    status.completed, status.total, status.found
                );
                use std::io::Write;
                std::io::stdout().flush().ok();
                if status.state.is_terminal() {
                    println!();
                    if status.state == JobState::Failed {
                        eprintln!(
                            "{} {}",
                            "scan failed:".red().bold(),
                            status.error.unwrap_or_default()
                        );
                        std::process::exit(1);
                    }
                    break;
                }
            }

            let results = app.scan_results(&job_id)?;
            for result in &results {
                println!(
                    "{} {} {} {}",
                    format!("[{}]", result.severity).red().bold(),
                    result.probe_name.as_str().bold(),
                    result.host,
                    result.matched.as_str().dimmed()
                );
            }
            println!("{} findings", results.len());
        }
    }

    app.shutdown();
    Ok(())
}
