use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use orders_analytics::config::EtlConfig;
use orders_analytics::infra::{CsvTableSource, FileArtifactSink};
use orders_analytics::observability::init_logging;
use orders_analytics::Pipeline;

#[derive(Parser)]
#[command(name = "orders-analytics")]
#[command(about = "Validate, clean, enrich and join the orders and users tables")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write every artifact
    Run {
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Project root; overrides ETL_ROOT and the config file
        #[arg(long)]
        root: Option<PathBuf>,
        /// Skip the grouped revenue report
        #[arg(long)]
        no_summary: bool,
    },
    /// Print the resolved configuration
    ShowConfig {
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Project root; overrides ETL_ROOT and the config file
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            root,
            no_summary,
        } => {
            let mut config = EtlConfig::resolve(config.as_deref(), root).context("Failed to resolve configuration")?;
            if no_summary {
                config.report.enabled = false;
            }

            let _guard = init_logging(&config.paths.log_dir)
                .with_context(|| format!("Failed to initialize logging in {}", config.paths.log_dir.display()))?;
            info!("Resolved project root {}", config.paths.root.display());

            let source = CsvTableSource::new(&config.paths.raw_orders, &config.paths.raw_users);
            let sink = FileArtifactSink::from_paths(&config.paths, &config.report.summary.file_name);

            println!("🚀 Running orders analytics pipeline...");
            let output = match Pipeline::new(config.clone()).run_and_persist(&source, &sink) {
                Ok(output) => output,
                Err(e) => {
                    error!("Pipeline failed: {}", e);
                    println!("❌ Pipeline failed: {}", e);
                    return Err(e).context("Pipeline run aborted; no artifacts were written");
                }
            };

            let meta = &output.metadata;
            println!("\n📊 Run {}:", meta.run_id);
            println!("   Orders in: {}", meta.rows_in_orders_raw);
            println!("   Users in: {}", meta.rows_in_users);
            println!("   Analytics rows: {}", meta.rows_out_analytics);
            if let Some(missing) = meta.missing_created_at {
                println!("   Missing timestamps: {}", missing);
            }
            if let Some(rate) = meta.join_match_rate {
                println!("   Join match rate: {:.1}%", rate * 100.0);
            }
            if let Some(outliers) = meta.amount_outliers {
                println!("   Amount outliers: {}", outliers);
            }
            for (column, failures) in meta.parse_failures.iter().filter(|(_, n)| **n > 0) {
                println!("   ⚠️  Unparseable {}: {}", column, failures);
            }
            println!("💾 Analytics table: {}", config.paths.out_analytics.display());
            println!("💾 Run metadata: {}", sink.run_meta_path().display());
            if output.summary.is_some() {
                println!("💾 Summary report: {}", sink.path_for(orders_analytics::app::Artifact::Summary).display());
            }
            println!("✅ Pipeline completed successfully!");
        }
        Commands::ShowConfig { config, root } => {
            let config = EtlConfig::resolve(config.as_deref(), root).context("Failed to resolve configuration")?;
            for (key, value) in config.snapshot() {
                println!("{key} = {value}");
            }
        }
    }

    Ok(())
}
