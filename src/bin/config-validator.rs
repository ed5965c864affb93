//! # Import Orchestrator Configuration Validator
//!
//! Command-line tool for checking configuration files and entity dependency
//! graphs before starting workers.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use import_orchestrator::config::{ConfigManager, ImportConfig};
use import_orchestrator::dependency::DependencyResolver;
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate import orchestrator configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment overlay to apply (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate every configuration section
    All,

    /// Validate one section (database, queue, locks, orchestration, scheduler, retry)
    Component { name: String },

    /// Validate an entity dependency graph file and print the import order
    Dependencies {
        /// TOML/YAML/JSON file with `[[entities]]` tables
        path: PathBuf,
    },

    /// Print the effective configuration as JSON
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all_config(&cli),
        Some(Commands::Component { name }) => validate_component(&cli, name),
        Some(Commands::Dependencies { path }) => validate_dependencies(path),
        Some(Commands::Show) => show_config(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<ImportConfig> {
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("loading configuration for environment '{}'", cli.environment))?;
    Ok(manager.config().clone())
}

fn validate_all_config(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating Import Orchestrator Configuration");
    println!("Environment: {}", cli.environment);
    if let Some(config_dir) = &cli.config_dir {
        println!("Config Directory: {}", config_dir.display());
    }
    println!();

    let config = load(cli)?;
    println!("✅ Configuration loaded and validated");

    for section in SECTIONS {
        describe_section(&config, section)?;
    }

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

const SECTIONS: [&str; 6] = ["database", "queue", "locks", "orchestration", "scheduler", "retry"];

fn validate_component(cli: &Cli, name: &str) -> anyhow::Result<()> {
    println!("🔧 Validating Component: {name}");
    let config = load(cli)?;
    describe_section(&config, &name.to_lowercase())?;
    println!("✅ Component '{name}' validation passed!");
    Ok(())
}

fn describe_section(config: &ImportConfig, section: &str) -> anyhow::Result<()> {
    match section {
        "database" => {
            if config.database.url.is_empty() {
                bail!("database.url is empty");
            }
            println!(
                "🗄️  Database: max_connections={}, run_migrations={}",
                config.database.max_connections, config.database.run_migrations
            );
        }
        "queue" => println!(
            "📬 Queue: max_concurrent={}, heartbeat every {}s, abandoned after {}s",
            config.queue.max_concurrent,
            config.queue.heartbeat_interval_seconds,
            config.queue.heartbeat_timeout_seconds
        ),
        "locks" => println!(
            "🔒 Locks: ttl={}s, attempts={}, backoff {}ms..{}ms x{}",
            config.locks.default_ttl_seconds,
            config.locks.max_acquire_attempts,
            config.locks.backoff_base_ms,
            config.locks.backoff_max_ms,
            config.locks.backoff_multiplier
        ),
        "orchestration" => println!(
            "🎼 Orchestration: {} phases, phase timeout {}s",
            config.orchestration.phase_count, config.orchestration.default_phase_timeout_seconds
        ),
        "scheduler" => println!(
            "⏰ Scheduler: tick every {}s, default reservation {}m",
            config.scheduler.tick_interval_seconds, config.scheduler.default_expected_duration_minutes
        ),
        "retry" => println!(
            "⏱️  Retry: {} transient retries, {}ms base backoff",
            config.retry.max_transient_retries, config.retry.transient_backoff_ms
        ),
        other => bail!("Unknown component: {other}"),
    }
    Ok(())
}

fn validate_dependencies(path: &PathBuf) -> anyhow::Result<()> {
    println!("🔗 Validating entity dependency graph: {}", path.display());
    let resolver = DependencyResolver::from_file(path)
        .with_context(|| format!("loading entity graph {}", path.display()))?;

    println!("✅ Graph is acyclic; import order:");
    for (index, entity) in resolver.global_order().iter().enumerate() {
        let parent = resolver
            .dependency(entity)
            .and_then(|d| d.depends_on.as_deref())
            .unwrap_or("-");
        println!("  {:>2}. {entity} (after {parent})", index + 1);
    }
    Ok(())
}

fn show_config(cli: &Cli) -> anyhow::Result<()> {
    let config = load(cli)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
