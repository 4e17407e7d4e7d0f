use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use health_etl::{db, EtlConfig, Pipeline, RunOutcome, RunReport};

#[derive(Parser, Debug)]
#[command(name = "health-etl", version, about = "Loads health indicator workbooks into SQLite")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline for one workbook
    Import {
        /// Indicator workbook (xlsx / xls / ods)
        #[arg(long)]
        workbook: PathBuf,

        /// Municipality registry CSV (default: <data-dir>/municipios.csv)
        #[arg(long)]
        registry: Option<PathBuf>,

        #[arg(long, default_value = "health_indicators.db")]
        database: PathBuf,

        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[arg(long)]
        indicators_dir: Option<PathBuf>,

        /// JSON config file; flags override its paths
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print row counts and loaded indicators
    Summary {
        #[arg(long, default_value = "health_indicators.db")]
        database: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Import {
            workbook,
            registry,
            database,
            data_dir,
            indicators_dir,
            config,
        } => load_config(config.as_deref(), registry, data_dir, indicators_dir)
            .and_then(|config| run_import(config, &workbook, &database)),
        Command::Summary { database } => run_summary(&database).map(|_| 0),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("❌ {:#}", err);
            std::process::exit(RunOutcome::Aborted.exit_code());
        }
    }
}

fn load_config(
    path: Option<&Path>,
    registry: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    indicators_dir: Option<PathBuf>,
) -> Result<EtlConfig> {
    let mut config = match path {
        Some(path) => EtlConfig::load(path)?,
        None => EtlConfig::default(),
    };

    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    if let Some(dir) = indicators_dir {
        config.indicators_dir = dir;
    }
    if let Some(registry) = registry {
        // an absolute path replaces data_dir when joined
        let registry = std::env::current_dir()
            .context("Failed to resolve current directory")?
            .join(registry);
        config.registry_file = registry.display().to_string();
    }

    config.validate()?;
    Ok(config)
}

fn run_import(config: EtlConfig, workbook: &Path, database: &Path) -> Result<i32> {
    println!("🏥 Health Indicator ETL - Workbook → SQLite");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n🔧 Setting up database...");
    let mut conn = Connection::open(database)
        .with_context(|| format!("Failed to open database: {}", database.display()))?;
    db::setup_database(&conn)?;
    println!("✓ Database ready at {}", database.display());

    println!("\n📂 Processing {}...", workbook.display());
    let report = Pipeline::new(config).run(workbook, &mut conn)?;

    print_report(&report);
    let counts = db::table_counts(&conn)?;
    println!(
        "\n🔍 Store: {} macro-regions, {} regions, {} municipalities, {} indicators, {} values",
        counts.macro_regions,
        counts.health_regions,
        counts.municipalities,
        counts.indicators,
        counts.indicator_values
    );

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    match report.outcome {
        RunOutcome::Completed => println!("🎉 Import COMPLETE!"),
        RunOutcome::Partial => println!("⚠️  Import completed with {} sheet(s) skipped", report.skipped_sheets.len()),
        RunOutcome::Aborted => println!("❌ Import ABORTED: {}", report.failure.as_deref().unwrap_or("unknown error")),
    }

    Ok(report.outcome.exit_code())
}

fn print_report(report: &RunReport) {
    println!("✓ Run {}", report.run_id);
    if let Some(fingerprint) = &report.fingerprint {
        println!("✓ Workbook sha256 {}", fingerprint);
    }
    println!(
        "✓ {} indicator sheets, {} exported",
        report.sheets_found,
        report.sheets_exported.len()
    );
    for skipped in &report.skipped_sheets {
        println!("  ⏭️  {} - {}", skipped.sheet, skipped.reason);
    }

    println!("\n💾 Import phases:");
    for phase in &report.phases {
        println!(
            "✓ {:<11} {} created, {} existing, {} unresolved, {} skipped",
            phase.phase.name(),
            phase.created,
            phase.existing,
            phase.unresolved,
            phase.skipped
        );
    }
}

fn run_summary(database: &Path) -> Result<()> {
    if !database.exists() {
        eprintln!("❌ Database not found!");
        eprintln!("   Run: health-etl import --workbook <file>");
        eprintln!("   to load a workbook first.");
        std::process::exit(1);
    }

    let conn = Connection::open(database)
        .with_context(|| format!("Failed to open database: {}", database.display()))?;
    let counts = db::table_counts(&conn)?;

    println!("📊 {}", database.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Macro-regions:    {}", counts.macro_regions);
    println!("Health regions:   {}", counts.health_regions);
    println!("Municipalities:   {}", counts.municipalities);
    println!("Indicators:       {}", counts.indicators);
    println!("Indicator values: {}", counts.indicator_values);

    let indicators = db::list_indicators(&conn)?;
    if !indicators.is_empty() {
        println!("\n📈 Indicators:");
    }
    for indicator in indicators {
        let target = indicator
            .state_target()
            .map(|t| format!(" (meta {})", t))
            .unwrap_or_default();
        println!("  {:<14} {}{}", indicator.file_key, indicator.title, target);
    }

    Ok(())
}
