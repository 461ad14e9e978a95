//! Translation manager command line
//!
//! Usage:
//!   translation-manager generate                    # Scan sources and seed lang/<locale>.json
//!   translation-manager import [--force]            # Load lang/ files into the database
//!   translation-manager publish                     # Write the database out to lang/
//!   translation-manager export-csv [FILE]           # Export all translations as CSV
//!   translation-manager import-csv FILE [--keep-existing]
//!   translation-manager serve                       # Run the HTTP server

use anyhow::{Context, Result};
use chrono::Local;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::info;
use translation_manager::{config::Config, csv_bridge, db::Database, i18n::LocaleRegistry, pipeline, server};

fn print_usage() {
    println!("Usage: translation-manager <command> [options]");
    println!();
    println!("Commands:");
    println!("  generate                         Scan source files and add new keys to lang/<locale>.json");
    println!("  import [--force]                 Import lang/ files into the database");
    println!("                                   (--force overwrites stored values)");
    println!("  publish                          Write stored translations to lang/");
    println!("  export-csv [FILE]                Export all translations to a CSV file");
    println!("  import-csv FILE [--keep-existing]");
    println!("                                   Import a CSV file (--keep-existing only fills gaps)");
    println!("  serve                            Start the HTTP server");
}

fn generate_command(config: &Config) -> Result<()> {
    let results = pipeline::generate(config)?;

    for result in &results {
        println!("  {}: {} new keys", result.locale, result.new_keys);
    }
    println!("Translation files generated for {} locales", results.len());
    Ok(())
}

async fn import_command(config: &Config, force: bool) -> Result<()> {
    let db = Database::new(&config.database_url).await?;
    let report = pipeline::import(config, &db, force).await?;

    for locale in &report.locales {
        println!("  {}: {} translations", locale.locale, locale.processed);
    }
    println!("Imported {} translations in total", report.total);
    Ok(())
}

async fn publish_command(config: &Config) -> Result<()> {
    let db = Database::new(&config.database_url).await?;
    let published = pipeline::publish(config, &db).await?;

    for locale in &published {
        println!("  Published {} ({} files)", locale.locale, locale.files.len());
    }
    if published.is_empty() {
        println!("Nothing to publish, the database has no translations");
    }
    Ok(())
}

async fn export_csv_command(config: &Config, path: Option<&str>) -> Result<()> {
    let db = Database::new(&config.database_url).await?;
    let path = path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(csv_bridge::export_file_name(Local::now().naive_local())));

    let file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let locales = LocaleRegistry::from_config(config).codes();
    csv_bridge::export_to_writer(&db, &locales, BufWriter::new(file)).await?;

    println!("Exported {} translations to {}", db.count().await?, path.display());
    Ok(())
}

async fn import_csv_command(config: &Config, path: &str, overwrite: bool) -> Result<()> {
    let db = Database::new(&config.database_url).await?;
    let file = std::fs::File::open(path).with_context(|| format!("Unable to read CSV {}", path))?;

    let rows = csv_bridge::import_csv(&db, std::io::BufReader::new(file), overwrite).await?;

    println!("Processed {} rows", rows);
    Ok(())
}

async fn serve_command(config: Config) -> Result<()> {
    let db = Database::new(&config.database_url).await?;
    server::serve(config, db).await
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored when absent)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("translation_manager=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let command = &args[1];
    let flags = &args[2..];
    let has_flag = |flag: &str| flags.iter().any(|a| a == flag);
    let positional = flags.iter().find(|a| !a.starts_with("--")).map(String::as_str);

    if matches!(command.as_str(), "--help" | "-h" | "help") {
        print_usage();
        return Ok(());
    }

    let config = Config::from_env()?;
    info!("Running {} ({} locales configured)", command, config.locales.len());

    match command.as_str() {
        "generate" => generate_command(&config),
        "import" => import_command(&config, has_flag("--force")).await,
        "publish" => publish_command(&config).await,
        "export-csv" => export_csv_command(&config, positional).await,
        "import-csv" => {
            let Some(path) = positional else {
                eprintln!("import-csv requires a FILE argument");
                print_usage();
                std::process::exit(1);
            };
            import_csv_command(&config, path, !has_flag("--keep-existing")).await
        }
        "serve" => serve_command(config).await,
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            std::process::exit(1);
        }
    }
}
