use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use eisa_client::{ApiError, EisaClient, Record};
use eisa_core::config::{CONFIG_FILE_NAME, Settings, default_config_path};
use eisa_core::error::LoadError;
use eisa_core::pipeline::{
    FetchErrorPolicy, LoadProgress, LoadProgressCallback, Pipeline, ResourceLoad, ResourceStatus,
};
use eisa_core::report::{ReportFormat, generate_load_report};
use eisa_core::source::{Resource, eisa_source};
use futures::{Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

const CONFIG_TEMPLATE: &str = include_str!("../config/eisa.toml");

/// Set up the fmt subscriber on stderr: warnings by default, debug with `-v`.
pub fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> io::Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

// Settings helpers

/// Read settings from `config` (which must exist) or from the default
/// location (which may not), then overlay the process environment.
pub fn load_settings(config: Option<&PathBuf>) -> Result<Settings> {
    let mut settings = match config {
        Some(path) => Settings::load(path)?,
        None => Settings::load_or_default(&default_config_path())?,
    };
    settings.apply_process_env();
    Ok(settings)
}

/// Apply the `run` flags on top of file and environment settings.
pub fn apply_run_overrides(settings: &mut Settings, args: &ArgMatches) -> Result<()> {
    if let Some(dataset) = args.get_one::<String>("dataset") {
        settings.pipeline.dataset_name = dataset.clone();
    }
    if let Some(database) = args.get_one::<String>("database") {
        settings.pipeline.database = Some(database.clone());
    }
    if let Some(dir) = args.get_one::<String>("export-schema") {
        settings.pipeline.export_schema_path = dir.clone();
    }
    if let Some(policy) = args.get_one::<String>("on-fetch-error") {
        settings.pipeline.on_fetch_error = policy
            .parse::<FetchErrorPolicy>()
            .map_err(|e| anyhow!(e))?;
    }
    Ok(())
}

fn client_from(args: &ArgMatches) -> Result<(Settings, EisaClient)> {
    let settings = load_settings(args.get_one::<PathBuf>("config"))?;
    let client = settings.client()?;
    Ok((settings, client))
}

// init

/// Write the template config into `dir`. Returns `None` when the file already
/// exists and `force` is not set.
pub fn write_config_template(dir: &Path, force: bool) -> Result<Option<PathBuf>> {
    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() && !force {
        return Ok(None);
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
    fs::write(&path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(Some(path))
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  EISA INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let dir = args
        .get_one::<String>("PATH")
        .map(String::as_str)
        .unwrap_or("~/.config/eisa/");
    let force = args.get_flag("force");
    let expanded = shellexpand::tilde(dir);
    let config_dir = Path::new(expanded.as_ref());

    println!(
        "{} Target: {}",
        "→".blue(),
        config_dir.display().to_string().bright_white()
    );
    println!();

    let written = match write_config_template(config_dir, force)? {
        Some(path) => Some(path),
        None => {
            let existing = config_dir.join(CONFIG_FILE_NAME);
            println!("{}", "⚠ WARNING".yellow().bold());
            println!("Configuration file already exists:");
            println!(
                "  {} {}",
                "•".yellow(),
                existing.display().to_string().bright_white()
            );
            println!();

            let response = print_prompt("Overwrite it with the template? [y/N]:")?;
            println!();
            if response != "y" && response != "yes" {
                println!("{} Initialization cancelled.", "✗".red().bold());
                return Ok(());
            }
            write_config_template(config_dir, true)?
        }
    };

    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    if let Some(path) = written {
        println!(
            "{} Config file: {}",
            "✓".green().bold(),
            path.display().to_string().bright_white()
        );
    }
    println!(
        "{} Set [source].base_url (or EISA_BASE_URL) and credentials, then run {}",
        "ℹ".blue(),
        "eisa resources".bright_white()
    );
    println!();
    Ok(())
}

// resources

pub async fn handle_resources(args: &ArgMatches) -> Result<()> {
    let (_, client) = client_from(args)?;
    let catalog = client
        .get_resources()
        .await
        .context("Resource discovery failed")?;

    if catalog.is_empty() {
        println!("{} No resources exposed at {}", "ℹ".blue(), client.api_root());
        return Ok(());
    }

    let width = catalog.keys().map(String::len).max().unwrap_or(0);
    for (name, url) in &catalog {
        println!(
            "  {:<width$}  {} {}",
            name.bright_white().bold(),
            "→".blue(),
            url,
            width = width
        );
    }
    Ok(())
}

// fetch

/// Write each record as one JSON line. Stops after `limit` records, or at the
/// first stream error after flushing what was written.
pub async fn write_json_lines<S, W>(records: S, out: &mut W, limit: Option<usize>) -> Result<usize>
where
    S: Stream<Item = Result<Record, ApiError>>,
    W: Write,
{
    let mut records = pin!(records);
    let mut written = 0;

    while limit.is_none_or(|max| written < max) {
        let Some(item) = records.next().await else {
            break;
        };
        match item {
            Ok(record) => {
                serde_json::to_writer(&mut *out, &record)?;
                out.write_all(b"\n")?;
                written += 1;
            }
            Err(e) => {
                out.flush()?;
                return Err(e).context(format!("Stream ended after {} records", written));
            }
        }
    }

    out.flush()?;
    Ok(written)
}

pub async fn handle_fetch(args: &ArgMatches) -> Result<()> {
    let (_, client) = client_from(args)?;
    let name = args
        .get_one::<String>("RESOURCE")
        .ok_or_else(|| anyhow!("RESOURCE is required"))?;
    let limit = args.get_one::<usize>("limit").copied();

    let catalog = client
        .get_resources()
        .await
        .context("Resource discovery failed")?;
    let url = catalog
        .get(name)
        .ok_or_else(|| LoadError::UnknownResource(name.clone()))?;
    let resource = Resource::new(&client, name, url)?;

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let written = write_json_lines(resource.records(&client), &mut out, limit).await?;
    tracing::info!("Wrote {} records of {}", written, name);
    Ok(())
}

// run

fn progress_spinner() -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

fn spinner_callback(spinner: ProgressBar) -> LoadProgressCallback {
    Arc::new(move |event: &LoadProgress| match event {
        LoadProgress::ResourceStarted { resource } => {
            spinner.set_message(format!("Loading {}...", resource));
        }
        LoadProgress::RecordsLoaded { resource, records } => {
            spinner.set_message(format!("Loading {}... {} records", resource, records));
        }
        LoadProgress::ResourceFinished(load) => {
            spinner.println(finished_line(load));
        }
    })
}

/// The line printed above the spinner once a resource is done.
pub fn finished_line(load: &ResourceLoad) -> String {
    let mark = match load.status {
        ResourceStatus::Loaded => "✓".green().bold(),
        ResourceStatus::Truncated { .. } => "⚠".yellow().bold(),
        ResourceStatus::Failed { .. } => "✗".red().bold(),
    };
    format!("{} {} ({} records)", mark, load.name, load.records)
}

pub async fn handle_run(args: &ArgMatches) -> Result<()> {
    let (mut settings, client) = client_from(args)?;
    apply_run_overrides(&mut settings, args)?;
    let format = args
        .get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Text);
    let selected: Vec<String> = args
        .get_many::<String>("resource")
        .map(|names| names.cloned().collect())
        .unwrap_or_default();

    let spinner = progress_spinner()?;
    spinner.set_message(format!("Discovering resources at {}", client.api_root()));

    let source = match eisa_source(&client).await {
        Ok(source) => source,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e).context("Resource discovery failed");
        }
    };
    let source = match source.with_resources(&selected) {
        Ok(source) => source,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e.into());
        }
    };

    let config = settings.pipeline_config();
    let mut pipeline = Pipeline::new(config)
        .with_context(|| format!("Failed to open {}", settings.database_path().display()))?;
    let result = pipeline
        .run(&client, &source, Some(spinner_callback(spinner.clone())))
        .await;
    spinner.finish_and_clear();
    let info = result?;

    println!("{}", generate_load_report(&info, format)?);

    if info.has_failures() {
        let failed: Vec<&str> = info.failed().map(|r| r.name.as_str()).collect();
        bail!("{} resource(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}
