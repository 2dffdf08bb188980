use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::process::ExitCode;
use tiny_squeeze::cli::{Args, Commands, CompressArgs, ConfigCommand};
use tiny_squeeze::constants::{INFO_PREFIX, SUCCESS_PREFIX, WARNING_PREFIX};
use tiny_squeeze::utils::format_file_size;
use tiny_squeeze::validation::{validate_api_key, validate_concurrency};
use tiny_squeeze::{
    collect_image_files, logger, run_batch, say, shout, CompressionError, HistoryManager,
    Pipeline, Settings, ShrinkClient,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logger::init(args.quiet, args.verbose);

    match run(args.command).await {
        Ok(code) => code,
        Err(err) => {
            shout!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Compress(args) => compress(args).await,
        Commands::ValidateKey => {
            validate_key().await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config(command) => {
            configure(command)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::History { csv, json, limit } => {
            show_history(csv, json, limit)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn read_stdin_paths() -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line.context("failed to read paths from stdin")?;
        let line = line.trim();
        if !line.is_empty() {
            paths.push(line.to_string());
        }
    }
    Ok(paths)
}

async fn compress(args: CompressArgs) -> Result<ExitCode> {
    let settings = Settings::load()?;
    if !settings.is_configured() {
        return Err(CompressionError::MissingApiKey.into());
    }

    let concurrency = match args.jobs {
        Some(jobs) => validate_concurrency(jobs)?,
        None => settings.concurrency,
    };
    let policy = args.output_policy(&settings)?;

    let mut inputs = args.paths.clone();
    if args.stdin {
        let stdin_paths = tokio::task::spawn_blocking(read_stdin_paths).await??;
        inputs.extend(stdin_paths);
    }
    if inputs.is_empty() {
        bail!("no input paths given (pass files, directories or patterns, or use --stdin)");
    }

    let scan = collect_image_files(&inputs, !args.no_recursive);
    for err in &scan.errors {
        say!("{} {}", WARNING_PREFIX, err);
    }
    if scan.images.is_empty() {
        return Err(CompressionError::NoImageFilesFound(inputs.join(" ")).into());
    }
    say!("{} Found {} image files", INFO_PREFIX, scan.images.len());

    let history = if args.no_history {
        None
    } else {
        match HistoryManager::open_default() {
            Ok(history) => Some(history),
            Err(err) => {
                warn!(error = %err, "History unavailable, continuing without it");
                None
            }
        }
    };

    let pipeline = Pipeline::with_api_key(settings.api_key.clone(), policy)?;
    pipeline.configure(concurrency);

    let report = run_batch(&pipeline, scan.images, history.as_ref()).await?;
    if report.has_failures() || report.interrupted {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn validate_key() -> Result<()> {
    let settings = Settings::load()?;
    if !settings.is_configured() {
        return Err(CompressionError::MissingApiKey.into());
    }

    let client = ShrinkClient::new(settings.api_key.clone())?;
    client
        .validate_key(&CancellationToken::new())
        .await
        .context("API key was not accepted")?;
    say!("{} API key {} is valid", SUCCESS_PREFIX, settings.masked_api_key());
    Ok(())
}

fn configure(command: ConfigCommand) -> Result<()> {
    let path = Settings::default_path()?;
    let mut settings = Settings::load_file(&path)?;

    match command {
        ConfigCommand::SetKey { key } => {
            validate_api_key(&key)?;
            settings.api_key = key.trim().to_string();
            let saved = settings.save()?;
            say!("{} API key saved to {}", SUCCESS_PREFIX, saved.display());
        }
        ConfigCommand::Set { field, value } => {
            settings.set_field(&field, &value)?;
            let saved = settings.save()?;
            say!("{} {} updated in {}", SUCCESS_PREFIX, field, saved.display());
        }
        ConfigCommand::Show => {
            println!("{} Settings ({})", INFO_PREFIX, path.display());
            println!("  api_key:     {}", settings.masked_api_key());
            println!("  output_mode: {}", settings.output_mode);
            println!(
                "  output_dir:  {}",
                settings
                    .output_dir
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            println!("  suffix:      {:?}", settings.suffix);
            println!("  metadata:    {}", settings.metadata);
            println!("  concurrency: {}", settings.concurrency);
        }
    }
    Ok(())
}

fn show_history(
    csv: Option<std::path::PathBuf>,
    json: Option<std::path::PathBuf>,
    limit: usize,
) -> Result<()> {
    let history = HistoryManager::open_default()?;

    if let Some(path) = csv {
        history.export_csv(&path)?;
        say!("{} Exported {} entries to {}", SUCCESS_PREFIX, history.len(), path.display());
        return Ok(());
    }
    if let Some(path) = json {
        history.export_json(&path)?;
        say!("{} Exported {} entries to {}", SUCCESS_PREFIX, history.len(), path.display());
        return Ok(());
    }

    let records = history.all();
    if records.is_empty() {
        println!("{} No compression history yet", INFO_PREFIX);
        return Ok(());
    }
    for record in records.iter().rev().take(limit) {
        println!(
            "{}  {:<9} {:>10} -> {:<10} {:>6.1}%  {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.status,
            format_file_size(record.before_size),
            format_file_size(record.after_size),
            record.saved_percent,
            record.file.display()
        );
    }
    Ok(())
}
