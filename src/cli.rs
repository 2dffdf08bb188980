use crate::config::Settings;
use crate::error::Result;
use crate::output::OutputPolicy;
use crate::validation::{validate_output_dir, validate_suffix};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tiny-squeeze",
    about = "Batch image compression through the TinyPNG API",
    long_about = "tiny-squeeze sends PNG, JPEG and WebP images to the TinyPNG shrink API with a small \
                  pool of workers. Results are staged in temporary files and moved into place in one \
                  step, so an interrupted run never leaves a half-written image behind.",
    version,
    after_help = "EXAMPLES:\n  \
    tiny-squeeze config set-key <KEY>\n  \
    tiny-squeeze compress ./photos -j 4\n  \
    tiny-squeeze compress \"./shots/*.png\" --output-dir ./compressed\n  \
    find . -name '*.jpg' | tiny-squeeze compress --stdin --in-place\n  \
    tiny-squeeze history --csv history.csv"
)]
pub struct Args {
    #[arg(short, long, global = true, help = "Only print errors")]
    pub quiet: bool,

    #[arg(short, long, global = true, help = "Print per-file details and debug logs")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Compress images",
        long_about = "Compress files, directories and glob patterns. Directories are searched \
                      recursively unless --no-recursive is given; hidden files are skipped."
    )]
    Compress(CompressArgs),

    #[command(about = "Check that the configured API key is accepted")]
    ValidateKey,

    #[command(subcommand, about = "Show or change stored settings")]
    Config(ConfigCommand),

    #[command(about = "Show or export the compression history")]
    History {
        #[arg(long, value_name = "PATH", conflicts_with = "json", help = "Export history as CSV")]
        csv: Option<PathBuf>,

        #[arg(long, value_name = "PATH", help = "Export history as JSON")]
        json: Option<PathBuf>,

        #[arg(short = 'n', long, default_value_t = 20, help = "Number of recent entries to list")]
        limit: usize,
    },
}

#[derive(ClapArgs, Debug)]
pub struct CompressArgs {
    #[arg(help = "Image files, directories or glob patterns")]
    pub paths: Vec<String>,

    #[arg(long, help = "Also read paths from standard input, one per line")]
    pub stdin: bool,

    #[arg(
        short = 'o',
        long,
        value_name = "DIR",
        help = "Write results into this directory"
    )]
    pub output_dir: Option<PathBuf>,

    #[arg(
        short = 's',
        long,
        conflicts_with = "in_place",
        allow_hyphen_values = true,
        help = "Suffix inserted before the extension (default from settings: .tiny)"
    )]
    pub suffix: Option<String>,

    #[arg(long, conflicts_with = "output_dir", help = "Overwrite the original files")]
    pub in_place: bool,

    #[arg(
        short = 'j',
        long,
        help = "Number of parallel uploads (1-4)",
        long_help = "Number of parallel uploads. Values outside 1-4 are rejected; \
                     defaults to the concurrency setting."
    )]
    pub jobs: Option<usize>,

    #[arg(long, help = "Do not descend into subdirectories")]
    pub no_recursive: bool,

    #[arg(long, help = "Do not record this run in the history")]
    pub no_history: bool,
}

impl CompressArgs {
    /// Output rules for this run: stored settings, overridden by the flags.
    pub fn output_policy(&self, settings: &Settings) -> Result<OutputPolicy> {
        if self.in_place {
            return Ok(OutputPolicy::in_place());
        }

        let mut policy = settings.output_policy();
        if let Some(dir) = &self.output_dir {
            validate_output_dir(dir)?;
            policy.output_dir = Some(dir.clone());
        }
        if let Some(suffix) = &self.suffix {
            validate_suffix(suffix)?;
            policy.suffix = Some(suffix.clone()).filter(|s| !s.is_empty());
        }
        Ok(policy)
    }
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    #[command(about = "Store the TinyPNG API key")]
    SetKey {
        #[arg(help = "API key from tinypng.com/developers")]
        key: String,
    },

    #[command(about = "Print the current settings")]
    Show,

    #[command(about = "Change one setting (output_mode, output_dir, suffix, metadata, concurrency)")]
    Set {
        field: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
}
