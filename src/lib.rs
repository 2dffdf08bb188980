pub mod logger;

pub mod batch;
pub mod cli;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod gate;
pub mod history;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod utils;
pub mod validation;

pub use batch::{collect_image_files, run_batch, BatchReport, ScanResults};
pub use client::{Compressed, RetryPolicy, ShrinkClient, Shrinker};
pub use config::{OutputMode, Settings};
pub use error::{CompressionError, ErrorKind, Result};
pub use history::{HistoryManager, HistoryRecord};
pub use job::{Job, JobFailure, JobId, JobStatus};
pub use output::{generate_output_path, OutputPolicy};
pub use pipeline::{AddOutcome, Pipeline, RunSummary};
pub use utils::is_image_file;
