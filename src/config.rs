use crate::constants::{
    APP_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_SUFFIX, DEFAULT_WORKERS, ENV_API_KEY,
};
use crate::error::{CompressionError, Result};
use crate::output::OutputPolicy;
use crate::utils::write_atomically;
use crate::validation::{validate_api_key, validate_concurrency, validate_output_dir, validate_suffix};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Write next to the input (overwriting it when no suffix is set).
    #[default]
    Replace,
    /// Write into `output_dir`.
    Directory,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Replace => f.write_str("replace"),
            OutputMode::Directory => f.write_str("directory"),
        }
    }
}

impl FromStr for OutputMode {
    type Err = CompressionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "replace" => Ok(OutputMode::Replace),
            "directory" | "dir" => Ok(OutputMode::Directory),
            _ => Err(CompressionError::Config(format!(
                "unknown output mode {:?}, expected replace or directory",
                s
            ))),
        }
    }
}

/// Persistent user settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_key: String,
    pub output_mode: OutputMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    pub suffix: String,
    /// Declared for compatibility; metadata is not preserved yet.
    pub metadata: bool,
    pub concurrency: usize,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            output_mode: OutputMode::Replace,
            output_dir: None,
            suffix: DEFAULT_SUFFIX.to_string(),
            metadata: false,
            concurrency: DEFAULT_WORKERS,
            path: None,
        }
    }
}

impl Settings {
    /// `<config dir>/tiny-squeeze/config.json`
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| {
            CompressionError::Config("could not determine the user config directory".to_string())
        })?;
        Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Reads settings from `path`, falling back to defaults when the file does
    /// not exist. `TINYPNG_API_KEY` overrides the stored key either way.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut settings = Self::load_file(path)?;
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            if !key.trim().is_empty() {
                settings.api_key = key.trim().to_string();
            }
        }
        Ok(settings)
    }

    /// Settings exactly as stored, ignoring the environment. Used when the
    /// result is going to be written back.
    pub fn load_file(path: &Path) -> Result<Self> {
        let mut settings = match fs::read(path) {
            Ok(data) => serde_json::from_slice::<Settings>(&data)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file, using defaults");
                Settings::default()
            }
            Err(err) => return Err(err.into()),
        };
        settings.path = Some(path.to_path_buf());
        Ok(settings)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Writes the settings back where they were loaded from (or the default
    /// location), with owner-only permissions.
    pub fn save(&self) -> Result<PathBuf> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => Self::default_path()?,
        };
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(
                    dir,
                    fs::Permissions::from_mode(crate::constants::CONFIG_DIR_MODE),
                )?;
            }
        }

        let data = serde_json::to_vec_pretty(self)?;
        #[cfg(unix)]
        let mode = Some(crate::constants::CONFIG_FILE_MODE);
        #[cfg(not(unix))]
        let mode = None;
        write_atomically(path, &data, mode)?;
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Output rules the pipeline should apply under these settings.
    pub fn output_policy(&self) -> OutputPolicy {
        let suffix = Some(self.suffix.clone()).filter(|s| !s.is_empty());
        match (self.output_mode, &self.output_dir) {
            (OutputMode::Directory, Some(dir)) => OutputPolicy::into_dir(dir.clone(), suffix),
            _ => OutputPolicy {
                output_dir: None,
                suffix,
            },
        }
    }

    /// Updates one field from its textual form, as used by `config set`.
    pub fn set_field(&mut self, field: &str, value: &str) -> Result<()> {
        match field {
            "api_key" | "api-key" => {
                validate_api_key(value)?;
                self.api_key = value.trim().to_string();
            }
            "output_mode" | "output-mode" => self.output_mode = value.parse()?,
            "output_dir" | "output-dir" => {
                if value.is_empty() {
                    self.output_dir = None;
                } else {
                    let dir = PathBuf::from(value);
                    validate_output_dir(&dir)?;
                    self.output_dir = Some(dir);
                }
            }
            "suffix" => {
                validate_suffix(value)?;
                self.suffix = value.to_string();
            }
            "metadata" => {
                self.metadata = value.parse().map_err(|_| {
                    CompressionError::Config(format!("metadata expects true or false, got {:?}", value))
                })?;
            }
            "concurrency" => {
                let n = value.parse().map_err(|_| {
                    CompressionError::Config(format!("concurrency expects a number, got {:?}", value))
                })?;
                self.concurrency = validate_concurrency(n)?;
            }
            other => {
                return Err(CompressionError::Config(format!("unknown setting {:?}", other)));
            }
        }
        Ok(())
    }

    /// Key with everything but the last four characters masked.
    pub fn masked_api_key(&self) -> String {
        let key = self.api_key.trim();
        if key.is_empty() {
            return "(not set)".to_string();
        }
        let visible: String = key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("{}{}", "*".repeat(key.chars().count().saturating_sub(4)), visible)
    }
}
