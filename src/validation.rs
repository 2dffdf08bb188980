use crate::constants::{MAX_WORKERS, MIN_WORKERS};
use crate::error::{CompressionError, Result};
use std::path::Path;

/// Validate a user-supplied worker count
pub fn validate_concurrency(concurrency: usize) -> Result<usize> {
    if !(MIN_WORKERS..=MAX_WORKERS).contains(&concurrency) {
        return Err(CompressionError::InvalidConcurrency(
            concurrency,
            MIN_WORKERS,
            MAX_WORKERS,
        ));
    }
    Ok(concurrency)
}

/// Validate a filename suffix. It must stay inside the file name.
pub fn validate_suffix(suffix: &str) -> Result<()> {
    if suffix.contains('/') || suffix.contains('\\') || suffix.contains('\0') {
        return Err(CompressionError::InvalidSuffix(suffix.to_string()));
    }
    if suffix == "." || suffix == ".." {
        return Err(CompressionError::InvalidSuffix(suffix.to_string()));
    }
    Ok(())
}

/// Validate an output directory: it may not exist yet, but must not be a file.
pub fn validate_output_dir(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(CompressionError::Config(
            "output directory must not be empty".to_string(),
        ));
    }
    if path.exists() && !path.is_dir() {
        return Err(CompressionError::DirectoryCreationFailed(path.to_path_buf()));
    }
    Ok(())
}

/// Basic sanity check on an API key before it is stored or sent.
pub fn validate_api_key(key: &str) -> Result<()> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(CompressionError::MissingApiKey);
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(CompressionError::Config(
            "API key must not contain whitespace".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_concurrency() {
        assert_eq!(validate_concurrency(1).unwrap(), 1);
        assert_eq!(validate_concurrency(4).unwrap(), 4);
        assert!(matches!(
            validate_concurrency(0),
            Err(CompressionError::InvalidConcurrency(0, 1, 4))
        ));
        assert!(validate_concurrency(5).is_err());
    }

    #[test]
    fn test_validate_suffix() {
        assert!(validate_suffix(".tiny").is_ok());
        assert!(validate_suffix("-min").is_ok());
        assert!(validate_suffix("").is_ok());
        assert!(validate_suffix("../x").is_err());
        assert!(validate_suffix("a\\b").is_err());
        assert!(validate_suffix("..").is_err());
    }

    #[test]
    fn test_validate_output_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(validate_output_dir(temp_dir.path()).is_ok());
        assert!(validate_output_dir(&temp_dir.path().join("new")).is_ok());

        let file = temp_dir.path().join("file.txt");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            validate_output_dir(&file),
            Err(CompressionError::DirectoryCreationFailed(_))
        ));
        assert!(validate_output_dir(Path::new("")).is_err());
    }

    #[test]
    fn test_validate_api_key() {
        assert!(validate_api_key("abcDEF123").is_ok());
        assert!(matches!(
            validate_api_key("   "),
            Err(CompressionError::MissingApiKey)
        ));
        assert!(validate_api_key("abc def").is_err());
    }
}
