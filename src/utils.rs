//! Utility functions for common operations
//!
//! This module contains helper functions that are used across multiple modules
//! to reduce code duplication and improve maintainability.

use crate::constants::{SUPPORTED_IMAGE_EXTENSIONS, TEMP_FILE_PREFIX};
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

/// Check if a file path represents a supported image file
///
/// # Arguments
/// * `path` - The file path to check
///
/// # Returns
/// * `true` if the file has a supported image extension, `false` otherwise
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext_lower = ext.to_lowercase();
            SUPPORTED_IMAGE_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Format file size in human-readable format
///
/// # Arguments
/// * `bytes` - Size in bytes
///
/// # Returns
/// * Human-readable size string (e.g., "1.2 MB", "512 KB")
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Calculate compression ratio as a percentage
///
/// # Arguments
/// * `original_size` - Original file size in bytes
/// * `compressed_size` - Compressed file size in bytes
///
/// # Returns
/// * Compression ratio as percentage (positive means reduction, negative means increase)
pub fn calculate_compression_ratio(original_size: u64, compressed_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    ((original_size as f64 - compressed_size as f64) / original_size as f64) * 100.0
}

/// Shorten a path for table output, keeping the tail.
pub fn shorten_path(path: &Path, max_chars: usize) -> String {
    let display = path.display().to_string();
    let count = display.chars().count();
    if count <= max_chars || max_chars <= 3 {
        return display;
    }
    let tail: String = display.chars().skip(count - (max_chars - 3)).collect();
    format!("...{}", tail)
}

/// One spelling per file: the canonical path when it resolves, otherwise the
/// absolute path with `.` components dropped.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    absolute
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

/// Replace `path` with `contents` through a sibling temp file, so readers never
/// see a half-written file.
pub fn write_atomically(path: &Path, contents: &[u8], mode: Option<u32>) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut staged = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .tempfile_in(dir)?;
    staged.write_all(contents)?;
    staged.as_file().sync_all()?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        staged
            .as_file()
            .set_permissions(fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}
