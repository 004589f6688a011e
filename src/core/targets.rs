// src/core/targets.rs

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::core::error::ConfigError;
use crate::core::models::{ScanTarget, TargetKind};

pub const IMAGE_PREFIX: &str = "image:";

/// Parses a command-line locator: `image:<ref>` for container images,
/// anything else is a filesystem path whose kind is read from disk.
pub fn parse_locator(locator: &str, recursive: bool) -> Result<ScanTarget, ConfigError> {
    match locator.strip_prefix(IMAGE_PREFIX) {
        Some(reference) => image(reference),
        None => from_path(Path::new(locator), recursive),
    }
}

pub fn image(reference: &str) -> Result<ScanTarget, ConfigError> {
    let reference = reference.trim();
    if reference.is_empty() || reference.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidImageRef(reference.to_string()));
    }
    Ok(ScanTarget::image(reference))
}

pub fn from_path(path: &Path, recursive: bool) -> Result<ScanTarget, ConfigError> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::TargetNotFound(path.to_path_buf()),
        _ => ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    if metadata.is_dir() {
        Ok(ScanTarget::directory(path, recursive))
    } else {
        Ok(ScanTarget::file(path))
    }
}

/// Checks that a target still matches what it claims to be.
pub fn validate(target: &ScanTarget) -> Result<(), ConfigError> {
    match target.kind {
        TargetKind::Image => image(&target.locator).map(|_| ()),
        TargetKind::File | TargetKind::Directory => {
            let path = PathBuf::from(&target.locator);
            let parsed = from_path(&path, target.recursive)?;
            match (target.kind, parsed.kind) {
                (TargetKind::File, TargetKind::Directory) => Err(ConfigError::NotAFile(path)),
                (TargetKind::Directory, TargetKind::File) => Err(ConfigError::NotADirectory(path)),
                _ => Ok(()),
            }
        }
    }
}

/// Files under a directory target in lexical path order. Without `recursive`
/// only the directory's immediate entries are listed.
///
/// Symlinks to regular files are listed under their link path; symlinked
/// directories are not descended into. Entries that cannot be read (dangling
/// links, unreadable subdirectories) are listed as well, so the scan attempts
/// them and records the failure.
pub fn expand_directory(target: &ScanTarget) -> Vec<ScanTarget> {
    let mut walker = WalkDir::new(&target.locator)
        .follow_links(false)
        .sort_by_file_name();
    if !target.recursive {
        walker = walker.max_depth(1);
    }

    let mut files: Vec<PathBuf> = Vec::new();
    let mut unreadable = 0usize;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(directory = %target.locator, error = %e, "Directory entry could not be read.");
                if let Some(path) = e.path() {
                    unreadable += 1;
                    files.push(path.to_path_buf());
                }
                continue;
            }
        };
        let file_type = entry.file_type();
        if file_type.is_file() {
            files.push(entry.into_path());
        } else if file_type.is_symlink() {
            match std::fs::metadata(entry.path()) {
                Ok(metadata) if metadata.is_file() => files.push(entry.into_path()),
                Ok(_) => debug!(path = %entry.path().display(), "Skipping symlink to a non-file."),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Symlink target could not be read.");
                    unreadable += 1;
                    files.push(entry.into_path());
                }
            }
        }
    }
    // Full-path sort so siblings and nested entries interleave lexically.
    files.sort();
    files.dedup();

    debug!(
        directory = %target.locator,
        recursive = target.recursive,
        files = files.len(),
        unreadable,
        "Expanded directory target."
    );
    files.into_iter().map(ScanTarget::file).collect()
}
