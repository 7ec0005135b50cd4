//! Directory scanner: enumerates the regular files under a scan root.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::{debug, error, info};

use crate::error::ScanError;

/// A file found by [`scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path on disk (scan root joined with `relative`).
    pub path: PathBuf,
    /// Path relative to the scan root.
    pub relative: PathBuf,
}

impl FileEntry {
    /// The relative path with `/` separators, as used in object keys.
    pub fn relative_key(&self) -> String {
        self.relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Lists every regular file under `root`, in the order the filesystem yields them.
/// Directories are descended into but never returned.
///
/// Nothing is filtered: hidden files and anything a `.gitignore` would exclude are
/// published too. Symbolic links are never followed while walking. A link to a file
/// is published with the target's content; a link to a directory is skipped.
///
/// A root that does not exist or cannot be read is an error, not an empty result, and
/// so is any entry below it that cannot be read or resolved.
pub fn scan(root: &Path) -> Result<Vec<FileEntry>, ScanError> {
    info!(root = %root.display(), "Scanning directory for upload");

    if let Err(source) = std::fs::read_dir(root) {
        error!(error = %source, root = %root.display(), "Scan root is not a readable directory");
        return Err(ScanError::ReadDir {
            path: root.to_path_buf(),
            source,
        });
    }

    let mut builder = WalkBuilder::new(root);
    builder.standard_filters(false);
    builder.follow_links(false);

    let mut entries = Vec::new();
    for result in builder.build() {
        let entry = result.map_err(|source| {
            error!(error = %source, root = %root.display(), "Directory scan failed");
            ScanError::Walk {
                root: root.to_path_buf(),
                source,
            }
        })?;
        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path();
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            continue;
        }

        let is_file = if file_type.is_symlink() {
            let target = std::fs::metadata(path).map_err(|source| {
                error!(error = %source, path = %path.display(), "Cannot resolve symbolic link");
                ScanError::Metadata {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            if target.is_dir() {
                debug!(path = %path.display(), "Skipping link to directory");
            }
            target.is_file()
        } else {
            file_type.is_file()
        };
        if !is_file {
            debug!(path = %path.display(), "Skipping non-regular entry");
            continue;
        }

        // the walker yields paths under `root`
        let relative = match path.strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        debug!(path = %path.display(), "Found file");
        entries.push(FileEntry {
            path: path.to_path_buf(),
            relative,
        });
    }

    info!(count = entries.len(), root = %root.display(), "Completed directory scan");
    Ok(entries)
}

/// Joins `prefix` and a `/`-separated relative path into an object key.
///
/// Empty segments are dropped, so a trailing `/` on the prefix (or an empty prefix)
/// never produces `//` or a leading `/`.
pub fn object_key(prefix: &str, relative: &str) -> String {
    prefix
        .split('/')
        .chain(relative.split('/'))
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
