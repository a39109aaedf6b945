#![allow(clippy::module_name_repetitions)]
//! Canonical file paths inside the data directory.
//!
//! The data directory is injected by the caller (CLI flag or environment
//! variable); nothing here walks up from the binary or source location.

use std::path::{Path, PathBuf};

/// File name of the `DuckDB` store inside the data directory.
pub const STORE_FILE: &str = "geocode_store.duckdb";

/// Layout of a data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Creates a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the data directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the geocode store `DuckDB` file.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    /// Returns the `exports/` directory for CSV outputs.
    #[must_use]
    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    /// Returns the path of an export file by name.
    #[must_use]
    pub fn export_path(&self, file_name: &str) -> PathBuf {
        self.exports_dir().join(file_name)
    }
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.as_os_str().is_empty() && !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lays_out_files_under_root() {
        let paths = DataPaths::new("/srv/hh");
        assert_eq!(paths.store_path(), PathBuf::from("/srv/hh/geocode_store.duckdb"));
        assert_eq!(
            paths.export_path("final.csv"),
            PathBuf::from("/srv/hh/exports/final.csv")
        );
    }

    #[test]
    fn empty_parent_is_a_no_op() {
        ensure_dir(Path::new("")).unwrap();
    }
}
