//! Package discovery below a base directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stratum_lang::load::{package_names, source_files, MODULE_DIR};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{TemplateError, TemplateResult};

/// How far below the base directory packages are looked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Immediate subdirectories only, keyed by directory name.
    Shallow,
    /// Every directory below the base, keyed by import path.
    #[default]
    Deep,
}

/// A package found on disk, not yet compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSource {
    pub dir: PathBuf,
    /// Package name when the directory holds more than one package.
    pub qualifier: Option<String>,
    /// Directory relative to the base, `.` for the base itself.
    pub relative: String,
}

impl PackageSource {
    /// Selector passed to the compiler for this package.
    pub fn selector(&self) -> String {
        match &self.qualifier {
            Some(pkg) => format!(".:{}", pkg),
            None => ".".to_string(),
        }
    }

    /// Key used when no import path is available.
    pub fn fallback_key(&self) -> String {
        match &self.qualifier {
            Some(pkg) => format!("{}:{}", self.relative, pkg),
            None => self.relative.clone(),
        }
    }

    /// Key used in shallow mode.
    pub fn leaf_key(&self) -> String {
        let leaf = self
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.relative.clone());
        match &self.qualifier {
            Some(pkg) => format!("{}:{}", leaf, pkg),
            None => leaf,
        }
    }
}

/// Walks a base directory for package directories.
pub struct PackageLoader {
    base_directory: PathBuf,
    scan_mode: ScanMode,
}

impl PackageLoader {
    pub fn new(base_directory: impl Into<PathBuf>) -> Self {
        Self {
            base_directory: base_directory.into(),
            scan_mode: ScanMode::default(),
        }
    }

    pub fn with_scan_mode(mut self, scan_mode: ScanMode) -> Self {
        self.scan_mode = scan_mode;
        self
    }

    /// Finds every package below the base directory, in path order.
    pub fn discover(&self) -> TemplateResult<Vec<PackageSource>> {
        let walker = match self.scan_mode {
            ScanMode::Shallow => WalkDir::new(&self.base_directory).min_depth(1).max_depth(1),
            ScanMode::Deep => WalkDir::new(&self.base_directory),
        };

        let mut dirs = BTreeSet::new();
        for entry in walker
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != MODULE_DIR)
        {
            let entry = entry.map_err(|source| TemplateError::UnableToList {
                dir: self.base_directory.clone(),
                source,
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            if source_files(entry.path()).is_empty() {
                continue;
            }
            dirs.insert(entry.into_path());
        }

        let mut packages = Vec::new();
        for dir in dirs {
            packages.extend(self.packages_in(&dir));
        }
        debug!(
            "Discovered {} packages in {:?}",
            packages.len(),
            self.base_directory
        );
        Ok(packages)
    }

    fn packages_in(&self, dir: &Path) -> Vec<PackageSource> {
        let relative = match dir.strip_prefix(&self.base_directory) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => dir.to_string_lossy().into_owned(),
        };
        let source = |qualifier: Option<String>| PackageSource {
            dir: dir.to_path_buf(),
            qualifier,
            relative: relative.clone(),
        };

        let names = match package_names(dir) {
            Ok(names) => names,
            Err(e) => {
                // Left to the compiler to report.
                warn!("Unable to read package clauses in {:?}: {}", dir, e);
                return vec![source(None)];
            }
        };
        if names.len() <= 1 {
            return vec![source(None)];
        }
        names.into_iter().map(|name| source(Some(name))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_discover_deep_skips_module_dir() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("cue.mod")).unwrap();
        fs::write(dir.path().join("cue.mod/module.cue"), "module: \"x.io/m\"\n").unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/b.cue"), "package b\n").unwrap();
        fs::write(dir.path().join("top.cue"), "package top\n").unwrap();

        let packages = PackageLoader::new(dir.path()).discover().unwrap();
        let relative: Vec<&str> = packages.iter().map(|p| p.relative.as_str()).collect();
        assert_eq!(relative, vec![".", "a/b"]);
    }

    #[test]
    fn test_discover_shallow() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("one/deeper")).unwrap();
        fs::write(dir.path().join("one/one.cue"), "package one\n").unwrap();
        fs::write(dir.path().join("one/deeper/d.cue"), "package deeper\n").unwrap();
        fs::write(dir.path().join("top.cue"), "package top\n").unwrap();

        let packages = PackageLoader::new(dir.path())
            .with_scan_mode(ScanMode::Shallow)
            .discover()
            .unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].leaf_key(), "one");
        assert_eq!(packages[0].selector(), ".");
    }

    #[test]
    fn test_discover_multiple_packages() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("multi")).unwrap();
        fs::write(dir.path().join("multi/a.cue"), "package a\n").unwrap();
        fs::write(dir.path().join("multi/b.cue"), "package b\n").unwrap();

        let packages = PackageLoader::new(dir.path()).discover().unwrap();
        let selectors: Vec<String> = packages.iter().map(|p| p.selector()).collect();
        assert_eq!(selectors, vec![".:a", ".:b"]);
        assert_eq!(packages[0].fallback_key(), "multi:a");
    }

    #[test]
    fn test_discover_missing_base() {
        let err = PackageLoader::new("./nonexistent").discover().unwrap_err();
        assert!(err
            .to_string()
            .starts_with("unable to list avaliable config templates in \"./nonexistent\": "));
    }
}
