//! Module discovery using the `ignore` crate.
//!
//! A root is either a single module file or a directory whose top-level
//! module files are collected. Subdirectories are not descended into and
//! ignore files are not honored: every module sitting in the directory is
//! part of the set.

use std::path::{Path, PathBuf};
use std::time::Instant;

use ignore::WalkBuilder;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AnalyzerError;

/// Extensions recognized as modules, compared case-insensitively.
pub const MODULE_EXTENSIONS: &[&str] = &["dll", "exe", "winmd"];

fn is_module_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            MODULE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Result of discovering the modules of one root.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScanResult {
    /// Module paths in ascending order.
    pub modules: Vec<PathBuf>,

    /// Module files rejected by the path pattern.
    pub skipped_count: usize,

    /// Directory entries that could not be read.
    pub error_count: usize,

    /// Time taken for the scan in milliseconds.
    pub duration_ms: f64,
}

impl ScanResult {
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Discover the modules of `root`.
///
/// A file root is returned as is, without consulting `pattern`. For a
/// directory root, `pattern` is matched against each candidate's full path.
pub fn discover_modules(root: &Path, pattern: Option<&Regex>) -> Result<ScanResult, AnalyzerError> {
    let start = Instant::now();

    if root.is_file() {
        return Ok(ScanResult {
            modules: vec![root.to_path_buf()],
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            ..Default::default()
        });
    }
    if !root.is_dir() {
        return Err(AnalyzerError::Discovery {
            root: root.to_path_buf(),
            message: "not a file or directory".to_string(),
        });
    }

    let walker = WalkBuilder::new(root)
        .max_depth(Some(1))
        .standard_filters(false)
        .follow_links(true)
        .build();

    let mut result = ScanResult::default();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                result.error_count += 1;
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.into_path();
        if !is_module_file(&path) {
            continue;
        }
        if let Some(pattern) = pattern {
            if !pattern.is_match(&path.to_string_lossy()) {
                result.skipped_count += 1;
                continue;
            }
        }
        result.modules.push(path);
    }

    result.modules.sort();
    result.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    tracing::debug!(
        "Discovered {} modules under {} ({} skipped by pattern)",
        result.modules.len(),
        root.display(),
        result.skipped_count
    );
    Ok(result)
}
