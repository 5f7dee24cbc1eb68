//! Assembly reference probing.
//!
//! References that are not already satisfied by a module of the context are
//! probed next to the referencing module, then in the configured search
//! paths, and finally accepted when they name a platform assembly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const PROBE_EXTENSIONS: &[&str] = &["dll", "exe"];

/// Assemblies provided by the runtime itself.
const PLATFORM_ASSEMBLIES: &[&str] = &[
    "mscorlib",
    "netstandard",
    "System",
    "WindowsBase",
    "PresentationCore",
    "PresentationFramework",
    "Microsoft.CSharp",
    "Microsoft.VisualBasic",
];

const PLATFORM_PREFIXES: &[&str] = &["System.", "Microsoft.", "runtime."];

/// Probing configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Extra directories probed after the module's own directory.
    pub search_paths: Vec<PathBuf>,

    /// Extra assembly names accepted as platform assemblies.
    pub platform_assemblies: Vec<String>,
}

/// Where a reference was satisfied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// A file next to the referencing module.
    Sibling(PathBuf),
    /// A file in one of the configured search paths.
    SearchPath(PathBuf),
    /// A platform assembly; no metadata is loaded for it.
    Platform,
}

impl Resolution {
    /// File to load as a dependency, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Resolution::Sibling(path) | Resolution::SearchPath(path) => Some(path),
            Resolution::Platform => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DependencyResolver {
    config: ResolverConfig,
}

impl DependencyResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Probe for `assembly` on behalf of the module at `module_path`.
    pub fn probe(&self, module_path: &Path, assembly: &str) -> Option<Resolution> {
        if let Some(dir) = module_path.parent() {
            if let Some(path) = find_in(dir, assembly) {
                return Some(Resolution::Sibling(path));
            }
        }
        for dir in &self.config.search_paths {
            if let Some(path) = find_in(dir, assembly) {
                return Some(Resolution::SearchPath(path));
            }
        }
        if self.is_platform(assembly) {
            return Some(Resolution::Platform);
        }
        None
    }

    pub fn is_platform(&self, assembly: &str) -> bool {
        let lower = assembly.to_lowercase();
        PLATFORM_ASSEMBLIES
            .iter()
            .copied()
            .chain(self.config.platform_assemblies.iter().map(String::as_str))
            .any(|name| name.eq_ignore_ascii_case(assembly))
            || PLATFORM_PREFIXES
                .iter()
                .any(|prefix| lower.starts_with(&prefix.to_lowercase()))
    }
}

fn find_in(dir: &Path, assembly: &str) -> Option<PathBuf> {
    PROBE_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{assembly}.{ext}")))
        .find(|candidate| candidate.is_file())
}
