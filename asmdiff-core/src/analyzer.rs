//! Run coordination: discover, load, extract, release, diff.

use std::path::{Path, PathBuf};
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::differ::{diff_snapshots, AnalyzerFlags, DiffResult, DiffSummary};
use crate::error::{AnalyzerError, ConfigError, LoadError};
use crate::extractor::{extract_module, NormalizationRule, DEFAULT_RULES};
use crate::sandbox::{CancellationToken, DependencyResolver, ResolverConfig, Sandbox};
use crate::scanner::discover_modules;
use crate::types::{ModuleLoadOutcome, Snapshot};

/// Sandbox and context name used for the source root.
pub const SOURCE_SANDBOX: &str = "SourceSandbox";
/// Sandbox and context name used for the target root.
pub const TARGET_SANDBOX: &str = "TargetSandbox";

/// Characters that never occur in a type name.
const FILTER_FORBIDDEN: &[char] = &[',', '[', ']', '*', '&', ';'];

/// Settings of a run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Type name restricting extraction to that type and its subtypes.
    pub filter: Option<String>,

    /// Regex a module path must match to be loaded from a directory root.
    pub pattern: Option<String>,

    /// Kinds of change to report.
    pub flags: AnalyzerFlags,

    /// Dependency probing for both sandboxes.
    pub resolver: ResolverConfig,

    /// Free-form description of how the run was invoked.
    pub command_arguments: Option<String>,
}

/// Inputs of a run, echoed in its report.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    pub source: String,
    pub target: String,
    pub filter: Option<String>,
    pub pattern: Option<String>,
    pub flags: AnalyzerFlags,
    pub command_arguments: Option<String>,
}

/// Everything a run produced.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub results: Vec<DiffResult>,
    pub summary: DiffSummary,
    pub summary_text: String,
    pub source_outcome: ModuleLoadOutcome,
    pub target_outcome: ModuleLoadOutcome,
    pub metadata: RunMetadata,
    /// Wall time of the whole run in milliseconds.
    pub duration_ms: f64,
}

impl RunReport {
    pub fn has_changes(&self) -> bool {
        !self.results.is_empty()
    }
}

/// The snapshot of one root and the per-module outcome that produced it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RootSnapshot {
    pub snapshot: Snapshot,
    pub outcome: ModuleLoadOutcome,
}

/// Validated run configuration.
struct Prepared {
    filter: Option<String>,
    pattern: Option<Regex>,
}

/// Coordinates a diff between a source and a target root.
pub struct Analyzer {
    config: AnalyzerConfig,
    rules: Vec<NormalizationRule>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            rules: DEFAULT_RULES.clone(),
        }
    }

    /// Replace the type-name normalization rules.
    pub fn with_rules(mut self, rules: Vec<NormalizationRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Diff `source` against `target`.
    pub fn invoke(&self, source: &Path, target: &Path) -> Result<RunReport, AnalyzerError> {
        self.invoke_with_cancel(source, target, &CancellationToken::new())
    }

    /// Diff `source` against `target`, stopping early once `cancel` is set.
    pub fn invoke_with_cancel(
        &self,
        source: &Path,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<RunReport, AnalyzerError> {
        let start = Instant::now();
        check_root("source", source)?;
        check_root("target", target)?;
        let prepared = self.prepare()?;

        tracing::info!(
            "Comparing {} against {} (flags: {})",
            source.display(),
            target.display(),
            self.config.flags
        );

        let source_root = self.extract_root(source, SOURCE_SANDBOX, &prepared, cancel)?;
        let target_root = self.extract_root(target, TARGET_SANDBOX, &prepared, cancel)?;

        if cancel.is_cancelled() {
            return Err(AnalyzerError::Cancelled);
        }

        let report = diff_snapshots(&source_root.snapshot, &target_root.snapshot, self.config.flags);
        tracing::info!("{}", report.summary_text);

        Ok(RunReport {
            results: report.results,
            summary: report.summary,
            summary_text: report.summary_text,
            source_outcome: source_root.outcome,
            target_outcome: target_root.outcome,
            metadata: RunMetadata {
                source: source.display().to_string(),
                target: target.display().to_string(),
                filter: prepared.filter,
                pattern: self.config.pattern.clone(),
                flags: self.config.flags,
                command_arguments: self.config.command_arguments.clone(),
            },
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Snapshot a single root in its own sandbox.
    pub fn snapshot(&self, root: &Path) -> Result<RootSnapshot, AnalyzerError> {
        check_root("source", root)?;
        let prepared = self.prepare()?;
        self.extract_root(root, SOURCE_SANDBOX, &prepared, &CancellationToken::new())
    }

    fn prepare(&self) -> Result<Prepared, ConfigError> {
        let filter = match self.config.filter.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(filter) => {
                if filter.chars().any(|c| c.is_whitespace() || FILTER_FORBIDDEN.contains(&c)) {
                    return Err(ConfigError::InvalidFilter {
                        filter: filter.to_string(),
                        reason: "contains characters that cannot appear in a type name",
                    });
                }
                Some(filter.to_string())
            }
        };

        let pattern = match self.config.pattern.as_deref() {
            None | Some("") => None,
            Some(pattern) => Some(Regex::new(pattern).map_err(|source| {
                ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                }
            })?),
        };

        Ok(Prepared { filter, pattern })
    }

    fn extract_root(
        &self,
        root: &Path,
        name: &str,
        prepared: &Prepared,
        cancel: &CancellationToken,
    ) -> Result<RootSnapshot, AnalyzerError> {
        let scan = discover_modules(root, prepared.pattern.as_ref())?;
        let mut outcome = ModuleLoadOutcome::new(root.display().to_string());

        let resolver = DependencyResolver::new(self.config.resolver.clone());
        let mut sandbox = Sandbox::with_resolver(name, resolver);

        let loads = sandbox.load_all(&scan.modules, name, prepared.filter.as_deref(), cancel);
        for (path, result) in scan.modules.iter().zip(loads) {
            match result {
                Ok(()) => {}
                Err(LoadError::Cancelled { .. }) => return Err(AnalyzerError::Cancelled),
                Err(err) => {
                    tracing::warn!("{}", err);
                    outcome.record_failure(path.display().to_string(), err.to_string());
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(AnalyzerError::Cancelled);
        }

        let mut builder = Snapshot::builder();
        let rules = &self.rules;
        let runs = sandbox.run(name, |view, filter| {
            let descriptors = extract_module(view, filter, rules);
            tracing::debug!("{}: {} types", view.path().display(), descriptors.len());
            builder.extend(descriptors);
        });
        for run in runs {
            let path = display_path(&scan.modules, &run.path);
            match run.result {
                Ok(()) => outcome.record_success(path),
                Err(err) => outcome.record_failure(path, err.to_string()),
            }
        }

        sandbox.unload(name);

        if builder.duplicates() > 0 {
            tracing::warn!(
                "{}: {} duplicate type names kept from their first module only",
                name,
                builder.duplicates()
            );
        }
        let snapshot = builder.build();
        tracing::info!(
            "{}: {} types from {} of {} modules",
            name,
            snapshot.len(),
            outcome.succeeded.len(),
            outcome.attempted()
        );
        if outcome.is_total_failure() {
            tracing::warn!("No module under {} could be introspected", root.display());
        }
        Ok(RootSnapshot { snapshot, outcome })
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

fn check_root(which: &'static str, root: &Path) -> Result<(), ConfigError> {
    if root.exists() {
        Ok(())
    } else {
        Err(ConfigError::MissingRoot {
            which,
            path: root.to_path_buf(),
        })
    }
}

/// Report a module under the path it was discovered as, not its canonical form.
fn display_path(discovered: &[PathBuf], loaded: &Path) -> String {
    discovered
        .iter()
        .find(|p| std::fs::canonicalize(p).map(|c| c == loaded).unwrap_or(false))
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| loaded.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differ::ChangeKind;
    use crate::metadata::builder::{MetadataBuilder, SigType};
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, file: &str, builder: &MetadataBuilder) -> PathBuf {
        let path = dir.join(file);
        fs::write(&path, builder.build()).unwrap();
        path
    }

    fn shop(version: u16, amount: SigType, with_note: bool) -> MetadataBuilder {
        let mut builder = MetadataBuilder::new("Shop");
        builder.version([version, 0, 0, 0]);
        let order = builder.add_type("Shop", "Order");
        builder.property(order, "Id", SigType::I4);
        builder.property(order, "Amount", amount);
        if with_note {
            builder.property(order, "Note", SigType::String);
        }
        builder
    }

    fn analyzer(flags: &str) -> Analyzer {
        Analyzer::new(AnalyzerConfig {
            flags: AnalyzerFlags::parse(flags).unwrap(),
            ..Default::default()
        })
    }

    #[test]
    fn test_custom_rules_replace_defaults() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Shop.dll", &shop(1, SigType::R8, false));

        let strip_namespace = NormalizationRule::new(
            Regex::new(r"^System\.(\w+)$").unwrap(),
            "",
            crate::extractor::RulePosition::Suffix,
        );
        let root = analyzer("cd")
            .with_rules(vec![strip_namespace])
            .snapshot(dir.path())
            .unwrap();

        let order = root.snapshot.get("Shop.Order").unwrap();
        let rendered: Vec<String> = order.properties.iter().map(|p| p.to_string()).collect();
        assert_eq!(rendered, vec!["Int32 Id", "Double Amount"]);
    }

    #[test]
    fn test_duplicate_type_first_module_wins() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "A.Shop.dll", &shop(1, SigType::I4, true));
        let mut other = MetadataBuilder::new("Shop.Copy");
        let order = other.add_type("Shop", "Order");
        other.property(order, "Other", SigType::Bool);
        write(dir.path(), "B.Shop.dll", &other);

        let root = analyzer("cd").snapshot(dir.path()).unwrap();

        assert_eq!(root.outcome.succeeded.len(), 2);
        let order = root.snapshot.get("Shop.Order").unwrap();
        assert_eq!(order.properties[0].name, "Id");
        assert_eq!(order.properties.len(), 3);
    }

    #[test]
    fn test_invoke_reports_changes() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        write(source_dir.path(), "Shop.dll", &shop(1, SigType::I4, true));
        write(target_dir.path(), "Shop.dll", &shop(2, SigType::R8, false));

        let report = analyzer("acd")
            .invoke(source_dir.path(), target_dir.path())
            .unwrap();

        assert_eq!(report.results.len(), 1);
        let result = &report.results[0];
        assert_eq!(result.class_name, "Shop.Order");
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.items[0].kind, ChangeKind::Change);
        assert_eq!(result.items[0].before, "System.Int32 Amount");
        assert_eq!(result.items[0].after, "System.Double Amount");
        assert_eq!(result.items[1].kind, ChangeKind::Deletion);
        assert_eq!(result.items[1].before, "System.String Note");

        assert_eq!(report.source_outcome.succeeded.len(), 1);
        assert_eq!(report.target_outcome.succeeded.len(), 1);
        assert_eq!(report.metadata.flags, AnalyzerFlags::all());
    }

    #[test]
    fn test_same_file_both_sides_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "Shop.dll", &shop(1, SigType::I4, true));

        let report = analyzer("acd").invoke(&path, &path).unwrap();
        assert!(!report.has_changes());
        assert_eq!(report.summary.types_unchanged, 1);
    }

    #[test]
    fn test_corrupt_target_module_recorded() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        write(source_dir.path(), "Shop.dll", &shop(1, SigType::I4, true));
        write(target_dir.path(), "Shop.dll", &shop(2, SigType::I8, true));
        fs::write(target_dir.path().join("Broken.dll"), b"MZ not really a module").unwrap();

        let report = analyzer("cd")
            .invoke(source_dir.path(), target_dir.path())
            .unwrap();

        assert_eq!(report.target_outcome.failed.len(), 1);
        assert!(report.target_outcome.failed[0].path.ends_with("Broken.dll"));
        assert_eq!(report.target_outcome.succeeded.len(), 1);

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].items[0].after, "System.Int64 Amount");
    }

    #[test]
    fn test_filter_and_pattern() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();

        let mut source = MetadataBuilder::new("Shop");
        let order = source.add_type("Shop", "Order");
        source.property(order, "Id", SigType::I4);
        let color = source.add_type("Shop", "Color");
        source.property(color, "Rgb", SigType::I4);
        write(source_dir.path(), "Shop.dll", &source);

        let target = MetadataBuilder::new("Shop");
        write(target_dir.path(), "Shop.dll", &target);
        write(target_dir.path(), "Extra.dll", &shop(1, SigType::I4, false));

        let analyzer = Analyzer::new(AnalyzerConfig {
            filter: Some("Order".to_string()),
            pattern: Some(r"Shop\.dll$".to_string()),
            ..Default::default()
        });
        let report = analyzer.invoke(source_dir.path(), target_dir.path()).unwrap();

        let names: Vec<&str> = report.results.iter().map(|r| r.class_name.as_str()).collect();
        assert_eq!(names, vec!["Shop.Order"]);
        assert_eq!(report.target_outcome.attempted(), 1);
        assert_eq!(report.metadata.filter.as_deref(), Some("Order"));
    }

    #[test]
    fn test_invalid_configuration() {
        let dir = TempDir::new().unwrap();

        let err = Analyzer::default()
            .invoke(&dir.path().join("missing"), dir.path())
            .unwrap_err();
        assert!(matches!(
            err,
            AnalyzerError::Config(ConfigError::MissingRoot { which: "source", .. })
        ));

        let bad_pattern = Analyzer::new(AnalyzerConfig {
            pattern: Some("(".to_string()),
            ..Default::default()
        });
        assert!(matches!(
            bad_pattern.invoke(dir.path(), dir.path()),
            Err(AnalyzerError::Config(ConfigError::InvalidPattern { .. }))
        ));

        let bad_filter = Analyzer::new(AnalyzerConfig {
            filter: Some("List[int]".to_string()),
            ..Default::default()
        });
        assert!(matches!(
            bad_filter.invoke(dir.path(), dir.path()),
            Err(AnalyzerError::Config(ConfigError::InvalidFilter { .. }))
        ));
    }

    #[test]
    fn test_cancelled_run() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Shop.dll", &shop(1, SigType::I4, true));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Analyzer::default()
            .invoke_with_cancel(dir.path(), dir.path(), &cancel)
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::Cancelled));
    }

    #[test]
    fn test_missing_dependency_recorded() {
        let dir = TempDir::new().unwrap();
        let mut app = MetadataBuilder::new("App");
        let missing = app.assembly_ref("Vendor.Widgets");
        let widget = app.type_ref(missing, "Vendor", "Widget");
        let panel = app.add_type("App", "Panel");
        app.extends(panel, widget);
        write(dir.path(), "App.dll", &app);
        write(dir.path(), "Shop.dll", &shop(1, SigType::I4, false));

        let root = Analyzer::default().snapshot(dir.path()).unwrap();
        assert_eq!(root.outcome.failed.len(), 1);
        assert!(root.outcome.failed[0].reason.contains("Vendor.Widgets"));
        assert!(root.snapshot.contains("Shop.Order"));
        assert!(!root.snapshot.contains("App.Panel"));
    }
}
