//! Snapshot command - show the extracted public surface of one root

use std::path::PathBuf;

use asmdiff_core::{Analyzer, AnalyzerConfig, ModuleLoadOutcome, TypeDescriptor};
use colored::Colorize;
use serde::Serialize;

use super::{absolute_root, outcome_lines};
use crate::config::AsmdiffConfig;
use crate::output::{Output, OutputConfig, Outputter, TableOutput};

/// Arguments of `asmdiff snapshot`.
#[derive(Debug, Clone)]
pub struct SnapshotArgs {
    pub root: PathBuf,
    pub filter: Option<String>,
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotOutput {
    pub root: String,
    pub types: Vec<TypeDescriptor>,
    pub outcome: ModuleLoadOutcome,
}

impl Outputter for SnapshotOutput {
    fn to_table(&self, config: &OutputConfig) -> String {
        let mut output = String::new();
        output.push_str(&outcome_lines("Root", &self.outcome));
        output.push_str(&format!(
            "{} types\n\n",
            self.types.len().to_string().cyan()
        ));

        for ty in &self.types {
            output.push_str(&format!("{}\n", ty.full_name.bold()));
            if ty.properties.is_empty() {
                output.push_str(&format!("  {}\n\n", "(no public properties)".dimmed()));
                continue;
            }
            let rows: Vec<Vec<String>> = ty
                .properties
                .iter()
                .map(|p| vec![p.name.clone(), p.type_name.clone()])
                .collect();
            output.push_str(&TableOutput::from_rows(&["Property", "Type"], &rows, config));
            output.push_str("\n\n");
        }
        output
    }
}

/// Run the snapshot command.
pub fn run(args: SnapshotArgs, config: &AsmdiffConfig, output_config: OutputConfig) -> anyhow::Result<()> {
    let analyzer = Analyzer::new(AnalyzerConfig {
        filter: args.filter,
        pattern: args.pattern.or_else(|| config.default_pattern().map(String::from)),
        resolver: config.resolver.clone(),
        ..Default::default()
    });

    let root = absolute_root(&args.root);
    let extracted = analyzer.snapshot(&root)?;

    let output = SnapshotOutput {
        root: root.display().to_string(),
        types: extracted.snapshot.iter().cloned().collect(),
        outcome: extracted.outcome,
    };
    Output::with_config(output, output_config).render()
}
