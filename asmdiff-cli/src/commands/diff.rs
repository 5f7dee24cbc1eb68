//! Diff command - compare the public surface of two module sets
//!
//! Loads the source and target roots into separate sandboxes, diffs their
//! snapshots and prints the changes grouped by type. With `--report-dir` the
//! full report is also written as JSON.

use std::path::{Path, PathBuf};

use anyhow::Context;
use asmdiff_core::{Analyzer, AnalyzerConfig, AnalyzerFlags, RunReport};
use colored::Colorize;
use serde::Serialize;

use super::{absolute_root, outcome_lines};
use crate::config::AsmdiffConfig;
use crate::output::{JsonOutput, Output, OutputConfig, Outputter, TableOutput};

pub const DEFAULT_TITLE: &str = "asmdiff report";

/// Arguments of `asmdiff diff`.
#[derive(Debug, Clone)]
pub struct DiffArgs {
    pub source: PathBuf,
    pub target: PathBuf,
    pub filter: Option<String>,
    pub pattern: Option<String>,
    pub flags: Option<String>,
    pub title: Option<String>,
    pub report_dir: Option<PathBuf>,
}

/// A run report with its title.
#[derive(Debug, Serialize)]
pub struct DiffOutput {
    pub title: String,
    #[serde(flatten)]
    pub report: RunReport,
}

impl Outputter for DiffOutput {
    fn to_table(&self, config: &OutputConfig) -> String {
        let report = &self.report;
        let mut output = String::new();

        output.push_str(&format!("{}\n", self.title.bold()));
        output.push_str(&format!(
            "{} {} -> {}\n",
            "DIFF:".cyan().bold(),
            report.metadata.source.yellow(),
            report.metadata.target.green()
        ));
        let mut options = vec![("Flags", report.metadata.flags.to_string())];
        if let Some(filter) = &report.metadata.filter {
            options.push(("Filter", filter.clone()));
        }
        if let Some(pattern) = &report.metadata.pattern {
            options.push(("Pattern", pattern.clone()));
        }
        output.push_str(&TableOutput::format_key_value(&options, config));
        output.push_str("\n\n");

        output.push_str(&outcome_lines("Source", &report.source_outcome));
        output.push_str(&outcome_lines("Target", &report.target_outcome));
        output.push('\n');

        if report.results.is_empty() {
            output.push_str(&format!("{}\n", "No changes detected.".dimmed()));
        }

        for result in &report.results {
            output.push_str(&format!(
                "{} ({})\n",
                result.class_name.bold(),
                result.items.len()
            ));
            let rows: Vec<Vec<String>> = result
                .items
                .iter()
                .map(|item| vec![item.kind.to_string(), item.before.clone(), item.after.clone()])
                .collect();
            output.push_str(&TableOutput::from_rows(&["Kind", "Before", "After"], &rows, config));
            output.push_str("\n\n");
        }

        let summary = &report.summary;
        output.push_str(&format!(
            "{} {} ({} added, {} changed, {} removed; {:.1}ms)\n",
            "SUMMARY:".cyan().bold(),
            report.summary_text,
            summary.properties_added.to_string().green(),
            summary.properties_changed.to_string().yellow(),
            summary.properties_removed.to_string().red(),
            report.duration_ms
        ));

        output
    }
}

/// File name of a JSON report written at `now`.
pub fn report_file_name(now: chrono::DateTime<chrono::Local>) -> String {
    format!("AssemblyScanReport-{}.json", now.format("%d-%m-%Y_%H-%M"))
}

fn write_report(dir: &Path, output: &DiffOutput, config: &OutputConfig) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create report directory {}", dir.display()))?;
    let path = dir.join(report_file_name(chrono::Local::now()));
    let mut json_config = config.clone();
    json_config.compact = false;
    std::fs::write(&path, JsonOutput::format(output, &json_config))
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    Ok(path)
}

/// Run the diff command.
pub fn run(args: DiffArgs, config: &AsmdiffConfig, output_config: OutputConfig) -> anyhow::Result<()> {
    let flags = match args.flags.as_deref().or(config.default_flags()) {
        Some(letters) => AnalyzerFlags::parse(letters)?,
        None => AnalyzerFlags::default(),
    };

    let analyzer = Analyzer::new(AnalyzerConfig {
        filter: args.filter,
        pattern: args.pattern.or_else(|| config.default_pattern().map(String::from)),
        flags,
        resolver: config.resolver.clone(),
        command_arguments: Some(std::env::args().skip(1).collect::<Vec<_>>().join(" ")),
    });

    let source = absolute_root(&args.source);
    let target = absolute_root(&args.target);
    let report = analyzer.invoke(&source, &target)?;

    let output = DiffOutput {
        title: args.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        report,
    };

    if let Some(dir) = &args.report_dir {
        let path = write_report(dir, &output, &output_config)?;
        eprintln!("{} {}", "Report written to".green(), path.display());
    }

    Output::with_config(output, output_config).render()
}
