//! Command implementations for the asmdiff CLI
//!
//! Each command module provides a `run` function that executes the command logic.

pub mod diff;
pub mod snapshot;

use asmdiff_core::ModuleLoadOutcome;
use colored::Colorize;

/// Absolute form of a user-supplied root; left as given when it cannot be resolved.
pub(crate) fn absolute_root(path: &std::path::Path) -> std::path::PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Module outcome lines shared by the table views.
pub(crate) fn outcome_lines(label: &str, outcome: &ModuleLoadOutcome) -> String {
    let mut output = format!(
        "{} {} ({} loaded, {} failed)\n",
        format!("{}:", label).cyan().bold(),
        outcome.root,
        outcome.succeeded.len().to_string().green(),
        outcome.failed.len().to_string().red()
    );
    for failure in &outcome.failed {
        output.push_str(&format!(
            "  {} {}\n    {}\n",
            "✗".red(),
            failure.path,
            failure.reason.dimmed()
        ));
    }
    output
}
