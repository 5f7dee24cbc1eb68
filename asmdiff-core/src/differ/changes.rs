//! Change types and result structures for the structural diff.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::PropertyDescriptor;

/// `before` of an addition.
pub const BEFORE_NONE: &str = "None";
/// `after` of a deletion.
pub const AFTER_REMOVED: &str = "Removed";

bitflags! {
    /// Which kinds of change a diff reports.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AnalyzerFlags: u8 {
        const ADDITION = 1 << 0;
        const CHANGES = 1 << 1;
        const DELETION = 1 << 2;
    }
}

impl Default for AnalyzerFlags {
    fn default() -> Self {
        AnalyzerFlags::CHANGES | AnalyzerFlags::DELETION
    }
}

impl AnalyzerFlags {
    /// Parse letters `a` (additions), `c` (changes), `d` (deletions).
    /// Unknown letters are ignored; a string with no known letter is an error.
    pub fn parse(letters: &str) -> Result<Self, ConfigError> {
        let mut flags = AnalyzerFlags::empty();
        for letter in letters.chars() {
            match letter.to_ascii_lowercase() {
                'a' => flags |= AnalyzerFlags::ADDITION,
                'c' => flags |= AnalyzerFlags::CHANGES,
                'd' => flags |= AnalyzerFlags::DELETION,
                _ => {}
            }
        }
        if flags.is_empty() {
            return Err(ConfigError::InvalidFlags(letters.to_string()));
        }
        Ok(flags)
    }

    /// The letter form accepted by [`AnalyzerFlags::parse`].
    pub fn letters(&self) -> String {
        let mut out = String::new();
        if self.contains(AnalyzerFlags::ADDITION) {
            out.push('a');
        }
        if self.contains(AnalyzerFlags::CHANGES) {
            out.push('c');
        }
        if self.contains(AnalyzerFlags::DELETION) {
            out.push('d');
        }
        out
    }
}

impl FromStr for AnalyzerFlags {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalyzerFlags::parse(s)
    }
}

impl fmt::Display for AnalyzerFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.letters())
    }
}

impl Serialize for AnalyzerFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.letters())
    }
}

/// Reads back whatever [`Serialize`] wrote, including the empty set.
impl<'de> Deserialize<'de> for AnalyzerFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let letters = String::deserialize(deserializer)?;
        if letters.is_empty() {
            return Ok(AnalyzerFlags::empty());
        }
        AnalyzerFlags::parse(&letters).map_err(serde::de::Error::custom)
    }
}

/// Kind of a single property change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Addition,
    Change,
    Deletion,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Addition => "Addition",
            ChangeKind::Change => "Change",
            ChangeKind::Deletion => "Deletion",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One property-level difference, rendered as `"<type> <name>"` strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeItem {
    pub kind: ChangeKind,
    pub before: String,
    pub after: String,
}

impl ChangeItem {
    pub fn addition(after: &PropertyDescriptor) -> Self {
        Self {
            kind: ChangeKind::Addition,
            before: BEFORE_NONE.to_string(),
            after: after.to_string(),
        }
    }

    pub fn change(before: &PropertyDescriptor, after: &PropertyDescriptor) -> Self {
        Self {
            kind: ChangeKind::Change,
            before: before.to_string(),
            after: after.to_string(),
        }
    }

    pub fn deletion(before: &PropertyDescriptor) -> Self {
        Self {
            kind: ChangeKind::Deletion,
            before: before.to_string(),
            after: AFTER_REMOVED.to_string(),
        }
    }
}

/// All changes found for one type. Never reported with an empty item list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub class_name: String,
    pub items: Vec<ChangeItem>,
}

impl DiffResult {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: ChangeItem) {
        self.items.push(item);
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.items.iter().filter(|i| i.kind == kind).count()
    }
}

/// Summary statistics for a diff.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Types present on both sides.
    pub types_compared: u32,
    /// Compared types skipped because their fingerprints agree.
    pub types_unchanged: u32,

    pub classes_added: u32,
    pub classes_removed: u32,
    pub classes_modified: u32,

    pub properties_added: u32,
    pub properties_changed: u32,
    pub properties_removed: u32,
}

impl DiffSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the items of a result.
    pub fn record(&mut self, result: &DiffResult) {
        for item in &result.items {
            match item.kind {
                ChangeKind::Addition => self.properties_added += 1,
                ChangeKind::Change => self.properties_changed += 1,
                ChangeKind::Deletion => self.properties_removed += 1,
            }
        }
    }

    pub fn total_items(&self) -> u32 {
        self.properties_added + self.properties_changed + self.properties_removed
    }

    /// Generate human-readable summary string.
    pub fn text(&self) -> String {
        let mut parts = Vec::new();

        if self.classes_added > 0 || self.classes_removed > 0 || self.classes_modified > 0 {
            let mut class_parts = Vec::new();
            if self.classes_added > 0 {
                class_parts.push(format!("{} added", self.classes_added));
            }
            if self.classes_removed > 0 {
                class_parts.push(format!("{} removed", self.classes_removed));
            }
            if self.classes_modified > 0 {
                class_parts.push(format!("{} modified", self.classes_modified));
            }
            parts.push(format!("classes: {}", class_parts.join(", ")));
        }

        if self.total_items() > 0 {
            let mut property_parts = Vec::new();
            if self.properties_added > 0 {
                property_parts.push(format!("{} added", self.properties_added));
            }
            if self.properties_changed > 0 {
                property_parts.push(format!("{} changed", self.properties_changed));
            }
            if self.properties_removed > 0 {
                property_parts.push(format!("{} removed", self.properties_removed));
            }
            parts.push(format!("properties: {}", property_parts.join(", ")));
        }

        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// Complete result of a diff between two snapshots.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DiffReport {
    /// One entry per type with at least one change
    pub results: Vec<DiffResult>,

    /// Summary statistics
    pub summary: DiffSummary,

    /// Human-readable summary text
    pub summary_text: String,

    /// Duration of diff operation in milliseconds
    pub duration_ms: f64,
}

impl DiffReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a result and update the item counters. Empty results are dropped.
    pub fn add_result(&mut self, result: DiffResult) {
        if result.items.is_empty() {
            return;
        }
        self.summary.record(&result);
        self.results.push(result);
    }

    /// Finalize the report with timing and summary text.
    pub fn finalize(&mut self, duration_ms: f64) {
        self.duration_ms = duration_ms;
        self.summary_text = self.summary.text();
    }

    pub fn has_changes(&self) -> bool {
        !self.results.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.results.iter().map(|r| r.items.len()).sum()
    }

    /// Items of one kind across all results, with their class name.
    pub fn filter_kind(&self, kind: ChangeKind) -> Vec<(&str, &ChangeItem)> {
        self.results
            .iter()
            .flat_map(|r| r.items.iter().map(move |i| (r.class_name.as_str(), i)))
            .filter(|(_, i)| i.kind == kind)
            .collect()
    }
}
