//! Snapshot alignment.

use std::collections::HashSet;
use std::time::Instant;

use crate::differ::changes::{AnalyzerFlags, ChangeItem, DiffReport, DiffResult, DiffSummary};
use crate::fingerprint::FingerprintIndex;
use crate::types::{Snapshot, TypeDescriptor};

/// Diff one type present on both sides.
///
/// Each source property claims the first target property with the same
/// name. Unmatched source properties become deletions, unclaimed target
/// properties become additions; renames are never paired.
fn diff_type(source: &TypeDescriptor, target: &TypeDescriptor, flags: AnalyzerFlags) -> DiffResult {
    let mut result = DiffResult::new(source.full_name.clone());

    let mut unresolved_source = Vec::new();
    let mut claimed: Vec<String> = Vec::new();

    for property in &source.properties {
        let Some(counterpart) = target.properties.iter().find(|p| p.name == property.name) else {
            if !unresolved_source.contains(&property) {
                unresolved_source.push(property);
            }
            continue;
        };
        if counterpart.type_name != property.type_name && flags.contains(AnalyzerFlags::CHANGES) {
            result.push(ChangeItem::change(property, counterpart));
        }
        let rendering = counterpart.to_string();
        if !claimed.contains(&rendering) {
            claimed.push(rendering);
        }
    }

    if flags.contains(AnalyzerFlags::DELETION) {
        for property in &unresolved_source {
            result.push(ChangeItem::deletion(property));
        }
    }

    if flags.contains(AnalyzerFlags::ADDITION) {
        let claimed: HashSet<&str> = claimed.iter().map(String::as_str).collect();
        for property in &target.properties {
            let rendering = property.to_string();
            if claimed.contains(rendering.as_str()) || source.properties.contains(property) {
                continue;
            }
            result.push(ChangeItem::addition(property));
        }
    }

    result
}

fn removed_type(source: &TypeDescriptor) -> DiffResult {
    DiffResult {
        class_name: source.full_name.clone(),
        items: source.properties.iter().map(ChangeItem::deletion).collect(),
    }
}

fn added_type(target: &TypeDescriptor) -> DiffResult {
    DiffResult {
        class_name: target.full_name.clone(),
        items: target.properties.iter().map(ChangeItem::addition).collect(),
    }
}

fn compare(
    source: &Snapshot,
    target: &Snapshot,
    flags: AnalyzerFlags,
    summary: &mut DiffSummary,
) -> Vec<DiffResult> {
    let source_index = FingerprintIndex::build(source);
    let target_index = FingerprintIndex::build(target);
    let mut results = Vec::new();

    for source_type in source.iter() {
        match target.get(&source_type.full_name) {
            Some(target_type) => {
                summary.types_compared += 1;
                if source_index.matches(&target_index, &source_type.full_name) {
                    summary.types_unchanged += 1;
                    continue;
                }
                let result = diff_type(source_type, target_type, flags);
                if !result.items.is_empty() {
                    summary.classes_modified += 1;
                    results.push(result);
                }
            }
            None if flags.contains(AnalyzerFlags::DELETION) => {
                let result = removed_type(source_type);
                if !result.items.is_empty() {
                    summary.classes_removed += 1;
                    results.push(result);
                }
            }
            None => {}
        }
    }

    if flags.contains(AnalyzerFlags::ADDITION) {
        for target_type in target.iter().filter(|t| !source.contains(&t.full_name)) {
            let result = added_type(target_type);
            if !result.items.is_empty() {
                summary.classes_added += 1;
                results.push(result);
            }
        }
    }

    tracing::debug!(
        "Compared {} types ({} unchanged), {} results",
        summary.types_compared,
        summary.types_unchanged,
        results.len()
    );
    results
}

/// Every difference between `source` and `target` allowed by `flags`.
///
/// Results follow source snapshot order, with types that exist only in
/// the target appended at the end. Results without items are never
/// returned.
pub fn diff(source: &Snapshot, target: &Snapshot, flags: AnalyzerFlags) -> Vec<DiffResult> {
    compare(source, target, flags, &mut DiffSummary::new())
}

/// [`diff`] plus summary statistics and timing.
pub fn diff_snapshots(source: &Snapshot, target: &Snapshot, flags: AnalyzerFlags) -> DiffReport {
    let start = Instant::now();
    let mut report = DiffReport::new();

    let mut summary = DiffSummary::new();
    let results = compare(source, target, flags, &mut summary);
    report.summary = summary;
    for result in results {
        report.add_result(result);
    }

    report.finalize(start.elapsed().as_secs_f64() * 1000.0);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differ::changes::ChangeKind;
    use crate::types::PropertyDescriptor;
    use proptest::prelude::*;

    fn make_type(name: &str, props: &[(&str, &str)]) -> TypeDescriptor {
        TypeDescriptor::new(
            name,
            props
                .iter()
                .map(|(n, t)| PropertyDescriptor::new(*n, *t))
                .collect(),
        )
    }

    fn make_snapshot(types: Vec<TypeDescriptor>) -> Snapshot {
        types.into_iter().collect()
    }

    fn all() -> AnalyzerFlags {
        AnalyzerFlags::all()
    }

    #[test]
    fn test_change_scenario() {
        let source = make_snapshot(vec![make_type("A", &[("x", "int")])]);
        let target = make_snapshot(vec![make_type("A", &[("x", "string")])]);

        let results = diff(&source, &target, all());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].class_name, "A");
        assert_eq!(
            results[0].items,
            vec![ChangeItem {
                kind: ChangeKind::Change,
                before: "int x".to_string(),
                after: "string x".to_string(),
            }]
        );
    }

    #[test]
    fn test_deletion_scenario() {
        let source = make_snapshot(vec![make_type("A", &[("x", "int")])]);
        let target = make_snapshot(vec![]);

        let results = diff(&source, &target, AnalyzerFlags::DELETION);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].items[0].kind, ChangeKind::Deletion);
        assert_eq!(results[0].items[0].before, "int x");
        assert_eq!(results[0].items[0].after, "Removed");

        assert!(diff(&source, &target, AnalyzerFlags::CHANGES).is_empty());
    }

    #[test]
    fn test_addition_scenario() {
        let source = make_snapshot(vec![]);
        let target = make_snapshot(vec![make_type("B", &[("y", "bool")])]);

        let results = diff(&source, &target, AnalyzerFlags::ADDITION);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].class_name, "B");
        assert_eq!(results[0].items[0].kind, ChangeKind::Addition);
        assert_eq!(results[0].items[0].before, "None");
        assert_eq!(results[0].items[0].after, "bool y");

        assert!(diff(&source, &target, AnalyzerFlags::default()).is_empty());
    }

    #[test]
    fn test_rename_and_retype_is_deletion_plus_addition() {
        let source = make_snapshot(vec![make_type("A", &[("x", "int")])]);
        let target = make_snapshot(vec![make_type("A", &[("y", "long")])]);

        let results = diff(&source, &target, all());
        assert_eq!(results.len(), 1);
        let kinds: Vec<ChangeKind> = results[0].items.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Deletion, ChangeKind::Addition]);
        assert_eq!(results[0].items[0].before, "int x");
        assert_eq!(results[0].items[1].after, "long y");
    }

    #[test]
    fn test_reorder_only_yields_no_items() {
        let source = make_snapshot(vec![make_type("A", &[("x", "int"), ("y", "int")])]);
        let target = make_snapshot(vec![make_type("A", &[("y", "int"), ("x", "int")])]);

        let report = diff_snapshots(&source, &target, all());
        assert!(!report.has_changes());
        assert_eq!(report.summary.types_compared, 1);
        assert_eq!(report.summary.types_unchanged, 0);
    }

    #[test]
    fn test_fingerprint_counters() {
        let source = make_snapshot(vec![
            make_type("Same", &[("x", "int")]),
            make_type("Changed", &[("x", "int")]),
            make_type("Gone", &[("x", "int")]),
        ]);
        let target = make_snapshot(vec![
            make_type("Same", &[("x", "int")]),
            make_type("Changed", &[("x", "long")]),
            make_type("New", &[("z", "int")]),
            make_type("Empty", &[]),
        ]);

        let report = diff_snapshots(&source, &target, all());
        assert_eq!(report.summary.types_compared, 2);
        assert_eq!(report.summary.types_unchanged, 1);
        assert_eq!(report.summary.classes_modified, 1);
        assert_eq!(report.summary.classes_removed, 1);
        assert_eq!(report.summary.classes_added, 1);
        assert_eq!(
            report.summary_text,
            "classes: 1 added, 1 removed, 1 modified; properties: 1 added, 1 changed, 1 removed"
        );

        let names: Vec<&str> = report.results.iter().map(|r| r.class_name.as_str()).collect();
        assert_eq!(names, vec!["Changed", "Gone", "New"]);
    }

    #[test]
    fn test_flags_gate_each_kind() {
        let source = make_snapshot(vec![make_type("A", &[("x", "int"), ("gone", "int")])]);
        let target = make_snapshot(vec![make_type("A", &[("x", "long"), ("new", "int")])]);

        let only_changes = diff(&source, &target, AnalyzerFlags::CHANGES);
        assert_eq!(only_changes[0].items.len(), 1);
        assert_eq!(only_changes[0].items[0].kind, ChangeKind::Change);

        let only_additions = diff(&source, &target, AnalyzerFlags::ADDITION);
        assert_eq!(only_additions[0].items.len(), 1);
        assert_eq!(only_additions[0].items[0].after, "int new");

        let only_deletions = diff(&source, &target, AnalyzerFlags::DELETION);
        assert_eq!(only_deletions[0].items.len(), 1);
        assert_eq!(only_deletions[0].items[0].before, "int gone");
    }

    const TYPE_NAMES: &[&str] = &["A", "B", "C", "D"];
    const PROP_NAMES: &[&str] = &["p", "q", "r", "s", "t"];
    const PROP_TYPES: &[&str] = &["System.Int32", "System.String", "System.Boolean"];

    fn arb_type() -> impl Strategy<Value = TypeDescriptor> {
        (
            prop::sample::select(TYPE_NAMES),
            prop::collection::btree_map(
                prop::sample::select(PROP_NAMES),
                prop::sample::select(PROP_TYPES),
                0..5,
            ),
        )
            .prop_map(|(name, props)| {
                TypeDescriptor::new(
                    name,
                    props
                        .into_iter()
                        .map(|(n, t)| PropertyDescriptor::new(n, t))
                        .collect(),
                )
            })
    }

    fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
        prop::collection::vec(arb_type(), 0..6).prop_map(make_snapshot)
    }

    fn arb_flags() -> impl Strategy<Value = AnalyzerFlags> {
        (0u8..8).prop_map(AnalyzerFlags::from_bits_truncate)
    }

    fn items_of(results: &[DiffResult], kind: ChangeKind) -> Vec<(String, String)> {
        let mut items: Vec<(String, String)> = results
            .iter()
            .flat_map(|r| {
                r.items.iter().filter(|i| i.kind == kind).map(move |i| {
                    let rendering = match kind {
                        ChangeKind::Addition => i.after.clone(),
                        _ => i.before.clone(),
                    };
                    (r.class_name.clone(), rendering)
                })
            })
            .collect();
        items.sort();
        items
    }

    proptest! {
        #[test]
        fn prop_self_diff_is_empty(snapshot in arb_snapshot(), flags in arb_flags()) {
            prop_assert!(diff(&snapshot, &snapshot, flags).is_empty());
        }

        #[test]
        fn prop_swapping_sides_swaps_additions_and_deletions(
            a in arb_snapshot(),
            b in arb_snapshot(),
        ) {
            let flags = AnalyzerFlags::ADDITION | AnalyzerFlags::DELETION;
            let forward = diff(&a, &b, flags);
            let backward = diff(&b, &a, flags);

            prop_assert_eq!(
                items_of(&forward, ChangeKind::Addition),
                items_of(&backward, ChangeKind::Deletion)
            );
            prop_assert_eq!(
                items_of(&forward, ChangeKind::Deletion),
                items_of(&backward, ChangeKind::Addition)
            );
        }

        #[test]
        fn prop_identical_properties_never_reported(
            a in arb_snapshot(),
            b in arb_snapshot(),
            flags in arb_flags(),
        ) {
            for result in diff(&a, &b, flags) {
                prop_assert!(!result.items.is_empty());
                let (Some(source), Some(target)) = (a.get(&result.class_name), b.get(&result.class_name)) else {
                    continue;
                };
                let shared: HashSet<String> = source
                    .properties
                    .iter()
                    .filter(|p| target.properties.contains(p))
                    .map(|p| p.to_string())
                    .collect();
                for item in &result.items {
                    prop_assert!(!shared.contains(&item.before));
                    prop_assert!(!shared.contains(&item.after));
                }
            }
        }
    }
}
