//! Structural diff engine for snapshots.
//!
//! Aligns the types of a source and a target [`Snapshot`](crate::types::Snapshot)
//! by full name and classifies each property difference as an addition, a
//! change or a deletion.
//!
//! # Features
//!
//! - **Fingerprint short-circuit**: types whose fingerprints agree are skipped
//! - **Flag gating**: each change kind can be switched off
//! - **Deterministic order**: source order first, target-only types last
//!
//! # Example
//!
//! ```
//! use asmdiff_core::differ::{diff, AnalyzerFlags};
//! use asmdiff_core::types::{PropertyDescriptor, Snapshot, TypeDescriptor};
//!
//! let source: Snapshot = vec![TypeDescriptor::new(
//!     "A",
//!     vec![PropertyDescriptor::new("x", "System.Int32")],
//! )]
//! .into_iter()
//! .collect();
//! let target: Snapshot = vec![TypeDescriptor::new(
//!     "A",
//!     vec![PropertyDescriptor::new("x", "System.String")],
//! )]
//! .into_iter()
//! .collect();
//!
//! let results = diff(&source, &target, AnalyzerFlags::default());
//! assert_eq!(results[0].items[0].after, "System.String x");
//! ```

pub mod changes;
pub mod comparator;

pub use changes::{AnalyzerFlags, ChangeItem, ChangeKind, DiffReport, DiffResult, DiffSummary};
pub use comparator::{diff, diff_snapshots};
