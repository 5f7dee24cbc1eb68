//! asmdiff core - isolated .NET metadata loading and structural API diffing.
//!
//! This crate reads the public surface (types and their properties) of two
//! versions of a module set and reports every addition, change and deletion
//! between them.
//!
//! # Features
//!
//! - **Metadata reader**: ECMA-335 tables and signatures, PE or bare `BSJB` images
//! - **Isolated contexts**: each module set lives in its own type universe
//! - **Type filters**: by name or by base class / interface, transitively
//! - **Fingerprinted diff**: unchanged types are skipped by xxHash32
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//! use asmdiff_core::{Analyzer, AnalyzerConfig};
//!
//! let analyzer = Analyzer::new(AnalyzerConfig::default());
//! let report = analyzer.invoke(Path::new("v1/"), Path::new("v2/"))?;
//! for result in &report.results {
//!     for item in &result.items {
//!         println!("{} {}: {} -> {}", result.class_name, item.kind, item.before, item.after);
//!     }
//! }
//! # Ok::<(), asmdiff_core::AnalyzerError>(())
//! ```

pub mod analyzer;
pub mod differ;
pub mod error;
pub mod extractor;
pub mod fingerprint;
pub mod metadata;
pub mod sandbox;
pub mod scanner;
pub mod types;

pub use analyzer::{Analyzer, AnalyzerConfig, RootSnapshot, RunMetadata, RunReport};
pub use differ::{diff, diff_snapshots, AnalyzerFlags, ChangeItem, ChangeKind, DiffReport, DiffResult, DiffSummary};
pub use error::{AnalyzerError, ConfigError, LoadError, MetadataError};
pub use sandbox::{CancellationToken, ResolverConfig, Sandbox};
pub use types::{ModuleFailure, ModuleLoadOutcome, PropertyDescriptor, Snapshot, TypeDescriptor};
