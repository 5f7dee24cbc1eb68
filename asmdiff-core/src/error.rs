//! Error types for asmdiff-core.
//!
//! Errors are grouped by who recovers them: configuration errors abort a run
//! before any module is touched, load errors are recorded per module and the
//! run continues, metadata errors describe why an image could not be decoded.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while decoding a metadata image.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// A valid PE image without a CLI header (native code).
    #[error("image has no CLI header")]
    NotManaged,

    /// The PE container could not be parsed.
    #[error("invalid PE image: {message}")]
    InvalidImage {
        /// Description reported by the PE parser.
        message: String,
    },

    /// Neither an `MZ` nor a `BSJB` signature was found.
    #[error("unrecognized image signature")]
    BadSignature,

    /// A stream required for type extraction is missing.
    #[error("missing metadata stream {name}")]
    MissingStream {
        /// Stream name, e.g. `#Strings`.
        name: &'static str,
    },

    /// A read ran past the end of a structure.
    #[error("truncated {what} at offset {offset:#x}")]
    Truncated {
        /// Structure being read.
        what: &'static str,
        /// Offset of the failed read.
        offset: usize,
    },

    /// The table stream uses a layout this reader does not decode.
    #[error("unsupported table stream: {message}")]
    UnsupportedTableStream {
        /// Description of the unsupported feature.
        message: String,
    },
}

/// Errors raised by the isolated loader.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Module file does not exist.
    #[error("unable to locate the module at {}", path.display())]
    NotFound {
        /// Path that was requested.
        path: PathBuf,
    },

    /// The exact path is already loaded in an active context.
    #[error("module {} is already loaded in context '{context}'", path.display())]
    AlreadyLoaded {
        /// Path that was requested.
        path: PathBuf,
        /// Context currently holding the module.
        context: String,
    },

    /// The file exists but is not a readable CLI image.
    #[error("unable to read metadata from {}: {source}", path.display())]
    Corrupt {
        /// Path of the broken module.
        path: PathBuf,
        /// Decoding failure.
        #[source]
        source: MetadataError,
    },

    /// An assembly reference could not be resolved by any probing step.
    #[error("dependency '{dependency}' of {} could not be resolved", module.display())]
    DependencyNotFound {
        /// Requested module whose dependency chain could not be resolved.
        module: PathBuf,
        /// Referenced assembly name.
        dependency: String,
    },

    /// Reading the module from disk failed.
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The load was skipped because the run was cancelled.
    #[error("load of {} cancelled", path.display())]
    Cancelled {
        /// Path that was not loaded.
        path: PathBuf,
    },
}

/// Invalid run configuration. Always fatal, raised before loading begins.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Source or target root does not exist.
    #[error("unable to find the path specified in {which} ({})", path.display())]
    MissingRoot {
        /// `source` or `target`.
        which: &'static str,
        /// Root that was given.
        path: PathBuf,
    },

    /// The path pattern is not a valid regular expression.
    #[error("the pattern specified is not a valid regular expression: {pattern}")]
    InvalidPattern {
        /// Pattern as given.
        pattern: String,
        /// Regex compilation error.
        #[source]
        source: regex::Error,
    },

    /// The type filter cannot name a type.
    #[error("invalid filter '{filter}': {reason}")]
    InvalidFilter {
        /// Filter as given.
        filter: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The flag string contains no known analysis letter.
    #[error("invalid flags '{0}': expected any of a (additions), c (changes), d (deletions)")]
    InvalidFlags(String),
}

/// Errors that abort a whole run.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A root directory could not be listed.
    #[error("failed to discover modules under {}: {message}", root.display())]
    Discovery {
        /// Root being listed.
        root: PathBuf,
        /// Underlying failure.
        message: String,
    },

    /// The run was cancelled; no diff was computed.
    #[error("run cancelled before completion")]
    Cancelled,
}
