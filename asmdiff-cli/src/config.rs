//! asmdiff configuration loading from `.asmdiffrc.toml`.
//!
//! Configuration is optional; every setting has a default and command-line
//! flags override whatever the file says.
//!
//! # Example Configuration
//!
//! ```toml
//! [resolver]
//! search_paths = ["C:/Program Files/dotnet/shared/Microsoft.NETCore.App/8.0.0"]
//! platform_assemblies = ["Vendor.Runtime"]
//!
//! [analysis]
//! flags = "acd"
//! pattern = "Contoso\\..*\\.dll$"
//!
//! [output]
//! format = "table"
//! color = true
//! ```

use std::path::Path;

use asmdiff_core::ResolverConfig;
use serde::Deserialize;

/// File name looked up in the working directory.
pub const CONFIG_FILE: &str = ".asmdiffrc.toml";

/// Root configuration structure loaded from `.asmdiffrc.toml`.
#[derive(Debug, Deserialize, Default)]
pub struct AsmdiffConfig {
    /// Where dependencies are looked for beyond the module's own directory.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Defaults for the analysis options.
    #[serde(default)]
    pub analysis: AnalysisSettings,

    /// Output formatting preferences.
    #[serde(default)]
    pub output: OutputSettings,
}

/// Defaults for `diff` and `snapshot` options.
#[derive(Debug, Deserialize, Default)]
pub struct AnalysisSettings {
    /// Flag letters (`a`, `c`, `d`) used when `--flags` is not given.
    #[serde(default)]
    pub flags: Option<String>,

    /// Module path regex used when `--pattern` is not given.
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Output formatting preferences.
#[derive(Debug, Deserialize, Default)]
pub struct OutputSettings {
    /// Default output format: `table` or `json`.
    #[serde(default)]
    pub format: Option<String>,

    /// Whether to use colored output. Auto-detected when unset.
    #[serde(default)]
    pub color: Option<bool>,
}

impl AsmdiffConfig {
    /// Load configuration from `.asmdiffrc.toml` in the given directory.
    ///
    /// Missing or unparsable files yield defaults; parse errors are logged.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse {}: {}", CONFIG_FILE, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", CONFIG_FILE, e);
                }
            }
        }
        Self::default()
    }

    pub fn default_format(&self) -> Option<&str> {
        self.output.format.as_deref()
    }

    pub fn use_color(&self) -> Option<bool> {
        self.output.color
    }

    pub fn default_flags(&self) -> Option<&str> {
        self.analysis.flags.as_deref()
    }

    pub fn default_pattern(&self) -> Option<&str> {
        self.analysis.pattern.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AsmdiffConfig::load(dir.path());
        assert!(config.default_format().is_none());
        assert!(config.resolver.search_paths.is_empty());
    }

    #[test]
    fn test_load_sections() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
[resolver]
search_paths = ["/opt/dotnet/shared"]
platform_assemblies = ["Vendor.Runtime"]

[analysis]
flags = "ad"
pattern = "Shop"

[output]
format = "json"
color = false
"#,
        )
        .unwrap();

        let config = AsmdiffConfig::load(dir.path());
        assert_eq!(config.resolver.search_paths.len(), 1);
        assert_eq!(config.resolver.platform_assemblies, vec!["Vendor.Runtime".to_string()]);
        assert_eq!(config.default_flags(), Some("ad"));
        assert_eq!(config.default_pattern(), Some("Shop"));
        assert_eq!(config.default_format(), Some("json"));
        assert_eq!(config.use_color(), Some(false));
    }

    #[test]
    fn test_invalid_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[analysis\nflags = ").unwrap();
        let config = AsmdiffConfig::load(dir.path());
        assert!(config.default_flags().is_none());
    }
}
