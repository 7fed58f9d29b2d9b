// src/config.rs - Language server specs and per-language overrides

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config format: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How to launch one language server and which languages it handles.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra languages served besides the table key.
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub mime_types: Vec<String>,
}

/// Opaque configuration input for the bridge: a server spec table keyed
/// by language id, extension/magic override tables, and file extensions
/// for synthetic paths.
///
/// ```toml
/// [servers.python]
/// command = "pyright-langserver"
/// args = ["--stdio"]
///
/// [overrides]
/// pyi = "python"
///
/// [magics]
/// sql = "sql"
///
/// [extensions]
/// python = "py"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub servers: HashMap<String, ServerSpec>,
    /// file extension -> language id.
    #[serde(default)]
    pub overrides: HashMap<String, String>,
    /// cell magic name -> language id.
    #[serde(default)]
    pub magics: HashMap<String, String>,
    /// language id -> synthetic file extension.
    #[serde(default)]
    pub extensions: HashMap<String, String>,
}

impl BridgeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn language_for_extension(&self, ext: &str) -> Option<&str> {
        self.overrides.get(ext).map(|s| s.as_str())
    }

    /// Find the server spec handling `language`, either by table key or
    /// through the spec's extra-languages list.
    pub fn server_for(&self, language: &str) -> Option<&ServerSpec> {
        if let Some(spec) = self.servers.get(language) {
            return Some(spec);
        }
        self.servers
            .values()
            .find(|spec| spec.languages.iter().any(|l| l == language))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[servers.python]
command = "pyright-langserver"
args = ["--stdio"]

[servers.typescript]
command = "typescript-language-server"
args = ["--stdio"]
languages = ["javascript"]

[overrides]
pyi = "python"

[magics]
sql = "sql"

[extensions]
python = "py"
"#;

    #[test]
    fn test_parse_sample() {
        let config: BridgeConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.servers.len(), 2);
        let python = config.server_for("python").unwrap();
        assert_eq!(python.command, "pyright-langserver");
        assert_eq!(python.args, vec!["--stdio"]);
        assert_eq!(config.language_for_extension("pyi"), Some("python"));
        assert_eq!(config.magics.get("sql").map(|s| s.as_str()), Some("sql"));
    }

    #[test]
    fn test_server_for_extra_language() {
        let config: BridgeConfig = toml::from_str(SAMPLE).unwrap();
        let js = config.server_for("javascript").unwrap();
        assert_eq!(js.command, "typescript-language-server");
        assert!(config.server_for("fortran").is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert!(config.server_for("python").is_some());
    }

    #[test]
    fn test_from_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"servers = 3").unwrap();
        assert!(matches!(
            BridgeConfig::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_default_is_empty() {
        let config = BridgeConfig::default();
        assert!(config.servers.is_empty());
        assert!(config.server_for("python").is_none());
    }
}
