// Language configuration management for the execution engine
use anyhow::{bail, Context, Result};
use hirebench_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config/languages.json";

/// Toolchain binaries a runtime invokes, looked up on the sandbox PATH.
///
/// `run` names the launcher of interpreted and JVM programs. Native
/// artifacts (C++, Rust) are executed directly, so `run` is ignored there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    #[serde(default)]
    pub compile: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
}

impl ToolchainConfig {
    pub fn compiler<'a>(&'a self, default: &'a str) -> &'a str {
        self.compile.as_deref().unwrap_or(default)
    }

    pub fn launcher<'a>(&'a self, default: &'a str) -> &'a str {
        self.run.as_deref().unwrap_or(default)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: Language,
    pub version: String,
    pub toolchain: ToolchainConfig,
    /// Overrides the global memory limit for this language.
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::parse(&content).with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson = serde_json::from_str(content)?;

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            if configs.insert(lang.name, lang.clone()).is_some() {
                bail!("Duplicate configuration for language: {}", lang.name);
            }
        }

        Ok(Self { configs })
    }

    /// Load with default path (config/languages.json)
    pub fn load_default() -> Result<Self> {
        Self::load(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load from `path` when given, else the default path, falling back to
    /// the built-in table when the default file is absent.
    ///
    /// An explicit path that fails to load is an error.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                if Path::new(DEFAULT_CONFIG_PATH).exists() {
                    Self::load_default()
                } else {
                    debug!("No {} found, using built-in language table", DEFAULT_CONFIG_PATH);
                    Ok(Self::builtin())
                }
            }
        }
    }

    /// Every supported language with its default toolchain.
    pub fn builtin() -> Self {
        let entry = |name, version: &str, compile: Option<&str>, run: Option<&str>| LanguageConfig {
            name,
            version: version.to_string(),
            toolchain: ToolchainConfig {
                compile: compile.map(str::to_string),
                run: run.map(str::to_string),
            },
            memory_limit_mb: None,
        };

        let configs = [
            entry(Language::Python, "3", None, Some("python3")),
            entry(Language::JavaScript, "18+", None, Some("node")),
            entry(Language::Java, "17+", Some("javac"), Some("java")),
            entry(Language::Cpp, "c++17", Some("g++"), None),
            entry(Language::Rust, "2021", Some("rustc"), None),
        ]
        .into_iter()
        .map(|config| (config.name, config))
        .collect();

        Self { configs }
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: &Language) -> Result<&LanguageConfig> {
        self.configs
            .get(language)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", language))
    }

    /// Get memory limit for a language, if it overrides the global one
    pub fn get_memory_limit_mb(&self, language: &Language) -> Option<u64> {
        match self.get_config(language) {
            Ok(config) => config.memory_limit_mb,
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    /// List all configured languages, in a stable order
    pub fn list_languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.configs.keys().copied().collect();
        languages.sort();
        languages
    }
}
