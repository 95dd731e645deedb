/// Language Registry
///
/// Maps each `Language` to its `LanguageRuntime`. Adding a language means
/// registering one more runtime; nothing else branches on the language.

use crate::config::{LanguageConfigManager, ToolchainConfig};
use crate::harness::{CppRuntime, JavaRuntime, JavaScriptRuntime, LanguageRuntime, PythonRuntime, RustRuntime};
use hirebench_common::types::Language;
use std::collections::HashMap;

pub struct LanguageRegistry {
    runtimes: HashMap<Language, Box<dyn LanguageRuntime>>,
}

fn runtime_for(language: Language, toolchain: ToolchainConfig) -> Box<dyn LanguageRuntime> {
    match language {
        Language::Python => Box::new(PythonRuntime::new(toolchain)),
        Language::JavaScript => Box::new(JavaScriptRuntime::new(toolchain)),
        Language::Java => Box::new(JavaRuntime::new(toolchain)),
        Language::Cpp => Box::new(CppRuntime::new(toolchain)),
        Language::Rust => Box::new(RustRuntime::new(toolchain)),
    }
}

impl LanguageRegistry {
    pub fn empty() -> Self {
        Self {
            runtimes: HashMap::new(),
        }
    }

    /// Registry with every built-in runtime and its default toolchain.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for language in Language::ALL {
            registry.register(runtime_for(language, ToolchainConfig::default()));
        }
        registry
    }

    /// Runtimes for the configured languages only, using the configured
    /// toolchain binaries.
    pub fn from_config(config: &LanguageConfigManager) -> Self {
        let mut registry = Self::empty();
        for language in config.list_languages() {
            let toolchain = config
                .get_config(&language)
                .map(|entry| entry.toolchain.clone())
                .unwrap_or_default();
            registry.register(runtime_for(language, toolchain));
        }
        registry
    }

    /// Add or replace the runtime for its language.
    pub fn register(&mut self, runtime: Box<dyn LanguageRuntime>) {
        self.runtimes.insert(runtime.language(), runtime);
    }

    pub fn get(&self, language: Language) -> Option<&dyn LanguageRuntime> {
        self.runtimes.get(&language).map(|runtime| runtime.as_ref())
    }

    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.runtimes.keys().copied().collect();
        languages.sort();
        languages
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
