// CLI commands for running and verifying submissions
use anyhow::{bail, Context, Result};
use hirebench_common::config::ExecutionLimits;
use hirebench_common::store::{RedisSummaryStore, StoredSummary, SummaryStore};
use hirebench_common::types::{FunctionNameMap, Language, SubmissionRequest, TestCase};
use hirebench_engine::config::LanguageConfigManager;
use hirebench_engine::{Engine, SecurityValidator};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// A test case file is either a bare list of cases or a suite that also
/// carries fallback function names.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CaseFile {
    Suite {
        test_cases: Vec<TestCase>,
        #[serde(default)]
        function_names: FunctionNameMap,
    },
    List(Vec<TestCase>),
}

fn parse_language(lang: &str) -> Result<Language> {
    match Language::from_str(lang) {
        Some(language) => Ok(language),
        None => bail!(
            "Unknown language '{}'. Valid options: {}",
            lang,
            Language::ALL.map(|l| l.to_string()).join(", ")
        ),
    }
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn load_cases(path: &Path) -> Result<(Vec<TestCase>, FunctionNameMap)> {
    let content = read_file(path)?;
    let file: CaseFile =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(match file {
        CaseFile::Suite {
            test_cases,
            function_names,
        } => (test_cases, function_names),
        CaseFile::List(test_cases) => (test_cases, FunctionNameMap::new()),
    })
}

fn build_engine(config_path: Option<&Path>) -> Result<Engine> {
    let config = LanguageConfigManager::load_or_builtin(config_path)?;
    info!("Loaded language configurations for: {:?}", config.list_languages());
    Ok(Engine::from_config(ExecutionLimits::from_env(), &config))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{}", json);
    Ok(())
}

/// Run a complete program
pub async fn run_program(
    config_path: Option<&Path>,
    lang: &str,
    source_path: &Path,
    stdin_path: Option<&Path>,
) -> Result<()> {
    let request = SubmissionRequest {
        source_code: read_file(source_path)?,
        language: parse_language(lang)?,
        stdin: stdin_path.map(read_file).transpose()?,
    };

    let engine = build_engine(config_path)?;
    let result = engine.execute_request(&request).await;

    print_json(&result)
}

/// Verify a solution; returns whether every case passed
pub async fn run_tests(
    config_path: Option<&Path>,
    lang: &str,
    source_path: &Path,
    cases_path: &Path,
    function: Option<&str>,
    store_redis: Option<&str>,
) -> Result<bool> {
    let language = parse_language(lang)?;
    let source = read_file(source_path)?;
    let (test_cases, mut function_names) = load_cases(cases_path)?;
    if let Some(function) = function {
        function_names.insert(language, function.to_string());
    }

    let engine = build_engine(config_path)?;
    let summary = engine
        .run_tests(&source, language, &test_cases, &function_names)
        .await;

    if let Some(url) = store_redis {
        let store = RedisSummaryStore::connect(url)
            .await
            .with_context(|| format!("Failed to connect to Redis at {}", url))?;
        let record = StoredSummary::new(Uuid::new_v4(), language, summary.clone());
        store.put(&record).await.context("Failed to store test summary")?;
        info!(run_id = %record.run_id, "Stored test summary");
    }

    print_json(&summary)?;
    Ok(summary.all_passed)
}

/// Screen a source file; returns whether it is safe
pub fn check_source(lang: &str, source_path: &Path) -> Result<bool> {
    let language = parse_language(lang)?;
    let source = read_file(source_path)?;

    let verdict = SecurityValidator::new(ExecutionLimits::from_env().max_source_bytes).validate(&source, language);
    print_json(&verdict)?;
    Ok(verdict.safe)
}

/// List configured languages
pub fn list_languages(config_path: Option<&Path>) -> Result<()> {
    let config = LanguageConfigManager::load_or_builtin(config_path)?;

    for language in config.list_languages() {
        let entry = config.get_config(&language)?;
        let compile = entry.toolchain.compile.as_deref().unwrap_or("-");
        let run = entry.toolchain.run.as_deref().unwrap_or("-");
        println!("{:<12} {:<8} compile: {:<6} run: {}", language, entry.version, compile, run);
    }

    Ok(())
}
