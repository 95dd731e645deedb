//! Sandboxed multi-language code execution and test verification.
//!
//! `TestOrchestrator` is the entry point: it screens candidate source,
//! wraps it in a per-case harness, runs each harness in a throwaway
//! sandbox and compares the printed result with the expected value.

pub mod config;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod harness;
pub mod registry;
pub mod security;


pub use engine::{Sandbox, SandboxExecutor};
pub use executor::{Engine, TestOrchestrator};
pub use registry::LanguageRegistry;
pub use security::{SecurityValidator, SecurityVerdict};
