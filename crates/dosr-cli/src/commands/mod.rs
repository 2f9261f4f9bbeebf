//! CLI command implementations.

pub mod config;
pub mod start;
pub mod topology;
pub mod version;

use std::path::Path;

use anyhow::{Context, Result};
use dosr_config::{ConfigLoader, DosrConfig};

/// Loads and validates the layered configuration rooted at `project`.
pub(crate) fn load_config(project: &Path, extra: Option<&Path>) -> Result<DosrConfig> {
    loader(project, extra)
        .load()
        .with_context(|| format!("Failed to load configuration from {}", project.display()))
}

/// Like [`load_config`], but leaves validation to the caller so command-line
/// overrides can be applied first.
pub(crate) fn merge_config(project: &Path, extra: Option<&Path>) -> Result<DosrConfig> {
    loader(project, extra)
        .merge()
        .with_context(|| format!("Failed to load configuration from {}", project.display()))
}

fn loader(project: &Path, extra: Option<&Path>) -> ConfigLoader {
    let loader = ConfigLoader::new().with_project_dir(project);
    match extra {
        Some(path) => loader.with_config_file(path),
        None => loader,
    }
}
