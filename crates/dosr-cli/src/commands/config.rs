//! Configuration command.

use std::path::Path;

use anyhow::Result;

/// Prints the merged configuration, after env overrides and validation.
pub fn show(project: &Path, extra: Option<&Path>) -> Result<()> {
    let config = super::load_config(project, extra)?;
    print!("{}", config.to_toml()?);
    Ok(())
}
