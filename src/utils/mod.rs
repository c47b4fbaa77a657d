pub mod redact;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use which::which;

/// Resolves a client tool either from an explicitly configured path or from the system PATH.
pub fn find_executable(name: &str, configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!(
            "Configured {} executable does not exist: {}",
            name,
            path.display()
        );
    }
    which(name).with_context(|| {
        format!(
            "{} executable not found in PATH. Please ensure the MySQL client tools are installed and in your PATH.",
            name
        )
    })
}
