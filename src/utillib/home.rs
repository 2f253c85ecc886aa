use std::path::PathBuf;

use anyhow::{bail, Result};

/// The value of `$HOME`, which must be set.
pub fn home_dir() -> Result<PathBuf> {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => Ok(home.into()),
        _ => bail!("the HOME environment variable is not set"),
    }
}
