use std::{
    fs::rename,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};

use crate::ctx;

pub fn xrename(from: &Path, to: &Path) -> Result<()> {
    rename(from, to).with_context(|| anyhow!("renaming {from:?} to {to:?}"))?;
    Ok(())
}

/// Create `dir` and its parents; `what` is used in the error message.
pub fn create_dir_if_not_exists(dir: &Path, what: &str) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(ctx!("creating {what} {dir:?}"))
}

/// Write `contents` to a `.tmp` sibling of `path`, then rename it into
/// place, so that readers never see a partially written file.
pub fn write_file_atomically(path: &Path, contents: &str) -> Result<()> {
    let mut tmp: PathBuf = path.to_owned();
    let mut file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("path is missing a file name: {path:?}"))?
        .to_owned();
    file_name.push(".tmp");
    tmp.set_file_name(file_name);
    std::fs::write(&tmp, contents).map_err(ctx!("writing {tmp:?}"))?;
    xrename(&tmp, path)
}
