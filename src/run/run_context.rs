//! The immutable context of one run: derived once, then passed to
//! everything that needs to know where results go.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Local};
use run_git::git::GitWorkingDir;

/// Length of commit ids used as run ids
pub const RUN_ID_LEN: usize = 16;

/// Identifies a run, usually the (shortened) commit id of the
/// benchmarked source; used as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub struct RunId(String);

impl RunId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The commit checked out at `dir`
    pub fn from_git_head(dir: &Path) -> Result<Self> {
        let git_working_dir = GitWorkingDir::from(dir.to_owned());
        let commit_id = git_working_dir
            .git_rev_parse("HEAD", true)?
            .ok_or_else(|| anyhow!("HEAD does not resolve to a commit in {dir:?}"))?;
        let short: String = commit_id.trim().chars().take(RUN_ID_LEN).collect();
        short.parse()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RunId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty()
            || s == "."
            || s == ".."
            || s.contains(['/', '\n', '\0'])
            || s.len() > 255
        {
            bail!(
                "run id must be usable as a directory name (not empty, '.', '..', \
                 no '/', '\\n', '\\0', at most 255 bytes), got {s:?}"
            )
        }
        Ok(Self(s.into()))
    }
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    /// The directory holding one subdirectory per run id
    pub results_base_dir: PathBuf,
    pub started: DateTime<Local>,
}

impl RunContext {
    pub fn new(run_id: RunId, results_base_dir: PathBuf) -> Self {
        Self {
            run_id,
            results_base_dir,
            started: Local::now(),
        }
    }

    /// For the evaluation side: `results_dir` is the directory of one
    /// run, its last path component is the run id.
    pub fn from_results_dir(results_dir: &Path) -> Result<Self> {
        let file_name = results_dir
            .components()
            .next_back()
            .ok_or_else(|| anyhow!("empty results directory path"))?
            .as_os_str()
            .to_str()
            .ok_or_else(|| anyhow!("results directory name is not unicode: {results_dir:?}"))?;
        let run_id = file_name
            .parse()
            .map_err(|e| anyhow!("results directory {results_dir:?}: {e:#}"))?;
        let results_base_dir = results_dir
            .parent()
            .map(Path::to_owned)
            .unwrap_or_default();
        Ok(Self::new(run_id, results_base_dir))
    }
}
