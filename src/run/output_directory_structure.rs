//! The directory structure for result files:
//! `<results_base_dir>/<run-id>/<family-name>/<encoded-point>`.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, bail, Result};
use run_git::path_util::AppendToPath;
use walkdir::WalkDir;

use crate::{
    ctx,
    experiment::{family::FamilyName, point::ExperimentPoint},
};

use super::run_context::RunContext;

/// Written into each experiment dir before its family runs; starts
/// with a dot so that the result loader ignores it.
pub const MANIFEST_FILE_NAME: &str = ".sweep.ron";

/// Skips non-directory entries and dot-directories, but requires all
/// other directory entries to be convertible to `T`. Sorted by file
/// name.
fn typed_dir_listing_of_dirs<T: TryFrom<PathBuf, Error = anyhow::Error>>(
    dir_path: &Path,
) -> Result<Vec<T>> {
    WalkDir::new(dir_path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| -> Result<Option<T>> {
            let entry = entry?;
            if entry.file_type().is_dir() && !entry.file_name().to_string_lossy().starts_with('.')
            {
                Ok(Some(T::try_from(entry.into_path())?))
            } else {
                Ok(None)
            }
        })
        .filter_map(|r| r.transpose())
        .collect::<Result<_, _>>()
        .map_err(ctx!("listing directories in {dir_path:?}"))
}

fn parse_file_name<T: FromStr>(path: &Path) -> Result<T>
where
    T::Err: Display,
{
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("path is missing a file name: {path:?}"))?;
    let Some(file_name_str) = file_name.to_str() else {
        bail!("can't decode file name to string: {path:?}")
    };
    T::from_str(file_name_str).map_err(|e| anyhow!("file name of {path:?} does not parse: {e}"))
}

/// The directory holding all results of one run.
#[derive(Debug, Clone)]
pub struct RunDir(PathBuf);

/// The directory holding the results of one experiment family.
#[derive(Debug, Clone)]
pub struct ExperimentDir(PathBuf);

impl RunDir {
    pub fn from_context(run_context: &RunContext) -> Self {
        Self(
            run_context
                .results_base_dir
                .as_path()
                .append(run_context.run_id.as_str()),
        )
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn experiment_dir(&self, family: &FamilyName) -> ExperimentDir {
        ExperimentDir(self.path().append(family.as_str()))
    }

    pub fn experiment_dirs(&self) -> Result<Vec<ExperimentDir>> {
        typed_dir_listing_of_dirs(self.path())
    }
}

impl From<PathBuf> for RunDir {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl TryFrom<PathBuf> for ExperimentDir {
    type Error = anyhow::Error;

    fn try_from(path: PathBuf) -> std::result::Result<Self, Self::Error> {
        _ = parse_file_name::<FamilyName>(&path)?;
        Ok(Self(path))
    }
}

impl ExperimentDir {
    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn family_name(&self) -> FamilyName {
        parse_file_name(self.path()).expect("checked in try_from or built from a FamilyName")
    }

    pub fn result_file(&self, point: &ExperimentPoint) -> PathBuf {
        self.path().append(point.encode())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path().append(MANIFEST_FILE_NAME)
    }
}
