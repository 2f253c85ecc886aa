//! Reading directories of result files.
//!
//! A result file is named by the encoding of its experiment point;
//! the decoded key/value pairs are added to every record of the file.
//! Files that can't be used are skipped and reported, they never abort
//! loading the rest.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use kstring::KString;
use walkdir::WalkDir;

use crate::{
    ctx, debug,
    experiment::point::ExperimentPoint,
    run::output_directory_structure::RunDir,
    warn,
};

use super::record::{parse_result_body, Metadata, ResultRecord};

/// Metadata key tagging records with the experiment (family) directory
/// they were loaded from
pub const EXPERIMENT_KEY: &str = "experiment";

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    /// In file name order, and within a file in line order
    pub records: Vec<ResultRecord>,
    pub skipped: Vec<SkippedFile>,
}

impl LoadReport {
    fn extend(&mut self, other: LoadReport) {
        self.records.extend(other.records);
        self.skipped.extend(other.skipped);
    }
}

fn load_file(path: &Path, extra_metadata: &Metadata) -> Result<Vec<ResultRecord>> {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("file name is not unicode"))?;
    let point: ExperimentPoint = file_name
        .parse()
        .map_err(|e| anyhow!("file name is not an experiment point encoding: {e:#}"))?;
    let mut file_metadata = point.to_metadata();
    for (key, value) in extra_metadata {
        file_metadata
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    let body = std::fs::read_to_string(path).map_err(ctx!("reading file"))?;
    let records = parse_result_body(&body, &file_metadata)?;
    if records.is_empty() {
        Err(anyhow!("contains no result records"))
    } else {
        Ok(records)
    }
}

/// Load the files directly in `dir`, adding `extra_metadata` to each
/// record unless the file name provides the same key. Dot-files and
/// subdirectories are ignored. Only failing to read `dir` itself is an
/// error.
pub fn load_with_metadata(dir: &Path, extra_metadata: &Metadata) -> Result<LoadReport> {
    let mut report = LoadReport::default();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(ctx!("listing results directory {dir:?}"))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            debug!("ignoring {:?}", entry.path());
            continue;
        }
        if entry.file_type().is_dir() {
            continue;
        }
        match load_file(entry.path(), extra_metadata) {
            Ok(records) => {
                debug!("{} records from {:?}", records.len(), entry.path());
                report.records.extend(records);
            }
            Err(e) => {
                let reason = format!("{e:#}");
                warn!("skipping result file {:?}: {reason}", entry.path());
                report.skipped.push(SkippedFile {
                    path: entry.into_path(),
                    reason,
                });
            }
        }
    }
    Ok(report)
}

/// Load the result files directly in `dir`.
pub fn load(dir: &Path) -> Result<LoadReport> {
    load_with_metadata(dir, &Metadata::new())
}

/// Load the files of a run directory and of each of its experiment
/// directories, tagging the latter with `experiment=<directory name>`.
pub fn load_results_tree(run_dir: &Path) -> Result<LoadReport> {
    let mut report = load(run_dir)?;
    for experiment_dir in RunDir::from(run_dir.to_owned()).experiment_dirs()? {
        let mut metadata = Metadata::new();
        metadata.insert(
            KString::from_static(EXPERIMENT_KEY),
            experiment_dir.family_name().kstring().clone(),
        );
        report.extend(load_with_metadata(experiment_dir.path(), &metadata)?);
    }
    Ok(report)
}
