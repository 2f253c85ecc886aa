//! Running experiment families batch by batch.
//!
//! All jobs of a batch are dispatched without waiting, then joined;
//! the next batch is only started after the join, as concurrent
//! batches would compete for the same hardware partitions. A failing
//! job aborts the rest of its family, other families still run.

use std::{collections::HashSet, fmt::Display, path::PathBuf};

use anyhow::{anyhow, bail, Result};
use itertools::Itertools;

use crate::{
    ctx,
    experiment::{
        family::{FamilyConfig, FamilyName, PartitionIndex},
        point::{BatchKey, ExperimentPoint},
        sweep::{Axis, ParameterSweep},
    },
    info,
    io_util::{create_dir_if_not_exists, write_file_atomically},
    notice, warn,
};

use super::{
    batch::{Batch, RemoteJob},
    config::ResumePolicy,
    output_directory_structure::{ExperimentDir, RunDir},
    remote_executor::{Host, RemoteExecutor, RemoteJobError, Transport, WaitPolicy},
    run_context::{RunContext, RunId},
};

#[derive(Debug, Clone, Default)]
pub struct DriverOpts {
    pub resume_policy: ResumePolicy,
    pub wait_policy: WaitPolicy,
    /// Print the commands to stdout instead of running them
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum FamilyFailure {
    /// The family could not be started (invalid configuration,
    /// oversized batch, unwritable experiment directory)
    Setup(anyhow::Error),
    /// A job of the family could not be issued or failed
    Job {
        point: ExperimentPoint,
        error: RemoteJobError,
        /// Points of later batches that were not run
        remaining_points: usize,
    },
}

impl Display for FamilyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FamilyFailure::Setup(e) => write!(f, "setup failed: {e:#}"),
            FamilyFailure::Job {
                point,
                error,
                remaining_points,
            } => write!(
                f,
                "point {point} failed ({remaining_points} remaining points not run): {error}"
            ),
        }
    }
}

#[derive(Debug)]
pub struct FamilyReport {
    pub family: FamilyName,
    pub batches_run: usize,
    pub points_run: usize,
    pub points_skipped: usize,
    pub failure: Option<FamilyFailure>,
}

impl FamilyReport {
    fn new(family: FamilyName) -> Self {
        Self {
            family,
            batches_run: 0,
            points_run: 0,
            points_skipped: 0,
            failure: None,
        }
    }

    fn setup_failure(family: FamilyName, e: anyhow::Error) -> Self {
        Self {
            failure: Some(FamilyFailure::Setup(e)),
            ..Self::new(family)
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

impl Display for FamilyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            family,
            batches_run,
            points_run,
            points_skipped,
            failure,
        } = self;
        write!(
            f,
            "{family}: {batches_run} batches ({points_run} points) run, \
             {points_skipped} points skipped"
        )?;
        if let Some(failure) = failure {
            write!(f, ", FAILED: {failure}")?;
        }
        Ok(())
    }
}

/// Written to `.sweep.ron` in the experiment directory
#[derive(Debug, serde::Serialize)]
struct SweepManifest<'t> {
    run_id: &'t RunId,
    family: &'t FamilyName,
    started: String,
    host: &'t Host,
    axes: &'t [Axis],
    batches: Vec<Vec<(String, String)>>,
}

/// One job of a planned batch
struct PlannedJob {
    point: ExperimentPoint,
    partition: PartitionIndex,
    command: String,
    result_file: PathBuf,
}

struct PlannedBatch {
    key: BatchKey,
    jobs: Vec<PlannedJob>,
}

pub struct OrchestrationDriver<T: Transport> {
    executor: RemoteExecutor<T>,
    context: RunContext,
    host: Host,
    partitions_per_node: usize,
    opts: DriverOpts,
}

impl<T: Transport> OrchestrationDriver<T> {
    pub fn new(
        executor: RemoteExecutor<T>,
        context: RunContext,
        host: Host,
        partitions_per_node: usize,
        opts: DriverOpts,
    ) -> Self {
        Self {
            executor,
            context,
            host,
            partitions_per_node,
            opts,
        }
    }

    pub fn run_dir(&self) -> RunDir {
        RunDir::from_context(&self.context)
    }

    /// Expand every command and check batch sizes, before anything is
    /// dispatched.
    fn plan(
        &self,
        experiment_dir: &ExperimentDir,
        sweep: &ParameterSweep,
        point_to_command: &impl Fn(&ExperimentPoint, PartitionIndex) -> Result<String>,
        batch_key: &impl Fn(&ExperimentPoint) -> BatchKey,
    ) -> Result<Vec<PlannedBatch>> {
        let mut result_files = HashSet::new();
        sweep
            .batches(batch_key)
            .into_iter()
            .map(|batching| {
                if batching.points.len() > self.partitions_per_node {
                    bail!(
                        "batch {} has {} points but there are only {} partitions per node",
                        batching.key,
                        batching.points.len(),
                        self.partitions_per_node
                    )
                }
                let jobs = batching
                    .points
                    .into_iter()
                    .enumerate()
                    .map(|(i, point)| {
                        let partition = PartitionIndex(i);
                        let command = point_to_command(&point, partition)
                            .map_err(|e| anyhow!("point {point}: {e:#}"))?;
                        let result_file = experiment_dir.result_file(&point);
                        assert!(
                            result_files.insert(result_file.clone()),
                            "point encodings are injective, but got {result_file:?} twice"
                        );
                        Ok(PlannedJob {
                            point,
                            partition,
                            command,
                            result_file,
                        })
                    })
                    .collect::<Result<_>>()?;
                Ok(PlannedBatch {
                    key: batching.key,
                    jobs,
                })
            })
            .collect()
    }

    fn write_manifest(
        &self,
        experiment_dir: &ExperimentDir,
        name: &FamilyName,
        sweep: &ParameterSweep,
        batches: &[PlannedBatch],
    ) -> Result<()> {
        create_dir_if_not_exists(experiment_dir.path(), "experiment directory")?;
        let manifest = SweepManifest {
            run_id: &self.context.run_id,
            family: name,
            started: self.context.started.to_rfc3339(),
            host: &self.host,
            axes: sweep.axes(),
            batches: batches
                .iter()
                .map(|batch| {
                    batch
                        .jobs
                        .iter()
                        .map(|job| (job.point.encode(), job.command.clone()))
                        .collect()
                })
                .collect(),
        };
        let path = experiment_dir.manifest_path();
        let contents = ron::ser::to_string_pretty(&manifest, ron::ser::PrettyConfig::default())
            .map_err(ctx!("serializing manifest for {path:?}"))?;
        write_file_atomically(&path, &contents)
    }

    /// Run all points of `sweep`, batch by batch. `batch_key` decides
    /// which points run concurrently: all points with the same key form
    /// one batch, each job getting its own partition. Never returns an
    /// error, failures are reported in the `FamilyReport`.
    pub fn run_family(
        &self,
        name: &FamilyName,
        sweep: &ParameterSweep,
        point_to_command: impl Fn(&ExperimentPoint, PartitionIndex) -> Result<String>,
        batch_key: impl Fn(&ExperimentPoint) -> BatchKey,
    ) -> FamilyReport {
        notice!("### {name} ###");
        let mut report = FamilyReport::new(name.clone());
        if sweep.is_empty() {
            notice!("family {name}: the sweep has no points, nothing to do");
            return report;
        }
        let experiment_dir = self.run_dir().experiment_dir(name);
        let batches = match self.plan(&experiment_dir, sweep, &point_to_command, &batch_key) {
            Ok(batches) => batches,
            Err(e) => return FamilyReport::setup_failure(name.clone(), e),
        };
        if !self.opts.dry_run {
            if let Err(e) = self.write_manifest(&experiment_dir, name, sweep, &batches) {
                return FamilyReport::setup_failure(name.clone(), e);
            }
        }

        let num_batches = batches.len();
        let mut remaining_points = sweep.len();
        for (i, planned) in batches.into_iter().enumerate() {
            let batch_len = planned.jobs.len();
            remaining_points -= batch_len;

            if self.opts.resume_policy == ResumePolicy::SkipExisting
                && planned.jobs.iter().all(|job| job.result_file.exists())
            {
                info!(
                    "batch {}/{num_batches} {}: all result files exist, skipping",
                    i + 1,
                    planned.key
                );
                report.points_skipped += batch_len;
                continue;
            }

            if self.opts.dry_run {
                println!("# batch {}/{num_batches}: {}", i + 1, planned.key);
                for job in &planned.jobs {
                    println!(
                        "{}",
                        self.executor
                            .shell_text(&self.host, &job.command, Some(&job.result_file))
                    );
                }
                continue;
            }

            info!(
                "running batch {}/{num_batches} {} with {batch_len} job(s)",
                i + 1,
                planned.key
            );
            let (batch, dispatch_failure) = self.dispatch_batch(planned);
            let results = batch.join(&self.opts.wait_policy);
            report.batches_run += 1;
            report.points_run += results.len();

            let mut failure = dispatch_failure;
            for job_result in results {
                if let Err(error) = job_result.result {
                    warn!(
                        "family {name}: point {} on partition {} failed: {error}",
                        job_result.point, job_result.partition
                    );
                    if failure.is_none() {
                        failure = Some((job_result.point, error));
                    }
                }
            }
            if let Some((point, error)) = failure {
                report.failure = Some(FamilyFailure::Job {
                    point,
                    error,
                    remaining_points,
                });
                return report;
            }
        }
        report
    }

    /// Dispatch all jobs of `planned` without waiting. If a dispatch
    /// fails, the remaining jobs are not dispatched; the failing point
    /// is returned alongside the jobs that are running.
    fn dispatch_batch(
        &self,
        planned: PlannedBatch,
    ) -> (Batch, Option<(ExperimentPoint, RemoteJobError)>) {
        let mut batch = Batch::new();
        for job in planned.jobs {
            let PlannedJob {
                point,
                partition,
                command,
                result_file,
            } = job;
            match self.executor.dispatch(
                &self.host,
                &command,
                Some(&result_file),
                false,
                &self.opts.wait_policy,
            ) {
                Ok(handle) => batch.push(RemoteJob {
                    point,
                    host: self.host.clone(),
                    partition,
                    command,
                    redirect: Some(result_file),
                    handle,
                }),
                Err(error) => {
                    warn!("could not dispatch point {point}: {error}");
                    return (batch, Some((point, error)));
                }
            }
        }
        (batch, None)
    }

    /// Run a family as described by its configuration.
    pub fn run_configured_family(&self, family: &FamilyConfig) -> FamilyReport {
        let sweep = match family.sweep() {
            Ok(sweep) => sweep,
            Err(e) => return FamilyReport::setup_failure(family.name.clone(), e),
        };
        self.run_family(
            &family.name,
            &sweep,
            |point, partition| family.command_for(point, partition),
            |point| family.batch_key(point),
        )
    }

    /// Run the families in order; a failure of one does not stop the
    /// others.
    pub fn run_families<'f>(
        &self,
        families: impl IntoIterator<Item = &'f FamilyConfig>,
    ) -> Vec<FamilyReport> {
        families
            .into_iter()
            .map(|family| {
                let report = self.run_configured_family(family);
                if let Some(failure) = &report.failure {
                    warn!("family {}: {failure}", report.family);
                }
                report
            })
            .collect()
    }

    /// Run `commands` one after the other, waiting for each, stopping
    /// at the first failure. The batch timeout does not apply here.
    pub fn run_prepare_commands(&self, commands: &[String]) -> Result<()> {
        let policy = WaitPolicy {
            timeout: None,
            ..self.opts.wait_policy.clone()
        };
        for command in commands {
            if self.opts.dry_run {
                println!("{}", self.executor.shell_text(&self.host, command, None));
                continue;
            }
            self.executor
                .run_blocking(&self.host, command, &policy)
                .map_err(ctx!("prepare command {command:?}"))?;
        }
        Ok(())
    }
}

/// One line per family, for the end of a run.
pub fn summary(reports: &[FamilyReport]) -> String {
    reports.iter().map(|r| r.to_string()).join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_report_display() -> Result<()> {
        let mut report = FamilyReport::new("wc".parse()?);
        report.batches_run = 2;
        report.points_run = 4;
        assert!(report.is_success());
        assert_eq!(
            report.to_string(),
            "wc: 2 batches (4 points) run, 0 points skipped"
        );
        report.failure = Some(FamilyFailure::Job {
            point: "map_mode=fluid,p=1".parse()?,
            error: RemoteJobError::Failed {
                shell_text: "x".into(),
                code: Some(2),
            },
            remaining_points: 2,
        });
        assert!(!report.is_success());
        assert_eq!(
            report.to_string(),
            "wc: 2 batches (4 points) run, 0 points skipped, FAILED: point map_mode=fluid,p=1 \
             failed (2 remaining points not run): remote command failed with exit code 2: \"x\""
        );
        Ok(())
    }
}
