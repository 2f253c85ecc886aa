use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use itertools::Itertools;

use scaling_experiments::{
    config_file::{self, save_config_file, LoadConfigFile},
    experiment::family::{FamilyConfig, FamilyName},
    get_terminal_width::get_terminal_width,
    notice,
    run::{
        config::{ExperimentsConfig, ResumePolicy},
        driver::{summary, DriverOpts, OrchestrationDriver},
        output_directory_structure::RunDir,
        remote_executor::{RemoteExecutor, WaitPolicy},
        run_context::{RunContext, RunId},
    },
    utillib::logging::{set_log_level, LogLevelOpt},
};

#[derive(clap::Parser, Debug)]
#[clap(next_line_help = true)]
#[clap(set_term_width = get_terminal_width())]
/// Run experiment families on the cluster machine, batch by batch.
struct Opts {
    #[clap(flatten)]
    log_level: LogLevelOpt,

    /// Override the path to the config file (default: the paths
    /// `~/.scaling-experiments.*` where a single one exists where the
    /// `*` is the suffix for one of the supported config file formats
    /// (run `config-formats` to get the list))
    #[clap(long)]
    config: Option<PathBuf>,

    /// The subcommand to run. Use `--help` after the sub-command to
    /// get a list of the allowed options there.
    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(clap::Args, Debug)]
struct RunIdOpt {
    /// The id of the run, used as the directory name below the
    /// results base directory (default: the first 16 hex digits of
    /// the commit checked out in the current directory)
    #[clap(long)]
    run_id: Option<RunId>,
}

impl RunIdOpt {
    fn run_context(self, conf: &ExperimentsConfig) -> Result<RunContext> {
        let run_id = match self.run_id {
            Some(run_id) => run_id,
            None => RunId::from_git_head(Path::new("."))?,
        };
        notice!("commit: {run_id}");
        Ok(RunContext::new(run_id, conf.results_base_dir.clone()))
    }
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Show the supported config format types.
    ConfigFormats,

    /// Re-encode the config file (serialization type determined by
    /// file extension) and save at the given path.
    ConfigSave { output_path: PathBuf },

    /// Show the batches of every family and the result file of each
    /// point
    List {
        #[clap(flatten)]
        run_id_opt: RunIdOpt,
    },

    /// Run the prepare commands, then the families
    Run {
        #[clap(flatten)]
        run_id_opt: RunIdOpt,

        /// Only run the family with this name (can be given multiple
        /// times; default: all families, in config file order)
        #[clap(long)]
        family: Vec<FamilyName>,

        /// Print the commands that would be run to stdout instead of
        /// running them
        #[clap(long)]
        dry_run: bool,

        /// `Rerun` or `SkipExisting` (default: from the config file)
        #[clap(long)]
        resume_policy: Option<ResumePolicy>,

        /// Kill the jobs of a batch still running after this many
        /// seconds (default: from the config file, or wait forever)
        #[clap(long)]
        timeout: Option<u64>,
    },
}

fn select_families<'c>(
    families: &'c [FamilyConfig],
    names: &[FamilyName],
) -> Result<Vec<&'c FamilyConfig>> {
    if names.is_empty() {
        return Ok(families.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            families
                .iter()
                .find(|family| family.name == *name)
                .ok_or_else(|| {
                    anyhow!(
                        "unknown family {name}, the configured families are: {}",
                        families.iter().map(|f| f.name.as_str()).join(", ")
                    )
                })
        })
        .collect()
}

fn main() -> Result<()> {
    let Opts {
        log_level,
        config,
        subcommand,
    } = Opts::parse();

    set_log_level(log_level.try_into()?);

    // Have to handle ConfigFormats before attempting to read the
    // config
    if let SubCommand::ConfigFormats = &subcommand {
        println!(
            "These configuration file extensions / formats are supported:\n\n  {}\n",
            config_file::supported_formats().join("\n  ")
        );
        return Ok(());
    }

    let conf = ExperimentsConfig::load_config(config.as_ref(), |msg| {
        bail!("need a config file, {msg}")
    })?;

    match subcommand {
        SubCommand::ConfigFormats => unreachable!("handled above"),
        SubCommand::ConfigSave { output_path } => save_config_file(&output_path, &conf)?,
        SubCommand::List { run_id_opt } => {
            let run_dir = RunDir::from_context(&run_id_opt.run_context(&conf)?);
            for family in &conf.families {
                let sweep = family.sweep()?;
                let experiment_dir = run_dir.experiment_dir(&family.name);
                println!("{} ({} points)", family.name, sweep.len());
                for batching in sweep.batches(|point| family.batch_key(point)) {
                    println!("  batch {}", batching.key);
                    for point in &batching.points {
                        println!("    {}", experiment_dir.result_file(point).display());
                    }
                }
            }
        }
        SubCommand::Run {
            run_id_opt,
            family,
            dry_run,
            resume_policy,
            timeout,
        } => {
            let families = select_families(&conf.families, &family)?;
            let context = run_id_opt.run_context(&conf)?;
            let executor = RemoteExecutor::new(
                conf.cluster.transport.transport(),
                conf.cluster.src_path.clone(),
            );
            let opts = DriverOpts {
                resume_policy: resume_policy.unwrap_or(conf.resume_policy),
                wait_policy: WaitPolicy {
                    timeout: timeout.map(Duration::from_secs).or(conf.batch_timeout()),
                    ..WaitPolicy::default()
                },
                dry_run,
            };
            let driver = OrchestrationDriver::new(
                executor,
                context,
                conf.cluster.host.clone(),
                conf.cluster.partitions_per_node,
                opts,
            );
            driver.run_prepare_commands(&conf.prepare_commands)?;
            let reports = driver.run_families(families);
            eprintln!("{}", summary(&reports));
            let num_failed = reports.iter().filter(|r| !r.is_success()).count();
            if num_failed > 0 {
                bail!("{num_failed} of {} families failed", reports.len())
            }
        }
    }

    Ok(())
}
