use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use run_git::path_util::AppendToPath;
use strum_macros::EnumString;

use crate::{
    config_file::LoadConfigFile,
    experiment::family::FamilyConfig,
    utillib::home::home_dir,
};

use super::remote_executor::{Host, JobProcess, LocalTransport, SshTransport, Transport};

/// What to do with a batch whose result files already exist.
#[derive(Debug, EnumString, PartialEq, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub enum ResumePolicy {
    /// Run every batch again, overwriting its result files
    #[default]
    Rerun,
    /// Skip batches for which *all* result files exist
    SkipExisting,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TransportConfig {
    /// `program args... host 'cd src_path; command'`
    Ssh { program: String, args: Vec<String> },
    /// Run in `bash -c` on this machine, ignoring the host
    Local,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let SshTransport { program, args } = SshTransport::default();
        TransportConfig::Ssh { program, args }
    }
}

/// A transport chosen at runtime.
pub enum ConfiguredTransport {
    Ssh(SshTransport),
    Local(LocalTransport),
}

impl Transport for ConfiguredTransport {
    fn shell_text(&self, host: &Host, remote_command: &str) -> String {
        match self {
            ConfiguredTransport::Ssh(t) => t.shell_text(host, remote_command),
            ConfiguredTransport::Local(t) => t.shell_text(host, remote_command),
        }
    }

    fn spawn(&self, shell_text: &str) -> std::io::Result<Box<dyn JobProcess>> {
        match self {
            ConfiguredTransport::Ssh(t) => t.spawn(shell_text),
            ConfiguredTransport::Local(t) => t.spawn(shell_text),
        }
    }
}

impl TransportConfig {
    pub fn transport(&self) -> ConfiguredTransport {
        match self {
            TransportConfig::Ssh { program, args } => ConfiguredTransport::Ssh(SshTransport {
                program: program.clone(),
                args: args.clone(),
            }),
            TransportConfig::Local => ConfiguredTransport::Local(LocalTransport),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// e.g. `user@machine`
    pub host: Host,
    /// The benchmark checkout on the cluster machine; every command
    /// is run after changing into it
    pub src_path: String,
    /// How many jobs one batch can run concurrently (e.g. the number
    /// of sockets)
    pub partitions_per_node: usize,
    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_results_base_dir() -> PathBuf {
    "results".into()
}

/// Direct representation of the scaling-run config file
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentsConfig {
    pub cluster: ClusterConfig,

    /// Local directory receiving `<run-id>/<family>/<point>` result
    /// files
    #[serde(default = "default_results_base_dir")]
    pub results_base_dir: PathBuf,

    #[serde(default)]
    pub resume_policy: ResumePolicy,

    /// If not given, batch joins wait forever
    #[serde(default)]
    pub batch_timeout_seconds: Option<u64>,

    /// Run in order, blocking, before any family (e.g. a build
    /// step). These wait without `batch_timeout_seconds`.
    #[serde(default)]
    pub prepare_commands: Vec<String>,

    pub families: Vec<FamilyConfig>,
}

impl ExperimentsConfig {
    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_seconds.map(Duration::from_secs)
    }
}

impl LoadConfigFile for ExperimentsConfig {
    fn default_config_path_without_suffix() -> Result<Option<PathBuf>> {
        let home = home_dir()?;
        Ok(Some(home.append(".scaling-experiments")))
    }
}
