//! The orchestration half: issuing commands on the cluster machine,
//! batching them onto hardware partitions, and the driver running the
//! sweeps of the configured experiment families (the main program is
//! at `src/bin/scaling-run.rs`).

pub mod batch;
pub mod config;
pub mod driver;
pub mod output_directory_structure;
pub mod remote_executor;
pub mod run_context;
