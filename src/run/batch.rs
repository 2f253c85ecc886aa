//! A set of jobs dispatched together, and the join barrier that
//! resolves all of them.

use std::{path::PathBuf, thread, time::Instant};

use crate::{
    experiment::{family::PartitionIndex, point::ExperimentPoint},
    info,
};

use super::remote_executor::{Host, JobHandle, RemoteJobError, WaitPolicy};

/// A dispatched unit of work, owned by the batch that dispatched it.
pub struct RemoteJob {
    pub point: ExperimentPoint,
    pub host: Host,
    pub partition: PartitionIndex,
    /// The command before transport wrapping
    pub command: String,
    pub redirect: Option<PathBuf>,
    pub handle: JobHandle,
}

/// Outcome of one job after the join.
#[derive(Debug)]
pub struct JobResult {
    pub point: ExperimentPoint,
    pub partition: PartitionIndex,
    pub result: Result<(), RemoteJobError>,
}

#[derive(Default)]
pub struct Batch {
    jobs: Vec<RemoteJob>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: RemoteJob) {
        self.jobs.push(job)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Wait until every job has resolved, or until `policy.timeout`
    /// has passed, in which case the still running jobs are killed
    /// and reported as timed out. Results are in dispatch order.
    pub fn join(mut self, policy: &WaitPolicy) -> Vec<JobResult> {
        let start = Instant::now();
        loop {
            let mut num_running = 0;
            for job in &mut self.jobs {
                if !job.handle.poll() {
                    num_running += 1;
                }
            }
            if num_running == 0 {
                break;
            }
            if let Some(timeout) = policy.timeout {
                if start.elapsed() >= timeout {
                    // Jobs that exited since their last poll are not timed out
                    let mut num_timed_out = 0;
                    for job in &mut self.jobs {
                        if !job.handle.poll() {
                            job.handle.time_out(timeout);
                            num_timed_out += 1;
                        }
                    }
                    if num_timed_out > 0 {
                        info!("batch join timed out with {num_timed_out} job(s) still running");
                    }
                    break;
                }
            }
            thread::sleep(policy.poll_interval);
        }

        self.jobs
            .into_iter()
            .map(|job| {
                let RemoteJob {
                    point,
                    partition,
                    handle,
                    ..
                } = job;
                let result = handle.into_outcome().expect("all jobs resolved above");
                JobResult {
                    point,
                    partition,
                    result,
                }
            })
            .collect()
    }
}
