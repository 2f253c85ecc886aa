//! The orchestration driver against a scripted transport that records
//! when jobs are started, finish and are killed.

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;

use scaling_experiments::{
    experiment::{
        family::{FamilyConfig, FamilyName},
        point::{AxisName, ExperimentPoint},
        sweep::{Axis, ParameterSweep},
    },
    io_utils::bash::bash_redirect_stdout,
    run::{
        config::ResumePolicy,
        driver::{DriverOpts, FamilyFailure, FamilyReport, OrchestrationDriver},
        output_directory_structure::{RunDir, MANIFEST_FILE_NAME},
        remote_executor::{
            Host, JobExit, JobProcess, RemoteExecutor, RemoteJobError, Transport, WaitPolicy,
        },
        run_context::RunContext,
    },
};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Spawn(String),
    Exit(String),
    Kill(String),
}

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    /// Finishes after being polled this many times
    Exit { polls: usize, code: i32 },
    Hang,
    SpawnError,
}

type Events = Arc<Mutex<Vec<Event>>>;

struct FakeProcess {
    shell_text: String,
    behaviour: Behaviour,
    polls: usize,
    events: Events,
}

impl JobProcess for FakeProcess {
    fn try_wait(&mut self) -> std::io::Result<Option<JobExit>> {
        match self.behaviour {
            Behaviour::Exit { polls, code } => {
                if self.polls < polls {
                    self.polls += 1;
                    return Ok(None);
                }
                self.events
                    .lock()
                    .unwrap()
                    .push(Event::Exit(self.shell_text.clone()));
                Ok(Some(if code == 0 {
                    JobExit::Success
                } else {
                    JobExit::Failure(Some(code))
                }))
            }
            Behaviour::Hang | Behaviour::SpawnError => Ok(None),
        }
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Kill(self.shell_text.clone()));
        Ok(())
    }
}

/// Chooses the behaviour of a job by the first of `rules` whose
/// pattern occurs in its shell text; the default is a quick success.
struct FakeTransport {
    events: Events,
    rules: Vec<(&'static str, Behaviour)>,
}

impl Transport for FakeTransport {
    fn shell_text(&self, host: &Host, remote_command: &str) -> String {
        format!("{host}: {remote_command}")
    }

    fn spawn(&self, shell_text: &str) -> std::io::Result<Box<dyn JobProcess>> {
        let behaviour = self
            .rules
            .iter()
            .find(|(pattern, _)| shell_text.contains(pattern))
            .map(|(_, behaviour)| *behaviour)
            .unwrap_or(Behaviour::Exit { polls: 2, code: 0 });
        if let Behaviour::SpawnError = behaviour {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such program",
            ));
        }
        self.events
            .lock()
            .unwrap()
            .push(Event::Spawn(shell_text.into()));
        Ok(Box::new(FakeProcess {
            shell_text: shell_text.into(),
            behaviour,
            polls: 0,
            events: self.events.clone(),
        }))
    }
}

fn temp_results_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "scaling-experiments-orchestration-{}-{name}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

struct Setup {
    driver: OrchestrationDriver<FakeTransport>,
    events: Events,
    run_dir: RunDir,
}

fn setup(
    name: &str,
    rules: Vec<(&'static str, Behaviour)>,
    partitions_per_node: usize,
    opts: DriverOpts,
) -> Setup {
    let events: Events = Default::default();
    let transport = FakeTransport {
        events: events.clone(),
        rules,
    };
    let context = RunContext::new("testrun".parse().unwrap(), temp_results_dir(name));
    let run_dir = RunDir::from_context(&context);
    let driver = OrchestrationDriver::new(
        RemoteExecutor::new(transport, "/src".into()),
        context,
        Host("node1".into()),
        partitions_per_node,
        DriverOpts {
            wait_policy: WaitPolicy {
                poll_interval: Duration::from_millis(1),
                ..opts.wait_policy
            },
            ..opts
        },
    );
    Setup {
        driver,
        events,
        run_dir,
    }
}

fn family(name: &str, command: &str, axes: &str, batch_axes: &str) -> FamilyConfig {
    serde_json::from_str(&format!(
        r#"{{ "name": "{name}", "command": "{command}", "axes": {axes}, "batch_axes": {batch_axes} }}"#
    ))
    .unwrap()
}

fn events(events: &Events) -> Vec<Event> {
    events.lock().unwrap().clone()
}

fn position(events: &[Event], f: impl Fn(&Event) -> bool) -> usize {
    events.iter().position(f).expect("event present")
}

fn is_spawn(s: &str) -> impl Fn(&Event) -> bool + '_ {
    move |e| matches!(e, Event::Spawn(t) if t.contains(s))
}

fn is_exit(s: &str) -> impl Fn(&Event) -> bool + '_ {
    move |e| matches!(e, Event::Exit(t) if t.contains(s))
}

fn spawned(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Spawn(s) => Some(s.as_str()),
            _ => None,
        })
        .collect()
}

#[test]
fn batches_run_concurrently_inside_and_sequentially_across() -> Result<()> {
    let Setup {
        driver,
        events: log,
        run_dir,
    } = setup("isolation", vec![], 2, DriverOpts::default());
    let fam = family(
        "wc",
        "work {map_mode} {p}",
        r#"[{"name": "map_mode", "values": ["sudden", "fluid"]}, {"name": "p", "values": [0, 1]}]"#,
        r#"["p"]"#,
    );
    let report = driver.run_configured_family(&fam);
    assert!(report.is_success(), "{report}");
    assert_eq!(report.batches_run, 2);
    assert_eq!(report.points_run, 4);

    let events = events(&log);
    let spawns = spawned(&events);
    assert_eq!(spawns.len(), 4);
    let experiment_dir = run_dir.experiment_dir(&fam.name);
    let result_file = experiment_dir.result_file(&"map_mode=sudden,p=1".parse::<ExperimentPoint>()?);
    assert_eq!(
        spawns[1],
        bash_redirect_stdout("node1: cd /src; work sudden 1", &result_file)
    );

    // Both jobs of a batch are started before either finishes
    assert!(
        position(&events, is_spawn("work sudden 1"))
            < position(&events, is_exit("work sudden 0"))
    );
    // The second batch starts after the whole first batch finished
    let first_of_second = position(&events, is_spawn("work fluid 0"));
    assert!(position(&events, is_exit("work sudden 0")) < first_of_second);
    assert!(position(&events, is_exit("work sudden 1")) < first_of_second);

    let manifest = std::fs::read_to_string(experiment_dir.path().join(MANIFEST_FILE_NAME))?;
    assert!(manifest.contains("testrun"), "{manifest}");
    assert!(manifest.contains("work fluid 1"), "{manifest}");
    Ok(())
}

#[test]
fn a_failing_job_aborts_only_its_family() -> Result<()> {
    let Setup {
        driver,
        events: log,
        ..
    } = setup(
        "failure",
        vec![("broken a 1", Behaviour::Exit { polls: 1, code: 3 })],
        2,
        DriverOpts::default(),
    );
    let axes = r#"[{"name": "m", "values": ["a", "b", "c"]}, {"name": "p", "values": [0, 1]}]"#;
    let families = [
        family("first", "broken {m} {p}", axes, r#"["p"]"#),
        family("second", "fine {m} {p}", axes, r#"["p"]"#),
    ];
    let reports = driver.run_families(&families);
    assert_eq!(reports.len(), 2);

    let FamilyReport {
        batches_run,
        failure,
        ..
    } = &reports[0];
    assert_eq!(*batches_run, 1);
    match failure {
        Some(FamilyFailure::Job {
            point,
            error,
            remaining_points,
        }) => {
            assert_eq!(point.encode(), "m=a,p=1");
            assert!(error.is_remote_command_failure());
            assert!(matches!(
                error,
                RemoteJobError::Failed { code: Some(3), .. }
            ));
            assert_eq!(*remaining_points, 4);
        }
        _ => panic!("expected a job failure, got {failure:?}"),
    }
    assert!(reports[1].is_success());
    assert_eq!(reports[1].points_run, 6);

    let events = events(&log);
    let spawns = spawned(&events);
    assert!(spawns.iter().all(|s| !s.contains("broken b")));
    assert_eq!(spawns.iter().filter(|s| s.contains("fine")).count(), 6);
    Ok(())
}

#[test]
fn hung_jobs_time_out_and_are_killed() {
    let Setup {
        driver,
        events: log,
        ..
    } = setup(
        "timeout",
        vec![("sleepy x 1", Behaviour::Hang)],
        2,
        DriverOpts {
            wait_policy: WaitPolicy {
                timeout: Some(Duration::from_millis(30)),
                ..WaitPolicy::default()
            },
            ..DriverOpts::default()
        },
    );
    let fam = family(
        "sleepy",
        "sleepy {m} {p}",
        r#"[{"name": "m", "values": ["x", "y"]}, {"name": "p", "values": [0, 1]}]"#,
        r#"["p"]"#,
    );
    let report = driver.run_configured_family(&fam);
    match &report.failure {
        Some(FamilyFailure::Job { point, error, .. }) => {
            assert_eq!(point.encode(), "m=x,p=1");
            assert!(matches!(error, RemoteJobError::TimedOut { .. }));
            assert!(!error.is_remote_command_failure());
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    let events = events(&log);
    let kills: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, Event::Kill(_)))
        .collect();
    assert_eq!(kills.len(), 1);
    assert!(matches!(kills[0], Event::Kill(t) if t.contains("sleepy x 1")));
    assert!(spawned(&events).iter().all(|s| !s.contains("sleepy y")));
}

#[test]
fn a_dispatch_failure_stops_the_batch_but_joins_running_jobs() {
    let Setup {
        driver,
        events: log,
        ..
    } = setup(
        "dispatch",
        vec![("job 1", Behaviour::SpawnError)],
        3,
        DriverOpts::default(),
    );
    let fam = family(
        "d",
        "job {p}",
        r#"[{"name": "p", "values": [0, 1, 2]}]"#,
        r#"["p"]"#,
    );
    let report = driver.run_configured_family(&fam);
    match &report.failure {
        Some(FamilyFailure::Job { point, error, .. }) => {
            assert_eq!(point.encode(), "p=1");
            assert!(matches!(error, RemoteJobError::Spawn { .. }));
        }
        other => panic!("expected a spawn failure, got {other:?}"),
    }
    let events = events(&log);
    assert_eq!(spawned(&events).len(), 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Exit(t) if t.contains("job 0"))));
}

#[test]
fn skip_existing_skips_complete_batches_only() -> Result<()> {
    let Setup {
        driver,
        events: log,
        run_dir,
    } = setup(
        "resume",
        vec![],
        2,
        DriverOpts {
            resume_policy: ResumePolicy::SkipExisting,
            ..DriverOpts::default()
        },
    );
    let fam = family(
        "r",
        "run {m} {p}",
        r#"[{"name": "m", "values": ["a", "b"]}, {"name": "p", "values": [0, 1]}]"#,
        r#"["p"]"#,
    );
    let experiment_dir = run_dir.experiment_dir(&fam.name);
    std::fs::create_dir_all(experiment_dir.path())?;
    for point in ["m=a,p=0", "m=a,p=1", "m=b,p=0"] {
        std::fs::write(experiment_dir.result_file(&point.parse::<ExperimentPoint>()?), "")?;
    }
    let report = driver.run_configured_family(&fam);
    assert!(report.is_success());
    assert_eq!(report.points_skipped, 2);
    assert_eq!(report.batches_run, 1);
    let events = events(&log);
    let spawns = spawned(&events);
    assert_eq!(spawns.len(), 2);
    assert!(spawns.iter().all(|s| s.contains("run b")));
    Ok(())
}

#[test]
fn three_map_modes_form_one_concurrent_batch() -> Result<()> {
    let Setup {
        driver,
        events: log,
        run_dir,
    } = setup("scenario", vec![], 3, DriverOpts::default());
    let map_mode: AxisName = "map_mode".parse()?;
    let sweep = ParameterSweep::new(vec![
        Axis {
            name: map_mode.clone(),
            values: vec!["sudden".parse()?, "one-by-one".parse()?, "fluid".parse()?],
        },
        Axis {
            name: "nodes".parse()?,
            values: vec!["2".parse()?],
        },
    ])?;
    assert_eq!(sweep.enumerate().len(), 3);
    let name: FamilyName = "scenario".parse()?;
    let report = driver.run_family(
        &name,
        &sweep,
        |point: &ExperimentPoint, partition| {
            Ok(format!(
                "hwloc-bind socket:{partition} -- word_count {}",
                point.get("map_mode").unwrap()
            ))
        },
        |point| point.without_axes(&[map_mode.clone()]),
    );
    assert!(report.is_success(), "{report}");
    assert_eq!(report.batches_run, 1);
    assert_eq!(report.points_run, 3);

    let events = events(&log);
    // All three started before the first one finished
    assert!(matches!(&events[..3], [Event::Spawn(_), Event::Spawn(_), Event::Spawn(_)]));
    let spawns = spawned(&events);
    for (partition, mode) in ["sudden", "one-by-one", "fluid"].iter().enumerate() {
        assert!(spawns[partition].contains(&format!("socket:{partition} -- word_count {mode}")));
    }
    let experiment_dir = run_dir.experiment_dir(&name);
    let files: HashSet<PathBuf> = sweep
        .enumerate()
        .iter()
        .map(|p| experiment_dir.result_file(p))
        .collect();
    assert_eq!(files.len(), 3);
    Ok(())
}

#[test]
fn oversized_batches_and_empty_sweeps() -> Result<()> {
    let Setup {
        driver,
        events: log,
        run_dir,
    } = setup("setup", vec![], 2, DriverOpts::default());
    let too_big = family(
        "big",
        "x {p}",
        r#"[{"name": "p", "values": [0, 1, 2]}]"#,
        r#"["p"]"#,
    );
    let report = driver.run_configured_family(&too_big);
    assert!(matches!(report.failure, Some(FamilyFailure::Setup(_))));

    let bad_placeholder = family(
        "bad",
        "x {q}",
        r#"[{"name": "p", "values": [0]}]"#,
        r#"[]"#,
    );
    let report = driver.run_configured_family(&bad_placeholder);
    assert!(matches!(report.failure, Some(FamilyFailure::Setup(_))));

    let empty = family(
        "empty",
        "x {p} {m}",
        r#"[{"name": "p", "values": [0, 1]}, {"name": "m", "values": []}]"#,
        r#"["p"]"#,
    );
    let report = driver.run_configured_family(&empty);
    assert!(report.is_success());
    assert_eq!(report.points_run, 0);
    assert!(!run_dir.experiment_dir(&empty.name).path().exists());

    assert!(events(&log).is_empty());
    Ok(())
}

#[test]
fn dry_run_dispatches_nothing() {
    let Setup {
        driver,
        events: log,
        run_dir,
    } = setup(
        "dry",
        vec![],
        2,
        DriverOpts {
            dry_run: true,
            ..DriverOpts::default()
        },
    );
    let fam = family(
        "dry",
        "x {p}",
        r#"[{"name": "p", "values": [0, 1]}]"#,
        r#"["p"]"#,
    );
    let report = driver.run_configured_family(&fam);
    assert!(report.is_success());
    assert_eq!(report.batches_run, 0);
    assert!(events(&log).is_empty());
    assert!(!run_dir.experiment_dir(&fam.name).path().exists());
    driver
        .run_prepare_commands(&["cargo build --release".into()])
        .unwrap();
    assert!(events(&log).is_empty());
}

#[test]
fn jobs_finishing_at_the_deadline_are_not_killed() {
    let Setup {
        driver,
        events: log,
        ..
    } = setup(
        "deadline",
        vec![("edge", Behaviour::Exit { polls: 1, code: 0 })],
        1,
        DriverOpts {
            wait_policy: WaitPolicy {
                timeout: Some(Duration::ZERO),
                ..WaitPolicy::default()
            },
            ..DriverOpts::default()
        },
    );
    let fam = family(
        "edge",
        "edge {p}",
        r#"[{"name": "p", "values": [0]}]"#,
        r#"["p"]"#,
    );
    let report = driver.run_configured_family(&fam);
    assert!(report.is_success(), "{report}");
    assert_eq!(report.points_run, 1);
    let events = events(&log);
    assert!(events.iter().any(is_exit("edge 0")));
    assert!(!events.iter().any(|e| matches!(e, Event::Kill(_))));
}

#[test]
fn prepare_commands_ignore_the_batch_timeout() {
    let Setup {
        driver,
        events: log,
        ..
    } = setup(
        "prepare",
        vec![("cargo build", Behaviour::Exit { polls: 20, code: 0 })],
        1,
        DriverOpts {
            wait_policy: WaitPolicy {
                timeout: Some(Duration::ZERO),
                ..WaitPolicy::default()
            },
            ..DriverOpts::default()
        },
    );
    driver
        .run_prepare_commands(&["cargo build --release --example word_count".into()])
        .unwrap();
    let events = events(&log);
    assert!(events.iter().any(is_exit("cargo build")));
    assert!(!events.iter().any(|e| matches!(e, Event::Kill(_))));
}
