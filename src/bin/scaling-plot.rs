use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use scaling_experiments::{
    chart::ChartEmitter,
    get_terminal_width::get_terminal_width,
    info, notice,
    results::{ccdf::aggregate, filter::FilterPredicate, loader::load_results_tree},
    run::run_context::RunContext,
    serde::point_atom::PointAtom,
    utillib::logging::{set_log_level, LogLevelOpt},
};

#[derive(clap::Parser, Debug)]
#[clap(next_line_help = true)]
#[clap(set_term_width = get_terminal_width())]
/// Plot the latency CCDFs of the results of one run, restricted to
/// the records matching a filter. Prints the path of the written
/// chart to stdout (and the absolute path to stderr).
struct Opts {
    #[clap(flatten)]
    log_level: LogLevelOpt,

    /// Used as the start of the chart file name
    #[clap(long, default_value = "migration_queries_latency")]
    plot_name: PointAtom,

    /// The charts are written to `<charts-dir>/<run-id>/`
    #[clap(long, default_value = "charts")]
    charts_dir: PathBuf,

    /// The results directory of one run (its name is the run id), as
    /// written by `scaling-run`
    results_dir: PathBuf,

    /// `key=value` pairs (also several per argument, separated by
    /// `,`) that the plotted records must all match
    filter: Vec<String>,
}

fn main() -> Result<()> {
    let Opts {
        log_level,
        plot_name,
        charts_dir,
        results_dir,
        filter,
    } = Opts::parse();

    set_log_level(log_level.try_into()?);

    if !results_dir.is_dir() {
        bail!("results directory {results_dir:?} does not exist or is not a directory")
    }
    let context = RunContext::from_results_dir(&results_dir)?;
    notice!("commit: {}", context.run_id);

    let predicate = FilterPredicate::parse(&filter)?;
    let report = load_results_tree(&results_dir)?;
    if report.records.is_empty() {
        bail!(
            "no result records found in {results_dir:?} ({} files skipped)",
            report.skipped.len()
        )
    }
    info!(
        "loaded {} records, skipped {} files",
        report.records.len(),
        report.skipped.len()
    );
    predicate.validate_keys(&report.records)?;

    let selected = predicate.select(&report.records);
    if selected.is_empty() {
        bail!(
            "no records in {results_dir:?} match the filter {:?}",
            predicate.encode()
        )
    }
    let title_metadata = predicate.title_metadata(&selected);
    let series = aggregate(selected.iter().copied())?;

    let emitter = ChartEmitter::new(charts_dir, &context, plot_name);
    let chart = emitter.emit(&series, &title_metadata)?;
    println!("{}", chart.relative_path.display());
    eprintln!("{}", chart.absolute_path.display());
    Ok(())
}
