//! Writing CCDF series as a self-contained vega-lite chart document.
//!
//! The document embeds all data values, and its file name is derived
//! from the sorted filter pairs only, so generating the chart for the
//! same filter again overwrites the previous one.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use itertools::Itertools;
use run_git::path_util::AppendToPath;
use serde_json::{json, Value};

use crate::{
    ctx,
    io_util::{create_dir_if_not_exists, write_file_atomically},
    results::ccdf::CcdfSeries,
    run::run_context::{RunContext, RunId},
    serde::{key_val::KeyVal, point_atom::PointAtom},
};

pub const DEFAULT_PLOT_NAME: &str = "migration_queries_latency";

/// Where a chart was written to.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedChart {
    /// Relative to the current directory if `charts_dir` was relative
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
}

/// `k: v, k2: v2`
pub fn chart_title(title_metadata: &[KeyVal]) -> String {
    title_metadata
        .iter()
        .sorted_by(|a, b| a.key.cmp(&b.key))
        .map(|KeyVal { key, val }| format!("{key}: {val}"))
        .join(", ")
}

/// `<plot_name>+<k=v,k2=v2>.html`, keys sorted
pub fn chart_file_name(plot_name: &PointAtom, title_metadata: &[KeyVal]) -> String {
    let encoded = title_metadata
        .iter()
        .sorted_by(|a, b| a.key.cmp(&b.key))
        .join(",");
    format!("{plot_name}+{encoded}.html")
}

/// One data row per CCDF point
pub fn chart_rows(series: &[CcdfSeries]) -> Vec<Value> {
    series
        .iter()
        .flat_map(|s| {
            s.points.iter().map(move |p| {
                json!({
                    "latency": p.latency.raw(),
                    "ccdf": p.ccdf,
                    "experiment": s.key.experiment.as_str(),
                    "queries": s.key.queries.as_str(),
                    "rate": s.key.rate.as_str(),
                })
            })
        })
        .collect()
}

/// Log-log CCDF lines faceted by experiment (rows) and queries
/// (columns), one line per rate, plus a legend of the rates.
pub fn vega_lite_spec(series: &[CcdfSeries], title_metadata: &[KeyVal]) -> Value {
    json!({
        "$schema": "https://vega.github.io/schema/vega-lite/v2.json",
        "title": chart_title(title_metadata),
        "hconcat": [
            {
                "mark": "line",
                "encoding": {
                    "x": {
                        "field": "latency",
                        "type": "quantitative",
                        "axis": { "format": "e", "labelAngle": -90 },
                        "scale": { "type": "log" }
                    },
                    "y": { "field": "ccdf", "type": "quantitative", "scale": { "type": "log" } },
                    "row": { "field": "experiment", "type": "nominal" },
                    "column": { "field": "queries", "type": "nominal" },
                    "stroke": { "field": "rate", "type": "nominal", "legend": null },
                    "shape": { "field": "rate", "type": "nominal", "legend": null }
                }
            },
            {
                "mark": "point",
                "encoding": {
                    "shape": { "field": "rate", "aggregate": "min", "type": "nominal", "legend": null },
                    "fill": { "field": "rate", "aggregate": "min", "type": "nominal", "legend": null },
                    "y": { "field": "rate", "type": "nominal", "title": null }
                }
            }
        ],
        "data": { "values": chart_rows(series) }
    })
}

pub fn html_document(spec: &Value) -> Result<String> {
    let spec_json = serde_json::to_string(spec)?;
    Ok(format!(
        r##"<!DOCTYPE html>
<html>
<head>
  <script src="https://cdn.jsdelivr.net/npm/vega@3"></script>
  <script src="https://cdn.jsdelivr.net/npm/vega-lite@2"></script>
  <script src="https://cdn.jsdelivr.net/npm/vega-embed@3"></script>
</head>
<body>

  <div id="vis"></div>

  <script type="text/javascript">
    const vega_lite_spec = {spec_json};

    vegaEmbed("#vis", vega_lite_spec, {{ "renderer": "svg" }});
  </script>
</body>
</html>
"##
    ))
}

pub struct ChartEmitter {
    charts_dir: PathBuf,
    run_id: RunId,
    plot_name: PointAtom,
}

impl ChartEmitter {
    pub fn new(charts_dir: PathBuf, context: &RunContext, plot_name: PointAtom) -> Self {
        Self {
            charts_dir,
            run_id: context.run_id.clone(),
            plot_name,
        }
    }

    /// `<charts_dir>/<run-id>`
    pub fn run_charts_dir(&self) -> PathBuf {
        (&self.charts_dir).append(self.run_id.as_str())
    }

    /// Write the chart for `series`, replacing a chart for the same
    /// title metadata if present.
    pub fn emit(&self, series: &[CcdfSeries], title_metadata: &[KeyVal]) -> Result<EmittedChart> {
        if series.is_empty() {
            bail!("no data to chart for {:?}", chart_title(title_metadata))
        }
        let dir = self.run_charts_dir();
        create_dir_if_not_exists(&dir, "charts directory")?;
        let relative_path = dir.append(chart_file_name(&self.plot_name, title_metadata));
        let html = html_document(&vega_lite_spec(series, title_metadata))?;
        write_file_atomically(&relative_path, &html)?;
        let absolute_path = absolute(&relative_path)?;
        Ok(EmittedChart {
            relative_path,
            absolute_path,
        })
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_owned())
    } else {
        let cwd = std::env::current_dir().map_err(ctx!("getting the current directory"))?;
        Ok(cwd.join(path))
    }
}
