//! An experiment family: a sweep plus how each point is turned into
//! a command bound to one hardware partition.

use std::{fmt::Display, str::FromStr};

use anyhow::{anyhow, bail, Result};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;

use crate::{io_utils::bash::bash_string_literal, serde::point_atom::PointAtom};

use super::{
    point::{AxisName, BatchKey, ExperimentPoint},
    sweep::{Axis, ParameterSweep},
};

pub type FamilyName = PointAtom;

/// Placeholder expanding to the partition index of a job
pub const PARTITION_PLACEHOLDER: &str = "partition";

/// Index of the hardware partition (e.g. socket) a job is pinned to,
/// unique within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub struct PartitionIndex(pub usize);

impl Display for PartitionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TemplateSegment {
    Literal(String),
    Placeholder(String),
}

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([^{}]*)\}").expect("valid regex");
}

/// A command with `{axis}` and `{partition}` placeholders. Values are
/// shell quoted when substituted.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommandTemplate {
    source: String,
    segments: Vec<TemplateSegment>,
}

impl FromStr for CommandTemplate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        let mut last = 0;
        for cap in PLACEHOLDER.captures_iter(s) {
            let whole = cap.get(0).expect("group 0 always exists");
            let literal = &s[last..whole.start()];
            if literal.contains(['{', '}']) {
                bail!("unbalanced brace in command template {s:?}")
            }
            if !literal.is_empty() {
                segments.push(TemplateSegment::Literal(literal.into()));
            }
            let name = &cap[1];
            if name.is_empty() {
                bail!("empty placeholder `{{}}` in command template {s:?}")
            }
            segments.push(TemplateSegment::Placeholder(name.into()));
            last = whole.end();
        }
        let rest = &s[last..];
        if rest.contains(['{', '}']) {
            bail!("unbalanced brace in command template {s:?}")
        }
        if !rest.is_empty() {
            segments.push(TemplateSegment::Literal(rest.into()));
        }
        if segments.is_empty() {
            bail!("empty command template")
        }
        Ok(Self {
            source: s.into(),
            segments,
        })
    }
}

impl TryFrom<String> for CommandTemplate {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CommandTemplate> for String {
    fn from(value: CommandTemplate) -> Self {
        value.source
    }
}

impl CommandTemplate {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            TemplateSegment::Literal(_) => None,
            TemplateSegment::Placeholder(name) => Some(name.as_str()),
        })
    }

    pub fn expand(&self, point: &ExperimentPoint, partition: PartitionIndex) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(s) => out.push_str(s),
                TemplateSegment::Placeholder(name) => {
                    if name == PARTITION_PLACEHOLDER {
                        out.push_str(&partition.to_string());
                    } else {
                        let val = point.get(name).ok_or_else(|| {
                            anyhow!("placeholder {{{name}}} does not name an axis of point {point}")
                        })?;
                        out.push_str(&bash_string_literal(val.as_str()));
                    }
                }
            }
        }
        Ok(out)
    }
}

/// How a job gets pinned to its partition
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AffinityBinding {
    /// No pinning, e.g. when the command pins itself via `{partition}`
    #[default]
    None,
    /// `hwloc-bind <object>:<i> -- `, e.g. with object `socket`
    HwlocBind { object: String },
    /// `numactl --cpunodebind=<i> --membind=<i> -- `
    Numactl,
}

impl AffinityBinding {
    pub fn prefix(&self, partition: PartitionIndex) -> String {
        match self {
            AffinityBinding::None => String::new(),
            AffinityBinding::HwlocBind { object } => {
                format!(
                    "hwloc-bind {} -- ",
                    bash_string_literal(&format!("{object}:{partition}"))
                )
            }
            AffinityBinding::Numactl => {
                format!("numactl --cpunodebind={partition} --membind={partition} -- ")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FamilyConfig {
    /// Also the name of the experiment directory holding the results
    pub name: FamilyName,
    pub command: CommandTemplate,
    #[serde(default)]
    pub affinity: AffinityBinding,
    /// In order; the first axis varies slowest
    pub axes: Vec<Axis>,
    /// The axes varying within one batch; all points agreeing on the
    /// other axes run concurrently, one per partition
    #[serde(default)]
    pub batch_axes: Vec<AxisName>,
}

impl FamilyConfig {
    /// The sweep, after checking that the batch axes and the template
    /// placeholders refer to existing axes.
    pub fn sweep(&self) -> Result<ParameterSweep> {
        let sweep = ParameterSweep::new(self.axes.clone())
            .map_err(|e| anyhow!("family {}: {e:#}", self.name))?;
        for axis in &self.batch_axes {
            if !sweep.has_axis(axis.as_str()) {
                bail!(
                    "family {}: batch axis {axis:?} is not one of the axes {}",
                    self.name,
                    sweep.axes().iter().map(|a| a.name.as_str()).join(", ")
                )
            }
        }
        for name in self.command.placeholders() {
            if name != PARTITION_PLACEHOLDER && !sweep.has_axis(name) {
                bail!(
                    "family {}: placeholder {{{name}}} in command {:?} is neither \
                     {{{PARTITION_PLACEHOLDER}}} nor one of the axes {}",
                    self.name,
                    self.command.as_str(),
                    sweep.axes().iter().map(|a| a.name.as_str()).join(", ")
                )
            }
        }
        Ok(sweep)
    }

    pub fn batch_key(&self, point: &ExperimentPoint) -> BatchKey {
        point.without_axes(&self.batch_axes)
    }

    /// The full command for `point`, bound to `partition`.
    pub fn command_for(&self, point: &ExperimentPoint, partition: PartitionIndex) -> Result<String> {
        let command = self.command.expand(point, partition)?;
        Ok(format!("{}{command}", self.affinity.prefix(partition)))
    }
}
