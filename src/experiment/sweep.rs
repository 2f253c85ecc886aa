//! Enumeration of the Cartesian product of the configuration axes of
//! an experiment family, and grouping of the resulting points into
//! batches that run concurrently.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use itertools::Itertools;

use crate::serde::point_atom::PointAtom;

use super::point::{AxisName, BatchKey, ExperimentPoint};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Axis {
    pub name: AxisName,
    pub values: Vec<PointAtom>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ParameterSweep {
    axes: Vec<Axis>,
}

impl ParameterSweep {
    /// Requires at least one axis, unique axis names and unique values
    /// per axis (otherwise the same point would be produced twice).
    /// Axes without values are allowed and make the sweep empty.
    pub fn new(axes: Vec<Axis>) -> Result<Self> {
        if axes.is_empty() {
            bail!("a parameter sweep needs at least one axis")
        }
        if let Some(dup) = axes.iter().map(|a| &a.name).duplicates().next() {
            bail!("duplicate axis name {dup:?}")
        }
        for axis in &axes {
            if let Some(dup) = axis.values.iter().duplicates().next() {
                bail!("duplicate value {dup:?} for axis {:?}", axis.name)
            }
        }
        Ok(Self { axes })
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn has_axis(&self, name: &str) -> bool {
        self.axes.iter().any(|a| a.name.as_str() == name)
    }

    /// The product of the axis cardinalities
    pub fn len(&self) -> usize {
        self.axes.iter().map(|a| a.values.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All points, the first axis varying slowest and values in their
    /// given order.
    pub fn enumerate(&self) -> Vec<ExperimentPoint> {
        self.axes
            .iter()
            .map(|axis| axis.values.iter().cloned())
            .multi_cartesian_product()
            .map(|values| {
                let assignments = self
                    .axes
                    .iter()
                    .map(|axis| axis.name.clone())
                    .zip(values)
                    .collect();
                ExperimentPoint::new(assignments)
                    .expect("axis names were checked for duplicates in `new`")
            })
            .collect()
    }

    /// Group the enumerated points by `batch_key`, batches ordered by
    /// their first point, points within a batch in enumeration order.
    pub fn batches(&self, batch_key: impl Fn(&ExperimentPoint) -> BatchKey) -> Vec<Batching> {
        let mut index: BTreeMap<BatchKey, usize> = BTreeMap::new();
        let mut batches: Vec<Batching> = Vec::new();
        for point in self.enumerate() {
            let key = batch_key(&point);
            if let Some(&i) = index.get(&key) {
                batches[i].points.push(point);
            } else {
                index.insert(key.clone(), batches.len());
                batches.push(Batching {
                    key,
                    points: vec![point],
                });
            }
        }
        batches
    }
}

/// The points of one batch, before dispatching.
#[derive(Debug, Clone, PartialEq)]
pub struct Batching {
    pub key: BatchKey,
    pub points: Vec<ExperimentPoint>,
}
