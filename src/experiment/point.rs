//! One concrete parameter assignment of a sweep, and its canonical
//! string encoding, which is used as the result file name.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use anyhow::{anyhow, bail, Result};
use itertools::Itertools;
use kstring::KString;

use crate::serde::{key_val::KeyVal, point_atom::PointAtom};

pub type AxisName = PointAtom;

/// Ordered mapping of axis name to value. The encoding
/// `axis=value,axis2=value2` (in axis order) is injective since atoms
/// cannot contain `,` or `=`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct ExperimentPoint(Vec<(AxisName, PointAtom)>);

impl ExperimentPoint {
    /// Fails on duplicate axis names or an empty assignment.
    pub fn new(assignments: Vec<(AxisName, PointAtom)>) -> Result<Self> {
        if assignments.is_empty() {
            bail!("an experiment point needs at least one axis")
        }
        if let Some(dup) = assignments.iter().map(|(k, _)| k).duplicates().next() {
            bail!("duplicate axis {dup:?} in experiment point")
        }
        Ok(Self(assignments))
    }

    pub fn get(&self, axis: &str) -> Option<&PointAtom> {
        self.0
            .iter()
            .find(|(k, _)| k.as_str() == axis)
            .map(|(_, v)| v)
    }

    /// The (axis, value) pairs in axis order
    pub fn assignments(&self) -> &[(AxisName, PointAtom)] {
        &self.0
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// The point with the given axes removed, identifying the batch the
    /// point belongs to.
    pub fn without_axes(&self, axes: &[AxisName]) -> BatchKey {
        BatchKey(
            self.0
                .iter()
                .filter(|(k, _)| !axes.contains(k))
                .cloned()
                .collect(),
        )
    }

    /// The assignments as metadata for result records.
    pub fn to_metadata(&self) -> BTreeMap<KString, KString> {
        self.0
            .iter()
            .map(|(k, v)| (k.kstring().clone(), v.kstring().clone()))
            .collect()
    }
}

impl Display for ExperimentPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut is_first = true;
        for (k, v) in &self.0 {
            write!(f, "{}{k}={v}", if is_first { "" } else { "," })?;
            is_first = false;
        }
        Ok(())
    }
}

impl FromStr for ExperimentPoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let assignments = s
            .split(',')
            .map(|kv| {
                let KeyVal { key, val } = kv.parse()?;
                Ok((key, val))
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|e| anyhow!("not an experiment point encoding: {s:?}: {e:#}"))?;
        Self::new(assignments)
    }
}

/// A point projected onto the axes that stay fixed within a batch;
/// can be empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchKey(Vec<(AxisName, PointAtom)>);

impl Display for BatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(all points)");
        }
        let s = self.0.iter().map(|(k, v)| format!("{k}={v}")).join(",");
        f.write_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(s: &str) -> PointAtom {
        s.parse().expect("valid atom")
    }

    fn point(kvs: &[(&str, &str)]) -> ExperimentPoint {
        ExperimentPoint::new(kvs.iter().map(|(k, v)| (atom(k), atom(v))).collect())
            .expect("valid point")
    }

    #[test]
    fn t_encode_decode() -> Result<()> {
        let p = point(&[("batch", "1000000"), ("map_mode", "one-by-one"), ("p", "0")]);
        let s = p.encode();
        assert_eq!(s, "batch=1000000,map_mode=one-by-one,p=0");
        assert_eq!(ExperimentPoint::from_str(&s)?, p);
        Ok(())
    }

    #[test]
    fn t_axis_order_is_kept() -> Result<()> {
        let p = point(&[("w", "1"), ("n", "2")]);
        assert_eq!(p.encode(), "w=1,n=2");
        let q = ExperimentPoint::from_str("w=1,n=2")?;
        assert_eq!(q.assignments()[0].0.as_str(), "w");
        assert_eq!(q.assignments()[1].1.as_str(), "2");
        assert_eq!(q.get("n").map(|v| v.as_str()), Some("2"));
        Ok(())
    }

    #[test]
    fn t_decode_errors() {
        assert!(ExperimentPoint::from_str("").is_err());
        assert!(ExperimentPoint::from_str("a=1,a=2").is_err());
        assert!(ExperimentPoint::from_str("a=1,,b=2").is_err());
        assert!(ExperimentPoint::from_str("word_count_n2_w1").is_err());
    }

    #[test]
    fn t_without_axes() {
        let p = point(&[("map_mode", "fluid"), ("n", "2"), ("p", "1")]);
        let key = p.without_axes(&[atom("p")]);
        assert_eq!(key.to_string(), "map_mode=fluid,n=2");
        let q = point(&[("map_mode", "fluid"), ("n", "2"), ("p", "0")]);
        assert_eq!(q.without_axes(&[atom("p")]), key);
        assert_eq!(
            p.without_axes(&[atom("p"), atom("n"), atom("map_mode")])
                .to_string(),
            "(all points)"
        );
    }
}
