//! Selecting the records relevant for one chart, by a conjunction of
//! `key=value` equalities over record metadata.

use std::{
    borrow::Borrow,
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use anyhow::{bail, Result};
use itertools::Itertools;

use crate::serde::{
    key_val::{parse_key_vals, KeyVal},
    point_atom::PointAtom,
};

use super::record::ResultRecord;

/// Equal if the same pairs are given, in whatever order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterPredicate(BTreeMap<PointAtom, PointAtom>);

impl FilterPredicate {
    /// Giving the same key twice is only allowed with the same value.
    pub fn from_key_vals(key_vals: impl IntoIterator<Item = KeyVal>) -> Result<Self> {
        let mut pairs = BTreeMap::new();
        for KeyVal { key, val } in key_vals {
            if let Some(old) = pairs.get(&key) {
                if *old != val {
                    bail!("filter key {key} given with two different values, {old} and {val}")
                }
            } else {
                pairs.insert(key, val);
            }
        }
        Ok(Self(pairs))
    }

    /// Parse command line arguments, each holding `k=v` pairs separated
    /// by `,`.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut key_vals = Vec::new();
        for arg in args {
            key_vals.extend(parse_key_vals(arg.as_ref())?);
        }
        Self::from_key_vals(key_vals)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rejects keys that appear in none of `records`.
    pub fn validate_keys<R: Borrow<ResultRecord>>(&self, records: &[R]) -> Result<()> {
        let known: BTreeSet<&str> = records
            .iter()
            .flat_map(|r| r.borrow().metadata.keys().map(|k| k.as_str()))
            .collect();
        let unknown: Vec<&str> = self
            .0
            .keys()
            .map(|k| k.as_str())
            .filter(|k| !known.contains(k))
            .collect();
        if !unknown.is_empty() {
            bail!(
                "unknown filter key(s) {}; valid keys are: {}",
                unknown.join(", "),
                known.iter().join(", ")
            )
        }
        Ok(())
    }

    pub fn matches(&self, record: &ResultRecord) -> bool {
        self.0
            .iter()
            .all(|(key, val)| record.get(key.as_str()) == Some(val.as_str()))
    }

    /// The matching records, in their original order.
    pub fn select<R: Borrow<ResultRecord>>(&self, records: impl IntoIterator<Item = R>) -> Vec<R> {
        records
            .into_iter()
            .filter(|r| self.matches(r.borrow()))
            .collect()
    }

    /// The predicate pairs present in the selected records, sorted by
    /// key, for chart titles and file names.
    pub fn title_metadata<R: Borrow<ResultRecord>>(&self, selected: &[R]) -> Vec<KeyVal> {
        self.0
            .iter()
            .filter(|(key, _)| {
                selected
                    .iter()
                    .any(|r| r.borrow().get(key.as_str()).is_some())
            })
            .map(|(key, val)| KeyVal {
                key: key.clone(),
                val: val.clone(),
            })
            .collect()
    }

    /// `k=v,k2=v2`, sorted by key
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl Display for FilterPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut is_first = true;
        for (key, val) in &self.0 {
            if !is_first {
                f.write_str(",")?;
            }
            is_first = false;
            write!(f, "{key}={val}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use noisy_float::prelude::r64;

    use crate::results::record::{Metadata, Observation};

    use super::*;

    fn record(pairs: &[(&'static str, &'static str)], latency: f64) -> ResultRecord {
        ResultRecord {
            metadata: pairs
                .iter()
                .map(|(k, v)| ((*k).into(), (*v).into()))
                .collect::<Metadata>(),
            observation: Observation::Sample {
                latency: r64(latency),
            },
        }
    }

    #[test]
    fn t_parse_and_order_independence() -> Result<()> {
        let a = FilterPredicate::parse(&["workers=8,processes=2", "duration=120"])?;
        let b = FilterPredicate::parse(&["duration=120", "processes=2", "workers=8"])?;
        assert_eq!(a, b);
        assert_eq!(a.encode(), "duration=120,processes=2,workers=8");
        assert_eq!(b.encode(), a.encode());

        assert_eq!(FilterPredicate::parse(&["w=1,w=1"])?.encode(), "w=1");
        assert!(FilterPredicate::parse(&["w=1", "w=2"]).is_err());
        assert!(FilterPredicate::parse(&["w"]).is_err());
        assert!(FilterPredicate::parse(&["w=a b"]).is_err());
        assert!(FilterPredicate::parse::<&str>(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn t_matches_and_select() -> Result<()> {
        let records = vec![
            record(&[("workers", "8"), ("rate", "1000")], 1.),
            record(&[("workers", "4"), ("rate", "1000")], 2.),
            record(&[("rate", "1000")], 3.),
            record(&[("workers", "8"), ("rate", "2000")], 4.),
        ];
        let p = FilterPredicate::parse(&["workers=8"])?;
        assert!(p.matches(&records[0]));
        assert!(!p.matches(&records[1]));
        assert!(!p.matches(&records[2]));

        let selected = p.select(&records);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[1].observation.latency(), r64(4.));
        assert_eq!(p.select(selected.clone()), selected);

        assert_eq!(FilterPredicate::default().select(&records).len(), 4);

        let titles = p.title_metadata(&selected);
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].to_string(), "workers=8");
        Ok(())
    }

    #[test]
    fn t_validate_keys() -> Result<()> {
        let records = vec![record(&[("workers", "8"), ("rate", "1000")], 1.)];
        FilterPredicate::parse(&["workers=1"])?.validate_keys(&records)?;
        let err = FilterPredicate::parse(&["worker=8"])?
            .validate_keys(&records)
            .err()
            .expect("unknown key");
        assert_eq!(
            err.to_string(),
            "unknown filter key(s) worker; valid keys are: rate, workers"
        );
        Ok(())
    }
}
