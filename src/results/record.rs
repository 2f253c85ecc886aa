//! Result records as read from the body of a result file.
//!
//! Each line of a result file starting with `{` is a JSON object
//! holding a numeric `latency`, optionally a `count` (then the record
//! is a latency bucket holding that many samples), and any number of
//! scalar metadata fields. All other lines are ignored.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Result};
use kstring::KString;
use noisy_float::prelude::R64;
use serde_json::Value;

pub type Metadata = BTreeMap<KString, KString>;

pub const LATENCY_FIELD: &str = "latency";
pub const COUNT_FIELD: &str = "count";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Sample { latency: R64 },
    Bucket { latency: R64, count: u64 },
}

impl Observation {
    pub fn latency(&self) -> R64 {
        match self {
            Observation::Sample { latency } | Observation::Bucket { latency, .. } => *latency,
        }
    }

    /// How many samples this observation stands for
    pub fn count(&self) -> u64 {
        match self {
            Observation::Sample { .. } => 1,
            Observation::Bucket { count, .. } => *count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub metadata: Metadata,
    pub observation: Observation,
}

impl ResultRecord {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|v| v.as_str())
    }
}

fn scalar_to_kstring(key: &str, value: &Value) -> Result<KString> {
    match value {
        Value::String(s) => Ok(KString::from_ref(s)),
        Value::Number(n) => Ok(KString::from_string(n.to_string())),
        Value::Bool(b) => Ok(KString::from_string(b.to_string())),
        Value::Null | Value::Array(_) | Value::Object(_) => {
            bail!("metadata field {key:?} is not a string, number or boolean: {value}")
        }
    }
}

/// Parse one JSON record line.
pub fn parse_record_line(line: &str) -> Result<ResultRecord> {
    let fields: serde_json::Map<String, Value> = serde_json::from_str(line)?;
    let mut metadata = Metadata::new();
    let mut latency = None;
    let mut count = None;
    for (key, value) in &fields {
        match key.as_str() {
            LATENCY_FIELD => {
                let l = value
                    .as_f64()
                    .ok_or_else(|| anyhow!("{LATENCY_FIELD:?} is not a number: {value}"))?;
                latency = Some(
                    R64::try_new(l).ok_or_else(|| anyhow!("{LATENCY_FIELD:?} is not finite"))?,
                );
            }
            COUNT_FIELD => {
                count = Some(value.as_u64().ok_or_else(|| {
                    anyhow!("{COUNT_FIELD:?} is not a non-negative integer: {value}")
                })?);
            }
            _ => {
                metadata.insert(KString::from_ref(key), scalar_to_kstring(key, value)?);
            }
        }
    }
    let latency = latency.ok_or_else(|| anyhow!("missing {LATENCY_FIELD:?} field"))?;
    let observation = match count {
        None => Observation::Sample { latency },
        Some(count) => Observation::Bucket { latency, count },
    };
    Ok(ResultRecord {
        metadata,
        observation,
    })
}

/// Parse the records of a whole result file body; every record is
/// given the `file_metadata` entries, which must not contradict its
/// own fields.
pub fn parse_result_body(body: &str, file_metadata: &Metadata) -> Result<Vec<ResultRecord>> {
    body.lines()
        .enumerate()
        .filter(|(_, line)| line.trim_start().starts_with('{'))
        .map(|(i, line)| {
            let lineno = i + 1;
            let mut record =
                parse_record_line(line).map_err(|e| anyhow!("line {lineno}: {e:#}"))?;
            for (key, value) in file_metadata {
                if let Some(own) = record.metadata.get(key) {
                    if own != value {
                        bail!(
                            "line {lineno}: field {key:?} is {own:?} but the file name says {value:?}"
                        )
                    }
                } else {
                    record.metadata.insert(key.clone(), value.clone());
                }
            }
            Ok(record)
        })
        .collect()
}
