//! A `key=value` pair as given on the command line.

use std::{fmt::Display, str::FromStr};

use anyhow::anyhow;

use super::point_atom::PointAtom;

#[derive(Debug, PartialEq, Eq, Clone, serde::Serialize, serde::Deserialize)]
pub struct KeyVal {
    pub key: PointAtom,
    pub val: PointAtom,
}

impl FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, val) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("missing '=' in key-value pair {s:?}"))?;

        Ok(KeyVal {
            key: key
                .parse()
                .map_err(|e| anyhow!("invalid key in key-value pair {s:?}: {e}"))?,
            val: val
                .parse()
                .map_err(|e| anyhow!("invalid value in key-value pair {s:?}: {e}"))?,
        })
    }
}

impl Display for KeyVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self { key, val } = self;
        write!(f, "{key}={val}")
    }
}

/// Parse `k=v,k2=v2`; the empty string yields no pairs.
pub fn parse_key_vals(s: &str) -> anyhow::Result<Vec<KeyVal>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(',').map(KeyVal::from_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_parse() -> anyhow::Result<()> {
        let kvs = parse_key_vals("workers=8,machine_local=true")?;
        assert_eq!(kvs.len(), 2);
        assert_eq!(kvs[0].key.as_str(), "workers");
        assert_eq!(kvs[1].to_string(), "machine_local=true");
        assert!(parse_key_vals("")?.is_empty());
        assert!(parse_key_vals("workers").is_err());
        assert!(parse_key_vals("a=b=c").is_err());
        assert!(parse_key_vals("a=1,").is_err());
        Ok(())
    }
}
