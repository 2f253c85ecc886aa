//! The building block of experiment point and filter encodings: a key
//! or a value that can be embedded in a file name and unambiguously
//! split out again.

use std::{fmt::Display, str::FromStr};

use kstring::KString;
use serde::de::Visitor;

pub const MAX_ATOM_LEN: usize = 128;

/// Characters with a structural role in encodings, hence not allowed
/// inside atoms
pub const RESERVED_CHARS: &[char] = &[',', '=', '/', '+'];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PointAtomError {
    #[error("empty string is not allowed as a key or value")]
    Empty,
    #[error("{0:?} is not allowed as a key or value")]
    DotName(String),
    #[error("key or value {0:?} is longer than {MAX_ATOM_LEN} bytes")]
    TooLong(String),
    #[error("key or value {0:?} contains the reserved or whitespace/control character {1:?}")]
    InvalidChar(String, char),
}

/// A non-empty string without `,` `=` `/` `+`, whitespace or control
/// characters, not `.` or `..`, at most `MAX_ATOM_LEN` bytes long.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, serde::Serialize)]
pub struct PointAtom(KString);

impl PointAtom {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kstring(&self) -> &KString {
        &self.0
    }
}

impl AsRef<str> for PointAtom {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Display for PointAtom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PointAtom {
    type Err = PointAtomError;

    fn from_str(v: &str) -> Result<Self, Self::Err> {
        if v.is_empty() {
            return Err(PointAtomError::Empty);
        }
        if v == "." || v == ".." {
            return Err(PointAtomError::DotName(v.into()));
        }
        if v.len() > MAX_ATOM_LEN {
            return Err(PointAtomError::TooLong(v.into()));
        }
        if let Some(c) = v
            .chars()
            .find(|c| RESERVED_CHARS.contains(c) || c.is_whitespace() || c.is_control())
        {
            return Err(PointAtomError::InvalidChar(v.into(), c));
        }
        Ok(PointAtom(KString::from_ref(v)))
    }
}

struct PointAtomVisitor;
impl<'de> Visitor<'de> for PointAtomVisitor {
    type Value = PointAtom;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str(
            "a string, integer or boolean usable as a key or value in file names \
             (non-empty, no ',', '=', '/', '+', whitespace or control characters)",
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        self.visit_str(&v.to_string())
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        self.visit_str(&v.to_string())
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        self.visit_str(&v.to_string())
    }

    fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        self.visit_str(if v { "true" } else { "false" })
    }
}

impl<'de> serde::Deserialize<'de> for PointAtom {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PointAtomVisitor)
    }
}
