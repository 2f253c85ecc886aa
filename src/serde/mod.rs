//! Types with custom serde and command line parsing support.

pub mod key_val;
pub mod point_atom;
