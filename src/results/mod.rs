//! The evaluation half: loading result files, selecting records by
//! metadata, and computing latency distributions.

pub mod ccdf;
pub mod filter;
pub mod loader;
pub mod record;
