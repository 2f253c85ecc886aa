//! What gets run: parameter sweeps, their points, and how a point
//! becomes a command line.

pub mod family;
pub mod point;
pub mod sweep;
