pub mod chart;
pub mod config_file;
pub mod ctx;
pub mod experiment;
pub mod get_terminal_width;
pub mod io_util;
pub mod io_utils;
pub mod results;
pub mod run;
pub mod serde;
pub mod utillib;
