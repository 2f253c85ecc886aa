//! Leveled diagnostics on stderr. Stdout is kept free for output
//! that callers chain into other tools (chart paths, dry-run command
//! lines).

use std::{
    io::{stderr, StderrLock, Write},
    sync::atomic::{AtomicU8, Ordering},
};

use anyhow::{bail, Result};
use chrono::{Local, SecondsFormat};

/// Start a log line with the local time and the source location,
/// returning the locked stderr for the rest of the line.
pub fn write_time(file: &str, line: u32) -> StderrLock<'static> {
    let t_str = Local::now().to_rfc3339_opts(SecondsFormat::Millis, false);
    let mut lock = stderr().lock();
    write!(&mut lock, "{t_str}\t{file}:{line}\t").expect("stderr must not fail");
    lock
}

// Do *not* make the fields public here to force going through `TryFrom`.
#[derive(Debug, clap::Args)]
pub struct LogLevelOpt {
    /// Show what is being done
    #[clap(short, long)]
    verbose: bool,

    /// Show information that helps debug this program (implies
    /// `--verbose`)
    #[clap(short, long)]
    debug: bool,

    /// Do not show the commands being issued, nor warnings. Conflicts
    /// with `--verbose` and `--debug`.
    #[clap(short, long)]
    quiet: bool,
}

impl TryFrom<LogLevelOpt> for LogLevel {
    type Error = anyhow::Error;

    fn try_from(value: LogLevelOpt) -> Result<Self> {
        match value {
            LogLevelOpt {
                verbose: false,
                debug: false,
                quiet: false,
            } => Ok(LogLevel::Notice),
            LogLevelOpt {
                verbose: true,
                debug: false,
                quiet: false,
            } => Ok(LogLevel::Info),
            LogLevelOpt {
                verbose: _,
                debug: true,
                quiet: false,
            } => Ok(LogLevel::Debug),
            LogLevelOpt {
                verbose: false,
                debug: false,
                quiet: true,
            } => Ok(LogLevel::Quiet),
            LogLevelOpt {
                verbose: _,
                debug: _,
                quiet: true,
            } => bail!("option `--quiet` conflicts with the options `--verbose` and `--debug`"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Nothing at all
    Quiet,
    /// The default: warnings and the trace of issued commands
    Notice,
    /// Verbose execution, for the operator to follow what is going on
    Info,
    /// For debugging this program
    Debug,
}

impl LogLevel {
    // Only for comparisons
    fn level(self) -> u8 {
        self as u8
    }

    fn from_level(level: u8) -> Option<Self> {
        let slf = match level {
            0 => Some(LogLevel::Quiet),
            1 => Some(LogLevel::Notice),
            2 => Some(LogLevel::Info),
            3 => Some(LogLevel::Debug),
            _ => None,
        }?;
        assert_eq!(slf.level(), level);
        Some(slf)
    }
}

impl PartialOrd for LogLevel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogLevel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.level().cmp(&other.level())
    }
}

pub static LOGLEVEL: AtomicU8 = AtomicU8::new(1);

pub fn set_log_level(val: LogLevel) {
    LOGLEVEL.store(val.level(), Ordering::Relaxed);
}

#[inline]
pub fn log_level() -> LogLevel {
    let level = LOGLEVEL.load(Ordering::Relaxed);
    LogLevel::from_level(level).expect("only valid levels are ever stored")
}

#[macro_export]
macro_rules! notice {
    { $($arg:tt)* } => {
        if $crate::utillib::logging::log_level() >= $crate::utillib::logging::LogLevel::Notice {
            use std::io::Write;
            let mut lock = $crate::utillib::logging::write_time(file!(), line!());
            writeln!(&mut lock, $($arg)*).expect("stderr must not fail");
        }
    }
}

#[macro_export]
macro_rules! warn {
    { $($arg:tt)* } => {
        if $crate::utillib::logging::log_level() >= $crate::utillib::logging::LogLevel::Notice {
            use std::io::Write;
            let mut lock = $crate::utillib::logging::write_time(file!(), line!());
            write!(&mut lock, "warning: ").expect("stderr must not fail");
            writeln!(&mut lock, $($arg)*).expect("stderr must not fail");
        }
    }
}

#[macro_export]
macro_rules! info {
    { $($arg:tt)* } => {
        if $crate::utillib::logging::log_level() >= $crate::utillib::logging::LogLevel::Info {
            use std::io::Write;
            let mut lock = $crate::utillib::logging::write_time(file!(), line!());
            writeln!(&mut lock, $($arg)*).expect("stderr must not fail");
        }
    }
}

#[macro_export]
macro_rules! debug {
    { $($arg:tt)* } => {
        if $crate::utillib::logging::log_level() >= $crate::utillib::logging::LogLevel::Debug {
            use std::io::Write;
            let mut lock = $crate::utillib::logging::write_time(file!(), line!());
            writeln!(&mut lock, $($arg)*).expect("stderr must not fail");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_levels() {
        for i in 0..=3 {
            assert!(LogLevel::from_level(i).is_some());
        }
        assert_eq!(LogLevel::from_level(4), None);
        assert!(LogLevel::Debug > LogLevel::Info);
        assert!(LogLevel::Notice > LogLevel::Quiet);
    }

    #[test]
    fn t_opt_conflicts() {
        let opt = |verbose, debug, quiet| LogLevelOpt {
            verbose,
            debug,
            quiet,
        };
        assert_eq!(
            LogLevel::try_from(opt(false, false, false)).ok(),
            Some(LogLevel::Notice)
        );
        assert_eq!(
            LogLevel::try_from(opt(true, true, false)).ok(),
            Some(LogLevel::Debug)
        );
        assert!(LogLevel::try_from(opt(true, false, true)).is_err());
    }
}
