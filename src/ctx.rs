//! Attach a formatted context message to an error, for use with
//! `map_err`: `.map_err(ctx!("reading {path:?}"))`. Works for any
//! error type that converts into `anyhow::Error`.

#[macro_export]
macro_rules! ctx {
    ($fmt:tt) => {
        |e| anyhow::Error::from(e).context(format!($fmt))
    };
    ($fmt:tt, $($arg:tt)*) => {
        |e| anyhow::Error::from(e).context(format!($fmt, $($arg)*))
    };
}
