//! Logger setup for the `cairn` binary

use env_logger::{Builder, Env};
use log::LevelFilter;

pub const FILTER_ENV: &str = "CAIRN_LOG";
pub const STYLE_ENV: &str = "CAIRN_LOG_STYLE";

/// Level for `-v` repeated `verbose` times; `None` keeps the environment's
/// filter
fn verbosity(verbose: u8) -> Option<LevelFilter> {
    match verbose {
        0 => None,
        1 => Some(LevelFilter::Debug),
        _ => Some(LevelFilter::Trace),
    }
}

pub fn init(verbose: u8) {
    let env = Env::new()
        .filter_or(FILTER_ENV, "info")
        .write_style(STYLE_ENV);
    let mut builder = Builder::from_env(env);
    if let Some(level) = verbosity(verbose) {
        builder.filter_level(level);
    }
    builder.format_timestamp(None).format_target(false).init();
}
