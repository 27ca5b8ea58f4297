//! Logger setup: a terminal sink plus an optional debug-level file sink.

use std::fs::File;
use std::path::Path;

use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

use crate::Result;

/// Initialize the process-wide logger. `level` filters the terminal sink;
/// the file sink, when given, always records down to debug. Calling this
/// twice leaves the first logger in place.
pub fn init(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let mut builder = ConfigBuilder::new();
    // Falls back to UTC when the local offset cannot be determined.
    let _ = builder.set_time_offset_to_local();
    let config = builder.build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(path) = log_file {
        loggers.push(WriteLogger::new(
            LevelFilter::Debug,
            config,
            File::create(path)?,
        ));
    }

    CombinedLogger::init(loggers).ok();
    Ok(())
}
