#![allow(clippy::manual_unwrap_or_default)]
#![allow(clippy::manual_unwrap_or)]

pub mod chunker;
pub mod constants;
pub mod dedup;
pub mod directives;
pub mod logging;
pub mod processor;
pub mod raw_stream;
pub mod reasoning;
pub mod sinks;
pub mod str_utils;
pub mod tag_state;
pub mod types;

pub use processor::StreamProcessor;
pub use sinks::SinkSet;
pub use types::*;
