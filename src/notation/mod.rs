//! The LRCp time-axis notation: parsing into events and rendering back out.

mod parser;
mod writer;

pub use parser::{parse, parse_line, parse_timestamp};
pub use writer::{format_timestamp, key_notation, write_lrcp};
