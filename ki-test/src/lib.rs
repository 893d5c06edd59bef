//! Scripted store sinks, in-memory outputs and fixtures for exercising the
//! ingestion pipeline, plus the end-to-end tests built on them.

pub mod test_util;

pub use test_util::{
    eventually, ndjson, source_of, FailingSink, GatedSink, RecordingSink, SharedBuffer, SlowSink,
};
