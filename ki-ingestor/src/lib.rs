//! Read newline delimited JSON, echo every line to an output untouched and
//! write each record as a point to a time-series store on the side.

pub mod dsn;
pub mod errors;
pub mod passthrough;
pub mod pipeline;
pub mod pool;
pub mod record;
pub mod sink;
pub mod source;

pub use dsn::Dsn;
pub use pipeline::{run, DecodePolicy, IngestProps, IngestReport};
pub use sink::{InfluxSink, StoreSink};

pub type Result<T> = core::result::Result<T, errors::KiIngestorError>;
