mod influx;

use async_trait::async_trait;

use crate::{errors::RemoteWriteError, record::SeriesWrite};

pub use influx::InfluxSink;

/// Somewhere points end up. Implementations are shared between all
/// ingestion workers, so a write must not need `&mut self`.
#[async_trait]
pub trait StoreSink: Send + Sync {
    async fn write_series(&self, write: &SeriesWrite) -> Result<(), RemoteWriteError>;
}
