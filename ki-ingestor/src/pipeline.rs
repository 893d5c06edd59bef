use std::{io::Write, sync::Arc};

use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use crate::{
    dsn::Dsn,
    errors::KiIngestorError,
    passthrough::PassThrough,
    pool::{IngestionPool, PoolFeed, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS},
    record::{transform, SeriesWrite},
    sink::StoreSink,
    source::RecordSource,
    Result,
};

/// What to do with a line that isn't a JSON object.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DecodePolicy {
    /// Stop the run at the first bad line.
    #[default]
    Abort,
    /// Log the line, echo it anyway, and don't ingest it.
    Skip,
}

pub struct IngestProps {
    pub series: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub decode_policy: DecodePolicy,
}

impl IngestProps {
    pub fn new(series: impl Into<String>) -> Self {
        Self {
            series: series.into(),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            decode_policy: DecodePolicy::default(),
        }
    }

    pub fn from_dsn(dsn: &Dsn) -> Self {
        Self::new(dsn.series())
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    /// Lines read and echoed.
    pub records: u64,
    pub written: u64,
    pub failed: u64,
    /// Lines that weren't JSON, only counted under [`DecodePolicy::Skip`].
    pub skipped: u64,
}

struct Fed {
    records: u64,
    skipped: u64,
}

/// Tee every line of `source` into `out` while the decoded points are
/// written to `sink` by a pool of workers.
///
/// Lines are read, decoded and echoed on one blocking thread, so the output
/// keeps input order no matter how slow the sink is. When the queue is full
/// that thread waits. The pool is always drained before returning, even
/// when reading, decoding or echoing fails.
pub async fn run<W>(
    props: IngestProps,
    source: RecordSource,
    out: W,
    sink: Arc<dyn StoreSink>,
) -> Result<IngestReport>
where
    W: Write + Send + 'static,
{
    let (head, pool) = IngestionPool::start(sink, props.workers, props.queue_capacity);

    let fed = spawn_blocking(move || feed(&props, source, out, head)).await;
    debug!("input exhausted, draining ingestion pool");
    let drained = pool.drain().await;

    let fed = fed??;
    let workers = drained?;

    let report = IngestReport {
        records: fed.records,
        written: workers.written,
        failed: workers.failed,
        skipped: fed.skipped,
    };
    info!(
        records = report.records,
        written = report.written,
        failed = report.failed,
        skipped = report.skipped,
        "ingestion finished"
    );
    Ok(report)
}

fn feed<W: Write>(
    props: &IngestProps,
    source: RecordSource,
    out: W,
    head: PoolFeed,
) -> Result<Fed> {
    let mut tee = PassThrough::new(out);
    let mut skipped = 0;

    for (line, raw) in (1..).zip(source) {
        let raw = raw?;

        match transform(&raw) {
            Ok(record) => head.submit_blocking(SeriesWrite::new(props.series.as_str(), record))?,
            Err(source) if props.decode_policy == DecodePolicy::Skip => {
                warn!(line, error = %source, "skipping line that isn't a JSON object");
                skipped += 1;
            }
            Err(source) => return Err(KiIngestorError::Decode { line, source }),
        }

        tee.echo(&raw)?;
    }

    let records = tee.lines();
    tee.finish()?;
    head.close();

    Ok(Fed { records, skipped })
}
