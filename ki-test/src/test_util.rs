use std::{
    io::{self, BufRead, Cursor, ErrorKind, Write},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::Semaphore, time::timeout};

use ki_ingestor::{errors::RemoteWriteError, record::SeriesWrite, source::RecordSource, StoreSink};

/// An in-memory output that can be handed to the pipeline while the test
/// keeps a clone to look at what was written so far.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    data: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn line_count(&self) -> usize {
        self.contents().iter().filter(|&&b| b == b'\n').count()
    }

    pub fn try_downgrade(self) -> anyhow::Result<Vec<u8>> {
        let data = Arc::try_unwrap(self.data)
            .map_err(|_| anyhow::anyhow!("another SharedBuffer reference is still held"))?
            .into_inner()
            .map_err(|_| anyhow::anyhow!("SharedBuffer lock was poisoned"))?;

        Ok(data)
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = self
            .data
            .lock()
            .map_err(|err| io::Error::new(ErrorKind::WouldBlock, err.to_string()))?;
        data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Keeps every write it's given.
#[derive(Default)]
pub struct RecordingSink {
    writes: Mutex<Vec<SeriesWrite>>,
}

impl RecordingSink {
    pub fn writes(&self) -> Vec<SeriesWrite> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StoreSink for RecordingSink {
    async fn write_series(&self, write: &SeriesWrite) -> Result<(), RemoteWriteError> {
        self.writes
            .lock()
            .map_err(|e| RemoteWriteError::Rejected(e.to_string()))?
            .push(write.clone());
        Ok(())
    }
}

/// Refuses everything, counting attempts.
#[derive(Default)]
pub struct FailingSink {
    attempts: AtomicUsize,
}

impl FailingSink {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreSink for FailingSink {
    async fn write_series(&self, _: &SeriesWrite) -> Result<(), RemoteWriteError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(RemoteWriteError::Rejected("store is down".into()))
    }
}

/// Holds each write until a permit is released with [`GatedSink::release`].
pub struct GatedSink {
    gate: Semaphore,
    inner: RecordingSink,
}

impl GatedSink {
    pub fn closed() -> Self {
        Self {
            gate: Semaphore::new(0),
            inner: RecordingSink::default(),
        }
    }

    pub fn release(&self, writes: usize) {
        self.gate.add_permits(writes);
    }

    pub fn writes(&self) -> Vec<SeriesWrite> {
        self.inner.writes()
    }
}

#[async_trait]
impl StoreSink for GatedSink {
    async fn write_series(&self, write: &SeriesWrite) -> Result<(), RemoteWriteError> {
        self.gate
            .acquire()
            .await
            .map_err(|e| RemoteWriteError::Rejected(e.to_string()))?
            .forget();
        self.inner.write_series(write).await
    }
}

/// Takes a random amount of time (up to `max_delay`) per write, so workers
/// finish out of order.
pub struct SlowSink {
    max_delay: Duration,
    inner: RecordingSink,
}

impl SlowSink {
    pub fn new(max_delay: Duration) -> Self {
        Self {
            max_delay,
            inner: RecordingSink::default(),
        }
    }

    pub fn writes(&self) -> Vec<SeriesWrite> {
        self.inner.writes()
    }
}

#[async_trait]
impl StoreSink for SlowSink {
    async fn write_series(&self, write: &SeriesWrite) -> Result<(), RemoteWriteError> {
        // cheap deterministic jitter off the point itself
        let spread = self.max_delay.as_millis().max(1) as u64;
        let jitter = serde_json::to_string(&write.point.values)
            .map(|s| s.bytes().map(u64::from).sum::<u64>() % spread)
            .unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(jitter)).await;
        self.inner.write_series(write).await
    }
}

/// One source made of in-memory chunks, each standing in for an input file.
pub fn source_of(chunks: &[&str]) -> RecordSource {
    RecordSource::from_readers(
        chunks
            .iter()
            .map(|c| Box::new(Cursor::new(c.as_bytes().to_vec())) as Box<dyn BufRead + Send>)
            .collect::<Vec<_>>(),
    )
}

/// `n` JSON lines with a timestamp one second apart, newline terminated.
pub fn ndjson(n: usize) -> String {
    (0..n)
        .map(|i| {
            format!(
                "{{\"timestamp\":\"2024-01-01T00:00:{:02}Z\",\"seq\":{i},\"host\":\"web-{}\"}}\n",
                i % 60,
                i % 3
            )
        })
        .collect()
}

/// Polls `check` until it holds, giving up after five seconds.
pub async fn eventually<F: Fn() -> bool>(check: F) -> anyhow::Result<()> {
    timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}
