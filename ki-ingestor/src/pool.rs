use std::{ops::AddAssign, sync::Arc};

use tokio::{
    sync::{
        mpsc::{channel, Receiver, Sender},
        Mutex,
    },
    task::JoinSet,
};
use tracing::{debug, error, warn};

use crate::{errors::KiIngestorError, record::SeriesWrite, sink::StoreSink, Result};

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

type SharedQueue = Arc<Mutex<Receiver<SeriesWrite>>>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub written: u64,
    pub failed: u64,
}

impl AddAssign for WorkerReport {
    fn add_assign(&mut self, rhs: Self) {
        self.written += rhs.written;
        self.failed += rhs.failed;
    }
}

/// Head of the ingestion queue. Submitting blocks while the queue is full,
/// dropping the feed closes the queue and lets the workers run dry.
pub struct PoolFeed {
    tx: Sender<SeriesWrite>,
}

impl PoolFeed {
    pub async fn submit(&self, write: SeriesWrite) -> Result<()> {
        self.tx
            .send(write)
            .await
            .map_err(|_| KiIngestorError::PoolClosed)
    }

    /// Must not be called from inside the async runtime.
    pub fn submit_blocking(&self, write: SeriesWrite) -> Result<()> {
        self.tx
            .blocking_send(write)
            .map_err(|_| KiIngestorError::PoolClosed)
    }

    /// Drops the sender. Workers finish what's queued and then exit.
    pub fn close(self) {}
}

/// A fixed set of workers draining a bounded queue into a [`StoreSink`].
/// Writes from different workers land in no particular order. A failed write
/// is logged and counted, never retried, and the worker moves on.
pub struct IngestionPool {
    workers: JoinSet<WorkerReport>,
}

impl IngestionPool {
    /// Spawns the workers onto the current runtime.
    /// Zero workers or a zero capacity are bumped to one.
    pub fn start(
        sink: Arc<dyn StoreSink>,
        workers: usize,
        queue_capacity: usize,
    ) -> (PoolFeed, Self) {
        let (tx, rx) = channel(queue_capacity.max(1));
        let queue: SharedQueue = Arc::new(Mutex::new(rx));

        let mut set = JoinSet::new();
        for id in 0..workers.max(1) {
            set.spawn(work(id, queue.clone(), sink.clone()));
        }
        debug!(workers = set.len(), queue_capacity, "ingestion pool started");

        (PoolFeed { tx }, Self { workers: set })
    }

    /// Waits for every worker to see the closed queue and return.
    /// The matching [`PoolFeed`] has to be dropped first or this never ends.
    pub async fn drain(mut self) -> Result<WorkerReport> {
        let mut total = WorkerReport::default();
        let mut died = None;

        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(report) => total += report,
                Err(err) => {
                    error!(error = %err, "ingestion worker died");
                    died.get_or_insert(err);
                }
            }
        }

        match died {
            Some(err) => Err(err.into()),
            None => Ok(total),
        }
    }
}

async fn work(id: usize, queue: SharedQueue, sink: Arc<dyn StoreSink>) -> WorkerReport {
    let mut report = WorkerReport::default();

    loop {
        let next = queue.lock().await.recv().await;
        let Some(write) = next else {
            break;
        };

        match sink.write_series(&write).await {
            Ok(()) => report.written += 1,
            Err(err) => {
                report.failed += 1;
                warn!(worker = id, series = %write.series, error = %err, "dropping point after failed write");
            }
        }
    }

    debug!(worker = id, written = report.written, failed = report.failed, "queue closed, worker done");
    report
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::{sync::Semaphore, time::timeout};

    use super::*;
    use crate::{errors::RemoteWriteError, record::transform};

    fn write(n: usize) -> SeriesWrite {
        let record = transform(format!("{{\"n\":{n}}}").as_bytes()).unwrap();
        SeriesWrite::new("session-1", record)
    }

    #[derive(Default)]
    struct Recording(std::sync::Mutex<Vec<SeriesWrite>>);

    #[async_trait]
    impl StoreSink for Recording {
        async fn write_series(&self, write: &SeriesWrite) -> core::result::Result<(), RemoteWriteError> {
            self.0.lock().unwrap().push(write.clone());
            Ok(())
        }
    }

    /// Fails every other write.
    #[derive(Default)]
    struct Flaky(AtomicUsize);

    #[async_trait]
    impl StoreSink for Flaky {
        async fn write_series(&self, _: &SeriesWrite) -> core::result::Result<(), RemoteWriteError> {
            match self.0.fetch_add(1, Ordering::SeqCst) % 2 {
                0 => Ok(()),
                _ => Err(RemoteWriteError::Rejected("nope".into())),
            }
        }
    }

    /// Each write waits for a permit.
    struct Gated(Semaphore);

    #[async_trait]
    impl StoreSink for Gated {
        async fn write_series(&self, _: &SeriesWrite) -> core::result::Result<(), RemoteWriteError> {
            self.0
                .acquire()
                .await
                .map(|permit| permit.forget())
                .map_err(|e| RemoteWriteError::Rejected(e.to_string()))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn it_writes_everything_submitted() -> anyhow::Result<()> {
        let sink = Arc::new(Recording::default());
        let (feed, pool) = IngestionPool::start(sink.clone(), 3, 2);

        for n in 0..20 {
            feed.submit(write(n)).await?;
        }
        feed.close();

        let report = pool.drain().await?;
        assert_eq!(WorkerReport { written: 20, failed: 0 }, report);

        let mut seen = sink
            .0
            .lock()
            .unwrap()
            .iter()
            .map(|w| w.point.values[0].as_u64().unwrap())
            .collect::<Vec<_>>();
        seen.sort();
        assert_eq!((0..20).collect::<Vec<_>>(), seen);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn it_keeps_going_after_failed_writes() -> anyhow::Result<()> {
        let (feed, pool) = IngestionPool::start(Arc::new(Flaky::default()), 2, 1);

        for n in 0..10 {
            feed.submit(write(n)).await?;
        }
        drop(feed);

        assert_eq!(WorkerReport { written: 5, failed: 5 }, pool.drain().await?);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn it_blocks_the_feed_when_the_queue_is_full() -> anyhow::Result<()> {
        let sink = Arc::new(Gated(Semaphore::new(0)));
        let (feed, pool) = IngestionPool::start(sink.clone(), 1, 2);

        let submitted = Arc::new(AtomicUsize::new(0));
        let counter = submitted.clone();
        let feeder = tokio::spawn(async move {
            for n in 0..5 {
                feed.submit(write(n)).await?;
                counter.fetch_add(1, Ordering::SeqCst);
            }
            anyhow::Ok(())
        });

        let reaches = |n: usize| {
            let submitted = submitted.clone();
            timeout(Duration::from_secs(5), async move {
                while submitted.load(Ordering::SeqCst) < n {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        // one write stuck in the worker, two waiting in the queue
        reaches(3).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(3, submitted.load(Ordering::SeqCst));

        sink.0.add_permits(1);
        reaches(4).await?;

        sink.0.add_permits(10);
        feeder.await??;

        assert_eq!(WorkerReport { written: 5, failed: 0 }, pool.drain().await?);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn it_drains_an_unused_pool() -> anyhow::Result<()> {
        let (feed, pool) = IngestionPool::start(Arc::new(Recording::default()), 0, 0);
        feed.close();
        assert_eq!(WorkerReport::default(), pool.drain().await?);
        Ok(())
    }
}
