use std::{sync::Arc, time::Duration};

use serde_json::json;

use ki_ingestor::{errors::KiIngestorError, run, Dsn, IngestProps, IngestReport};

use crate::test_util::{ndjson, source_of, FailingSink, RecordingSink, SharedBuffer, SlowSink};

#[tokio::test(flavor = "multi_thread")]
async fn it_echoes_lines_in_input_order_despite_a_slow_store() -> anyhow::Result<()> {
    let input = "{\"id\":\"c\"}\n{\"id\":\"a\"}\n{\"id\":\"b\"}\n";
    let out = SharedBuffer::new();
    let sink = Arc::new(SlowSink::new(Duration::from_millis(40)));

    let report = run(
        IngestProps::new("session-1").with_workers(3),
        source_of(&[input]),
        out.clone(),
        sink.clone(),
    )
    .await?;

    assert_eq!(input.as_bytes(), &out.try_downgrade()?[..]);
    assert_eq!(
        IngestReport {
            records: 3,
            written: 3,
            failed: 0,
            skipped: 0
        },
        report
    );
    assert_eq!(3, sink.writes().len());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn it_finishes_when_every_write_fails() -> anyhow::Result<()> {
    let input = ndjson(25);
    let out = SharedBuffer::new();
    let sink = Arc::new(FailingSink::default());

    let report = run(
        IngestProps::new("session-1").with_workers(4).with_queue_capacity(2),
        source_of(&[input.as_str()]),
        out.clone(),
        sink.clone(),
    )
    .await?;

    assert_eq!(input.as_bytes(), &out.contents()[..]);
    assert_eq!(25, report.records);
    assert_eq!(0, report.written);
    assert_eq!(25, report.failed);
    assert_eq!(25, sink.attempts());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn it_concatenates_inputs_in_the_order_given() -> anyhow::Result<()> {
    let out = SharedBuffer::new();

    run(
        IngestProps::new("s"),
        source_of(&["{\"f\":1}\n{\"f\":1}\n", "", "{\"f\":3}"]),
        out.clone(),
        Arc::new(RecordingSink::default()),
    )
    .await?;

    assert_eq!(
        b"{\"f\":1}\n{\"f\":1}\n{\"f\":3}\n".to_vec(),
        out.try_downgrade()?
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn it_writes_ordered_points_to_the_configured_series() -> anyhow::Result<()> {
    let dsn = Dsn::parse("/metrics?s=requests")?;
    let sink = Arc::new(RecordingSink::default());

    run(
        IngestProps::from_dsn(&dsn),
        source_of(&["{\"timestamp\":\"2024-01-01T00:00:00Z\",\"b\":2,\"a\":1}\n"]),
        std::io::sink(),
        sink.clone(),
    )
    .await?;

    let writes = sink.writes();
    assert_eq!(1, writes.len());
    assert_eq!("requests", writes[0].series);
    assert_eq!(
        vec!["time", "a", "b", "timestamp"],
        writes[0].point.columns
    );
    assert_eq!(
        vec![
            json!(1704067200000_i64),
            json!(1),
            json!(2),
            json!("2024-01-01T00:00:00Z")
        ],
        writes[0].point.values
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn it_stops_at_a_bad_line_leaving_earlier_output_in_place() -> anyhow::Result<()> {
    let out = SharedBuffer::new();
    let sink = Arc::new(RecordingSink::default());

    let err = run(
        IngestProps::new("s"),
        source_of(&["{\"ok\":1}\n{\"ok\":2}\n{broken\n{\"ok\":4}\n"]),
        out.clone(),
        sink.clone(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, KiIngestorError::Decode { line: 3, .. }));
    assert_eq!(b"{\"ok\":1}\n{\"ok\":2}\n".to_vec(), out.contents());
    // what was queued before the bad line still gets written
    assert_eq!(2, sink.writes().len());
    Ok(())
}
