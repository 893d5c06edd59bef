use std::{num::NonZeroUsize, sync::Arc};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};

use ki_ingestor::{
    passthrough::Output,
    pool::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS},
    source::{Input, RecordSource},
    DecodePolicy, Dsn, InfluxSink, IngestProps,
};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout may be carrying the piped-through records
    tracing_subscriber::fmt()
        .with_max_level(cli.level())
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.cpus())
        .enable_all()
        .build()?;

    match cli.command {
        Command::Influxdb(args) => runtime.block_on(influxdb(args)),
    }
}

async fn influxdb(args: InfluxdbArgs) -> anyhow::Result<()> {
    let dsn = Dsn::parse(&args.db).context("bad --db connection string")?;
    let sink = InfluxSink::try_new(&dsn)?;
    let source = RecordSource::open(&args.inputs)?;
    let out = args.output.open()?;

    info!(
        db = %dsn,
        series = dsn.series(),
        time_zone = %dsn.time_zone,
        inputs = ?args.inputs.iter().map(ToString::to_string).collect::<Vec<_>>(),
        output = %args.output,
        "starting ingest"
    );

    let props = IngestProps::from_dsn(&dsn)
        .with_workers(args.workers)
        .with_queue_capacity(args.queue)
        .with_decode_policy(args.decode_policy());

    let report = ki_ingestor::run(props, source, out, Arc::new(sink)).await?;
    if report.failed > 0 {
        warn!(
            failed = report.failed,
            written = report.written,
            "some points never reached the store"
        );
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "ki", version, about = "Tee newline delimited JSON into InfluxDB")]
struct Cli {
    /// Number of CPUs to use
    #[arg(long, global = true)]
    cpus: Option<usize>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pipe records through to the output while writing them to InfluxDB
    Influxdb(InfluxdbArgs),
}

#[derive(Args, Debug)]
struct InfluxdbArgs {
    /// Input files (comma separated), `stdin` reads standard input
    #[arg(long, value_delimiter = ',', default_value = "stdin")]
    inputs: Vec<Input>,

    /// Output file, `stdout` writes to standard output
    #[arg(long, default_value = "stdout")]
    output: Output,

    /// <user>:<password>@tcp(<host>:<port>)/<dbname>[?s=<series>&loc=<tz>&timeout=<duration>]
    #[arg(long, env = "KI_DB")]
    db: String,

    /// Concurrent writers
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Points allowed to wait for a writer before reading pauses
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue: usize,

    /// Echo and skip lines that aren't JSON instead of stopping
    #[arg(long)]
    skip_bad_lines: bool,
}

impl Cli {
    fn level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }

    fn cpus(&self) -> usize {
        self.cpus
            .filter(|&n| n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(NonZeroUsize::get))
            .unwrap_or(1)
    }
}

impl InfluxdbArgs {
    fn decode_policy(&self) -> DecodePolicy {
        if self.skip_bad_lines {
            DecodePolicy::Skip
        } else {
            DecodePolicy::Abort
        }
    }
}
