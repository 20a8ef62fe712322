//! AtlasStage Demo Binary
//!
//! Runs writer and reader ranks on threads over an in-process staging hub
//! and reports which steps each reader received.

use std::time::Duration;

use atlasstage::config::HubConfig;
use atlasstage::{
    open_reader, Config, DataType, DistributionMode, EngineVariant, GetMode, OperatorSpec, OperatorType,
    ReaderEngine, Result, Selection, StageError, StagingHub, StepMode, StepStatus, StepWriter, VariableDef,
};
use clap::Parser;
use crossbeam::channel::{self, Sender};
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasStage demo run
#[derive(Parser, Debug)]
#[command(name = "atlasstage-demo")]
#[command(about = "Stream steps from writer threads to reader threads")]
#[command(version)]
struct Args {
    /// Step distribution mode: default | roundrobin | ondemand
    #[arg(short, long, default_value = "default")]
    mode: String,

    /// Reader engine: staging | naive
    #[arg(long, default_value = "staging")]
    variant: String,

    /// Operator applied to the array: lz4 | zstd | quantize
    #[arg(short, long)]
    operator: Option<String>,

    /// Number of steps each writer produces
    #[arg(short, long, default_value = "10")]
    steps: u64,

    /// Number of writer ranks
    #[arg(short, long, default_value = "2")]
    writers: usize,

    /// Number of reader ranks
    #[arg(short, long, default_value = "2")]
    readers: usize,

    /// Elements each writer contributes per step
    #[arg(long, default_value = "4096")]
    block_size: u64,

    /// Pause between writer steps, in milliseconds
    #[arg(long, default_value = "0")]
    writer_delay_ms: u64,

    /// Per-reader pause before EndStep, in milliseconds (comma separated, cycled)
    #[arg(long, value_delimiter = ',', default_value = "0")]
    reader_delay_ms: Vec<u64>,

    /// Max complete steps held before writers block
    #[arg(long)]
    queue_limit: Option<usize>,
}

/// What a reader saw in one step
#[derive(Debug)]
struct StepReport {
    reader: usize,
    local: u64,
    global: u64,
    max_error: f64,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atlasstage=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("AtlasStage demo v{}", atlasstage::VERSION);

    if let Err(e) = run(&args) {
        tracing::error!("Demo failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let mode: DistributionMode = args.mode.parse()?;
    let variant: EngineVariant = args.variant.parse()?;
    let operator = args
        .operator
        .as_deref()
        .map(operator_spec)
        .transpose()?;

    let mut hub_config = HubConfig::builder()
        .writer_count(args.writers)
        .reader_count(args.readers)
        .distribution_mode(mode);
    if let Some(limit) = args.queue_limit {
        hub_config = hub_config.queue_limit(limit);
    }
    let hub = StagingHub::new(hub_config.build())?;

    tracing::info!(
        "Streaming {} steps from {} writers to {} readers ({}, operator {})",
        args.steps,
        args.writers,
        args.readers,
        mode,
        operator.as_ref().map_or("none".to_string(), |s| s.kind.to_string())
    );

    let (tx, rx) = channel::unbounded();

    let outcome = crossbeam::scope(|s| {
        let mut handles = Vec::new();

        for rank in 0..args.writers {
            let endpoint = hub.writer(rank)?;
            let operator = operator.clone();
            handles.push(s.spawn(move |_| write_steps(StepWriter::new(endpoint), args, operator)));
        }

        for rank in 0..args.readers {
            let endpoint = hub.reader(rank)?;
            let config = Config::builder()
                .distribution_mode(mode)
                .engine_variant(variant)
                .build();
            let delay = args
                .reader_delay_ms
                .get(rank % args.reader_delay_ms.len().max(1))
                .copied()
                .unwrap_or(0);
            let tx = tx.clone();
            handles.push(s.spawn(move |_| {
                let engine = open_reader(config, Box::new(endpoint))?;
                read_steps(engine, rank, Duration::from_millis(delay), tx)
            }));
        }

        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| StageError::Transport("rank thread panicked".to_string()))?)
            .collect::<Result<Vec<()>>>()
    })
    .map_err(|_| StageError::Transport("rank thread panicked".to_string()))?;
    outcome?;
    drop(tx);

    summarize(args, rx.into_iter().collect());
    Ok(())
}

fn operator_spec(name: &str) -> Result<OperatorSpec> {
    let kind: OperatorType = name.parse()?;
    Ok(match kind {
        OperatorType::Lz4 => OperatorSpec::new(kind).with_param("shuffle", "true"),
        OperatorType::Zstd => OperatorSpec::new(kind).with_param("level", "3"),
        OperatorType::Quantize => OperatorSpec::new(kind).with_param("accuracy", "0.001"),
    })
}

/// Value written at element `i` of global step `step`
fn expected_value(step: u64, i: u64) -> f64 {
    step as f64 * 1000.0 + (i as f64).sin()
}

fn write_steps(mut writer: StepWriter, args: &Args, operator: Option<OperatorSpec>) -> Result<()> {
    let rank = writer.rank() as u64;
    let shape = vec![args.writers as u64 * args.block_size];

    writer.define_variable(VariableDef::global_array("field", DataType::Double, shape))?;
    writer.define_variable(VariableDef::global_value("step", DataType::UInt64))?;
    if let Some(spec) = operator {
        writer.add_operation("field", spec)?;
    }

    let start = rank * args.block_size;
    for _ in 0..args.steps {
        let step = writer.begin_step()?;
        let values: Vec<f64> = (start..start + args.block_size)
            .map(|i| expected_value(step, i))
            .collect();
        writer.put("field", &[start], &[args.block_size], &values)?;
        writer.put_value("step", step)?;
        writer.end_step()?;

        if args.writer_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(args.writer_delay_ms));
        }
    }
    writer.close()
}

fn read_steps(
    mut engine: Box<dyn ReaderEngine>,
    rank: usize,
    delay: Duration,
    tx: Sender<StepReport>,
) -> Result<()> {
    loop {
        match engine.begin_step(StepMode::Read, -1.0)? {
            StepStatus::Ok => {}
            StepStatus::NotReady => continue,
            StepStatus::EndOfStream => break,
        }

        let field = engine.get("field", Selection::All, GetMode::Deferred)?;
        let step = engine.get("step", Selection::All, GetMode::Deferred)?;
        engine.perform_gets()?;

        let global = step.value::<u64>()?;
        let max_error = field
            .to_vec::<f64>()?
            .iter()
            .enumerate()
            .map(|(i, v)| (v - expected_value(global, i as u64)).abs())
            .fold(0.0, f64::max);

        let report = StepReport {
            reader: rank,
            local: engine.current_step()?,
            global,
            max_error,
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        engine.end_step()?;

        if tx.send(report).is_err() {
            break;
        }
    }
    engine.close()
}

fn summarize(args: &Args, reports: Vec<StepReport>) {
    for reader in 0..args.readers {
        let mine: Vec<&StepReport> = reports.iter().filter(|r| r.reader == reader).collect();
        let steps: Vec<u64> = mine.iter().map(|r| r.global).collect();
        let max_error = mine.iter().map(|r| r.max_error).fold(0.0, f64::max);
        let locals_in_order = mine.iter().enumerate().all(|(i, r)| r.local == i as u64);
        tracing::info!(
            "Reader {}: {} steps {:?}, local counters contiguous: {}, max error {:.3e}",
            reader,
            steps.len(),
            steps,
            locals_in_order,
            max_error
        );
    }
}
