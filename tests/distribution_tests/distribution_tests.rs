//! Tests for step distribution across reader ranks
//!
//! These tests verify:
//! - Default: every reader sees 0, 1, 2, ... in production order
//! - RoundRobin: reader r sees exactly the steps with `step mod R == r`
//! - OnDemand: the oldest unclaimed step goes to whichever reader asks first;
//!   no step is lost, duplicated or reordered
//! - Buffered steps are drained before EndOfStream
//! - Polling, timeouts and writer backpressure on the in-process hub

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use atlasstage::config::HubConfig;
use atlasstage::transport::{StepAvailability, Timeout, Transport};
use atlasstage::{
    open_reader, Config, DataType, DistributionMode, EngineState, EngineVariant, GetMode, ReaderEngine,
    Selection, StageError, StagingHub, StagingReader, StepMode, StepStatus, StepWriter, VariableDef,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn hub(writers: usize, readers: usize, mode: DistributionMode) -> Arc<StagingHub> {
    StagingHub::new(
        HubConfig::builder()
            .writer_count(writers)
            .reader_count(readers)
            .distribution_mode(mode)
            .build(),
    )
    .unwrap()
}

fn step_writer(hub: &Arc<StagingHub>, rank: usize) -> StepWriter {
    let mut writer = StepWriter::new(hub.writer(rank).unwrap());
    writer
        .define_variable(VariableDef::global_value("step", DataType::UInt64))
        .unwrap();
    writer
}

/// Publish one step whose only content is its own step number
fn publish(writer: &mut StepWriter) -> u64 {
    let step = writer.begin_step().unwrap();
    writer.put_value("step", step).unwrap();
    writer.end_step().unwrap();
    step
}

fn reader(hub: &Arc<StagingHub>, rank: usize, mode: DistributionMode) -> Box<dyn ReaderEngine> {
    let config = Config::builder().distribution_mode(mode).build();
    open_reader(config, Box::new(hub.reader(rank).unwrap())).unwrap()
}

/// Read the active step's "step" value, check it against the global step, end the step
fn consume(engine: &mut Box<dyn ReaderEngine>) -> (u64, u64) {
    let local = engine.current_step().unwrap();
    let global = engine.global_step().unwrap();
    let value = engine.get("step", Selection::All, GetMode::Deferred).unwrap();
    engine.end_step().unwrap();
    assert_eq!(value.value::<u64>().unwrap(), global);
    (local, global)
}

/// Read until end of stream, returning the global steps seen
fn drain(engine: &mut Box<dyn ReaderEngine>, timeout_secs: f32) -> Vec<u64> {
    let mut seen = Vec::new();
    loop {
        match engine.begin_step(StepMode::Read, timeout_secs).unwrap() {
            StepStatus::Ok => {
                let (local, global) = consume(engine);
                assert_eq!(local, seen.len() as u64, "local step counter must be gap-free");
                seen.push(global);
            }
            StepStatus::NotReady => continue,
            StepStatus::EndOfStream => return seen,
        }
    }
}

fn assert_partition(per_reader: &[Vec<u64>], steps: u64) {
    let mut union = BTreeSet::new();
    for seen in per_reader {
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", seen);
        for &s in seen {
            assert!(union.insert(s), "step {} delivered twice", s);
        }
    }
    assert_eq!(union.into_iter().collect::<Vec<_>>(), (0..steps).collect::<Vec<_>>());
}

fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

// =============================================================================
// Default (Lockstep) Tests
// =============================================================================

#[test]
fn test_default_every_reader_sees_every_step() {
    let hub = hub(2, 3, DistributionMode::Default);
    let mut writers = vec![step_writer(&hub, 0), step_writer(&hub, 1)];
    let mut readers: Vec<_> = (0..3).map(|r| reader(&hub, r, DistributionMode::Default)).collect();

    for _ in 0..6 {
        for w in writers.iter_mut() {
            publish(w);
        }
    }
    for w in writers.iter_mut() {
        w.close().unwrap();
    }

    for engine in readers.iter_mut() {
        assert_eq!(drain(engine, 0.0), vec![0, 1, 2, 3, 4, 5]);
    }
}

#[test]
fn test_default_step_waits_for_every_writer() {
    let hub = hub(2, 1, DistributionMode::Default);
    let mut w0 = step_writer(&hub, 0);
    let mut w1 = step_writer(&hub, 1);
    let mut engine = reader(&hub, 0, DistributionMode::Default);

    publish(&mut w0);
    assert_eq!(engine.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::NotReady);

    publish(&mut w1);
    assert_eq!(engine.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::Ok);
    assert_eq!(consume(&mut engine), (0, 0));
}

#[test]
fn test_default_interleaved_with_production() {
    let hub = hub(1, 2, DistributionMode::Default);
    let mut writer = step_writer(&hub, 0);
    let mut r0 = reader(&hub, 0, DistributionMode::Default);
    let mut r1 = reader(&hub, 1, DistributionMode::Default);

    for step in 0..4 {
        assert_eq!(r0.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::NotReady);
        publish(&mut writer);
        for engine in [&mut r0, &mut r1] {
            assert_eq!(engine.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::Ok);
            assert_eq!(consume(engine), (step, step));
        }
    }
}

#[test]
fn test_default_hub_reclaims_after_all_readers_release() {
    let hub = hub(1, 2, DistributionMode::Default);
    let mut writer = step_writer(&hub, 0);
    let mut r0 = reader(&hub, 0, DistributionMode::Default);
    let mut r1 = reader(&hub, 1, DistributionMode::Default);

    publish(&mut writer);
    assert_eq!(hub.backlog(), 1);

    r0.begin_step(StepMode::Read, 0.0).unwrap();
    consume(&mut r0);
    assert_eq!(hub.backlog(), 1);

    r1.begin_step(StepMode::Read, 0.0).unwrap();
    consume(&mut r1);
    assert_eq!(hub.backlog(), 0);
}

// =============================================================================
// RoundRobin Tests
// =============================================================================

#[test]
fn test_round_robin_partition() {
    let readers_n = 3;
    let steps = 11;
    let hub = hub(1, readers_n, DistributionMode::RoundRobin);
    let mut writer = step_writer(&hub, 0);
    let mut readers: Vec<_> = (0..readers_n)
        .map(|r| reader(&hub, r, DistributionMode::RoundRobin))
        .collect();

    for _ in 0..steps {
        publish(&mut writer);
    }
    writer.close().unwrap();

    let per_reader: Vec<Vec<u64>> = readers.iter_mut().map(|e| drain(e, 0.0)).collect();

    for (r, seen) in per_reader.iter().enumerate() {
        let expected: Vec<u64> = (0..steps).filter(|s| s % readers_n as u64 == r as u64).collect();
        assert_eq!(seen, &expected, "reader {}", r);
    }
    assert_partition(&per_reader, steps);
}

#[test]
fn test_round_robin_never_waits_on_foreign_step() {
    let hub = hub(1, 2, DistributionMode::RoundRobin);
    let mut writer = step_writer(&hub, 0);
    let mut r0 = reader(&hub, 0, DistributionMode::RoundRobin);
    let mut r1 = reader(&hub, 1, DistributionMode::RoundRobin);

    publish(&mut writer);

    // step 0 belongs to reader 0; reader 1 must not take it
    assert_eq!(r1.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::NotReady);
    assert_eq!(r0.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::Ok);
    assert_eq!(consume(&mut r0), (0, 0));

    publish(&mut writer);
    assert_eq!(r1.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::Ok);
    assert_eq!(consume(&mut r1), (0, 1));
}

#[test]
fn test_round_robin_step_reclaimed_by_owner_alone() {
    let hub = hub(1, 2, DistributionMode::RoundRobin);
    let mut writer = step_writer(&hub, 0);
    let mut r0 = reader(&hub, 0, DistributionMode::RoundRobin);

    publish(&mut writer);
    r0.begin_step(StepMode::Read, 0.0).unwrap();
    consume(&mut r0);

    assert_eq!(hub.backlog(), 0);
}

// =============================================================================
// OnDemand Tests
// =============================================================================

/// Virtual-time model of on-demand distribution
///
/// Step k is published at `k * cadence`. A reader that receives its n-th step
/// holds it for `delays[reader][n]` ticks, then asks again; a delay sequence
/// repeats once exhausted. Whenever several readers are waiting, the one that
/// has been free longest (lowest rank on ties) asks first, and it always
/// receives the oldest unclaimed step.
struct OnDemandSchedule {
    cadence: u64,
    delays: Vec<Vec<u64>>,
    steps: u64,
}

/// One BeginStep in the schedule
struct Claim {
    reader: usize,
    free_at: u64,
    at: u64,
    step: u64,
}

impl OnDemandSchedule {
    fn claims(&self) -> Vec<Claim> {
        let mut free_at = vec![0u64; self.delays.len()];
        let mut held = vec![0usize; self.delays.len()];
        let mut claims = Vec::new();
        for step in 0..self.steps {
            let reader = (0..free_at.len()).min_by_key(|&r| (free_at[r], r)).unwrap_or(0);
            let at = free_at[reader].max(step * self.cadence);
            claims.push(Claim {
                reader,
                free_at: free_at[reader],
                at,
                step,
            });
            let delays = &self.delays[reader];
            free_at[reader] = at + delays[held[reader] % delays.len()];
            held[reader] += 1;
        }
        claims
    }

    fn expected(&self) -> Vec<Vec<u64>> {
        let mut per_reader = vec![Vec::new(); self.delays.len()];
        for claim in self.claims() {
            per_reader[claim.reader].push(claim.step);
        }
        per_reader
    }
}

/// Drive real engines through the schedule's events in time order
fn run_on_demand_schedule(schedule: &OnDemandSchedule) -> Vec<Vec<u64>> {
    let readers_n = schedule.delays.len();
    let hub = hub(1, readers_n, DistributionMode::OnDemand);
    let mut writer = step_writer(&hub, 0);
    let mut readers: Vec<_> = (0..readers_n)
        .map(|r| reader(&hub, r, DistributionMode::OnDemand))
        .collect();
    let mut seen = vec![Vec::new(); readers_n];

    let publish_through = |writer: &mut StepWriter, time: u64| {
        while writer.next_step() < schedule.steps && writer.next_step() * schedule.cadence <= time {
            publish(writer);
        }
    };

    for claim in schedule.claims() {
        let engine = &mut readers[claim.reader];

        // A reader that is free before the next step exists polls in vain
        if claim.free_at < claim.at {
            publish_through(&mut writer, claim.free_at);
            assert_eq!(engine.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::NotReady);
        }

        publish_through(&mut writer, claim.at);
        assert_eq!(engine.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::Ok);
        let (local, global) = consume(engine);
        assert_eq!(local, seen[claim.reader].len() as u64);
        seen[claim.reader].push(global);
    }

    writer.close().unwrap();
    for engine in readers.iter_mut() {
        assert_eq!(engine.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::EndOfStream);
    }
    seen
}

#[test]
fn test_on_demand_matches_schedule_with_slow_reader() {
    let schedule = OnDemandSchedule {
        cadence: 10,
        delays: vec![vec![25], vec![10], vec![40]],
        steps: 20,
    };
    let seen = run_on_demand_schedule(&schedule);
    assert_eq!(seen, schedule.expected());
    assert_partition(&seen, schedule.steps);

    // the fast reader carries the most steps, the slow one the fewest
    assert!(seen[1].len() > seen[0].len());
    assert!(seen[0].len() >= seen[2].len());
}

#[test]
fn test_on_demand_matches_schedule_with_fast_writer() {
    // Writer outpaces every reader, so a backlog builds up
    let schedule = OnDemandSchedule {
        cadence: 1,
        delays: vec![vec![7], vec![3], vec![5], vec![11]],
        steps: 40,
    };
    let seen = run_on_demand_schedule(&schedule);
    assert_eq!(seen, schedule.expected());
    assert_partition(&seen, schedule.steps);
}

#[test]
fn test_on_demand_matches_schedule_with_slow_writer() {
    // Readers are always idle; steps go to whoever has waited longest
    let schedule = OnDemandSchedule {
        cadence: 50,
        delays: vec![vec![1], vec![2]],
        steps: 12,
    };
    let seen = run_on_demand_schedule(&schedule);
    assert_eq!(seen, schedule.expected());
    assert_partition(&seen, schedule.steps);
}

#[test]
fn test_on_demand_matches_schedule_with_varying_delays() {
    // Ticks are half seconds: a step every second, readers pausing
    // {1,3,5,0,0,20}, {0,0,1.5,5,0,0,1,10} and {3,2,4,0,0,0,0} seconds
    let schedule = OnDemandSchedule {
        cadence: 2,
        delays: vec![
            vec![2, 6, 10, 0, 0, 40],
            vec![0, 0, 3, 10, 0, 0, 2, 20],
            vec![6, 4, 8, 0, 0, 0, 0],
        ],
        steps: 20,
    };
    let expected = vec![
        vec![0, 3, 7, 10, 11, 12],
        vec![1, 4, 5, 8, 13, 14, 16, 18],
        vec![2, 6, 9, 15, 17, 19],
    ];
    assert_eq!(schedule.expected(), expected);

    let seen = run_on_demand_schedule(&schedule);
    assert_eq!(seen, expected);
    assert_partition(&seen, schedule.steps);
}

#[test]
fn test_on_demand_fast_then_slow_reader() {
    // Reader 0 keeps up for five steps, then falls far behind
    let schedule = OnDemandSchedule {
        cadence: 2,
        delays: vec![vec![1, 1, 1, 1, 1, 30, 30, 30, 30], vec![6]],
        steps: 20,
    };
    let expected = vec![
        vec![0, 2, 3, 4, 6, 7, 13, 19],
        vec![1, 5, 8, 9, 10, 11, 12, 14, 15, 16, 17, 18],
    ];
    assert_eq!(schedule.expected(), expected);

    let seen = run_on_demand_schedule(&schedule);
    assert_eq!(seen, expected);
    assert_partition(&seen, schedule.steps);

    // once reader 0 slows down, reader 1 carries almost all of the remaining steps
    assert_eq!(seen[0].iter().filter(|&&step| step >= 8).count(), 2);
}

#[test]
fn test_on_demand_backlog_goes_to_first_caller() {
    let hub = hub(1, 2, DistributionMode::OnDemand);
    let mut writer = step_writer(&hub, 0);
    let mut r0 = reader(&hub, 0, DistributionMode::OnDemand);
    let mut r1 = reader(&hub, 1, DistributionMode::OnDemand);

    for _ in 0..4 {
        publish(&mut writer);
    }

    // reader 1 holds step 0 while reader 0 takes the rest
    assert_eq!(r1.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::Ok);
    assert_eq!(r1.global_step().unwrap(), 0);
    for expected in 1..4 {
        assert_eq!(r0.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::Ok);
        assert_eq!(consume(&mut r0).1, expected);
    }
    assert_eq!(r0.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::NotReady);
    assert_eq!(consume(&mut r1), (0, 0));
}

#[test]
fn test_on_demand_threaded_no_loss() {
    let steps = 30;
    let delays = [Duration::from_millis(0), Duration::from_millis(3), Duration::from_millis(7)];
    let hub = hub(1, delays.len(), DistributionMode::OnDemand);
    let mut writer = step_writer(&hub, 0);
    let readers: Vec<_> = (0..delays.len())
        .map(|r| reader(&hub, r, DistributionMode::OnDemand))
        .collect();

    let per_reader = crossbeam::scope(|s| {
        let handles: Vec<_> = readers
            .into_iter()
            .zip(delays)
            .map(|(mut engine, delay)| {
                s.spawn(move |_| {
                    let mut seen = Vec::new();
                    loop {
                        match engine.begin_step(StepMode::Read, -1.0).unwrap() {
                            StepStatus::Ok => {
                                thread::sleep(delay);
                                seen.push(consume(&mut engine).1);
                            }
                            StepStatus::NotReady => unreachable!("blocking wait returned NotReady"),
                            StepStatus::EndOfStream => break,
                        }
                    }
                    engine.close().unwrap();
                    seen
                })
            })
            .collect();

        for _ in 0..steps {
            publish(&mut writer);
            thread::sleep(Duration::from_millis(1));
        }
        writer.close().unwrap();

        handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
    })
    .unwrap();

    assert_partition(&per_reader, steps);
}

// =============================================================================
// End Of Stream Tests
// =============================================================================

#[test]
fn test_buffered_steps_drained_before_end_of_stream() {
    for mode in [DistributionMode::Default, DistributionMode::RoundRobin, DistributionMode::OnDemand] {
        let hub = hub(1, 1, mode);
        let mut writer = step_writer(&hub, 0);
        let mut engine = reader(&hub, 0, mode);

        for _ in 0..5 {
            publish(&mut writer);
        }
        writer.close().unwrap();

        assert_eq!(drain(&mut engine, 0.0), vec![0, 1, 2, 3, 4], "mode {}", mode);
        // end of stream is sticky
        assert_eq!(engine.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::EndOfStream);
    }
}

#[test]
fn test_end_of_stream_waits_for_every_writer() {
    let hub = hub(2, 1, DistributionMode::Default);
    let mut w0 = step_writer(&hub, 0);
    let _w1 = step_writer(&hub, 1);
    let mut engine = reader(&hub, 0, DistributionMode::Default);

    w0.close().unwrap();
    assert_eq!(engine.begin_step(StepMode::Read, 0.0).unwrap(), StepStatus::NotReady);
}

#[test]
fn test_dropped_writer_ends_stream() {
    let hub = hub(1, 1, DistributionMode::Default);
    let mut engine = reader(&hub, 0, DistributionMode::Default);
    {
        let mut writer = step_writer(&hub, 0);
        publish(&mut writer);
    }

    assert_eq!(drain(&mut engine, 0.0), vec![0]);
}

#[test]
fn test_blocking_wait_wakes_on_publish() {
    let hub = hub(1, 1, DistributionMode::Default);
    let mut writer = step_writer(&hub, 0);
    let mut engine = reader(&hub, 0, DistributionMode::Default);

    crossbeam::scope(|s| {
        let handle = s.spawn(move |_| {
            let status = engine.begin_step(StepMode::Read, -1.0).unwrap();
            (status, consume(&mut engine))
        });
        thread::sleep(Duration::from_millis(20));
        publish(&mut writer);

        let (status, (local, global)) = handle.join().unwrap();
        assert_eq!(status, StepStatus::Ok);
        assert_eq!((local, global), (0, 0));
    })
    .unwrap();
}

// =============================================================================
// Timeout Tests
// =============================================================================

#[test]
fn test_timeout_conversion() {
    assert_eq!(Timeout::from_secs_f32(0.0), Timeout::Poll);
    assert_eq!(Timeout::from_secs_f32(f32::NAN), Timeout::Poll);
    assert_eq!(Timeout::from_secs_f32(-1.0), Timeout::Forever);
    assert_eq!(Timeout::from_secs_f32(0.5), Timeout::After(Duration::from_millis(500)));
    assert!(Timeout::Forever.deadline().is_none());
}

#[test]
fn test_unbounded_positive_timeout_waits_forever() {
    assert_eq!(Timeout::from_secs_f32(f32::INFINITY), Timeout::Forever);
    assert_eq!(Timeout::from_secs_f32(1.0e30), Timeout::Forever);
    assert!(Timeout::After(Duration::MAX).deadline().is_none());
}

#[test]
fn test_infinite_timeout_returns_published_step() {
    for mode in [DistributionMode::Default, DistributionMode::RoundRobin, DistributionMode::OnDemand] {
        let hub = hub(1, 1, mode);
        let mut writer = step_writer(&hub, 0);
        publish(&mut writer);
        let mut engine = reader(&hub, 0, mode);

        assert_eq!(engine.begin_step(StepMode::Read, f32::INFINITY).unwrap(), StepStatus::Ok);
        assert_eq!(consume(&mut engine), (0, 0));
        writer.close().unwrap();
        assert_eq!(
            engine.begin_step(StepMode::Read, f32::INFINITY).unwrap(),
            StepStatus::EndOfStream
        );
    }

    let hub = hub(1, 1, DistributionMode::Default);
    let mut writer = step_writer(&hub, 0);
    publish(&mut writer);
    let config = Config::builder().engine_variant(EngineVariant::Naive).build();
    let mut naive = open_reader(config, Box::new(hub.reader(0).unwrap())).unwrap();
    assert_eq!(naive.begin_step(StepMode::Read, 1.0e30).unwrap(), StepStatus::Ok);
}

#[test]
fn test_positive_timeout_returns_not_ready() {
    let hub = hub(1, 1, DistributionMode::OnDemand);
    let _writer = step_writer(&hub, 0);
    let mut engine = reader(&hub, 0, DistributionMode::OnDemand);

    let started = Instant::now();
    assert_eq!(engine.begin_step(StepMode::Read, 0.05).unwrap(), StepStatus::NotReady);
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(engine.state(), EngineState::Ready);
}

// =============================================================================
// Transport Tests
// =============================================================================

#[test]
fn test_reader_follows_stream_mode() {
    for mode in [DistributionMode::Default, DistributionMode::RoundRobin, DistributionMode::OnDemand] {
        let hub = hub(1, 2, mode);
        let config = Config::builder().distribution_mode(mode).build();
        let reader = StagingReader::open(config, Box::new(hub.reader(1).unwrap())).unwrap();
        assert_eq!(reader.distribution_mode(), mode);
    }
}

#[test]
fn test_hub_rejects_bad_config() {
    let zero_readers = HubConfig::builder().reader_count(0).build();
    assert!(matches!(StagingHub::new(zero_readers), Err(StageError::Config(_))));

    let zero_limit = HubConfig::builder().queue_limit(0).build();
    assert!(matches!(StagingHub::new(zero_limit), Err(StageError::Config(_))));
}

#[test]
fn test_hub_rank_checks() {
    let hub = hub(1, 2, DistributionMode::Default);
    assert!(matches!(hub.writer(1), Err(StageError::Transport(_))));
    assert!(matches!(hub.reader(2), Err(StageError::Transport(_))));

    let _first = hub.reader(0).unwrap();
    assert!(matches!(hub.reader(0), Err(StageError::Transport(_))));
}

#[test]
fn test_endpoint_reports_group_shape() {
    let hub = hub(3, 2, DistributionMode::RoundRobin);
    let endpoint = hub.reader(1).unwrap();
    assert_eq!(endpoint.reader_rank(), 1);
    assert_eq!(endpoint.reader_count(), 2);
    assert_eq!(endpoint.writer_count(), 3);
    assert_eq!(endpoint.distribution_mode(), DistributionMode::RoundRobin);
}

#[test]
fn test_writer_must_publish_in_order() {
    let hub = hub(1, 1, DistributionMode::Default);
    let endpoint = hub.writer(0).unwrap();
    let result = endpoint.publish(1, Vec::new(), Vec::new());
    assert!(matches!(result, Err(StageError::Transport(_))));
}

#[test]
fn test_fetch_bounds_checked() {
    let hub = hub(1, 1, DistributionMode::Default);
    let mut writer = step_writer(&hub, 0);
    publish(&mut writer);

    let endpoint = hub.reader(0).unwrap();
    assert_eq!(endpoint.wait_for_step(0, Timeout::Poll).unwrap(), StepAvailability::Ready(0));
    assert!(matches!(endpoint.fetch(0, 0, 0, 1 << 20), Err(StageError::Transport(_))));
    assert!(matches!(endpoint.step_metadata(1), Err(StageError::Transport(_))));
}

#[test]
fn test_queue_limit_blocks_writer() {
    let steps = 6;
    let hub = StagingHub::new(
        HubConfig::builder()
            .writer_count(1)
            .reader_count(1)
            .queue_limit(2)
            .build(),
    )
    .unwrap();
    let mut writer = step_writer(&hub, 0);
    let mut engine = reader(&hub, 0, DistributionMode::Default);

    crossbeam::scope(|s| {
        s.spawn(move |_| {
            for _ in 0..steps {
                publish(&mut writer);
            }
            writer.close().unwrap();
        });

        assert!(wait_until(Duration::from_secs(5), || hub.published_steps() == 2));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(hub.published_steps(), 2, "writer should be held at the queue limit");
        assert_eq!(hub.backlog(), 2);

        assert_eq!(drain(&mut engine, -1.0), (0..steps).collect::<Vec<_>>());
    })
    .unwrap();
}

#[test]
fn test_queue_limit_released_when_readers_close() {
    let hub = StagingHub::new(
        HubConfig::builder()
            .writer_count(1)
            .reader_count(1)
            .distribution_mode(DistributionMode::OnDemand)
            .queue_limit(1)
            .build(),
    )
    .unwrap();
    let mut writer = step_writer(&hub, 0);
    let mut engine = reader(&hub, 0, DistributionMode::OnDemand);

    crossbeam::scope(|s| {
        let handle = s.spawn(move |_| {
            for _ in 0..3 {
                publish(&mut writer);
            }
        });

        assert!(wait_until(Duration::from_secs(5), || hub.published_steps() == 1));
        engine.close().unwrap();
        handle.join().unwrap();
    })
    .unwrap();

    assert_eq!(hub.published_steps(), 3);
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_mode_mismatch_rejected_at_open() {
    let hub = hub(1, 1, DistributionMode::RoundRobin);
    let config = Config::builder().distribution_mode(DistributionMode::OnDemand).build();
    let result = open_reader(config, Box::new(hub.reader(0).unwrap()));
    assert!(matches!(result, Err(StageError::Config(_))));
}

#[test]
fn test_naive_reader_requires_lockstep() {
    let hub = hub(1, 1, DistributionMode::RoundRobin);
    let config = Config::builder()
        .distribution_mode(DistributionMode::RoundRobin)
        .engine_variant(EngineVariant::Naive)
        .build();
    let result = open_reader(config, Box::new(hub.reader(0).unwrap()));
    assert!(matches!(result, Err(StageError::Config(_))));
}
