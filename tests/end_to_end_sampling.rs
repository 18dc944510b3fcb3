//! End-to-end sampling with the real SIGVTALRM timer
//!
//! Built with `harness = false`: the timer can only be armed from the main
//! thread, and libtest runs tests on worker threads.

use std::hint::black_box;
use std::thread;
use std::time::{Duration, Instant};

use stacksampler::{Sampler, SamplerConfig, SamplerError, SamplerState};

#[inline(never)]
fn spin_heavy(budget: Duration) -> u64 {
    spin_for(budget)
}

#[inline(never)]
fn spin_light(budget: Duration) -> u64 {
    spin_for(budget)
}

#[inline(always)]
fn spin_for(budget: Duration) -> u64 {
    let start = Instant::now();
    let mut n = 0u64;
    while start.elapsed() < budget {
        for _ in 0..1_000 {
            n = black_box(n.wrapping_add(1));
        }
    }
    n
}

/// Sum of counts for report lines whose stack passes through `function`
fn count_for(report: &str, function: &str) -> u64 {
    report
        .lines()
        .filter(|line| line.contains(&format!(":{}", function)))
        .map(|line| line.rsplit_once(' ').unwrap().1.parse::<u64>().unwrap())
        .sum()
}

fn alternating_workload_is_split_by_cpu_time() {
    let config = SamplerConfig::default().with_interval(Duration::from_millis(1));
    let mut sampler = Sampler::with_config(config).unwrap();
    sampler.start().unwrap();

    for _ in 0..200 {
        black_box(spin_heavy(Duration::from_millis(3)));
        black_box(spin_light(Duration::from_millis(1)));
    }

    let snapshot = sampler.snapshot().unwrap().unwrap();
    let report = snapshot.render();
    sampler.stop();

    let heavy = count_for(&report, "spin_heavy");
    let light = count_for(&report, "spin_light");
    let total: u64 = report
        .lines()
        .map(|line| line.rsplit_once(' ').unwrap().1.parse::<u64>().unwrap())
        .sum();

    assert!(snapshot.firings > 10, "too few firings: {}", snapshot.firings);
    // Every handler firing is either in the report or accounted as dropped
    assert_eq!(total + snapshot.dropped_samples, snapshot.firings);
    assert!(heavy > light, "heavy={} light={}\n{}", heavy, light, report);

    let counts: Vec<u64> = snapshot.entries.iter().map(|(_, c)| *c).collect();
    assert!(counts.windows(2).all(|pair| pair[0] >= pair[1]));
    println!("alternating workload: heavy={} light={} total={}", heavy, light, total);
}

fn stop_resets_and_is_idempotent() {
    let mut sampler = Sampler::with_config(
        SamplerConfig::default().with_interval(Duration::from_millis(1)),
    )
    .unwrap();
    sampler.start().unwrap();
    black_box(spin_heavy(Duration::from_millis(50)));

    sampler.stop();
    assert_eq!(sampler.report(None).unwrap(), "");
    sampler.stop();
    assert_eq!(sampler.state(), SamplerState::Stopped);
    assert_eq!(sampler.report(None).unwrap(), "");
}

fn second_sampler_cannot_take_timer() {
    let mut first = Sampler::new();
    first.start().unwrap();

    let mut second = Sampler::new();
    assert!(matches!(second.start(), Err(SamplerError::TimerInUse)));
    assert_eq!(second.state(), SamplerState::NotStarted);

    first.stop();
    second.start().unwrap();
    second.stop();
}

fn worker_thread_is_unsupported() {
    let outcome = thread::spawn(|| Sampler::new().start()).join().unwrap();
    assert!(matches!(outcome, Err(SamplerError::UnsupportedContext)));
}

fn scoped_guard_disarms_on_drop() {
    let mut sampler = Sampler::new();
    {
        let guard = sampler.start_scoped().unwrap();
        assert!(guard.is_running());
    }
    assert_eq!(sampler.state(), SamplerState::Stopped);

    // The slot was released by the guard
    let mut other = Sampler::new();
    other.start().unwrap();
    other.stop();
}

fn main() {
    let tests: [(&str, fn()); 5] = [
        (
            "alternating_workload_is_split_by_cpu_time",
            alternating_workload_is_split_by_cpu_time,
        ),
        ("stop_resets_and_is_idempotent", stop_resets_and_is_idempotent),
        ("second_sampler_cannot_take_timer", second_sampler_cannot_take_timer),
        ("worker_thread_is_unsupported", worker_thread_is_unsupported),
        ("scoped_guard_disarms_on_drop", scoped_guard_disarms_on_drop),
    ];

    for (name, test) in tests {
        test();
        println!("test {} ... ok", name);
    }
}
