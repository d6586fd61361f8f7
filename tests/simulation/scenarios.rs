//! Named scenarios: termination, quantum boundary, FCFS level, starvation,
//! cooperative interruption.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mlfq_sim::config::Demand;
use mlfq_sim::process::{Pid, Process, Turn};
use mlfq_sim::{
    Discipline, EventKind, IoDevice, Pacing, RunConfig, Scheduler, SchedulerConfig, Timeline,
};

use super::{run_audited, specs};

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

fn io_pairs(report: &mlfq_sim::RunReport, pid: u32) -> usize {
    report
        .events_for(Pid::from_raw(pid))
        .filter(|e| e.kind == EventKind::IoStart)
        .count()
}

#[test]
fn two_processes_terminate_with_owed_io() {
    let config = RunConfig::new(SchedulerConfig::default(), specs(&[(2, 1), (5, 2)]));
    let (report, summary) = run_audited(&config);

    assert_eq!(report.processes.len(), 2);
    assert!(report.processes.iter().all(|s| s.final_priority == -1));
    assert_eq!(io_pairs(&report, 0), 1);
    assert_eq!(io_pairs(&report, 1), 2);
    assert_eq!(summary.io_spans, 3);
    assert_eq!(report.final_clock, 2 * 2 + 5 * 3 + 3 * 20);

    // Neither burst reaches a quantum, so nobody is ever demoted.
    assert_eq!(report.total_demotions(), 0);
    assert_eq!(report.processes[0].priority_history, vec![0, 3, 0, -1]);
    assert_eq!(report.processes[1].priority_history, vec![0, 3, 0, 3, 0, -1]);
}

#[test]
fn remaining_equal_to_quantum_is_not_demoted() {
    let config = RunConfig::new(
        SchedulerConfig::default().with_quanta(10, 15),
        specs(&[(10, 2)]),
    );
    let (report, _) = run_audited(&config);
    let s = &report.processes[0];
    assert_eq!(s.stats.demotions, 0);
    assert_eq!(s.stats.dispatches, 3);
    assert_eq!(s.priority_history, vec![0, 3, 0, 3, 0, -1]);
}

#[test]
fn one_tick_over_quantum_is_demoted_once() {
    let config = RunConfig::new(
        SchedulerConfig::default().with_quanta(10, 15),
        specs(&[(11, 0)]),
    );
    let (report, _) = run_audited(&config);
    let s = &report.processes[0];
    assert_eq!(s.stats.demotions, 1);
    assert_eq!(s.priority_history, vec![0, 1, -1]);
}

#[test]
fn fcfs_level_runs_burst_to_completion() {
    let config = RunConfig::new(
        SchedulerConfig::default().with_quanta(10, 15),
        specs(&[(500, 0)]),
    );
    let (report, summary) = run_audited(&config);
    let s = &report.processes[0];
    assert_eq!(s.priority_history, vec![0, 1, 2, -1]);
    assert_eq!(s.stats.dispatches, 3);
    assert_eq!(summary.cpu_spans, 3);

    let ends: Vec<u64> = report
        .events
        .iter()
        .filter(|e| e.kind == EventKind::CpuEnd)
        .map(|e| e.clock)
        .collect();
    assert_eq!(ends, vec![10, 25, 500]);
}

#[test]
fn custom_io_service_ticks_are_charged() {
    let config = RunConfig::new(
        SchedulerConfig::default().with_io_service_ticks(7),
        specs(&[(3, 4)]),
    );
    let (report, _) = run_audited(&config);
    let io: Vec<(u64, u64)> = report
        .events
        .chunks(2)
        .filter(|pair| pair[0].kind == EventKind::IoStart)
        .map(|pair| (pair[0].clock, pair[1].clock))
        .collect();
    assert_eq!(io.len(), 4);
    assert!(io.iter().all(|(start, end)| end - start == 7));
}

#[test]
fn paced_spans_match_granted_ticks() {
    // I/O service overlaps a long CPU burst in wall time.
    let config = RunConfig::new(
        SchedulerConfig::default()
            .with_quanta(10, 15)
            .with_io_service_ticks(20)
            .with_tick(Duration::from_micros(300)),
        specs(&[(2, 1), (30, 0)]),
    );
    let (report, summary) = run_audited(&config);
    assert_eq!(summary.io_spans, 1);
    assert_eq!(report.final_clock, 2 * 2 + 20 + 30);

    let mut open = [None; 2];
    for ev in &report.events {
        let slot = &mut open[ev.pid.index()];
        if ev.kind.is_start() {
            *slot = Some(ev.clock);
            continue;
        }
        let held = ev.clock - slot.take().expect("end after start");
        if ev.kind.is_cpu() {
            assert!(held <= 15, "cpu span of {held} ticks for pid {}", ev.pid);
        } else {
            assert_eq!(held, 20, "io span for pid {}", ev.pid);
        }
    }
}

#[test]
fn many_processes_all_terminate() {
    let pairs: Vec<(i64, i64)> = (1..=16).map(|i| (i * 3, i % 4)).collect();
    let config = RunConfig::new(SchedulerConfig::default().with_quanta(4, 9), specs(&pairs));
    let (report, summary) = run_audited(&config);
    assert_eq!(summary.processes, 16);
    assert_eq!(report.processes.len(), 16);
}

/// Demote `p` to the FCFS level through two expired quanta.
fn demote_to_fcfs(sched: &Scheduler, p: &mut Process, q0: u64, q1: u64) {
    sched.request_cpu(p).unwrap();
    sched.preempt(p, Turn { slice: q0, ran: q0 }).unwrap();
    sched.request_cpu(p).unwrap();
    sched.preempt(p, Turn { slice: q1, ran: q1 }).unwrap();
}

#[test]
fn level_two_process_starves_under_level_zero_stream() {
    const ARRIVALS: u32 = 8;

    let timeline = Arc::new(Timeline::new(1024));
    let sched = Arc::new(Scheduler::new(
        Discipline::mlfq(10, 15),
        Pacing::instant(),
        Arc::clone(&timeline),
    ));

    let mut long = Process::new(
        Pid::from_raw(0),
        Demand {
            burst: 1_000,
            io_operations: 0,
        },
    );
    demote_to_fcfs(&sched, &mut long, 10, 15);

    // A short process holds the CPU while the stream is set up.
    let mut blocker = Process::new(
        Pid::from_raw(100),
        Demand {
            burst: 1,
            io_operations: 0,
        },
    );
    sched.request_cpu(&mut blocker).unwrap();

    let long_handle = {
        let sched = Arc::clone(&sched);
        thread::spawn(move || {
            sched.request_cpu(&mut long).unwrap();
            let remaining = long.remaining();
            sched
                .release_cpu(
                    &mut long,
                    Turn {
                        slice: remaining,
                        ran: remaining,
                    },
                )
                .unwrap();
            long.summary()
        })
    };
    wait_until(|| sched.snapshot().queued[2].len() == 1);

    // Each arrival, once running, waits for the next one to be queued at
    // level 0 before it releases. The CPU is never idle with only the
    // level-2 process ready until the stream ends.
    let (granted_tx, granted_rx) = mpsc::channel::<Pid>();
    let mut releases = Vec::new();
    let mut handles = Vec::new();
    for pid in 1..=ARRIVALS {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        releases.push(release_tx);
        let granted_tx = granted_tx.clone();
        handles.push({
            let sched = Arc::clone(&sched);
            thread::spawn(move || {
                let mut p = Process::new(
                    Pid::from_raw(pid),
                    Demand {
                        burst: 2,
                        io_operations: 0,
                    },
                );
                sched.request_cpu(&mut p).unwrap();
                granted_tx.send(p.pid()).unwrap();
                release_rx.recv().unwrap();
                sched.release_cpu(&mut p, Turn { slice: 2, ran: 2 }).unwrap();
            })
        });
        wait_until(|| sched.snapshot().queued[0].len() == 1);

        if pid == 1 {
            sched
                .release_cpu(&mut blocker, Turn { slice: 1, ran: 1 })
                .unwrap();
        } else {
            releases[pid as usize - 2].send(()).unwrap();
        }
        assert_eq!(granted_rx.recv().unwrap(), Pid::from_raw(pid));
        assert_eq!(sched.snapshot().queued[2], vec![Pid::from_raw(0)]);
    }
    releases[ARRIVALS as usize - 1].send(()).unwrap();

    for h in handles {
        h.join().unwrap();
    }
    let long_summary = long_handle.join().unwrap();
    assert_eq!(long_summary.final_priority, -1);

    let (events, _) = timeline.events();
    let starts: Vec<u32> = events
        .iter()
        .filter(|e| e.kind == EventKind::CpuStart)
        .map(|e| e.pid.as_u32())
        .collect();
    let mut expected = vec![0, 0, 100];
    expected.extend(1..=ARRIVALS);
    expected.push(0);
    assert_eq!(starts, expected);
}

#[test]
fn level_zero_arrival_interrupts_fcfs_holder() {
    let timeline = Arc::new(Timeline::new(1024));
    let pacing = Pacing::from_micros(100);
    let sched = Arc::new(Scheduler::new(
        Discipline::mlfq(2, 3),
        pacing,
        Arc::clone(&timeline),
    ));
    let io = Arc::new(IoDevice::new(1, pacing, Arc::clone(&timeline)));

    let long = Process::new(
        Pid::from_raw(0),
        Demand {
            burst: 1_500,
            io_operations: 0,
        },
    );
    let long_handle = {
        let (sched, io) = (Arc::clone(&sched), Arc::clone(&io));
        thread::spawn(move || long.run(&sched, &io, pacing))
    };
    wait_until(|| sched.snapshot().holder == Some((Pid::from_raw(0), 2)));

    let short = Process::new(
        Pid::from_raw(1),
        Demand {
            burst: 1,
            io_operations: 0,
        },
    );
    let short_summary = short.run(&sched, &io, pacing).unwrap();
    let long_summary = long_handle.join().unwrap().unwrap();

    assert_eq!(short_summary.final_priority, -1);
    assert_eq!(long_summary.final_priority, -1);
    assert_eq!(long_summary.stats.interruptions, 1);
    // Interrupted, not expired: the FCFS holder keeps its level.
    assert_eq!(long_summary.priority_history, vec![0, 1, 2, -1]);
    assert_eq!(long_summary.stats.cpu_ticks, 1_500);

    let (events, _) = timeline.events();
    let starts: Vec<u32> = events
        .iter()
        .filter(|e| e.kind == EventKind::CpuStart)
        .map(|e| e.pid.as_u32())
        .collect();
    assert_eq!(starts, vec![0, 0, 0, 1, 0]);
    assert_eq!(timeline.now(), 1_501);
}
