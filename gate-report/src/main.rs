//! Offline reader for gate profile dumps.
//!
//! Parses the text log written by the `gate-profile` crate at thread
//! teardown, restores each gate's events to chronological order, pairs
//! starts with stops and prints per-gate busy-time statistics.
//!
//! Usage: `gate-report [--json] [dump-path]`. The path falls back to the
//! `GATE_PROFILE_OUT` environment variable, then `gate-profile.txt`.

use anyhow::{bail, Context};
use serde::Serialize;

use std::fs;

/// One gate as recorded by one thread, events in chronological order.
#[derive(Debug, Clone, PartialEq)]
struct GateDump {
    name: String,
    start: Vec<i64>,
    stop: Vec<i64>,
}

/// One `thread:` record of the dump.
#[derive(Debug, Clone, PartialEq)]
struct ThreadDump {
    name: String,
    identity: String,
    gates: Vec<GateDump>,
}

/// Busy-time statistics for one gate on one thread.
#[derive(Debug, Clone, Serialize)]
struct GateSummary {
    thread: String,
    gate: String,
    starts: usize,
    stops: usize,
    completed: usize,
    total_us: i64,
    mean_us: f64,
    min_us: i64,
    max_us: i64,
}

// The recorder emits each chain newest block first with every block in
// reverse fill order; undoing both reversals restores call order.
fn chronological(blocks: &[Vec<i64>]) -> Vec<i64> {
    blocks
        .iter()
        .rev()
        .flat_map(|block| block.iter().rev().copied())
        .collect()
}

fn parse_dump(text: &str) -> anyhow::Result<Vec<ThreadDump>> {
    #[derive(Default)]
    struct RawGate {
        name: String,
        start: Vec<Vec<i64>>,
        stop: Vec<Vec<i64>>,
    }

    struct RawThread {
        name: String,
        identity: String,
        gates: Vec<RawGate>,
    }

    let mut threads: Vec<RawThread> = Vec::new();
    let mut in_stop = false;

    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;
        if let Some(rest) = line.strip_prefix("thread: ") {
            if !rest.ends_with(')') {
                bail!("malformed thread header on line {}", lineno);
            }
            let open = rest
                .rfind(" (")
                .with_context(|| format!("malformed thread header on line {}", lineno))?;
            threads.push(RawThread {
                name: rest[..open].to_owned(),
                identity: rest[open + 2..rest.len() - 1].to_owned(),
                gates: Vec::new(),
            });
            in_stop = false;
        } else if let Some(name) = line.strip_prefix("gate: ") {
            let thread = threads
                .last_mut()
                .with_context(|| format!("gate outside a thread record on line {}", lineno))?;
            thread.gates.push(RawGate {
                name: name.to_owned(),
                ..Default::default()
            });
            in_stop = false;
        } else if line == "start:" {
            in_stop = false;
        } else if line == "stop:" {
            in_stop = true;
        } else {
            let gate = threads
                .last_mut()
                .and_then(|thread| thread.gates.last_mut())
                .with_context(|| format!("timestamps outside a gate on line {}", lineno))?;
            let block = line
                .split_whitespace()
                .map(|tok| {
                    tok.parse::<i64>()
                        .with_context(|| format!("bad timestamp {:?} on line {}", tok, lineno))
                })
                .collect::<anyhow::Result<Vec<i64>>>()?;
            if in_stop {
                gate.stop.push(block);
            } else {
                gate.start.push(block);
            }
        }
    }

    Ok(threads
        .into_iter()
        .map(|thread| ThreadDump {
            name: thread.name,
            identity: thread.identity,
            gates: thread
                .gates
                .into_iter()
                .map(|gate| GateDump {
                    name: gate.name,
                    start: chronological(&gate.start),
                    stop: chronological(&gate.stop),
                })
                .collect(),
        })
        .collect())
}

fn summarize(threads: &[ThreadDump]) -> Vec<GateSummary> {
    let mut rows = Vec::new();
    for thread in threads {
        for gate in &thread.gates {
            if gate.start.len() != gate.stop.len() {
                log::warn!(
                    "gate {} on thread {} has {} starts and {} stops",
                    gate.name,
                    thread.name,
                    gate.start.len(),
                    gate.stop.len()
                );
            }
            let durations: Vec<i64> = gate
                .start
                .iter()
                .zip(gate.stop.iter())
                .map(|(start, stop)| stop - start)
                .collect();
            let total: i64 = durations.iter().sum();
            rows.push(GateSummary {
                thread: thread.name.clone(),
                gate: gate.name.clone(),
                starts: gate.start.len(),
                stops: gate.stop.len(),
                completed: durations.len(),
                total_us: total,
                mean_us: if durations.is_empty() {
                    0.0
                } else {
                    total as f64 / durations.len() as f64
                },
                min_us: durations.iter().copied().min().unwrap_or(0),
                max_us: durations.iter().copied().max().unwrap_or(0),
            });
        }
    }
    rows
}

fn print_table(rows: &[GateSummary]) {
    println!(
        "{:<16} {:<24} {:>7} {:>7} {:>12} {:>10} {:>10} {:>10}",
        "thread", "gate", "starts", "stops", "total_us", "mean_us", "min_us", "max_us"
    );
    for row in rows {
        println!(
            "{:<16} {:<24} {:>7} {:>7} {:>12} {:>10.1} {:>10} {:>10}",
            row.thread,
            row.gate,
            row.starts,
            row.stops,
            row.total_us,
            row.mean_us,
            row.min_us,
            row.max_us
        );
    }
}

fn main() -> Result<(), anyhow::Error> {
    pretty_env_logger::init();

    let mut json = false;
    let mut path: Option<String> = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            _ => path = Some(arg),
        }
    }
    let path = path
        .or_else(|| std::env::var("GATE_PROFILE_OUT").ok())
        .unwrap_or_else(|| "gate-profile.txt".to_owned());

    let text = fs::read_to_string(path.as_str())
        .with_context(|| format!("failed to read gate profile dump {}", path))?;
    let threads = parse_dump(&text)?;
    log::info!("parsed {} thread records from {}", threads.len(), path);

    let rows = summarize(&threads);
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print_table(&rows);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "thread: worker-1 (0x7f3a94000b60)\n\
                          gate: decode\n\
                          start:\n\
                          5 4 \n\
                          3 2 1 \n\
                          stop:\n\
                          9 8 7 \n\
                          gate: setup\n\
                          start:\n\
                          0 \n\
                          stop:\n\
                          \n\
                          thread: worker-2 (0x7f3a94000c10)\n";

    #[test]
    fn parse_restores_chronological_order() {
        let threads = parse_dump(SAMPLE).unwrap();
        assert_eq!(threads.len(), 2);

        let worker = &threads[0];
        assert_eq!(worker.name, "worker-1");
        assert_eq!(worker.identity, "0x7f3a94000b60");
        assert_eq!(worker.gates.len(), 2);

        let decode = &worker.gates[0];
        assert_eq!(decode.start, vec![1, 2, 3, 4, 5]);
        assert_eq!(decode.stop, vec![7, 8, 9]);

        let setup = &worker.gates[1];
        assert_eq!(setup.start, vec![0]);
        assert_eq!(setup.stop, Vec::<i64>::new());

        assert!(threads[1].gates.is_empty());
    }

    #[test]
    fn thread_names_may_contain_parentheses() {
        let threads = parse_dump("thread: worker (gpu) (0x1)\n").unwrap();
        assert_eq!(threads[0].name, "worker (gpu)");
        assert_eq!(threads[0].identity, "0x1");
    }

    #[test]
    fn summaries_pair_events_in_call_order() {
        let threads = parse_dump(SAMPLE).unwrap();
        let rows = summarize(&threads);
        assert_eq!(rows.len(), 2);

        let decode = &rows[0];
        assert_eq!(decode.starts, 5);
        assert_eq!(decode.stops, 3);
        assert_eq!(decode.completed, 3);
        assert_eq!(decode.total_us, 18);
        assert_eq!(decode.mean_us, 6.0);
        assert_eq!(decode.min_us, 6);
        assert_eq!(decode.max_us, 6);

        let setup = &rows[1];
        assert_eq!(setup.completed, 0);
        assert_eq!(setup.total_us, 0);
    }

    #[test]
    fn rejects_timestamps_outside_a_gate() {
        assert!(parse_dump("12 11 \n").is_err());
    }

    #[test]
    fn rejects_garbage_timestamps() {
        let text = "thread: w (0x1)\ngate: g\nstart:\n1 x \nstop:\n\n";
        assert!(parse_dump(text).is_err());
    }
}
