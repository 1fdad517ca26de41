//! End-to-end dump test: threads attach, record and exit; each profile lands
//! in the shared sink exactly once, in the documented block layout. Runs as
//! its own process so it can own the global sink.

#![cfg(not(feature = "disable"))]

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::thread;

fn dump_path() -> PathBuf {
    env::temp_dir().join(format!("gate-profile-dump-{}.txt", std::process::id()))
}

/// Body lines of each `thread:` record, keyed by thread name.
fn thread_records(text: &str) -> HashMap<String, Vec<String>> {
    let mut records = HashMap::new();
    let mut current: Option<(String, Vec<String>)> = None;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("thread: ") {
            if let Some((name, body)) = current.take() {
                records.insert(name, body);
            }
            let name = rest[..rest.rfind(" (").unwrap()].to_owned();
            current = Some((name, Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line.to_owned());
        }
    }
    if let Some((name, body)) = current {
        records.insert(name, body);
    }
    records
}

#[test]
fn worker_dumps_flush_once_with_documented_layout() {
    let path = dump_path();
    let _ = fs::remove_file(&path);
    env::set_var("GATE_PROFILE_OUT", &path);
    gate_profile::enable();
    assert!(gate_profile::enabled());

    let recorder = thread::spawn(|| {
        gate_profile::attach("worker-1");
        gate_profile::gate_start("decode");
        for _ in 0..1500 {
            gate_profile::gate_start("decode");
            gate_profile::gate_stop("decode");
        }
        // exits without detach; the thread-local destructor flushes
    });
    let idle = thread::spawn(|| {
        gate_profile::attach("worker-2");
    });
    recorder.join().unwrap();
    idle.join().unwrap();

    gate_profile::attach("main");
    gate_profile::gate_start("assemble");
    gate_profile::gate_stop("assemble");
    gate_profile::detach();

    gate_profile::shutdown();
    gate_profile::shutdown();

    let text = fs::read_to_string(&path).unwrap();
    for name in &["worker-1", "worker-2", "main"] {
        assert_eq!(
            text.matches(&format!("thread: {} (", name)).count(),
            1,
            "expected exactly one record for {}",
            name
        );
    }

    let records = thread_records(&text);
    let entries = |line: &String| line.split_whitespace().count();

    let worker = &records["worker-1"];
    assert_eq!(worker[0], "gate: decode");
    assert_eq!(worker[1], "start:");
    assert_eq!(entries(&worker[2]), 501);
    assert_eq!(entries(&worker[3]), 1000);
    assert_eq!(worker[4], "stop:");
    assert_eq!(entries(&worker[5]), 500);
    assert_eq!(entries(&worker[6]), 1000);
    assert_eq!(worker.len(), 7);

    // attached but idle: a header with no gates
    assert!(records["worker-2"].is_empty());

    let main_record = &records["main"];
    assert_eq!(main_record[0], "gate: assemble");
    assert_eq!(entries(&main_record[2]), 1);

    // timestamps within one line run newest first
    let newest_first: Vec<i64> = worker[2]
        .split_whitespace()
        .map(|tok| tok.parse().unwrap())
        .collect();
    let mut sorted = newest_first.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(newest_first, sorted);

    let _ = fs::remove_file(&path);
}
