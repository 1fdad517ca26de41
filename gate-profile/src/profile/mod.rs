//! Per-thread gate recording: the thread-local profile, the lock-free append
//! path and the teardown hook that flushes it to the shared sink.

mod block;
mod text_emitter;

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;
use std::time::Instant;

use block::BlockChain;

/// Opaque monotonic timestamp: microsecond resolution, comparable, no fixed
/// epoch.
pub type Tick = i64;

lazy_static::lazy_static! {
    static ref EPOCH: Instant = Instant::now();
}

fn now() -> Tick {
    EPOCH.elapsed().as_micros() as Tick
}

static ENABLED: AtomicBool = AtomicBool::new(false);
static INIT: Once = Once::new();

thread_local!(
    static PROFILE: RefCell<Option<ThreadProfile>> = RefCell::new(None);
);

/// Turn profiling on. The flag is read once, when the first [`attach`] runs,
/// so call this before any thread attaches.
pub fn enable() {
    ENABLED.store(true, Ordering::Relaxed);
}

/// Whether profiling was switched on, either by [`enable`] or the
/// `GATE_PROFILE` environment variable. Lets a thread pool skip attaching
/// its workers entirely.
pub fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed) || std::env::var_os("GATE_PROFILE").is_some()
}

/// A named timing channel: two chains, one per event direction, grown
/// independently.
struct Gate {
    start: BlockChain,
    stop: BlockChain,
}

impl Gate {
    fn new() -> Self {
        Self {
            start: BlockChain::new(),
            stop: BlockChain::new(),
        }
    }
}

/// Everything one thread records. Owned by that thread alone through the
/// thread-local slot; dropping it flushes the record and frees the chains.
struct ThreadProfile {
    name: String,
    gates: HashMap<&'static str, Gate>,
}

impl ThreadProfile {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            gates: HashMap::new(),
        }
    }

    // Both directions go through this lookup, a gate referenced by only one
    // of them still exists with an empty twin chain.
    fn gate_mut(&mut self, name: &'static str) -> &mut Gate {
        self.gates.entry(name).or_insert_with(Gate::new)
    }

    fn record_start(&mut self, name: &'static str) {
        let tick = now();
        self.gate_mut(name).start.push(tick);
    }

    fn record_stop(&mut self, name: &'static str) {
        let tick = now();
        self.gate_mut(name).stop.push(tick);
    }

    fn save<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "thread: {} ({:p})", self.name, self)?;
        for (name, gate) in &self.gates {
            writeln!(out, "gate: {}", name)?;
            writeln!(out, "start:")?;
            gate.start.save(out)?;
            writeln!(out, "stop:")?;
            gate.stop.save(out)?;
        }
        Ok(())
    }
}

impl Drop for ThreadProfile {
    fn drop(&mut self) {
        text_emitter::save_profile(self);
    }
}

/// Register the calling thread with the profiler.
///
/// The first call process-wide runs the one-time initialization: when
/// profiling is enabled the shared sink is opened, and failing to open it is
/// fatal. Attaching a thread twice is a programming error and panics.
pub fn attach(thread_name: &str) {
    INIT.call_once(|| {
        if std::env::var_os("GATE_PROFILE").is_some() {
            enable();
        }
        if enabled() {
            text_emitter::open();
        }
    });

    PROFILE.with(|slot| {
        let mut slot = slot.borrow_mut();
        assert!(
            slot.is_none(),
            "gate profile already attached to this thread"
        );
        *slot = Some(ThreadProfile::new(thread_name));
    });
}

/// Flush and free the calling thread's profile right away instead of waiting
/// for thread exit. Harmless when nothing is attached.
pub fn detach() {
    PROFILE.with(|slot| {
        slot.borrow_mut().take();
    });
}

/// Append a start timestamp to the named gate of the calling thread's
/// profile. A silent no-op on unattached threads.
pub fn gate_start(name: &'static str) {
    PROFILE.with(|slot| {
        if let Some(profile) = slot.borrow_mut().as_mut() {
            profile.record_start(name);
        }
    });
}

/// Append a stop timestamp to the named gate of the calling thread's
/// profile. A silent no-op on unattached threads.
pub fn gate_stop(name: &'static str) {
    PROFILE.with(|slot| {
        if let Some(profile) = slot.borrow_mut().as_mut() {
            profile.record_stop(name);
        }
    });
}

/// Close the shared sink. Idempotent, and a no-op when profiling never
/// opened it. Threads exiting afterwards lose their dump.
pub fn shutdown() {
    text_emitter::close();
}

/// Records a start event on construction and the matching stop event when
/// dropped, covering every exit path of the enclosing scope.
pub struct GateGuard {
    name: &'static str,
}

impl GateGuard {
    pub fn new(name: &'static str) -> Self {
        gate_start(name);
        Self { name }
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        gate_stop(self.name);
    }
}

#[cfg(test)]
fn attached() -> bool {
    PROFILE.with(|slot| slot.borrow().is_some())
}

#[cfg(test)]
fn chain_lens(name: &'static str) -> Option<(usize, usize)> {
    PROFILE.with(|slot| {
        slot.borrow()
            .as_ref()
            .and_then(|profile| profile.gates.get(name))
            .map(|gate| (gate.start.len(), gate.stop.len()))
    })
}
