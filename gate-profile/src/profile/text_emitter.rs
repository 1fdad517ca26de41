//! The shared dump sink: opened lazily exactly once per process, written
//! under one coarse lock at thread teardown, closed by [`close`].

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::ThreadProfile;

const DEFAULT_PATH: &str = "gate-profile.txt";

// Set once the lazy open below has run. `save_profile` and `close` must not
// touch SINK before then, the first access would open the file.
static OPENED: AtomicBool = AtomicBool::new(false);

lazy_static::lazy_static! {
    static ref SINK: Mutex<Option<BufWriter<File>>> = {
        let fname = std::env::var("GATE_PROFILE_OUT")
            .unwrap_or_else(|_| DEFAULT_PATH.to_owned());
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(fname.as_str())
            .expect("unable to create gate profile log");
        trace!("recording gate profile in {}", fname);
        OPENED.store(true, Ordering::Relaxed);
        Mutex::new(Some(BufWriter::new(file)))
    };
}

/// Open the sink. Called from the one-time attach initialization; panics
/// when the log cannot be created.
pub(super) fn open() {
    lazy_static::initialize(&SINK);
}

/// Serialize one thread's full record. The sink lock is held for the whole
/// dump so threads exiting together cannot interleave their lines.
pub(super) fn save_profile(profile: &ThreadProfile) {
    if !OPENED.load(Ordering::Relaxed) {
        return;
    }

    let mut sink = SINK.lock().expect("gate profile sink lock");
    match sink.as_mut() {
        Some(out) => {
            if let Err(err) = profile.save(out) {
                error!("failed to write gate profile: {}", err);
            } else if let Err(err) = out.flush() {
                error!("failed to flush gate profile: {}", err);
            }
        }
        None => {
            warn!("gate profile sink already closed, dump lost");
        }
    }
}

/// Close the sink. Idempotent, and a no-op when it was never opened.
pub(super) fn close() {
    if !OPENED.load(Ordering::Relaxed) {
        return;
    }

    let mut sink = SINK.lock().expect("gate profile sink lock");
    if let Some(mut out) = sink.take() {
        if let Err(err) = out.flush() {
            error!("failed to flush gate profile: {}", err);
        }
    }
}
