//! Records per-thread "start"/"stop" timestamps for named execution phases
//! ("gates") and dumps each thread's timeline to a text log when the thread
//! exits, for offline inspection of worker scheduling and contention.
//!
//! Recording goes into thread-local block chains, so the hot path never takes
//! a lock; the only shared resource is the output sink, written once per
//! thread at teardown.
//!
//! Profiling is off by default. Set the `GATE_PROFILE` environment variable
//! (or call [`enable`] before any thread attaches) to turn it on. The dump
//! goes to `gate-profile.txt`, which can be owerwritten by setting the
//! `GATE_PROFILE_OUT` environment variable.
//!
//! ## Features
//!
//! | Name      | Enabled by default | Description                                                     |
//! | --------- | ------------------ | --------------------------------------------------------------- |
//! | `disable` | `false`            | Compiles the recorder out, replacing the API with empty stubs.  |
//! | `log`     | `false`            | Reports sink problems using the log crate, instead of stderr.   |
//!
//! ## Example
//!
//! ```
//! use gate_profile::gate;
//!
//! fn decode() {
//!     gate!("decode");
//! }
//!
//! gate_profile::attach("main");
//!
//! decode();
//! decode();
//!
//! gate_profile::detach();
//! gate_profile::shutdown();
//! ```

macro_rules! trace {
    ($($args: expr),*) => {
        #[cfg(feature = "log")]
        log::trace!($($args),*);
    }
}

macro_rules! warn {
    ($($args: expr),*) => {
        #[cfg(feature = "log")]
        log::warn!($($args),*);
        #[cfg(not(feature = "log"))]
        eprintln!($($args),*);
    }
}

macro_rules! error {
    ($($args: expr),*) => {
        #[cfg(feature = "log")]
        log::error!($($args),*);
        #[cfg(not(feature = "log"))]
        eprintln!($($args),*);
    }
}

#[cfg(not(feature = "disable"))]
mod profile;

// In case profiling is compiled out we replace the recorder with empty stubs.
#[cfg(feature = "disable")]
mod profile {
    /// Opaque monotonic timestamp.
    pub type Tick = i64;

    pub struct GateGuard;

    impl GateGuard {
        pub fn new(_name: &'static str) -> Self {
            Self
        }
    }

    pub fn enable() {}

    pub fn enabled() -> bool {
        false
    }

    pub fn attach(_thread_name: &str) {}

    pub fn detach() {}

    pub fn gate_start(_name: &'static str) {}

    pub fn gate_stop(_name: &'static str) {}

    pub fn shutdown() {}
}

pub use profile::{
    attach, detach, enable, enabled, gate_start, gate_stop, shutdown, GateGuard, Tick,
};

/// Record the enclosing scope as one start/stop pair on the named gate.
#[macro_export]
macro_rules! gate {
    ($name: expr) => {
        let _gate = {
            use $crate::GateGuard;

            GateGuard::new($name)
        };
    };
}

#[cfg(test)]
mod test {
    use crate::gate;

    #[test]
    fn smoke() {
        fn decode() {
            gate!("decode frame");
        }

        crate::attach("smoke");
        for _ in 0..1 << 17 {
            decode();
        }
        crate::detach();
    }
}
