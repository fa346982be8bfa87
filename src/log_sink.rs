//! Reassembly of transport-engine log output
//!
//! The swarm engine logs from its own threads in arbitrary fragments. [`CallbackLogSink`]
//! accumulates fragments in one buffer and releases complete lines only. Each line loses its
//! `HH:MM:SS.mmm` timestamp and decorative prefix (` `, `*`, `=`, `>`), lines shorter than
//! three characters are dropped, and what remains is logged under the `swarm` target when
//! [`LogMask::TRANSPORT_CALLBACK`] is enabled.
//!
//! The engine's callback cannot capture state, so sinks are registered in a
//! [`SinkRegistry`] keyed by [`SessionHandle`] and reached through
//! [`transport_log_callback`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, OnceLock, PoisonError, RwLock};

use regex::Regex;
use serde::Deserialize;
use tracing::info;

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{2}:[0-9]{2}:[0-9]{2}\.[0-9]{3}").expect("timestamp pattern is valid")
});

const DECORATION: [char; 4] = [' ', '*', '=', '>'];
const MIN_LINE_LEN: usize = 3;

/// Bit mask selecting optional log sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct LogMask(u32);

impl LogMask {
    pub const NONE: LogMask = LogMask(0);
    /// Lines produced by the transport engine's logging callback.
    pub const TRANSPORT_CALLBACK: LogMask = LogMask(1);

    pub const fn from_bits(bits: u32) -> Self {
        LogMask(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: LogMask) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Debug)]
pub struct CallbackLogSink {
    pending: Mutex<String>,
    mask: LogMask,
}

impl CallbackLogSink {
    pub fn new(mask: LogMask) -> Self {
        Self {
            pending: Mutex::new(String::new()),
            mask,
        }
    }

    /// Feed one fragment; returns the lines that were logged as a result.
    pub fn accept(&self, fragment: &str) -> Vec<String> {
        let complete = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.push_str(fragment);
            match pending.rfind('\n') {
                Some(end) => {
                    let remainder = pending.split_off(end + 1);
                    std::mem::replace(&mut *pending, remainder)
                }
                None => return Vec::new(),
            }
        };

        if !self.mask.contains(LogMask::TRANSPORT_CALLBACK) {
            return Vec::new();
        }

        complete
            .lines()
            .filter_map(clean_line)
            .inspect(|line| info!(target: "swarm", "{}", line))
            .collect()
    }

    /// Text received since the last line terminator.
    pub fn pending(&self) -> String {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn clean_line(raw: &str) -> Option<String> {
    let raw = raw.strip_suffix('\r').unwrap_or(raw);
    let without_timestamp = match TIMESTAMP.find(raw) {
        Some(stamp) => &raw[stamp.end()..],
        None => raw,
    };
    let line = without_timestamp.trim_start_matches(DECORATION);
    (line.len() >= MIN_LINE_LEN).then(|| line.to_string())
}

/// Identifies one transport session for callback routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

#[derive(Debug, Default)]
pub struct SinkRegistry {
    next: AtomicU64,
    sinks: RwLock<HashMap<SessionHandle, Arc<CallbackLogSink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by [`transport_log_callback`].
    pub fn global() -> &'static SinkRegistry {
        static REGISTRY: OnceLock<SinkRegistry> = OnceLock::new();
        REGISTRY.get_or_init(SinkRegistry::new)
    }

    pub fn register(&self, sink: Arc<CallbackLogSink>) -> SessionHandle {
        let handle = SessionHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, sink);
        handle
    }

    pub fn unregister(&self, handle: SessionHandle) -> Option<Arc<CallbackLogSink>> {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
    }

    /// Route a fragment to the sink registered for `handle`. Unknown handles are ignored.
    pub fn dispatch(&self, handle: SessionHandle, fragment: &str) -> Vec<String> {
        let sink = self
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned();
        match sink {
            Some(sink) => sink.accept(fragment),
            None => Vec::new(),
        }
    }
}

/// Logging callback handed to the transport engine.
pub fn transport_log_callback(handle: SessionHandle, fragment: &str) {
    SinkRegistry::global().dispatch(handle, fragment);
}
