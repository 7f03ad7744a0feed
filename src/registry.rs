//! Process-wide sink registry and shutdown hook (§5 "Resource lifetime" —
//! "A process-wide shutdown hook closes all registered sinks in reverse
//! registration order").
//!
//! Grounded on the teacher's `config::state::LOGGER: Lazy<RwLock<LoggerState>>`
//! global plus its `AHashMap<HandlerId, _>` sink bookkeeping, narrowed from a
//! do-everything global logger state down to just the registration/shutdown
//! ordering concern this core actually owns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::sink::Sink;

/// Identifies one registration with the process-wide registry, the
/// equivalent of the teacher's `HandlerId`.
pub type HandlerId = usize;

struct Registry {
    next_id: AtomicUsize,
    order: Mutex<Vec<HandlerId>>,
    sinks: Mutex<AHashMap<HandlerId, Arc<dyn Sink>>>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry {
    next_id: AtomicUsize::new(1),
    order: Mutex::new(Vec::new()),
    sinks: Mutex::new(AHashMap::new()),
});

/// Registers `sink` with the process-wide registry, returning a
/// [`HandlerId`] that can later be used with [`unregister`]. Registration
/// order is preserved so [`shutdown_all`] can close sinks in reverse.
pub fn register(sink: Arc<dyn Sink>) -> HandlerId {
    let id = REGISTRY.next_id.fetch_add(1, Ordering::Relaxed);
    REGISTRY.order.lock().push(id);
    REGISTRY.sinks.lock().insert(id, sink);
    id
}

/// Removes a sink from the registry without closing it. A no-op if `id` is
/// unknown (already unregistered, or never registered).
pub fn unregister(id: HandlerId) {
    REGISTRY.sinks.lock().remove(&id);
    REGISTRY.order.lock().retain(|&x| x != id);
}

/// Closes every currently registered sink in the reverse of its registration
/// order, then clears the registry (§5, §3 "Lifecycle" — "Sinks are ...
/// shut down in reverse order of creation on global teardown").
pub fn shutdown_all() {
    let order: Vec<HandlerId> = {
        let mut guard = REGISTRY.order.lock();
        std::mem::take(&mut *guard)
    };
    let mut sinks = REGISTRY.sinks.lock();
    for id in order.into_iter().rev() {
        if let Some(sink) = sinks.remove(&id) {
            sink.close();
        }
    }
}

/// Number of sinks currently registered. Exposed for tests and diagnostics.
pub fn registered_count() -> usize {
    REGISTRY.sinks.lock().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogRecord;
    use crate::severity::Severity;
    use crate::sink::{SinkIdentity, SinkStatsSnapshot};
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        identity: SinkIdentity,
        closed_order: Arc<StdMutex<Vec<&'static str>>>,
        tag: &'static str,
    }

    impl Sink for RecordingSink {
        fn accept(&self, _record: &LogRecord) {}
        fn flush(&self) {}
        fn close(&self) {
            self.closed_order.lock().unwrap().push(self.tag);
        }
        fn threshold(&self) -> Severity {
            self.identity.threshold()
        }
        fn set_threshold(&self, t: Severity) {
            self.identity.set_threshold(t);
        }
        fn name(&self) -> String {
            self.identity.name()
        }
        fn set_name(&self, n: String) {
            self.identity.set_name(n);
        }
        fn is_closed(&self) -> bool {
            false
        }
        fn stats(&self) -> SinkStatsSnapshot {
            SinkStatsSnapshot {
                accepted: 0,
                bytes_written: 0,
                errors: 0,
                dropped: 0,
            }
        }
    }

    /// Each test mutates the process-wide registry, so scenarios run
    /// serially against a shared counter to avoid cross-test interference
    /// (the registry itself has no per-test reset hook, matching the
    /// teacher's own single global `LOGGER`).
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn shutdown_closes_in_reverse_registration_order() {
        let _guard = TEST_LOCK.lock();
        shutdown_all(); // clear anything left by a previous test

        let closed_order = Arc::new(StdMutex::new(Vec::new()));
        let make = |tag: &'static str| {
            Arc::new(RecordingSink {
                identity: SinkIdentity::new(tag, Severity::Trace),
                closed_order: closed_order.clone(),
                tag,
            }) as Arc<dyn Sink>
        };

        register(make("first"));
        register(make("second"));
        register(make("third"));
        assert_eq!(registered_count(), 3);

        shutdown_all();

        assert_eq!(registered_count(), 0);
        assert_eq!(
            *closed_order.lock().unwrap(),
            vec!["third", "second", "first"]
        );
    }

    #[test]
    fn unregister_removes_without_closing() {
        let _guard = TEST_LOCK.lock();
        shutdown_all();

        let closed_order = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::new(RecordingSink {
            identity: SinkIdentity::new("solo", Severity::Trace),
            closed_order: closed_order.clone(),
            tag: "solo",
        }) as Arc<dyn Sink>;
        let id = register(sink);
        unregister(id);

        assert_eq!(registered_count(), 0);
        shutdown_all();
        assert!(closed_order.lock().unwrap().is_empty());
    }
}
