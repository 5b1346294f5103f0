// This module tracks per-unit statistics. The counters are atomics because a unit is
// shared between threads: lookups happen concurrently once the engine exists, and the
// engine-build counter is how callers (and tests) observe that exactly one engine was
// constructed no matter how many threads raced on first use. UnitStats is the plain
// snapshot returned to callers.

//! Compiled unit statistics.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Live counters owned by a compiled unit.
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    engine_builds: AtomicUsize,
    layout_checks: AtomicUsize,
    lookups: AtomicUsize,
    lookup_misses: AtomicUsize,
    artifacts_emitted: AtomicUsize,
}

impl StatCounters {
    pub(crate) fn record_engine_build(&self) {
        self.engine_builds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_layout_check(&self) {
        self.layout_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lookup(&self, found: bool) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if !found {
            self.lookup_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_artifact(&self) {
        self.artifacts_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> UnitStats {
        UnitStats {
            engine_builds: self.engine_builds.load(Ordering::Relaxed),
            layout_checks: self.layout_checks.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            lookup_misses: self.lookup_misses.load(Ordering::Relaxed),
            artifacts_emitted: self.artifacts_emitted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a unit's statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnitStats {
    /// Execution engines constructed (at most one per unit).
    pub engine_builds: usize,

    /// Data layout validations performed during engine construction.
    pub layout_checks: usize,

    /// Symbol lookups against the engine.
    pub lookups: usize,

    /// Lookups that found no symbol.
    pub lookup_misses: usize,

    /// Artifacts emitted (files written or in-memory buffers produced).
    pub artifacts_emitted: usize,
}

impl fmt::Display for UnitStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Unit Statistics:")?;
        writeln!(f, "  Engine builds: {}", self.engine_builds)?;
        writeln!(f, "  Layout checks: {}", self.layout_checks)?;
        writeln!(f, "  Symbol lookups: {} ({} missed)", self.lookups, self.lookup_misses)?;
        writeln!(f, "  Artifacts emitted: {}", self.artifacts_emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = StatCounters::default();
        counters.record_engine_build();
        counters.record_layout_check();
        counters.record_lookup(true);
        counters.record_lookup(false);
        counters.record_artifact();

        let stats = counters.snapshot();
        assert_eq!(stats.engine_builds, 1);
        assert_eq!(stats.layout_checks, 1);
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.lookup_misses, 1);
        assert_eq!(stats.artifacts_emitted, 1);
    }

    #[test]
    fn test_display() {
        let stats = UnitStats { lookups: 3, lookup_misses: 1, ..Default::default() };
        let text = stats.to_string();
        assert!(text.contains("Symbol lookups: 3 (1 missed)"));
    }
}
