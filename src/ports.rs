//! Injected collaborators: the clock and the id generator
//!
//! The repository takes both through its builder, so tests and reseeding jobs can swap
//! in deterministic implementations.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Source of unique, lexicographically sortable identifiers
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A clock under test control. Starts at the given instant and only moves when told.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// ULID identifiers. Monotonic within one generator, so ids created in the same
/// millisecond still sort in creation order.
pub struct UlidGenerator {
    generator: Mutex<ulid::Generator>,
}

impl UlidGenerator {
    pub fn new() -> Self {
        Self {
            generator: Mutex::new(ulid::Generator::new()),
        }
    }
}

impl Default for UlidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for UlidGenerator {
    fn next_id(&self) -> String {
        let generated = self
            .generator
            .lock()
            .ok()
            .and_then(|mut generator| generator.generate().ok());
        // Overflow of the random component within a single millisecond is the only failure;
        // a fresh non-monotonic ULID is still unique.
        generated.unwrap_or_else(ulid::Ulid::new).to_string()
    }
}

/// Zero-padded sequential ids (`place-000001`, ...), sortable and predictable
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{}-{:06}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulids_are_unique_and_sorted() {
        let ids = UlidGenerator::new();
        let generated: Vec<String> = (0..100).map(|_| ids.next_id()).collect();
        let mut sorted = generated.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, generated);
        assert_eq!(generated[0].len(), 26);
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIds::new("place");
        assert_eq!(ids.next_id(), "place-000001");
        assert_eq!(ids.next_id(), "place-000002");
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
        clock.set(42);
        assert_eq!(clock.now_millis(), 42);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
