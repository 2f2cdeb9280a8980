//! Single-slot cache that only advances to strictly higher generations.

use std::sync::Mutex;

use tracing::debug;

struct Slot<T> {
    value: Option<T>,
    generation: u64,
}

/// Holds at most one value; replacement is monotonic by generation.
///
/// `set` with a generation at or below the stored one is refused, so late
/// results can never roll the displayed frame backwards, regardless of what
/// the caller got wrong upstream.
pub struct FrameCache<T> {
    slot: Mutex<Slot<T>>,
}

impl<T: Clone> FrameCache<T> {
    pub fn new() -> Self {
        Self { slot: Mutex::new(Slot { value: None, generation: 0 }) }
    }

    /// Store `value` for `generation`. Returns false without storing when
    /// the generation does not advance.
    pub fn set(&self, value: T, generation: u64) -> bool {
        let mut slot = self.slot.lock().unwrap();
        if generation <= slot.generation {
            debug!(generation, current = slot.generation, "frame cache set refused (stale)");
            return false;
        }
        slot.value = Some(value);
        slot.generation = generation;
        debug!(generation, "frame cache updated");
        true
    }

    /// Current value, if any.
    pub fn get(&self) -> Option<T> {
        self.slot.lock().unwrap().value.clone()
    }

    /// Generation of the stored value; 0 before the first `set`.
    pub fn generation(&self) -> u64 {
        self.slot.lock().unwrap().generation
    }

    /// Drop the stored value but keep the generation floor, so a clear can
    /// never re-admit an older generation.
    pub fn clear(&self) {
        self.slot.lock().unwrap().value = None;
    }
}

impl<T: Clone> Default for FrameCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_returns_latest_value() {
        let cache = FrameCache::new();
        assert!(cache.get().is_none());

        assert!(cache.set("frame-1", 1));
        assert_eq!(cache.get(), Some("frame-1"));
        assert_eq!(cache.generation(), 1);
    }

    #[test]
    fn refuses_stale_and_equal_generations() {
        let cache = FrameCache::new();
        assert!(cache.set("frame-5", 5));

        assert!(!cache.set("frame-3", 3));
        assert!(!cache.set("frame-5-again", 5));
        assert_eq!(cache.get(), Some("frame-5"));
        assert_eq!(cache.generation(), 5);
    }

    #[test]
    fn generations_skip_forward_freely() {
        let cache = FrameCache::new();
        assert!(cache.set("a", 1));
        assert!(cache.set("b", 10));
        assert_eq!(cache.generation(), 10);
    }

    #[test]
    fn clear_keeps_the_generation_floor() {
        let cache = FrameCache::new();
        assert!(cache.set("a", 7));
        cache.clear();

        assert!(cache.get().is_none());
        assert!(!cache.set("late", 6));
        assert!(cache.set("fresh", 8));
        assert_eq!(cache.get(), Some("fresh"));
    }
}
