//! Per-path admission control.
//!
//! One synchronized map owns both pieces of per-path mutable state: the
//! processing flag (at most one pass in flight per path at any instant) and
//! the debounce timestamp that collapses bursts of modification
//! notifications. Stability polling and hashing happen entirely outside the
//! lock; the map is only touched at admission and release, so a slow pass
//! on one path never blocks admission on another.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, trace};
use vigil_core::EventKind;

/// Modification notifications closer together than this are dropped.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);
/// Slot-table size that triggers an eviction pass.
const PRUNE_THRESHOLD: usize = 1000;
/// Idle slots with no accepted activity inside this window are evicted
/// during pruning.
const PRUNE_MAX_AGE: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct PathSlot {
    processing: bool,
    last_accepted: Option<Instant>,
}

/// Per-path mutual exclusion and debounce state.
#[derive(Debug, Default)]
pub struct PathCoordinator {
    slots: Mutex<HashMap<PathBuf, PathSlot>>,
}

impl PathCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a notification may start a processing pass.
    ///
    /// Modification events inside the debounce window of the previously
    /// accepted one for the same path are dropped before the lock check;
    /// creation events are never debounced. A path whose slot is already
    /// Processing is never admitted twice. The returned permit releases the
    /// slot when dropped.
    pub fn admit(self: &Arc<Self>, path: &Path, kind: EventKind) -> Option<ProcessingPermit> {
        self.admit_at(path, kind, Instant::now())
    }

    fn admit_at(
        self: &Arc<Self>,
        path: &Path,
        kind: EventKind,
        now: Instant,
    ) -> Option<ProcessingPermit> {
        let mut slots = lock_or_recover(&self.slots);
        let slot = slots.entry(path.to_path_buf()).or_default();

        if kind == EventKind::Modified {
            if let Some(last) = slot.last_accepted {
                if now.saturating_duration_since(last) < DEBOUNCE_WINDOW {
                    trace!(path = %path.display(), "modification debounced");
                    return None;
                }
            }
            slot.last_accepted = Some(now);
        }

        if slot.processing {
            debug!(path = %path.display(), "pass already in flight");
            return None;
        }
        slot.processing = true;

        prune_if_needed(&mut slots, now);
        drop(slots);

        Some(ProcessingPermit {
            coordinator: Arc::clone(self),
            path: path.to_path_buf(),
        })
    }

    /// Number of tracked paths. Diagnostic hook; also exercised by the
    /// pruning tests.
    #[must_use]
    pub fn tracked_paths(&self) -> usize {
        lock_or_recover(&self.slots).len()
    }

    fn release(&self, path: &Path) {
        let mut slots = lock_or_recover(&self.slots);
        if let Some(slot) = slots.get_mut(path) {
            slot.processing = false;
        }
    }
}

/// RAII admission token: the path's slot returns to Idle when this drops,
/// whether the pass finished, bailed early, or panicked.
#[derive(Debug)]
pub struct ProcessingPermit {
    coordinator: Arc<PathCoordinator>,
    path: PathBuf,
}

impl ProcessingPermit {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessingPermit {
    fn drop(&mut self) {
        self.coordinator.release(&self.path);
    }
}

fn prune_if_needed(slots: &mut MutexGuard<'_, HashMap<PathBuf, PathSlot>>, now: Instant) {
    if slots.len() <= PRUNE_THRESHOLD {
        return;
    }
    let before = slots.len();
    slots.retain(|_, slot| {
        slot.processing
            || slot
                .last_accepted
                .is_some_and(|at| now.saturating_duration_since(at) < PRUNE_MAX_AGE)
    });
    debug!(
        evicted = before.saturating_sub(slots.len()),
        remaining = slots.len(),
        "pruned idle path slots"
    );
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> Arc<PathCoordinator> {
        Arc::new(PathCoordinator::new())
    }

    #[test]
    fn second_creation_is_refused_while_first_is_processing() {
        let coord = coordinator();
        let path = Path::new("/watch/incoming.bin");

        let permit = coord.admit(path, EventKind::Created);
        assert!(permit.is_some());
        assert!(coord.admit(path, EventKind::Created).is_none());

        drop(permit);
        assert!(coord.admit(path, EventKind::Created).is_some());
    }

    #[test]
    fn rapid_modifications_collapse_to_one_pass() {
        let coord = coordinator();
        let path = Path::new("/watch/busy.log");

        let mut accepted = 0;
        for _ in 0..5 {
            if let Some(permit) = coord.admit(path, EventKind::Modified) {
                accepted += 1;
                drop(permit);
            }
        }
        assert_eq!(accepted, 1);
    }

    #[test]
    fn modification_outside_the_window_is_accepted_again() {
        let coord = coordinator();
        let path = Path::new("/watch/slow.log");
        let t0 = Instant::now();

        assert!(coord.admit_at(path, EventKind::Modified, t0).is_some());
        assert!(coord
            .admit_at(path, EventKind::Modified, t0 + Duration::from_millis(200))
            .is_none());
        assert!(coord
            .admit_at(path, EventKind::Modified, t0 + Duration::from_secs(2))
            .is_some());
    }

    #[test]
    fn creations_are_not_debounced() {
        let coord = coordinator();
        let path = Path::new("/watch/new.bin");

        for _ in 0..3 {
            let permit = coord.admit(path, EventKind::Created);
            assert!(permit.is_some());
        }
    }

    #[test]
    fn debounce_timestamp_refreshes_even_when_locked() {
        // Matches the notification handler contract: the accepted-time is
        // updated before the lock check, so a burst arriving during a pass
        // stays suppressed after the pass completes.
        let coord = coordinator();
        let path = Path::new("/watch/contended.log");
        let t0 = Instant::now();

        let permit = coord.admit_at(path, EventKind::Modified, t0);
        assert!(permit.is_some());

        // Outside the window of t0 but in flight: refused, timestamp moves.
        let t1 = t0 + Duration::from_secs(2);
        assert!(coord.admit_at(path, EventKind::Modified, t1).is_none());
        drop(permit);

        // Within the window of t1: still debounced despite the free slot.
        assert!(coord
            .admit_at(path, EventKind::Modified, t1 + Duration::from_millis(100))
            .is_none());
    }

    #[test]
    fn release_is_unconditional_on_drop() {
        let coord = coordinator();
        let path = Path::new("/watch/flaky.bin");

        {
            let _permit = coord.admit(path, EventKind::Created);
            // Early exit of a pass: the permit drops here without any
            // completion call.
        }
        assert!(coord.admit(path, EventKind::Created).is_some());
    }

    #[test]
    fn slot_table_is_pruned_past_the_threshold() {
        let coord = coordinator();

        for i in 0..=PRUNE_THRESHOLD {
            let path = PathBuf::from(format!("/watch/churn-{i}.tmp"));
            let permit = coord.admit(&path, EventKind::Created);
            drop(permit);
        }

        // Creation-only slots never recorded accepted activity, so the
        // eviction pass reclaims them once the table overflows.
        assert!(coord.tracked_paths() <= PRUNE_THRESHOLD);
    }

    #[test]
    fn recently_active_slots_survive_pruning() {
        let coord = coordinator();
        let hot = Path::new("/watch/hot.log");
        drop(coord.admit(hot, EventKind::Modified));

        for i in 0..=PRUNE_THRESHOLD {
            let path = PathBuf::from(format!("/watch/cold-{i}.tmp"));
            drop(coord.admit(&path, EventKind::Created));
        }

        // The modified slot carries a fresh accepted-time and stays.
        assert!(coord.admit(hot, EventKind::Modified).is_none());
    }
}
