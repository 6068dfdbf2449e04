//! Producer/consumer handoff gate.
//!
//! The surface is single-buffered: the engine's decode thread writes the same
//! plane memory the render thread reads. The gate is a binary semaphore that
//! serializes the two sides. It starts available; whoever acquires it owns
//! the current buffer set until they release it.
//!
//! Waits are unbounded. Both sides hold the gate for one frame copy at most,
//! so progress is guaranteed unless the gate is interrupted, after which every
//! acquisition fails with [`SurfaceError::GateInterrupted`] for good.

use parking_lot::{Condvar, Mutex};

use crate::error::SurfaceError;

#[derive(Debug)]
struct GateState {
    /// Permit count, 0 or 1
    available: bool,
    interrupted: bool,
}

/// Binary semaphore shared between the decode thread and the render thread.
#[derive(Debug)]
pub struct HandoffGate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl HandoffGate {
    /// Creates a gate with its single permit available.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                available: true,
                interrupted: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Blocks until the permit is available and takes it.
    ///
    /// Every successful call must be paired with exactly one [`release`].
    ///
    /// [`release`]: HandoffGate::release
    pub fn acquire(&self) -> Result<(), SurfaceError> {
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                return Err(SurfaceError::GateInterrupted);
            }
            if state.available {
                state.available = false;
                return Ok(());
            }
            self.released.wait(&mut state);
        }
    }

    /// Takes the permit if it is free right now.
    pub fn try_acquire(&self) -> Result<bool, SurfaceError> {
        let mut state = self.state.lock();
        if state.interrupted {
            return Err(SurfaceError::GateInterrupted);
        }
        if state.available {
            state.available = false;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Returns the permit taken by [`HandoffGate::acquire`].
    ///
    /// Releasing an already-available gate is logged and ignored: the permit
    /// count never exceeds one.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.available {
            tracing::warn!("Handoff gate released while not held; ignoring");
            return;
        }
        state.available = true;
        drop(state);
        // Teardown and interrupted waiters share the condvar; wake them all.
        self.released.notify_all();
    }

    /// Takes the permit for teardown, even on an interrupted gate.
    ///
    /// Interruption stops new frame traffic but a holder may still be inside
    /// plane memory; teardown must wait for it before freeing. Pair with
    /// [`HandoffGate::release`].
    pub fn acquire_for_teardown(&self) {
        let mut state = self.state.lock();
        while !state.available {
            self.released.wait(&mut state);
        }
        state.available = false;
    }

    /// Acquires the permit and returns a guard that releases it on drop.
    pub fn enter(&self) -> Result<GatePermit<'_>, SurfaceError> {
        self.acquire()?;
        Ok(GatePermit { gate: self })
    }

    /// Wakes every waiter with an error and poisons the gate.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        if !state.interrupted {
            tracing::error!("Handoff gate interrupted; frame handoff is stopping");
        }
        state.interrupted = true;
        drop(state);
        self.released.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.lock().interrupted
    }

    /// Returns true if the permit is currently free.
    pub fn is_available(&self) -> bool {
        let state = self.state.lock();
        state.available && !state.interrupted
    }
}

impl Default for HandoffGate {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII permit returned by [`HandoffGate::enter`].
#[must_use = "the gate is released as soon as the permit is dropped"]
pub struct GatePermit<'a> {
    gate: &'a HandoffGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;

    #[test]
    fn starts_available() {
        let gate = HandoffGate::new();
        assert!(gate.is_available());
        assert_eq!(gate.try_acquire(), Ok(true));
        assert!(!gate.is_available());
        assert_eq!(gate.try_acquire(), Ok(false));
        gate.release();
        assert!(gate.is_available());
    }

    #[test]
    fn permit_releases_on_drop() {
        let gate = HandoffGate::new();
        {
            let _permit = gate.enter().unwrap();
            assert!(!gate.is_available());
        }
        assert!(gate.is_available());
    }

    #[test]
    #[traced_test]
    fn double_release_keeps_a_single_permit() {
        let gate = HandoffGate::new();
        gate.release();
        assert!(logs_contain("released while not held"));
        assert_eq!(gate.try_acquire(), Ok(true));
        assert_eq!(gate.try_acquire(), Ok(false));
    }

    #[test]
    fn waiter_blocks_until_release() {
        let gate = Arc::new(HandoffGate::new());
        gate.acquire().unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let gate = Arc::clone(&gate);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                gate.acquire().unwrap();
                acquired.store(true, Ordering::SeqCst);
                gate.release();
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        gate.release();
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn interrupt_wakes_blocked_waiter_with_error() {
        let gate = Arc::new(HandoffGate::new());
        gate.acquire().unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.acquire())
        };

        thread::sleep(Duration::from_millis(20));
        gate.interrupt();

        assert_eq!(waiter.join().unwrap(), Err(SurfaceError::GateInterrupted));
        assert!(gate.is_interrupted());
        assert_eq!(gate.try_acquire(), Err(SurfaceError::GateInterrupted));
        assert!(gate.enter().is_err());
    }

    #[test]
    fn writer_and_reader_never_overlap() {
        const ROUNDS: usize = 2_000;
        let gate = Arc::new(HandoffGate::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let violations = Arc::new(AtomicUsize::new(0));

        let spawn_side = |gate: Arc<HandoffGate>,
                          inside: Arc<AtomicUsize>,
                          violations: Arc<AtomicUsize>| {
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let _permit = gate.enter().unwrap();
                    if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    std::hint::spin_loop();
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        };

        let writer = spawn_side(Arc::clone(&gate), Arc::clone(&inside), Arc::clone(&violations));
        let reader = spawn_side(Arc::clone(&gate), Arc::clone(&inside), Arc::clone(&violations));
        writer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert!(gate.is_available());
    }
}
