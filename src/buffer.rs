// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Etaoin Systems. All Rights Reserved.

//! Triple-buffered frame hand-off between the worker and the consumer.
//!
//! Three fixed 16-bit image buffers rotate through three roles:
//!
//! ```text
//!        worker                              consumer
//!   ┌──────────────┐    publish    ┌──────────────┐
//!   │     fill     │ ────────────► │     done     │
//!   │ (being       │               │ (most recent │
//!   │  written)    │               │  complete)   │
//!   └──────────────┘               └──────┬───────┘
//!     next fill ≠ lock                    │ consume
//!                                  ┌──────▼───────┐
//!                                  │     lock     │
//!                                  │ (held by the │
//!                                  │  consumer)   │
//!                                  └──────────────┘
//! ```
//!
//! The roles are indices into the buffer array, guarded by one mutex. The
//! single cross-thread constraint is `fill != lock`: the worker never
//! writes the buffer the consumer is reading, so the consumer's frame
//! stays stable without copying. `done` may coincide with `lock` between
//! a consume and the next publish.
//!
//! A signed freshness counter rides along: negative while warm-up frames
//! are being dropped, zero when the consumer has seen the latest frame,
//! positive when a new frame is pending.

use crate::tof::IMG_PIXELS;
use std::cell::UnsafeCell;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct Roles {
    fill: usize,
    done: Option<usize>,
    lock: Option<usize>,
    fresh: i32,
}

/// Thread-safe three-buffer rotor for 100×100 u16 frames.
pub(crate) struct TripleBuffer {
    bufs: [UnsafeCell<Vec<u16>>; 3],
    state: Mutex<Roles>,
}

// SAFETY: buffer contents are only touched through the role discipline --
// the worker writes bufs[fill], the consumer reads bufs[lock], and the
// mutex-guarded rotation keeps fill != lock at all times.
unsafe impl Sync for TripleBuffer {}

impl TripleBuffer {
    /// Create a rotor with the given initial freshness (negative to drop
    /// that many warm-up frames).
    pub fn new(fresh: i32) -> Self {
        Self {
            bufs: std::array::from_fn(|_| UnsafeCell::new(vec![0u16; IMG_PIXELS])),
            state: Mutex::new(Roles {
                fill: 0,
                done: None,
                lock: None,
                fresh,
            }),
        }
    }

    /// Worker: rotate the just-written fill buffer into the done slot and
    /// pick a new fill target that the consumer is not holding.
    pub fn publish(&self) {
        let mut st = self.lock_state();
        let written = st.fill;
        st.done = Some(written);
        st.fresh += 1;
        // lowest-numbered buffer that is neither just finished nor locked
        for i in 0..self.bufs.len() {
            if i != written && Some(i) != st.lock {
                st.fill = i;
                break;
            }
        }
        debug_assert!(Some(st.fill) != st.lock);
    }

    /// Current freshness counter.
    pub fn fresh(&self) -> i32 {
        self.lock_state().fresh
    }

    /// Consumer: claim the done buffer. Returns its index, or `None` when
    /// no unseen frame is pending.
    pub fn try_consume(&self) -> Option<usize> {
        let mut st = self.lock_state();
        if st.fresh <= 0 {
            return None;
        }
        st.lock = st.done;
        st.fresh = 0;
        debug_assert!(Some(st.fill) != st.lock);
        st.lock
    }

    /// Exclusive access to the fill buffer.
    ///
    /// # Safety
    /// Only the acquisition worker may call this, and the slice must be
    /// dropped before the next [`publish`](Self::publish).
    pub unsafe fn fill_mut(&self) -> &mut [u16] {
        let idx = self.lock_state().fill;
        unsafe { (*self.bufs[idx].get()).as_mut_slice() }
    }

    /// Read a buffer by index.
    ///
    /// # Safety
    /// `idx` must have come from [`try_consume`](Self::try_consume) and no
    /// newer consume may have happened since; only the lock role shields a
    /// buffer from worker writes.
    pub unsafe fn read(&self, idx: usize) -> &[u16] {
        unsafe { (*self.bufs[idx].get()).as_slice() }
    }

    fn lock_state(&self) -> MutexGuard<'_, Roles> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn roles(&self) -> (usize, Option<usize>, Option<usize>) {
        let st = self.lock_state();
        (st.fill, st.done, st.lock)
    }
}
