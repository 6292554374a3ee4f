//! Append-sequence bookkeeping for a single keygroup.
//!
//! Append-only keygroups hand out strictly increasing, unique item ids.
//! Rather than durably persisting every allocated id, a keygroup reserves a
//! window of `RESERVATION` ids at a time, durably records only the window's
//! high-water mark, and serves ids out of the window lock-free via an
//! `AtomicU64`. On restart the next reservation starts past the persisted
//! mark, so a crash can skip ids but never reuse one.

use crate::error::CResult;
use std::sync::atomic::{AtomicU64, Ordering};

/// Width of a single durable reservation window.
pub const RESERVATION: u64 = 100;

/// In-memory sequence counter for one keygroup's append stream.
///
/// `next` is the next id to hand out; `reserved` is the exclusive upper
/// bound of the currently reserved window. When `next` would reach
/// `reserved`, the caller must persist a new high-water mark before minting
/// further ids -- see `KvStore::reserve_next`.
pub struct Sequence {
    next: AtomicU64,
    reserved: AtomicU64,
}

impl Sequence {
    /// Creates a sequence whose first id will be `start`, with no
    /// reservation yet taken.
    pub fn new(start: u64) -> Self {
        Sequence { next: AtomicU64::new(start), reserved: AtomicU64::new(start) }
    }

    /// Creates a sequence whose next id is `start`, already reserved up to
    /// (but excluding) `reserved`. Used when the durable mark is already
    /// known, e.g. right after `CreateKeygroup` persists its initial
    /// reservation.
    pub fn with_reservation(start: u64, reserved: u64) -> Self {
        Sequence { next: AtomicU64::new(start), reserved: AtomicU64::new(reserved) }
    }

    /// Advances the sequence so that its next id is strictly greater than
    /// `id`, persisting a new mark if necessary. A no-op if the sequence is
    /// already past `id`. Used by `Update(append=true)` to preserve I2 when
    /// a replicated write carries an externally pre-computed id.
    pub fn advance_past(&self, id: u64, persist_mark: impl FnOnce(u64) -> CResult<()>) -> CResult<()> {
        let target = id + 1;
        let reserved = self.reserved.load(Ordering::SeqCst);
        if target <= reserved {
            self.next.fetch_max(target, Ordering::SeqCst);
            return Ok(());
        }

        let new_mark = reserved.max(target).div_ceil(RESERVATION) * RESERVATION;
        persist_mark(new_mark)?;
        self.reserved.fetch_max(new_mark, Ordering::SeqCst);
        self.next.fetch_max(target, Ordering::SeqCst);
        Ok(())
    }

    /// Returns the next id in the sequence, reserving a new window via
    /// `persist_mark` if the current one is exhausted. `persist_mark` is
    /// called with the proposed new high-water mark and must durably store
    /// it before returning `Ok`.
    pub fn next(&self, persist_mark: impl FnOnce(u64) -> CResult<()>) -> CResult<u64> {
        loop {
            let id = self.next.load(Ordering::SeqCst);
            let reserved = self.reserved.load(Ordering::SeqCst);
            if id < reserved {
                if self
                    .next
                    .compare_exchange(id, id + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return Ok(id);
                }
                continue;
            }

            let new_mark = reserved + RESERVATION;
            persist_mark(new_mark)?;
            // Another thread may have already advanced `reserved` while we
            // were persisting; only move it forward, never back.
            let _ = self.reserved.compare_exchange(
                reserved,
                new_mark,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }

    /// The next id that would be handed out without taking a new
    /// reservation window, for diagnostics.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}
