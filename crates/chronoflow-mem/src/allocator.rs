//! Allocator + RAII reservation.
//!
//! Reservations release their bytes on Drop, so a failed or abandoned query
//! returns everything it held. A failed grow leaves the reservation at its
//! previous size.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

struct Inner {
    limit: usize,
    reserved: AtomicUsize,
    max_reserved: AtomicUsize,
}

impl Inner {
    fn try_acquire(&self, bytes: usize) -> bool {
        loop {
            let cur = self.reserved.load(Ordering::Relaxed);
            let next = cur.saturating_add(bytes);
            if next > self.limit {
                return false;
            }
            if self
                .reserved
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.record_peak(next);
                return true;
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.reserved.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn record_peak(&self, used: usize) {
        let mut cur = self.max_reserved.load(Ordering::Relaxed);
        while used > cur {
            match self
                .max_reserved
                .compare_exchange(cur, used, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(reserved = used, limit = self.limit, "allocator peak");
                    break;
                }
                Err(observed) => cur = observed,
            }
        }
    }
}

/// Shared byte budget. Cloning shares the same counters.
#[derive(Clone)]
pub struct Allocator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("limit", &self.limit())
            .field("reserved", &self.reserved())
            .field("max_reserved", &self.max_reserved())
            .finish()
    }
}

impl Allocator {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                limit,
                reserved: AtomicUsize::new(0),
                max_reserved: AtomicUsize::new(0),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn reserved(&self) -> usize {
        self.inner.reserved.load(Ordering::Relaxed)
    }

    /// High-water mark of `reserved`.
    pub fn max_reserved(&self) -> usize {
        self.inner.max_reserved.load(Ordering::Relaxed)
    }

    /// Reserve `bytes` up front.
    pub fn reserve(&self, bytes: usize, tag: &'static str) -> Result<Reservation> {
        let mut r = self.empty(tag);
        r.resize(bytes)?;
        Ok(r)
    }

    /// A zero-byte reservation that can grow later.
    pub fn empty(&self, tag: &'static str) -> Reservation {
        Reservation {
            inner: Arc::clone(&self.inner),
            bytes: 0,
            tag,
        }
    }
}

/// Bytes held against an [`Allocator`]; released on Drop.
pub struct Reservation {
    inner: Arc<Inner>,
    bytes: usize,
    tag: &'static str,
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("bytes", &self.bytes)
            .field("tag", &self.tag)
            .finish()
    }
}

impl Reservation {
    /// Grow or shrink to `new_bytes`. Shrinking always succeeds.
    pub fn try_resize(&mut self, new_bytes: usize) -> bool {
        if new_bytes <= self.bytes {
            self.inner.release(self.bytes - new_bytes);
            self.bytes = new_bytes;
            return true;
        }
        if self.inner.try_acquire(new_bytes - self.bytes) {
            self.bytes = new_bytes;
            true
        } else {
            false
        }
    }

    /// Like [`try_resize`](Self::try_resize) but reports the failure.
    pub fn resize(&mut self, new_bytes: usize) -> Result<()> {
        if self.try_resize(new_bytes) {
            return Ok(());
        }
        Err(Error::BudgetExceeded {
            tag: self.tag,
            requested: new_bytes - self.bytes,
            limit: self.inner.limit,
            reserved: self.inner.reserved.load(Ordering::Relaxed),
        })
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// A second reservation against the same allocator.
    pub fn sibling(&self, tag: &'static str) -> Reservation {
        Reservation {
            inner: Arc::clone(&self.inner),
            bytes: 0,
            tag,
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.inner.release(self.bytes);
            self.bytes = 0;
        }
    }
}
