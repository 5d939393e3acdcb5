//! Frame-scoped bump arena.
//!
//! Allocations are handed out from one contiguous buffer and stay valid
//! until the next [`FrameArena::reset_all`]. Freeing the most recent
//! allocation gives its bytes back immediately; any other free is deferred
//! to the reset.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("arena exhausted: requested {requested} bytes, {remaining} left")]
    Exhausted { requested: usize, remaining: usize },
    #[error("allocation from epoch {allocation} used in epoch {current}")]
    Stale { allocation: u64, current: u64 },
    #[error("freeing {freed} bytes of a {len}-byte allocation")]
    SizeMismatch { len: usize, freed: usize },
}

/// Handle to a region of a [`FrameArena`]. Not `Clone`: freeing consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct Allocation {
    offset: usize,
    len: usize,
    epoch: u64,
}

impl Allocation {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[derive(Debug)]
pub struct FrameArena {
    buffer: Vec<u8>,
    top: usize,
    epoch: u64,
    deferred: usize,
}

impl FrameArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            top: 0,
            epoch: 0,
            deferred: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes held by live or deferred allocations.
    pub fn used(&self) -> usize {
        self.top
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.top
    }

    /// Bytes freed out of order, waiting for the next reset.
    pub fn deferred(&self) -> usize {
        self.deferred
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Reserve `n` zeroed bytes.
    pub fn allocate(&mut self, n: usize) -> Result<Allocation, ArenaError> {
        if n > self.remaining() {
            tracing::warn!(requested = n, remaining = self.remaining(), "scratch arena exhausted");
            return Err(ArenaError::Exhausted {
                requested: n,
                remaining: self.remaining(),
            });
        }
        let offset = self.top;
        self.top += n;
        self.buffer[offset..self.top].fill(0);
        Ok(Allocation {
            offset,
            len: n,
            epoch: self.epoch,
        })
    }

    pub fn bytes(&self, alloc: &Allocation) -> Result<&[u8], ArenaError> {
        self.check(alloc)?;
        Ok(&self.buffer[alloc.offset..alloc.offset + alloc.len])
    }

    pub fn bytes_mut(&mut self, alloc: &Allocation) -> Result<&mut [u8], ArenaError> {
        self.check(alloc)?;
        Ok(&mut self.buffer[alloc.offset..alloc.offset + alloc.len])
    }

    /// Release `n` bytes of `alloc`. Returns `Ok(true)` when the bytes were
    /// reclaimed now and `Ok(false)` when they wait for the next reset.
    pub fn free(&mut self, alloc: Allocation, n: usize) -> Result<bool, ArenaError> {
        self.check(&alloc)?;
        if n != alloc.len {
            return Err(ArenaError::SizeMismatch {
                len: alloc.len,
                freed: n,
            });
        }
        if alloc.offset + alloc.len == self.top {
            self.top = alloc.offset;
            return Ok(true);
        }
        self.deferred += n;
        Ok(false)
    }

    /// Drop every allocation of the current frame. Outstanding handles
    /// become stale. Returns the number of bytes reclaimed.
    pub fn reset_all(&mut self) -> usize {
        let reclaimed = self.top;
        self.top = 0;
        self.deferred = 0;
        self.epoch += 1;
        tracing::trace!(reclaimed, epoch = self.epoch, "scratch arena reset");
        reclaimed
    }

    fn check(&self, alloc: &Allocation) -> Result<(), ArenaError> {
        if alloc.epoch != self.epoch {
            return Err(ArenaError::Stale {
                allocation: alloc.epoch,
                current: self.epoch,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_and_reset() {
        let mut arena = FrameArena::with_capacity(64);
        let a = arena.allocate(16).unwrap();
        let b = arena.allocate(8).unwrap();
        arena.bytes_mut(&a).unwrap().fill(0xAB);
        assert_eq!(arena.bytes(&b).unwrap(), &[0u8; 8]);
        assert_eq!(arena.used(), 24);

        assert_eq!(arena.reset_all(), 24);
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.reset_all(), 0);
    }

    #[test]
    fn lifo_free_reclaims_immediately() {
        let mut arena = FrameArena::with_capacity(32);
        let a = arena.allocate(10).unwrap();
        let b = arena.allocate(6).unwrap();
        assert!(arena.free(b, 6).unwrap());
        assert_eq!(arena.used(), 10);
        assert!(arena.free(a, 10).unwrap());
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn out_of_order_free_is_deferred() {
        let mut arena = FrameArena::with_capacity(32);
        let a = arena.allocate(10).unwrap();
        let _b = arena.allocate(6).unwrap();
        assert!(!arena.free(a, 10).unwrap());
        assert_eq!(arena.used(), 16);
        assert_eq!(arena.deferred(), 10);
        assert_eq!(arena.reset_all(), 16);
        assert_eq!(arena.deferred(), 0);
    }

    #[test]
    fn reused_bytes_are_zeroed() {
        let mut arena = FrameArena::with_capacity(8);
        let a = arena.allocate(4).unwrap();
        arena.bytes_mut(&a).unwrap().fill(9);
        arena.free(a, 4).unwrap();
        let b = arena.allocate(4).unwrap();
        assert_eq!(arena.bytes(&b).unwrap(), &[0u8; 4]);
    }

    #[test]
    fn exhaustion() {
        let mut arena = FrameArena::with_capacity(8);
        arena.allocate(6).unwrap();
        assert_eq!(
            arena.allocate(3),
            Err(ArenaError::Exhausted {
                requested: 3,
                remaining: 2
            })
        );
        assert!(arena.allocate(2).is_ok());
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut arena = FrameArena::with_capacity(8);
        let a = arena.allocate(4).unwrap();
        arena.reset_all();
        assert_eq!(
            arena.bytes(&a),
            Err(ArenaError::Stale {
                allocation: 0,
                current: 1
            })
        );
        assert!(arena.free(a, 4).is_err());
    }

    #[test]
    fn free_size_must_match() {
        let mut arena = FrameArena::with_capacity(8);
        let a = arena.allocate(4).unwrap();
        assert_eq!(arena.free(a, 3), Err(ArenaError::SizeMismatch { len: 4, freed: 3 }));
    }
}
