//! A linear allocator that owns the transient memory of one submission.
//!
//! The allocator works by linearly incrementing an offset on every allocation.
//! Individual allocations cannot be freed; all memory is reclaimed at once
//! when the arena is dropped, which returns its blocks to the shared
//! [`BlockPool`]. Because the retire command of a submission holds the last
//! handle to the submission's arena, the memory of a batch is recycled exactly
//! when the batch has fully completed.
//!
//! # Example
//! ```
//! # use deimos::prelude::*;
//! # fn main() -> Result<(), Error> {
//! let pool = BlockPool::new(1024);
//! let mut arena = Arena::new(&pool)?;
//! let view = arena.allocate(128)?;
//! arena.slice_mut(&view).fill(0xAB);
//! assert_eq!(arena.slice(&view)[0], 0xAB);
//! // Dropping the arena returns its blocks to the pool.
//! drop(arena);
//! assert_eq!(pool.outstanding(), 0);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};

use crate::pool::{BlockPool, PooledBlock};
use crate::Error;

/// Offset view into a submission arena, handed out by [`Arena::allocate`].
/// A view is only meaningful for the arena that allocated it.
#[derive(Debug, Copy, Clone)]
pub struct ArenaView {
    block: usize,
    offset: usize,
    size: usize,
}

impl ArenaView {
    /// Size of the viewed range in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// A linear allocator used for the short-lived resources of one submission:
/// staged command parameters, binding tables, and any other scratch data that
/// must stay valid until the batch retires.
///
/// Allocations are bumped along pooled blocks; an allocation that does not fit
/// the current block grabs a new one from the pool, growing the size class
/// when a single allocation exceeds it (so arbitrarily large scratch data
/// still works, it just gets a dedicated block).
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Arena {
    #[derivative(Debug = "ignore")]
    pool: BlockPool,
    #[derivative(Debug = "ignore")]
    blocks: Vec<PooledBlock>,
    local_offset: usize,
    alignment: usize,
}

impl Arena {
    /// Create a new arena drawing blocks from `pool`. Default alignment is 16.
    pub fn new(pool: &BlockPool) -> Result<Self, Error> {
        Self::new_with_alignment(pool, 16)
    }

    /// Create a new arena with the given allocation alignment.
    /// # Errors
    /// * Fails if the pool's block size is not a multiple of the alignment value
    /// * Fails if the pool cannot provide the first block
    pub fn new_with_alignment(pool: &BlockPool, alignment: usize) -> Result<Self, Error> {
        if pool.block_size() % alignment != 0 {
            return Err(Error::Uncategorized(
                "block size must be a multiple of alignment",
            ));
        }
        let first = pool.acquire(pool.block_size())?;
        Ok(Self {
            pool: pool.clone(),
            blocks: vec![first],
            local_offset: 0,
            alignment,
        })
    }

    /// Allocate at least `size` bytes from the arena. The actual amount
    /// reserved may be slightly more to satisfy alignment requirements.
    /// # Errors
    /// * Fails if the block pool is exhausted.
    pub fn allocate(&mut self, size: usize) -> Result<ArenaView, Error> {
        let padded = size.div_ceil(self.alignment) * self.alignment;

        // Invariant: the arena always holds at least one block.
        let current = self.blocks.last().unwrap();
        if self.local_offset + padded <= current.size() {
            let view = ArenaView {
                block: self.blocks.len() - 1,
                offset: self.local_offset,
                size,
            };
            self.local_offset += padded;
            Ok(view)
        } else {
            let block = self.pool.acquire(padded)?;
            let view = ArenaView {
                block: self.blocks.len(),
                offset: 0,
                size,
            };
            self.local_offset = padded;
            self.blocks.push(block);
            Ok(view)
        }
    }

    /// Read access to an allocated range. The view must come from this arena.
    pub fn slice(&self, view: &ArenaView) -> &[u8] {
        &self.blocks[view.block].bytes()[view.offset..view.offset + view.size]
    }

    /// Write access to an allocated range. The view must come from this arena.
    pub fn slice_mut(&mut self, view: &ArenaView) -> &mut [u8] {
        &mut self.blocks[view.block].bytes_mut()[view.offset..view.offset + view.size]
    }
}

/// Shared handle to the arena owned by one submission's retire command.
///
/// The queue's issue phase and command-buffer leaf tasks stage transient data
/// through this handle; the data stays valid until the batch retires, at which
/// point the retire command drops the last handle and the backing blocks
/// return to the pool.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct SubmissionArena {
    #[derivative(Debug = "ignore")]
    inner: Arc<Mutex<Arena>>,
}

impl SubmissionArena {
    pub(crate) fn new(arena: Arena) -> Self {
        Self {
            inner: Arc::new(Mutex::new(arena)),
        }
    }

    /// Allocate a range of scratch memory from the submission's arena.
    pub fn allocate(&self, size: usize) -> Result<ArenaView, Error> {
        self.inner.lock()?.allocate(size)
    }

    /// Stage bytes into the arena and return a view over them.
    pub fn stage(&self, bytes: &[u8]) -> Result<ArenaView, Error> {
        let mut arena = self.inner.lock()?;
        let view = arena.allocate(bytes.len())?;
        arena.slice_mut(&view).copy_from_slice(bytes);
        Ok(view)
    }

    /// Run `f` with read access to an allocated range.
    pub fn with_slice<R>(&self, view: &ArenaView, f: impl FnOnce(&[u8]) -> R) -> Result<R, Error> {
        let arena = self.inner.lock()?;
        Ok(f(arena.slice(view)))
    }

    /// Run `f` with write access to an allocated range.
    pub fn with_slice_mut<R>(
        &self,
        view: &ArenaView,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, Error> {
        let mut arena = self.inner.lock()?;
        Ok(f(arena.slice_mut(view)))
    }
}
