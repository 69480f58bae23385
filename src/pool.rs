//! The block pool backing submission arenas.
//!
//! Submission arenas draw byte blocks from a shared [`BlockPool`] and hand
//! them back when their submission retires. The pool keeps freed blocks
//! around, bucketed by size class, so steady-state submission traffic stops
//! allocating entirely. Checked-out blocks travel as [`PooledBlock`] handles
//! that return themselves to the pool on drop, which keeps the release
//! bookkeeping out of the submission path: tearing down an arena is just
//! dropping it.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use multimap::MultiMap;

use crate::Error;

/// A reusable byte block. Blocks keep whatever contents their previous user
/// left behind; arenas treat freshly checked-out blocks as uninitialized.
pub struct Block {
    storage: Box<[u8]>,
}

impl Block {
    fn new(size: usize) -> Self {
        Self {
            storage: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Capacity of this block in bytes.
    pub fn size(&self) -> usize {
        self.storage.len()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.storage
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }
}

struct PoolShared {
    /// Freed blocks, bucketed by size class.
    free: Mutex<MultiMap<usize, Block>>,
    /// Number of blocks currently checked out by arenas.
    outstanding: AtomicUsize,
}

/// Shared pool of reusable byte blocks backing submission arenas. Can safely
/// be shared everywhere; cloning hands out another reference to the same
/// pool.
///
/// Blocks are bucketed by size class — multiples of the pool's block size —
/// so oversized allocations are recycled for later oversized requests
/// instead of polluting the default class. An optional limit bounds the
/// number of blocks checked out at once; exceeding it fails submissions with
/// [`Error::ResourceExhausted`] rather than growing without bound.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct BlockPool {
    #[derivative(Debug = "ignore")]
    shared: Arc<PoolShared>,
    block_size: usize,
    limit: Option<usize>,
}

impl BlockPool {
    /// Create a block pool handing out blocks of at least `block_size` bytes,
    /// with no limit on the number of outstanding blocks.
    pub fn new(block_size: usize) -> Self {
        Self::with_limit(block_size, None)
    }

    /// Create a block pool with a limit on the number of blocks that may be
    /// checked out at once.
    pub fn with_limit(block_size: usize, limit: Option<usize>) -> Self {
        assert!(block_size > 0, "block size must be nonzero");
        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(MultiMap::new()),
                outstanding: AtomicUsize::new(0),
            }),
            block_size,
            limit,
        }
    }

    /// Minimum size of blocks handed out by this pool.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks currently checked out by live arenas. Returns to
    /// zero once every in-flight submission has retired.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Check out a block of at least `min_size` bytes, reusing a freed block
    /// of the same size class when one is available.
    pub(crate) fn acquire(&self, min_size: usize) -> Result<PooledBlock, Error> {
        // Size classes are multiples of the pool's block size.
        let size = if min_size <= self.block_size {
            self.block_size
        } else {
            min_size.div_ceil(self.block_size) * self.block_size
        };
        if let Some(limit) = self.limit {
            if self.shared.outstanding.load(Ordering::Acquire) >= limit {
                return Err(Error::ResourceExhausted("block pool limit reached"));
            }
        }
        let recycled = self.shared.free.lock()?.get_vec_mut(&size).and_then(Vec::pop);
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(PooledBlock {
            block: Some(recycled.unwrap_or_else(|| Block::new(size))),
            pool: self.clone(),
        })
    }

    /// Return a block to its size-class bucket.
    fn release(&self, block: Block) {
        self.shared.outstanding.fetch_sub(1, Ordering::AcqRel);
        if let Ok(mut free) = self.shared.free.lock() {
            free.insert(block.size(), block);
        }
    }
}

/// A block checked out of a [`BlockPool`]. When this is dropped, the block
/// returns to its pool's free list where it can be reused immediately.
pub struct PooledBlock {
    block: Option<Block>,
    pool: BlockPool,
}

impl Deref for PooledBlock {
    type Target = Block;

    fn deref(&self) -> &Self::Target {
        self.block.as_ref().unwrap()
    }
}

impl DerefMut for PooledBlock {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.block.as_mut().unwrap()
    }
}

impl Drop for PooledBlock {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            self.pool.release(block);
        }
    }
}
