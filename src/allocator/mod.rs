//! The allocator module provides the transient-memory machinery for
//! submissions.
//!
//! # Block pool
//! A [`BlockPool`](crate::pool::BlockPool) is a shared pool of reusable byte
//! blocks. All queues of a device typically share one pool.
//! # Arena
//! An [`Arena`](arena::Arena) is a linear allocator over pooled blocks that
//! owns the transient memory of a single submission. It is created when a
//! batch is submitted and torn down by the batch's retire command, which
//! returns every block to the pool. For more information check the [`arena`]
//! module documentation.

pub mod arena;
