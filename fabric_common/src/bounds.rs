//! Compile-time capacity bounds for the `heapless` backing stores used in
//! a processing element (PE sliding window, weight cache). `MAX_FIFO_DEPTH`
//! is advisory only: kernel FIFOs are backed by a plain `VecDeque`, not a
//! `heapless` container, and only `debug_assert!` against this bound.
//!
//! Neither bound is required for correctness — a PE only needs
//! `kernel_w > 0` / `kernel_h > 0` and a FIFO only needs `capacity >= 1`.
//! They exist purely so the fixed-capacity collections have a `const`
//! upper bound to size themselves against.

use static_assertions::const_assert;

/// Largest `kernel_w` / `kernel_h` a [`crate::PeConfig`] may request.
///
/// Bounds the `heapless::Vec` weight cache and sliding window inside a
/// processing element.
pub const MAX_KERNEL_EXTENT: usize = 32;

/// Largest capacity any single [`fabric_kernel`](../fabric_kernel) FIFO may
/// be constructed with.
pub const MAX_FIFO_DEPTH: usize = 64;

const_assert!(MAX_KERNEL_EXTENT <= MAX_FIFO_DEPTH * 2);
const_assert!(MAX_KERNEL_EXTENT > 0);
const_assert!(MAX_FIFO_DEPTH > 0);
