//! Cooperative, delta-cycle-deterministic scheduler and bounded FIFOs for
//! clocked hardware simulation.
//!
//! This crate provides the only concurrency primitive the rest of the fabric
//! needs: a single-threaded [`Kernel`] that drives `async` tasks through
//! integer clock cycles, and a single-producer/single-consumer [`Fifo`] that
//! blocks on a full write or an empty read. There is no multithreading and no
//! general-purpose mutex — cooperative scheduling plus single-writer/
//! single-reader FIFOs are sufficient for modeling one clocked hardware
//! block driving another.

mod event;
mod fifo;
mod kernel;

pub use event::Event;
pub use fifo::Fifo;
pub use kernel::{BlockedTask, Kernel, RunReport, TaskId};
