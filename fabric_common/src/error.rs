//! Error taxonomy for the compute-fabric simulator.
//!
//! Three kinds: [`FabricError::ConfigInvalid`] and [`FabricError::PortUnbound`]
//! are raised before a single cycle elapses and are always fatal to the run
//! that triggered them. [`FabricError::Deadlock`] is raised by the kernel
//! mid-run and is a reported test failure, not an internal error.

use thiserror::Error;

/// Errors raised while configuring or running the compute fabric.
#[derive(Debug, Clone, Error)]
pub enum FabricError {
    /// A routing matrix violated [`crate::MulticastConfig::valid`], or a PE
    /// kernel dimension was zero, or a dimension exceeded
    /// [`crate::MAX_KERNEL_EXTENT`] / [`crate::MAX_FIFO_DEPTH`].
    #[error("{module}: invalid configuration: {reason}")]
    ConfigInvalid {
        /// Name of the module whose `set_config` rejected the value.
        module: String,
        /// Human-readable reason, included in the diagnostic.
        reason: String,
    },

    /// A module's FIFO port was never connected before the run started.
    #[error("{module}: port '{port}' was never bound before the run started")]
    PortUnbound {
        /// Name of the module with the unbound port.
        module: String,
        /// Name of the unbound port.
        port: String,
    },

    /// The kernel reached a step where no task was runnable and no future
    /// cycle had anything scheduled, while live tasks remained blocked on
    /// FIFOs with no producer.
    #[error(
        "deadlock at cycle {cycle}: {} task(s) blocked with no pending progress: {}",
        .blocked.len(),
        .blocked.join(", ")
    )]
    Deadlock {
        /// The cycle at which the kernel gave up waiting for progress.
        cycle: u64,
        /// Names of the tasks that were alive but unable to proceed.
        blocked: Vec<String>,
    },
}
