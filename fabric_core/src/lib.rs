//! Routing, computation and cluster composition for the row-stationary
//! compute fabric, built on top of [`fabric_kernel`]'s cooperative
//! cycle-driven scheduler.

mod cluster;
mod direction;
mod pe;
mod router;
pub mod types;

pub use cluster::{ClusterConfig, PeCluster};
pub use direction::Direction;
pub use pe::ProcessingElement;
pub use router::Router;
