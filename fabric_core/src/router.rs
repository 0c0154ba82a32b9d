//! The 6-port multicast router.
//!
//! One independent task per input port: a stall on one output only stalls
//! the source port whose fanout targets that output, because each port's
//! control flow is its own task. Fanout within a port's forward loop writes
//! to enabled destinations in [`Direction::ALL`] order.

use std::cell::RefCell;
use std::rc::Rc;

use fabric_common::{FabricError, MulticastConfig};
use fabric_kernel::{Fifo, Kernel};
use tracing::info;

use crate::direction::Direction;

/// A 6-port (N, E, S, W, GLB, PE) multicast switch for tokens of type `T`.
pub struct Router<T> {
    name: String,
    kernel: Kernel,
    in_ports: [Fifo<T>; Direction::COUNT],
    out_ports: [Fifo<T>; Direction::COUNT],
    cfg: Rc<RefCell<MulticastConfig>>,
    spawned: Rc<RefCell<bool>>,
}

impl<T: Clone + 'static> Router<T> {
    /// Construct a router bound to its six input and six output FIFOs. No
    /// tasks run yet — call [`Router::set_config`] first.
    pub fn new(
        kernel: &Kernel,
        name: impl Into<String>,
        in_ports: [Fifo<T>; Direction::COUNT],
        out_ports: [Fifo<T>; Direction::COUNT],
    ) -> Self {
        Self {
            name: name.into(),
            kernel: kernel.clone(),
            in_ports,
            out_ports,
            cfg: Rc::new(RefCell::new(MulticastConfig::new(
                Direction::COUNT,
                Direction::COUNT,
            ))),
            spawned: Rc::new(RefCell::new(false)),
        }
    }

    /// Validate and install `new_cfg`. On the first call this also spawns
    /// the six per-port forwarding tasks; later calls (still before traffic
    /// starts — reconfiguration mid-run is a contract violation the kernel
    /// does not detect) simply replace the shared matrix in place, which is
    /// why calling `set_config` twice with the same valid matrix before any
    /// cycle elapses is idempotent.
    pub fn set_config(&self, new_cfg: MulticastConfig) -> Result<(), FabricError> {
        if new_cfg.srcs() != Direction::COUNT || new_cfg.dsts() != Direction::COUNT {
            return Err(FabricError::ConfigInvalid {
                module: self.name.clone(),
                reason: format!(
                    "router matrix must be {n}x{n}, got {}x{}",
                    new_cfg.srcs(),
                    new_cfg.dsts(),
                    n = Direction::COUNT
                ),
            });
        }
        new_cfg.validate(&self.name)?;

        info!(module = self.name.as_str(), "installing router configuration");
        new_cfg.log_matrix(&self.name);
        *self.cfg.borrow_mut() = new_cfg;

        if !*self.spawned.borrow() {
            self.spawn_ports();
            *self.spawned.borrow_mut() = true;
        }
        Ok(())
    }

    fn spawn_ports(&self) {
        for &src in Direction::ALL.iter() {
            let kernel = self.kernel.clone();
            let name = format!("{}::forward_{:?}", self.name, src);
            let cfg = Rc::clone(&self.cfg);
            let in_port = self.in_ports[src.index()].clone();
            let out_ports = self.out_ports.clone();
            self.kernel.spawn(name, async move {
                loop {
                    let token = in_port.read().await;
                    kernel.wait(1).await;
                    for &dst in Direction::ALL.iter() {
                        if cfg.borrow().path(src.index(), dst.index()) {
                            out_ports[dst.index()].write(token.clone()).await;
                        }
                    }
                }
            });
        }
    }
}
