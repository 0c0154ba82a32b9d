//! The PE cluster: a grid of [`ProcessingElement`]s wired for row-stationary
//! convolution, plus the bank/row routing tasks that multicast activations
//! and weights into it.
//!
//! Activations are broadcast per bank across the whole grid; weights are
//! broadcast per row across that row's columns; partial sums are propagated
//! systolically upward along each column. Unlike the activation routing
//! fifos, which are sized one per `(row, col)` pair regardless of how many
//! activation banks exist, `IActBanks` is purely the *source* dimension of
//! `iact_propagation` — it need not equal `PERows`.

use std::cell::RefCell;
use std::ops::{AddAssign, Mul};
use std::rc::Rc;

use fabric_common::{FabricError, MulticastConfig, PeConfig};
use fabric_kernel::{Fifo, Kernel};
use tracing::info;

use crate::pe::ProcessingElement;

/// Routing configuration for a [`PeCluster`]: the activation fanout matrix,
/// one weight fanout matrix per PE row, and the PE geometry shared by every
/// cell (with `psum_acc_in` recomputed per row on install).
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub iact_propagation: MulticastConfig,
    pub weight_propagation: Vec<MulticastConfig>,
    pub pe_config: PeConfig,
}

/// A `PERows` x `PECols` grid of PEs fed by `IActBanks` activation banks.
pub struct PeCluster<T, Acc> {
    name: String,
    kernel: Kernel,
    pe_rows: usize,
    pe_cols: usize,
    iact_banks: usize,
    grid: Vec<Vec<ProcessingElement<T, Acc>>>,
    iact_fifos: Vec<Vec<Fifo<T>>>,
    weight_fifos: Vec<Vec<Fifo<T>>>,
    iact_in: Vec<Fifo<T>>,
    weight_in: Vec<Fifo<T>>,
    cfg: Rc<RefCell<Option<ClusterConfig>>>,
    spawned: Rc<RefCell<bool>>,
}

impl<T, Acc> PeCluster<T, Acc>
where
    T: Copy + Mul<Output = T> + 'static,
    Acc: Copy + Default + AddAssign + From<T> + 'static,
{
    /// Construct a cluster bound to its external FIFOs. No tasks run yet —
    /// call [`PeCluster::set_config`] first.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kernel: &Kernel,
        name: impl Into<String>,
        pe_rows: usize,
        pe_cols: usize,
        iact_banks: usize,
        iact_in: Vec<Fifo<T>>,
        weight_in: Vec<Fifo<T>>,
        psum_in: Vec<Fifo<Acc>>,
        psum_out: Vec<Fifo<Acc>>,
    ) -> Self {
        assert_eq!(iact_in.len(), iact_banks, "one iact FIFO per bank");
        assert_eq!(weight_in.len(), pe_rows, "one weight FIFO per PE row");
        assert_eq!(psum_in.len(), pe_cols, "one psum-in FIFO per PE column");
        assert_eq!(psum_out.len(), pe_cols, "one psum-out FIFO per PE column");

        let name = name.into();

        let iact_fifos: Vec<Vec<Fifo<T>>> = (0..pe_rows)
            .map(|row| {
                (0..pe_cols)
                    .map(|col| Fifo::new(format!("{name}::iact_{row}_{col}"), 1))
                    .collect()
            })
            .collect();
        let weight_fifos: Vec<Vec<Fifo<T>>> = (0..pe_rows)
            .map(|row| {
                (0..pe_cols)
                    .map(|col| Fifo::new(format!("{name}::weight_{row}_{col}"), 1))
                    .collect()
            })
            .collect();
        // One fewer row than the grid: the bottom row's output is the top
        // of the next pair down, there is nothing below the last row.
        let psum_fifos: Vec<Vec<Fifo<Acc>>> = (0..pe_rows.saturating_sub(1))
            .map(|row| {
                (0..pe_cols)
                    .map(|col| Fifo::new(format!("{name}::psum_{row}_{col}"), 1))
                    .collect()
            })
            .collect();

        // Built bottom row first, since each PE's psum_in wiring depends on
        // the row below it already existing.
        let mut grid: Vec<Vec<Option<ProcessingElement<T, Acc>>>> = (0..pe_rows)
            .map(|_| (0..pe_cols).map(|_| None).collect())
            .collect();

        for row in (0..pe_rows).rev() {
            for col in 0..pe_cols {
                let pe_name = format!("{name}::pe_{row}_{col}");
                let psum_in_port = if row < pe_rows - 1 {
                    psum_fifos[row][col].clone()
                } else {
                    psum_in[col].clone()
                };
                let psum_out_port = if row > 0 {
                    psum_fifos[row - 1][col].clone()
                } else {
                    psum_out[col].clone()
                };
                grid[row][col] = Some(ProcessingElement::new(
                    kernel,
                    pe_name,
                    iact_fifos[row][col].clone(),
                    weight_fifos[row][col].clone(),
                    psum_in_port,
                    psum_out_port,
                ));
            }
        }

        let grid = grid
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| cell.expect("every grid cell built above"))
                    .collect()
            })
            .collect();

        Self {
            name,
            kernel: kernel.clone(),
            pe_rows,
            pe_cols,
            iact_banks,
            grid,
            iact_fifos,
            weight_fifos,
            iact_in,
            weight_in,
            cfg: Rc::new(RefCell::new(None)),
            spawned: Rc::new(RefCell::new(false)),
        }
    }

    /// Validate every sub-matrix and the shared PE geometry, install
    /// `psum_acc_in = row < kernel_h - 1` on each PE, and — on the first
    /// call — spawn the bank and row routing tasks.
    pub fn set_config(&self, new_cfg: ClusterConfig) -> Result<(), FabricError> {
        let expected_dsts = self.pe_rows * self.pe_cols;
        if new_cfg.iact_propagation.srcs() != self.iact_banks
            || new_cfg.iact_propagation.dsts() != expected_dsts
        {
            return Err(FabricError::ConfigInvalid {
                module: self.name.clone(),
                reason: format!(
                    "iact propagation matrix must be {}x{}, got {}x{}",
                    self.iact_banks,
                    expected_dsts,
                    new_cfg.iact_propagation.srcs(),
                    new_cfg.iact_propagation.dsts()
                ),
            });
        }
        new_cfg
            .iact_propagation
            .validate(&format!("{}::iact_propagation", self.name))?;

        if new_cfg.weight_propagation.len() != self.pe_rows {
            return Err(FabricError::ConfigInvalid {
                module: self.name.clone(),
                reason: format!(
                    "expected {} weight propagation rows, got {}",
                    self.pe_rows,
                    new_cfg.weight_propagation.len()
                ),
            });
        }
        for (row, wcfg) in new_cfg.weight_propagation.iter().enumerate() {
            if wcfg.srcs() != 1 || wcfg.dsts() != self.pe_cols {
                return Err(FabricError::ConfigInvalid {
                    module: self.name.clone(),
                    reason: format!(
                        "weight_propagation[{row}] must be 1x{}, got {}x{}",
                        self.pe_cols,
                        wcfg.srcs(),
                        wcfg.dsts()
                    ),
                });
            }
            wcfg.validate(&format!("{}::weight_propagation[{row}]", self.name))?;
        }

        new_cfg.pe_config.validate(&self.name)?;

        info!(module = self.name.as_str(), "installing iact multicast configuration");
        new_cfg.iact_propagation.log_matrix(&format!("{}::iact_propagation", self.name));
        info!(module = self.name.as_str(), "installing weight multicast configuration");
        for (row, wcfg) in new_cfg.weight_propagation.iter().enumerate() {
            wcfg.log_matrix(&format!("{}::weight_propagation[{row}]", self.name));
        }

        info!(module = self.name.as_str(), "installing PE configuration");
        for row in 0..self.pe_rows {
            for col in 0..self.pe_cols {
                let mut pe_cfg = new_cfg.pe_config;
                pe_cfg.psum_acc_in = row < new_cfg.pe_config.kernel_h - 1;
                self.grid[row][col].set_config(pe_cfg)?;
            }
        }

        *self.cfg.borrow_mut() = Some(new_cfg);

        if !*self.spawned.borrow() {
            self.spawn_routing();
            *self.spawned.borrow_mut() = true;
        }
        Ok(())
    }

    fn spawn_routing(&self) {
        for bank in 0..self.iact_banks {
            let kernel = self.kernel.clone();
            let in_port = self.iact_in[bank].clone();
            let iact_fifos = self.iact_fifos.clone();
            let cfg = Rc::clone(&self.cfg);
            let pe_cols = self.pe_cols;
            let total = self.pe_rows * self.pe_cols;
            let name = format!("{}::iact_thread_{bank}", self.name);

            self.kernel.spawn(name, async move {
                loop {
                    let token = in_port.read().await;
                    kernel.wait(1).await;
                    for p in 0..total {
                        let routed = cfg
                            .borrow()
                            .as_ref()
                            .expect("cluster configured before routing runs")
                            .iact_propagation
                            .path(bank, p);
                        if routed {
                            iact_fifos[p / pe_cols][p % pe_cols].write(token).await;
                        }
                    }
                }
            });
        }

        for row in 0..self.pe_rows {
            let kernel = self.kernel.clone();
            let in_port = self.weight_in[row].clone();
            let weight_fifos_row = self.weight_fifos[row].clone();
            let cfg = Rc::clone(&self.cfg);
            let name = format!("{}::weight_thread_{row}", self.name);

            self.kernel.spawn(name, async move {
                loop {
                    let token = in_port.read().await;
                    kernel.wait(1).await;
                    for (col, fifo) in weight_fifos_row.iter().enumerate() {
                        let routed = cfg
                            .borrow()
                            .as_ref()
                            .expect("cluster configured before routing runs")
                            .weight_propagation[row]
                            .path(0, col);
                        if routed {
                            fifo.write(token).await;
                        }
                    }
                }
            });
        }
    }
}
