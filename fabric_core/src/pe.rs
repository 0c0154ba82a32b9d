//! The 3-stage row-stationary Processing Element pipeline.
//!
//! `stage1` turns the incoming activation stream into a sliding window of
//! width `kernel_w`, replaying the `kernel_w - 1` elements it is holding
//! before every freshly read element. `stage2` pairs each replayed
//! activation with its stationary weight, only pulling a new weight for the
//! first `kernel_w` taps of the inner product and reusing the cached row
//! forever after. `stage3` folds a `kernel_w`-wide multiply-accumulate and,
//! on the last tap, optionally adds a partial sum read from upstream in the
//! systolic column before emitting the finished partial sum.

use std::cell::RefCell;
use std::ops::{AddAssign, Mul};
use std::rc::Rc;

use fabric_common::{FabricError, PeConfig, MAX_KERNEL_EXTENT};
use fabric_kernel::{Fifo, Kernel};
use heapless::Vec as HVec;
use tracing::info;

/// A single row-stationary Processing Element.
///
/// `T` is the activation/weight token type; `Acc` is the partial-sum
/// accumulator type (typically wider than `T`, e.g. `T = i32`, `Acc = i64`).
pub struct ProcessingElement<T, Acc> {
    name: String,
    kernel: Kernel,
    iact_in: Fifo<T>,
    weight_in: Fifo<T>,
    psum_in: Fifo<Acc>,
    psum_out: Fifo<Acc>,
    cfg: Rc<RefCell<Option<PeConfig>>>,
    spawned: Rc<RefCell<bool>>,
}

impl<T, Acc> ProcessingElement<T, Acc>
where
    T: Copy + Mul<Output = T> + 'static,
    Acc: Copy + Default + AddAssign + From<T> + 'static,
{
    /// Construct a PE bound to its four external FIFOs. No tasks run yet —
    /// call [`ProcessingElement::set_config`] first.
    pub fn new(
        kernel: &Kernel,
        name: impl Into<String>,
        iact_in: Fifo<T>,
        weight_in: Fifo<T>,
        psum_in: Fifo<Acc>,
        psum_out: Fifo<Acc>,
    ) -> Self {
        Self {
            name: name.into(),
            kernel: kernel.clone(),
            iact_in,
            weight_in,
            psum_in,
            psum_out,
            cfg: Rc::new(RefCell::new(None)),
            spawned: Rc::new(RefCell::new(false)),
        }
    }

    /// Validate and install `new_cfg`. On the first call this also spawns
    /// the three pipeline-stage tasks, which capture `kernel_w` and
    /// `psum_acc_in` at that point; calling `set_config` again with the same
    /// valid configuration before any token moves is a no-op beyond that.
    pub fn set_config(&self, new_cfg: PeConfig) -> Result<(), FabricError> {
        new_cfg.validate(&self.name)?;

        info!(
            module = self.name.as_str(),
            kernel_w = new_cfg.kernel_w,
            kernel_h = new_cfg.kernel_h,
            psum_acc_in = new_cfg.psum_acc_in,
            "installing PE configuration"
        );
        *self.cfg.borrow_mut() = Some(new_cfg);

        if !*self.spawned.borrow() {
            self.spawn_stages();
            *self.spawned.borrow_mut() = true;
        }
        Ok(())
    }

    fn kernel_w(&self) -> usize {
        self.cfg
            .borrow()
            .as_ref()
            .expect("config installed before stages spawn")
            .kernel_w
    }

    fn psum_acc_in(&self) -> bool {
        self.cfg
            .borrow()
            .as_ref()
            .expect("config installed before stages spawn")
            .psum_acc_in
    }

    fn spawn_stages(&self) {
        let fifo_1to2 = Fifo::new(format!("{}::f1to2", self.name), 1);
        let fifo_2to3_act = Fifo::new(format!("{}::f2to3_act", self.name), 1);
        let fifo_2to3_w = Fifo::new(format!("{}::f2to3_w", self.name), 1);

        self.spawn_stage1(fifo_1to2.clone());
        self.spawn_stage2(fifo_1to2, fifo_2to3_act.clone(), fifo_2to3_w.clone());
        self.spawn_stage3(fifo_2to3_act, fifo_2to3_w);
    }

    fn spawn_stage1(&self, fifo_1to2: Fifo<T>) {
        let kernel = self.kernel.clone();
        let iact_in = self.iact_in.clone();
        let kernel_w = self.kernel_w();
        let name = format!("{}::stage1", self.name);

        self.kernel.spawn(name, async move {
            let mut iact_win: HVec<T, MAX_KERNEL_EXTENT> = HVec::new();

            // First `kernel_w` activations prime the sliding window: the
            // last `kernel_w - 1` of them are kept for replay.
            for i in 0..kernel_w {
                let iact = iact_in.read().await;
                kernel.wait(1).await;
                fifo_1to2.write(iact).await;
                if i > 0 {
                    iact_win
                        .push(iact)
                        .unwrap_or_else(|_| unreachable!("kernel_w bounded by MAX_KERNEL_EXTENT"));
                }
            }

            loop {
                for &iact in iact_win.iter() {
                    kernel.wait(1).await;
                    fifo_1to2.write(iact).await;
                }

                let iact = iact_in.read().await;
                kernel.wait(1).await;
                fifo_1to2.write(iact).await;

                if kernel_w > 1 {
                    iact_win.remove(0);
                    iact_win
                        .push(iact)
                        .unwrap_or_else(|_| unreachable!("kernel_w bounded by MAX_KERNEL_EXTENT"));
                }
            }
        });
    }

    fn spawn_stage2(&self, fifo_1to2: Fifo<T>, fifo_2to3_act: Fifo<T>, fifo_2to3_w: Fifo<T>) {
        let kernel = self.kernel.clone();
        let weight_in = self.weight_in.clone();
        let kernel_w = self.kernel_w();
        let name = format!("{}::stage2", self.name);

        self.kernel.spawn(name, async move {
            let mut weight_row: HVec<T, MAX_KERNEL_EXTENT> = HVec::new();
            let mut next_weight_ptr = 0usize;

            loop {
                let iact = fifo_1to2.read().await;

                if weight_row.len() < next_weight_ptr + 1 {
                    let w = weight_in.read().await;
                    weight_row
                        .push(w)
                        .unwrap_or_else(|_| unreachable!("kernel_w bounded by MAX_KERNEL_EXTENT"));
                }
                let w = weight_row[next_weight_ptr];

                kernel.wait(1).await;
                fifo_2to3_act.write(iact).await;
                fifo_2to3_w.write(w).await;

                next_weight_ptr = (next_weight_ptr + 1) % kernel_w;
            }
        });
    }

    fn spawn_stage3(&self, fifo_2to3_act: Fifo<T>, fifo_2to3_w: Fifo<T>) {
        let kernel = self.kernel.clone();
        let psum_in = self.psum_in.clone();
        let psum_out = self.psum_out.clone();
        let kernel_w = self.kernel_w();
        let psum_acc_in = self.psum_acc_in();
        let name = format!("{}::stage3", self.name);

        self.kernel.spawn(name, async move {
            loop {
                let mut local_psum = Acc::default();

                for i in 0..kernel_w {
                    let iact = fifo_2to3_act.read().await;
                    let w = fifo_2to3_w.read().await;

                    local_psum += Acc::from(iact * w);
                    kernel.wait(1).await;

                    if i == kernel_w - 1 {
                        if psum_acc_in {
                            let remote_psum = psum_in.read().await;
                            local_psum += remote_psum;
                            kernel.wait(1).await;
                        }
                        psum_out.write(local_psum).await;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_feeder(kernel: &Kernel, name: &str, fifo: Fifo<i32>, values: Vec<i32>) {
        kernel.spawn(name.to_string(), async move {
            for v in values {
                fifo.write(v).await;
            }
        });
    }

    fn spawn_i64_sink(kernel: &Kernel, name: &str, fifo: Fifo<i64>) -> Rc<RefCell<Vec<i64>>> {
        let collected = Rc::new(RefCell::new(Vec::new()));
        let out = Rc::clone(&collected);
        kernel.spawn(name.to_string(), async move {
            loop {
                let v = fifo.read().await;
                out.borrow_mut().push(v);
            }
        });
        collected
    }

    /// A lone PE with `kernel_w = 3` and no accumulate-in reuses its
    /// 3-element weight row across every output point and slides its
    /// activation window by one each time, producing the expected 1-D
    /// convolution.
    #[test]
    fn single_pe_reuses_weight_row_across_a_sliding_window() {
        let kernel = Kernel::new();
        let iact_in = Fifo::new("iact_in", 1);
        let weight_in = Fifo::new("weight_in", 1);
        let psum_in = Fifo::new("psum_in", 1);
        let psum_out = Fifo::new("psum_out", 1);

        let pe: ProcessingElement<i32, i64> = ProcessingElement::new(
            &kernel,
            "pe",
            iact_in.clone(),
            weight_in.clone(),
            psum_in,
            psum_out.clone(),
        );
        pe.set_config(PeConfig::new(3, 1, false)).unwrap();

        spawn_feeder(&kernel, "iacts", iact_in, vec![1, 2, 3, 4, 5]);
        spawn_feeder(&kernel, "weights", weight_in, vec![10, 20, 30]);
        let results = spawn_i64_sink(&kernel, "psums", psum_out);

        kernel.run(Some(200)).unwrap();

        assert_eq!(*results.borrow(), vec![140, 200, 260]);
    }

    /// `kernel_w = 1` degenerates to an empty sliding window: every
    /// activation is its own output point, one tap wide.
    #[test]
    fn kernel_w_one_has_no_window_reuse() {
        let kernel = Kernel::new();
        let iact_in = Fifo::new("iact_in", 1);
        let weight_in = Fifo::new("weight_in", 1);
        let psum_in = Fifo::new("psum_in", 1);
        let psum_out = Fifo::new("psum_out", 1);

        let pe: ProcessingElement<i32, i64> = ProcessingElement::new(
            &kernel,
            "pe",
            iact_in.clone(),
            weight_in.clone(),
            psum_in,
            psum_out.clone(),
        );
        pe.set_config(PeConfig::new(1, 1, false)).unwrap();

        spawn_feeder(&kernel, "iacts", iact_in, vec![2, 3, 4]);
        spawn_feeder(&kernel, "weights", weight_in, vec![5]);
        let results = spawn_i64_sink(&kernel, "psums", psum_out);

        kernel.run(Some(100)).unwrap();

        assert_eq!(*results.borrow(), vec![10, 15, 20]);
    }

    /// The psum accumulate-in path adds a remote partial sum only on the
    /// last tap of each output point.
    #[test]
    fn psum_accumulate_in_folds_upstream_partial_sum_on_last_tap() {
        let kernel = Kernel::new();
        let iact_in = Fifo::new("iact_in", 1);
        let weight_in = Fifo::new("weight_in", 1);
        let psum_in = Fifo::new("psum_in", 1);
        let psum_out = Fifo::new("psum_out", 1);

        let pe: ProcessingElement<i32, i64> = ProcessingElement::new(
            &kernel,
            "pe",
            iact_in.clone(),
            weight_in.clone(),
            psum_in.clone(),
            psum_out.clone(),
        );
        pe.set_config(PeConfig::new(2, 2, true)).unwrap();

        spawn_feeder(&kernel, "iacts", iact_in, vec![1, 2]);
        spawn_feeder(&kernel, "weights", weight_in, vec![3, 4]);
        kernel.spawn("remote-psum", async move {
            psum_in.write(1000).await;
        });
        let results = spawn_i64_sink(&kernel, "psums", psum_out);

        kernel.run(Some(100)).unwrap();

        // (1*3 + 2*4) + 1000 = 11 + 1000
        assert_eq!(*results.borrow(), vec![1011]);
    }

    /// A PE configured to accumulate an incoming psum that nobody ever
    /// writes. `run_to_quiescence` reports it as a deadlock naming the PE's
    /// `psum_in` endpoint; the plain bounded `run` does not error at all,
    /// since indefinite backpressure on its own is not a kernel-level fault.
    #[test]
    fn unwritten_psum_in_is_reported_as_a_deadlock() {
        let kernel = Kernel::new();
        let iact_in = Fifo::new("iact_in", 1);
        let weight_in = Fifo::new("weight_in", 1);
        let psum_in: Fifo<i64> = Fifo::new("pe::psum_in", 1);
        let psum_out = Fifo::new("psum_out", 1);

        let pe: ProcessingElement<i32, i64> = ProcessingElement::new(
            &kernel,
            "pe",
            iact_in.clone(),
            weight_in.clone(),
            psum_in,
            psum_out,
        );
        pe.set_config(PeConfig::new(2, 2, true)).unwrap();

        spawn_feeder(&kernel, "iacts", iact_in, vec![1, 2]);
        spawn_feeder(&kernel, "weights", weight_in, vec![3, 4]);

        // Bounded run: stage3 parks on the unwritten psum_in, but that is
        // plain backpressure, not a reported error.
        let report = kernel.run(Some(50)).unwrap();
        assert_eq!(report.cycles, 50);

        let err = kernel.run_to_quiescence(1000).unwrap_err();
        match err {
            FabricError::Deadlock { blocked, .. } => {
                assert!(blocked.iter().any(|name| name.contains("stage3")));
            }
            other => panic!("expected Deadlock, got {other:?}"),
        }

        let blocked = kernel.blocked_tasks();
        let stage3 = blocked
            .iter()
            .find(|t| t.name.contains("stage3"))
            .expect("stage3 task should still be alive and blocked");
        assert_eq!(stage3.endpoint.as_deref(), Some("pe::psum_in"));
    }
}
