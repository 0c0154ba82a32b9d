//! `MulticastConfig` — a `Srcs x Dsts` boolean routing matrix.
//!
//! A destination column may have at most one enabled source: a destination
//! FIFO has exactly one writer, and two sources racing to write the same
//! FIFO would corrupt its ordering guarantee. `valid()` is the single
//! predicate every `set_config` call in the fabric checks before installing
//! a matrix.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FabricError;

/// A `srcs x dsts` boolean multicast routing matrix.
///
/// Dimensions are chosen at construction time rather than as const generics:
/// the fabric's router is a fixed 6x6 instance, but a PE cluster's iact and
/// weight propagation matrices are sized from runtime `PERows`/`PECols`/
/// `IActBanks` parameters, and Rust's const generics cannot yet express
/// `PERows * PECols` as a derived array length on stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastConfig {
    srcs: usize,
    dsts: usize,
    path: Vec<Vec<bool>>,
}

impl MulticastConfig {
    /// Construct a new matrix with all paths disabled.
    pub fn new(srcs: usize, dsts: usize) -> Self {
        Self {
            srcs,
            dsts,
            path: vec![vec![false; dsts]; srcs],
        }
    }

    /// Number of source ports.
    pub fn srcs(&self) -> usize {
        self.srcs
    }

    /// Number of destination ports.
    pub fn dsts(&self) -> usize {
        self.dsts
    }

    /// Enable `src -> dst` for every `dst` in `dsts`.
    ///
    /// # Panics
    /// Panics if `src >= self.srcs()` or any `dst >= self.dsts()`.
    pub fn group_enable(&mut self, src: usize, dsts: impl IntoIterator<Item = usize>) {
        assert!(src < self.srcs, "src {src} out of range (0..{})", self.srcs);
        for dst in dsts {
            assert!(dst < self.dsts, "dst {dst} out of range (0..{})", self.dsts);
            self.path[src][dst] = true;
        }
    }

    /// Whether `src -> dst` is enabled.
    pub fn path(&self, src: usize, dst: usize) -> bool {
        self.path[src][dst]
    }

    /// `true` if no destination column has more than one enabled source.
    pub fn valid(&self) -> bool {
        for dst in 0..self.dsts {
            let routes_for_dst = (0..self.srcs).filter(|&src| self.path[src][dst]).count();
            if routes_for_dst > 1 {
                return false;
            }
        }
        true
    }

    /// Validate this matrix, returning a [`FabricError::ConfigInvalid`]
    /// tagged with `module` on failure.
    pub fn validate(&self, module: &str) -> Result<(), FabricError> {
        if self.valid() {
            Ok(())
        } else {
            Err(FabricError::ConfigInvalid {
                module: module.to_string(),
                reason: "destination driven by more than one source".to_string(),
            })
        }
    }

    /// Render the matrix as a grid of `1`s and `0`s, one row per source
    /// port.
    pub fn fmt_matrix(&self) -> String {
        (0..self.srcs)
            .map(|src| {
                (0..self.dsts)
                    .map(|dst| if self.path[src][dst] { '1' } else { '0' })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Log [`MulticastConfig::fmt_matrix`]'s rendering through `tracing`,
    /// one `debug!` event per source-port row.
    pub fn log_matrix(&self, module: &str) {
        for (src, row) in self.fmt_matrix().lines().enumerate() {
            debug!(module, src, row, "multicast route row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fmt_matrix_renders_one_row_per_source() {
        let mut m = MulticastConfig::new(2, 3);
        m.group_enable(0, [1, 2]);
        assert_eq!(m.fmt_matrix(), "0 1 1\n0 0 0");
    }

    #[test]
    fn fresh_matrix_has_no_paths() {
        let m = MulticastConfig::new(3, 4);
        assert!(m.valid());
        for src in 0..3 {
            for dst in 0..4 {
                assert!(!m.path(src, dst));
            }
        }
    }

    #[test]
    fn group_enable_sets_requested_paths() {
        let mut m = MulticastConfig::new(2, 3);
        m.group_enable(0, [1, 2]);
        assert!(m.path(0, 1));
        assert!(m.path(0, 2));
        assert!(!m.path(0, 0));
        assert!(!m.path(1, 1));
        assert!(m.valid());
    }

    #[test]
    fn two_sources_to_same_dst_is_invalid() {
        let mut m = MulticastConfig::new(2, 2);
        m.group_enable(0, [0]);
        m.group_enable(1, [0]);
        assert!(!m.valid());
        assert!(m.validate("test").is_err());
    }

    #[test]
    #[should_panic]
    fn out_of_range_dst_panics() {
        let mut m = MulticastConfig::new(1, 2);
        m.group_enable(0, [2]);
    }

    proptest::proptest! {
        /// A matrix built by only ever giving a destination a single owning
        /// source is always `valid()`, no matter how the srcs/dsts/ownership
        /// are chosen.
        #[test]
        fn single_owner_per_destination_is_always_valid(
            srcs in 1usize..8,
            owners in proptest::collection::vec(proptest::option::of(0usize..8), 0..12),
        ) {
            let dsts = owners.len();
            let mut m = MulticastConfig::new(srcs, dsts);
            for (dst, owner) in owners.into_iter().enumerate() {
                if let Some(src) = owner {
                    m.group_enable(src % srcs, [dst]);
                }
            }
            prop_assert!(m.valid());
        }
    }
}
