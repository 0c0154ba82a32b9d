//! Per-PE kernel geometry.

use serde::{Deserialize, Serialize};

use crate::bounds::MAX_KERNEL_EXTENT;
use crate::error::FabricError;

/// Kernel geometry and vertical-accumulation flag for a single PE.
///
/// `psum_acc_in` is not chosen by the caller directly when installed through
/// a cluster: [`crate::MulticastConfig`]-adjacent cluster code derives it per
/// row as `row < kernel_h - 1` and overwrites whatever value was passed here
/// before calling `ProcessingElement::set_config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeConfig {
    /// Sliding-window width; also the number of weights ever read.
    pub kernel_w: usize,
    /// Number of kernel rows summed vertically across a PE column.
    pub kernel_h: usize,
    /// Whether this PE adds an incoming psum from the PE below before
    /// emitting upward.
    pub psum_acc_in: bool,
}

impl PeConfig {
    /// Construct a config, without validating it.
    pub const fn new(kernel_w: usize, kernel_h: usize, psum_acc_in: bool) -> Self {
        Self {
            kernel_w,
            kernel_h,
            psum_acc_in,
        }
    }

    /// `true` iff both kernel dimensions are nonzero and within
    /// [`MAX_KERNEL_EXTENT`].
    pub fn valid(&self) -> bool {
        self.kernel_w > 0
            && self.kernel_h > 0
            && self.kernel_w <= MAX_KERNEL_EXTENT
            && self.kernel_h <= MAX_KERNEL_EXTENT
    }

    /// Validate, returning a tagged [`FabricError::ConfigInvalid`] on failure.
    pub fn validate(&self, module: &str) -> Result<(), FabricError> {
        if self.kernel_w == 0 || self.kernel_h == 0 {
            return Err(FabricError::ConfigInvalid {
                module: module.to_string(),
                reason: "kernel_w and kernel_h must both be nonzero".to_string(),
            });
        }
        if self.kernel_w > MAX_KERNEL_EXTENT || self.kernel_h > MAX_KERNEL_EXTENT {
            return Err(FabricError::ConfigInvalid {
                module: module.to_string(),
                reason: format!(
                    "kernel extent exceeds MAX_KERNEL_EXTENT ({MAX_KERNEL_EXTENT})"
                ),
            });
        }
        Ok(())
    }
}
