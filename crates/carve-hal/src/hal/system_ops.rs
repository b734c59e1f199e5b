//! Platform / privilege interactions.

use crate::HalResult;

pub trait SystemOps {
    /// Fails with `HalError::NotRoot` unless the effective uid is 0.
    ///
    /// Every mutating operation checks this before constructing a command.
    fn ensure_root(&self) -> HalResult<()>;
}
