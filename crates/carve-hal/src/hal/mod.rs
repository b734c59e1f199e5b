//! HAL trait definitions and implementations.
//!
//! This module defines the core traits for disk-tool operations and provides
//! both real (FreebsdHal) and fake (FakeHal) implementations.

pub mod copy_ops;
pub mod fake_hal;
pub mod format_ops;
pub mod freebsd_hal;
pub mod probe_ops;
pub mod system_ops;
pub mod table_ops;

pub use copy_ops::CopyOps;
pub use fake_hal::{FakeHal, Operation};
pub use format_ops::FormatOps;
pub use freebsd_hal::FreebsdHal;
pub use probe_ops::ProbeOps;
pub use system_ops::SystemOps;
pub use table_ops::{GpartOp, TableOps};

/// Complete HAL combining all disk-tool operation traits.
pub trait PartitionHal:
    ProbeOps + TableOps + FormatOps + CopyOps + SystemOps + Send + Sync
{
}

/// Automatically implement PartitionHal for any type implementing all required traits.
impl<T> PartitionHal for T where
    T: ProbeOps + TableOps + FormatOps + CopyOps + SystemOps + Send + Sync
{
}
