//! carve Hardware Abstraction Layer (HAL).
//!
//! The boundary between the partition engine and the external FreeBSD disk
//! utilities. Every disk probe or mutation is one external command
//! invocation; the traits here keep that surface narrow so engine workflows
//! can be tested against [`FakeHal`] without root privileges or real
//! hardware.

pub mod error;
pub mod hal;

pub use error::{HalError, HalResult};
pub use hal::fake_hal::{FakeHal, Operation};
pub use hal::freebsd_hal::FreebsdHal;
pub use hal::{CopyOps, FormatOps, GpartOp, PartitionHal, ProbeOps, SystemOps, TableOps};
