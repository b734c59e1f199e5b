//! Read-only disk probes (geom/gpart/diskinfo/fstyp/file/mount/smartctl/camcontrol).
//!
//! Probes never mutate on-disk state. Each method returns the raw textual
//! output of the underlying tool; parsing lives in the engine so the
//! matching heuristics can change without touching this boundary.

use crate::HalResult;

pub trait ProbeOps {
    /// `geom disk list [disk]` — disk enumeration and geometry.
    fn geom_disk_list(&self, disk: Option<&str>) -> HalResult<String>;

    /// `gpart show -p [-l] <disk>` — partition-table listing.
    ///
    /// With `with_labels`, labels and GPT attribute markers are included.
    fn gpart_show(&self, disk: &str, with_labels: bool) -> HalResult<String>;

    /// `diskinfo /dev/<device>` — sector size and media size fields.
    fn diskinfo(&self, device: &str) -> HalResult<String>;

    /// `diskinfo -v <device>` — verbose output including rotation rate.
    fn diskinfo_verbose(&self, device: &str) -> HalResult<String>;

    /// `fstyp /dev/<device>` — primary filesystem-type detector.
    fn fstyp(&self, device: &str) -> HalResult<String>;

    /// `file -s /dev/<device>` — fallback, more heuristic detector.
    fn file_probe(&self, device: &str) -> HalResult<String>;

    /// `mount` — live mount-table listing.
    fn mount_table(&self) -> HalResult<String>;

    /// `smartctl -H /dev/<device>` — SMART overall health.
    fn smart_health(&self, device: &str) -> HalResult<String>;

    /// `smartctl -A /dev/<device>` — SMART attribute table.
    fn smart_attributes(&self, device: &str) -> HalResult<String>;

    /// `smartctl -a /dev/<device>` — full SMART report.
    fn smart_all(&self, device: &str) -> HalResult<String>;

    /// `camcontrol identify <device>` — device capability identification.
    fn cam_identify(&self, device: &str) -> HalResult<String>;
}
