//! Filesystem creation and filesystem-level resize commands.
//!
//! One command per supported filesystem kind. Formatters that ship outside
//! the base system (`mke2fs`, `mkntfs`) surface as `HalError::MissingTool`
//! with the package to install when absent.

use crate::HalResult;

pub trait FormatOps {
    /// `newfs -U /dev/<device>` — UFS with soft updates.
    fn newfs_ufs(&self, device: &str) -> HalResult<()>;

    /// `newfs_msdos -F 32 /dev/<device>` — FAT32.
    fn newfs_msdos(&self, device: &str) -> HalResult<()>;

    /// `mke2fs -t <variant> /dev/<device>` — ext2/ext3/ext4.
    fn mke2fs(&self, device: &str, variant: &str) -> HalResult<()>;

    /// `mkntfs -f /dev/<device>` — NTFS (fast format).
    fn mkntfs(&self, device: &str) -> HalResult<()>;

    /// `growfs -y <mount_point>` — grow a mounted UFS filesystem in place.
    fn growfs(&self, mount_point: &str) -> HalResult<()>;

    /// `resize2fs <device> [<size_k>K]` — resize an ext2/3/4 filesystem.
    ///
    /// Without a target size the filesystem grows to fill the partition.
    fn resize2fs(&self, device: &str, size_k: Option<u64>) -> HalResult<()>;
}
