//! Structural partition operations: create, delete, resize, format, and
//! partition-table lifecycle. Every mutation is one external command,
//! preceded by a privilege check and a warning log.

use crate::attributes::GptAttr;
use crate::errors::{EngineError, EngineResult};
use crate::model::{format_bytes, PartitionRef, Scheme};
use carve_hal::{GpartOp, PartitionHal};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

const MIB: u64 = 1024 * 1024;

/// Filesystems the engine can create.
///
/// Distinct from the detection enum: formatting needs the exact ext
/// generation, detection cannot tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FormatFs {
    Ufs,
    Fat32,
    Ext2,
    Ext3,
    Ext4,
    Ntfs,
}

impl FormatFs {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatFs::Ufs => "ufs",
            FormatFs::Fat32 => "fat32",
            FormatFs::Ext2 => "ext2",
            FormatFs::Ext3 => "ext3",
            FormatFs::Ext4 => "ext4",
            FormatFs::Ntfs => "ntfs",
        }
    }
}

impl fmt::Display for FormatFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatFs {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ufs" => Ok(FormatFs::Ufs),
            "fat32" => Ok(FormatFs::Fat32),
            "ext2" => Ok(FormatFs::Ext2),
            "ext3" => Ok(FormatFs::Ext3),
            "ext4" => Ok(FormatFs::Ext4),
            "ntfs" => Ok(FormatFs::Ntfs),
            "zfs" => Err(EngineError::Validation(
                "ZFS pools must be created using 'zpool create' directly".to_string(),
            )),
            other => Err(EngineError::Validation(format!(
                "unsupported filesystem type: {other}"
            ))),
        }
    }
}

/// One external structural mutation.
///
/// This is the single executable form shared by direct calls, undo/redo
/// replay, and the batch queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExternalAction {
    CreatePartition {
        disk: String,
        part_type: String,
        size_bytes: u64,
    },
    DeletePartition {
        target: PartitionRef,
    },
    ResizePartition {
        target: PartitionRef,
        size_bytes: u64,
    },
    SetAttribute {
        device: String,
        attribute: GptAttr,
    },
    UnsetAttribute {
        device: String,
        attribute: GptAttr,
    },
}

impl fmt::Display for ExternalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalAction::CreatePartition {
                disk,
                part_type,
                size_bytes,
            } => write!(
                f,
                "create {part_type} partition on {disk} ({})",
                format_bytes(*size_bytes)
            ),
            ExternalAction::DeletePartition { target } => {
                write!(f, "delete partition {target}")
            }
            ExternalAction::ResizePartition { target, size_bytes } => {
                write!(f, "resize {target} to {}", format_bytes(*size_bytes))
            }
            ExternalAction::SetAttribute { device, attribute } => {
                write!(f, "set {attribute} on {device}")
            }
            ExternalAction::UnsetAttribute { device, attribute } => {
                write!(f, "unset {attribute} on {device}")
            }
        }
    }
}

/// Executes one action against the tool layer.
pub fn apply_action(hal: &dyn PartitionHal, action: &ExternalAction) -> EngineResult<()> {
    match action {
        ExternalAction::CreatePartition {
            disk,
            part_type,
            size_bytes,
        } => create_partition(hal, disk, *size_bytes, part_type),
        ExternalAction::DeletePartition { target } => delete_partition(hal, target),
        ExternalAction::ResizePartition { target, size_bytes } => {
            resize_partition(hal, target, *size_bytes)
        }
        ExternalAction::SetAttribute { device, attribute } => {
            crate::attributes::set_partition_attribute(hal, device, *attribute)
        }
        ExternalAction::UnsetAttribute { device, attribute } => {
            crate::attributes::unset_partition_attribute(hal, device, *attribute)
        }
    }
}

/// Appends a partition to a disk's table.
pub fn create_partition(
    hal: &dyn PartitionHal,
    disk: &str,
    size_bytes: u64,
    part_type: &str,
) -> EngineResult<()> {
    hal.ensure_root()?;

    hal.gpart(
        disk,
        GpartOp::Add {
            part_type: part_type.to_string(),
            size_mb: size_bytes / MIB,
        },
    )?;
    Ok(())
}

/// Deletes a partition. The partition's data is not recoverable.
pub fn delete_partition(hal: &dyn PartitionHal, target: &PartitionRef) -> EngineResult<()> {
    hal.ensure_root()?;

    log::warn!("deleting partition {target}; its data will not be recoverable");
    hal.gpart(
        &target.disk,
        GpartOp::Delete {
            index: target.index,
        },
    )?;
    Ok(())
}

/// Resizes a partition's table entry. Bounds validation belongs to the
/// caller (see `resize::validate_resize`); this is the raw tool call.
pub fn resize_partition(
    hal: &dyn PartitionHal,
    target: &PartitionRef,
    new_size_bytes: u64,
) -> EngineResult<()> {
    hal.ensure_root()?;

    hal.gpart(
        &target.disk,
        GpartOp::Resize {
            index: target.index,
            size_mb: new_size_bytes / MIB,
        },
    )?;
    Ok(())
}

/// Writes a new, empty partition table to a disk.
pub fn create_partition_table(
    hal: &dyn PartitionHal,
    disk: &str,
    scheme: Scheme,
) -> EngineResult<()> {
    hal.ensure_root()?;

    let scheme = match scheme {
        Scheme::Gpt => "gpt",
        Scheme::Mbr => "mbr",
        Scheme::Bsd => "bsd",
        Scheme::None => {
            return Err(EngineError::Validation(
                "cannot create a partition table without a scheme".to_string(),
            ))
        }
    };

    hal.gpart(
        disk,
        GpartOp::CreateTable {
            scheme: scheme.to_string(),
        },
    )?;
    Ok(())
}

/// Destroys a disk's partition table, forcibly.
pub fn destroy_partition_table(hal: &dyn PartitionHal, disk: &str) -> EngineResult<()> {
    hal.ensure_root()?;

    log::warn!("destroying the partition table on {disk}; all partitions will be lost");
    hal.gpart(disk, GpartOp::DestroyTable)?;
    Ok(())
}

/// Creates a filesystem on a partition device. Existing data is destroyed.
pub fn format_partition(hal: &dyn PartitionHal, device: &str, fs: FormatFs) -> EngineResult<()> {
    hal.ensure_root()?;

    log::warn!("formatting {device} as {fs}; existing data will be destroyed");
    match fs {
        FormatFs::Ufs => hal.newfs_ufs(device)?,
        FormatFs::Fat32 => hal.newfs_msdos(device)?,
        FormatFs::Ext2 => hal.mke2fs(device, "ext2")?,
        FormatFs::Ext3 => hal.mke2fs(device, "ext3")?,
        FormatFs::Ext4 => hal.mke2fs(device, "ext4")?,
        FormatFs::Ntfs => hal.mkntfs(device)?,
    }
    Ok(())
}
