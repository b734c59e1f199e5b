//! Resize bounds and online filesystem resize.
//!
//! Bounds are pure functions over the disk snapshot; a request outside
//! [min, max] is rejected before any external tool runs.

use crate::errors::{EngineError, EngineResult};
use crate::model::{format_bytes, Disk, FsKind, Partition, PartitionRef};
use crate::operations;
use carve_hal::PartitionHal;
use serde::Serialize;

/// Fixed floor for any partition size.
pub const MIN_PARTITION_BYTES: u64 = 10 * 1024 * 1024;

fn sector_size_of(disk: &Disk) -> u64 {
    if disk.sector_size == 0 {
        512
    } else {
        disk.sector_size
    }
}

/// Smallest permitted partition size, in this disk's sectors.
pub fn min_resize_sectors(disk: &Disk) -> u64 {
    MIN_PARTITION_BYTES / sector_size_of(disk)
}

/// Largest size, in sectors, the partition may grow to.
///
/// The effective ceiling is the minimum start offset among partitions
/// that begin strictly after this one, or the end of the disk when no
/// such partition exists.
pub fn max_resize_sectors(disk: &Disk, part: &Partition) -> u64 {
    let mut ceiling = disk.total_sectors();
    for other in &disk.partitions {
        if other.start > part.start && other.start < ceiling {
            ceiling = other.start;
        }
    }
    ceiling.saturating_sub(part.start)
}

/// Rejects a resize request outside `[min, max]` sectors.
pub fn validate_resize(disk: &Disk, part: &Partition, new_size_sectors: u64) -> EngineResult<()> {
    let min = min_resize_sectors(disk);
    let max = max_resize_sectors(disk, part);

    if new_size_sectors < min {
        return Err(EngineError::Validation(format!(
            "requested size for {} is below the {} minimum",
            part.name,
            format_bytes(MIN_PARTITION_BYTES),
        )));
    }
    if new_size_sectors > max {
        return Err(EngineError::Validation(format!(
            "requested size for {} exceeds the available {} sectors",
            part.name, max,
        )));
    }
    Ok(())
}

/// Validates the request against the snapshot, then issues the table
/// resize.
pub fn resize_partition_checked(
    hal: &dyn PartitionHal,
    disk: &Disk,
    part: &Partition,
    target: &PartitionRef,
    new_size_sectors: u64,
) -> EngineResult<()> {
    validate_resize(disk, part, new_size_sectors)?;
    operations::resize_partition(hal, target, new_size_sectors * sector_size_of(disk))
}

/// Online resize support for a filesystem kind.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OnlineResizeCapability {
    pub supports_grow: bool,
    pub supports_shrink: bool,
    pub requires_mounted: bool,
    pub command: &'static str,
    pub notes: &'static str,
}

pub fn online_resize_capability(fs: FsKind) -> OnlineResizeCapability {
    match fs {
        FsKind::Ufs => OnlineResizeCapability {
            supports_grow: true,
            supports_shrink: false,
            requires_mounted: true,
            command: "growfs",
            notes: "UFS can be grown while mounted using growfs. Cannot shrink online.",
        },
        FsKind::Ext => OnlineResizeCapability {
            supports_grow: true,
            supports_shrink: true,
            requires_mounted: false,
            command: "resize2fs",
            notes: "ext2/ext3/ext4 support both grow and shrink with resize2fs.",
        },
        _ => OnlineResizeCapability {
            supports_grow: false,
            supports_shrink: false,
            requires_mounted: false,
            command: "",
            notes: "Online resize not supported for this filesystem",
        },
    }
}

/// Checks whether a partition's filesystem can be resized online in the
/// requested direction. Returns the blocking reason otherwise.
pub fn can_resize_online(part: &Partition, grow: bool) -> Result<(), String> {
    if part.fs == FsKind::Unknown {
        return Err("Unknown filesystem type".to_string());
    }

    let capability = online_resize_capability(part.fs);

    if grow && !capability.supports_grow {
        return Err(format!("{} does not support online grow", part.fs));
    }
    if !grow && !capability.supports_shrink {
        return Err(format!("{} does not support online shrink", part.fs));
    }
    if capability.requires_mounted && part.mount_point.is_none() {
        return Err(format!(
            "Filesystem must be mounted for online resize (using {})",
            capability.command,
        ));
    }

    Ok(())
}

/// Resizes a filesystem in place to follow its partition.
pub fn resize_filesystem_online(
    hal: &dyn PartitionHal,
    disk: &Disk,
    part: &Partition,
    new_size_bytes: u64,
) -> EngineResult<()> {
    let current_bytes = part.size * sector_size_of(disk);
    let grow = new_size_bytes > current_bytes;
    can_resize_online(part, grow).map_err(EngineError::Validation)?;

    match part.fs {
        FsKind::Ufs => {
            // can_resize_online guarantees a mount point here.
            let mount_point = part.mount_point.as_deref().unwrap_or_default();
            hal.growfs(mount_point)?;
        }
        FsKind::Ext => {
            let size_k = new_size_bytes / 1024;
            hal.resize2fs(&part.name, (size_k > 0).then_some(size_k))?;
        }
        other => {
            return Err(EngineError::Validation(format!(
                "online resize not implemented for {other}"
            )));
        }
    }
    Ok(())
}

/// Complete online resize: partition table entry first, filesystem second.
///
/// The second phase failing after the first succeeded is a consistency
/// error, not a plain failure; retrying the whole operation would resize
/// the table entry twice.
pub fn perform_online_resize(
    hal: &dyn PartitionHal,
    disk: &Disk,
    part: &Partition,
    target: &PartitionRef,
    new_size_bytes: u64,
) -> EngineResult<()> {
    let grow = new_size_bytes > part.size * sector_size_of(disk);
    can_resize_online(part, grow)
        .map_err(|reason| EngineError::Validation(format!("cannot perform online resize: {reason}")))?;

    let new_size_sectors = new_size_bytes / sector_size_of(disk);
    validate_resize(disk, part, new_size_sectors)?;

    operations::resize_partition(hal, target, new_size_bytes)?;

    if let Err(err) = resize_filesystem_online(hal, disk, part, new_size_bytes) {
        return Err(EngineError::Consistency {
            succeeded: format!("partition {target} was resized"),
            failed: format!(
                "the filesystem resize failed ({err}); resize the filesystem manually"
            ),
        });
    }
    Ok(())
}
