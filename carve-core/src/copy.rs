//! Block-level partition copy, move, and verification.
//!
//! The copy streams through dd configured to continue past read errors
//! (zero-filling unreadable regions); on large transfers a partial,
//! best-effort recovery beats total failure. Progress is scraped from the
//! tool's diagnostic stream through a narrow parser so it can be replaced
//! if the tool ever grows a structured progress source.

use crate::errors::{EngineError, EngineResult};
use crate::model::PartitionRef;
use crate::operations;
use carve_hal::{HalError, PartitionHal};
use serde::Serialize;

/// Block size for dd transfers.
pub const COPY_BLOCK_SIZE: u64 = 1024 * 1024;

/// A copy source or destination: device name plus its byte size from the
/// caller's disk snapshot.
///
/// Carrying the size here lets size validation run before any subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyEndpoint {
    pub device: String,
    pub size_bytes: u64,
}

impl CopyEndpoint {
    pub fn new(device: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            device: device.into(),
            size_bytes,
        }
    }
}

/// Extracts a completion percentage from one dd diagnostic line.
///
/// Matches lines whose first field is a byte count followed by a "bytes"
/// marker, e.g. `524288000 bytes transferred in 12.3 secs`. Anything else
/// yields `None`.
pub fn parse_progress_line(line: &str, total_bytes: u64) -> Option<f64> {
    if total_bytes == 0 || !line.contains("bytes") {
        return None;
    }
    let copied: u64 = line.split_whitespace().next()?.parse().ok()?;
    Some(copied as f64 / total_bytes as f64 * 100.0)
}

/// Copies one partition's content onto another, block for block.
///
/// Fails with a validation error, before any subprocess runs, when the
/// destination is smaller than the source or the endpoints are the same
/// device.
pub fn copy_partition(
    hal: &dyn PartitionHal,
    source: &CopyEndpoint,
    dest: &CopyEndpoint,
    mut on_progress: Option<&mut dyn FnMut(f64)>,
) -> EngineResult<()> {
    hal.ensure_root()?;

    if source.device == dest.device {
        return Err(EngineError::Validation(
            "source and destination cannot be the same".to_string(),
        ));
    }
    if dest.size_bytes < source.size_bytes {
        return Err(EngineError::Validation(format!(
            "destination partition is too small - source: {} bytes, dest: {} bytes",
            source.size_bytes, dest.size_bytes,
        )));
    }

    log::warn!(
        "copying {} -> {}; existing data on {} will be overwritten",
        source.device,
        dest.device,
        dest.device,
    );

    let total = source.size_bytes;
    hal.dd_copy(
        &source.device,
        &dest.device,
        COPY_BLOCK_SIZE,
        &mut |line| {
            if let Some(cb) = on_progress.as_deref_mut() {
                if let Some(pct) = parse_progress_line(line, total) {
                    cb(pct);
                }
            }
            true
        },
    )?;

    Ok(())
}

/// Byte size of a partition device, queried from the geometry tool.
pub fn partition_size_bytes(hal: &dyn PartitionHal, device: &str) -> EngineResult<u64> {
    let output = hal.diskinfo(device)?;
    // diskinfo output: /dev/ada0p2  512  512000000  1000000 ...
    let field = output.split_whitespace().nth(2).ok_or_else(|| {
        EngineError::Tool(HalError::Parse("unexpected diskinfo output format".to_string()))
    })?;
    field.parse().map_err(|_| {
        EngineError::Tool(HalError::Parse(format!(
            "failed to parse partition size: {field}"
        )))
    })
}

/// Copies between two named partitions, querying both byte sizes first.
pub fn copy_partition_by_name(
    hal: &dyn PartitionHal,
    source: &str,
    dest: &str,
    on_progress: Option<&mut dyn FnMut(f64)>,
) -> EngineResult<()> {
    hal.ensure_root()?;

    if source == dest {
        return Err(EngineError::Validation(
            "source and destination cannot be the same".to_string(),
        ));
    }

    let source = CopyEndpoint::new(source, partition_size_bytes(hal, source)?);
    let dest = CopyEndpoint::new(dest, partition_size_bytes(hal, dest)?);
    copy_partition(hal, &source, &dest, on_progress)
}

/// Moves a partition: copy to the destination, then delete the source.
///
/// The two halves have different risk profiles. A failed copy leaves
/// everything untouched; a failed delete after a successful copy leaves
/// duplicated data, and the error says so explicitly.
pub fn move_partition(
    hal: &dyn PartitionHal,
    source: &PartitionRef,
    dest: &PartitionRef,
    on_progress: Option<&mut dyn FnMut(f64)>,
) -> EngineResult<()> {
    let source_device = source.device_name();
    let dest_device = dest.device_name();

    copy_partition_by_name(hal, &source_device, &dest_device, on_progress)?;

    if let Err(err) = operations::delete_partition(hal, source) {
        return Err(EngineError::Consistency {
            succeeded: format!("copy from {source_device} to {dest_device} succeeded"),
            failed: format!("failed to delete source partition {source_device}: {err}"),
        });
    }
    Ok(())
}

/// Compares whole-partition content digests after a copy.
///
/// A mismatch is a distinct error kind from copy failure: the copy
/// completed, the data does not match.
pub fn verify_partition_copy(
    hal: &dyn PartitionHal,
    source: &str,
    dest: &str,
) -> EngineResult<()> {
    hal.ensure_root()?;

    let source_digest = hal.sha256_digest(source)?;
    let dest_digest = hal.sha256_digest(dest)?;

    if source_digest != dest_digest {
        return Err(EngineError::VerifyMismatch {
            source_digest,
            dest_digest,
        });
    }
    Ok(())
}
