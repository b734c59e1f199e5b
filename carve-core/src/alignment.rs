//! Partition start-offset alignment classification.
//!
//! Pure functions over the disk model; the only tool call is the
//! rotational-media probe behind [`optimal_alignment`].

use crate::model::{Disk, Partition};
use carve_hal::PartitionHal;
use serde::Serialize;
use std::fmt;

/// Common alignment boundaries in bytes.
pub const ALIGN_4K: u64 = 4096; // minimum for advanced-format drives
pub const ALIGN_128K: u64 = 131_072; // acceptable for some SSDs
pub const ALIGN_1M: u64 = 1_048_576; // recommended default
pub const ALIGN_4M: u64 = 4_194_304; // optimal for many SSDs

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlignmentClass {
    pub aligned: bool,
    pub boundary: &'static str,
    pub recommendation: &'static str,
}

/// Classifies a byte offset against the known boundaries.
///
/// Boundaries are tested strongest-first: an offset aligned to 4 MiB must
/// be reported as the stronger guarantee, not merely "4 KiB aligned".
pub fn classify_alignment(offset_bytes: u64) -> AlignmentClass {
    if offset_bytes % ALIGN_4M == 0 {
        return AlignmentClass {
            aligned: true,
            boundary: "4 MiB aligned",
            recommendation: "Optimal alignment for SSDs",
        };
    }
    if offset_bytes % ALIGN_1M == 0 {
        return AlignmentClass {
            aligned: true,
            boundary: "1 MiB aligned",
            recommendation: "Recommended alignment for modern drives",
        };
    }
    if offset_bytes % ALIGN_128K == 0 {
        return AlignmentClass {
            aligned: true,
            boundary: "128 KiB aligned",
            recommendation: "Good alignment, but 1 MiB recommended",
        };
    }
    if offset_bytes % ALIGN_4K == 0 {
        return AlignmentClass {
            aligned: true,
            boundary: "4 KiB aligned",
            recommendation: "Minimum alignment, consider 1 MiB for better performance",
        };
    }

    AlignmentClass {
        aligned: false,
        boundary: "Misaligned",
        recommendation: "Partition should be aligned to at least 1 MiB boundary for optimal performance",
    }
}

/// Alignment report for one partition.
#[derive(Debug, Clone, Serialize)]
pub struct AlignmentInfo {
    pub partition: String,
    /// Start offset in sectors.
    pub start_offset: u64,
    pub sector_size: u64,
    pub class: AlignmentClass,
}

impl fmt::Display for AlignmentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.class.aligned {
            "ALIGNED"
        } else {
            "MISALIGNED"
        };
        write!(
            f,
            "{}: {}\n  Start: {} sectors ({} bytes)\n  Type: {}\n  Recommendation: {}",
            self.partition,
            status,
            self.start_offset,
            self.start_offset * self.sector_size,
            self.class.boundary,
            self.class.recommendation,
        )
    }
}

/// Classifies one partition's start offset using the disk's sector size.
pub fn check_partition_alignment(disk: &Disk, part: &Partition) -> AlignmentInfo {
    let sector_size = if disk.sector_size == 0 {
        512
    } else {
        disk.sector_size
    };
    AlignmentInfo {
        partition: part.name.clone(),
        start_offset: part.start,
        sector_size,
        class: classify_alignment(part.start * sector_size),
    }
}

/// Classifies every partition on a disk.
pub fn check_disk_alignment(disk: &Disk) -> Vec<AlignmentInfo> {
    disk.partitions
        .iter()
        .map(|p| check_partition_alignment(disk, p))
        .collect()
}

/// Counts of (aligned, misaligned) partitions on a disk.
pub fn alignment_summary(disk: &Disk) -> (usize, usize) {
    let infos = check_disk_alignment(disk);
    let aligned = infos.iter().filter(|i| i.class.aligned).count();
    (aligned, infos.len() - aligned)
}

/// Rounds an offset up to the next multiple of `alignment`.
pub fn aligned_offset(offset: u64, alignment: u64) -> u64 {
    if alignment == 0 || offset % alignment == 0 {
        return offset;
    }
    (offset / alignment + 1) * alignment
}

/// Rounds a size down to a whole number of sectors.
pub fn align_size_to_sector(size: u64, sector_size: u64) -> u64 {
    if sector_size == 0 {
        return size;
    }
    size / sector_size * sector_size
}

/// Recommended alignment boundary for a disk, from rotational-media
/// signaling. Non-rotating media get 4 MiB; everything else, including
/// detection failure, gets 1 MiB.
pub fn optimal_alignment(hal: &dyn PartitionHal, disk_name: &str) -> u64 {
    let Ok(output) = hal.diskinfo_verbose(disk_name) else {
        return ALIGN_1M;
    };

    for line in output.lines() {
        if line.contains("non-rotating") {
            return ALIGN_4M;
        }
        if line.contains("Rotation rate") {
            if let Some(rate) = line.split_whitespace().next() {
                if rate == "0" {
                    return ALIGN_4M;
                }
            }
        }
    }

    ALIGN_1M
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FsKind, Scheme};
    use carve_hal::FakeHal;

    fn disk_with_partition(start: u64, sector_size: u64) -> Disk {
        Disk {
            name: "ada0".to_string(),
            device: "/dev/ada0".to_string(),
            model: String::new(),
            serial: String::new(),
            size_bytes: 500 * 1024 * 1024 * 1024,
            sector_size,
            scheme: Scheme::Gpt,
            partitions: vec![Partition {
                name: "ada0p1".to_string(),
                part_type: "freebsd-ufs".to_string(),
                start,
                size: 1024,
                end: start + 1024,
                fs: FsKind::Ufs,
                mount_point: None,
            }],
        }
    }

    #[test]
    fn four_mib_offset_reports_strongest_boundary() {
        let class = classify_alignment(4 * 1024 * 1024);
        assert!(class.aligned);
        assert_eq!(class.boundary, "4 MiB aligned");
    }

    #[test]
    fn boundaries_are_tested_in_priority_order() {
        assert_eq!(classify_alignment(8 * 1024 * 1024).boundary, "4 MiB aligned");
        assert_eq!(classify_alignment(3 * 1024 * 1024).boundary, "1 MiB aligned");
        assert_eq!(classify_alignment(128 * 1024).boundary, "128 KiB aligned");
        assert_eq!(classify_alignment(4096).boundary, "4 KiB aligned");
    }

    #[test]
    fn odd_offset_is_misaligned() {
        let class = classify_alignment(512);
        assert!(!class.aligned);
        assert_eq!(class.boundary, "Misaligned");
        assert!(class.recommendation.contains("1 MiB"));
    }

    #[test]
    fn partition_alignment_uses_disk_sector_size() {
        // 2048 sectors * 512 B = 1 MiB.
        let disk = disk_with_partition(2048, 512);
        let info = check_partition_alignment(&disk, &disk.partitions[0]);
        assert!(info.class.aligned);
        assert_eq!(info.class.boundary, "1 MiB aligned");

        let (aligned, misaligned) = alignment_summary(&disk);
        assert_eq!((aligned, misaligned), (1, 0));
    }

    #[test]
    fn aligned_offset_rounds_up() {
        assert_eq!(aligned_offset(0, ALIGN_1M), 0);
        assert_eq!(aligned_offset(1, ALIGN_1M), ALIGN_1M);
        assert_eq!(aligned_offset(ALIGN_1M, ALIGN_1M), ALIGN_1M);
        assert_eq!(aligned_offset(ALIGN_1M + 1, ALIGN_1M), 2 * ALIGN_1M);
    }

    #[test]
    fn ssd_signal_recommends_four_mib() {
        let hal = FakeHal::new();
        hal.push_output(
            "diskinfo -v",
            "/dev/ada0\n\t512\t# sectorsize\n\t0\t# Rotation rate in RPM (0 = non-rotating)\n",
        );
        assert_eq!(optimal_alignment(&hal, "ada0"), ALIGN_4M);
    }

    #[test]
    fn detection_failure_defaults_to_one_mib() {
        let hal = FakeHal::new();
        hal.fail_next("diskinfo -v", "diskinfo: not found");
        assert_eq!(optimal_alignment(&hal, "ada0"), ALIGN_1M);

        hal.push_output("diskinfo -v", "/dev/ada1\n\t7200\t# Rotation rate in RPM\n");
        assert_eq!(optimal_alignment(&hal, "ada1"), ALIGN_1M);
    }
}
