//! In-memory disk/partition model built from parsed tool output.
//!
//! A [`Disk`] is an immutable snapshot: it is rebuilt by a full rescan and
//! never mutated in place. Parsing is line-oriented and deliberately loose
//! because the underlying tools' rendering varies by version; unrecognized
//! input degrades to empty fields or [`FsKind::Unknown`], never to an error.

use crate::errors::{EngineError, EngineResult};
use carve_hal::PartitionHal;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// On-disk partition-table format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Scheme {
    Gpt,
    Mbr,
    Bsd,
    None,
}

impl Scheme {
    fn from_tool(s: &str) -> Scheme {
        match s.to_ascii_uppercase().as_str() {
            "GPT" => Scheme::Gpt,
            "MBR" => Scheme::Mbr,
            "BSD" => Scheme::Bsd,
            _ => Scheme::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Gpt => "GPT",
            Scheme::Mbr => "MBR",
            Scheme::Bsd => "BSD",
            Scheme::None => "none",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detected filesystem kind.
///
/// `Ext` covers the whole ext2/3/4 family: neither detector distinguishes
/// the generations reliably enough to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FsKind {
    Ufs,
    Zfs,
    Fat32,
    Swap,
    Ext,
    Ntfs,
    Unknown,
}

impl FsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsKind::Ufs => "UFS",
            FsKind::Zfs => "ZFS",
            FsKind::Fat32 => "FAT32",
            FsKind::Swap => "swap",
            FsKind::Ext => "ext4",
            FsKind::Ntfs => "NTFS",
            FsKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Partition {
    /// Provider name, e.g. `ada0p1`.
    pub name: String,
    /// Scheme-specific partition type, e.g. `freebsd-ufs`.
    pub part_type: String,
    /// Start offset in sectors.
    pub start: u64,
    /// Size in sectors.
    pub size: u64,
    /// End offset in sectors (start + size).
    pub end: u64,
    pub fs: FsKind,
    /// Mount path, `None` if unmounted.
    pub mount_point: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Disk {
    /// Geom provider name, e.g. `ada0`.
    pub name: String,
    /// Device node, e.g. `/dev/ada0`.
    pub device: String,
    pub model: String,
    pub serial: String,
    pub size_bytes: u64,
    pub sector_size: u64,
    pub scheme: Scheme,
    /// Partitions in the tool's listing order (ascending start offset).
    pub partitions: Vec<Partition>,
}

impl Disk {
    /// Total addressable sectors.
    pub fn total_sectors(&self) -> u64 {
        if self.sector_size == 0 {
            0
        } else {
            self.size_bytes / self.sector_size
        }
    }

    /// True when partitions are sorted by start offset and the
    /// [start, end) ranges do not overlap.
    pub fn layout_is_consistent(&self) -> bool {
        self.partitions
            .windows(2)
            .all(|w| w[0].start <= w[1].start && w[0].end <= w[1].start)
    }
}

/// Canonical partition address: disk handle plus table index.
///
/// Device-name parsing exists only as a strict constructor; names that do
/// not match the `<disk>p<index>` / `<disk>s<index>` shape are rejected
/// instead of guessed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionRef {
    pub disk: String,
    pub index: u32,
}

static PART_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z]+[0-9]+)[ps]([0-9]+)$").unwrap());

impl PartitionRef {
    pub fn new(disk: impl Into<String>, index: u32) -> Self {
        Self {
            disk: disk.into(),
            index,
        }
    }

    /// Provider name for a GPT partition, e.g. `ada0p1`.
    pub fn device_name(&self) -> String {
        format!("{}p{}", self.disk, self.index)
    }

    /// Strict parse of names like `ada0p1` or `nvd0p2`.
    pub fn parse(name: &str) -> EngineResult<Self> {
        let caps = PART_NAME_RE.captures(name).ok_or_else(|| {
            EngineError::Validation(format!("invalid partition name format: {name}"))
        })?;
        let index: u32 = caps[2]
            .parse()
            .map_err(|_| EngineError::Validation(format!("invalid partition index in: {name}")))?;
        Ok(Self {
            disk: caps[1].to_string(),
            index,
        })
    }
}

impl fmt::Display for PartitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.device_name())
    }
}

/// Parses `geom disk list` output into disk skeletons (no partitions yet).
pub fn parse_geom_disk_list(output: &str) -> Vec<Disk> {
    let mut disks: Vec<Disk> = Vec::new();
    let mut current: Option<Disk> = None;

    for line in output.lines().map(str::trim) {
        if let Some(name) = line.strip_prefix("Geom name:") {
            if let Some(disk) = current.take() {
                disks.push(disk);
            }
            let name = name.trim().to_string();
            current = Some(Disk {
                device: format!("/dev/{name}"),
                name,
                model: String::new(),
                serial: String::new(),
                size_bytes: 0,
                sector_size: 0,
                scheme: Scheme::None,
                partitions: Vec::new(),
            });
        } else if let Some(disk) = current.as_mut() {
            if let Some(rest) = line.strip_prefix("Mediasize:") {
                if let Some(field) = rest.split_whitespace().next() {
                    disk.size_bytes = field.parse().unwrap_or(0);
                }
            } else if let Some(rest) = line.strip_prefix("Sectorsize:") {
                if let Some(field) = rest.split_whitespace().next() {
                    disk.sector_size = field.parse().unwrap_or(0);
                }
            } else if let Some(rest) = line.strip_prefix("descr:") {
                disk.model = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix("ident:") {
                disk.serial = rest.trim().to_string();
            }
        }
    }

    if let Some(disk) = current.take() {
        disks.push(disk);
    }

    disks
}

/// A partition row parsed from `gpart show -p` output, before filesystem
/// detection and mount lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPartition {
    pub name: String,
    pub part_type: String,
    pub start: u64,
    pub size: u64,
}

/// Parses `gpart show -p <disk>` output.
///
/// The `=>` header yields the table scheme; data rows yield partitions.
/// Free-space rows (`- free -`) are not partitions and are skipped.
pub fn parse_gpart_show(output: &str) -> (Scheme, Vec<RawPartition>) {
    let mut scheme = Scheme::None;
    let mut partitions = Vec::new();

    for line in output.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();

        if line.starts_with("=>") {
            // "=>  40  209715120  ada0  GPT  (100G)"
            if let Some(field) = fields.get(4) {
                scheme = Scheme::from_tool(field);
            }
            continue;
        }

        if fields.len() < 4 {
            continue;
        }
        let (Ok(start), Ok(size)) = (fields[0].parse::<u64>(), fields[1].parse::<u64>()) else {
            continue;
        };
        if fields[2] == "-" {
            // "  975772712  1000416  - free -  (489M)"
            continue;
        }

        partitions.push(RawPartition {
            name: fields[2].to_string(),
            part_type: fields[3].to_string(),
            start,
            size,
        });
    }

    (scheme, partitions)
}

/// Detects the filesystem on a partition device.
///
/// Runs the primary detector first and falls back to the more heuristic
/// one when the primary fails or returns no usable signal. Unrecognized
/// signatures resolve to [`FsKind::Unknown`], never to an error.
pub fn detect_filesystem(hal: &dyn PartitionHal, device: &str) -> FsKind {
    if let Ok(output) = hal.fstyp(device) {
        match output.trim() {
            "ufs" => return FsKind::Ufs,
            "zfs" => return FsKind::Zfs,
            "msdosfs" => return FsKind::Fat32,
            "ntfs" => return FsKind::Ntfs,
            "ext2fs" => return FsKind::Ext,
            _ => {}
        }
    }

    let Ok(output) = hal.file_probe(device) else {
        return FsKind::Unknown;
    };
    if output.contains("UFS") {
        FsKind::Ufs
    } else if output.contains("ZFS") {
        FsKind::Zfs
    } else if output.contains("FAT") {
        FsKind::Fat32
    } else if output.contains("ext2") || output.contains("ext3") || output.contains("ext4") {
        FsKind::Ext
    } else if output.contains("swap") {
        FsKind::Swap
    } else if output.contains("NTFS") {
        FsKind::Ntfs
    } else {
        FsKind::Unknown
    }
}

/// Best-effort mount-point lookup over the live mount table.
///
/// Absence of a match yields `None`, not an error.
pub fn mount_point_for(hal: &dyn PartitionHal, device: &str) -> Option<String> {
    let table = hal.mount_table().ok()?;
    let node = format!("/dev/{device}");
    for line in table.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // "/dev/ada0p2 on / (ufs, local, soft-updates)"
        if fields.len() >= 3 && fields[0] == node && fields[1] == "on" {
            return Some(fields[2].to_string());
        }
    }
    None
}

/// Full rescan: enumerate disks, then list each disk's partition table.
///
/// A missing partition table or a mid-scan tool failure for one disk does
/// not abort the whole listing; that disk is returned with an empty
/// partition list.
pub fn list_disks(hal: &dyn PartitionHal) -> EngineResult<Vec<Disk>> {
    let listing = hal.geom_disk_list(None)?;
    let mut disks = parse_geom_disk_list(&listing);

    for disk in &mut disks {
        let table = match hal.gpart_show(&disk.name, false) {
            Ok(table) => table,
            Err(err) => {
                log::debug!("no partition table on {}: {err}", disk.name);
                continue;
            }
        };

        let (scheme, raw) = parse_gpart_show(&table);
        disk.scheme = scheme;
        disk.partitions = raw
            .into_iter()
            .map(|p| {
                let fs = detect_filesystem(hal, &p.name);
                let mount_point = mount_point_for(hal, &p.name);
                Partition {
                    end: p.start + p.size,
                    name: p.name,
                    part_type: p.part_type,
                    start: p.start,
                    size: p.size,
                    fs,
                    mount_point,
                }
            })
            .collect();
    }

    Ok(disks)
}

/// Human-readable byte size, binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }

    let units = ["KB", "MB", "GB", "TB", "PB"];
    let mut div = UNIT;
    let mut exp = 0usize;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < units.len() - 1 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    format!("{:.2} {}", bytes as f64 / div as f64, units[exp])
}

/// Serializes a disk snapshot for front-ends and logs.
pub fn layout_report_json(disks: &[Disk]) -> serde_json::Result<String> {
    #[derive(Serialize)]
    struct LayoutReport<'a> {
        generated_at: chrono::DateTime<chrono::Utc>,
        disks: &'a [Disk],
    }

    serde_json::to_string_pretty(&LayoutReport {
        generated_at: chrono::Utc::now(),
        disks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_hal::FakeHal;

    const GEOM_FIXTURE: &str = "\
Geom name: ada0
Providers:
1. Name: ada0
   Mediasize: 500107862016 (466G)
   Sectorsize: 512
   descr: Samsung SSD 860
   ident: S3Z9NB0K123456
Geom name: da0
Providers:
1. Name: da0
   Mediasize: 15728640000 (15G)
   Sectorsize: 512
   descr: SanDisk Ultra
   ident: 4C530001
";

    const GPART_FIXTURE: &str = "\
=>       40  976773088    ada0  GPT  (466G)
         40     532480  ada0p1  efi  (260M)
     532520       1024  ada0p2  freebsd-boot  (512K)
     533544  975239168  ada0p3  freebsd-ufs  (465G)
  975772712    1000416          - free -  (489M)
";

    #[test]
    fn geom_listing_parses_disks() {
        let disks = parse_geom_disk_list(GEOM_FIXTURE);
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].name, "ada0");
        assert_eq!(disks[0].device, "/dev/ada0");
        assert_eq!(disks[0].size_bytes, 500107862016);
        assert_eq!(disks[0].sector_size, 512);
        assert_eq!(disks[0].model, "Samsung SSD 860");
        assert_eq!(disks[0].serial, "S3Z9NB0K123456");
        assert_eq!(disks[1].name, "da0");
    }

    #[test]
    fn gpart_listing_parses_scheme_and_skips_free_space() {
        let (scheme, parts) = parse_gpart_show(GPART_FIXTURE);
        assert_eq!(scheme, Scheme::Gpt);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].name, "ada0p1");
        assert_eq!(parts[0].part_type, "efi");
        assert_eq!(parts[0].start, 40);
        assert_eq!(parts[0].size, 532480);
        assert_eq!(parts[2].part_type, "freebsd-ufs");
    }

    #[test]
    fn list_disks_builds_consistent_snapshots() {
        let hal = FakeHal::new();
        hal.push_output("geom", GEOM_FIXTURE);
        hal.push_output("gpart show", GPART_FIXTURE);
        // da0 has no table.
        hal.fail_next("gpart show", "gpart: No such geom: da0");
        hal.push_output("fstyp", "msdosfs\n");
        hal.push_output("fstyp", "\n");
        hal.push_output("fstyp", "ufs\n");
        // One mount-table lookup per partition.
        let mount_fixture = "/dev/ada0p3 on / (ufs, local, soft-updates)\nmap -hosts on /net (autofs)\n";
        for _ in 0..3 {
            hal.push_output("mount", mount_fixture);
        }

        let disks = list_disks(&hal).unwrap();
        assert_eq!(disks.len(), 2);

        let ada0 = &disks[0];
        assert_eq!(ada0.scheme, Scheme::Gpt);
        assert_eq!(ada0.partitions.len(), 3);
        assert!(ada0.layout_is_consistent());
        assert_eq!(ada0.partitions[0].fs, FsKind::Fat32);
        assert_eq!(ada0.partitions[2].fs, FsKind::Ufs);
        assert_eq!(ada0.partitions[2].mount_point.as_deref(), Some("/"));
        assert_eq!(ada0.partitions[2].end, 533544 + 975239168);

        // The failing disk is present with an empty partition list.
        assert_eq!(disks[1].name, "da0");
        assert!(disks[1].partitions.is_empty());
        assert_eq!(disks[1].scheme, Scheme::None);
    }

    #[test]
    fn detection_falls_back_to_file_probe() {
        let hal = FakeHal::new();
        hal.fail_next("fstyp", "fstyp: not recognized");
        hal.push_output("file", "/dev/ada0p4: Linux rev 1.0 ext4 filesystem data\n");
        assert_eq!(detect_filesystem(&hal, "ada0p4"), FsKind::Ext);

        hal.fail_next("fstyp", "fstyp: not recognized");
        hal.push_output("file", "/dev/ada0p5: data\n");
        assert_eq!(detect_filesystem(&hal, "ada0p5"), FsKind::Unknown);
    }

    #[test]
    fn unrecognized_primary_signal_consults_fallback() {
        let hal = FakeHal::new();
        hal.push_output("fstyp", "exfat\n");
        hal.push_output("file", "/dev/ada0p6: swap file\n");
        assert_eq!(detect_filesystem(&hal, "ada0p6"), FsKind::Swap);
    }

    #[test]
    fn mount_lookup_matches_whole_device_node() {
        let hal = FakeHal::new();
        hal.push_output(
            "mount",
            "/dev/ada0p10 on /data (ufs, local)\n/dev/ada0p1 on /boot (msdosfs, local)\n",
        );
        assert_eq!(mount_point_for(&hal, "ada0p1").as_deref(), Some("/boot"));
        assert_eq!(mount_point_for(&hal, "ada0p2"), None);
    }

    #[test]
    fn partition_ref_parses_strictly() {
        let r = PartitionRef::parse("ada0p1").unwrap();
        assert_eq!(r.disk, "ada0");
        assert_eq!(r.index, 1);
        assert_eq!(r.device_name(), "ada0p1");

        let r = PartitionRef::parse("nvd0p12").unwrap();
        assert_eq!(r.disk, "nvd0");
        assert_eq!(r.index, 12);

        assert!(PartitionRef::parse("ada0").is_err());
        assert!(PartitionRef::parse("ada0s1a").is_err());
        assert!(PartitionRef::parse("").is_err());
    }

    #[test]
    fn format_bytes_uses_binary_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn layout_report_serializes() {
        let hal = FakeHal::new();
        hal.push_output("geom", GEOM_FIXTURE);
        let disks = list_disks(&hal).unwrap();
        let json = layout_report_json(&disks).unwrap();
        assert!(json.contains("\"ada0\""));
        assert!(json.contains("generated_at"));
    }
}
