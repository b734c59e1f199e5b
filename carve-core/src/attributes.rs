//! GPT partition attribute tracking.
//!
//! Attribute state is parsed from tool output on demand and never cached.
//! The line matching is intentionally loose (uppercase substring per
//! partition line) because the tool's attribute rendering varies by
//! version; the enumerated outcome keeps that heuristic swappable.

use crate::errors::{EngineError, EngineResult};
use crate::model::PartitionRef;
use carve_hal::{GpartOp, PartitionHal};
use serde::Serialize;
use std::fmt;

/// The fixed set of GPT attributes the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GptAttr {
    /// Platform required; marks the partition as bootable/system.
    Bootme,
    /// Boot from this partition once, then clear the flag.
    Bootonce,
    /// The partition failed to boot.
    Bootfailed,
    /// Disable the block I/O protocol.
    Noblockio,
}

impl GptAttr {
    pub const ALL: [GptAttr; 4] = [
        GptAttr::Bootme,
        GptAttr::Bootonce,
        GptAttr::Bootfailed,
        GptAttr::Noblockio,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GptAttr::Bootme => "bootme",
            GptAttr::Bootonce => "bootonce",
            GptAttr::Bootfailed => "bootfailed",
            GptAttr::Noblockio => "noblockio",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            GptAttr::Bootme => "Platform required - marks partition as bootable/system partition",
            GptAttr::Bootonce => "Boot once - boot from this partition once then clear flag",
            GptAttr::Bootfailed => "Boot failed - indicates partition failed to boot",
            GptAttr::Noblockio => "No block I/O - disable block I/O protocol",
        }
    }

    /// Validates an attribute name against the fixed set.
    pub fn from_name(name: &str) -> EngineResult<GptAttr> {
        Self::ALL
            .into_iter()
            .find(|attr| attr.name() == name)
            .ok_or_else(|| EngineError::Validation(format!("invalid attribute: {name}")))
    }
}

impl fmt::Display for GptAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Attribute state of one partition, derived from a single listing.
#[derive(Debug, Clone, Serialize)]
pub struct AttributeInfo {
    pub partition: String,
    /// Attributes currently set.
    pub set: Vec<GptAttr>,
    /// The raw listing line the state was derived from.
    pub raw_line: String,
}

impl AttributeInfo {
    pub fn is_set(&self, attr: GptAttr) -> bool {
        self.set.contains(&attr)
    }
}

impl fmt::Display for AttributeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Partition: {}", self.partition)?;
        writeln!(f, "Attributes:")?;
        for attr in GptAttr::ALL {
            let status = if self.is_set(attr) { "[x]" } else { "[ ]" };
            writeln!(f, "  {} {} - {}", status, attr.name(), attr.description())?;
        }
        if self.set.is_empty() {
            writeln!(f)?;
            writeln!(f, "No attributes are currently set.")?;
        }
        Ok(())
    }
}

/// Extracts attribute markers from a labeled partition listing.
pub fn parse_attribute_listing(listing: &str, partition: &str) -> AttributeInfo {
    let mut info = AttributeInfo {
        partition: partition.to_string(),
        set: Vec::new(),
        raw_line: String::new(),
    };

    for line in listing.lines() {
        if !line.contains(partition) {
            continue;
        }
        let upper = line.to_ascii_uppercase();
        for attr in GptAttr::ALL {
            if upper.contains(&attr.name().to_ascii_uppercase()) {
                info.set.push(attr);
            }
        }
        info.raw_line = line.trim().to_string();
        break;
    }

    info
}

/// Reads the current attributes of a partition.
pub fn partition_attributes(
    hal: &dyn PartitionHal,
    part_name: &str,
) -> EngineResult<AttributeInfo> {
    let target = PartitionRef::parse(part_name)?;
    let listing = hal.gpart_show(&target.disk, true)?;
    Ok(parse_attribute_listing(&listing, part_name))
}

/// Sets a GPT attribute on a partition device.
pub fn set_partition_attribute(
    hal: &dyn PartitionHal,
    device: &str,
    attr: GptAttr,
) -> EngineResult<()> {
    log::info!("setting {attr} on {device}");
    hal.gpart(
        device,
        GpartOp::SetAttr {
            attribute: attr.name().to_string(),
        },
    )?;
    Ok(())
}

/// Unsets a GPT attribute.
pub fn unset_partition_attribute(
    hal: &dyn PartitionHal,
    device: &str,
    attr: GptAttr,
) -> EngineResult<()> {
    log::info!("unsetting {attr} on {device}");
    hal.gpart(
        device,
        GpartOp::UnsetAttr {
            attribute: attr.name().to_string(),
        },
    )?;
    Ok(())
}

/// String-typed front door: validates the attribute name against the fixed
/// set before any subprocess runs.
pub fn set_partition_attribute_by_name(
    hal: &dyn PartitionHal,
    device: &str,
    name: &str,
) -> EngineResult<()> {
    let attr = GptAttr::from_name(name)?;
    set_partition_attribute(hal, device, attr)
}

/// See [`set_partition_attribute_by_name`].
pub fn unset_partition_attribute_by_name(
    hal: &dyn PartitionHal,
    device: &str,
    name: &str,
) -> EngineResult<()> {
    let attr = GptAttr::from_name(name)?;
    unset_partition_attribute(hal, device, attr)
}

/// Flips an attribute to the opposite of its current state.
pub fn toggle_partition_attribute(
    hal: &dyn PartitionHal,
    part_name: &str,
    attr: GptAttr,
) -> EngineResult<()> {
    let info = partition_attributes(hal, part_name)?;
    if info.is_set(attr) {
        unset_partition_attribute(hal, part_name, attr)
    } else {
        set_partition_attribute(hal, part_name, attr)
    }
}

pub fn set_bootable(hal: &dyn PartitionHal, part_name: &str) -> EngineResult<()> {
    set_partition_attribute(hal, part_name, GptAttr::Bootme)
}

pub fn unset_bootable(hal: &dyn PartitionHal, part_name: &str) -> EngineResult<()> {
    unset_partition_attribute(hal, part_name, GptAttr::Bootme)
}

pub fn is_bootable(hal: &dyn PartitionHal, part_name: &str) -> EngineResult<bool> {
    Ok(partition_attributes(hal, part_name)?.is_set(GptAttr::Bootme))
}

/// Attributes are a GPT-only concept; reject other schemes outright.
pub fn validate_partition_for_attributes(
    hal: &dyn PartitionHal,
    part_name: &str,
) -> EngineResult<()> {
    let target = PartitionRef::parse(part_name)?;
    let listing = hal.gpart_show(&target.disk, false)?;
    if !listing.contains("GPT") {
        return Err(EngineError::Validation(format!(
            "partition {part_name} is not on a GPT disk (attributes only available for GPT)"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_hal::{FakeHal, Operation};

    const LABELED_FIXTURE: &str = "\
=>       40  976773088    ada0  GPT  (466G)
         40     532480  ada0p1  efi  (260M)
     532520  975239168  ada0p2  freebsd-ufs  bootme,bootonce  (465G)
";

    #[test]
    fn listing_parse_matches_uppercase_substrings() {
        let info = parse_attribute_listing(LABELED_FIXTURE, "ada0p2");
        assert!(info.is_set(GptAttr::Bootme));
        assert!(info.is_set(GptAttr::Bootonce));
        assert!(!info.is_set(GptAttr::Bootfailed));
        assert!(!info.is_set(GptAttr::Noblockio));
        assert!(info.raw_line.contains("freebsd-ufs"));

        let info = parse_attribute_listing(LABELED_FIXTURE, "ada0p1");
        assert!(info.set.is_empty());
    }

    #[test]
    fn unknown_attribute_name_is_rejected_without_subprocess() {
        let hal = FakeHal::new();
        let err = set_partition_attribute_by_name(&hal, "ada0p1", "hidden").unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(hal.operation_count(), 0);
    }

    #[test]
    fn set_and_unset_issue_gpart_attribute_verbs() {
        let hal = FakeHal::new();
        set_partition_attribute_by_name(&hal, "ada0p1", "bootme").unwrap();
        unset_partition_attribute_by_name(&hal, "ada0p1", "bootonce").unwrap();

        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::Gpart { op, .. } if op.contains("SetAttr") && op.contains("bootme")
        )));
        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::Gpart { op, .. } if op.contains("UnsetAttr") && op.contains("bootonce")
        )));
    }

    #[test]
    fn toggle_reads_state_then_flips() {
        let hal = FakeHal::new();
        hal.push_output("gpart show", LABELED_FIXTURE);
        toggle_partition_attribute(&hal, "ada0p2", GptAttr::Bootme).unwrap();

        // bootme was set, so the toggle unsets it.
        assert!(hal.has_operation(
            |op| matches!(op, Operation::Gpart { op, .. } if op.contains("UnsetAttr"))
        ));
    }

    #[test]
    fn non_gpt_disk_is_rejected_for_attributes() {
        let hal = FakeHal::new();
        hal.push_output("gpart show", "=>  63  1953525105  ada1  MBR  (932G)\n");
        let err = validate_partition_for_attributes(&hal, "ada1s1").unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        hal.push_output("gpart show", LABELED_FIXTURE);
        validate_partition_for_attributes(&hal, "ada0p2").unwrap();
    }

    #[test]
    fn bootable_helpers_use_bootme() {
        let hal = FakeHal::new();
        hal.push_output("gpart show", LABELED_FIXTURE);
        assert!(is_bootable(&hal, "ada0p2").unwrap());

        hal.push_output("gpart show", LABELED_FIXTURE);
        assert!(!is_bootable(&hal, "ada0p1").unwrap());
    }
}
