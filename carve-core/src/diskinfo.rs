//! Detailed per-disk information: geometry, SMART health, capabilities.
//!
//! SMART data is optional; a missing smartctl package degrades to
//! `smart_enabled = false` instead of failing the whole report.

use crate::errors::{EngineError, EngineResult};
use crate::model::{parse_geom_disk_list, parse_gpart_show, Scheme};
use carve_hal::PartitionHal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SmartStatus {
    Passed,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SmartAttrStatus {
    Ok,
    Warning,
    Failing,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmartAttribute {
    pub id: u32,
    pub name: String,
    pub value: i64,
    pub worst: i64,
    pub threshold: i64,
    pub raw_value: String,
    pub status: SmartAttrStatus,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailedDiskInfo {
    pub device: String,
    pub model: String,
    pub serial: String,
    pub size_bytes: u64,
    pub sector_size: u64,
    pub scheme: Scheme,
    pub smart_enabled: bool,
    pub smart_status: SmartStatus,
    pub temperature_c: Option<i64>,
    pub power_on_hours: Option<u64>,
    pub power_cycles: Option<u64>,
    pub attributes: Vec<SmartAttribute>,
    pub capabilities: Vec<String>,
}

/// Retrieves comprehensive disk information including SMART data.
pub fn detailed_disk_info(hal: &dyn PartitionHal, disk: &str) -> EngineResult<DetailedDiskInfo> {
    let listing = hal.geom_disk_list(Some(disk))?;
    let parsed = parse_geom_disk_list(&listing)
        .into_iter()
        .find(|d| d.name == disk)
        .ok_or_else(|| EngineError::Validation(format!("disk {disk} not found")))?;

    let scheme = match hal.gpart_show(disk, false) {
        Ok(table) => parse_gpart_show(&table).0,
        Err(_) => Scheme::None,
    };

    let mut info = DetailedDiskInfo {
        device: parsed.name,
        model: parsed.model,
        serial: parsed.serial,
        size_bytes: parsed.size_bytes,
        sector_size: parsed.sector_size,
        scheme,
        smart_enabled: false,
        smart_status: SmartStatus::Unknown,
        temperature_c: None,
        power_on_hours: None,
        power_cycles: None,
        attributes: Vec::new(),
        capabilities: Vec::new(),
    };

    // SMART may not be available; the rest of the report stands without it.
    match hal.smart_health(disk) {
        Ok(output) => {
            info.smart_enabled = true;
            info.smart_status = if output.contains("PASSED") {
                SmartStatus::Passed
            } else if output.contains("FAILED") {
                SmartStatus::Failed
            } else {
                SmartStatus::Unknown
            };
        }
        Err(err) => {
            log::debug!("SMART health unavailable for {disk}: {err}");
        }
    }

    if info.smart_enabled {
        if let Ok(output) = hal.smart_attributes(disk) {
            info.attributes = parse_smart_attributes(&output);
        }
        if let Ok(output) = hal.smart_all(disk) {
            parse_smart_details(&mut info, &output);
        }
    }

    probe_capabilities(hal, &mut info, disk);

    Ok(info)
}

/// Parses the smartctl attribute table.
///
/// Rows follow the header line containing `ID#` and `ATTRIBUTE_NAME`:
/// `  5 Reallocated_Sector_Ct 0x0033 100 100 010 Pre-fail Always - 0`.
pub fn parse_smart_attributes(output: &str) -> Vec<SmartAttribute> {
    let mut attrs = Vec::new();
    let mut in_table = false;

    for line in output.lines().map(str::trim) {
        if line.contains("ID#") && line.contains("ATTRIBUTE_NAME") {
            in_table = true;
            continue;
        }
        if !in_table || line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let Ok(id) = fields[0].parse::<u32>() else {
            continue;
        };

        let value = fields[3].parse().unwrap_or(0);
        let worst = fields[4].parse().unwrap_or(0);
        let threshold = fields[5].parse().unwrap_or(0);

        let status = if value <= threshold {
            SmartAttrStatus::Failing
        } else if value < threshold + 10 {
            SmartAttrStatus::Warning
        } else {
            SmartAttrStatus::Ok
        };

        attrs.push(SmartAttribute {
            id,
            name: fields[1].to_string(),
            value,
            worst,
            threshold,
            raw_value: fields[9].to_string(),
            status,
            description: smart_attribute_description(fields[1], id),
        });
    }

    attrs
}

/// Extracts temperature, power-on hours, and power cycles from a full
/// SMART report.
pub fn parse_smart_details(info: &mut DetailedDiskInfo, output: &str) {
    for line in output.lines().map(str::trim) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }

        if line.contains("Temperature_Celsius") || line.contains("Airflow_Temperature") {
            if let Ok(temp) = fields[9].parse() {
                info.temperature_c = Some(temp);
            }
        } else if line.contains("Power_On_Hours") {
            if let Ok(hours) = fields[9].parse() {
                info.power_on_hours = Some(hours);
            }
        } else if line.contains("Power_Cycle_Count") || line.contains("Start_Stop_Count") {
            if let Ok(cycles) = fields[9].parse() {
                info.power_cycles = Some(cycles);
            }
        }
    }
}

fn probe_capabilities(hal: &dyn PartitionHal, info: &mut DetailedDiskInfo, disk: &str) {
    if let Ok(output) = hal.cam_identify(disk) {
        let lower = output.to_ascii_lowercase();
        if lower.contains("trim") || lower.contains("data set management") {
            info.capabilities.push("TRIM/UNMAP support".to_string());
        }
        if lower.contains("sata") {
            info.capabilities.push("SATA".to_string());
        }
        if lower.contains("nvme") {
            info.capabilities.push("NVMe".to_string());
        }
    }

    let model = info.model.to_ascii_lowercase();
    if model.contains("ssd") || model.contains("solid state") {
        info.capabilities.push("Solid State Drive (SSD)".to_string());
    } else {
        info.capabilities.push("Hard Disk Drive (HDD)".to_string());
    }
}

fn smart_attribute_description(name: &str, id: u32) -> String {
    let desc = match name {
        "Raw_Read_Error_Rate" => "Rate of hardware read errors",
        "Throughput_Performance" => "Overall throughput performance",
        "Spin_Up_Time" => "Time to spin up to operating speed",
        "Start_Stop_Count" => "Number of spindle start/stop cycles",
        "Reallocated_Sector_Ct" => "Count of reallocated sectors",
        "Seek_Error_Rate" => "Rate of seek errors",
        "Power_On_Hours" => "Total hours powered on",
        "Spin_Retry_Count" => "Number of retry attempts to spin up",
        "Power_Cycle_Count" => "Number of power-on events",
        "Reported_Uncorrect" => "Uncorrectable sector count",
        "Command_Timeout" => "Count of command timeouts",
        "Temperature_Celsius" => "Current drive temperature",
        "Hardware_ECC_Recovered" => "ECC errors corrected by hardware",
        "Current_Pending_Sector" => "Sectors waiting to be remapped",
        "Offline_Uncorrectable" => "Uncorrectable offline errors",
        "UDMA_CRC_Error_Count" => "CRC errors during UDMA transfers",
        "Wear_Leveling_Count" => "SSD wear leveling count",
        "Total_LBAs_Written" => "Total logical blocks written",
        "Airflow_Temperature_Cel" => "Airflow temperature",
        _ => return format!("SMART attribute ID {id}"),
    };
    desc.to_string()
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
";

    const SMART_TABLE: &str = "\
ID# ATTRIBUTE_NAME          FLAG     VALUE WORST THRESH TYPE      UPDATED  WHEN_FAILED RAW_VALUE
  5 Reallocated_Sector_Ct   0x0033   100   100   010    Pre-fail  Always       -       0
  9 Power_On_Hours          0x0032   095   095   000    Old_age   Always       -       21312
194 Temperature_Celsius     0x0022   064   052   005    Old_age   Always       -       36
197 Current_Pending_Sector  0x0012   012   012   010    Old_age   Always       -       4
";

    #[test]
    fn smart_table_rows_parse_with_status_thresholds() {
        let attrs = parse_smart_attributes(SMART_TABLE);
        assert_eq!(attrs.len(), 4);

        assert_eq!(attrs[0].id, 5);
        assert_eq!(attrs[0].name, "Reallocated_Sector_Ct");
        assert_eq!(attrs[0].value, 100);
        assert_eq!(attrs[0].threshold, 10);
        assert_eq!(attrs[0].raw_value, "0");
        assert_eq!(attrs[0].status, SmartAttrStatus::Ok);
        assert!(attrs[0].description.contains("reallocated"));

        // value 12 vs threshold 10: inside the warning band.
        assert_eq!(attrs[3].status, SmartAttrStatus::Warning);
    }

    #[test]
    fn unknown_attribute_gets_id_description() {
        let attrs = parse_smart_attributes(
            "ID# ATTRIBUTE_NAME FLAG VALUE WORST THRESH TYPE UPDATED WHEN_FAILED RAW_VALUE\n\
             231 Unknown_SSD_Attr 0x0033 100 100 010 Pre-fail Always - 99\n",
        );
        assert_eq!(attrs[0].description, "SMART attribute ID 231");
    }

    #[test]
    fn detailed_info_combines_geom_smart_and_capabilities() {
        let hal = FakeHal::new();
        hal.push_output("geom", GEOM_FIXTURE);
        hal.push_output("gpart show", "=>  40  976773088  ada0  GPT  (466G)\n");
        hal.push_output(
            "smartctl -H",
            "SMART overall-health self-assessment test result: PASSED\n",
        );
        hal.push_output("smartctl -A", SMART_TABLE);
        hal.push_output("smartctl -a", SMART_TABLE);
        hal.push_output("camcontrol", "protocol: SATA 3.x\nTRIM support: yes\n");

        let info = detailed_disk_info(&hal, "ada0").unwrap();
        assert_eq!(info.device, "ada0");
        assert_eq!(info.scheme, Scheme::Gpt);
        assert!(info.smart_enabled);
        assert_eq!(info.smart_status, SmartStatus::Passed);
        assert_eq!(info.temperature_c, Some(36));
        assert_eq!(info.power_on_hours, Some(21312));
        assert_eq!(info.attributes.len(), 4);
        assert!(info.capabilities.iter().any(|c| c.contains("TRIM")));
        assert!(info.capabilities.iter().any(|c| c.contains("SATA")));
        assert!(info.capabilities.iter().any(|c| c.contains("SSD")));
    }

    #[test]
    fn missing_smartctl_is_not_fatal() {
        let hal = FakeHal::new();
        hal.push_output("geom", GEOM_FIXTURE);
        hal.fail_next("gpart show", "gpart: No such geom: ada0");
        hal.fail_next("smartctl -H", "smartctl not found - pkg install smartmontools");

        let info = detailed_disk_info(&hal, "ada0").unwrap();
        assert!(!info.smart_enabled);
        assert_eq!(info.smart_status, SmartStatus::Unknown);
        assert!(info.attributes.is_empty());
        assert_eq!(info.scheme, Scheme::None);
    }

    #[test]
    fn unknown_disk_is_a_validation_error() {
        let hal = FakeHal::new();
        hal.push_output("geom", GEOM_FIXTURE);
        let err = detailed_disk_info(&hal, "da9").unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
