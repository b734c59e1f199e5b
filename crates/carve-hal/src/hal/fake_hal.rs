//! Fake HAL implementation for testing.
//!
//! Records every operation without executing it, and serves scripted tool
//! output so engine parsers and workflows can run in CI without root
//! privileges or real hardware.

use super::{CopyOps, FormatOps, GpartOp, ProbeOps, SystemOps, TableOps};
use crate::{HalError, HalResult};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Operation records for testing and verification.
#[derive(Debug, Clone)]
pub enum Operation {
    GeomDiskList {
        disk: Option<String>,
    },
    GpartShow {
        disk: String,
        with_labels: bool,
    },
    Diskinfo {
        device: String,
        verbose: bool,
    },
    Fstyp {
        device: String,
    },
    FileProbe {
        device: String,
    },
    MountTable,
    SmartHealth {
        device: String,
    },
    SmartAttributes {
        device: String,
    },
    SmartAll {
        device: String,
    },
    CamIdentify {
        device: String,
    },
    Gpart {
        target: String,
        op: String,
    },
    Format {
        program: String,
        device: String,
    },
    FsResize {
        program: String,
        target: String,
    },
    DdCopy {
        source: String,
        dest: String,
        block_size: u64,
    },
    Sha256 {
        device: String,
    },
}

/// Shared state for FakeHal operations.
#[derive(Debug, Default)]
struct FakeHalState {
    /// All operations that were recorded.
    operations: Vec<Operation>,
    /// Scripted responses (output or forced failure), one FIFO per command
    /// key so successes and failures interleave in push order.
    responses: HashMap<String, VecDeque<Result<String, String>>>,
    /// Simulate a non-root caller.
    non_root: bool,
}

/// Fake HAL implementation that records operations without executing them.
///
/// Command keys mirror the invocations they stand in for: `"geom"`,
/// `"gpart show"`, `"gpart"`, `"diskinfo"`, `"diskinfo -v"`, `"fstyp"`,
/// `"file"`, `"mount"`, `"smartctl -H"`, `"smartctl -A"`, `"smartctl -a"`,
/// `"camcontrol"`, `"newfs"`, `"newfs_msdos"`, `"mke2fs"`, `"mkntfs"`,
/// `"growfs"`, `"resize2fs"`, `"dd"`, `"sha256"`.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeHalState::default())),
        }
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.state.lock().unwrap().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state.lock().unwrap().operations.iter().any(check)
    }

    /// Clear all recorded operations and scripted responses.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.operations.clear();
        state.responses.clear();
    }

    /// Queue a scripted output for the given command key.
    pub fn push_output(&self, key: &str, output: &str) {
        self.state
            .lock()
            .unwrap()
            .responses
            .entry(key.to_string())
            .or_default()
            .push_back(Ok(output.to_string()));
    }

    /// Queue a forced failure for the given command key.
    pub fn fail_next(&self, key: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .responses
            .entry(key.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
    }

    /// Make `ensure_root` fail as if the caller were unprivileged.
    pub fn set_non_root(&self, non_root: bool) {
        self.state.lock().unwrap().non_root = non_root;
    }

    /// Record an operation, then serve the next scripted response for the
    /// command key (or the default output when nothing is queued).
    fn respond(&self, key: &str, op: Operation, default: &str) -> HalResult<String> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(op);

        match state
            .responses
            .get_mut(key)
            .and_then(|queue| queue.pop_front())
        {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(HalError::CommandFailed {
                program: key.to_string(),
                code: Some(1),
                output: message,
            }),
            None => Ok(default.to_string()),
        }
    }
}

impl ProbeOps for FakeHal {
    fn geom_disk_list(&self, disk: Option<&str>) -> HalResult<String> {
        let op = Operation::GeomDiskList {
            disk: disk.map(String::from),
        };
        self.respond("geom", op, "")
    }

    fn gpart_show(&self, disk: &str, with_labels: bool) -> HalResult<String> {
        let op = Operation::GpartShow {
            disk: disk.to_string(),
            with_labels,
        };
        self.respond("gpart show", op, "")
    }

    fn diskinfo(&self, device: &str) -> HalResult<String> {
        let op = Operation::Diskinfo {
            device: device.to_string(),
            verbose: false,
        };
        self.respond("diskinfo", op, "")
    }

    fn diskinfo_verbose(&self, device: &str) -> HalResult<String> {
        let op = Operation::Diskinfo {
            device: device.to_string(),
            verbose: true,
        };
        self.respond("diskinfo -v", op, "")
    }

    fn fstyp(&self, device: &str) -> HalResult<String> {
        let op = Operation::Fstyp {
            device: device.to_string(),
        };
        self.respond("fstyp", op, "")
    }

    fn file_probe(&self, device: &str) -> HalResult<String> {
        let op = Operation::FileProbe {
            device: device.to_string(),
        };
        self.respond("file", op, "")
    }

    fn mount_table(&self) -> HalResult<String> {
        self.respond("mount", Operation::MountTable, "")
    }

    fn smart_health(&self, device: &str) -> HalResult<String> {
        let op = Operation::SmartHealth {
            device: device.to_string(),
        };
        self.respond("smartctl -H", op, "")
    }

    fn smart_attributes(&self, device: &str) -> HalResult<String> {
        let op = Operation::SmartAttributes {
            device: device.to_string(),
        };
        self.respond("smartctl -A", op, "")
    }

    fn smart_all(&self, device: &str) -> HalResult<String> {
        let op = Operation::SmartAll {
            device: device.to_string(),
        };
        self.respond("smartctl -a", op, "")
    }

    fn cam_identify(&self, device: &str) -> HalResult<String> {
        let op = Operation::CamIdentify {
            device: device.to_string(),
        };
        self.respond("camcontrol", op, "")
    }
}

impl TableOps for FakeHal {
    fn gpart(&self, target: &str, op: GpartOp) -> HalResult<String> {
        let record = Operation::Gpart {
            target: target.to_string(),
            op: format!("{op:?}"),
        };
        self.respond("gpart", record, "")
    }
}

impl FormatOps for FakeHal {
    fn newfs_ufs(&self, device: &str) -> HalResult<()> {
        let op = Operation::Format {
            program: "newfs".to_string(),
            device: device.to_string(),
        };
        self.respond("newfs", op, "").map(|_| ())
    }

    fn newfs_msdos(&self, device: &str) -> HalResult<()> {
        let op = Operation::Format {
            program: "newfs_msdos".to_string(),
            device: device.to_string(),
        };
        self.respond("newfs_msdos", op, "").map(|_| ())
    }

    fn mke2fs(&self, device: &str, variant: &str) -> HalResult<()> {
        let op = Operation::Format {
            program: format!("mke2fs -t {variant}"),
            device: device.to_string(),
        };
        self.respond("mke2fs", op, "").map(|_| ())
    }

    fn mkntfs(&self, device: &str) -> HalResult<()> {
        let op = Operation::Format {
            program: "mkntfs".to_string(),
            device: device.to_string(),
        };
        self.respond("mkntfs", op, "").map(|_| ())
    }

    fn growfs(&self, mount_point: &str) -> HalResult<()> {
        let op = Operation::FsResize {
            program: "growfs".to_string(),
            target: mount_point.to_string(),
        };
        self.respond("growfs", op, "").map(|_| ())
    }

    fn resize2fs(&self, device: &str, size_k: Option<u64>) -> HalResult<()> {
        let target = match size_k {
            Some(size_k) => format!("{device} {size_k}K"),
            None => device.to_string(),
        };
        let op = Operation::FsResize {
            program: "resize2fs".to_string(),
            target,
        };
        self.respond("resize2fs", op, "").map(|_| ())
    }
}

impl CopyOps for FakeHal {
    fn dd_copy(
        &self,
        source: &str,
        dest: &str,
        block_size: u64,
        on_diag_line: &mut dyn FnMut(&str) -> bool,
    ) -> HalResult<()> {
        let op = Operation::DdCopy {
            source: source.to_string(),
            dest: dest.to_string(),
            block_size,
        };
        let diag = self.respond("dd", op, "")?;
        for line in diag.lines() {
            if !on_diag_line(line) {
                return Err(HalError::Other("dd copy cancelled".to_string()));
            }
        }
        Ok(())
    }

    fn sha256_digest(&self, device: &str) -> HalResult<String> {
        let op = Operation::Sha256 {
            device: device.to_string(),
        };
        self.respond("sha256", op, "FAKE-DIGEST")
    }
}

impl SystemOps for FakeHal {
    fn ensure_root(&self) -> HalResult<()> {
        // A local euid check, not a subprocess; nothing is recorded.
        if self.state.lock().unwrap().non_root {
            return Err(HalError::NotRoot);
        }
        Ok(())
    }
}
