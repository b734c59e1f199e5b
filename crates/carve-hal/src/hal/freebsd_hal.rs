//! FreeBSD HAL implementation shelling out to the base-system disk tools.

use super::{CopyOps, FormatOps, GpartOp, ProbeOps, SystemOps, TableOps};
use crate::{HalError, HalResult};
use std::collections::VecDeque;
use std::io::{self, BufReader, Read};
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// Real HAL implementation for FreeBSD systems.
#[derive(Debug, Clone, Default)]
pub struct FreebsdHal;

impl FreebsdHal {
    pub fn new() -> Self {
        Self
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const SMART_TIMEOUT: Duration = Duration::from_secs(30);
const GPART_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const FORMAT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const FSRESIZE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DIGEST_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
const DD_MAX_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

/// Diagnostic lines retained for error context when dd fails.
const DD_DIAG_TAIL: usize = 8;

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

/// Optional-package tools get an actionable installation hint instead of a
/// bare not-found error.
fn map_optional_tool(program: &str, hint: &str, err: HalError) -> HalError {
    match err {
        HalError::CommandNotFound(_) => HalError::MissingTool {
            program: program.to_string(),
            hint: hint.to_string(),
        },
        other => other,
    }
}

fn output_failed(program: &str, output: &Output) -> HalError {
    // Non-zero exit carries the combined streams: gpart and the mkfs tools
    // report diagnostics on either.
    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    HalError::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        output: text,
    }
}

fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<Output> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

fn combined_text(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<String> {
    let output = output_with_timeout(program, cmd, timeout)?;
    if !output.status.success() {
        return Err(output_failed(program, &output));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn status_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<()> {
    let output = output_with_timeout(program, cmd, timeout)?;
    if !output.status.success() {
        return Err(output_failed(program, &output));
    }
    Ok(())
}

impl ProbeOps for FreebsdHal {
    fn geom_disk_list(&self, disk: Option<&str>) -> HalResult<String> {
        let mut cmd = Command::new("geom");
        cmd.args(["disk", "list"]);
        if let Some(disk) = disk {
            cmd.arg(disk);
        }
        combined_text("geom", &mut cmd, PROBE_TIMEOUT)
    }

    fn gpart_show(&self, disk: &str, with_labels: bool) -> HalResult<String> {
        let mut cmd = Command::new("gpart");
        cmd.arg("show");
        if with_labels {
            cmd.arg("-l");
        }
        cmd.arg("-p").arg(disk);
        combined_text("gpart", &mut cmd, PROBE_TIMEOUT)
    }

    fn diskinfo(&self, device: &str) -> HalResult<String> {
        let mut cmd = Command::new("diskinfo");
        cmd.arg(format!("/dev/{device}"));
        combined_text("diskinfo", &mut cmd, PROBE_TIMEOUT)
    }

    fn diskinfo_verbose(&self, device: &str) -> HalResult<String> {
        let mut cmd = Command::new("diskinfo");
        cmd.arg("-v").arg(format!("/dev/{device}"));
        combined_text("diskinfo", &mut cmd, PROBE_TIMEOUT)
    }

    fn fstyp(&self, device: &str) -> HalResult<String> {
        let mut cmd = Command::new("fstyp");
        cmd.arg(format!("/dev/{device}"));
        combined_text("fstyp", &mut cmd, PROBE_TIMEOUT)
    }

    fn file_probe(&self, device: &str) -> HalResult<String> {
        let mut cmd = Command::new("file");
        cmd.arg("-s").arg(format!("/dev/{device}"));
        combined_text("file", &mut cmd, PROBE_TIMEOUT)
    }

    fn mount_table(&self) -> HalResult<String> {
        let mut cmd = Command::new("mount");
        combined_text("mount", &mut cmd, PROBE_TIMEOUT)
    }

    fn smart_health(&self, device: &str) -> HalResult<String> {
        let mut cmd = Command::new("smartctl");
        cmd.arg("-H").arg(format!("/dev/{device}"));
        combined_text("smartctl", &mut cmd, SMART_TIMEOUT)
            .map_err(|e| map_optional_tool("smartctl", "pkg install smartmontools", e))
    }

    fn smart_attributes(&self, device: &str) -> HalResult<String> {
        let mut cmd = Command::new("smartctl");
        cmd.arg("-A").arg(format!("/dev/{device}"));
        combined_text("smartctl", &mut cmd, SMART_TIMEOUT)
            .map_err(|e| map_optional_tool("smartctl", "pkg install smartmontools", e))
    }

    fn smart_all(&self, device: &str) -> HalResult<String> {
        let mut cmd = Command::new("smartctl");
        cmd.arg("-a").arg(format!("/dev/{device}"));
        combined_text("smartctl", &mut cmd, SMART_TIMEOUT)
            .map_err(|e| map_optional_tool("smartctl", "pkg install smartmontools", e))
    }

    fn cam_identify(&self, device: &str) -> HalResult<String> {
        let mut cmd = Command::new("camcontrol");
        cmd.arg("identify").arg(device);
        combined_text("camcontrol", &mut cmd, PROBE_TIMEOUT)
    }
}

impl TableOps for FreebsdHal {
    fn gpart(&self, target: &str, op: GpartOp) -> HalResult<String> {
        let mut args: Vec<String> = Vec::new();
        match op {
            GpartOp::CreateTable { scheme } => {
                args.push("create".into());
                args.push("-s".into());
                args.push(scheme);
            }
            GpartOp::DestroyTable => {
                args.push("destroy".into());
                args.push("-F".into());
            }
            GpartOp::Add { part_type, size_mb } => {
                args.push("add".into());
                args.push("-t".into());
                args.push(part_type);
                args.push("-s".into());
                args.push(format!("{size_mb}M"));
            }
            GpartOp::Delete { index } => {
                args.push("delete".into());
                args.push("-i".into());
                args.push(index.to_string());
            }
            GpartOp::Resize { index, size_mb } => {
                args.push("resize".into());
                args.push("-i".into());
                args.push(index.to_string());
                args.push("-s".into());
                args.push(format!("{size_mb}M"));
            }
            GpartOp::SetAttr { attribute } => {
                args.push("set".into());
                args.push("-a".into());
                args.push(attribute);
            }
            GpartOp::UnsetAttr { attribute } => {
                args.push("unset".into());
                args.push("-a".into());
                args.push(attribute);
            }
        }
        args.push(target.to_string());

        log::info!("gpart {}", args.join(" "));

        let mut cmd = Command::new("gpart");
        cmd.args(&args);
        combined_text("gpart", &mut cmd, GPART_TIMEOUT)
    }
}

impl FormatOps for FreebsdHal {
    fn newfs_ufs(&self, device: &str) -> HalResult<()> {
        log::info!("newfs -U /dev/{device}");
        let mut cmd = Command::new("newfs");
        cmd.arg("-U").arg(format!("/dev/{device}"));
        status_with_timeout("newfs", &mut cmd, FORMAT_TIMEOUT)
    }

    fn newfs_msdos(&self, device: &str) -> HalResult<()> {
        log::info!("newfs_msdos -F 32 /dev/{device}");
        let mut cmd = Command::new("newfs_msdos");
        cmd.args(["-F", "32"]).arg(format!("/dev/{device}"));
        status_with_timeout("newfs_msdos", &mut cmd, FORMAT_TIMEOUT)
    }

    fn mke2fs(&self, device: &str, variant: &str) -> HalResult<()> {
        log::info!("mke2fs -t {variant} /dev/{device}");
        let mut cmd = Command::new("mke2fs");
        cmd.args(["-t", variant]).arg(format!("/dev/{device}"));
        status_with_timeout("mke2fs", &mut cmd, FORMAT_TIMEOUT)
            .map_err(|e| map_optional_tool("mke2fs", "pkg install e2fsprogs", e))
    }

    fn mkntfs(&self, device: &str) -> HalResult<()> {
        log::info!("mkntfs -f /dev/{device}");
        let mut cmd = Command::new("mkntfs");
        cmd.arg("-f").arg(format!("/dev/{device}"));
        status_with_timeout("mkntfs", &mut cmd, FORMAT_TIMEOUT)
            .map_err(|e| map_optional_tool("mkntfs", "pkg install fusefs-ntfs", e))
    }

    fn growfs(&self, mount_point: &str) -> HalResult<()> {
        log::info!("growfs -y {mount_point}");
        let mut cmd = Command::new("growfs");
        cmd.arg("-y").arg(mount_point);
        status_with_timeout("growfs", &mut cmd, FSRESIZE_TIMEOUT)
    }

    fn resize2fs(&self, device: &str, size_k: Option<u64>) -> HalResult<()> {
        let mut cmd = Command::new("resize2fs");
        cmd.arg(format!("/dev/{device}"));
        if let Some(size_k) = size_k {
            cmd.arg(format!("{size_k}K"));
        }
        log::info!("resize2fs /dev/{device} {:?}", size_k);
        status_with_timeout("resize2fs", &mut cmd, FSRESIZE_TIMEOUT)
            .map_err(|e| map_optional_tool("resize2fs", "pkg install e2fsprogs", e))
    }
}

/// Splits a diagnostic stream into lines on both `\r` and `\n`.
///
/// dd rewrites its progress line with carriage returns; waiting for `\n`
/// would buffer the whole transfer's progress into one line.
fn pump_diag_lines(stream: impl Read, tx: mpsc::Sender<io::Result<String>>) {
    let mut reader = BufReader::new(stream);
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                for &b in &buf[..n] {
                    if b == b'\r' || b == b'\n' {
                        if !pending.is_empty() {
                            let line = String::from_utf8_lossy(&pending).to_string();
                            pending.clear();
                            if tx.send(Ok(line)).is_err() {
                                return;
                            }
                        }
                    } else {
                        pending.push(b);
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(Ok(String::from_utf8_lossy(&pending).to_string()));
    }
}

impl CopyOps for FreebsdHal {
    fn dd_copy(
        &self,
        source: &str,
        dest: &str,
        block_size: u64,
        on_diag_line: &mut dyn FnMut(&str) -> bool,
    ) -> HalResult<()> {
        log::info!("dd if=/dev/{source} of=/dev/{dest} bs={block_size} conv=sync,noerror");

        let mut child = Command::new("dd")
            .arg(format!("if=/dev/{source}"))
            .arg(format!("of=/dev/{dest}"))
            .arg(format!("bs={block_size}"))
            .arg("conv=sync,noerror")
            .arg("status=progress")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| map_command_err("dd", e))?;

        let (tx, rx) = mpsc::channel::<io::Result<String>>();
        if let Some(stderr) = child.stderr.take() {
            std::thread::spawn(move || pump_diag_lines(stderr, tx));
        }

        // Keep a short tail of diagnostics for error context.
        let mut diag_tail: VecDeque<String> = VecDeque::with_capacity(DD_DIAG_TAIL);
        let mut push_tail = |line: &str, tail: &mut VecDeque<String>| {
            if tail.len() == DD_DIAG_TAIL {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        };

        let start = Instant::now();
        loop {
            if start.elapsed() > DD_MAX_TIMEOUT {
                let _ = child.kill();
                let _ = child.wait();
                return Err(HalError::CommandTimeout {
                    program: "dd".to_string(),
                    timeout_secs: DD_MAX_TIMEOUT.as_secs(),
                });
            }

            match rx.recv_timeout(Duration::from_millis(250)) {
                Ok(Ok(line)) => {
                    push_tail(&line, &mut diag_tail);
                    if !on_diag_line(&line) {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(HalError::Other("dd copy cancelled".to_string()));
                    }
                }
                Ok(Err(err)) => return Err(HalError::Io(err)),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    // Poll for process exit while waiting for output.
                    if let Some(status) = child.try_wait()? {
                        if !status.success() {
                            return Err(HalError::CommandFailed {
                                program: "dd".to_string(),
                                code: status.code(),
                                output: diag_tail.iter().cloned().collect::<Vec<_>>().join("\n"),
                            });
                        }
                        return Ok(());
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = match child
            .wait_timeout(Duration::from_secs(5))
            .map_err(HalError::Io)?
        {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(HalError::CommandTimeout {
                    program: "dd".to_string(),
                    timeout_secs: 5,
                });
            }
        };
        if !status.success() {
            return Err(HalError::CommandFailed {
                program: "dd".to_string(),
                code: status.code(),
                output: diag_tail.iter().cloned().collect::<Vec<_>>().join("\n"),
            });
        }
        Ok(())
    }

    fn sha256_digest(&self, device: &str) -> HalResult<String> {
        let mut cmd = Command::new("sha256");
        cmd.arg("-q").arg(format!("/dev/{device}"));
        let text = combined_text("sha256", &mut cmd, DIGEST_TIMEOUT)?;
        Ok(text.trim().to_string())
    }
}

impl SystemOps for FreebsdHal {
    fn ensure_root(&self) -> HalResult<()> {
        if nix::unistd::Uid::effective().is_root() {
            Ok(())
        } else {
            Err(HalError::NotRoot)
        }
    }
}
