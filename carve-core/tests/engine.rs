//! End-to-end engine workflows against the recording HAL.

use carve_core::{
    copy, history::OperationHistory, list_disks, queue::BatchQueue, resize, BatchKind, BatchStatus,
    CopyEndpoint, EngineError, FormatFs, FsKind, PartitionRef, Scheme,
};
use carve_hal::{FakeHal, Operation};

const GEOM_FIXTURE: &str = "\
Geom name: ada0
Providers:
1. Name: ada0
   Mediasize: 500107862016 (466G)
   Sectorsize: 512
   descr: Samsung SSD 860
   ident: S3Z9NB0K123456
";

const GPART_FIXTURE: &str = "\
=>       40  976773088    ada0  GPT  (466G)
         40     532480  ada0p1  efi  (260M)
     532520  204800000  ada0p2  freebsd-ufs  (97G)
  204800040  204800000  ada0p3  freebsd-ufs  (97G)
  409600040  567173088          - free -  (270G)
";

fn scripted_hal() -> FakeHal {
    let hal = FakeHal::new();
    hal.push_output("geom", GEOM_FIXTURE);
    hal.push_output("gpart show", GPART_FIXTURE);
    for _ in 0..3 {
        hal.push_output("fstyp", "ufs\n");
        hal.push_output("mount", "/dev/ada0p2 on / (ufs, local, soft-updates)\n");
    }
    hal
}

#[test]
fn rescan_then_resize_respects_snapshot_bounds() {
    let hal = scripted_hal();
    let disks = list_disks(&hal).unwrap();
    let disk = &disks[0];
    assert_eq!(disk.scheme, Scheme::Gpt);
    assert!(disk.layout_is_consistent());
    assert_eq!(disk.partitions[1].fs, FsKind::Ufs);
    assert_eq!(disk.partitions[1].mount_point.as_deref(), Some("/"));

    // p2 may grow only to p3's start.
    let max = resize::max_resize_sectors(disk, &disk.partitions[1]);
    assert_eq!(max, 204_800_040 - 532_520);

    // Within bounds: runs the tool. Out of bounds: rejected locally.
    let target = PartitionRef::new("ada0", 2);
    let before = hal.operation_count();
    resize::resize_partition_checked(&hal, disk, &disk.partitions[1], &target, max).unwrap();
    assert_eq!(hal.operation_count(), before + 1);

    let err = resize::resize_partition_checked(&hal, disk, &disk.partitions[1], &target, max + 1)
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(hal.operation_count(), before + 1);
}

#[test]
fn batch_workflow_creates_formats_and_copies() {
    let hal = FakeHal::new();
    let queue = BatchQueue::new();

    queue.add(BatchKind::Create {
        disk: "ada0".to_string(),
        part_type: "freebsd-ufs".to_string(),
        size_bytes: 64 * 1024 * 1024,
    });
    queue.add(BatchKind::Format {
        device: "ada0p4".to_string(),
        fs: FormatFs::Ufs,
    });
    queue.add(BatchKind::Copy {
        source: CopyEndpoint::new("ada0p2", 1_000_000),
        dest: CopyEndpoint::new("ada0p4", 2_000_000),
    });

    let mut descriptions = Vec::new();
    let mut cb = |_current: usize, _total: usize, desc: &str| {
        descriptions.push(desc.to_string());
    };
    let summary = queue.execute_all(&hal, true, Some(&mut cb)).unwrap();
    assert_eq!(summary.completed, 3);
    assert_eq!(descriptions.len(), 3);

    assert!(hal.has_operation(|op| matches!(op, Operation::Gpart { .. })));
    assert!(hal.has_operation(|op| matches!(op, Operation::Format { .. })));
    assert!(hal.has_operation(|op| matches!(op, Operation::DdCopy { .. })));
    assert!(queue.operations().iter().all(|op| op.status == BatchStatus::Completed));
}

#[test]
fn history_tracks_a_batch_session_and_undoes_the_tail() {
    let hal = FakeHal::new();
    let history = OperationHistory::new();
    let created = PartitionRef::new("ada0", 4);

    history.record_create(&created, 64 * 1024 * 1024, "freebsd-ufs");
    history.record_format("ada0p4", "unknown", "ufs");

    // The format is the cursor entry and is not reversible.
    assert!(!history.can_undo());

    // A fresh reversible entry takes over the cursor.
    history.record_resize(&created, 64 * 1024 * 1024, 128 * 1024 * 1024);
    assert!(history.can_undo());

    let description = history.undo(&hal).unwrap();
    assert!(description.contains("Resized"));
    assert!(hal.has_operation(|op| matches!(
        op,
        Operation::Gpart { op, .. } if op.contains("Resize") && op.contains("64")
    )));
    assert!(history.can_redo());
}

#[test]
fn move_between_disks_reports_cleanup_failures_distinctly() {
    let hal = FakeHal::new();
    hal.push_output("diskinfo", "/dev/ada0p2\t512\t104857600000\t204800000");
    hal.push_output("diskinfo", "/dev/ada1p1\t512\t104857600000\t204800000");
    hal.fail_next("gpart", "gpart: Device busy");

    let err = copy::move_partition(
        &hal,
        &PartitionRef::new("ada0", 2),
        &PartitionRef::new("ada1", 1),
        None,
    )
    .unwrap_err();

    // The copy ran; only the source deletion failed.
    assert!(hal.has_operation(|op| matches!(op, Operation::DdCopy { .. })));
    match err {
        EngineError::Consistency { succeeded, failed } => {
            assert!(succeeded.contains("ada0p2"));
            assert!(failed.contains("ada0p2"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn copy_verification_uses_content_digests() {
    let hal = FakeHal::new();
    hal.push_output("sha256", "deadbeef");
    hal.push_output("sha256", "deadbeef");
    copy::verify_partition_copy(&hal, "ada0p2", "ada1p1").unwrap();

    hal.push_output("sha256", "deadbeef");
    hal.push_output("sha256", "cafef00d");
    let err = copy::verify_partition_copy(&hal, "ada0p2", "ada1p1").unwrap_err();
    assert!(matches!(err, EngineError::VerifyMismatch { .. }));
}
