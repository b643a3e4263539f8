#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use mapsan::{ErrorCallback, MapFlags, MapsanRuntime, Side, Violation, ViolationKind};
    use spin::Lazy;

    static INIT_ONCE: Lazy<Mutex<()>> = Lazy::new(|| {
        {
            env_logger::init();
        };
        Mutex::new(())
    });

    const PC: usize = 0xbad0_cafe;
    const HOST: usize = 0x1000;
    const DEVICE: usize = 0x7b80_0000_1000;

    fn runtime() -> MapsanRuntime {
        drop(INIT_ONCE.lock().unwrap());
        MapsanRuntime::builder()
            .error_callback(ErrorCallback::new(Box::new(|_| ())))
            .build()
            .unwrap()
    }

    // Alloc|Associate without To: the device copy was never given a value.
    #[test]
    fn test_associate_without_to_flags_device_read() {
        let rt = runtime();
        rt.notify_mapping(
            MapFlags::ALLOC | MapFlags::ASSOCIATE,
            HOST,
            DEVICE,
            0x4,
            PC,
            Some("a"),
        );
        rt.check_access(DEVICE, 0x4, PC);

        let violations = rt.violations();
        assert_eq!(violations.len(), 1);
        match &violations[0].violation {
            Violation::Inconsistency {
                addr,
                len,
                side,
                name,
            } => {
                assert_eq!(*addr, DEVICE);
                assert_eq!(*len, 4);
                assert_eq!(*side, Side::Device);
                assert_eq!(name.as_deref(), Some("a"));
            }
            other => panic!("unexpected violation: {other:?}"),
        }
    }

    #[test]
    fn test_to_makes_device_read_clean() {
        let rt = runtime();
        rt.notify_mapping(
            MapFlags::ALLOC | MapFlags::ASSOCIATE | MapFlags::TO,
            HOST,
            DEVICE,
            0x4,
            PC,
            None,
        );
        rt.check_access(DEVICE, 0x4, PC);
        assert_eq!(rt.violation_count(), 0);
    }

    // One report per invalid covered cell: a To over the first cell leaves
    // only the second cell of the mapping untrusted.
    #[test]
    fn test_one_report_per_invalid_cell() {
        let rt = runtime();
        rt.notify_mapping(
            MapFlags::ALLOC | MapFlags::ASSOCIATE,
            HOST,
            DEVICE,
            0x10,
            PC,
            None,
        );
        rt.notify_mapping(MapFlags::TO, HOST, DEVICE, 0x8, PC, None);
        rt.check_access(DEVICE, 0x10, PC);

        let violations = rt.violations();
        assert_eq!(violations.len(), 1);
        match &violations[0].violation {
            Violation::Inconsistency { addr, .. } => assert_eq!(*addr, DEVICE + 0x8),
            other => panic!("unexpected violation: {other:?}"),
        }
    }

    #[test]
    fn test_check_is_idempotent_on_valid_range() {
        let rt = runtime();
        rt.notify_mapping(
            MapFlags::ALLOC | MapFlags::ASSOCIATE | MapFlags::TO,
            HOST,
            DEVICE,
            0x20,
            PC,
            None,
        );
        rt.check_access(DEVICE, 0x20, PC);
        rt.check_access(DEVICE, 0x20, PC);
        assert_eq!(rt.violation_count(), 0);
        // checks read the shadow; the mapping is unchanged
        assert!(rt.mapping_of(Side::Device, DEVICE).is_some());
    }

    #[test]
    fn test_untracked_access_is_ignored() {
        let rt = runtime();
        rt.check_access(0xdead_0000, 0x8, PC);
        assert_eq!(rt.violation_count(), 0);
    }

    // The host copy is trusted at association time, so host reads of a
    // map(to:)-style region stay clean with no From.
    #[test]
    fn test_host_read_without_device_write_is_clean() {
        let rt = runtime();
        rt.notify_mapping(
            MapFlags::ALLOC | MapFlags::ASSOCIATE | MapFlags::TO,
            HOST,
            DEVICE,
            0x10,
            PC,
            None,
        );
        rt.notify_mapping(MapFlags::DISASSOCIATE | MapFlags::RELEASE, HOST, DEVICE, 0x10, PC, None);
        assert_eq!(rt.violation_count(), 0);
    }

    // A device write invalidates the host copy until a From refreshes it.
    #[test]
    fn test_device_write_then_host_read_without_from() {
        let rt = runtime();
        rt.notify_mapping(
            MapFlags::ALLOC | MapFlags::ASSOCIATE | MapFlags::TO,
            HOST,
            DEVICE,
            0x8,
            PC,
            Some("result"),
        );
        rt.record_write(DEVICE, 0x8, PC);
        rt.notify_mapping(MapFlags::DISASSOCIATE, HOST, DEVICE, 0x8, PC, None);

        rt.check_access(HOST, 0x8, PC);
        let violations = rt.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind(), ViolationKind::Inconsistency);
        match &violations[0].violation {
            Violation::Inconsistency { side, name, .. } => {
                assert_eq!(*side, Side::Host);
                assert_eq!(name.as_deref(), Some("result"));
            }
            other => panic!("unexpected violation: {other:?}"),
        }
    }

    #[test]
    fn test_from_after_device_write_makes_host_read_clean() {
        let rt = runtime();
        rt.notify_mapping(
            MapFlags::ALLOC | MapFlags::ASSOCIATE | MapFlags::TO,
            HOST,
            DEVICE,
            0x8,
            PC,
            None,
        );
        rt.record_write(DEVICE, 0x8, PC);
        rt.notify_mapping(MapFlags::FROM | MapFlags::DISASSOCIATE, HOST, DEVICE, 0x8, PC, None);
        rt.check_access(HOST, 0x8, PC);
        assert_eq!(rt.violation_count(), 0);
    }

    // Re-association of a fresh device buffer over the same host range must
    // not inherit the old buffer's validity.
    #[test]
    fn test_reassociation_resets_device_validity() {
        let rt = runtime();
        rt.notify_mapping(
            MapFlags::ALLOC | MapFlags::ASSOCIATE | MapFlags::TO,
            HOST,
            DEVICE,
            0x8,
            PC,
            None,
        );
        rt.notify_mapping(MapFlags::DISASSOCIATE | MapFlags::RELEASE, HOST, DEVICE, 0x8, PC, None);
        rt.notify_mapping(
            MapFlags::ALLOC | MapFlags::ASSOCIATE,
            HOST,
            0x7b80_0000_9000,
            0x8,
            PC,
            None,
        );
        rt.check_access(0x7b80_0000_9000, 0x8, PC);
        assert_eq!(rt.violation_count(), 1);
    }
}
