use std::sync::Arc;
use std::time::Duration;

use charon::prelude::*;

struct Rig {
    isp: Arc<LoopbackIsp>,
    pins: Arc<LoopbackPins>,
    sensor: Arc<StubSensor>,
    device: CameraDevice,
}

fn rig() -> Rig {
    let isp = Arc::new(LoopbackIsp::new());
    let pins = Arc::new(LoopbackPins::new());
    let sensor = Arc::new(StubSensor::new("mt9p012"));
    let device = CameraDevice::new(isp.clone(), sensor.clone(), pins.clone());
    Rig {
        isp,
        pins,
        sensor,
        device,
    }
}

fn frame_info(class: BufferClass, vaddr: u64, fd: i32) -> RegionInfo {
    RegionInfo {
        class,
        vaddr,
        fd,
        y_off: 0,
        cbcr_off: 0x100,
        active: true,
    }
}

#[test]
fn four_openers_allowed_fifth_rejected() {
    let rig = rig();
    let clients: Vec<_> = (0..4).map(|_| rig.device.open().expect("open")).collect();
    assert_eq!(rig.device.openers(), 4);
    assert!(matches!(
        rig.device.open(),
        Err(CameraError::ResourceExhausted)
    ));
    drop(clients);
    assert_eq!(rig.device.openers(), 0);
}

#[test]
fn hardware_comes_up_once_and_down_once() {
    let rig = rig();
    let first = rig.device.open().expect("open");
    let second = rig.device.open().expect("open");
    let inits = rig
        .isp
        .calls()
        .iter()
        .filter(|c| matches!(c, IspCall::Init))
        .count();
    assert_eq!(inits, 1);

    drop(second);
    let releases = rig
        .isp
        .calls()
        .iter()
        .filter(|c| matches!(c, IspCall::Release))
        .count();
    assert_eq!(releases, 0);

    drop(first);
    let releases = rig
        .isp
        .calls()
        .iter()
        .filter(|c| matches!(c, IspCall::Release))
        .count();
    assert_eq!(releases, 1);
}

#[test]
fn isp_init_failure_leaves_session_closed() {
    let rig = rig();
    rig.isp.set_init_failure(true);
    assert!(matches!(rig.device.open(), Err(CameraError::Hardware(_))));
    assert_eq!(rig.device.openers(), 0);

    rig.isp.set_init_failure(false);
    let client = rig.device.open().expect("open after recovery");
    assert_eq!(rig.device.openers(), 1);
    drop(client);
}

#[test]
fn sensor_init_failure_unwinds_the_isp() {
    let rig = rig();
    rig.sensor.set_init_failure(true);
    assert!(matches!(rig.device.open(), Err(CameraError::Hardware(_))));
    assert_eq!(rig.device.openers(), 0);
    // The engine was brought up and then torn back down.
    assert!(rig.isp.calls().iter().any(|c| matches!(c, IspCall::Init)));
    assert!(rig.isp.calls().iter().any(|c| matches!(c, IspCall::Release)));
}

#[test]
fn last_close_drains_queues_and_releases_regions() {
    let rig = rig();
    let client = rig.device.open().expect("open");

    rig.pins.map(5, 0x8000_0000, 0x1000);
    rig.pins.map(6, 0x8100_0000, 0x1000);
    client
        .register_buffer(frame_info(BufferClass::Output2, 0x1000, 5))
        .expect("register frame");
    client
        .register_buffer(RegionInfo {
            class: BufferClass::StatsAf,
            vaddr: 0x2000,
            fd: 6,
            y_off: 0,
            cbcr_off: 0,
            active: true,
        })
        .expect("register stats");
    assert_eq!(rig.pins.outstanding(), 2);

    // Leave entries on every queue.
    rig.isp.emit(
        IspSignal::Message,
        IspResponse {
            kind: IspPayloadKind::Output2,
            phys: IspPhys {
                y: 0x8000_0000,
                cbcr: 0x8000_0100,
                stats: 0,
            },
            ..Default::default()
        },
    );
    rig.isp.emit(
        IspSignal::Message,
        IspResponse {
            kind: IspPayloadKind::Snapshot,
            ..Default::default()
        },
    );
    assert!(client.frame_pending());

    drop(client);
    assert_eq!(rig.pins.outstanding(), 0);

    // A fresh opener starts from an empty session.
    let client = rig.device.open().expect("reopen");
    assert!(!client.frame_pending());
    assert!(matches!(
        client.next_event(Wait::Immediate),
        Err(CameraError::Unavailable)
    ));
    assert!(matches!(
        client.get_frame(0, Wait::Immediate),
        Err(CameraError::Unavailable)
    ));
    assert!(matches!(
        client.get_picture(0, Wait::Timeout(Duration::from_millis(20))),
        Err(CameraError::Timeout)
    ));
}

#[test]
fn sensor_info_is_passed_through() {
    let rig = rig();
    assert_eq!(rig.device.sensor_info().name, "mt9p012");
    let client = rig.device.open().expect("open");
    assert_eq!(client.sensor_info().name, "mt9p012");
    assert_eq!(client.sensor_config(b"gain=4").expect("config"), b"gain=4");
}

#[test]
fn notifications_after_close_are_not_delivered() {
    let rig = rig();
    let client = rig.device.open().expect("open");
    drop(client);
    // The sink is gone with the release; the loopback reports no target.
    assert!(!rig.isp.emit(IspSignal::Event, IspResponse::default()));
}
