use std::sync::Arc;
use std::thread;
use std::time::Duration;

use charon::prelude::*;

struct Rig {
    isp: Arc<LoopbackIsp>,
    pins: Arc<LoopbackPins>,
    device: CameraDevice,
}

fn rig() -> Rig {
    let isp = Arc::new(LoopbackIsp::new());
    let pins = Arc::new(LoopbackPins::new());
    let device = CameraDevice::new(
        isp.clone(),
        Arc::new(StubSensor::new("mt9p012")),
        pins.clone(),
    );
    Rig { isp, pins, device }
}

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn command_round_trips_through_the_config_thread() {
    let rig = rig();
    let client = Arc::new(rig.device.open().expect("open"));

    let config = client.clone();
    let config_thread = thread::spawn(move || {
        let event = config.next_event(Wait::Timeout(WAIT)).expect("event");
        match event {
            ConfigEvent::Control { ticket, cmd } => {
                assert_eq!(cmd.op, 0x11);
                assert_eq!(cmd.payload, vec![1, 2, 3, 4]);
                config.control_done(
                    ticket,
                    Some(ControlResponse {
                        op: cmd.op,
                        status: 0,
                        payload: b"response".to_vec(),
                    }),
                );
            }
            other => panic!("expected a control command, got {other:?}"),
        }
    });

    let response = client
        .submit_control(
            ControlCommand {
                op: 0x11,
                payload: vec![1, 2, 3, 4],
            },
            Wait::Timeout(WAIT),
        )
        .expect("response");
    config_thread.join().expect("join");

    assert_eq!(response.op, 0x11);
    assert_eq!(response.status, 0);
    // Bounded by the request buffer length.
    assert_eq!(response.payload, b"resp".to_vec());
}

#[test]
fn client_requests_are_tagged_separately() {
    let rig = rig();
    let client = Arc::new(rig.device.open().expect("open"));

    let config = client.clone();
    let config_thread = thread::spawn(move || {
        match config.next_event(Wait::Timeout(WAIT)).expect("event") {
            ConfigEvent::ClientRequest { ticket, .. } => {
                config.control_done(
                    ticket,
                    Some(ControlResponse {
                        op: 0x22,
                        status: 1,
                        payload: Vec::new(),
                    }),
                );
            }
            other => panic!("expected a client request, got {other:?}"),
        }
    });

    let response = client
        .submit_client_request(
            ControlCommand {
                op: 0x22,
                payload: Vec::new(),
            },
            Wait::Timeout(WAIT),
        )
        .expect("response");
    config_thread.join().expect("join");
    assert_eq!(response.status, 1);
}

#[test]
fn completion_without_body_yields_the_sentinel() {
    let rig = rig();
    let client = Arc::new(rig.device.open().expect("open"));

    let config = client.clone();
    let config_thread = thread::spawn(move || {
        match config.next_event(Wait::Timeout(WAIT)).expect("event") {
            ConfigEvent::Control { ticket, .. } => config.control_done(ticket, None),
            other => panic!("expected a control command, got {other:?}"),
        }
    });

    let response = client
        .submit_control(
            ControlCommand {
                op: 0x33,
                payload: Vec::new(),
            },
            Wait::Timeout(WAIT),
        )
        .expect("degraded response");
    config_thread.join().expect("join");
    assert_eq!(response.op, RESPONSE_NONE);
    assert_eq!(response.status, RESPONSE_NONE);
    assert!(response.payload.is_empty());
}

#[test]
fn timed_out_command_leaves_no_stale_response_behind() {
    let rig = rig();
    let client = Arc::new(rig.device.open().expect("open"));

    let err = client
        .submit_control(
            ControlCommand {
                op: 0x44,
                payload: Vec::new(),
            },
            Wait::Timeout(Duration::from_millis(30)),
        )
        .expect_err("no config thread is running");
    assert!(matches!(err, CameraError::Timeout));

    // The command is still on the message queue; a late answer must be
    // dropped and counted, not delivered to anyone.
    let ticket = match client.next_event(Wait::Immediate).expect("queued command") {
        ConfigEvent::Control { ticket, .. } => ticket,
        other => panic!("expected the timed-out command, got {other:?}"),
    };
    client.control_done(
        ticket,
        Some(ControlResponse {
            op: 0x44,
            status: 9,
            payload: Vec::new(),
        }),
    );
    assert_eq!(client.metrics().stale_responses(), 1);

    // The next submission gets its own response, not the stale one.
    let config = client.clone();
    let config_thread = thread::spawn(move || {
        match config.next_event(Wait::Timeout(WAIT)).expect("event") {
            ConfigEvent::Control { ticket, cmd } => config.control_done(
                ticket,
                Some(ControlResponse {
                    op: cmd.op,
                    status: 0,
                    payload: Vec::new(),
                }),
            ),
            other => panic!("expected a control command, got {other:?}"),
        }
    });
    let response = client
        .submit_control(
            ControlCommand {
                op: 0x55,
                payload: Vec::new(),
            },
            Wait::Timeout(WAIT),
        )
        .expect("response");
    config_thread.join().expect("join");
    assert_eq!(response.op, 0x55);
    assert_eq!(response.status, 0);
}

#[test]
fn unbounded_wait_is_cancellable() {
    let rig = rig();
    let client = Arc::new(rig.device.open().expect("open"));
    let token = CancelToken::new();

    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            token.cancel();
        })
    };

    let err = client
        .submit_control(
            ControlCommand {
                op: 0x66,
                payload: Vec::new(),
            },
            Wait::Cancellable(token),
        )
        .expect_err("cancelled");
    assert!(matches!(err, CameraError::Interrupted));
    canceller.join().expect("join");
}

#[test]
fn message_queue_is_fifo_event_before_command() {
    let rig = rig();
    let client = Arc::new(rig.device.open().expect("open"));

    assert!(rig.isp.emit(
        IspSignal::Event,
        IspResponse {
            kind: IspPayloadKind::General,
            evt: EventEnvelope {
                origin: 1,
                msg_id: 42,
                data: b"evt".to_vec(),
            },
            ..Default::default()
        },
    ));
    assert!(client.event_pending());

    let submitter = {
        let client = client.clone();
        thread::spawn(move || {
            client.submit_control(
                ControlCommand {
                    op: 0x77,
                    payload: Vec::new(),
                },
                Wait::Timeout(WAIT),
            )
        })
    };

    // The event was pushed first, so it comes out first.
    match client.next_event(Wait::Timeout(WAIT)).expect("first entry") {
        ConfigEvent::Hardware {
            signal,
            msg_id,
            body: HardwareBody::General(data),
            ..
        } => {
            assert_eq!(signal, IspSignal::Event);
            assert_eq!(msg_id, 42);
            assert_eq!(data, b"evt".to_vec());
        }
        other => panic!("expected the hardware event first, got {other:?}"),
    }

    match client.next_event(Wait::Timeout(WAIT)).expect("second entry") {
        ConfigEvent::Control { ticket, cmd } => {
            assert_eq!(cmd.op, 0x77);
            client.control_done(
                ticket,
                Some(ControlResponse {
                    op: cmd.op,
                    status: 0,
                    payload: Vec::new(),
                }),
            );
        }
        other => panic!("expected the command second, got {other:?}"),
    }
    submitter.join().expect("join").expect("response");
}

#[test]
fn stats_messages_resolve_and_consume_the_region() {
    let rig = rig();
    let client = rig.device.open().expect("open");

    rig.pins.map(7, 0x9000_0000, 0x1000);
    client
        .register_buffer(RegionInfo {
            class: BufferClass::StatsAf,
            vaddr: 0x5000,
            fd: 7,
            y_off: 0,
            cbcr_off: 0,
            active: true,
        })
        .expect("register");

    let stats_message = IspResponse {
        kind: IspPayloadKind::StatsAf,
        phys: IspPhys {
            y: 0,
            cbcr: 0,
            stats: 0x9000_0000,
        },
        ..Default::default()
    };
    rig.isp.emit(IspSignal::Message, stats_message.clone());

    match client.next_event(Wait::Timeout(WAIT)).expect("stats event") {
        ConfigEvent::Hardware {
            body:
                HardwareBody::Stats {
                    kind: StatsKind::Af,
                    buf: Some(buf),
                },
            ..
        } => {
            assert_eq!(buf.vaddr, 0x5000);
            assert_eq!(buf.fd, 7);
        }
        other => panic!("expected resolved stats, got {other:?}"),
    }

    // The region is software-owned now; the same address resolves to
    // nothing until the buffer is handed back.
    rig.isp.emit(IspSignal::Message, stats_message);
    match client.next_event(Wait::Timeout(WAIT)).expect("stats event") {
        ConfigEvent::Hardware {
            body: HardwareBody::Stats { buf: None, .. },
            ..
        } => {}
        other => panic!("expected an unresolved stats event, got {other:?}"),
    }

    client
        .put_stats_buffer(0x5000, 7, StatsKind::Af)
        .expect("release");
    let released = rig.isp.calls().into_iter().any(|call| {
        matches!(
            call,
            IspCall::Config {
                cmd: IspConfig {
                    op: IspConfigOp::StatsAfBufRelease,
                    ..
                },
                data: ConfigData::PhysAddr(0x9000_0000),
            }
        )
    });
    assert!(released);
}

#[test]
fn snapshot_event_carries_the_main_image_when_post_processing() {
    let rig = rig();
    let client = rig.device.open().expect("open");

    rig.pins.map(8, 0xa000_0000, 0x1000);
    client
        .register_buffer(RegionInfo {
            class: BufferClass::MainImage,
            vaddr: 0x6000,
            fd: 8,
            y_off: 0,
            cbcr_off: 0x200,
            active: true,
        })
        .expect("register");
    client.set_post_processing(true);

    rig.isp.emit(
        IspSignal::Message,
        IspResponse {
            kind: IspPayloadKind::Snapshot,
            ..Default::default()
        },
    );

    match client.next_event(Wait::Timeout(WAIT)).expect("snapshot") {
        ConfigEvent::Hardware {
            body: HardwareBody::Snapshot { main: Some(main) },
            ..
        } => {
            assert_eq!(main.vaddr, 0x6000);
            assert_eq!(main.cbcr_off, 0x200);
            assert!(!main.raw);
        }
        other => panic!("expected a snapshot with a main image, got {other:?}"),
    }
    // Post-processing owns the snapshot; nothing was queued for the
    // picture reader.
    assert!(matches!(
        client.get_picture(0, Wait::Immediate),
        Err(CameraError::Unavailable)
    ));
}

#[test]
fn snapshot_event_falls_back_to_the_raw_main_image() {
    let rig = rig();
    let client = rig.device.open().expect("open");

    rig.pins.map(9, 0xb000_0000, 0x1000);
    client
        .register_buffer(RegionInfo {
            class: BufferClass::RawMainImage,
            vaddr: 0x7000,
            fd: 9,
            y_off: 0,
            cbcr_off: 0,
            active: true,
        })
        .expect("register");
    client.set_post_processing(true);

    rig.isp.emit(
        IspSignal::Message,
        IspResponse {
            kind: IspPayloadKind::Snapshot,
            ..Default::default()
        },
    );

    match client.next_event(Wait::Timeout(WAIT)).expect("snapshot") {
        ConfigEvent::Hardware {
            body: HardwareBody::Snapshot { main: Some(main) },
            ..
        } => {
            assert_eq!(main.vaddr, 0x7000);
            assert!(main.raw);
        }
        other => panic!("expected the raw main image, got {other:?}"),
    }
}
