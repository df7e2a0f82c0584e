use std::sync::Arc;
use std::thread;
use std::time::Duration;

use charon::prelude::*;

fn main() -> Result<(), CameraError> {
    env_logger::init();

    let isp = Arc::new(LoopbackIsp::new());
    let pins = Arc::new(LoopbackPins::new());
    pins.map(6, 0x9000_0000, 0x4_0000);

    let device = CameraDevice::new(isp.clone(), Arc::new(StubSensor::new("imx074")), pins);
    let client = Arc::new(device.open()?);

    client.register_buffer(RegionInfo {
        class: BufferClass::MainImage,
        vaddr: 0x4000,
        fd: 6,
        y_off: 0,
        cbcr_off: 0x2_0000,
        active: true,
    })?;
    client.set_post_processing(true);
    client.set_crop(&[0, 0, 8, 8])?;

    // Config thread: answer commands, hand snapshots to post-processing.
    let stop = CancelToken::new();
    let config_thread = {
        let config = client.clone();
        let stop = stop.clone();
        thread::spawn(move || loop {
            match config.next_event(Wait::Cancellable(stop.clone())) {
                Ok(ConfigEvent::Control { ticket, cmd }) => {
                    println!("handling command 0x{:x}", cmd.op);
                    config.control_done(
                        ticket,
                        Some(ControlResponse {
                            op: cmd.op,
                            status: 0,
                            payload: cmd.payload,
                        }),
                    );
                }
                Ok(ConfigEvent::Hardware {
                    body: HardwareBody::Snapshot { main: Some(main) },
                    ..
                }) => {
                    println!("post-processing main image at 0x{:x}", main.vaddr);
                    config
                        .post_processing_done(1, 0)
                        .expect("post-processing enabled");
                }
                Ok(_) => {}
                Err(_) => break,
            }
        })
    };

    let response = client.submit_control(
        ControlCommand {
            op: 0x10,
            payload: vec![1, 0, 0, 0],
        },
        Wait::Timeout(Duration::from_secs(2)),
    )?;
    println!("command answered with status {}", response.status);

    // Take the picture: the loopback ISP reports the snapshot finished.
    isp.emit(
        IspSignal::Message,
        IspResponse {
            kind: IspPayloadKind::Snapshot,
            ..Default::default()
        },
    );
    let picture = client.get_picture(8, Wait::Timeout(Duration::from_secs(2)))?;
    println!(
        "picture ready: kind={} status={} crop={:?}",
        picture.kind, picture.status, picture.crop
    );

    stop.cancel();
    config_thread.join().expect("config thread");
    Ok(())
}
