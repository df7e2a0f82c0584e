use std::sync::Arc;
use std::thread;
use std::time::Duration;

use charon::prelude::*;

const FRAMES: usize = 8;

fn main() -> Result<(), CameraError> {
    env_logger::init();

    let isp = Arc::new(LoopbackIsp::new());
    let pins = Arc::new(LoopbackPins::new());
    for (fd, paddr) in [(3, 0x8000_0000u64), (4, 0x8010_0000)] {
        pins.map(fd, paddr, 0x1000);
    }

    let device = CameraDevice::new(isp.clone(), Arc::new(StubSensor::new("mt9p012")), pins);
    let client = Arc::new(device.open()?);
    println!("opened {}", client.sensor_info().name);

    for (fd, vaddr) in [(3, 0x1000u64), (4, 0x2000)] {
        client.register_buffer(RegionInfo {
            class: BufferClass::Output2,
            vaddr,
            fd,
            y_off: 0,
            cbcr_off: 0x100,
            active: true,
        })?;
    }

    let axi = client.configure_axi(IspConfig::bare(IspConfigOp::AxiOut2))?;
    println!("programmed output path 2 with {} buffers", axi.bufnum2);
    client.enable_isp(&EngineCommand::new("pixel-pipe"))?;

    // Config thread: drain the message queue until told to stop.
    let stop = CancelToken::new();
    let config_thread = {
        let config = client.clone();
        let stop = stop.clone();
        thread::spawn(move || loop {
            match config.next_event(Wait::Cancellable(stop.clone())) {
                Ok(ConfigEvent::Hardware { msg_id, .. }) => {
                    println!("config thread saw hardware message {msg_id}");
                }
                Ok(_) => {}
                Err(_) => break,
            }
        })
    };

    // Stand-in for the interrupt path: the two buffers fill in turn.
    let producer = {
        let isp = isp.clone();
        thread::spawn(move || {
            for i in 0..FRAMES {
                let paddr = 0x8000_0000u64 + (i as u64 % 2) * 0x10_0000;
                isp.emit(
                    IspSignal::Message,
                    IspResponse {
                        kind: IspPayloadKind::Output2,
                        evt: EventEnvelope {
                            origin: 0,
                            msg_id: i as u32,
                            data: Vec::new(),
                        },
                        phys: IspPhys {
                            y: paddr,
                            cbcr: paddr + 0x100,
                            stats: 0,
                        },
                        extra: Vec::new(),
                    },
                );
                thread::sleep(Duration::from_millis(5));
            }
        })
    };

    let mut resolved = 0;
    for _ in 0..FRAMES {
        let delivery = client.get_frame(0, Wait::Timeout(Duration::from_secs(2)))?;
        match delivery.frame {
            Some(frame) => {
                resolved += 1;
                println!(
                    "#{resolved:02} frame vaddr=0x{:x} fd={}",
                    frame.vaddr, frame.fd
                );
                client.put_frame_buffer(&frame)?;
            }
            None => println!("frame with no registered buffer, skipped"),
        }
    }

    producer.join().expect("producer");
    stop.cancel();
    config_thread.join().expect("config thread");
    client.disable_isp(&EngineCommand::new("pixel-pipe"))?;

    let metrics = device.metrics();
    println!(
        "done: {resolved}/{FRAMES} frames resolved, dropped events={} frames={}",
        metrics.dropped_events(),
        metrics.dropped_frames()
    );
    Ok(())
}
