use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use parking_lot::Mutex;

use charon_core::metrics::DropCounters;
use charon_core::queue::{EventQueue, PushOutcome};
use charon_core::region::{PinnedMemory, RegionRegistry};
use charon_core::wait::WaitOutcome;
use charon_isp::{IspEventSink, IspOps, IspPayloadKind, IspResponse, IspSignal, SensorOps};

use crate::control::{ControlCommand, ControlTicket, PendingControls};
use crate::CameraError;

/// One session serves at most this many concurrent openers (control,
/// config and frame consumers plus one spare).
pub(crate) const MAX_OPENERS: usize = 4;

/// Entries routed through the message queue to the config thread.
pub(crate) enum MessageEntry {
    /// Command issued by the in-process control path.
    Control {
        ticket: ControlTicket,
        cmd: ControlCommand,
    },
    /// Command issued by an external registered client.
    ClientRequest {
        ticket: ControlTicket,
        cmd: ControlCommand,
    },
    /// Controller-side hardware event.
    HardwareEvent(IspResponse),
    /// DSP-side hardware message.
    HardwareMessage(IspResponse),
}

/// Ready-frame notification: the bus addresses the hardware filled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameReady {
    pub y: u64,
    pub cbcr: u64,
}

/// Picture-ready notification; `None` means the snapshot completed
/// without a status body and the reader reports the sentinel values.
pub(crate) struct PictureReady(pub Option<PictureStatus>);

#[derive(Debug, Clone, Copy)]
pub(crate) struct PictureStatus {
    pub kind: u32,
    pub status: u32,
}

pub(crate) struct Lifecycle {
    pub open_count: usize,
    pub crop: Option<CropState>,
}

/// Crop metadata blob; capacity is fixed by the first set.
pub(crate) struct CropState {
    pub cap: usize,
    pub data: Vec<u8>,
}

pub(crate) struct Shared {
    pub isp: Arc<dyn IspOps>,
    pub sensor: Arc<dyn SensorOps>,
    pub pins: Arc<dyn PinnedMemory>,
    pub lifecycle: Mutex<Lifecycle>,
    pub post_proc: AtomicBool,
    pub registry: RegionRegistry,
    pub events: EventQueue<MessageEntry>,
    pub frames: EventQueue<FrameReady>,
    pub pictures: EventQueue<PictureReady>,
    pub pending: PendingControls,
    pub metrics: DropCounters,
}

impl Shared {
    pub fn new(
        isp: Arc<dyn IspOps>,
        sensor: Arc<dyn SensorOps>,
        pins: Arc<dyn PinnedMemory>,
        depth: usize,
    ) -> Self {
        Self {
            isp,
            sensor,
            pins,
            lifecycle: Mutex::new(Lifecycle {
                open_count: 0,
                crop: None,
            }),
            post_proc: AtomicBool::new(false),
            registry: RegionRegistry::new(),
            events: EventQueue::bounded("msg-event", depth),
            frames: EventQueue::bounded("prev-frame", depth),
            pictures: EventQueue::bounded("picture", depth),
            pending: PendingControls::default(),
            metrics: DropCounters::default(),
        }
    }
}

/// Attach one opener; the 0 -> 1 transition brings the hardware up.
pub(crate) fn open(shared: &Arc<Shared>) -> Result<(), CameraError> {
    let mut lifecycle = shared.lifecycle.lock();
    if lifecycle.open_count >= MAX_OPENERS {
        return Err(CameraError::ResourceExhausted);
    }
    if lifecycle.open_count == 0 {
        let sink: Arc<dyn IspEventSink> = shared.clone();
        shared.isp.init(sink)?;
        if let Err(err) = shared.sensor.init() {
            shared.isp.release();
            return Err(err.into());
        }
        shared.registry.clear();
        debug!("camera session opened, hardware initialized");
    }
    lifecycle.open_count += 1;
    Ok(())
}

/// Detach one opener; the 1 -> 0 transition tears everything down.
pub(crate) fn close(shared: &Shared) {
    let mut lifecycle = shared.lifecycle.lock();
    debug_assert!(lifecycle.open_count > 0);
    lifecycle.open_count -= 1;
    if lifecycle.open_count > 0 {
        return;
    }

    shared.isp.release();
    lifecycle.crop = None;
    shared.post_proc.store(false, Ordering::Relaxed);
    let regions = shared.registry.clear();
    let pending = shared.pending.outstanding();
    shared.pending.clear();
    let events = shared.events.drain().len();
    let pictures = shared.pictures.drain().len();
    let frames = shared.frames.drain().len();
    shared.sensor.release();
    debug!(
        "camera session closed: {regions} regions released, {pending} commands abandoned, \
         {events}+{frames}+{pictures} queue entries drained"
    );
}

/// Map a queue wait outcome onto the error taxonomy.
pub(crate) fn outcome<T>(outcome: WaitOutcome<T>) -> Result<T, CameraError> {
    match outcome {
        WaitOutcome::Ready(value) => Ok(value),
        WaitOutcome::Empty => Err(CameraError::Unavailable),
        WaitOutcome::TimedOut => Err(CameraError::Timeout),
        WaitOutcome::Cancelled => Err(CameraError::Interrupted),
    }
}

impl IspEventSink for Shared {
    // Interrupt/callback context: push, wake, and get out. A full queue
    // drops the notification and moves a counter; it never blocks the
    // producer and never propagates.
    fn isp_event(&self, signal: IspSignal, response: IspResponse) {
        if signal == IspSignal::Message {
            match response.kind {
                IspPayloadKind::Output1 | IspPayloadKind::Output2 => {
                    let ready = FrameReady {
                        y: response.phys.y,
                        cbcr: response.phys.cbcr,
                    };
                    if self.frames.offer(ready) == PushOutcome::Full {
                        self.metrics.frame_dropped();
                        warn!("frame queue full, dropping ready frame y=0x{:x}", ready.y);
                    }
                }
                IspPayloadKind::Snapshot => {
                    if !self.post_proc.load(Ordering::Relaxed)
                        && self.pictures.offer(PictureReady(None)) == PushOutcome::Full
                    {
                        self.metrics.picture_dropped();
                        warn!("picture queue full, dropping snapshot notification");
                    }
                }
                _ => {}
            }
        }

        let entry = match signal {
            IspSignal::Event => MessageEntry::HardwareEvent(response),
            IspSignal::Message => MessageEntry::HardwareMessage(response),
        };
        if self.events.offer(entry) == PushOutcome::Full {
            self.metrics.event_dropped();
            warn!("message queue full, dropping hardware notification");
        }
    }
}
