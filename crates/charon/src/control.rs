use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;
use parking_lot::Mutex;

use charon_core::queue::{Completer, CompletionWaiter, PushOutcome, completion};
use charon_core::region::BufferClass;
use charon_core::wait::{Wait, WaitOutcome};
use charon_isp::{EventEnvelope, IspPayloadKind, IspResponse, IspSignal};

use crate::session::{self, MessageEntry};
use crate::{CameraClient, CameraError};

/// Sentinel reported when a command completed without a status body.
pub const RESPONSE_NONE: u32 = 0xFFFF;

/// Correlation ticket tying a control response to its request.
///
/// The config thread receives the ticket with the command and must hand it
/// back to [`CameraClient::control_done`]; responses for tickets nobody is
/// waiting on anymore are dropped and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlTicket(u64);

/// A control command: opcode plus opaque payload bytes.
///
/// The payload buffer doubles as the response buffer, so the response
/// payload is truncated to the request's length on the way back.
#[derive(Debug, Clone)]
pub struct ControlCommand {
    /// Command opcode.
    pub op: u32,
    /// Opaque command payload.
    pub payload: Vec<u8>,
}

/// A completed control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    /// Opcode echoed by the handler.
    pub op: u32,
    /// Completion status.
    pub status: u32,
    /// Response payload bytes.
    pub payload: Vec<u8>,
}

impl ControlResponse {
    fn none() -> Self {
        Self {
            op: RESPONSE_NONE,
            status: RESPONSE_NONE,
            payload: Vec::new(),
        }
    }
}

/// Per-request completion slots keyed by ticket.
///
/// One issuer's response can never be picked up by another issuer: each
/// submission waits on its own slot.
#[derive(Default)]
pub(crate) struct PendingControls {
    next: AtomicU64,
    slots: Mutex<HashMap<u64, Completer<Option<ControlResponse>>>>,
}

impl PendingControls {
    pub fn issue(&self) -> (ControlTicket, CompletionWaiter<Option<ControlResponse>>) {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = completion();
        self.slots.lock().insert(id, tx);
        (ControlTicket(id), rx)
    }

    /// Route a response to its slot. False means the request already gave
    /// up and the response went nowhere.
    pub fn complete(&self, ticket: ControlTicket, response: Option<ControlResponse>) -> bool {
        let slot = self.slots.lock().remove(&ticket.0);
        match slot {
            Some(tx) => {
                tx.complete(response);
                true
            }
            None => false,
        }
    }

    /// Forget a slot whose issuer stopped waiting.
    pub fn abandon(&self, ticket: ControlTicket) {
        self.slots.lock().remove(&ticket.0);
    }

    /// Number of requests still waiting for a response.
    pub fn outstanding(&self) -> usize {
        self.slots.lock().len()
    }

    /// Drop every slot. Used on session teardown.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

/// Which preview output path produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    /// Output path 1.
    Output1,
    /// Output path 2.
    Output2,
}

/// Statistics families the ISP produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsKind {
    /// Auto-exposure / auto-white-balance.
    AecAwb,
    /// Auto-focus.
    Af,
}

/// A statistics buffer resolved back to its client addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsBuffer {
    /// Client virtual address.
    pub vaddr: u64,
    /// Backing file descriptor.
    pub fd: i32,
}

/// The main-image buffer handed to post-processing after a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotFrame {
    /// Client virtual address.
    pub vaddr: u64,
    /// Luma plane offset.
    pub y_off: u32,
    /// Chroma plane offset.
    pub cbcr_off: u32,
    /// Backing file descriptor.
    pub fd: i32,
    /// True when only the unprocessed main image was registered.
    pub raw: bool,
}

/// Resolved body of a hardware event or message.
#[derive(Debug, Clone)]
pub enum HardwareBody {
    /// Opaque firmware body.
    General(Vec<u8>),
    /// Per-frame metadata for a preview output.
    Output {
        /// Which output path.
        channel: OutputChannel,
        /// Extra metadata bytes.
        info: Vec<u8>,
    },
    /// A statistics buffer is ready; `None` when no registered region
    /// covered the reported address.
    Stats {
        /// Statistics family.
        kind: StatsKind,
        /// The consumed buffer, now software-owned.
        buf: Option<StatsBuffer>,
    },
    /// A snapshot finished; `main` carries the post-processing buffer
    /// when post-processing is enabled.
    Snapshot {
        /// Main-image region for post-processing.
        main: Option<SnapshotFrame>,
    },
}

/// One entry drained from the message queue by the config thread.
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    /// Command from the in-process control path.
    Control {
        /// Ticket to answer through `control_done`.
        ticket: ControlTicket,
        /// The command to apply.
        cmd: ControlCommand,
    },
    /// Command from an external registered client.
    ClientRequest {
        /// Ticket to answer through `control_done`.
        ticket: ControlTicket,
        /// The command to apply.
        cmd: ControlCommand,
    },
    /// Hardware event or message, with buffers already resolved.
    Hardware {
        /// Which callback channel delivered it.
        signal: IspSignal,
        /// Origin code from the firmware envelope.
        origin: u32,
        /// Firmware message identifier.
        msg_id: u32,
        /// Resolved payload.
        body: HardwareBody,
    },
}

impl CameraClient {
    /// Submit a command from the in-process control path and wait for the
    /// config thread to answer it.
    ///
    /// When the handler completes the command without a body, the sentinel
    /// response (`RESPONSE_NONE` opcode and status, empty payload) is
    /// returned instead of an error.
    pub fn submit_control(
        &self,
        cmd: ControlCommand,
        wait: Wait,
    ) -> Result<ControlResponse, CameraError> {
        self.submit(cmd, wait, false)
    }

    /// Submit a command on behalf of an external registered client.
    pub fn submit_client_request(
        &self,
        cmd: ControlCommand,
        wait: Wait,
    ) -> Result<ControlResponse, CameraError> {
        self.submit(cmd, wait, true)
    }

    fn submit(
        &self,
        cmd: ControlCommand,
        wait: Wait,
        client: bool,
    ) -> Result<ControlResponse, CameraError> {
        let capacity = cmd.payload.len();
        let (ticket, waiter) = self.shared.pending.issue();
        let entry = if client {
            MessageEntry::ClientRequest { ticket, cmd }
        } else {
            MessageEntry::Control { ticket, cmd }
        };
        if self.shared.events.offer(entry) == PushOutcome::Full {
            self.shared.pending.abandon(ticket);
            return Err(CameraError::OutOfMemory);
        }

        match waiter.wait(wait) {
            WaitOutcome::Ready(Some(mut response)) => {
                response.payload.truncate(capacity);
                Ok(response)
            }
            WaitOutcome::Ready(None) => Ok(ControlResponse::none()),
            WaitOutcome::Empty => {
                self.shared.pending.abandon(ticket);
                Err(CameraError::Unavailable)
            }
            WaitOutcome::TimedOut => {
                self.shared.pending.abandon(ticket);
                Err(CameraError::Timeout)
            }
            WaitOutcome::Cancelled => {
                self.shared.pending.abandon(ticket);
                Err(CameraError::Interrupted)
            }
        }
    }

    /// Drain the next entry from the message queue.
    ///
    /// This is the config thread's main loop: commands come back with
    /// their ticket, hardware notifications come back with statistics and
    /// snapshot buffers already resolved against the registry.
    pub fn next_event(&self, wait: Wait) -> Result<ConfigEvent, CameraError> {
        let entry = session::outcome(self.shared.events.pop_wait(wait))?;
        Ok(match entry {
            MessageEntry::Control { ticket, cmd } => ConfigEvent::Control { ticket, cmd },
            MessageEntry::ClientRequest { ticket, cmd } => {
                ConfigEvent::ClientRequest { ticket, cmd }
            }
            MessageEntry::HardwareEvent(response) => {
                self.resolve_hardware(IspSignal::Event, response)
            }
            MessageEntry::HardwareMessage(response) => {
                self.resolve_hardware(IspSignal::Message, response)
            }
        })
    }

    /// Whether the config thread has something to drain.
    pub fn event_pending(&self) -> bool {
        self.shared.events.pending()
    }

    /// Answer a command the config thread finished handling.
    ///
    /// `None` completes the command without a body; the issuer then sees
    /// the sentinel response. A ticket whose issuer already gave up is
    /// counted as stale and the response is dropped.
    pub fn control_done(&self, ticket: ControlTicket, response: Option<ControlResponse>) {
        if !self.shared.pending.complete(ticket, response) {
            self.shared.metrics.stale_response();
            warn!("control response for {ticket:?} arrived after the request gave up");
        }
    }

    fn resolve_hardware(&self, signal: IspSignal, response: IspResponse) -> ConfigEvent {
        let IspResponse {
            kind,
            evt: EventEnvelope {
                origin,
                msg_id,
                data,
            },
            phys,
            extra,
        } = response;

        let body = match kind {
            IspPayloadKind::General => HardwareBody::General(data),
            IspPayloadKind::Output1 => HardwareBody::Output {
                channel: OutputChannel::Output1,
                info: extra,
            },
            IspPayloadKind::Output2 => HardwareBody::Output {
                channel: OutputChannel::Output2,
                info: extra,
            },
            IspPayloadKind::StatsAf => HardwareBody::Stats {
                kind: StatsKind::Af,
                buf: self.consume_stats(phys.stats),
            },
            IspPayloadKind::StatsAwbExp => HardwareBody::Stats {
                kind: StatsKind::AecAwb,
                buf: self.consume_stats(phys.stats),
            },
            IspPayloadKind::Snapshot => HardwareBody::Snapshot {
                main: if self.shared.post_proc.load(Ordering::Relaxed) {
                    self.snapshot_region()
                } else {
                    None
                },
            },
        };

        ConfigEvent::Hardware {
            signal,
            origin,
            msg_id,
            body,
        }
    }

    fn consume_stats(&self, phys: u64) -> Option<StatsBuffer> {
        self.shared
            .registry
            .stats_phys_to_virt(phys)
            .map(|m| StatsBuffer {
                vaddr: m.vaddr,
                fd: m.fd,
            })
    }

    fn snapshot_region(&self) -> Option<SnapshotFrame> {
        let main = self.shared.registry.lookup(BufferClass::MainImage, 1);
        if let Some(region) = main.first() {
            return Some(SnapshotFrame {
                vaddr: region.vaddr,
                y_off: region.y_off,
                cbcr_off: region.cbcr_off,
                fd: region.fd,
                raw: false,
            });
        }
        let raw = self.shared.registry.lookup(BufferClass::RawMainImage, 1);
        raw.first().map(|region| SnapshotFrame {
            vaddr: region.vaddr,
            y_off: region.y_off,
            cbcr_off: region.cbcr_off,
            fd: region.fd,
            raw: true,
        })
    }
}
