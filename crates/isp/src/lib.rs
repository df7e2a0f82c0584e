#![doc = include_str!("../README.md")]

use std::sync::Arc;

use smallvec::SmallVec;

use charon_core::region::RegionDescriptor;

pub mod loopback;

/// Which callback channel a notification arrived on.
///
/// Events come from the applications-side controller, messages from the
/// DSP side; they share the message queue but consumers tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IspSignal {
    /// Controller event.
    Event,
    /// DSP message.
    Message,
}

/// Classification of a notification payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IspPayloadKind {
    /// General event or message with an opaque body.
    #[default]
    General,
    /// Output path 1 produced a frame.
    Output1,
    /// Output path 2 produced a frame.
    Output2,
    /// A snapshot completed.
    Snapshot,
    /// Auto-focus statistics are ready.
    StatsAf,
    /// Auto-white-balance / exposure statistics are ready.
    StatsAwbExp,
}

/// Raw envelope carried with every notification.
#[derive(Debug, Clone, Default)]
pub struct EventEnvelope {
    /// Origin code reported by the firmware.
    pub origin: u32,
    /// Firmware message identifier.
    pub msg_id: u32,
    /// Opaque body bytes.
    pub data: Vec<u8>,
}

/// Bus addresses attached to a notification.
///
/// Frame notifications fill `y`/`cbcr`; statistics notifications fill
/// `stats`. Unused fields stay zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IspPhys {
    /// Luma plane bus address.
    pub y: u64,
    /// Chroma plane bus address.
    pub cbcr: u64,
    /// Statistics buffer bus address.
    pub stats: u64,
}

/// One notification pushed by the ISP layer into the session.
///
/// # Example
/// ```rust
/// use charon_isp::{EventEnvelope, IspPayloadKind, IspPhys, IspResponse};
///
/// let resp = IspResponse {
///     kind: IspPayloadKind::Output2,
///     evt: EventEnvelope { origin: 0, msg_id: 7, data: Vec::new() },
///     phys: IspPhys { y: 0x8000_0000, cbcr: 0x8000_0100, stats: 0 },
///     extra: Vec::new(),
/// };
/// assert_eq!(resp.kind, IspPayloadKind::Output2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct IspResponse {
    /// Payload classification.
    pub kind: IspPayloadKind,
    /// Raw event envelope.
    pub evt: EventEnvelope,
    /// Bus addresses for frame/statistics payloads.
    pub phys: IspPhys,
    /// Extra per-output metadata bytes.
    pub extra: Vec<u8>,
}

/// Operations accepted by `IspOps::config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IspConfigOp {
    /// Program output path 1 scatter list.
    AxiOut1,
    /// Program output path 2 scatter list.
    AxiOut2,
    /// Program thumbnail + main image scatter lists for a snapshot.
    AxiSnapshot,
    /// Program the raw main image scatter list.
    AxiRawSnapshot,
    /// Program the AEC/AWB statistics scatter list.
    StatsAxi,
    /// Program the AF statistics scatter list.
    StatsAfAxi,
    /// Enable AEC/AWB statistics collection.
    StatsEnable,
    /// Enable AF statistics collection.
    StatsAfEnable,
    /// Hand one frame buffer back to the hardware.
    FrameBufRelease,
    /// Hand one AEC/AWB statistics buffer back to the hardware.
    StatsBufRelease,
    /// Hand one AF statistics buffer back to the hardware.
    StatsAfBufRelease,
}

/// One configuration command: the operation plus its opaque argument
/// bytes, passed through untouched.
#[derive(Debug, Clone)]
pub struct IspConfig {
    /// Operation selector.
    pub op: IspConfigOp,
    /// Opaque argument blob understood by the firmware.
    pub args: Vec<u8>,
}

impl IspConfig {
    /// Command with no argument bytes.
    pub fn bare(op: IspConfigOp) -> Self {
        Self {
            op,
            args: Vec::new(),
        }
    }
}

/// Scatter list handed to `IspOps::config` for AXI programming.
///
/// `bufnum1`/`bufnum2` count how many leading/trailing entries of
/// `regions` belong to the first and second hardware bucket.
#[derive(Debug, Clone, Default)]
pub struct AxiData {
    /// Entries in the first bucket.
    pub bufnum1: usize,
    /// Entries in the second bucket.
    pub bufnum2: usize,
    /// Region descriptors, first bucket then second.
    pub regions: SmallVec<[RegionDescriptor; 8]>,
}

/// Data argument attached to a configuration command.
#[derive(Debug, Clone)]
pub enum ConfigData {
    /// A scatter list of resolved regions.
    Regions(AxiData),
    /// The bus address of a single buffer being released.
    PhysAddr(u64),
}

/// Engine selector for enable/disable requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    /// Name of the engine/task to start or stop.
    pub name: String,
}

impl EngineCommand {
    /// Select an engine by name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Static description of the attached sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorInfo {
    /// Sensor model name.
    pub name: String,
}

/// Failures reported by the ISP or sensor layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IspError {
    /// The engine is not present or not ready.
    #[error("isp engine unavailable")]
    Unavailable,
    /// The firmware rejected the request.
    #[error("isp rejected request: {0}")]
    Rejected(String),
}

/// Entry point by which the ISP layer pushes notifications into the
/// session. Implementations must never block: this is called from
/// interrupt/callback context.
pub trait IspEventSink: Send + Sync {
    /// Deliver one event or message.
    fn isp_event(&self, signal: IspSignal, response: IspResponse);
}

/// The image-signal-processor function table.
///
/// `init` wires the event sink; `config` applies scatter lists and buffer
/// releases. The session calls `release` exactly once per `init`.
pub trait IspOps: Send + Sync {
    /// Bring the engine up and register the event sink.
    fn init(&self, sink: Arc<dyn IspEventSink>) -> Result<(), IspError>;
    /// Tear the engine down; no notifications may follow.
    fn release(&self);
    /// Start the selected engine task.
    fn enable(&self, cmd: &EngineCommand) -> Result<(), IspError>;
    /// Stop the selected engine task.
    fn disable(&self, cmd: &EngineCommand) -> Result<(), IspError>;
    /// Apply a configuration command with its data argument.
    fn config(&self, cmd: &IspConfig, data: ConfigData) -> Result<(), IspError>;
}

/// Sensor control table.
pub trait SensorOps: Send + Sync {
    /// Power the sensor up.
    fn init(&self) -> Result<(), IspError>;
    /// Pass a configuration request through to the sensor driver.
    fn config(&self, request: &[u8]) -> Result<Vec<u8>, IspError>;
    /// Power the sensor down.
    fn release(&self);
    /// Describe the attached sensor.
    fn describe(&self) -> SensorInfo;
}

pub mod prelude {
    pub use crate::{
        AxiData, ConfigData, EngineCommand, EventEnvelope, IspConfig, IspConfigOp, IspError,
        IspEventSink, IspOps, IspPayloadKind, IspPhys, IspResponse, IspSignal, SensorInfo,
        SensorOps,
        loopback::{IspCall, LoopbackIsp, LoopbackPins, StubSensor},
    };
    pub use charon_core::prelude::*;
}
