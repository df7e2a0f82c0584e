#![doc = include_str!("../README.md")]

use std::sync::Arc;

pub use charon_core as core;
pub use charon_isp as isp;

use charon_core::metrics::DropCounters;
use charon_core::region::PinnedMemory;
use charon_isp::{IspError, IspOps, SensorInfo, SensorOps};

mod config;
mod control;
mod delivery;
mod session;

pub use control::{
    ConfigEvent, ControlCommand, ControlResponse, ControlTicket, HardwareBody, OutputChannel,
    RESPONSE_NONE, SnapshotFrame, StatsBuffer, StatsKind,
};
pub use delivery::{FrameBuffer, FrameDelivery, PictureDelivery};

/// Default capacity of the message, frame and picture queues.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Errors surfaced by control-plane operations.
///
/// # Example
/// ```rust
/// use charon::CameraError;
///
/// let err = CameraError::Timeout;
/// assert_eq!(err.code(), "timeout");
/// assert!(err.retryable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// A class, buffer key or operation did not make sense.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// An allocation or queue reservation failed.
    #[error("allocation failed")]
    OutOfMemory,
    /// A bounded wait lapsed with nothing pending.
    #[error("timed out waiting for completion")]
    Timeout,
    /// An unbounded wait was cancelled.
    #[error("wait interrupted")]
    Interrupted,
    /// A non-blocking check found nothing pending.
    #[error("nothing pending")]
    Unavailable,
    /// The concurrent-opener limit was reached.
    #[error("opener limit reached")]
    ResourceExhausted,
    /// The ISP or sensor layer rejected the request.
    #[error("hardware rejected request: {0}")]
    Hardware(#[from] IspError),
}

impl CameraError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            CameraError::InvalidArgument(_) => "invalid_argument",
            CameraError::OutOfMemory => "out_of_memory",
            CameraError::Timeout => "timeout",
            CameraError::Interrupted => "interrupted",
            CameraError::Unavailable => "unavailable",
            CameraError::ResourceExhausted => "resource_exhausted",
            CameraError::Hardware(_) => "hardware",
        }
    }

    /// Whether the operation may succeed when retried as-is.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CameraError::Timeout | CameraError::Interrupted | CameraError::Unavailable
        )
    }
}

/// One camera device: the shared session every opener attaches to.
///
/// The queues and the region registry are created once here and live for
/// the device lifetime; the hardware is brought up when the first client
/// opens and torn down when the last one drops.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use charon::prelude::*;
///
/// let isp = Arc::new(LoopbackIsp::new());
/// let pins = Arc::new(LoopbackPins::new());
/// let device = CameraDevice::new(isp, Arc::new(StubSensor::new("imx074")), pins);
/// let client = device.open()?;
/// assert_eq!(device.openers(), 1);
/// drop(client);
/// assert_eq!(device.openers(), 0);
/// # Ok::<(), charon::CameraError>(())
/// ```
pub struct CameraDevice {
    shared: Arc<session::Shared>,
}

impl CameraDevice {
    /// Build a device over the given hardware seams with default queues.
    pub fn new(
        isp: Arc<dyn IspOps>,
        sensor: Arc<dyn SensorOps>,
        pins: Arc<dyn PinnedMemory>,
    ) -> Self {
        Self::with_queue_depth(isp, sensor, pins, DEFAULT_QUEUE_DEPTH)
    }

    /// Build a device with an explicit queue capacity.
    pub fn with_queue_depth(
        isp: Arc<dyn IspOps>,
        sensor: Arc<dyn SensorOps>,
        pins: Arc<dyn PinnedMemory>,
        depth: usize,
    ) -> Self {
        Self {
            shared: Arc::new(session::Shared::new(isp, sensor, pins, depth)),
        }
    }

    /// Attach one more opener, initializing the hardware on the first.
    pub fn open(&self) -> Result<CameraClient, CameraError> {
        session::open(&self.shared)?;
        Ok(CameraClient {
            shared: self.shared.clone(),
        })
    }

    /// Number of clients currently attached.
    pub fn openers(&self) -> usize {
        self.shared.lifecycle.lock().open_count
    }

    /// Describe the attached sensor.
    pub fn sensor_info(&self) -> SensorInfo {
        self.shared.sensor.describe()
    }

    /// Snapshot of the drop counters.
    pub fn metrics(&self) -> DropCounters {
        self.shared.metrics.clone()
    }
}

/// One opener of the camera session.
///
/// All control-plane operations hang off this guard; dropping it closes
/// the opener and, for the last one, tears the session down.
pub struct CameraClient {
    pub(crate) shared: Arc<session::Shared>,
}

impl CameraClient {
    /// Describe the attached sensor.
    pub fn sensor_info(&self) -> SensorInfo {
        self.shared.sensor.describe()
    }

    /// Snapshot of the drop counters.
    pub fn metrics(&self) -> DropCounters {
        self.shared.metrics.clone()
    }
}

impl Drop for CameraClient {
    fn drop(&mut self) {
        session::close(&self.shared);
    }
}

pub mod prelude {
    pub use crate::{
        CameraClient, CameraDevice, CameraError, ConfigEvent, ControlCommand, ControlResponse,
        ControlTicket, DEFAULT_QUEUE_DEPTH, FrameBuffer, FrameDelivery, HardwareBody,
        OutputChannel, PictureDelivery, RESPONSE_NONE, SnapshotFrame, StatsBuffer, StatsKind,
    };
    pub use charon_isp::prelude::*;
}
