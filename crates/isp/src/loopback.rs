//! Recording fakes for driving the control plane without hardware.

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use charon_core::region::{PinError, PinnedBuffer, PinnedMemory};

use crate::{
    ConfigData, EngineCommand, IspConfig, IspError, IspEventSink, IspOps, IspResponse, IspSignal,
    SensorInfo, SensorOps,
};

/// One call recorded by [`LoopbackIsp`].
#[derive(Debug, Clone)]
pub enum IspCall {
    /// `init` succeeded and a sink was registered.
    Init,
    /// `release` was invoked.
    Release,
    /// `enable` with the given engine.
    Enable(EngineCommand),
    /// `disable` with the given engine.
    Disable(EngineCommand),
    /// `config` with the command and its data argument.
    Config {
        /// The configuration command.
        cmd: IspConfig,
        /// The data argument that accompanied it.
        data: ConfigData,
    },
}

/// ISP stand-in that records every call and can replay notifications
/// through the registered sink.
///
/// # Example
/// ```rust
/// use charon_isp::prelude::*;
///
/// let isp = LoopbackIsp::new();
/// assert!(!isp.has_sink());
/// assert!(isp.calls().is_empty());
/// ```
#[derive(Default)]
pub struct LoopbackIsp {
    calls: Mutex<Vec<IspCall>>,
    sink: Mutex<Option<Arc<dyn IspEventSink>>>,
    fail_init: AtomicBool,
}

impl LoopbackIsp {
    /// Create an idle loopback engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `init` calls fail until switched back off.
    pub fn set_init_failure(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    /// Whether a sink is currently registered.
    pub fn has_sink(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Copy of every call recorded so far.
    pub fn calls(&self) -> Vec<IspCall> {
        self.calls.lock().clone()
    }

    /// Forget recorded calls.
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    /// Push a notification through the registered sink, as the hardware
    /// callback path would. Returns false when no sink is wired.
    pub fn emit(&self, signal: IspSignal, response: IspResponse) -> bool {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => {
                sink.isp_event(signal, response);
                true
            }
            None => false,
        }
    }

    fn record(&self, call: IspCall) {
        self.calls.lock().push(call);
    }
}

impl IspOps for LoopbackIsp {
    fn init(&self, sink: Arc<dyn IspEventSink>) -> Result<(), IspError> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(IspError::Unavailable);
        }
        *self.sink.lock() = Some(sink);
        self.record(IspCall::Init);
        Ok(())
    }

    fn release(&self) {
        *self.sink.lock() = None;
        self.record(IspCall::Release);
    }

    fn enable(&self, cmd: &EngineCommand) -> Result<(), IspError> {
        self.record(IspCall::Enable(cmd.clone()));
        Ok(())
    }

    fn disable(&self, cmd: &EngineCommand) -> Result<(), IspError> {
        self.record(IspCall::Disable(cmd.clone()));
        Ok(())
    }

    fn config(&self, cmd: &IspConfig, data: ConfigData) -> Result<(), IspError> {
        self.record(IspCall::Config {
            cmd: cmd.clone(),
            data,
        });
        Ok(())
    }
}

struct LoopbackPin {
    paddr: u64,
    len: u64,
    live: Arc<AtomicUsize>,
}

impl PinnedBuffer for LoopbackPin {
    fn paddr(&self) -> u64 {
        self.paddr
    }

    fn len(&self) -> u64 {
        self.len
    }
}

impl Drop for LoopbackPin {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory pinned-page service keyed by file descriptor.
///
/// # Example
/// ```rust
/// use charon_isp::prelude::*;
///
/// let pins = LoopbackPins::new();
/// pins.map(5, 0x8000_0000, 4096);
/// let pin = pins.pin(5).expect("mapped");
/// assert_eq!(pin.paddr(), 0x8000_0000);
/// assert_eq!(pins.outstanding(), 1);
/// drop(pin);
/// assert_eq!(pins.outstanding(), 0);
/// ```
#[derive(Default)]
pub struct LoopbackPins {
    ranges: Mutex<HashMap<i32, (u64, u64)>>,
    live: Arc<AtomicUsize>,
}

impl LoopbackPins {
    /// Create an empty pin table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the pinned range behind a descriptor.
    pub fn map(&self, fd: i32, paddr: u64, len: u64) {
        self.ranges.lock().insert(fd, (paddr, len));
    }

    /// Number of pins currently held by callers.
    pub fn outstanding(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl PinnedMemory for LoopbackPins {
    fn pin(&self, fd: i32) -> Result<Box<dyn PinnedBuffer>, PinError> {
        let (paddr, len) = *self.ranges.lock().get(&fd).ok_or(PinError::NotPinned(fd))?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackPin {
            paddr,
            len,
            live: self.live.clone(),
        }))
    }
}

/// Sensor stand-in that echoes configuration requests.
pub struct StubSensor {
    name: String,
    fail_init: AtomicBool,
}

impl StubSensor {
    /// Create a sensor with the given model name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_init: AtomicBool::new(false),
        }
    }

    /// Make the next `init` calls fail until switched back off.
    pub fn set_init_failure(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }
}

impl SensorOps for StubSensor {
    fn init(&self) -> Result<(), IspError> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(IspError::Rejected("sensor init failed".into()));
        }
        Ok(())
    }

    fn config(&self, request: &[u8]) -> Result<Vec<u8>, IspError> {
        Ok(request.to_vec())
    }

    fn release(&self) {}

    fn describe(&self) -> SensorInfo {
        SensorInfo {
            name: self.name.clone(),
        }
    }
}
