#![doc = include_str!("../README.md")]

pub mod metrics;
pub mod queue;
pub mod region;
pub mod wait;

pub mod prelude {
    pub use crate::{
        metrics::DropCounters,
        queue::{Completer, CompletionWaiter, EventQueue, PushOutcome, completion},
        region::{
            BufferClass, FrameMatch, PinError, PinnedBuffer, PinnedMemory, RegionDescriptor,
            RegionInfo, RegionRegistry, StatsMatch,
        },
        wait::{CancelToken, Wait, WaitOutcome},
    };
}
