use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for entries the hardware callback path had to drop.
///
/// The producer side never blocks and never fails upward; when a queue is
/// full the entry is discarded and the matching counter moves. Stale
/// control responses (completions for a request that already gave up) are
/// counted the same way.
///
/// # Example
/// ```rust
/// use charon_core::metrics::DropCounters;
///
/// let counters = DropCounters::default();
/// counters.event_dropped();
/// assert_eq!(counters.dropped_events(), 1);
/// ```
#[derive(Debug, Default)]
pub struct DropCounters {
    events: AtomicU64,
    frames: AtomicU64,
    pictures: AtomicU64,
    stale_responses: AtomicU64,
}

impl DropCounters {
    /// Count a dropped message-queue entry.
    pub fn event_dropped(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dropped frame-ready notification.
    pub fn frame_dropped(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dropped picture-ready notification.
    pub fn picture_dropped(&self) {
        self.pictures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a control response that no request was still waiting for.
    pub fn stale_response(&self) {
        self.stale_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of dropped message-queue entries.
    pub fn dropped_events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Snapshot of dropped frame notifications.
    pub fn dropped_frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Snapshot of dropped picture notifications.
    pub fn dropped_pictures(&self) -> u64 {
        self.pictures.load(Ordering::Relaxed)
    }

    /// Snapshot of stale control responses.
    pub fn stale_responses(&self) -> u64 {
        self.stale_responses.load(Ordering::Relaxed)
    }
}

impl Clone for DropCounters {
    fn clone(&self) -> Self {
        let cloned = DropCounters::default();
        cloned.events.store(self.dropped_events(), Ordering::Relaxed);
        cloned.frames.store(self.dropped_frames(), Ordering::Relaxed);
        cloned
            .pictures
            .store(self.dropped_pictures(), Ordering::Relaxed);
        cloned
            .stale_responses
            .store(self.stale_responses(), Ordering::Relaxed);
        cloned
    }
}
