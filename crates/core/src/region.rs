use parking_lot::Mutex;
use smallvec::SmallVec;

/// DMA target classes a client buffer can be donated for.
///
/// The first five are frame targets; the last two receive statistics the
/// ISP produces for the 3A loops.
///
/// # Example
/// ```rust
/// use charon_core::prelude::BufferClass;
///
/// assert!(BufferClass::Output1.is_frame());
/// assert!(BufferClass::StatsAf.is_stats());
/// assert_eq!(BufferClass::from_raw(3), Some(BufferClass::MainImage));
/// assert_eq!(BufferClass::from_raw(99), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BufferClass {
    /// Preview output path 1.
    Output1,
    /// Preview output path 2.
    Output2,
    /// Snapshot thumbnail.
    Thumbnail,
    /// Snapshot main image.
    MainImage,
    /// Unprocessed snapshot main image.
    RawMainImage,
    /// Auto-exposure / auto-white-balance statistics.
    StatsAecAwb,
    /// Auto-focus statistics.
    StatsAf,
}

impl BufferClass {
    /// Whether the class belongs to the statistics partition.
    pub fn is_stats(self) -> bool {
        matches!(self, BufferClass::StatsAecAwb | BufferClass::StatsAf)
    }

    /// Whether the class belongs to the frame partition.
    pub fn is_frame(self) -> bool {
        !self.is_stats()
    }

    /// Decode a raw class code from the device surface.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(BufferClass::Output1),
            1 => Some(BufferClass::Output2),
            2 => Some(BufferClass::Thumbnail),
            3 => Some(BufferClass::MainImage),
            4 => Some(BufferClass::RawMainImage),
            5 => Some(BufferClass::StatsAecAwb),
            6 => Some(BufferClass::StatsAf),
            _ => None,
        }
    }

    /// Raw class code for the device surface.
    pub fn as_raw(self) -> u32 {
        match self {
            BufferClass::Output1 => 0,
            BufferClass::Output2 => 1,
            BufferClass::Thumbnail => 2,
            BufferClass::MainImage => 3,
            BufferClass::RawMainImage => 4,
            BufferClass::StatsAecAwb => 5,
            BufferClass::StatsAf => 6,
        }
    }
}

/// Failure to resolve a client descriptor to pinned pages.
#[derive(Debug, thiserror::Error)]
pub enum PinError {
    /// The descriptor does not refer to pinned memory.
    #[error("descriptor {0} is not pinned memory")]
    NotPinned(i32),
    /// The pin service itself is gone.
    #[error("pinned-memory service unavailable")]
    Unavailable,
}

/// One pinned range held on behalf of a registered region.
///
/// Dropping the handle releases the pin, the counterpart of unpinning the
/// pages when a region is removed from the registry.
pub trait PinnedBuffer: Send {
    /// Bus address the hardware can DMA to.
    fn paddr(&self) -> u64;
    /// Length of the pinned range in bytes.
    fn len(&self) -> u64;
    /// Whether the pinned range is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Service that resolves a client file descriptor to pinned pages.
///
/// The seam lets tests and demos run without any real pinned-memory
/// allocator behind them.
pub trait PinnedMemory: Send + Sync {
    /// Pin the pages behind `fd` and return the owning handle.
    fn pin(&self, fd: i32) -> Result<Box<dyn PinnedBuffer>, PinError>;
}

/// Registration request for one client buffer.
///
/// `active` selects the initial owner: an active region is available for
/// the hardware to fill, an inactive one is held by software.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionInfo {
    /// DMA target class.
    pub class: BufferClass,
    /// Client virtual address of the buffer.
    pub vaddr: u64,
    /// Client file descriptor backing the buffer.
    pub fd: i32,
    /// Byte offset of the luma plane (frame classes).
    pub y_off: u32,
    /// Byte offset of the chroma plane (frame classes).
    pub cbcr_off: u32,
    /// Initial ownership flag.
    pub active: bool,
}

/// Copy of a region's addressing used to build DMA scatter lists.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionDescriptor {
    /// DMA target class.
    pub class: BufferClass,
    /// Client virtual address.
    pub vaddr: u64,
    /// Bus address of the pinned pages.
    pub paddr: u64,
    /// Pinned length in bytes.
    pub len: u64,
    /// Luma plane offset.
    pub y_off: u32,
    /// Chroma plane offset.
    pub cbcr_off: u32,
    /// Backing file descriptor.
    pub fd: i32,
}

/// Resolution of a hardware-filled frame back to its client buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMatch {
    /// Client virtual address of the matched region.
    pub vaddr: u64,
    /// Luma plane offset.
    pub y_off: u32,
    /// Chroma plane offset.
    pub cbcr_off: u32,
    /// Backing file descriptor.
    pub fd: i32,
}

/// Resolution of a hardware-filled statistics buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsMatch {
    /// Client virtual address of the matched region.
    pub vaddr: u64,
    /// Backing file descriptor.
    pub fd: i32,
}

struct Region {
    class: BufferClass,
    vaddr: u64,
    fd: i32,
    y_off: u32,
    cbcr_off: u32,
    active: bool,
    pin: Box<dyn PinnedBuffer>,
}

impl Region {
    fn descriptor(&self) -> RegionDescriptor {
        RegionDescriptor {
            class: self.class,
            vaddr: self.vaddr,
            paddr: self.pin.paddr(),
            len: self.pin.len(),
            y_off: self.y_off,
            cbcr_off: self.cbcr_off,
            fd: self.fd,
        }
    }
}

#[derive(Default)]
struct Partitions {
    frame: Vec<Region>,
    stats: Vec<Region>,
}

impl Partitions {
    fn of(&mut self, class: BufferClass) -> &mut Vec<Region> {
        if class.is_stats() {
            &mut self.stats
        } else {
            &mut self.frame
        }
    }
}

/// Registry of client-donated DMA regions, split into a frame partition
/// and a statistics partition.
///
/// Every mutation happens under one registry-wide lock and none of them
/// block. Resolving a hardware address consumes exactly one active region
/// (it becomes software-owned); releasing a client buffer produces exactly
/// one inactive region back to the hardware side.
///
/// # Example
/// ```rust
/// use charon_core::prelude::*;
///
/// struct Pin(u64);
/// impl PinnedBuffer for Pin {
///     fn paddr(&self) -> u64 {
///         self.0
///     }
///     fn len(&self) -> u64 {
///         4096
///     }
/// }
///
/// let registry = RegionRegistry::new();
/// registry.register(
///     RegionInfo {
///         class: BufferClass::Output1,
///         vaddr: 0x1000,
///         fd: 5,
///         y_off: 0,
///         cbcr_off: 0,
///         active: true,
///     },
///     Box::new(Pin(0x8000_0000)),
/// );
/// let regions = registry.lookup(BufferClass::Output1, 8);
/// assert_eq!(regions.len(), 1);
/// assert_eq!(regions[0].vaddr, 0x1000);
/// ```
#[derive(Default)]
pub struct RegionRegistry {
    inner: Mutex<Partitions>,
}

impl RegionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a region at the head of its partition.
    ///
    /// Registration is not deduplicated; registering the same
    /// (class, vaddr, fd) twice yields two regions.
    pub fn register(&self, info: RegionInfo, pin: Box<dyn PinnedBuffer>) {
        let region = Region {
            class: info.class,
            vaddr: info.vaddr,
            fd: info.fd,
            y_off: info.y_off,
            cbcr_off: info.cbcr_off,
            active: info.active,
            pin,
        };
        self.inner.lock().of(info.class).insert(0, region);
    }

    /// Remove every region matching (class, vaddr, fd), releasing its pin.
    ///
    /// Removing a key that was never registered is a silent success.
    pub fn unregister(&self, class: BufferClass, vaddr: u64, fd: i32) {
        self.inner
            .lock()
            .of(class)
            .retain(|r| !(r.class == class && r.vaddr == vaddr && r.fd == fd));
    }

    /// Copy out up to `max` active regions of `class`, in registry order.
    ///
    /// Ownership is untouched; the copies seed hardware scatter lists.
    pub fn lookup(&self, class: BufferClass, max: usize) -> SmallVec<[RegionDescriptor; 8]> {
        let mut inner = self.inner.lock();
        inner
            .of(class)
            .iter()
            .filter(|r| r.class == class && r.active)
            .take(max)
            .map(Region::descriptor)
            .collect()
    }

    /// Resolve a hardware-filled frame by its luma/chroma bus addresses.
    ///
    /// The matched region becomes software-owned. `None` means no active
    /// region covers the pair, i.e. there is no buffer to hand back.
    pub fn frame_phys_to_virt(&self, y_phys: u64, cbcr_phys: u64) -> Option<FrameMatch> {
        let mut inner = self.inner.lock();
        let region = inner.frame.iter_mut().find(|r| {
            r.active
                && r.pin.paddr() + u64::from(r.y_off) == y_phys
                && r.pin.paddr() + u64::from(r.cbcr_off) == cbcr_phys
        })?;
        region.active = false;
        Some(FrameMatch {
            vaddr: region.vaddr,
            y_off: region.y_off,
            cbcr_off: region.cbcr_off,
            fd: region.fd,
        })
    }

    /// Resolve a hardware-filled statistics buffer by its bus address,
    /// transferring it to software ownership.
    pub fn stats_phys_to_virt(&self, phys: u64) -> Option<StatsMatch> {
        let mut inner = self.inner.lock();
        let region = inner
            .stats
            .iter_mut()
            .find(|r| r.active && r.pin.paddr() == phys)?;
        region.active = false;
        Some(StatsMatch {
            vaddr: region.vaddr,
            fd: region.fd,
        })
    }

    /// Hand a software-owned frame buffer back to the hardware side,
    /// returning the bus address to program into the release command.
    pub fn frame_virt_to_phys(&self, vaddr: u64, y_off: u32, cbcr_off: u32, fd: i32) -> Option<u64> {
        let mut inner = self.inner.lock();
        let region = inner.frame.iter_mut().find(|r| {
            !r.active && r.vaddr == vaddr && r.y_off == y_off && r.cbcr_off == cbcr_off && r.fd == fd
        })?;
        region.active = true;
        Some(region.pin.paddr())
    }

    /// Hand a software-owned statistics buffer back to the hardware side.
    pub fn stats_virt_to_phys(&self, vaddr: u64, fd: i32) -> Option<u64> {
        let mut inner = self.inner.lock();
        let region = inner
            .stats
            .iter_mut()
            .find(|r| !r.active && r.vaddr == vaddr && r.fd == fd)?;
        region.active = true;
        Some(region.pin.paddr())
    }

    /// Number of active regions of `class`.
    pub fn active_count(&self, class: BufferClass) -> usize {
        let mut inner = self.inner.lock();
        inner
            .of(class)
            .iter()
            .filter(|r| r.class == class && r.active)
            .count()
    }

    /// Whether both partitions are empty.
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.frame.is_empty() && inner.stats.is_empty()
    }

    /// Drop every region regardless of ownership, releasing all pins.
    /// Returns how many regions were released.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let released = inner.frame.len() + inner.stats.len();
        inner.frame.clear();
        inner.stats.clear();
        released
    }
}
