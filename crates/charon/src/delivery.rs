use std::sync::atomic::Ordering;

use log::debug;

use charon_core::queue::PushOutcome;
use charon_core::wait::Wait;
use charon_isp::{ConfigData, IspConfig, IspConfigOp};

use crate::control::{RESPONSE_NONE, StatsKind};
use crate::session::{self, CropState, PictureReady, PictureStatus};
use crate::{CameraClient, CameraError};

/// A frame buffer in client addressing, as delivered and as released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Client virtual address.
    pub vaddr: u64,
    /// Luma plane offset.
    pub y_off: u32,
    /// Chroma plane offset.
    pub cbcr_off: u32,
    /// Backing file descriptor.
    pub fd: i32,
}

/// One delivered preview frame.
#[derive(Debug, Clone)]
pub struct FrameDelivery {
    /// The resolved buffer, now software-owned. `None` when no active
    /// region covered the addresses the hardware reported; that frame has
    /// no buffer to hand out but the notification is still consumed.
    pub frame: Option<FrameBuffer>,
    /// Copy of the current crop metadata, when any is set.
    pub crop: Option<Vec<u8>>,
}

/// One completed still capture.
#[derive(Debug, Clone)]
pub struct PictureDelivery {
    /// Completion kind, or [`RESPONSE_NONE`] when the snapshot carried no
    /// status body.
    pub kind: u32,
    /// Completion status, or [`RESPONSE_NONE`].
    pub status: u32,
    /// Copy of the current crop metadata, when any is set.
    pub crop: Option<Vec<u8>>,
}

impl CameraClient {
    /// Wait for the next ready frame and resolve it against the registry.
    ///
    /// `crop_capacity` is the caller's room for crop metadata; it must
    /// cover the stored blob when one is set.
    pub fn get_frame(
        &self,
        crop_capacity: usize,
        wait: Wait,
    ) -> Result<FrameDelivery, CameraError> {
        let crop = self.copy_crop(crop_capacity)?;
        let ready = session::outcome(self.shared.frames.pop_wait(wait))?;
        let frame = self
            .shared
            .registry
            .frame_phys_to_virt(ready.y, ready.cbcr)
            .map(|m| FrameBuffer {
                vaddr: m.vaddr,
                y_off: m.y_off,
                cbcr_off: m.cbcr_off,
                fd: m.fd,
            });
        if frame.is_none() {
            debug!(
                "frame y=0x{:x} cbcr=0x{:x} has no active region",
                ready.y, ready.cbcr
            );
        }
        Ok(FrameDelivery { frame, crop })
    }

    /// Whether a frame is ready without dequeuing it. Poll predicate.
    pub fn frame_pending(&self) -> bool {
        self.shared.frames.pending()
    }

    /// Hand a software-owned frame buffer back to the hardware.
    pub fn put_frame_buffer(&self, buf: &FrameBuffer) -> Result<(), CameraError> {
        let phys = self
            .shared
            .registry
            .frame_virt_to_phys(buf.vaddr, buf.y_off, buf.cbcr_off, buf.fd)
            .ok_or(CameraError::InvalidArgument(
                "no released frame region matches the buffer",
            ))?;
        self.shared.isp.config(
            &IspConfig::bare(IspConfigOp::FrameBufRelease),
            ConfigData::PhysAddr(phys),
        )?;
        Ok(())
    }

    /// Wait for the next completed still capture.
    pub fn get_picture(
        &self,
        crop_capacity: usize,
        wait: Wait,
    ) -> Result<PictureDelivery, CameraError> {
        let crop = self.copy_crop(crop_capacity)?;
        let ready = session::outcome(self.shared.pictures.pop_wait(wait))?;
        let delivery = match ready.0 {
            Some(PictureStatus { kind, status }) => PictureDelivery { kind, status, crop },
            None => PictureDelivery {
                kind: RESPONSE_NONE,
                status: RESPONSE_NONE,
                crop,
            },
        };
        Ok(delivery)
    }

    /// Hand a software-owned statistics buffer back to the hardware.
    pub fn put_stats_buffer(
        &self,
        vaddr: u64,
        fd: i32,
        kind: StatsKind,
    ) -> Result<(), CameraError> {
        let phys = self
            .shared
            .registry
            .stats_virt_to_phys(vaddr, fd)
            .ok_or(CameraError::InvalidArgument(
                "no released stats region matches the buffer",
            ))?;
        let op = match kind {
            StatsKind::AecAwb => IspConfigOp::StatsBufRelease,
            StatsKind::Af => IspConfigOp::StatsAfBufRelease,
        };
        self.shared
            .isp
            .config(&IspConfig::bare(op), ConfigData::PhysAddr(phys))?;
        Ok(())
    }

    /// Store the crop metadata blob handed out with frames and pictures.
    ///
    /// The first set fixes the reserved length; later sets may shrink but
    /// never grow past it.
    pub fn set_crop(&self, blob: &[u8]) -> Result<(), CameraError> {
        let mut lifecycle = self.shared.lifecycle.lock();
        match lifecycle.crop.as_mut() {
            None => {
                let mut data = Vec::new();
                data.try_reserve_exact(blob.len())
                    .map_err(|_| CameraError::OutOfMemory)?;
                data.extend_from_slice(blob);
                lifecycle.crop = Some(CropState {
                    cap: blob.len(),
                    data,
                });
            }
            Some(state) => {
                if blob.len() > state.cap {
                    return Err(CameraError::InvalidArgument(
                        "crop blob exceeds the reserved length",
                    ));
                }
                state.data.clear();
                state.data.extend_from_slice(blob);
            }
        }
        Ok(())
    }

    /// Route still captures through client post-processing.
    pub fn set_post_processing(&self, enabled: bool) {
        self.shared.post_proc.store(enabled, Ordering::Relaxed);
    }

    /// Whether still captures are routed through post-processing.
    pub fn post_processing(&self) -> bool {
        self.shared.post_proc.load(Ordering::Relaxed)
    }

    /// Report a finished post-processing pass, releasing the picture
    /// waiter with the given completion kind and status.
    pub fn post_processing_done(&self, kind: u32, status: u32) -> Result<(), CameraError> {
        if !self.post_processing() {
            return Err(CameraError::InvalidArgument(
                "post-processing is not enabled",
            ));
        }
        let entry = PictureReady(Some(PictureStatus { kind, status }));
        match self.shared.pictures.offer(entry) {
            PushOutcome::Accepted => Ok(()),
            PushOutcome::Full => Err(CameraError::OutOfMemory),
        }
    }

    fn copy_crop(&self, capacity: usize) -> Result<Option<Vec<u8>>, CameraError> {
        let lifecycle = self.shared.lifecycle.lock();
        match lifecycle.crop.as_ref() {
            None => Ok(None),
            Some(state) => {
                if capacity < state.data.len() {
                    return Err(CameraError::InvalidArgument(
                        "crop capacity smaller than the stored blob",
                    ));
                }
                Ok(Some(state.data.clone()))
            }
        }
    }
}
