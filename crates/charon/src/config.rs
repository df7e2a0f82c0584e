use log::warn;

use charon_core::region::{BufferClass, RegionInfo};
use charon_isp::{AxiData, ConfigData, EngineCommand, IspConfig, IspConfigOp};

use crate::{CameraClient, CameraError};

/// Scatter-list depth per frame AXI bucket.
const FRAME_BUCKET_DEPTH: usize = 8;
/// Scatter-list depth per statistics class.
const STATS_BUCKET_DEPTH: usize = 3;

impl CameraClient {
    /// Pin the client buffer behind `info` and insert it into the region
    /// registry.
    ///
    /// Registration is not deduplicated; callers must not double-register
    /// the same (class, vaddr, fd) key.
    pub fn register_buffer(&self, info: RegionInfo) -> Result<(), CameraError> {
        let pin = self.shared.pins.pin(info.fd).map_err(|err| {
            warn!("buffer registration rejected: {err}");
            CameraError::InvalidArgument("descriptor is not pinned memory")
        })?;
        self.shared.registry.register(info, pin);
        Ok(())
    }

    /// Remove every region matching (class, vaddr, fd) and release its
    /// pin. Removing a key that was never registered is a silent success.
    pub fn unregister_buffer(&self, class: BufferClass, vaddr: u64, fd: i32) {
        self.shared.registry.unregister(class, vaddr, fd);
    }

    /// Build the scatter list for an AXI programming command and apply it.
    ///
    /// Returns the resolved list so callers can inspect what the hardware
    /// was given.
    pub fn configure_axi(&self, cmd: IspConfig) -> Result<AxiData, CameraError> {
        let registry = &self.shared.registry;
        let axi = match cmd.op {
            IspConfigOp::AxiOut1 => {
                let regions = registry.lookup(BufferClass::Output1, FRAME_BUCKET_DEPTH);
                AxiData {
                    bufnum1: regions.len(),
                    bufnum2: 0,
                    regions,
                }
            }
            IspConfigOp::AxiOut2 => {
                let regions = registry.lookup(BufferClass::Output2, FRAME_BUCKET_DEPTH);
                AxiData {
                    bufnum1: 0,
                    bufnum2: regions.len(),
                    regions,
                }
            }
            IspConfigOp::AxiSnapshot => {
                let mut regions = registry.lookup(BufferClass::Thumbnail, FRAME_BUCKET_DEPTH);
                let bufnum1 = regions.len();
                let main = registry.lookup(BufferClass::MainImage, FRAME_BUCKET_DEPTH);
                let bufnum2 = main.len();
                regions.extend(main);
                AxiData {
                    bufnum1,
                    bufnum2,
                    regions,
                }
            }
            IspConfigOp::AxiRawSnapshot => {
                let regions = registry.lookup(BufferClass::RawMainImage, FRAME_BUCKET_DEPTH);
                AxiData {
                    bufnum1: 0,
                    bufnum2: regions.len(),
                    regions,
                }
            }
            IspConfigOp::StatsAxi => {
                let regions = registry.lookup(BufferClass::StatsAecAwb, STATS_BUCKET_DEPTH);
                AxiData {
                    bufnum1: regions.len(),
                    bufnum2: 0,
                    regions,
                }
            }
            IspConfigOp::StatsAfAxi => {
                let regions = registry.lookup(BufferClass::StatsAf, STATS_BUCKET_DEPTH);
                AxiData {
                    bufnum1: regions.len(),
                    bufnum2: 0,
                    regions,
                }
            }
            _ => {
                return Err(CameraError::InvalidArgument(
                    "not an AXI programming operation",
                ));
            }
        };
        self.shared
            .isp
            .config(&cmd, ConfigData::Regions(axi.clone()))?;
        Ok(axi)
    }

    /// Apply a configuration command, resolving statistics scatter lists
    /// for the enable operations and passing everything else through.
    pub fn configure_isp(&self, cmd: IspConfig) -> Result<(), CameraError> {
        let registry = &self.shared.registry;
        let axi = match cmd.op {
            IspConfigOp::StatsEnable => {
                let regions = registry.lookup(BufferClass::StatsAecAwb, STATS_BUCKET_DEPTH);
                AxiData {
                    bufnum1: regions.len(),
                    bufnum2: 0,
                    regions,
                }
            }
            IspConfigOp::StatsAfEnable => {
                let regions = registry.lookup(BufferClass::StatsAf, STATS_BUCKET_DEPTH);
                AxiData {
                    bufnum1: regions.len(),
                    bufnum2: 0,
                    regions,
                }
            }
            _ => AxiData::default(),
        };
        self.shared.isp.config(&cmd, ConfigData::Regions(axi))?;
        Ok(())
    }

    /// Start the selected engine task.
    pub fn enable_isp(&self, cmd: &EngineCommand) -> Result<(), CameraError> {
        self.shared.isp.enable(cmd)?;
        Ok(())
    }

    /// Stop the selected engine task.
    pub fn disable_isp(&self, cmd: &EngineCommand) -> Result<(), CameraError> {
        self.shared.isp.disable(cmd)?;
        Ok(())
    }

    /// Pass a configuration request through to the sensor driver.
    pub fn sensor_config(&self, request: &[u8]) -> Result<Vec<u8>, CameraError> {
        Ok(self.shared.sensor.config(request)?)
    }
}
