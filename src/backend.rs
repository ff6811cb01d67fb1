//! Backend registry
//!
//! [`Backend`] owns the shared IPP device and every live [`PpInstance`].
//! Queue requests carry the instance id as user data, so completion events
//! read from the device are routed back to the instance that issued them.

use crate::config::BackendConfig;
use crate::device::event::{parse_events, DrmEvent};
use crate::device::ioctl::{DrmDevice, DumbAllocator};
use crate::device::SharedDevice;
use crate::error::{Error, Result};
use crate::pp::{PpCapabilities, PpId, PpInstance, SurfaceAllocator};

use std::collections::BTreeMap;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Operations the display manager calls on a post-processing backend
pub trait PpBackend {
    /// Formats, size limits and completion modes of the PP unit
    fn pp_capabilities(&self) -> PpCapabilities;

    /// Create a post-processor instance
    fn create_pp(&mut self) -> Result<PpId>;

    /// Tear down an instance; its tasks are dropped without callbacks
    fn destroy_pp(&mut self, id: PpId) -> Result<()>;

    /// Access a live instance
    fn pp(&mut self, id: PpId) -> Result<&mut PpInstance>;

    /// Read one batch of device events and dispatch it.
    ///
    /// Returns `None` when the device had nothing to read, otherwise the
    /// number of IPP completions delivered to an instance.
    fn read_and_dispatch(&mut self) -> Result<Option<usize>>;

    /// Dispatch until the device has no more events
    fn handle_events(&mut self) -> Result<usize> {
        let mut total = 0;
        while let Some(n) = self.read_and_dispatch()? {
            total += n;
        }
        Ok(total)
    }

    /// Descriptor to poll for pending events
    fn event_fd(&self) -> Option<RawFd>;

    /// Screen capture; this hardware class has none
    fn create_capture(&mut self) -> Result<()> {
        Err(Error::NotImplemented("capture".into()))
    }
}

/// Event dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// IPP completions delivered to an instance
    pub ipp_events: u64,
    /// IPP completions for unknown instances
    pub unrouted: u64,
    /// Completions an instance failed to act on
    pub failed: u64,
    /// Vblank and page-flip events
    pub vblank: u64,
    /// Anything else
    pub other: u64,
}

/// SPRD post-processing backend
pub struct Backend {
    config: BackendConfig,
    device: SharedDevice,
    allocator: Arc<dyn SurfaceAllocator>,
    instances: BTreeMap<PpId, PpInstance>,
    next_id: PpId,
    event_buf: Vec<u8>,
    stats: DispatchStats,
}

impl Backend {
    pub fn new(
        config: BackendConfig,
        device: SharedDevice,
        allocator: Arc<dyn SurfaceAllocator>,
    ) -> Result<Self> {
        config.validate()?;
        let event_buf = vec![0; config.event_buffer_size];
        Ok(Self {
            config,
            device,
            allocator,
            instances: BTreeMap::new(),
            next_id: 1,
            event_buf,
            stats: DispatchStats::default(),
        })
    }

    /// Open the configured DRM node, allocating intermediates as dumb buffers
    pub fn open(config: BackendConfig) -> Result<Self> {
        let device = Arc::new(DrmDevice::open(&config.device)?);
        let allocator = Arc::new(DumbAllocator::new(device.clone()));
        Self::new(config, device, allocator)
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    pub fn allocator(&self) -> &Arc<dyn SurfaceAllocator> {
        &self.allocator
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn instance_ids(&self) -> Vec<PpId> {
        self.instances.keys().copied().collect()
    }

    /// No instance has work left
    pub fn is_idle(&self) -> bool {
        self.instances.values().all(PpInstance::is_idle)
    }

    /// Route the events in one read buffer
    pub fn dispatch(&mut self, bytes: &[u8]) -> usize {
        let mut delivered = 0;
        for event in parse_events(bytes) {
            match event {
                DrmEvent::Ipp(ipp) => {
                    let instance = PpId::try_from(ipp.user_data)
                        .ok()
                        .and_then(|id| self.instances.get_mut(&id));
                    let Some(instance) = instance else {
                        tracing::warn!(
                            "IPP event for unknown instance {} (job {})",
                            ipp.user_data,
                            ipp.job
                        );
                        self.stats.unrouted += 1;
                        continue;
                    };

                    if let Err(e) = instance.handle_event(&ipp) {
                        tracing::error!("PP {}: event handling failed: {}", instance.id(), e);
                        self.stats.failed += 1;
                    }
                    self.stats.ipp_events += 1;
                    delivered += 1;
                }
                DrmEvent::Vblank(_) | DrmEvent::FlipComplete(_) => self.stats.vblank += 1,
                DrmEvent::Unknown { kind, length } => {
                    tracing::trace!("skipping drm event {:#x} ({} bytes)", kind, length);
                    self.stats.other += 1;
                }
            }
        }
        delivered
    }
}

impl PpBackend for Backend {
    fn pp_capabilities(&self) -> PpCapabilities {
        PpCapabilities::new(&self.config.pp)
    }

    fn create_pp(&mut self) -> Result<PpId> {
        let id = self.next_id;
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| Error::OutOfMemory("PP instance ids exhausted".into()))?;

        let instance = PpInstance::new(
            id,
            self.device.clone(),
            self.allocator.clone(),
            self.config.pp.clone(),
        );
        self.instances.insert(id, instance);
        Ok(id)
    }

    fn destroy_pp(&mut self, id: PpId) -> Result<()> {
        let mut instance = self
            .instances
            .remove(&id)
            .ok_or_else(|| Error::InvalidParameter(format!("no PP instance {}", id)))?;
        instance.shutdown();
        Ok(())
    }

    fn pp(&mut self, id: PpId) -> Result<&mut PpInstance> {
        self.instances
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidParameter(format!("no PP instance {}", id)))
    }

    fn read_and_dispatch(&mut self) -> Result<Option<usize>> {
        let mut buf = std::mem::take(&mut self.event_buf);
        let read = self.device.read_events(&mut buf);
        let result = match read {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(self.dispatch(&buf[..n]))),
            Err(e) => Err(e),
        };
        self.event_buf = buf;
        result
    }

    fn event_fd(&self) -> Option<RawFd> {
        self.device.raw_fd()
    }
}
