//! DRM IPP ioctl bindings
//!
//! Fixed-layout records for the SPRD IPP extension and the generic DRM
//! dumb-buffer requests, plus [`DrmDevice`], the [`IppDevice`] backed by a
//! real DRM node.

use super::{IppCtrl, IppDevice, IppOp, IppProperty, IppSide, JobId, QueueRequest};
use crate::error::{Error, Result};
use crate::pp::buffer::{plane_layout, PlaneInfo, Surface, SurfaceAllocator, SurfaceRef};
use crate::types::{PixelFormat, Size};

use nix::ioctl_readwrite;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DRM_IOCTL_BASE: u8 = b'd';
const DRM_COMMAND_BASE: u8 = 0x40;

const SPRD_IPP_SET_PROPERTY_NR: u8 = DRM_COMMAND_BASE + 0x31;
const SPRD_IPP_QUEUE_BUF_NR: u8 = DRM_COMMAND_BASE + 0x32;
const SPRD_IPP_CMD_CTRL_NR: u8 = DRM_COMMAND_BASE + 0x33;
const MODE_CREATE_DUMB_NR: u8 = 0xb2;
const MODE_DESTROY_DUMB_NR: u8 = 0xb4;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmSprdSz {
    pub hsize: u32,
    pub vsize: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmSprdPos {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// One side of a property
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmSprdIppConfig {
    pub ops_id: u32,
    pub flip: u32,
    pub degree: u32,
    pub fmt: u32,
    pub sz: DrmSprdSz,
    pub pos: DrmSprdPos,
}

/// [sprd_ipp_set_property] parameter type
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmSprdIppProperty {
    pub config: [DrmSprdIppConfig; 2],
    pub cmd: u32,
    pub ipp_id: u32,
    /// 0 on input asks for a new property id
    pub prop_id: u32,
    pub refresh_rate: u32,
}
ioctl_readwrite!(
    /// Configure (or create) an IPP property
    sprd_ipp_set_property,
    DRM_IOCTL_BASE, SPRD_IPP_SET_PROPERTY_NR, DrmSprdIppProperty);

/// [sprd_ipp_queue_buf] parameter type
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmSprdIppQueueBuf {
    pub ops_id: u32,
    pub buf_type: u32,
    pub prop_id: u32,
    pub buf_id: u32,
    pub handle: [u32; 3],
    pub reserved: u32,
    pub user_data: u64,
}
ioctl_readwrite!(
    /// Enqueue or dequeue a buffer on one side of a property
    sprd_ipp_queue_buf,
    DRM_IOCTL_BASE, SPRD_IPP_QUEUE_BUF_NR, DrmSprdIppQueueBuf);

/// [sprd_ipp_cmd_ctrl] parameter type
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmSprdIppCmdCtrl {
    pub prop_id: u32,
    pub ctrl: u32,
}
ioctl_readwrite!(
    /// Play, stop, pause or resume a property
    sprd_ipp_cmd_ctrl,
    DRM_IOCTL_BASE, SPRD_IPP_CMD_CTRL_NR, DrmSprdIppCmdCtrl);

/// [mode_create_dumb] parameter type
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmModeCreateDumb {
    pub height: u32,
    pub width: u32,
    pub bpp: u32,
    pub flags: u32,
    pub handle: u32,
    pub pitch: u32,
    pub size: u64,
}
ioctl_readwrite!(
    /// Allocate a dumb scanout buffer
    mode_create_dumb,
    DRM_IOCTL_BASE, MODE_CREATE_DUMB_NR, DrmModeCreateDumb);

/// [mode_destroy_dumb] parameter type
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmModeDestroyDumb {
    pub handle: u32,
}
ioctl_readwrite!(
    /// Release a dumb buffer handle
    mode_destroy_dumb,
    DRM_IOCTL_BASE, MODE_DESTROY_DUMB_NR, DrmModeDestroyDumb);

impl DrmSprdIppConfig {
    fn new(op: IppOp, side: &IppSide) -> Self {
        Self {
            ops_id: op as u32,
            flip: side.flip,
            degree: side.degree,
            fmt: side.format,
            sz: DrmSprdSz {
                hsize: side.size.width,
                vsize: side.size.height,
            },
            pos: DrmSprdPos {
                x: side.crop.x,
                y: side.crop.y,
                w: side.crop.w,
                h: side.crop.h,
            },
        }
    }
}

impl From<&IppProperty> for DrmSprdIppProperty {
    fn from(property: &IppProperty) -> Self {
        Self {
            config: [
                DrmSprdIppConfig::new(IppOp::Src, &property.src),
                DrmSprdIppConfig::new(IppOp::Dst, &property.dst),
            ],
            cmd: property.cmd as u32,
            ipp_id: 0,
            prop_id: property.job.unwrap_or(0),
            refresh_rate: 0,
        }
    }
}

impl From<&QueueRequest> for DrmSprdIppQueueBuf {
    fn from(request: &QueueRequest) -> Self {
        Self {
            ops_id: request.op as u32,
            buf_type: request.buf_op as u32,
            prop_id: request.job,
            buf_id: request.index,
            handle: request.handles,
            reserved: 0,
            user_data: request.user_data,
        }
    }
}

/// A DRM device node
pub struct DrmDevice {
    file: File,
    path: PathBuf,
}

impl DrmDevice {
    /// Open a DRM node for non-blocking event reads
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC | libc::O_NONBLOCK)
            .open(path)?;
        tracing::info!("Opened DRM device {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Allocate a dumb buffer, returning `(handle, pitch, size)`
    pub fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> Result<(u32, u32, u64)> {
        let mut req = DrmModeCreateDumb {
            width,
            height,
            bpp,
            ..Default::default()
        };
        unsafe { mode_create_dumb(self.fd(), &mut req) }
            .map_err(|e| Error::ioctl("MODE_CREATE_DUMB", e))?;
        tracing::debug!(
            "dumb buffer {}x{}@{}: handle {} pitch {} size {}",
            width,
            height,
            bpp,
            req.handle,
            req.pitch,
            req.size
        );
        Ok((req.handle, req.pitch, req.size))
    }

    pub fn destroy_dumb(&self, handle: u32) -> Result<()> {
        let mut req = DrmModeDestroyDumb { handle };
        unsafe { mode_destroy_dumb(self.fd(), &mut req) }
            .map_err(|e| Error::ioctl("MODE_DESTROY_DUMB", e))?;
        Ok(())
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl IppDevice for DrmDevice {
    fn set_property(&self, property: &IppProperty) -> Result<JobId> {
        let mut raw = DrmSprdIppProperty::from(property);
        tracing::debug!(
            "set_property prop_id({}) src({} {}x{} deg {} flip {}) dst({} {}x{} deg {} flip {})",
            raw.prop_id,
            PixelFormat(raw.config[0].fmt),
            raw.config[0].sz.hsize,
            raw.config[0].sz.vsize,
            raw.config[0].degree,
            raw.config[0].flip,
            PixelFormat(raw.config[1].fmt),
            raw.config[1].sz.hsize,
            raw.config[1].sz.vsize,
            raw.config[1].degree,
            raw.config[1].flip
        );
        unsafe { sprd_ipp_set_property(self.fd(), &mut raw) }.map_err(|e| {
            tracing::error!("SET_PROPERTY failed for prop_id({}): {}", raw.prop_id, e);
            Error::ioctl("SPRD_IPP_SET_PROPERTY", e)
        })?;
        Ok(raw.prop_id)
    }

    fn queue_buffer(&self, request: &QueueRequest) -> Result<()> {
        let mut raw = DrmSprdIppQueueBuf::from(request);
        tracing::debug!(
            "queue_buf prop_id({}) ops_id({}) type({}) id({}) handles({:x} {:x} {:x})",
            raw.prop_id,
            raw.ops_id,
            raw.buf_type,
            raw.buf_id,
            raw.handle[0],
            raw.handle[1],
            raw.handle[2]
        );
        unsafe { sprd_ipp_queue_buf(self.fd(), &mut raw) }.map_err(|e| {
            tracing::error!(
                "QUEUE_BUF failed: prop_id({}) op({:?}) {:?} id({}): {}",
                raw.prop_id,
                request.op,
                request.buf_op,
                raw.buf_id,
                e
            );
            Error::ioctl("SPRD_IPP_QUEUE_BUF", e)
        })?;
        Ok(())
    }

    fn cmd_control(&self, job: JobId, ctrl: IppCtrl) -> Result<()> {
        let mut raw = DrmSprdIppCmdCtrl {
            prop_id: job,
            ctrl: ctrl as u32,
        };
        tracing::debug!("cmd_ctrl prop_id({}) {:?}", job, ctrl);
        unsafe { sprd_ipp_cmd_ctrl(self.fd(), &mut raw) }.map_err(|e| {
            tracing::error!("CMD_CTRL {:?} failed for prop_id({}): {}", ctrl, job, e);
            Error::ioctl("SPRD_IPP_CMD_CTRL", e)
        })?;
        Ok(())
    }

    fn read_events(&self, buf: &mut [u8]) -> Result<usize> {
        match (&self.file).read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.fd())
    }
}

/// A dumb buffer; the handle is destroyed on drop
#[derive(Debug)]
pub struct DumbSurface {
    device: Arc<DrmDevice>,
    handles: [u32; 1],
    size: Size,
    format: PixelFormat,
    planes: Vec<PlaneInfo>,
}

impl Surface for DumbSurface {
    fn size(&self) -> Size {
        self.size
    }

    fn format(&self) -> PixelFormat {
        self.format
    }

    fn handles(&self) -> &[u32] {
        &self.handles
    }

    fn planes(&self) -> &[PlaneInfo] {
        &self.planes
    }
}

impl Drop for DumbSurface {
    fn drop(&mut self) {
        if let Err(e) = self.device.destroy_dumb(self.handles[0]) {
            tracing::warn!("Failed to destroy dumb buffer {}: {}", self.handles[0], e);
        }
    }
}

impl std::fmt::Debug for DrmDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrmDevice")
            .field("path", &self.path)
            .field("fd", &self.fd())
            .finish()
    }
}

/// Allocates surfaces as single dumb buffers holding every plane
pub struct DumbAllocator {
    device: Arc<DrmDevice>,
}

impl DumbAllocator {
    pub fn new(device: Arc<DrmDevice>) -> Self {
        Self { device }
    }
}

impl SurfaceAllocator for DumbAllocator {
    fn allocate(&self, size: Size, format: PixelFormat) -> Result<SurfaceRef> {
        let layout = format.layout().ok_or(Error::UnknownFormat(format))?;
        let (handle, pitch, _) =
            self.device
                .create_dumb(size.width, layout.total_rows(size), layout.bpp)?;

        let planes = match plane_layout(size, format, pitch) {
            Ok(planes) => planes,
            Err(e) => {
                if let Err(de) = self.device.destroy_dumb(handle) {
                    tracing::warn!("Failed to destroy dumb buffer {}: {}", handle, de);
                }
                return Err(e);
            }
        };

        Ok(Arc::new(DumbSurface {
            device: self.device.clone(),
            handles: [handle],
            size,
            format,
            planes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BufferOp, IppCmd};
    use crate::types::Rect;

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<DrmSprdIppConfig>(), 40);
        assert_eq!(std::mem::size_of::<DrmSprdIppProperty>(), 96);
        assert_eq!(std::mem::size_of::<DrmSprdIppQueueBuf>(), 40);
        assert_eq!(std::mem::size_of::<DrmSprdIppCmdCtrl>(), 8);
        assert_eq!(std::mem::size_of::<DrmModeCreateDumb>(), 32);
    }

    #[test]
    fn test_property_conversion() {
        let property = IppProperty {
            job: None,
            cmd: IppCmd::M2M,
            src: IppSide {
                format: crate::format::to_drm(PixelFormat::NV12).unwrap(),
                size: Size::FHD_1080P,
                crop: Rect::new(0, 0, 1920, 1080),
                degree: 0,
                flip: 0,
            },
            dst: IppSide {
                format: crate::format::to_drm(PixelFormat::XRGB8888).unwrap(),
                size: Size::HD_720P,
                crop: Rect::new(10, 20, 640, 360),
                degree: 1,
                flip: crate::device::IPP_FLIP_HORIZONTAL,
            },
        };
        let raw = DrmSprdIppProperty::from(&property);
        assert_eq!(raw.prop_id, 0);
        assert_eq!(raw.config[0].ops_id, IppOp::Src as u32);
        assert_eq!(raw.config[1].ops_id, IppOp::Dst as u32);
        assert_eq!(raw.config[1].pos.x, 10);
        assert_eq!(raw.config[1].sz.vsize, 720);
        assert_eq!(raw.config[1].degree, 1);
        assert_eq!(raw.config[1].flip, 2);
    }

    #[test]
    fn test_queue_conversion() {
        let request = QueueRequest {
            job: 4,
            op: IppOp::Dst,
            buf_op: BufferOp::Dequeue,
            index: 2,
            handles: [7, 0, 0],
            user_data: 9,
        };
        let raw = DrmSprdIppQueueBuf::from(&request);
        assert_eq!(raw.prop_id, 4);
        assert_eq!(raw.ops_id, 1);
        assert_eq!(raw.buf_type, 1);
        assert_eq!(raw.buf_id, 2);
        assert_eq!(raw.handle, [7, 0, 0]);
        assert_eq!(raw.user_data, 9);
    }

    #[test]
    fn test_open_missing_node() {
        let dir = tempfile::tempdir().unwrap();
        let err = DrmDevice::open(dir.path().join("card9")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
