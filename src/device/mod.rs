//! IPP device interface
//!
//! The scheduler talks to the image post-processor through the three
//! control-plane requests of the DRM IPP extension plus the device's event
//! stream. [`IppDevice`] abstracts over a real DRM node ([`ioctl::DrmDevice`])
//! and the in-process simulator ([`sim::SimDevice`]).

pub mod event;
pub mod ioctl;
pub mod sim;

use crate::error::Result;
use crate::types::{Rect, Size};
use std::os::fd::RawFd;
use std::sync::Arc;

/// Hardware property (job) id
pub type JobId = u32;

/// Side of a conversion a request applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum IppOp {
    Src = 0,
    Dst = 1,
}

/// Buffer queue direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BufferOp {
    Enqueue = 0,
    Dequeue = 1,
}

/// Run-control command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum IppCtrl {
    Play = 0,
    Stop = 1,
    Pause = 2,
    Resume = 3,
}

/// Conversion command kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum IppCmd {
    /// Memory to memory
    #[default]
    M2M = 0,
}

/// Horizontal flip bit in [`IppSide::flip`]
pub const IPP_FLIP_HORIZONTAL: u32 = 1 << 1;

/// Number of buffer-object handles one side of a queue request carries
pub const IPP_MAX_PLANES: usize = 3;

/// Format, geometry and orientation of one side of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IppSide {
    /// DRM fourcc
    pub format: u32,
    pub size: Size,
    pub crop: Rect,
    /// Quarter turns clockwise
    pub degree: u32,
    pub flip: u32,
}

/// SetProperty request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IppProperty {
    /// Job to reconfigure; `None` asks the device for a new one
    pub job: Option<JobId>,
    pub cmd: IppCmd,
    pub src: IppSide,
    pub dst: IppSide,
}

/// QueueBuffer request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRequest {
    pub job: JobId,
    pub op: IppOp,
    pub buf_op: BufferOp,
    /// Buffer index, echoed back in the completion event
    pub index: u32,
    pub handles: [u32; IPP_MAX_PLANES],
    /// Echoed back in the completion event
    pub user_data: u64,
}

/// Control-plane access to the IPP unit
pub trait IppDevice: Send + Sync {
    /// Configure a job, returning its (possibly newly assigned) id
    fn set_property(&self, property: &IppProperty) -> Result<JobId>;

    /// Enqueue or dequeue one side's buffer against a job
    fn queue_buffer(&self, request: &QueueRequest) -> Result<()>;

    /// Issue a run-control command on a job
    fn cmd_control(&self, job: JobId, ctrl: IppCtrl) -> Result<()>;

    /// Read pending event records into `buf`, returning the byte count.
    /// Returns 0 when nothing is pending.
    fn read_events(&self, buf: &mut [u8]) -> Result<usize>;

    /// Pollable descriptor signalling pending events, if the device has one
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

pub type SharedDevice = Arc<dyn IppDevice>;
