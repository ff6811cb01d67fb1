//! Pixel post-processing
//!
//! Converts between formats, scales, rotates and crops buffers on the SPRD
//! IPP unit. Conversions whose scale ratio is beyond one hardware pass are
//! split into a multi-step [`roadmap::Roadmap`] and run step by step through
//! a [`PpInstance`].

pub mod buffer;
pub mod hw;
pub mod instance;
pub mod planner;
pub mod roadmap;
pub mod task;

pub use buffer::{IntermediatePool, PlaneInfo, Surface, SurfaceAllocator, SurfaceRef};
pub use hw::{HwControl, RunAction, RunState};
pub use instance::{PpId, PpInstance};
pub use roadmap::{Roadmap, StepSpec};
pub use task::{DoneHandler, Task, TaskId, TaskStatus};

use crate::config::PpConfig;
use crate::types::PixelFormat;

/// Formats the IPP unit reads and writes
pub const PP_FORMATS: [PixelFormat; 9] = [
    PixelFormat::XRGB8888,
    PixelFormat::RGB565,
    PixelFormat::YUYV,
    PixelFormat::UYVY,
    PixelFormat::NV12,
    PixelFormat::NV21,
    PixelFormat::YUV420,
    PixelFormat::YVU420,
    PixelFormat::YUV444,
];

/// What the post-processor can do, as reported to the display manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpCapabilities {
    pub formats: Vec<PixelFormat>,
    pub min_width: u32,
    pub min_height: u32,
    /// None = not defined
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub preferred_align: u32,
    /// Completion is reported through events
    pub supports_async: bool,
    /// Blocking conversions
    pub supports_sync: bool,
    /// Longest roadmap the scheduler will build
    pub max_steps: usize,
}

impl PpCapabilities {
    pub fn new(config: &PpConfig) -> Self {
        Self {
            formats: PP_FORMATS.to_vec(),
            min_width: config.min_width,
            min_height: config.min_height,
            max_width: config.max_width,
            max_height: config.max_height,
            preferred_align: config.preferred_align,
            supports_async: true,
            supports_sync: false,
            max_steps: config.max_steps,
        }
    }

    pub fn supports_format(&self, format: PixelFormat) -> bool {
        self.formats.contains(&format)
    }
}
