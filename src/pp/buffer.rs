//! Buffers seen by the post-processor
//!
//! Caller buffers and intermediate scratch buffers are both [`Surface`]s held
//! through [`SurfaceRef`]. A task keeps a reference on every surface it
//! touches until it completes or is dropped.

use super::roadmap::Roadmap;
use crate::device::IPP_MAX_PLANES;
use crate::error::{Error, Result};
use crate::types::{BufferConfig, PixelFormat, Size};
use std::fmt;
use std::sync::Arc;

/// Layout of one image plane inside a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneInfo {
    /// Bytes per row
    pub stride: u32,
    /// Byte offset of the first row
    pub offset: u32,
    /// Bytes used by the plane
    pub size: u32,
}

/// An image buffer backed by one or more GEM buffer objects
pub trait Surface: Send + Sync + fmt::Debug {
    fn size(&self) -> Size;

    fn format(&self) -> PixelFormat;

    /// GEM handles of the backing buffer objects, at most [`IPP_MAX_PLANES`]
    fn handles(&self) -> &[u32];

    fn planes(&self) -> &[PlaneInfo];

    fn num_planes(&self) -> usize {
        self.planes().len()
    }

    /// Handles in the fixed-size form a queue request carries
    fn queue_handles(&self) -> [u32; IPP_MAX_PLANES] {
        let mut out = [0; IPP_MAX_PLANES];
        for (slot, handle) in out.iter_mut().zip(self.handles()) {
            *slot = *handle;
        }
        out
    }
}

pub type SurfaceRef = Arc<dyn Surface>;

/// Source of scratch surfaces for intermediate steps
pub trait SurfaceAllocator: Send + Sync {
    fn allocate(&self, size: Size, format: PixelFormat) -> Result<SurfaceRef>;
}

/// Plane layout of a `size` image of `format` whose first plane is `pitch`
/// bytes wide, with all planes packed back to back in one allocation.
pub fn plane_layout(size: Size, format: PixelFormat, pitch: u32) -> Result<Vec<PlaneInfo>> {
    let layout = format.layout().ok_or(Error::UnknownFormat(format))?;
    let luma = PlaneInfo {
        stride: pitch,
        offset: 0,
        size: pitch * size.height,
    };
    let chroma_rows = size.height.div_ceil(layout.v_sub);

    let planes = match layout.planes {
        1 => vec![luma],
        2 => {
            let stride = pitch * 2 / layout.h_sub;
            vec![
                luma,
                PlaneInfo {
                    stride,
                    offset: luma.size,
                    size: stride * chroma_rows,
                },
            ]
        }
        _ => {
            let stride = pitch / layout.h_sub;
            let plane = stride * chroma_rows;
            vec![
                luma,
                PlaneInfo {
                    stride,
                    offset: luma.size,
                    size: plane,
                },
                PlaneInfo {
                    stride,
                    offset: luma.size + plane,
                    size: plane,
                },
            ]
        }
    };

    Ok(planes)
}

/// Scratch buffers for the intermediate steps of the current roadmap.
///
/// Surfaces handed out by [`acquire`](Self::acquire) come back through
/// [`release`](Self::release) tagged with the generation they were taken
/// under; once the roadmap changes, returns from older generations are
/// dropped instead of recycled.
pub struct IntermediatePool {
    allocator: Arc<dyn SurfaceAllocator>,
    generation: u64,
    configs: Vec<BufferConfig>,
    free: Vec<Vec<SurfaceRef>>,
    allocated: usize,
}

impl IntermediatePool {
    pub fn new(allocator: Arc<dyn SurfaceAllocator>) -> Self {
        Self {
            allocator,
            generation: 0,
            configs: Vec::new(),
            free: Vec::new(),
            allocated: 0,
        }
    }

    /// Resize the pool for a new roadmap, discarding cached surfaces
    pub fn rebuild(&mut self, roadmap: &Roadmap) {
        self.generation += 1;
        self.configs = (0..roadmap.intermediate_count())
            .filter_map(|i| roadmap.intermediate(i))
            .collect();
        self.free = vec![Vec::new(); self.configs.len()];
        tracing::debug!(
            "intermediate pool generation {}: {} step buffer(s)",
            self.generation,
            self.configs.len()
        );
    }

    /// Take a surface for intermediate step `step`, allocating if none is cached
    pub fn acquire(&mut self, step: usize) -> Result<SurfaceRef> {
        let config = *self.configs.get(step).ok_or_else(|| {
            Error::InvalidParameter(format!("no intermediate buffer for step {}", step))
        })?;

        if let Some(surface) = self.free[step].pop() {
            return Ok(surface);
        }

        let surface = self
            .allocator
            .allocate(config.size, config.format)
            .map_err(|e| match e {
                Error::OutOfMemory(_) => e,
                other => Error::OutOfMemory(format!(
                    "intermediate {} {}: {}",
                    config.format, config.size, other
                )),
            })?;
        self.allocated += 1;
        tracing::debug!(
            "allocated intermediate {} {} for step {}",
            config.format,
            config.size,
            step
        );
        Ok(surface)
    }

    /// Return a surface taken under `generation`
    pub fn release(&mut self, generation: u64, step: usize, surface: SurfaceRef) {
        if generation != self.generation {
            return;
        }
        if let Some(free) = self.free.get_mut(step) {
            free.push(surface);
        }
    }

    /// Drop every cached surface
    pub fn clear(&mut self) {
        self.free.iter_mut().for_each(Vec::clear);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Surfaces allocated over the pool's lifetime
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Surfaces currently cached for reuse
    pub fn cached(&self) -> usize {
        self.free.iter().map(Vec::len).sum()
    }
}

impl fmt::Debug for IntermediatePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntermediatePool")
            .field("generation", &self.generation)
            .field("configs", &self.configs)
            .field("allocated", &self.allocated)
            .field("cached", &self.cached())
            .finish()
    }
}
