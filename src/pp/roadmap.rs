//! Multi-pass conversion roadmaps
//!
//! A [`Roadmap`] turns one requested conversion into the ordered list of
//! single-pass hardware conversions that realise it. Pass N writes into an
//! intermediate buffer that pass N+1 reads from. Rotation and flip happen in
//! the first pass; format conversion happens in the last.

use super::planner;
use crate::config::PpConfig;
use crate::error::{Error, Result};
use crate::types::{BufferConfig, ConversionSpec, Transform};

/// One hardware pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSpec {
    pub src: BufferConfig,
    pub dst: BufferConfig,
    pub transform: Transform,
}

/// Ordered hardware passes for one conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roadmap {
    steps: Vec<StepSpec>,
}

impl Roadmap {
    /// Build the roadmap for `spec` under the scaler limits in `config`
    pub fn build(spec: &ConversionSpec, config: &PpConfig) -> Result<Self> {
        if spec.sync {
            return Err(Error::InvalidConversion(
                "sync mode is not supported, completion is event driven".into(),
            ));
        }

        // The scaler sees the source in post-rotation orientation
        let src_extent = if spec.transform.swaps_axes() {
            spec.src.crop.extent().transposed()
        } else {
            spec.src.crop.extent()
        };
        let dst_extent = spec.dst.crop.extent();

        let sizes = planner::plan(src_extent, dst_extent, config).map_err(|e| {
            Error::InvalidConversion(format!("{} -> {}: {}", src_extent, dst_extent, e))
        })?;

        let last = sizes.len() - 1;
        let intermediate_format = spec.src.format;
        let mut steps = Vec::with_capacity(sizes.len());
        let mut src = spec.src;

        for (i, size) in sizes.into_iter().enumerate() {
            let dst = if i == last {
                spec.dst
            } else {
                BufferConfig::full(intermediate_format, size)
            };
            let transform = if i == 0 {
                spec.transform
            } else {
                Transform::Normal
            };

            steps.push(StepSpec {
                src,
                dst,
                transform,
            });
            src = dst;
        }

        tracing::debug!(
            "roadmap {} -> {} ({:?}): {} step(s)",
            spec.src,
            spec.dst,
            spec.transform,
            steps.len()
        );

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false; a roadmap has at least one step
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&StepSpec> {
        self.steps.get(index)
    }

    /// Descriptor of the intermediate buffer written by step `index`
    pub fn intermediate(&self, index: usize) -> Option<BufferConfig> {
        if index + 1 < self.steps.len() {
            Some(self.steps[index].dst)
        } else {
            None
        }
    }

    /// Number of intermediate buffers one task needs
    pub fn intermediate_count(&self) -> usize {
        self.steps.len() - 1
    }
}
