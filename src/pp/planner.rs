//! Scale step planning
//!
//! The IPP scaler can only change an extent by a bounded factor per pass.
//! Larger ratios are split into a chain of passes, each landing on the
//! extent closest to the target that one pass can reach.

use crate::config::PpConfig;
use crate::error::{Error, Result};
use crate::types::Size;

/// Whether one hardware pass can scale `src` to `dst`
pub fn single_pass(src: u32, dst: u32, config: &PpConfig) -> bool {
    let (src, dst) = (src as u64, dst as u64);
    src <= dst * config.max_downscale as u64 && dst <= src * config.max_upscale as u64
}

/// Plan the extents one axis passes through on its way from `src` to `dst`.
///
/// The returned list holds the destination extent of every pass, in order;
/// its last element is always `dst`.
pub fn plan_axis(src: u32, dst: u32, config: &PpConfig) -> Result<Vec<u32>> {
    if src == 0 || dst == 0 {
        return Err(Error::InvalidParameter(format!(
            "cannot scale extent {} to {}",
            src, dst
        )));
    }

    let mut extents = Vec::with_capacity(config.max_steps);
    let mut current = src;

    loop {
        if single_pass(current, dst, config) {
            extents.push(dst);
            return Ok(extents);
        }

        // Another intermediate would leave no pass for the final extent
        if extents.len() + 1 >= config.max_steps {
            return Err(Error::ScaleUnsupported {
                src,
                dst,
                max_steps: config.max_steps,
            });
        }

        let next = if dst < current {
            current.div_ceil(config.max_downscale)
        } else {
            let up = current as u64 * config.max_upscale as u64;
            u32::try_from(up).map_err(|_| Error::ScaleUnsupported {
                src,
                dst,
                max_steps: config.max_steps,
            })?
        };

        tracing::trace!("axis {} -> {}: intermediate extent {}", src, dst, next);
        extents.push(next);
        current = next;
    }
}

/// Plan both axes of a conversion.
///
/// Axes that need fewer passes than the other are padded at the front with
/// pass-through steps pinned to their source extent, so every returned size
/// is reachable in one pass from the previous one. Opposite scale directions
/// on the two axes are handled the same way.
pub fn plan(src: Size, dst: Size, config: &PpConfig) -> Result<Vec<Size>> {
    let widths = plan_axis(src.width, dst.width, config)?;
    let heights = plan_axis(src.height, dst.height, config)?;
    let steps = widths.len().max(heights.len());

    let widths = pad_axis(widths, src.width, steps);
    let heights = pad_axis(heights, src.height, steps);

    Ok(widths
        .into_iter()
        .zip(heights)
        .map(|(w, h)| Size::new(w, h))
        .collect())
}

fn pad_axis(extents: Vec<u32>, src: u32, steps: usize) -> Vec<u32> {
    let padding = steps - extents.len();
    std::iter::repeat(src).take(padding).chain(extents).collect()
}
