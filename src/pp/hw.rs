//! Hardware control
//!
//! Thin layer over [`IppDevice`] that translates roadmap steps into property
//! records and keeps the run state of every job id it has touched, so that
//! redundant run-control transitions never reach the device.

use super::buffer::SurfaceRef;
use super::roadmap::StepSpec;
use crate::device::{
    BufferOp, IppCmd, IppCtrl, IppOp, IppProperty, IppSide, JobId, QueueRequest, SharedDevice,
    IPP_FLIP_HORIZONTAL,
};
use crate::error::{Error, Result};
use crate::format;
use crate::types::{BufferConfig, Transform};
use std::collections::HashMap;

/// Run state of one job id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Playing,
    Paused,
}

/// Run-control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    Play,
    Pause,
    Resume,
    Stop,
}

impl From<RunAction> for IppCtrl {
    fn from(action: RunAction) -> Self {
        match action {
            RunAction::Play => IppCtrl::Play,
            RunAction::Pause => IppCtrl::Pause,
            RunAction::Resume => IppCtrl::Resume,
            RunAction::Stop => IppCtrl::Stop,
        }
    }
}

/// Job configuration, buffer queueing and deduplicated run control
pub struct HwControl {
    device: SharedDevice,
    states: HashMap<JobId, RunState>,
}

impl HwControl {
    pub fn new(device: SharedDevice) -> Self {
        Self {
            device,
            states: HashMap::new(),
        }
    }

    /// Program one roadmap step into `job`, or into a new job when `None`
    pub fn configure(&mut self, job: Option<JobId>, step: &StepSpec) -> Result<JobId> {
        let property = IppProperty {
            job,
            cmd: IppCmd::M2M,
            src: side(&step.src, Transform::Normal)?,
            dst: side(&step.dst, step.transform)?,
        };

        let id = self.device.set_property(&property)?;
        self.states.entry(id).or_insert(RunState::Stopped);
        tracing::debug!(
            "configured job {} ({} -> {}, {:?})",
            id,
            step.src,
            step.dst,
            step.transform
        );
        Ok(id)
    }

    /// Enqueue or dequeue a source/destination pair on `job`
    pub fn queue(
        &self,
        job: JobId,
        index: u32,
        src: &SurfaceRef,
        dst: &SurfaceRef,
        buf_op: BufferOp,
        user_data: u64,
    ) -> Result<()> {
        for (op, surface) in [(IppOp::Src, src), (IppOp::Dst, dst)] {
            self.device.queue_buffer(&QueueRequest {
                job,
                op,
                buf_op,
                index,
                handles: surface.queue_handles(),
                user_data,
            })?;
        }
        Ok(())
    }

    /// Apply a run-control action, skipping transitions that are already in effect
    pub fn control(&mut self, job: JobId, action: RunAction) -> Result<()> {
        let state = self.state(job);

        let next = match (state, action) {
            (RunState::Playing, RunAction::Play | RunAction::Resume) => return Ok(()),
            (RunState::Paused | RunState::Stopped, RunAction::Pause) => return Ok(()),
            (RunState::Stopped, RunAction::Stop) => {
                self.states.remove(&job);
                return Ok(());
            }
            (RunState::Paused, RunAction::Play) => {
                return Err(Error::BadRequest(format!(
                    "job {} is paused; resume it instead of play",
                    job
                )))
            }
            (RunState::Stopped, RunAction::Resume) => {
                return Err(Error::BadRequest(format!(
                    "job {} is stopped; play it instead of resume",
                    job
                )))
            }
            (RunState::Stopped, RunAction::Play) | (RunState::Paused, RunAction::Resume) => {
                RunState::Playing
            }
            (RunState::Playing, RunAction::Pause) => RunState::Paused,
            (RunState::Playing | RunState::Paused, RunAction::Stop) => RunState::Stopped,
        };

        self.device.cmd_control(job, action.into())?;

        if next == RunState::Stopped {
            self.states.remove(&job);
        } else {
            self.states.insert(job, next);
        }
        tracing::debug!("job {}: {:?} -> {:?}", job, state, next);
        Ok(())
    }

    /// Get `job` running: play from stopped, resume from paused
    pub fn start(&mut self, job: JobId) -> Result<()> {
        match self.state(job) {
            RunState::Stopped => self.control(job, RunAction::Play),
            RunState::Paused => self.control(job, RunAction::Resume),
            RunState::Playing => Ok(()),
        }
    }

    /// Tracked run state; untracked job ids are stopped
    pub fn state(&self, job: JobId) -> RunState {
        self.states.get(&job).copied().unwrap_or(RunState::Stopped)
    }

    /// Job ids with a run-state entry
    pub fn jobs(&self) -> Vec<JobId> {
        let mut jobs: Vec<JobId> = self.states.keys().copied().collect();
        jobs.sort_unstable();
        jobs
    }

    /// Stop every tracked job, returning the first failure
    pub fn stop_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for job in self.jobs() {
            if let Err(e) = self.control(job, RunAction::Stop) {
                tracing::error!("Failed to stop job {}: {}", job, e);
                // Forget it anyway; the id is not reused after teardown
                self.states.remove(&job);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }
}

fn side(config: &BufferConfig, transform: Transform) -> Result<IppSide> {
    Ok(IppSide {
        format: format::drm_code(config.format)?,
        size: config.size,
        crop: config.crop,
        degree: transform.quarter_turns(),
        flip: if transform.is_flipped() {
            IPP_FLIP_HORIZONTAL
        } else {
            0
        },
    })
}
