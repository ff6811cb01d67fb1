//! Conversion tasks
//!
//! A task is one attached source/destination pair travelling through the
//! steps of the roadmap that was current when it was created.

use super::buffer::SurfaceRef;
use crate::device::JobId;
use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;

pub type TaskId = u64;

/// Completion callback, invoked with the caller's original source and
/// destination surfaces
pub type DoneHandler = Arc<dyn Fn(SurfaceRef, SurfaceRef) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Queued behind the active task
    Waiting,
    /// Current step is on the hardware
    Converting,
    /// Current step finished
    Done,
}

/// Buffers and job of one step
#[derive(Debug, Clone)]
pub struct TaskStep {
    pub job: JobId,
    pub src: SurfaceRef,
    pub dst: SurfaceRef,
}

pub struct Task {
    id: TaskId,
    index: u32,
    generation: u64,
    steps: Vec<TaskStep>,
    current: usize,
    status: TaskStatus,
    handler: Option<DoneHandler>,
}

impl Task {
    /// `steps` must be non-empty and chained: each step's destination is the
    /// next step's source.
    pub fn new(
        id: TaskId,
        index: u32,
        generation: u64,
        steps: Vec<TaskStep>,
        handler: Option<DoneHandler>,
    ) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::InvalidParameter(format!("task {} has no steps", id)));
        }
        Ok(Self {
            id,
            index,
            generation,
            steps,
            current: 0,
            status: TaskStatus::Waiting,
            handler,
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Hardware buffer index used for every step of this task
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Intermediate pool generation the task's scratch buffers came from
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn current_step(&self) -> usize {
        self.current
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn current(&self) -> &TaskStep {
        &self.steps[self.current]
    }

    pub fn steps(&self) -> &[TaskStep] {
        &self.steps
    }

    /// Caller's source surface
    pub fn source(&self) -> &SurfaceRef {
        &self.steps[0].src
    }

    /// Caller's destination surface
    pub fn destination(&self) -> &SurfaceRef {
        &self.steps[self.steps.len() - 1].dst
    }

    /// Whether any step runs on `job`
    pub fn uses_job(&self, job: JobId) -> bool {
        self.steps.iter().any(|s| s.job == job)
    }

    pub fn is_last_step(&self) -> bool {
        self.current + 1 == self.steps.len()
    }

    /// Waiting -> Converting
    pub fn begin(&mut self) -> Result<()> {
        self.transition(TaskStatus::Waiting, TaskStatus::Converting)
    }

    /// Converting -> Done
    pub fn finish_step(&mut self) -> Result<()> {
        self.transition(TaskStatus::Converting, TaskStatus::Done)
    }

    /// Done -> Converting on the next step
    pub fn advance(&mut self) -> Result<()> {
        if self.is_last_step() {
            return Err(Error::BadRequest(format!(
                "task {} has no step after {}",
                self.id, self.current
            )));
        }
        self.transition(TaskStatus::Done, TaskStatus::Converting)?;
        self.current += 1;
        Ok(())
    }

    /// Converting -> Waiting, for a first step the hardware never accepted
    pub fn requeue(&mut self) -> Result<()> {
        if self.current != 0 {
            return Err(Error::BadRequest(format!(
                "task {} is past its first step",
                self.id
            )));
        }
        self.transition(TaskStatus::Converting, TaskStatus::Waiting)
    }

    /// Take the completion callback; a task hands it out at most once
    pub fn take_handler(&mut self) -> Option<DoneHandler> {
        self.handler.take()
    }

    /// Intermediate surfaces, as `(step, surface)` pairs
    pub fn intermediates(&self) -> impl Iterator<Item = (usize, &SurfaceRef)> {
        let last = self.steps.len() - 1;
        self.steps[..last].iter().map(|s| &s.dst).enumerate()
    }

    /// Consume the task, yielding its intermediate surfaces
    pub fn into_intermediates(mut self) -> Vec<(usize, SurfaceRef)> {
        let last = self.steps.len() - 1;
        self.steps
            .drain(..last)
            .map(|s| s.dst)
            .enumerate()
            .collect()
    }

    fn transition(&mut self, from: TaskStatus, to: TaskStatus) -> Result<()> {
        if self.status != from {
            return Err(Error::BadRequest(format!(
                "task {} is {:?}, expected {:?}",
                self.id, self.status, from
            )));
        }
        self.status = to;
        Ok(())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("step", &format_args!("{}/{}", self.current + 1, self.steps.len()))
            .field("status", &self.status)
            .field("job", &self.current().job)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::SimAllocator;
    use crate::pp::buffer::SurfaceAllocator;
    use crate::types::{PixelFormat, Size};

    fn two_step_task(allocator: &SimAllocator) -> Task {
        let src = allocator.allocate(Size::FHD_1080P, PixelFormat::NV12).unwrap();
        let mid = allocator.allocate(Size::new(480, 270), PixelFormat::NV12).unwrap();
        let dst = allocator.allocate(Size::new(200, 100), PixelFormat::XRGB8888).unwrap();
        let steps = vec![
            TaskStep {
                job: 1,
                src: src.clone(),
                dst: mid.clone(),
            },
            TaskStep {
                job: 2,
                src: mid,
                dst,
            },
        ];
        Task::new(7, 0, 1, steps, None).unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let allocator = SimAllocator::new();
        let mut task = two_step_task(&allocator);
        assert_eq!(task.status(), TaskStatus::Waiting);
        assert_eq!(task.current().job, 1);

        task.begin().unwrap();
        task.finish_step().unwrap();
        task.advance().unwrap();
        assert_eq!(task.status(), TaskStatus::Converting);
        assert_eq!(task.current().job, 2);
        assert!(task.is_last_step());

        task.finish_step().unwrap();
        assert!(task.advance().is_err());
        assert_eq!(task.status(), TaskStatus::Done);
    }

    #[test]
    fn test_rejects_out_of_order_transitions() {
        let allocator = SimAllocator::new();
        let mut task = two_step_task(&allocator);
        assert!(task.finish_step().is_err());
        assert!(task.advance().is_err());
        task.begin().unwrap();
        assert!(task.begin().is_err());
        task.requeue().unwrap();
        assert_eq!(task.status(), TaskStatus::Waiting);
    }

    #[test]
    fn test_endpoints_and_intermediates() {
        let allocator = SimAllocator::new();
        let task = two_step_task(&allocator);
        assert_eq!(task.source().size(), Size::FHD_1080P);
        assert_eq!(task.destination().size(), Size::new(200, 100));
        assert!(task.uses_job(2));
        assert!(!task.uses_job(3));
        assert_eq!(task.intermediates().count(), 1);

        let mids = task.into_intermediates();
        assert_eq!(mids.len(), 1);
        assert_eq!(mids[0].0, 0);
        assert_eq!(mids[0].1.size(), Size::new(480, 270));
        drop(mids);
        assert_eq!(allocator.live(), 0);
    }

    #[test]
    fn test_empty_task_rejected() {
        assert!(Task::new(1, 0, 0, Vec::new(), None).is_err());
    }
}
