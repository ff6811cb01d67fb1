//! Post-processor instance and task scheduler
//!
//! A [`PpInstance`] owns one conversion setup: the roadmap built from the
//! last accepted [`ConversionSpec`], one hardware job per roadmap step, the
//! queue of attached buffer pairs and the tasks built from them.
//!
//! Only one task is ever on the hardware. Completion events advance it step
//! by step; after its last step the done handler runs and the next waiting
//! task is started. Nothing here blocks: waiting for the hardware is the
//! active task sitting in [`TaskStatus::Converting`].
//!
//! When the conversion setup changes while tasks are live, those tasks finish
//! on the jobs they captured at creation. Jobs still referenced by a live task
//! are retired instead of reprogrammed and stopped once the last such task is
//! gone; only tasks created after the change use the new roadmap.

use super::buffer::{IntermediatePool, SurfaceAllocator, SurfaceRef};
use super::hw::{HwControl, RunAction};
use super::roadmap::Roadmap;
use super::task::{DoneHandler, Task, TaskId, TaskStatus, TaskStep};
use super::PP_FORMATS;
use crate::config::PpConfig;
use crate::device::event::IppEvent;
use crate::device::{BufferOp, JobId, SharedDevice, IPP_MAX_PLANES};
use crate::error::{Error, Result};
use crate::format;
use crate::types::{BufferConfig, ConversionSpec};

use std::collections::VecDeque;
use std::sync::Arc;

/// Post-processor instance id, also the user data of its queue requests
pub type PpId = u32;

pub struct PpInstance {
    id: PpId,
    config: PpConfig,
    hw: HwControl,
    pool: IntermediatePool,
    info: Option<ConversionSpec>,
    roadmap: Option<Roadmap>,
    roadmap_changed: bool,
    /// Job per step of the current roadmap
    step_jobs: Vec<JobId>,
    /// Jobs of earlier roadmaps still referenced by live tasks
    retired_jobs: Vec<JobId>,
    pending: VecDeque<(SurfaceRef, SurfaceRef)>,
    waiting: VecDeque<Task>,
    active: Option<Task>,
    done_handler: Option<DoneHandler>,
    next_task_id: TaskId,
    shut_down: bool,
}

impl PpInstance {
    pub fn new(
        id: PpId,
        device: SharedDevice,
        allocator: Arc<dyn SurfaceAllocator>,
        config: PpConfig,
    ) -> Self {
        tracing::info!("PP instance {} created", id);
        Self {
            id,
            config,
            hw: HwControl::new(device),
            pool: IntermediatePool::new(allocator),
            info: None,
            roadmap: None,
            roadmap_changed: false,
            step_jobs: Vec::new(),
            retired_jobs: Vec::new(),
            pending: VecDeque::new(),
            waiting: VecDeque::new(),
            active: None,
            done_handler: None,
            next_task_id: 1,
            shut_down: false,
        }
    }

    pub fn id(&self) -> PpId {
        self.id
    }

    /// Set the conversion parameters.
    ///
    /// On failure the previously installed roadmap stays in effect.
    pub fn set_info(&mut self, spec: ConversionSpec) -> Result<()> {
        self.ensure_live()?;
        if spec.sync {
            return Err(Error::InvalidConversion(
                "sync mode is not supported, completion is event driven".into(),
            ));
        }
        validate_buffer("source", &spec.src, &self.config)?;
        validate_buffer("destination", &spec.dst, &self.config)?;

        let roadmap = Roadmap::build(&spec, &self.config)?;

        if self.info.as_ref() == Some(&spec) {
            tracing::debug!("PP {}: conversion unchanged", self.id);
            return Ok(());
        }

        tracing::info!(
            "PP {}: {} -> {} ({:?}) in {} step(s)",
            self.id,
            spec.src,
            spec.dst,
            spec.transform,
            roadmap.len()
        );
        self.pool.rebuild(&roadmap);
        self.info = Some(spec);
        self.roadmap = Some(roadmap);
        self.roadmap_changed = true;
        Ok(())
    }

    /// Register the completion callback. Tasks that captured no handler when
    /// they were built use the one registered at completion time.
    pub fn set_done_handler<F>(&mut self, handler: F)
    where
        F: Fn(SurfaceRef, SurfaceRef) + Send + Sync + 'static,
    {
        self.done_handler = Some(Arc::new(handler));
    }

    /// Queue a source/destination pair for the next commit. With info set,
    /// each surface must have the configured format and be at least the
    /// configured size.
    pub fn attach(&mut self, src: SurfaceRef, dst: SurfaceRef) -> Result<()> {
        self.ensure_live()?;
        for (side, surface) in [("source", &src), ("destination", &dst)] {
            let handles = surface.handles().len();
            if handles == 0 || handles > IPP_MAX_PLANES {
                return Err(Error::InvalidParameter(format!(
                    "{} surface has {} buffer objects",
                    side, handles
                )));
            }
        }
        if let Some(info) = &self.info {
            check_surface("source", &src, &info.src)?;
            check_surface("destination", &dst, &info.dst)?;
        }
        tracing::debug!(
            "PP {}: attached {} {} -> {} {}",
            self.id,
            src.format(),
            src.size(),
            dst.format(),
            dst.size()
        );
        self.pending.push_back((src, dst));
        Ok(())
    }

    /// Program the hardware for the current roadmap, turn attached pairs into
    /// tasks and start the oldest one if the hardware is idle.
    ///
    /// A failure leaves unconsumed pairs and unstarted tasks queued so the
    /// commit can be retried.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_live()?;
        let Some(roadmap) = self.roadmap.clone() else {
            return Err(Error::BadRequest(format!(
                "PP {}: commit before conversion info was set",
                self.id
            )));
        };

        if self.roadmap_changed {
            self.sync_jobs(&roadmap)?;
            self.roadmap_changed = false;
        }

        self.drain_pending(&roadmap)?;
        self.start_next()
    }

    /// Handle an IPP completion event addressed to this instance.
    ///
    /// Events that do not match the step on the hardware are ignored. An
    /// error means the active task could not make progress and is stalled
    /// until [`cancel_active`](Self::cancel_active).
    pub fn handle_event(&mut self, event: &IppEvent) -> Result<()> {
        let Some(mut task) = self.active.take() else {
            tracing::warn!(
                "PP {}: event for job {} buf {:?} with no active task",
                self.id,
                event.job,
                event.buf_id
            );
            return Ok(());
        };

        let job = task.current().job;
        if job != event.job || task.index() != event.buf_id[0] {
            tracing::warn!(
                "PP {}: ignoring event job {} buf {:?}, active task {} is on job {} buf {}",
                self.id,
                event.job,
                event.buf_id,
                task.id(),
                job,
                task.index()
            );
            self.active = Some(task);
            return Ok(());
        }
        if task.status() != TaskStatus::Converting {
            tracing::warn!(
                "PP {}: ignoring event for task {} in state {:?}",
                self.id,
                task.id(),
                task.status()
            );
            self.active = Some(task);
            return Ok(());
        }

        if let Err(e) = self.hw.control(job, RunAction::Pause) {
            tracing::error!("PP {}: failed to pause job {}: {}", self.id, job, e);
            self.active = Some(task);
            return Err(e);
        }
        if let Err(e) = task.finish_step() {
            self.active = Some(task);
            return Err(e);
        }

        tracing::debug!(
            "PP {}: task {} step {}/{} done",
            self.id,
            task.id(),
            task.current_step() + 1,
            task.step_count()
        );

        if !task.is_last_step() {
            if let Err(e) = task.advance() {
                self.active = Some(task);
                return Err(e);
            }
            let result = self.run_current(&task);
            if let Err(e) = &result {
                tracing::error!(
                    "PP {}: task {} stalled at step {}: {}",
                    self.id,
                    task.id(),
                    task.current_step() + 1,
                    e
                );
            }
            self.active = Some(task);
            return result;
        }

        self.complete(task);
        self.reap_retired_jobs();
        self.start_next().map_err(|e| {
            tracing::error!("PP {}: failed to start next task: {}", self.id, e);
            e
        })
    }

    /// Drop the task on the hardware without running its done handler and
    /// move on to the next waiting task. Returns whether a task was dropped.
    pub fn cancel_active(&mut self) -> Result<bool> {
        self.ensure_live()?;
        let Some(task) = self.active.take() else {
            return Ok(false);
        };

        tracing::warn!(
            "PP {}: cancelling task {} at step {}/{}",
            self.id,
            task.id(),
            task.current_step() + 1,
            task.step_count()
        );

        let step = task.current();
        let mut first_err = self
            .hw
            .queue(
                step.job,
                task.index(),
                &step.src,
                &step.dst,
                BufferOp::Dequeue,
                self.user_data(),
            )
            .err();
        if let Err(e) = self.hw.control(step.job, RunAction::Pause) {
            first_err.get_or_insert(e);
        }

        self.release(task);
        self.reap_retired_jobs();
        if let Err(e) = self.start_next() {
            first_err.get_or_insert(e);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(true),
        }
    }

    /// Tear the instance down: drop every task without callbacks, dequeue
    /// the buffers on the hardware and stop all jobs. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.pending.clear();
        self.waiting.clear();
        if let Some(task) = self.active.take() {
            let step = task.current();
            if let Err(e) = self.hw.queue(
                step.job,
                task.index(),
                &step.src,
                &step.dst,
                BufferOp::Dequeue,
                self.user_data(),
            ) {
                tracing::warn!("PP {}: dequeue of task {} failed: {}", self.id, task.id(), e);
            }
        }
        if let Err(e) = self.hw.stop_all() {
            tracing::warn!("PP {}: stopping jobs failed: {}", self.id, e);
        }

        self.step_jobs.clear();
        self.retired_jobs.clear();
        self.pool.clear();
        tracing::info!("PP instance {} destroyed", self.id);
    }

    pub fn info(&self) -> Option<&ConversionSpec> {
        self.info.as_ref()
    }

    pub fn roadmap(&self) -> Option<&Roadmap> {
        self.roadmap.as_ref()
    }

    pub fn active_task(&self) -> Option<&Task> {
        self.active.as_ref()
    }

    pub fn waiting_tasks(&self) -> impl Iterator<Item = &Task> {
        self.waiting.iter()
    }

    /// Attached pairs not yet turned into tasks
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Tasks currently in [`TaskStatus::Converting`]; never more than one
    pub fn converting_count(&self) -> usize {
        self.active
            .iter()
            .chain(self.waiting.iter())
            .filter(|t| t.status() == TaskStatus::Converting)
            .count()
    }

    /// No pairs or tasks left
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.waiting.is_empty() && self.pending.is_empty()
    }

    pub fn step_jobs(&self) -> &[JobId] {
        &self.step_jobs
    }

    pub fn retired_jobs(&self) -> &[JobId] {
        &self.retired_jobs
    }

    pub fn hw(&self) -> &HwControl {
        &self.hw
    }

    pub fn pool(&self) -> &IntermediatePool {
        &self.pool
    }

    fn ensure_live(&self) -> Result<()> {
        if self.shut_down {
            return Err(Error::BadRequest(format!("PP {} is destroyed", self.id)));
        }
        Ok(())
    }

    fn user_data(&self) -> u64 {
        self.id as u64
    }

    fn job_in_use(&self, job: JobId) -> bool {
        self.active.iter().chain(self.waiting.iter()).any(|t| t.uses_job(job))
    }

    /// Give every roadmap step a configured job
    fn sync_jobs(&mut self, roadmap: &Roadmap) -> Result<()> {
        let mut reusable = VecDeque::new();
        for job in std::mem::take(&mut self.step_jobs) {
            if self.job_in_use(job) {
                tracing::debug!("PP {}: retiring job {}", self.id, job);
                self.retired_jobs.push(job);
            } else {
                reusable.push_back(job);
            }
        }

        let mut configured = Vec::with_capacity(roadmap.len());
        for step in roadmap.steps() {
            let reuse = reusable.pop_front();
            let result = match reuse {
                Some(job) => self
                    .hw
                    .control(job, RunAction::Pause)
                    .and_then(|_| self.hw.configure(Some(job), step)),
                None => self.hw.configure(None, step),
            };

            match result {
                Ok(job) => configured.push(job),
                Err(e) => {
                    tracing::error!("PP {}: configuring step failed: {}", self.id, e);
                    if let Some(job) = reuse {
                        reusable.push_front(job);
                    }
                    configured.extend(reusable);
                    self.step_jobs = configured;
                    return Err(e);
                }
            }
        }

        for job in reusable {
            if let Err(e) = self.hw.control(job, RunAction::Stop) {
                tracing::warn!("PP {}: failed to stop unused job {}: {}", self.id, job, e);
            }
        }

        tracing::debug!("PP {}: step jobs {:?}", self.id, configured);
        self.step_jobs = configured;
        Ok(())
    }

    /// Stop retired jobs no live task references any more
    fn reap_retired_jobs(&mut self) {
        let retired = std::mem::take(&mut self.retired_jobs);
        for job in retired {
            if self.job_in_use(job) {
                self.retired_jobs.push(job);
            } else if let Err(e) = self.hw.control(job, RunAction::Stop) {
                tracing::warn!("PP {}: failed to stop retired job {}: {}", self.id, job, e);
            }
        }
    }

    fn drain_pending(&mut self, roadmap: &Roadmap) -> Result<()> {
        while let Some((src, dst)) = self.pending.pop_front() {
            match self.build_task(roadmap, &src, &dst) {
                Ok(task) => {
                    tracing::debug!("PP {}: created task {:?}", self.id, task);
                    self.waiting.push_back(task);
                }
                Err(e) => {
                    self.pending.push_front((src, dst));
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn build_task(
        &mut self,
        roadmap: &Roadmap,
        src: &SurfaceRef,
        dst: &SurfaceRef,
    ) -> Result<Task> {
        let generation = self.pool.generation();
        let mut intermediates = Vec::with_capacity(roadmap.intermediate_count());
        for step in 0..roadmap.intermediate_count() {
            match self.pool.acquire(step) {
                Ok(surface) => intermediates.push(surface),
                Err(e) => {
                    for (i, surface) in intermediates.into_iter().enumerate() {
                        self.pool.release(generation, i, surface);
                    }
                    return Err(e);
                }
            }
        }

        let last = roadmap.len() - 1;
        let steps = (0..roadmap.len())
            .map(|i| TaskStep {
                job: self.step_jobs[i],
                src: if i == 0 {
                    src.clone()
                } else {
                    intermediates[i - 1].clone()
                },
                dst: if i == last {
                    dst.clone()
                } else {
                    intermediates[i].clone()
                },
            })
            .collect();

        let id = self.next_task_id;
        self.next_task_id += 1;
        Task::new(
            id,
            self.free_index(),
            generation,
            steps,
            self.done_handler.clone(),
        )
    }

    /// Lowest buffer index no live task uses
    fn free_index(&self) -> u32 {
        let mut used: Vec<u32> = self
            .active
            .iter()
            .chain(self.waiting.iter())
            .map(Task::index)
            .collect();
        used.sort_unstable();
        let mut index = 0;
        for u in used {
            if u == index {
                index += 1;
            } else if u > index {
                break;
            }
        }
        index
    }

    /// Start the oldest waiting task if nothing is on the hardware
    fn start_next(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Ok(());
        }
        let Some(mut task) = self.waiting.pop_front() else {
            return Ok(());
        };

        task.begin()?;
        match self.run_current(&task) {
            Ok(()) => {
                tracing::debug!("PP {}: started task {}", self.id, task.id());
                self.active = Some(task);
                Ok(())
            }
            Err(e) => {
                let step = task.current();
                if let Err(dq) = self.hw.queue(
                    step.job,
                    task.index(),
                    &step.src,
                    &step.dst,
                    BufferOp::Dequeue,
                    self.user_data(),
                ) {
                    tracing::warn!(
                        "PP {}: dequeue of unstarted task {} failed: {}",
                        self.id,
                        task.id(),
                        dq
                    );
                }
                task.requeue()?;
                self.waiting.push_front(task);
                Err(e)
            }
        }
    }

    /// Queue the current step's buffers and get its job running
    fn run_current(&mut self, task: &Task) -> Result<()> {
        let step = task.current();
        self.hw.queue(
            step.job,
            task.index(),
            &step.src,
            &step.dst,
            BufferOp::Enqueue,
            self.user_data(),
        )?;
        self.hw.start(step.job)
    }

    fn complete(&mut self, mut task: Task) {
        tracing::debug!("PP {}: task {} complete", self.id, task.id());
        // Handlers registered after the task was built still apply
        let handler = task.take_handler().or_else(|| self.done_handler.clone());
        if let Some(handler) = handler {
            handler(task.source().clone(), task.destination().clone());
        }
        self.release(task);
    }

    fn release(&mut self, task: Task) {
        let generation = task.generation();
        for (step, surface) in task.into_intermediates() {
            self.pool.release(generation, step, surface);
        }
    }
}

impl Drop for PpInstance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PpInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PpInstance")
            .field("id", &self.id)
            .field("steps", &self.roadmap.as_ref().map(Roadmap::len))
            .field("step_jobs", &self.step_jobs)
            .field("pending", &self.pending.len())
            .field("waiting", &self.waiting.len())
            .field("active", &self.active)
            .finish()
    }
}

/// An attached surface must carry the configured format and be large
/// enough for the configured buffer size
fn check_surface(side: &str, surface: &SurfaceRef, expected: &BufferConfig) -> Result<()> {
    let size = surface.size();
    if surface.format() != expected.format
        || size.width < expected.size.width
        || size.height < expected.size.height
    {
        let msg = format!(
            "{} surface {} {} does not match configured {} {}",
            side,
            surface.format(),
            size,
            expected.format,
            expected.size
        );
        tracing::warn!("{}", msg);
        return Err(Error::InvalidParameter(msg));
    }
    Ok(())
}

fn validate_buffer(side: &str, buffer: &BufferConfig, config: &PpConfig) -> Result<()> {
    if !PP_FORMATS.contains(&buffer.format) {
        return Err(Error::UnknownFormat(buffer.format));
    }
    format::drm_code(buffer.format)?;

    let size = buffer.size;
    if size.width < config.min_width || size.height < config.min_height {
        return Err(Error::InvalidParameter(format!(
            "{} size {} below minimum {}x{}",
            side, size, config.min_width, config.min_height
        )));
    }
    if config.max_width.is_some_and(|max| size.width > max)
        || config.max_height.is_some_and(|max| size.height > max)
    {
        return Err(Error::InvalidParameter(format!(
            "{} size {} above maximum",
            side, size
        )));
    }
    if buffer.crop.is_empty() || !buffer.crop.fits_in(size) {
        return Err(Error::InvalidParameter(format!(
            "{} crop {} outside {}",
            side, buffer.crop, size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::event::{parse_events, DrmEvent};
    use crate::device::sim::{SimAllocator, SimCall, SimDevice, SimOp};
    use crate::device::{IppCtrl, IppDevice};
    use crate::error::ErrorKind;
    use crate::pp::hw::RunState;
    use crate::types::{PixelFormat, Rect, Size, Transform};
    use parking_lot::Mutex;

    type Completions = Arc<Mutex<Vec<(SurfaceRef, SurfaceRef)>>>;

    struct Harness {
        device: Arc<SimDevice>,
        allocator: Arc<SimAllocator>,
        pp: PpInstance,
        done: Completions,
    }

    impl Harness {
        fn new() -> Self {
            let device = Arc::new(SimDevice::new());
            let allocator = Arc::new(SimAllocator::new());
            let mut pp = PpInstance::new(
                5,
                device.clone(),
                allocator.clone(),
                PpConfig::default(),
            );
            let done: Completions = Arc::new(Mutex::new(Vec::new()));
            let sink = done.clone();
            pp.set_done_handler(move |src, dst| sink.lock().push((src, dst)));
            Self {
                device,
                allocator,
                pp,
                done,
            }
        }

        fn pair(&self, spec: &ConversionSpec) -> (SurfaceRef, SurfaceRef) {
            (
                self.allocator
                    .allocate(spec.src.size, spec.src.format)
                    .unwrap(),
                self.allocator
                    .allocate(spec.dst.size, spec.dst.format)
                    .unwrap(),
            )
        }

        fn attach(&mut self, spec: &ConversionSpec) -> (SurfaceRef, SurfaceRef) {
            let (src, dst) = self.pair(spec);
            self.pp.attach(src.clone(), dst.clone()).unwrap();
            (src, dst)
        }

        /// Deliver pending events until the device has none, checking the
        /// single-active-task invariant before each one
        fn pump(&mut self) -> usize {
            let mut handled = 0;
            loop {
                let mut buf = [0u8; 256];
                let n = self.device.read_events(&mut buf).unwrap();
                if n == 0 {
                    return handled;
                }
                for event in parse_events(&buf[..n]) {
                    if let DrmEvent::Ipp(e) = event {
                        assert!(self.pp.converting_count() <= 1);
                        assert!(self
                            .pp
                            .waiting_tasks()
                            .all(|t| t.status() == TaskStatus::Waiting));
                        self.pp.handle_event(&e).unwrap();
                        handled += 1;
                    }
                }
            }
        }

        fn deliver(&mut self, job: JobId) -> Result<()> {
            assert!(self.device.complete(job), "nothing queued on job {}", job);
            let mut buf = [0u8; 64];
            let n = self.device.read_events(&mut buf).unwrap();
            match parse_events(&buf[..n]).as_slice() {
                [DrmEvent::Ipp(e)] => self.pp.handle_event(e),
                other => panic!("unexpected events {:?}", other),
            }
        }

        fn completed(&self) -> usize {
            self.done.lock().len()
        }
    }

    fn single_step() -> ConversionSpec {
        ConversionSpec::new(
            BufferConfig::full(PixelFormat::NV12, Size::FHD_1080P),
            BufferConfig::full(PixelFormat::XRGB8888, Size::HD_720P),
        )
    }

    fn two_step() -> ConversionSpec {
        ConversionSpec::new(
            BufferConfig::full(PixelFormat::NV12, Size::FHD_1080P),
            BufferConfig::full(PixelFormat::XRGB8888, Size::new(200, 100)),
        )
    }

    #[test]
    fn test_single_step_conversion() {
        let mut h = Harness::new();
        h.pp.set_info(single_step()).unwrap();
        let (src, dst) = h.attach(&single_step());
        h.pp.commit().unwrap();

        assert_eq!(h.pump(), 1);
        let done = h.done.lock();
        assert_eq!(done.len(), 1);
        assert!(Arc::ptr_eq(&done[0].0, &src));
        assert!(Arc::ptr_eq(&done[0].1, &dst));
        drop(done);
        assert!(h.pp.is_idle());
    }

    #[test]
    fn test_completions_exactly_once_in_attach_order() {
        let mut h = Harness::new();
        h.pp.set_info(two_step()).unwrap();
        let pairs: Vec<_> = (0..3).map(|_| h.attach(&two_step())).collect();
        h.pp.commit().unwrap();

        assert_eq!(h.pp.converting_count(), 1);
        assert_eq!(h.pp.waiting_tasks().count(), 2);
        assert_eq!(h.pump(), 6);

        let done = h.done.lock();
        assert_eq!(done.len(), 3);
        for ((src, dst), (done_src, done_dst)) in pairs.iter().zip(done.iter()) {
            assert!(Arc::ptr_eq(src, done_src));
            assert!(Arc::ptr_eq(dst, done_dst));
        }
        drop(done);
        assert!(h.pp.is_idle());
        assert_eq!(h.pp.pool().allocated(), 3);
        assert_eq!(h.pp.pool().cached(), 3);
    }

    #[test]
    fn test_intermediates_are_reused() {
        let mut h = Harness::new();
        h.pp.set_info(two_step()).unwrap();
        h.attach(&two_step());
        h.pp.commit().unwrap();
        h.pump();
        h.attach(&two_step());
        h.pp.commit().unwrap();
        h.pump();
        assert_eq!(h.completed(), 2);
        assert_eq!(h.pp.pool().allocated(), 1);
    }

    #[test]
    fn test_step_jobs_and_pause_after_each_step() {
        let mut h = Harness::new();
        h.device.set_auto_complete(false);
        h.pp.set_info(two_step()).unwrap();
        h.attach(&two_step());
        h.pp.commit().unwrap();

        let jobs = h.pp.step_jobs().to_vec();
        assert_eq!(jobs.len(), 2);
        assert_eq!(h.pp.hw().state(jobs[0]), RunState::Playing);
        assert_eq!(h.pp.hw().state(jobs[1]), RunState::Stopped);

        h.deliver(jobs[0]).unwrap();
        let task = h.pp.active_task().unwrap();
        assert_eq!(task.current_step(), 1);
        assert_eq!(task.status(), TaskStatus::Converting);
        assert_eq!(h.pp.hw().state(jobs[0]), RunState::Paused);
        assert_eq!(h.pp.hw().state(jobs[1]), RunState::Playing);
        assert_eq!(h.completed(), 0);

        h.deliver(jobs[1]).unwrap();
        assert_eq!(h.completed(), 1);
        assert_eq!(h.device.control_count(jobs[0], IppCtrl::Pause), 1);
        assert_eq!(h.device.control_count(jobs[1], IppCtrl::Pause), 1);
    }

    #[test]
    fn test_second_task_resumes_paused_job() {
        let mut h = Harness::new();
        h.pp.set_info(single_step()).unwrap();
        h.attach(&single_step());
        h.attach(&single_step());
        h.pp.commit().unwrap();
        h.pump();

        let job = h.pp.step_jobs()[0];
        assert_eq!(h.completed(), 2);
        assert_eq!(h.device.control_count(job, IppCtrl::Play), 1);
        assert_eq!(h.device.control_count(job, IppCtrl::Resume), 1);
    }

    #[test]
    fn test_mismatched_events_ignored() {
        let mut h = Harness::new();
        h.device.set_auto_complete(false);
        h.pp.set_info(single_step()).unwrap();
        h.attach(&single_step());
        h.pp.commit().unwrap();
        let job = h.pp.step_jobs()[0];
        let index = h.pp.active_task().unwrap().index();

        let stale = IppEvent {
            user_data: 5,
            tv_sec: 0,
            tv_usec: 0,
            job: job + 100,
            buf_id: [index, index],
        };
        h.pp.handle_event(&stale).unwrap();
        h.pp
            .handle_event(&IppEvent {
                job,
                buf_id: [index + 1, index + 1],
                ..stale
            })
            .unwrap();
        assert_eq!(h.completed(), 0);
        assert_eq!(
            h.pp.active_task().unwrap().status(),
            TaskStatus::Converting
        );

        let real = IppEvent {
            job,
            buf_id: [index, index],
            ..stale
        };
        h.pp.handle_event(&real).unwrap();
        assert_eq!(h.completed(), 1);

        // Duplicate delivery after completion
        h.pp.handle_event(&real).unwrap();
        assert_eq!(h.completed(), 1);
    }

    #[test]
    fn test_buffer_indices_lowest_free() {
        let mut h = Harness::new();
        h.device.set_auto_complete(false);
        h.pp.set_info(single_step()).unwrap();
        for _ in 0..3 {
            h.attach(&single_step());
        }
        h.pp.commit().unwrap();

        let mut indices = vec![h.pp.active_task().unwrap().index()];
        indices.extend(h.pp.waiting_tasks().map(Task::index));
        assert_eq!(indices, vec![0, 1, 2]);

        let job = h.pp.step_jobs()[0];
        h.deliver(job).unwrap();
        // Index 0 is free again
        h.attach(&single_step());
        h.pp.commit().unwrap();
        let last = h.pp.waiting_tasks().last().unwrap();
        assert_eq!(last.index(), 0);
    }

    #[test]
    fn test_commit_without_info() {
        let mut h = Harness::new();
        h.attach(&single_step());
        let err = h.pp.commit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(h.pp.pending_count(), 1);
    }

    #[test]
    fn test_configure_failure_leaves_queue_for_retry() {
        let mut h = Harness::new();
        h.pp.set_info(two_step()).unwrap();
        h.attach(&two_step());
        h.device.fail_next(SimOp::SetProperty);

        let err = h.pp.commit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationFailed);
        assert_eq!(h.pp.pending_count(), 1);
        assert!(h.pp.active_task().is_none());

        h.pp.commit().unwrap();
        assert_eq!(h.pp.step_jobs().len(), 2);
        h.pump();
        assert_eq!(h.completed(), 1);
    }

    #[test]
    fn test_partial_configure_failure_reuses_jobs() {
        let mut h = Harness::new();
        h.pp.set_info(two_step()).unwrap();
        h.attach(&two_step());
        h.pp.commit().unwrap();
        h.pump();
        let jobs = h.pp.step_jobs().to_vec();

        let other = ConversionSpec::new(
            BufferConfig::full(PixelFormat::NV12, Size::FHD_1080P),
            BufferConfig::full(PixelFormat::XRGB8888, Size::new(240, 120)),
        );
        h.pp.set_info(other).unwrap();
        h.device.fail_next(SimOp::SetProperty);
        assert!(h.pp.commit().is_err());
        h.pp.commit().unwrap();
        assert_eq!(h.pp.step_jobs(), jobs.as_slice());
    }

    #[test]
    fn test_start_failure_requeues_task() {
        let mut h = Harness::new();
        h.pp.set_info(single_step()).unwrap();
        h.attach(&single_step());
        h.device.fail_next(SimOp::CmdControl);

        assert!(h.pp.commit().is_err());
        assert!(h.pp.active_task().is_none());
        assert_eq!(h.pp.waiting_tasks().count(), 1);
        assert_eq!(h.completed(), 0);
        // The buffers queued for the failed start are taken back
        let job = h.pp.step_jobs()[0];
        assert_eq!(h.device.queued(job), 0);
        assert!(
            h.device
                .count(|c| matches!(c, SimCall::Queue(q) if q.buf_op == BufferOp::Dequeue))
                > 0
        );

        h.pp.commit().unwrap();
        h.pump();
        assert_eq!(h.completed(), 1);
    }

    #[test]
    fn test_set_info_rejections_keep_roadmap() {
        let mut h = Harness::new();
        h.pp.set_info(two_step()).unwrap();
        let before = h.pp.roadmap().cloned();

        // 1920 -> 100 needs three passes
        let extreme = ConversionSpec::new(
            BufferConfig::full(PixelFormat::NV12, Size::FHD_1080P),
            BufferConfig::full(PixelFormat::NV12, Size::new(100, 100)),
        );
        let err = h.pp.set_info(extreme).unwrap_err();
        assert!(matches!(err, Error::InvalidConversion(_)));
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = h.pp.set_info(single_step().with_sync(true)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let mut bad_format = single_step();
        bad_format.dst.format = PixelFormat::C8;
        assert!(matches!(
            h.pp.set_info(bad_format),
            Err(Error::UnknownFormat(_))
        ));

        let bad_crop = ConversionSpec::new(
            BufferConfig::full(PixelFormat::NV12, Size::FHD_1080P)
                .with_crop(Rect::new(1000, 0, 1000, 1080)),
            BufferConfig::full(PixelFormat::XRGB8888, Size::HD_720P),
        );
        assert_eq!(
            h.pp.set_info(bad_crop).unwrap_err().kind(),
            ErrorKind::InvalidParameter
        );

        let tiny = ConversionSpec::new(
            BufferConfig::full(PixelFormat::NV12, Size::new(8, 8)),
            BufferConfig::full(PixelFormat::XRGB8888, Size::new(16, 8)),
        );
        assert_eq!(
            h.pp.set_info(tiny).unwrap_err().kind(),
            ErrorKind::InvalidParameter
        );

        assert_eq!(h.pp.roadmap().cloned(), before);
    }

    #[test]
    fn test_unchanged_info_skips_reconfigure() {
        let mut h = Harness::new();
        h.pp.set_info(single_step()).unwrap();
        h.pp.commit().unwrap();
        h.pp.set_info(single_step()).unwrap();
        h.pp.commit().unwrap();
        let configures = h
            .device
            .count(|c| matches!(c, SimCall::SetProperty { .. }));
        assert_eq!(configures, 1);
    }

    #[test]
    fn test_roadmap_change_while_task_in_flight() {
        let mut h = Harness::new();
        h.device.set_auto_complete(false);
        h.pp.set_info(single_step()).unwrap();
        let first = h.attach(&single_step());
        h.pp.commit().unwrap();
        let old_job = h.pp.step_jobs()[0];

        let rotated = two_step().with_transform(Transform::Rotate180);
        h.pp.set_info(rotated).unwrap();
        let second = h.attach(&rotated);
        h.pp.commit().unwrap();

        // The in-flight step keeps running on its original job
        assert_eq!(h.pp.retired_jobs(), &[old_job]);
        assert!(!h.pp.step_jobs().contains(&old_job));
        assert_eq!(h.device.control_count(old_job, IppCtrl::Pause), 0);
        assert_eq!(h.pp.hw().state(old_job), RunState::Playing);

        h.deliver(old_job).unwrap();
        assert_eq!(h.completed(), 1);
        assert!(h.pp.retired_jobs().is_empty());
        assert_eq!(h.device.control_count(old_job, IppCtrl::Stop), 1);

        let jobs = h.pp.step_jobs().to_vec();
        h.deliver(jobs[0]).unwrap();
        h.deliver(jobs[1]).unwrap();

        let done = h.done.lock();
        assert_eq!(done.len(), 2);
        assert!(Arc::ptr_eq(&done[0].0, &first.0));
        assert!(Arc::ptr_eq(&done[1].1, &second.1));
    }

    #[test]
    fn test_stalled_step_then_cancel() {
        let mut h = Harness::new();
        h.device.set_auto_complete(false);
        h.pp.set_info(two_step()).unwrap();
        h.attach(&two_step());
        h.attach(&two_step());
        h.pp.commit().unwrap();
        let jobs = h.pp.step_jobs().to_vec();

        h.device.fail_next(SimOp::QueueBuffer);
        assert!(h.deliver(jobs[0]).is_err());
        let task = h.pp.active_task().unwrap();
        assert_eq!(task.current_step(), 1);
        assert_eq!(task.status(), TaskStatus::Converting);
        assert_eq!(h.completed(), 0);

        assert!(h.pp.cancel_active().unwrap());
        assert_eq!(h.completed(), 0);
        // Second task took over the hardware
        let next = h.pp.active_task().unwrap();
        assert_eq!(next.current_step(), 0);
        assert_eq!(next.status(), TaskStatus::Converting);

        h.deliver(jobs[0]).unwrap();
        h.deliver(jobs[1]).unwrap();
        assert_eq!(h.completed(), 1);
        assert!(!h.pp.cancel_active().unwrap());
    }

    #[test]
    fn test_shutdown_drops_tasks_silently() {
        let mut h = Harness::new();
        h.device.set_auto_complete(false);
        h.pp.set_info(two_step()).unwrap();
        h.attach(&two_step());
        h.attach(&two_step());
        h.pp.commit().unwrap();
        h.attach(&two_step());
        let jobs = h.pp.step_jobs().to_vec();
        let index = h.pp.active_task().unwrap().index();

        h.pp.shutdown();
        assert!(h.pp.is_idle());
        assert_eq!(h.completed(), 0);
        assert!(h.pp.hw().jobs().is_empty());
        assert_eq!(h.device.control_count(jobs[0], IppCtrl::Stop), 1);
        assert_eq!(h.device.control_count(jobs[1], IppCtrl::Stop), 0);
        assert_eq!(h.device.queued(jobs[0]), 0);
        let dequeues = h.device.count(|c| {
            matches!(c, SimCall::Queue(q) if q.buf_op == BufferOp::Dequeue && q.index == index)
        });
        assert_eq!(dequeues, 2);

        assert!(h.pp.commit().is_err());
        h.pp.shutdown();
        assert_eq!(h.device.control_count(jobs[0], IppCtrl::Stop), 1);
        // Only the caller's own surfaces remain
        assert_eq!(h.pp.pool().cached(), 0);
    }

    #[test]
    fn test_drop_stops_running_job() {
        let device = Arc::new(SimDevice::new());
        device.set_auto_complete(false);
        let allocator = Arc::new(SimAllocator::new());
        let mut pp = PpInstance::new(1, device.clone(), allocator.clone(), PpConfig::default());
        pp.set_info(single_step()).unwrap();
        let src = allocator.allocate(Size::FHD_1080P, PixelFormat::NV12).unwrap();
        let dst = allocator.allocate(Size::HD_720P, PixelFormat::XRGB8888).unwrap();
        pp.attach(src, dst).unwrap();
        pp.commit().unwrap();
        let job = pp.step_jobs()[0];

        drop(pp);
        assert_eq!(device.control_count(job, IppCtrl::Stop), 1);
        assert_eq!(allocator.live(), 0);
    }

    #[test]
    fn test_handler_registered_after_commit() {
        let device = Arc::new(SimDevice::new());
        device.set_auto_complete(false);
        let allocator = Arc::new(SimAllocator::new());
        let mut pp = PpInstance::new(2, device.clone(), allocator.clone(), PpConfig::default());
        pp.set_info(single_step()).unwrap();
        let src = allocator.allocate(Size::FHD_1080P, PixelFormat::NV12).unwrap();
        let dst = allocator.allocate(Size::HD_720P, PixelFormat::XRGB8888).unwrap();
        pp.attach(src, dst).unwrap();
        pp.commit().unwrap();

        let fired = Arc::new(Mutex::new(0usize));
        let sink = fired.clone();
        pp.set_done_handler(move |_, _| *sink.lock() += 1);

        let job = pp.step_jobs()[0];
        assert!(device.complete(job));
        let mut buf = [0u8; 64];
        let n = device.read_events(&mut buf).unwrap();
        for event in parse_events(&buf[..n]) {
            if let DrmEvent::Ipp(e) = event {
                pp.handle_event(&e).unwrap();
            }
        }

        assert_eq!(*fired.lock(), 1);
        assert!(pp.is_idle());
    }

    #[test]
    fn test_attach_checks_surfaces_against_info() {
        let mut h = Harness::new();
        h.pp.set_info(single_step()).unwrap();

        let src = h.allocator.allocate(Size::FHD_1080P, PixelFormat::NV12).unwrap();
        let small = h.allocator.allocate(Size::new(640, 360), PixelFormat::XRGB8888).unwrap();
        let err = h.pp.attach(src.clone(), small).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let wrong_format = h.allocator.allocate(Size::HD_720P, PixelFormat::RGB565).unwrap();
        let err = h.pp.attach(src.clone(), wrong_format).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(h.pp.pending_count(), 0);

        // Larger than configured is fine; the crop selects the region
        let large = h.allocator.allocate(Size::FHD_1080P, PixelFormat::XRGB8888).unwrap();
        h.pp.attach(src, large).unwrap();
        assert_eq!(h.pp.pending_count(), 1);
    }

    #[test]
    fn test_attach_rejects_surface_without_handles() {
        #[derive(Debug)]
        struct Bare;
        impl crate::pp::buffer::Surface for Bare {
            fn size(&self) -> Size {
                Size::HD_720P
            }
            fn format(&self) -> PixelFormat {
                PixelFormat::NV12
            }
            fn handles(&self) -> &[u32] {
                &[]
            }
            fn planes(&self) -> &[crate::pp::buffer::PlaneInfo] {
                &[]
            }
        }

        let mut h = Harness::new();
        let (src, _) = h.pair(&single_step());
        let err = h.pp.attach(src, Arc::new(Bare)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(h.pp.pending_count(), 0);
    }
}
