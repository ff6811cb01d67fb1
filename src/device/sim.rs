//! Simulated IPP unit
//!
//! Behaves like the SPRD IPP driver as seen from user space: property ids are
//! handed out on first configure, buffer pairs queued against a playing job
//! complete in order, and completions are delivered as serialized DRM event
//! records through [`IppDevice::read_events`]. Every successful request is
//! recorded so tests can assert on the exact ioctl sequence.

use super::event::{IppEvent, IPP_EVENT_SIZE};
use super::{BufferOp, IppCtrl, IppDevice, IppOp, IppProperty, IppSide, JobId, QueueRequest};
use crate::error::{Error, Result};
use crate::pp::buffer::{plane_layout, PlaneInfo, Surface, SurfaceAllocator, SurfaceRef};
use crate::types::{PixelFormat, Size};

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Request kinds, for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    SetProperty,
    QueueBuffer,
    CmdControl,
}

/// A request the simulated unit accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    SetProperty {
        job: JobId,
        src: IppSide,
        dst: IppSide,
    },
    Queue(QueueRequest),
    Control {
        job: JobId,
        ctrl: IppCtrl,
    },
}

#[derive(Debug, Clone, Copy)]
struct QueuedPair {
    index: u32,
    user_data: u64,
    src: bool,
    dst: bool,
}

#[derive(Debug)]
struct SimState {
    next_job: JobId,
    jobs: HashSet<JobId>,
    calls: Vec<SimCall>,
    queued: HashMap<JobId, VecDeque<QueuedPair>>,
    running: HashSet<JobId>,
    completions: VecDeque<IppEvent>,
    failures: HashSet<SimOp>,
    auto_complete: bool,
    usec: u32,
}

impl SimState {
    fn take_failure(&mut self, op: SimOp) -> bool {
        self.failures.remove(&op)
    }

    /// Complete every fully queued pair on running jobs
    fn pump(&mut self) {
        if !self.auto_complete {
            return;
        }
        let running: Vec<JobId> = self.running.iter().copied().collect();
        for job in running {
            while self.complete_one(job) {}
        }
    }

    fn complete_one(&mut self, job: JobId) -> bool {
        let Some(queue) = self.queued.get_mut(&job) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|p| p.src && p.dst) else {
            return false;
        };
        let Some(pair) = queue.remove(pos) else {
            return false;
        };

        self.usec = self.usec.wrapping_add(16_667);
        self.completions.push_back(IppEvent {
            user_data: pair.user_data,
            tv_sec: self.usec / 1_000_000,
            tv_usec: self.usec % 1_000_000,
            job,
            buf_id: [pair.index, pair.index],
        });
        true
    }
}

/// In-process stand-in for the SPRD IPP driver
#[derive(Debug)]
pub struct SimDevice {
    state: Mutex<SimState>,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                next_job: 1,
                jobs: HashSet::new(),
                calls: Vec::new(),
                queued: HashMap::new(),
                running: HashSet::new(),
                completions: VecDeque::new(),
                failures: HashSet::new(),
                auto_complete: true,
                usec: 0,
            }),
        }
    }

    /// Make the next request of kind `op` fail with `EIO`
    pub fn fail_next(&self, op: SimOp) {
        self.state.lock().failures.insert(op);
    }

    /// Whether queued pairs on a playing job complete on their own
    pub fn set_auto_complete(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.auto_complete = enabled;
        state.pump();
    }

    /// Complete the oldest fully queued pair on `job`, playing or not
    pub fn complete(&self, job: JobId) -> bool {
        self.state.lock().complete_one(job)
    }

    /// Deliver an arbitrary completion on the next read
    pub fn inject(&self, event: IppEvent) {
        self.state.lock().completions.push_back(event);
    }

    /// Accepted requests, oldest first
    pub fn calls(&self) -> Vec<SimCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Accepted requests matching `pred`
    pub fn count(&self, pred: impl Fn(&SimCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Accepted run-control requests of kind `ctrl` on `job`
    pub fn control_count(&self, job: JobId, ctrl: IppCtrl) -> usize {
        self.count(|c| matches!(c, SimCall::Control { job: j, ctrl: k } if *j == job && *k == ctrl))
    }

    pub fn is_running(&self, job: JobId) -> bool {
        self.state.lock().running.contains(&job)
    }

    /// Buffer pairs still queued on `job`
    pub fn queued(&self, job: JobId) -> usize {
        self.state
            .lock()
            .queued
            .get(&job)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Completions waiting to be read
    pub fn pending_events(&self) -> usize {
        self.state.lock().completions.len()
    }
}

impl IppDevice for SimDevice {
    fn set_property(&self, property: &IppProperty) -> Result<JobId> {
        let mut state = self.state.lock();
        if state.take_failure(SimOp::SetProperty) {
            return Err(Error::ioctl("SPRD_IPP_SET_PROPERTY", nix::errno::Errno::EIO));
        }

        let job = match property.job {
            Some(job) if state.jobs.contains(&job) => job,
            Some(job) => {
                return Err(Error::ioctl(
                    "SPRD_IPP_SET_PROPERTY",
                    if job == 0 {
                        nix::errno::Errno::EINVAL
                    } else {
                        nix::errno::Errno::ENOENT
                    },
                ))
            }
            None => {
                let job = state.next_job;
                state.next_job += 1;
                state.jobs.insert(job);
                job
            }
        };

        state.calls.push(SimCall::SetProperty {
            job,
            src: property.src,
            dst: property.dst,
        });
        Ok(job)
    }

    fn queue_buffer(&self, request: &QueueRequest) -> Result<()> {
        let mut state = self.state.lock();
        if state.take_failure(SimOp::QueueBuffer) {
            return Err(Error::ioctl("SPRD_IPP_QUEUE_BUF", nix::errno::Errno::EIO));
        }
        if !state.jobs.contains(&request.job) {
            return Err(Error::ioctl("SPRD_IPP_QUEUE_BUF", nix::errno::Errno::ENOENT));
        }

        let queue = state.queued.entry(request.job).or_default();
        match request.buf_op {
            BufferOp::Enqueue => {
                let pos = match queue.iter().position(|p| p.index == request.index) {
                    Some(pos) => pos,
                    None => {
                        queue.push_back(QueuedPair {
                            index: request.index,
                            user_data: request.user_data,
                            src: false,
                            dst: false,
                        });
                        queue.len() - 1
                    }
                };
                let pair = &mut queue[pos];
                match request.op {
                    IppOp::Src => pair.src = true,
                    IppOp::Dst => pair.dst = true,
                }
            }
            BufferOp::Dequeue => queue.retain(|p| p.index != request.index),
        }

        state.calls.push(SimCall::Queue(*request));
        state.pump();
        Ok(())
    }

    fn cmd_control(&self, job: JobId, ctrl: IppCtrl) -> Result<()> {
        let mut state = self.state.lock();
        if state.take_failure(SimOp::CmdControl) {
            return Err(Error::ioctl("SPRD_IPP_CMD_CTRL", nix::errno::Errno::EIO));
        }
        if !state.jobs.contains(&job) {
            return Err(Error::ioctl("SPRD_IPP_CMD_CTRL", nix::errno::Errno::ENOENT));
        }

        match ctrl {
            IppCtrl::Play | IppCtrl::Resume => {
                state.running.insert(job);
            }
            IppCtrl::Pause => {
                state.running.remove(&job);
            }
            IppCtrl::Stop => {
                state.running.remove(&job);
                state.queued.remove(&job);
            }
        }

        state.calls.push(SimCall::Control { job, ctrl });
        state.pump();
        Ok(())
    }

    fn read_events(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let mut written = 0;
        while written + IPP_EVENT_SIZE <= buf.len() {
            let Some(event) = state.completions.pop_front() else {
                break;
            };
            buf[written..written + IPP_EVENT_SIZE].copy_from_slice(&event.encode());
            written += IPP_EVENT_SIZE;
        }
        Ok(written)
    }
}

/// Heap-less surface with a fake GEM handle
#[derive(Debug)]
pub struct SimSurface {
    handles: [u32; 1],
    size: Size,
    format: PixelFormat,
    planes: Vec<PlaneInfo>,
    live: Arc<AtomicUsize>,
}

impl Surface for SimSurface {
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

impl Drop for SimSurface {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hands out [`SimSurface`]s and counts how many are alive
#[derive(Debug)]
pub struct SimAllocator {
    next_handle: AtomicU32,
    live: Arc<AtomicUsize>,
    failing: AtomicBool,
}

impl Default for SimAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimAllocator {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU32::new(1),
            live: Arc::new(AtomicUsize::new(0)),
            failing: AtomicBool::new(false),
        }
    }

    /// Surfaces allocated and not yet dropped
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Make every allocation fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl SurfaceAllocator for SimAllocator {
    fn allocate(&self, size: Size, format: PixelFormat) -> Result<SurfaceRef> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::OutOfMemory(format!("simulated {} {}", format, size)));
        }
        let layout = format.layout().ok_or(Error::UnknownFormat(format))?;
        // 64-byte aligned pitch, as dumb buffers get
        let pitch = (size.width * layout.bpp / 8 + 63) & !63;
        let planes = plane_layout(size, format, pitch)?;

        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SimSurface {
            handles: [handle],
            size,
            format,
            planes,
            live: self.live.clone(),
        }))
    }
}
