//! Double-buffered, latest-frame-wins frame pipeline
//!
//! The capture thread writes through a [`FrameSink`], the consumer polls the
//! [`FramePipeline`]. There are exactly two slots: the producer always writes
//! the slot the consumer is not holding, so a frame that was never picked up
//! is overwritten by the next one. Overruns are counted, not reported.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use tracing::{debug, trace, warn};

use super::frame::{PixelFormat, RawFrame};
use crate::error::{CameraError, Result};
use crate::sync::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Capturing,
    Stopped,
}

#[derive(Debug)]
struct Control {
    state: PipelineState,
    /// Slot last completed by the producer.
    current: Option<usize>,
    /// Slot currently lent to the consumer.
    in_use: Option<usize>,
    /// `current` holds a frame the consumer has not seen yet.
    fresh: bool,
    sequence: u64,
}

#[derive(Default)]
struct Stats {
    frames_delivered: AtomicU64,
    frames_consumed: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Snapshot of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_delivered: u64,
    pub frames_consumed: u64,
    pub frames_dropped: u64,
}

struct Shared {
    control: Mutex<Control>,
    slots: [Mutex<RawFrame>; 2],
    frame_available: Event,
    stats: CachePadded<Stats>,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn try_slot(slot: &Mutex<RawFrame>) -> Option<MutexGuard<'_, RawFrame>> {
    match slot.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(err)) => Some(err.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

/// Consumer side of the pipeline.
pub struct FramePipeline {
    shared: Arc<Shared>,
}

/// Producer side of the pipeline, handed to the platform capture callback.
#[derive(Clone)]
pub struct FrameSink {
    shared: Arc<Shared>,
}

#[derive(Debug, Clone, Copy)]
enum Wait {
    Poll,
    Forever,
    Until(Instant),
}

impl Default for FramePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl FramePipeline {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    state: PipelineState::Idle,
                    current: None,
                    in_use: None,
                    fresh: false,
                    sequence: 0,
                }),
                slots: [Mutex::default(), Mutex::default()],
                frame_available: Event::auto(false),
                stats: CachePadded::new(Stats::default()),
            }),
        }
    }

    pub fn sink(&self) -> FrameSink {
        FrameSink {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.shared.control().state
    }

    /// Enter `Capturing`. Allowed from any state, including `Stopped`.
    pub fn start(&self) {
        let mut control = self.shared.control();
        control.state = PipelineState::Capturing;
        control.current = None;
        control.fresh = false;
        self.shared.frame_available.reset();
        debug!("frame pipeline capturing");
    }

    /// Return to `Idle` after a capture session failed to start.
    pub(crate) fn abort(&self) {
        let mut control = self.shared.control();
        control.state = PipelineState::Idle;
        control.fresh = false;
        drop(control);
        self.shared.frame_available.signal();
    }

    /// Enter the terminal `Stopped` state and release a blocked consumer.
    pub fn stop_capture(&self) {
        self.shared.stop();
    }

    /// Handle that stops the pipeline from any thread, including while the
    /// consumer is blocked in [`get_next_frame`](Self::get_next_frame).
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Wait until the producer has delivered at least one frame since
    /// [`start`](Self::start), without consuming it.
    pub fn wait_until_streaming(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or(CameraError::Unsupported)?;
        loop {
            {
                let control = self.shared.control();
                if control.state != PipelineState::Capturing {
                    return Err(CameraError::NoFrame);
                }
                if control.current.is_some() {
                    return Ok(());
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.shared.frame_available.timed_wait(remaining)?;
        }
    }

    /// Next unseen frame, either waiting for one or returning
    /// [`CameraError::NoFrame`] immediately.
    pub fn get_next_frame(&mut self, blocking: bool) -> Result<FrameGuard<'_>> {
        self.next_frame(if blocking { Wait::Forever } else { Wait::Poll })
    }

    /// Wait at most `timeout` for the next unseen frame.
    pub fn get_next_frame_timeout(&mut self, timeout: Duration) -> Result<FrameGuard<'_>> {
        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or(CameraError::Unsupported)?;
        self.next_frame(Wait::Until(deadline))
    }

    fn next_frame(&mut self, wait: Wait) -> Result<FrameGuard<'_>> {
        let shared: &Shared = &self.shared;
        loop {
            {
                let mut control = shared.control();
                if control.state != PipelineState::Capturing {
                    return Err(CameraError::NoFrame);
                }
                if let (true, Some(index)) = (control.fresh, control.current) {
                    control.fresh = false;
                    control.in_use = Some(index);
                    let slot = shared.slots[index]
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    drop(control);

                    shared.stats.frames_consumed.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("panacam_frames_consumed").increment(1);
                    return Ok(FrameGuard {
                        shared,
                        index,
                        slot,
                    });
                }
            }

            match wait {
                Wait::Poll => return Err(CameraError::NoFrame),
                Wait::Forever => shared.frame_available.wait(),
                Wait::Until(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    shared.frame_available.timed_wait(remaining)?;
                }
            }
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }
}

impl Shared {
    fn stop(&self) {
        let mut control = self.control();
        control.state = PipelineState::Stopped;
        control.fresh = false;
        drop(control);
        self.frame_available.signal();
        debug!("frame pipeline stopped");
    }

    fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_delivered: self.stats.frames_delivered.load(Ordering::Relaxed),
            frames_consumed: self.stats.frames_consumed.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

impl FrameSink {
    /// Store a captured frame, overwriting any frame the consumer has not
    /// picked up yet. Never waits on the consumer.
    pub fn on_frame_delivered(&self, bytes: &[u8], format: PixelFormat, width: u32, height: u32) {
        let shared = &*self.shared;
        let mut control = shared.control();
        if control.state != PipelineState::Capturing {
            trace!("frame delivered while not capturing, ignored");
            return;
        }

        let preferred = match control.current {
            Some(current) => 1 - current,
            None => 0,
        };
        let preferred = if control.in_use == Some(preferred) {
            1 - preferred
        } else {
            preferred
        };

        // The consumer may be between releasing its slot and unlocking it;
        // the other slot is then guaranteed free.
        let (index, mut slot) = match try_slot(&shared.slots[preferred]) {
            Some(slot) => (preferred, slot),
            None => match try_slot(&shared.slots[1 - preferred]) {
                Some(slot) => (1 - preferred, slot),
                None => {
                    warn!("both frame slots busy, frame dropped");
                    shared.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("panacam_frames_dropped").increment(1);
                    return;
                }
            },
        };

        if control.fresh {
            shared.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("panacam_frames_dropped").increment(1);
        }

        control.sequence += 1;
        slot.write(bytes, format, width, height, control.sequence);
        drop(slot);

        control.current = Some(index);
        control.fresh = true;
        drop(control);

        shared.stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("panacam_frames_delivered").increment(1);
        shared.frame_available.signal();
    }

    /// End of stream from the producer side: stops the pipeline exactly like
    /// [`FramePipeline::stop_capture`].
    pub fn close(&self) {
        self.shared.stop();
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }
}

/// Cross-thread stop for a [`FramePipeline`].
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    pub fn stop_capture(&self) {
        self.shared.stop();
    }
}

/// A frame lent to the consumer. Dropping it (or calling
/// [`FrameGuard::free`]) hands the slot back to the producer.
pub struct FrameGuard<'a> {
    shared: &'a Shared,
    index: usize,
    slot: MutexGuard<'a, RawFrame>,
}

impl FrameGuard<'_> {
    pub fn free(self) {}
}

impl std::ops::Deref for FrameGuard<'_> {
    type Target = RawFrame;

    fn deref(&self) -> &RawFrame {
        &self.slot
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        let mut control = self.shared.control();
        if control.in_use == Some(self.index) {
            control.in_use = None;
        }
    }
}
