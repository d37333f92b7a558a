pub mod format;
pub mod frame;
pub mod matcher;
pub mod pipeline;
pub mod session;
#[cfg(target_os = "linux")]
pub mod v4l2;

pub use format::{CaptureFormat, CaptureParams};
pub use frame::{PixelFormat, RawFrame};
pub use matcher::{best_device, closest_match, FormatMatch};
pub use pipeline::{
    FrameGuard, FramePipeline, FrameSink, PipelineState, PipelineStats, StopHandle,
};
pub use session::{BackendFactory, CaptureBackend, CaptureSession, CaptureSessionManager};
#[cfg(target_os = "linux")]
pub use v4l2::V4l2Backend;
