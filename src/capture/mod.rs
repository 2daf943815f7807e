pub mod frame_source;
pub mod throttle;

pub use frame_source::{
    frame_source_from_config, EncodedFrame, FileFrameSource, FrameSource, HttpSnapshotSource,
};
pub use throttle::{CaptureSession, CaptureStats, CaptureThrottle, DetectionSink, TickOutcome};
